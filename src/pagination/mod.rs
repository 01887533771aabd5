//! Generic pagination.
//!
//! [`Paginator`] slices any [`Source`] into a [`Page`]: in-memory vectors, lazy
//! sequences, sources that paginate themselves (optionally only learning their
//! item count while fetching), and bounded queries with native limit/offset.

mod paginator;
mod source;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use paginator::Paginator;
pub use source::{BoundedQuery, Counting, SelfPaginating, Source, SourceError};

const DEFAULT_PAGE_SIZE: usize = 30;

#[derive(Debug, Error)]
pub enum PaginationError {
    #[error("unsupported pagination source: {0}")]
    UnsupportedSource(String),
    #[error("page size must be greater than zero")]
    InvalidPageSize,
    #[error("pagination source failed: {0}")]
    Source(#[source] SourceError),
}

impl PaginationError {
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::UnsupportedSource(message.into())
    }
}

/// Page metadata.
///
/// `page` and `pages` are 1-based. `page_count` is the number of items on the
/// returned slice, `item_count` the total across all pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: usize,
    pub pages: usize,
    pub page_size: usize,
    pub page_count: usize,
    pub item_count: usize,
}

impl Pagination {
    /// Metadata for `item_count` items with `requested_page` clamped into range.
    ///
    /// `page_size` must be non-zero; [`Paginator`] guarantees this.
    pub fn new(item_count: usize, page_size: usize, requested_page: usize) -> Self {
        let pages = Self::pages_for(item_count, page_size);
        Self {
            page: requested_page.clamp(1, pages),
            pages,
            page_size,
            page_count: 0,
            item_count,
        }
    }

    pub(crate) fn pages_for(item_count: usize, page_size: usize) -> usize {
        item_count.div_ceil(page_size.max(1)).max(1)
    }

    /// Zero-based index of the first item on this page.
    pub fn offset(&self) -> usize {
        (self.page - 1).saturating_mul(self.page_size)
    }

    pub fn has_next(&self) -> bool {
        self.page < self.pages
    }

    pub fn has_previous(&self) -> bool {
        self.page > 1
    }

    pub fn next_page(&self) -> Option<usize> {
        self.has_next().then_some(self.page + 1)
    }

    pub fn previous_page(&self) -> Option<usize> {
        self.has_previous().then_some(self.page - 1)
    }

    pub(crate) fn with_page_count(mut self, page_count: usize) -> Self {
        self.page_count = page_count;
        self
    }
}

/// One slice of a source plus its metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub pagination: Pagination,
}

/// Page size limits.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    /// Used when the caller does not ask for a page size.
    pub default_page_size: usize,
    /// Requested page sizes above this are clamped; `0` leaves them unbounded.
    pub max_page_size: usize,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: 0,
        }
    }
}

impl From<&crate::config::PaginationSettings> for PaginationConfig {
    fn from(settings: &crate::config::PaginationSettings) -> Self {
        Self {
            default_page_size: settings.default_page_size.get(),
            max_page_size: settings.max_page_size.get(),
        }
    }
}
