//! Paginatable source shapes.

use std::error::Error;
use std::fmt;

use serde_json::Value;

use super::PaginationError;

/// Error raised by a source while fetching or counting.
pub type SourceError = Box<dyn Error + Send + Sync>;

/// When a self-paginating source knows its item count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Counting {
    /// The count is available before fetching any slice.
    #[default]
    Eager,
    /// The count is only reliable after a slice was fetched.
    Late,
}

/// A source that produces its own slices and count.
pub trait SelfPaginating {
    type Item;

    fn items_for(&mut self, offset: usize, limit: usize) -> Result<Vec<Self::Item>, SourceError>;

    fn item_count(&mut self) -> Result<usize, SourceError>;

    fn counting(&self) -> Counting {
        Counting::Eager
    }

    /// Every item in order, for locating a page with a page finder.
    ///
    /// Sources that return `None` cannot be used with a page finder.
    fn all_items(&mut self) -> Option<Box<dyn Iterator<Item = Self::Item> + '_>> {
        None
    }
}

/// A query with native limit/offset, such as a prepared database statement.
///
/// `count` reports the number of rows the query yields with its current limit
/// and offset applied.
pub trait BoundedQuery {
    type Item;

    fn count(&mut self) -> Result<usize, SourceError>;

    fn limit(&self) -> Option<usize>;

    fn offset(&self) -> usize;

    fn set_limit(&mut self, limit: Option<usize>);

    fn set_offset(&mut self, offset: usize);

    fn execute(&mut self) -> Result<Vec<Self::Item>, SourceError>;
}

/// Everything the paginator can slice.
pub enum Source<'a, T> {
    Items(Vec<T>),
    /// A lazy sequence with a known length. Never fully materialized.
    Sequence {
        items: Box<dyn Iterator<Item = T> + 'a>,
        len: usize,
    },
    SelfPaginating(&'a mut dyn SelfPaginating<Item = T>),
    Query(&'a mut dyn BoundedQuery<Item = T>),
}

impl<'a, T> Source<'a, T> {
    pub fn sequence<I>(items: I) -> Self
    where
        I: ExactSizeIterator<Item = T> + 'a,
    {
        let len = items.len();
        Self::Sequence {
            items: Box::new(items),
            len,
        }
    }

    /// A sequence whose length is known from elsewhere, e.g. a separate count query.
    pub fn counted<I>(items: I, len: usize) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: 'a,
    {
        Self::Sequence {
            items: Box::new(items.into_iter()),
            len,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Items(_) => "items",
            Self::Sequence { .. } => "sequence",
            Self::SelfPaginating(_) => "self_paginating",
            Self::Query(_) => "query",
        }
    }
}

impl<T> From<Vec<T>> for Source<'_, T> {
    fn from(items: Vec<T>) -> Self {
        Self::Items(items)
    }
}

impl Source<'_, Value> {
    /// Source over a cached JSON collection. Anything but an array is rejected.
    pub fn from_json(value: Value) -> Result<Self, PaginationError> {
        match value {
            Value::Array(items) => Ok(Self::Items(items)),
            other => Err(PaginationError::unsupported(format!(
                "expected a JSON array, got {}",
                json_kind(&other)
            ))),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

impl<T> fmt::Debug for Source<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Items(items) => f.debug_struct("Items").field("len", &items.len()).finish(),
            Self::Sequence { len, .. } => f.debug_struct("Sequence").field("len", len).finish(),
            Self::SelfPaginating(_) => f.write_str("SelfPaginating(..)"),
            Self::Query(_) => f.write_str("Query(..)"),
        }
    }
}
