//! Nested, tag-aware memoization and generic pagination for content resource layers.
//!
//! - [`cache`]: the memoization engine, scopes, key strategies, stores and invalidation.
//! - [`pagination`]: slicing of heterogeneous sources into pages.
//! - [`config`] and [`infra`]: layered settings, logging and runtime wiring.

pub mod cache;
pub mod config;
pub mod infra;
pub mod pagination;
