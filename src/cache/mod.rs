//! Nested, tag-aware memoization.
//!
//! Computations are wrapped in [`CacheEngine::remember`]. Each one runs inside a
//! [`Scope`] that collects invalidation tags, the shortest lifetime, and whether
//! the result may be cached at all. When a computation finishes, its scope is
//! merged into the enclosing one, so an outer entry always carries the tags of
//! everything it was built from and is flushed whenever any of it changes.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! key_prefix = "scopecache_"
//! memory_capacity = 1000
//! consume_batch_limit = 100
//! ```

mod config;
mod context;
mod engine;
mod error;
mod events;
mod invalidation;
mod keys;
mod lock;
mod metrics;
mod options;
mod scope;
mod store;
mod tags;

pub use config::CacheConfig;
pub use context::RequestContext;
pub use engine::CacheEngine;
pub use error::{CacheError, CodecStage, StoreError};
pub use events::{CacheEvent, Epoch, EventKind, EventQueue};
pub use invalidation::{InvalidationPlan, Invalidator};
pub use keys::{ArrayKey, AuthState, CallableKey, Environment, KeyGenerator, RequestKey};
pub use metrics::{MetricsTracker, RecorderMetrics, ScopeLog, ScopeOutcome, ScopeRecord};
pub use options::{RememberOptions, Resolvable};
pub use scope::{Scope, ScopeRegistry, Scoped};
pub use store::{CacheEntry, CacheStore, MemoryStore};
pub use tags::{TagIndex, record_tag};

pub(crate) mod metric_names {
    pub(crate) use super::invalidation::METRIC_CONSUME_MS;
    pub(crate) use super::metrics::{
        METRIC_HIT_TOTAL, METRIC_MISS_TOTAL, METRIC_SCOPE_MS, METRIC_WRITE_TOTAL,
    };
    pub(crate) use super::store::{METRIC_EVICT_TOTAL, METRIC_FLUSH_TOTAL};
}
