//! Cache configuration.
//!
//! Controls the memoization engine and the in-process store via `scopecache.toml`.

use std::num::NonZeroUsize;

use serde::Deserialize;

const DEFAULT_KEY_PREFIX: &str = "scopecache_";
const DEFAULT_MEMORY_CAPACITY: usize = 1000;
const DEFAULT_CONSUME_BATCH_LIMIT: usize = 100;

/// Cache configuration from `scopecache.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Look up and persist entries. When off, computations still run inside scopes.
    pub enabled: bool,
    /// Prefix prepended to every hashed store key.
    pub key_prefix: String,
    /// Maximum entries kept by the in-process store.
    pub memory_capacity: usize,
    /// Maximum invalidation events handled per consumption batch.
    pub consume_batch_limit: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
            consume_batch_limit: DEFAULT_CONSUME_BATCH_LIMIT,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            key_prefix: settings.key_prefix.clone(),
            memory_capacity: settings.memory_capacity.get(),
            consume_batch_limit: settings.consume_batch_limit.get(),
        }
    }
}

impl CacheConfig {
    /// Returns the store capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn memory_capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.memory_capacity).unwrap_or(NonZeroUsize::MIN)
    }
}
