//! Cache storage.
//!
//! [`CacheStore`] is the contract the engine needs from a backend. [`MemoryStore`]
//! is the in-process implementation: LRU eviction, optional expiry, and a tag
//! index for flush-by-tag.

use std::collections::BTreeSet;
use std::sync::RwLock;

use lru::LruCache;
use metrics::counter;
use serde_json::Value;
use time::{Duration, OffsetDateTime};
use tracing::debug;

use super::config::CacheConfig;
use super::error::StoreError;
use super::lock::{rw_read, rw_write};
use super::tags::TagIndex;

const SOURCE: &str = "cache::store";
pub(crate) const METRIC_EVICT_TOTAL: &str = "scopecache_evict_total";
pub(crate) const METRIC_FLUSH_TOTAL: &str = "scopecache_flush_total";

/// A persisted computation result.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    pub content: Value,
    pub tags: BTreeSet<String>,
    /// Lifetime in seconds; `None` never expires.
    pub ttl: Option<u64>,
}

/// Backend contract required by the engine.
///
/// Implementations must be safe to share between request contexts. Failures are
/// reported as [`StoreError`] and are never swallowed by the engine.
pub trait CacheStore: Send + Sync {
    fn has(&self, key: &str) -> Result<bool, StoreError>;
    fn get(&self, key: &str) -> Result<Option<CacheEntry>, StoreError>;
    fn set(&self, entry: CacheEntry) -> Result<(), StoreError>;
    fn flush_by_tags(&self, tags: &BTreeSet<String>) -> Result<(), StoreError>;
    fn flush(&self) -> Result<(), StoreError>;
}

struct StoredEntry {
    entry: CacheEntry,
    expires_at: Option<OffsetDateTime>,
}

impl StoredEntry {
    fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

struct MemoryInner {
    entries: LruCache<String, StoredEntry>,
    index: TagIndex,
}

impl MemoryInner {
    fn remove(&mut self, key: &str) {
        self.entries.pop(key);
        self.index.unregister(key);
    }
}

/// In-process store with LRU eviction and tag-based invalidation.
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryStore {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            inner: RwLock::new(MemoryInner {
                entries: LruCache::new(config.memory_capacity_non_zero()),
                index: TagIndex::new(),
            }),
        }
    }

    /// Number of stored entries, including expired ones not yet collected.
    pub fn len(&self) -> usize {
        rw_read(&self.inner, SOURCE, "len").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tags currently registered for `key`.
    pub fn tags_for(&self, key: &str) -> BTreeSet<String> {
        rw_read(&self.inner, SOURCE, "tags_for")
            .index
            .tags_for_key(key)
    }

    fn expires_at(ttl: Option<u64>, now: OffsetDateTime) -> Option<OffsetDateTime> {
        let seconds = i64::try_from(ttl?).ok()?;
        now.checked_add(Duration::seconds(seconds))
    }
}

impl CacheStore for MemoryStore {
    fn has(&self, key: &str) -> Result<bool, StoreError> {
        let now = OffsetDateTime::now_utc();
        Ok(rw_read(&self.inner, SOURCE, "has")
            .entries
            .peek(key)
            .is_some_and(|stored| !stored.is_expired(now)))
    }

    fn get(&self, key: &str) -> Result<Option<CacheEntry>, StoreError> {
        let now = OffsetDateTime::now_utc();
        let mut inner = rw_write(&self.inner, SOURCE, "get");
        match inner.entries.get(key) {
            None => return Ok(None),
            Some(stored) if !stored.is_expired(now) => return Ok(Some(stored.entry.clone())),
            Some(_) => {}
        }
        debug!(cache = "memory", key, "dropping expired entry");
        inner.remove(key);
        Ok(None)
    }

    fn set(&self, entry: CacheEntry) -> Result<(), StoreError> {
        let expires_at = Self::expires_at(entry.ttl, OffsetDateTime::now_utc());
        let mut inner = rw_write(&self.inner, SOURCE, "set");
        let key = entry.key.clone();
        inner.index.register(&key, &entry.tags);
        let evicted = inner
            .entries
            .push(key.clone(), StoredEntry { entry, expires_at });
        if let Some((evicted_key, _)) = evicted
            && evicted_key != key
        {
            inner.index.unregister(&evicted_key);
            counter!(METRIC_EVICT_TOTAL).increment(1);
            debug!(cache = "memory", key = %evicted_key, "evicted entry due to capacity");
        }
        Ok(())
    }

    fn flush_by_tags(&self, tags: &BTreeSet<String>) -> Result<(), StoreError> {
        let mut inner = rw_write(&self.inner, SOURCE, "flush_by_tags");
        let affected = inner.index.take_tagged(tags);
        for key in &affected {
            inner.entries.pop(key.as_str());
        }
        counter!(METRIC_FLUSH_TOTAL, "scope" => "tags").increment(1);
        debug!(
            cache = "memory",
            tags = ?tags,
            removed = affected.len(),
            "flushed entries by tag"
        );
        Ok(())
    }

    fn flush(&self) -> Result<(), StoreError> {
        let mut inner = rw_write(&self.inner, SOURCE, "flush");
        inner.entries.clear();
        inner.index.clear();
        counter!(METRIC_FLUSH_TOTAL, "scope" => "all").increment(1);
        debug!(cache = "memory", "flushed all entries");
        Ok(())
    }
}
