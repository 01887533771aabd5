//! Cache diagnostics.
//!
//! A [`MetricsTracker`] observes lookups and scope execution. It never influences
//! control flow: the engine behaves identically with or without one attached.

use std::collections::BTreeSet;
use std::sync::Mutex;
use std::time::Duration;

use metrics::{counter, histogram};

use super::lock::mutex_lock;
use super::scope::Scope;

const SOURCE: &str = "cache::metrics";

pub(crate) const METRIC_HIT_TOTAL: &str = "scopecache_hit_total";
pub(crate) const METRIC_MISS_TOTAL: &str = "scopecache_miss_total";
pub(crate) const METRIC_WRITE_TOTAL: &str = "scopecache_write_total";
pub(crate) const METRIC_SCOPE_MS: &str = "scopecache_scope_ms";

/// How a producing computation ended.
#[derive(Debug, Clone, Copy)]
pub enum ScopeOutcome<'a> {
    Completed(&'a Scope),
    Failed,
}

/// Observer for cache activity.
pub trait MetricsTracker: Send + Sync {
    /// Called once the producer has finished and its scope was closed, with the
    /// measured run time. Observes the run; it does not drive it.
    fn record_scope(&self, label: &str, key: &str, elapsed: Duration, outcome: ScopeOutcome<'_>);

    /// Called when a lookup was served from the store.
    fn trigger_hit(&self, label: &str, key: &str, tags: &BTreeSet<String>);

    fn trigger_miss(&self, _label: &str, _key: &str) {}

    fn trigger_write(&self, _label: &str, _key: &str, _ttl: Option<u64>) {}
}

/// Forwards cache activity to the global `metrics` recorder.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecorderMetrics;

impl MetricsTracker for RecorderMetrics {
    fn record_scope(&self, _label: &str, _key: &str, elapsed: Duration, outcome: ScopeOutcome<'_>) {
        let outcome = match outcome {
            ScopeOutcome::Completed(scope) if scope.is_enabled() => "cacheable",
            ScopeOutcome::Completed(_) => "uncacheable",
            ScopeOutcome::Failed => "failed",
        };
        histogram!(METRIC_SCOPE_MS, "outcome" => outcome).record(elapsed.as_secs_f64() * 1000.0);
    }

    fn trigger_hit(&self, _label: &str, _key: &str, _tags: &BTreeSet<String>) {
        counter!(METRIC_HIT_TOTAL).increment(1);
    }

    fn trigger_miss(&self, _label: &str, _key: &str) {
        counter!(METRIC_MISS_TOTAL).increment(1);
    }

    fn trigger_write(&self, _label: &str, _key: &str, _ttl: Option<u64>) {
        counter!(METRIC_WRITE_TOTAL).increment(1);
    }
}

/// One observation collected by [`ScopeLog`].
#[derive(Debug, Clone, PartialEq)]
pub enum ScopeRecord {
    Scope {
        label: String,
        key: String,
        elapsed: Duration,
        tags: BTreeSet<String>,
        ttl: Option<u64>,
        enabled: bool,
    },
    Failed {
        label: String,
        key: String,
        elapsed: Duration,
    },
    Hit {
        label: String,
        key: String,
        tags: BTreeSet<String>,
    },
}

/// In-memory timeline of cache activity, for debug output of a single request.
#[derive(Debug, Default)]
pub struct ScopeLog {
    records: Mutex<Vec<ScopeRecord>>,
}

impl ScopeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ScopeRecord> {
        mutex_lock(&self.records, SOURCE, "records").clone()
    }

    pub fn hit_count(&self) -> usize {
        mutex_lock(&self.records, SOURCE, "hit_count")
            .iter()
            .filter(|record| matches!(record, ScopeRecord::Hit { .. }))
            .count()
    }

    /// Total time spent in producers, nested time included.
    pub fn total_elapsed(&self) -> Duration {
        mutex_lock(&self.records, SOURCE, "total_elapsed")
            .iter()
            .map(|record| match record {
                ScopeRecord::Scope { elapsed, .. } | ScopeRecord::Failed { elapsed, .. } => {
                    *elapsed
                }
                ScopeRecord::Hit { .. } => Duration::ZERO,
            })
            .sum()
    }

    pub fn clear(&self) {
        mutex_lock(&self.records, SOURCE, "clear").clear();
    }

    fn push(&self, record: ScopeRecord) {
        mutex_lock(&self.records, SOURCE, "push").push(record);
    }
}

impl MetricsTracker for ScopeLog {
    fn record_scope(&self, label: &str, key: &str, elapsed: Duration, outcome: ScopeOutcome<'_>) {
        let record = match outcome {
            ScopeOutcome::Completed(scope) => ScopeRecord::Scope {
                label: label.to_string(),
                key: key.to_string(),
                elapsed,
                tags: scope.tags().clone(),
                ttl: scope.ttl(),
                enabled: scope.is_enabled(),
            },
            ScopeOutcome::Failed => ScopeRecord::Failed {
                label: label.to_string(),
                key: key.to_string(),
                elapsed,
            },
        };
        self.push(record);
    }

    fn trigger_hit(&self, label: &str, key: &str, tags: &BTreeSet<String>) {
        self.push(ScopeRecord::Hit {
            label: label.to_string(),
            key: key.to_string(),
            tags: tags.clone(),
        });
    }
}
