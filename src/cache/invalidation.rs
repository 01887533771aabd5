//! Event-driven invalidation.
//!
//! Merges queued [`CacheEvent`]s into an [`InvalidationPlan`] and executes it
//! against the store.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use metrics::histogram;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::config::CacheConfig;
use super::context::RequestContext;
use super::error::CacheError;
use super::events::{CacheEvent, EventKind, EventQueue};
use super::store::CacheStore;
use super::tags::record_tag;

pub(crate) const METRIC_CONSUME_MS: &str = "scopecache_consume_ms";

/// Tags to flush, or a full flush, derived from a batch of events.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct InvalidationPlan {
    pub tags: BTreeSet<String>,
    pub flush_all: bool,
}

impl fmt::Display for InvalidationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "InvalidationPlan {{ tags: {}, flush_all: {} }}",
            self.tags.len(),
            self.flush_all
        )
    }
}

impl InvalidationPlan {
    /// Merge events into a plan, ignoring duplicate event ids.
    pub fn from_events(events: &[CacheEvent]) -> Self {
        let mut plan = Self::default();
        let mut seen_ids = HashSet::new();

        for event in events.iter().filter(|e| seen_ids.insert(e.id)) {
            match &event.kind {
                EventKind::RecordChanged { table, uid } => {
                    plan.tags.insert(record_tag(table, *uid));
                }
                EventKind::TagsInvalidated(tags) => plan.tags.extend(tags.iter().cloned()),
                EventKind::FlushAll => plan.flush_all = true,
            }
        }

        plan
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty() && !self.flush_all
    }
}

/// Drains the event queue and flushes the affected entries.
pub struct Invalidator<S> {
    store: Arc<S>,
    queue: Arc<EventQueue>,
    batch_limit: usize,
}

impl<S: CacheStore> Invalidator<S> {
    pub fn new(store: Arc<S>, queue: Arc<EventQueue>, config: &CacheConfig) -> Self {
        Self {
            store,
            queue,
            batch_limit: config.consume_batch_limit.max(1),
        }
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    /// Handle one batch of events. Returns `false` when the queue was empty.
    ///
    /// A full flush runs at most once per request lifecycle; later flush-all
    /// events in the same context fall back to their tags. When the store
    /// fails, the batch goes back to the front of the queue.
    pub fn consume(&self, ctx: &RequestContext) -> Result<bool, CacheError> {
        let started_at = Instant::now();
        let events = self.queue.drain(self.batch_limit);
        if events.is_empty() {
            return Ok(false);
        }

        let event_count = events.len();
        let event_ids: Vec<Uuid> = events.iter().map(|e| e.id).collect();
        let plan = InvalidationPlan::from_events(&events);

        info!(
            event_count,
            event_ids = ?event_ids,
            plan = %plan,
            "Cache invalidation starting"
        );

        let flushed_all = match self.apply(&plan, ctx) {
            Ok(flushed_all) => flushed_all,
            Err(err) => {
                warn!(
                    event_count,
                    error = %err,
                    "Cache invalidation failed; batch requeued"
                );
                self.queue.requeue(events);
                return Err(err);
            }
        };

        info!(
            event_count,
            tags = plan.tags.len(),
            flushed_all,
            "Cache invalidation complete"
        );
        histogram!(METRIC_CONSUME_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);

        Ok(true)
    }

    fn apply(&self, plan: &InvalidationPlan, ctx: &RequestContext) -> Result<bool, CacheError> {
        if plan.flush_all {
            if ctx.flushed_all() {
                debug!(cache = "invalidation", "full flush already ran in this lifecycle");
            } else {
                self.store.flush()?;
                ctx.mark_flushed_all();
                return Ok(true);
            }
        }

        if !plan.tags.is_empty() {
            self.store.flush_by_tags(&plan.tags)?;
        }
        Ok(false)
    }

    /// Consume batches until the queue is empty. Returns the number of batches.
    pub fn consume_all(&self, ctx: &RequestContext) -> Result<usize, CacheError> {
        let mut batches = 0;
        while self.consume(ctx)? {
            batches += 1;
        }
        Ok(batches)
    }
}
