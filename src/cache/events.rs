//! Invalidation events.
//!
//! Content writes publish events here; the [`Invalidator`](super::Invalidator)
//! drains them and flushes the affected entries.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

use super::lock::mutex_lock;

const SOURCE: &str = "cache::events";

/// Monotonic epoch for ordering events within this process.
pub type Epoch = u64;

#[derive(Debug, Clone)]
pub struct CacheEvent {
    /// Unique identifier for idempotency (UUIDv4).
    pub id: Uuid,
    pub epoch: Epoch,
    pub kind: EventKind,
    pub timestamp: OffsetDateTime,
}

impl CacheEvent {
    pub fn new(kind: EventKind, epoch: Epoch) -> Self {
        Self {
            id: Uuid::new_v4(),
            epoch,
            kind,
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}

/// Content changes that invalidate cached entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// A single record was created, updated or deleted.
    RecordChanged { table: String, uid: u64 },
    /// Arbitrary tags were invalidated by the caller.
    TagsInvalidated(Vec<String>),
    /// Everything must go, e.g. after a deployment.
    FlushAll,
}

impl EventKind {
    pub fn record_changed(table: impl Into<String>, uid: u64) -> Self {
        Self::RecordChanged {
            table: table.into(),
            uid,
        }
    }

    pub fn tags<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::TagsInvalidated(tags.into_iter().map(Into::into).collect())
    }
}

/// In-memory event queue.
///
/// Contention is expected to be low, so a plain mutex guards the queue.
pub struct EventQueue {
    queue: Mutex<VecDeque<CacheEvent>>,
    epoch_counter: AtomicU64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            epoch_counter: AtomicU64::new(0),
        }
    }

    pub fn next_epoch(&self) -> Epoch {
        self.epoch_counter.fetch_add(1, Ordering::SeqCst)
    }

    pub fn publish(&self, kind: EventKind) {
        let event = CacheEvent::new(kind, self.next_epoch());

        info!(
            event_id = %event.id,
            event_epoch = event.epoch,
            event_kind = ?event.kind,
            "Cache event enqueued"
        );

        mutex_lock(&self.queue, SOURCE, "publish").push_back(event);
    }

    /// Drain up to `limit` events in FIFO order.
    pub fn drain(&self, limit: usize) -> Vec<CacheEvent> {
        let mut queue = mutex_lock(&self.queue, SOURCE, "drain");
        let count = limit.min(queue.len());
        queue.drain(..count).collect()
    }

    /// Put a drained batch back at the front, keeping its order.
    pub fn requeue(&self, events: Vec<CacheEvent>) {
        let mut queue = mutex_lock(&self.queue, SOURCE, "requeue");
        for event in events.into_iter().rev() {
            queue.push_front(event);
        }
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.queue, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        mutex_lock(&self.queue, SOURCE, "clear").clear();
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}
