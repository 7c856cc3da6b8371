//! Prefetch Work Queue
//!
//! Unbounded priority queue of chunk keys awaiting processing. Items pop
//! Hot before Warm before Cold, FIFO within a priority. Each key is pending
//! at most once: re-enqueueing at a higher priority upgrades it and the
//! superseded heap item is skipped when it surfaces.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::trace;

use super::entry::ChunkKey;
use super::policy::WorkPriority;

/// One pending chunk
#[derive(Debug, Clone)]
pub struct WorkItem {
    key: ChunkKey,
    priority: WorkPriority,
    probability: f64,
    seq: u64,
}

impl WorkItem {
    pub fn key(&self) -> &ChunkKey {
        &self.key
    }

    /// Target tier
    pub fn priority(&self) -> WorkPriority {
        self.priority
    }

    /// Prediction confidence carried into the cache entry
    pub fn probability(&self) -> f64 {
        self.probability
    }
}

impl PartialEq for WorkItem {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for WorkItem {}

impl Ord for WorkItem {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: hotter first, then older sequence numbers first
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for WorkItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Result of [`WorkQueue::enqueue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Newly pending
    Queued,
    /// Was pending at a lower priority
    Upgraded,
    /// Already pending at the same or a higher priority
    Duplicate,
}

#[derive(Default)]
struct QueueState {
    heap: BinaryHeap<WorkItem>,
    pending: HashMap<ChunkKey, WorkPriority>,
    next_seq: u64,
}

/// Multi-producer, single-consumer prefetch queue
#[derive(Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    // Popped but not yet reported via `finish`
    in_progress: AtomicUsize,
}

impl WorkQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `key` for processing into `priority`'s tier
    pub fn enqueue(
        &self,
        key: ChunkKey,
        priority: WorkPriority,
        probability: f64,
    ) -> EnqueueOutcome {
        let mut state = self.state.lock();

        let outcome = match state.pending.get(&key) {
            Some(&existing) if existing >= priority => return EnqueueOutcome::Duplicate,
            Some(_) => EnqueueOutcome::Upgraded,
            None => EnqueueOutcome::Queued,
        };

        let seq = state.next_seq;
        state.next_seq += 1;
        state.pending.insert(key.clone(), priority);
        trace!(%key, %priority, ?outcome, "Work enqueued");
        state.heap.push(WorkItem {
            key,
            priority,
            probability,
            seq,
        });
        drop(state);

        self.notify.notify_one();
        outcome
    }

    /// Pop the most urgent live item, if any
    pub fn try_pop(&self) -> Option<WorkItem> {
        let mut state = self.state.lock();
        while let Some(item) = state.heap.pop() {
            if state.pending.get(&item.key) == Some(&item.priority) {
                state.pending.remove(&item.key);
                self.in_progress.fetch_add(1, AtomicOrdering::AcqRel);
                return Some(item);
            }
            // Superseded by an upgrade or dropped
        }
        None
    }

    /// Wait for the next item
    pub async fn next(&self) -> WorkItem {
        loop {
            if let Some(item) = self.try_pop() {
                return item;
            }
            self.notify.notified().await;
        }
    }

    /// Mark a popped item as done
    pub fn finish(&self) {
        let _ = self
            .in_progress
            .fetch_update(AtomicOrdering::AcqRel, AtomicOrdering::Acquire, |n| n.checked_sub(1));
    }

    /// Items popped and not yet finished
    pub fn in_progress(&self) -> usize {
        self.in_progress.load(AtomicOrdering::Acquire)
    }

    /// Nothing pending and nothing in progress
    pub fn is_idle(&self) -> bool {
        let state = self.state.lock();
        state.pending.is_empty() && self.in_progress() == 0
    }

    /// Drop every pending item for `track_id`. Returns how many were dropped.
    pub fn drop_track(&self, track_id: &str) -> usize {
        let mut state = self.state.lock();
        let before = state.pending.len();
        state.pending.retain(|key, _| key.track_id() != track_id);
        state.heap.retain(|item| item.key.track_id() != track_id);
        before - state.pending.len()
    }

    /// Pending priority of `key`
    pub fn pending_priority(&self, key: &ChunkKey) -> Option<WorkPriority> {
        self.state.lock().pending.get(key).copied()
    }

    /// Number of live pending items
    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Whether nothing is pending
    pub fn is_empty(&self) -> bool {
        self.state.lock().pending.is_empty()
    }

    /// Drop everything. Returns how many live items were pending.
    pub fn clear(&self) -> usize {
        let mut state = self.state.lock();
        let dropped = state.pending.len();
        state.pending.clear();
        state.heap.clear();
        dropped
    }
}

impl std::fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkQueue")
            .field("pending", &self.len())
            .field("in_progress", &self.in_progress())
            .finish()
    }
}
