//! Predictive Chunk Buffer
//!
//! Three byte-budgeted tiers fed by a priority queue and a background worker.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         BufferManager                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  update_position ──▶ BranchPredictor ──▶ PrefetchPolicy         │
//! │                                              │                   │
//! │            cached? refresh / promote ◀──────┤                   │
//! │                                              ▼                   │
//! │                                         WorkQueue                │
//! │                                   (Hot > Warm > Cold, FIFO)      │
//! ├──────────────────────────────────────────────┼──────────────────┤
//! │  ┌──────────┐  ┌──────────┐  ┌──────────┐    │                   │
//! │  │   Hot    │  │   Warm   │  │   Cold   │◀── BufferWorker        │
//! │  │  18 MB   │  │  36 MB   │  │  45 MB   │    (ChunkProcessor)    │
//! │  └──────────┘  └──────────┘  └──────────┘                        │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Tiers
//!
//! - **Hot**: current and next chunk for the active preset, plus the
//!   current chunk for likely next presets
//! - **Warm**: one to two chunks ahead for likely next presets
//! - **Cold**: three to ten chunks ahead for the active preset
//!
//! A chunk lives in exactly one tier. Moving between tiers is a remove
//! followed by an insert under the manager's placement lock.

mod entry;
mod manager;
mod metrics;
mod policy;
mod queue;
mod tier;
mod worker;

pub use entry::{CacheEntry, ChunkKey, EntryInfo};
pub use manager::{
    BufferManager, BufferStats, CachedChunk, Coverage, PlanSummary, PredictionReport,
    SessionSnapshot, UpdateOutcome, DEFAULT_INTENSITY,
};
pub use metrics::{CacheMetrics, MetricsSnapshot, TierCounterSnapshot, TierCounters};
pub use policy::{eviction_order, PlannedChunk, PrefetchPolicy, WorkPriority};
pub use queue::{EnqueueOutcome, WorkItem, WorkQueue};
pub use tier::{CacheTier, TierLevel, TierStats};
pub use worker::{BufferWorker, WorkerState};
