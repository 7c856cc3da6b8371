//! Chunkahead - Predictive Pre-Buffering for Processed Audio
//!
//! Keeps processed audio chunks ready for a streaming player by predicting
//! which `(track, chunk, preset, intensity)` combinations will be requested
//! next and rendering them ahead of time into a fixed memory budget.
//!
//! # Architecture
//!
//! ```text
//! player ──position/preset──▶ BufferManager ──▶ BranchPredictor
//!                                 │                  │
//!                                 │      AudioContentAnalyzer (SampleSource)
//!                                 ▼
//!                            WorkQueue ──▶ BufferWorker ──▶ ChunkProcessor
//!                                 │                              │
//!   Check / Get ◀── Hot │ Warm │ Cold tiers ◀────────────────────┘
//! ```
//!
//! Lookups never process audio. On a miss the caller renders synchronously
//! and may hand the result back with [`BufferManager::insert`].
//!
//! # Modules
//!
//! - [`buffer`] - Tiers, work queue, manager and background worker
//! - [`predict`] - Presets, content analysis and the branch predictor
//! - [`processor`] - Chunk processor and sample source interfaces
//! - [`monitoring`] - Health reporting and Prometheus export
//! - [`config`] - Tunables and YAML loading
//! - [`error`] - Error types

pub mod buffer;
pub mod config;
pub mod error;
pub mod monitoring;
pub mod predict;
pub mod processor;

// Re-export commonly used types
pub use buffer::{
    BufferManager, BufferStats, BufferWorker, CachedChunk, ChunkKey, TierLevel, UpdateOutcome,
    WorkerState,
};
pub use config::BufferConfig;
pub use error::{Error, Result};
pub use monitoring::{HealthResponse, HealthStatus, MetricsExporter};
pub use predict::{AudioContentAnalyzer, AudioFeatures, BranchPredictor, Prediction, Preset};
pub use processor::{ChunkProcessor, DecodedChunk, SampleSource};
