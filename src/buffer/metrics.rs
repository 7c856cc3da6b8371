//! Buffer Metrics Collection
//!
//! Lock-free counters for tier traffic, planning passes and the background
//! worker. Counters only increase; ratios are derived on read.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters owned by a single cache tier
#[derive(Debug, Default)]
pub struct TierCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    insertions: AtomicU64,
    evictions: AtomicU64,
    rejections: AtomicU64,
    promotions: AtomicU64,
}

impl TierCounters {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_insertion(&self) {
        self.insertions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evictions(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_rejection(&self) {
        self.rejections.fetch_add(1, Ordering::Relaxed);
    }

    /// An entry moved into this tier from a colder one
    pub fn record_promotion(&self) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn hit_ratio(&self) -> f64 {
        ratio(self.hits(), self.misses())
    }

    /// Point-in-time copy
    pub fn snapshot(&self) -> TierCounterSnapshot {
        TierCounterSnapshot {
            hits: self.hits(),
            misses: self.misses(),
            insertions: self.insertions.load(Ordering::Relaxed),
            evictions: self.evictions(),
            rejections: self.rejections.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            hit_ratio: self.hit_ratio(),
        }
    }
}

/// Serializable copy of [`TierCounters`]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TierCounterSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub insertions: u64,
    pub evictions: u64,
    pub rejections: u64,
    pub promotions: u64,
    pub hit_ratio: f64,
}

/// Planner and worker counters shared by the manager and the worker
#[derive(Debug, Default)]
pub struct CacheMetrics {
    // Planner
    position_updates: AtomicU64,
    throttled_updates: AtomicU64,
    enqueued: AtomicU64,
    prediction_fallbacks: AtomicU64,

    // Lookups
    lookup_hits: AtomicU64,
    lookup_misses: AtomicU64,

    // Worker
    processed: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    processed_bytes: AtomicU64,
}

impl CacheMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_position_update(&self) {
        self.position_updates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_throttled(&self) {
        self.throttled_updates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_enqueued(&self, count: u64) {
        self.enqueued.fetch_add(count, Ordering::Relaxed);
    }

    /// Content-blended prediction was unavailable
    pub fn record_prediction_fallback(&self) {
        self.prediction_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    /// One `get` against the buffer as a whole
    pub fn record_lookup(&self, hit: bool) {
        let counter = if hit {
            &self.lookup_hits
        } else {
            &self.lookup_misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_processed(&self, bytes: u64) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.processed_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Work item already satisfied by a cached entry
    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    pub fn prediction_fallbacks(&self) -> u64 {
        self.prediction_fallbacks.load(Ordering::Relaxed)
    }

    pub fn lookup_hits(&self) -> u64 {
        self.lookup_hits.load(Ordering::Relaxed)
    }

    pub fn lookup_misses(&self) -> u64 {
        self.lookup_misses.load(Ordering::Relaxed)
    }

    /// Fraction of lookups served from any tier
    pub fn lookup_hit_ratio(&self) -> f64 {
        ratio(self.lookup_hits(), self.lookup_misses())
    }

    /// Fraction of worker attempts that failed
    pub fn failure_ratio(&self) -> f64 {
        let failed = self.failed();
        let total = failed + self.processed();
        if total == 0 {
            0.0
        } else {
            failed as f64 / total as f64
        }
    }

    /// Point-in-time copy
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            position_updates: self.position_updates.load(Ordering::Relaxed),
            throttled_updates: self.throttled_updates.load(Ordering::Relaxed),
            enqueued: self.enqueued(),
            prediction_fallbacks: self.prediction_fallbacks(),
            lookup_hits: self.lookup_hits(),
            lookup_misses: self.lookup_misses(),
            lookup_hit_ratio: self.lookup_hit_ratio(),
            processed: self.processed(),
            failed: self.failed(),
            skipped: self.skipped(),
            processed_bytes: self.processed_bytes.load(Ordering::Relaxed),
        }
    }
}

/// Serializable copy of [`CacheMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub position_updates: u64,
    pub throttled_updates: u64,
    pub enqueued: u64,
    pub prediction_fallbacks: u64,
    pub lookup_hits: u64,
    pub lookup_misses: u64,
    pub lookup_hit_ratio: f64,
    pub processed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub processed_bytes: u64,
}

fn ratio(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_hit_ratio() {
        let counters = TierCounters::new();
        assert_eq!(counters.hit_ratio(), 0.0);

        counters.record_hit();
        counters.record_hit();
        counters.record_hit();
        counters.record_miss();
        assert!((counters.hit_ratio() - 0.75).abs() < 1e-9);

        counters.record_evictions(4);
        let snap = counters.snapshot();
        assert_eq!(snap.hits, 3);
        assert_eq!(snap.misses, 1);
        assert_eq!(snap.evictions, 4);
    }

    #[test]
    fn test_lookup_counters() {
        let metrics = CacheMetrics::new();
        metrics.record_lookup(true);
        metrics.record_lookup(false);
        metrics.record_lookup(false);
        metrics.record_lookup(true);

        let snap = metrics.snapshot();
        assert_eq!(snap.lookup_hits, 2);
        assert_eq!(snap.lookup_misses, 2);
        assert!((snap.lookup_hit_ratio - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_worker_counters() {
        let metrics = CacheMetrics::new();
        metrics.record_processed(100);
        metrics.record_processed(50);
        metrics.record_failed();
        metrics.record_skipped();

        let snap = metrics.snapshot();
        assert_eq!(snap.processed, 2);
        assert_eq!(snap.processed_bytes, 150);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.skipped, 1);
        assert!((metrics.failure_ratio() - 1.0 / 3.0).abs() < 1e-9);
    }
}
