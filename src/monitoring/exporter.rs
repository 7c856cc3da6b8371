//! Prometheus Export
//!
//! Mirrors buffer statistics into a private registry as gauges. Values are
//! refreshed from a [`BufferStats`] snapshot right before each scrape.

use prometheus::{Encoder, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

use super::health::HealthResponse;
use crate::buffer::BufferStats;
use crate::error::Result;

const NAMESPACE: &str = "chunkahead";

/// Prometheus gauges for the buffer and worker
pub struct MetricsExporter {
    registry: Registry,
    tier_used_bytes: IntGaugeVec,
    tier_capacity_bytes: IntGaugeVec,
    tier_entries: IntGaugeVec,
    tier_hits: IntGaugeVec,
    tier_evictions: IntGaugeVec,
    tier_rejections: IntGaugeVec,
    tier_promotions: IntGaugeVec,
    lookup_hits: IntGauge,
    lookup_misses: IntGauge,
    pending_work: IntGauge,
    worker_running: IntGauge,
    processed: IntGauge,
    failed: IntGauge,
    skipped: IntGauge,
    enqueued: IntGauge,
    throttled_updates: IntGauge,
    prediction_fallbacks: IntGauge,
    learned_switches: IntGauge,
}

impl MetricsExporter {
    /// Create and register every gauge
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let tier_gauge = |name: &str, help: &str| -> Result<IntGaugeVec> {
            let gauge = IntGaugeVec::new(Opts::new(name, help).namespace(NAMESPACE), &["tier"])?;
            registry.register(Box::new(gauge.clone()))?;
            Ok(gauge)
        };
        let gauge = |name: &str, help: &str| -> Result<IntGauge> {
            let gauge = IntGauge::with_opts(Opts::new(name, help).namespace(NAMESPACE))?;
            registry.register(Box::new(gauge.clone()))?;
            Ok(gauge)
        };

        Ok(Self {
            tier_used_bytes: tier_gauge("tier_used_bytes", "Bytes held by the tier")?,
            tier_capacity_bytes: tier_gauge("tier_capacity_bytes", "Byte budget of the tier")?,
            tier_entries: tier_gauge("tier_entries", "Chunks held by the tier")?,
            tier_hits: tier_gauge("tier_hits", "Lookups served by the tier")?,
            tier_evictions: tier_gauge("tier_evictions", "Chunks evicted from the tier")?,
            tier_rejections: tier_gauge("tier_rejections", "Chunks larger than the tier")?,
            tier_promotions: tier_gauge("tier_promotions", "Chunks moved up into the tier")?,
            lookup_hits: gauge("lookup_hits", "Lookups served from any tier")?,
            lookup_misses: gauge("lookup_misses", "Lookups no tier could serve")?,
            pending_work: gauge("pending_work", "Work items waiting for the worker")?,
            worker_running: gauge("worker_running", "1 while the worker drains the queue")?,
            processed: gauge("worker_processed", "Chunks processed and cached")?,
            failed: gauge("worker_failed", "Chunks the processor failed on")?,
            skipped: gauge("worker_skipped", "Work items already satisfied by the cache")?,
            enqueued: gauge("planner_enqueued", "Work items queued by planning passes")?,
            throttled_updates: gauge(
                "planner_throttled",
                "Position updates inside the throttle window",
            )?,
            prediction_fallbacks: gauge(
                "planner_prediction_fallbacks",
                "Planning passes ranked without content analysis",
            )?,
            learned_switches: gauge(
                "predictor_learned_switches",
                "Preset switches in the transition model",
            )?,
            registry,
        })
    }

    /// Copy `stats` and `health` into the gauges
    pub fn update(&self, stats: &BufferStats, health: &HealthResponse) {
        for tier in &stats.tiers {
            let label = [tier.tier.as_str()];
            self.tier_used_bytes
                .with_label_values(&label)
                .set(saturate(tier.used_bytes));
            self.tier_capacity_bytes
                .with_label_values(&label)
                .set(saturate(tier.capacity_bytes));
            self.tier_entries
                .with_label_values(&label)
                .set(saturate(tier.entries as u64));
            self.tier_hits
                .with_label_values(&label)
                .set(saturate(tier.counters.hits));
            self.tier_evictions
                .with_label_values(&label)
                .set(saturate(tier.counters.evictions));
            self.tier_rejections
                .with_label_values(&label)
                .set(saturate(tier.counters.rejections));
            self.tier_promotions
                .with_label_values(&label)
                .set(saturate(tier.counters.promotions));
        }

        let m = &stats.metrics;
        self.lookup_hits.set(saturate(m.lookup_hits));
        self.lookup_misses.set(saturate(m.lookup_misses));
        self.pending_work.set(saturate(stats.pending_work as u64));
        self.worker_running.set(i64::from(health.worker_running));
        self.processed.set(saturate(m.processed));
        self.failed.set(saturate(m.failed));
        self.skipped.set(saturate(m.skipped));
        self.enqueued.set(saturate(m.enqueued));
        self.throttled_updates.set(saturate(m.throttled_updates));
        self.prediction_fallbacks.set(saturate(m.prediction_fallbacks));
        self.learned_switches.set(saturate(stats.learned_switches));
    }

    /// Text exposition format
    pub fn encode(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    /// Content type of [`Self::encode`] output
    pub fn format_type(&self) -> &'static str {
        prometheus::TEXT_FORMAT
    }
}

impl std::fmt::Debug for MetricsExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsExporter").finish_non_exhaustive()
    }
}

fn saturate(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BufferManager, ChunkKey, TierLevel};
    use crate::config::BufferConfig;
    use crate::predict::Preset;
    use bytes::Bytes;

    #[test]
    fn test_export_reflects_stats() {
        let manager = BufferManager::new(BufferConfig::default()).unwrap();
        manager
            .insert(
                ChunkKey::new("t", 0, Preset::Adaptive, 1.0),
                Bytes::from_static(b"abcd"),
                TierLevel::Hot,
                1.0,
            )
            .unwrap();
        assert!(manager.get("t", 0, Preset::Adaptive).is_some());
        assert!(manager.get("t", 1, Preset::Adaptive).is_none());

        let exporter = MetricsExporter::new().unwrap();
        exporter.update(&manager.stats(), &manager.health());
        let text = exporter.encode().unwrap();

        assert!(text.contains("chunkahead_tier_used_bytes{tier=\"hot\"} 4"));
        assert!(text.contains("chunkahead_tier_entries{tier=\"cold\"} 0"));
        assert!(text.contains("chunkahead_worker_running 0"));
        assert!(text.contains("chunkahead_tier_hits{tier=\"hot\"} 1"));
        assert!(text.contains("chunkahead_lookup_misses 1"));
    }
}
