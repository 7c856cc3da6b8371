//! Chunkahead Integration Tests
//!
//! Exercises the buffer end to end through the public API:
//! - Planning and background processing into the tiers
//! - Learned preset switches steering what gets pre-buffered
//! - Content-aware prediction with a sample source
//! - Failure handling and worker shutdown
//! - Management surface (stats, clearing, health, export)

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use bytes::Bytes;

use chunkahead::buffer::UpdateOutcome;
use chunkahead::processor::{SyntheticProcessor, SyntheticSource};
use chunkahead::{
    BufferConfig, BufferManager, BufferWorker, ChunkKey, ChunkProcessor, Error, HealthStatus,
    MetricsExporter, Preset, TierLevel, WorkerState,
};

const IDLE_TIMEOUT: Duration = Duration::from_secs(5);

fn setup(
    processor: SyntheticProcessor,
) -> (Arc<BufferManager>, Arc<SyntheticProcessor>, BufferWorker) {
    let manager = Arc::new(BufferManager::new(BufferConfig::default()).unwrap());
    let processor = Arc::new(processor);
    let worker = BufferWorker::new(
        Arc::clone(&manager),
        Arc::clone(&processor) as Arc<dyn ChunkProcessor>,
    );
    (manager, processor, worker)
}

// =============================================================================
// Playback Scenarios
// =============================================================================

mod playback_tests {
    use super::*;

    #[tokio::test]
    async fn test_learned_switch_is_prebuffered() {
        let (manager, _processor, worker) = setup(SyntheticProcessor::new(1024));
        for _ in 0..5 {
            manager.predictor().learn(Preset::Adaptive, Preset::Punchy);
        }

        worker.start().unwrap();
        let outcome = manager
            .update_position("T", 0.0, Preset::Adaptive, 1.0)
            .unwrap();
        assert_matches!(outcome, UpdateOutcome::Planned(ref summary) if summary.enqueued > 0);
        assert!(worker.wait_idle(IDLE_TIMEOUT).await);

        assert_eq!(manager.check("T", 0, Preset::Adaptive), Some(TierLevel::Hot));
        assert_eq!(manager.check("T", 1, Preset::Adaptive), Some(TierLevel::Hot));
        assert_eq!(manager.check("T", 0, Preset::Punchy), Some(TierLevel::Hot));
        assert_eq!(manager.check("T", 1, Preset::Punchy), Some(TierLevel::Warm));

        // Listener switches to the predicted preset one chunk later
        manager
            .update_position("T", 30.0, Preset::Punchy, 1.0)
            .unwrap();
        assert!(worker.wait_idle(IDLE_TIMEOUT).await);

        assert_matches!(
            manager.check("T", 1, Preset::Punchy),
            Some(TierLevel::Hot) | Some(TierLevel::Warm)
        );
        let chunk = manager.get("T", 1, Preset::Punchy).unwrap();
        assert_eq!(chunk.data.len(), 1024);

        worker.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_repeated_updates_are_idempotent() {
        let (manager, processor, worker) = setup(SyntheticProcessor::new(256));
        worker.start().unwrap();

        manager.update_position("T", 0.0, Preset::Warm, 0.5).unwrap();
        assert!(worker.wait_idle(IDLE_TIMEOUT).await);
        let processed = processor.calls();
        let entries = manager.stats().entries;

        // Past the throttle window, same position: everything is already cached
        tokio::time::sleep(Duration::from_millis(150)).await;
        let outcome = manager.update_position("T", 5.0, Preset::Warm, 0.5).unwrap();
        assert_matches!(outcome, UpdateOutcome::Planned(ref summary) if summary.enqueued == 0);
        assert!(worker.wait_idle(IDLE_TIMEOUT).await);

        assert_eq!(processor.calls(), processed);
        assert_eq!(manager.stats().entries, entries);

        worker.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_rapid_updates_are_throttled() {
        let (manager, _processor, _worker) = setup(SyntheticProcessor::new(16));

        manager.update_position("T", 0.0, Preset::Adaptive, 1.0).unwrap();
        let outcome = manager.update_position("T", 1.0, Preset::Adaptive, 1.0).unwrap();
        assert!(outcome.is_throttled());

        // A preset change is never throttled
        let outcome = manager.update_position("T", 2.0, Preset::Bright, 1.0).unwrap();
        assert!(!outcome.is_throttled());
        assert_eq!(manager.stats().learned_switches, 1);
    }

    #[tokio::test]
    async fn test_track_change_drops_stale_work() {
        let (manager, _processor, worker) = setup(SyntheticProcessor::new(16));

        manager.update_position("A", 0.0, Preset::Adaptive, 1.0).unwrap();
        assert!(manager.pending_work() > 0);

        manager.update_position("B", 0.0, Preset::Adaptive, 1.0).unwrap();
        worker.start().unwrap();
        assert!(worker.wait_idle(IDLE_TIMEOUT).await);
        worker.stop().await.unwrap();

        assert!(manager.entries_for_track("A").is_empty());
        assert!(!manager.entries_for_track("B").is_empty());
        assert_eq!(manager.session().unwrap().track_id, "B");
    }

    #[tokio::test]
    async fn test_end_of_track_is_not_planned() {
        let source = SyntheticSource::default().with_track_length("short", 3);
        let manager = Arc::new(
            BufferManager::new(BufferConfig::default())
                .unwrap()
                .with_sample_source(Arc::new(source)),
        );
        let worker = BufferWorker::new(Arc::clone(&manager), Arc::new(SyntheticProcessor::new(16)));

        manager.update_position("short", 30.0, Preset::Adaptive, 1.0).unwrap();
        worker.start().unwrap();
        assert!(worker.wait_idle(IDLE_TIMEOUT).await);
        worker.stop().await.unwrap();

        assert!(manager
            .entries_for_track("short")
            .iter()
            .all(|entry| entry.chunk_index < 3));
        assert_eq!(manager.check("short", 2, Preset::Adaptive), Some(TierLevel::Hot));
    }
}

// =============================================================================
// Content-Aware Prediction
// =============================================================================

mod prediction_tests {
    use super::*;

    #[tokio::test]
    async fn test_sample_source_blends_content() {
        let manager = BufferManager::new(BufferConfig::default())
            .unwrap()
            .with_sample_source(Arc::new(SyntheticSource::default()));

        let outcome = manager.update_position("T", 0.0, Preset::Adaptive, 1.0).unwrap();
        assert_matches!(outcome, UpdateOutcome::Planned(ref summary) if summary.content_blended);

        let report = manager.predictions(3).unwrap();
        assert_eq!(report.preset, Preset::Adaptive);
        assert!(report.blended.is_some());
        assert_eq!(manager.metrics().prediction_fallbacks(), 0);
    }

    #[tokio::test]
    async fn test_broken_source_falls_back_to_history() {
        let source = SyntheticSource::default().with_broken_track("T");
        let manager = BufferManager::new(BufferConfig::default())
            .unwrap()
            .with_sample_source(Arc::new(source));
        for _ in 0..3 {
            manager.predictor().learn(Preset::Adaptive, Preset::Gentle);
        }

        let outcome = manager.update_position("T", 0.0, Preset::Adaptive, 1.0).unwrap();
        let summary = match outcome {
            UpdateOutcome::Planned(summary) => summary,
            UpdateOutcome::Throttled => panic!("first update must plan"),
        };
        assert!(!summary.content_blended);
        assert_eq!(summary.predictions[0].preset, Preset::Gentle);
        assert_eq!(manager.metrics().prediction_fallbacks(), 1);
    }
}

// =============================================================================
// Failure Handling
// =============================================================================

mod failure_tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_updates_change_nothing() {
        let (manager, _processor, _worker) = setup(SyntheticProcessor::new(16));

        assert_matches!(
            manager.update_position("", 0.0, Preset::Adaptive, 1.0),
            Err(Error::EmptyTrackId)
        );
        assert_matches!(
            manager.update_position("T", -1.0, Preset::Adaptive, 1.0),
            Err(Error::InvalidPosition(_))
        );
        assert_matches!(
            manager.update_position("T", f64::NAN, Preset::Adaptive, 1.0),
            Err(Error::InvalidPosition(_))
        );
        assert_matches!(
            manager.update_position("T", 0.0, Preset::Adaptive, 1.5),
            Err(Error::InvalidIntensity(_))
        );
        assert_matches!(
            manager.update_position_named("T", 0.0, "loud", 1.0),
            Err(Error::UnknownPreset(_))
        );

        assert!(manager.session().is_none());
        assert_eq!(manager.pending_work(), 0);
        assert_eq!(manager.check("", 0, Preset::Adaptive), None);
    }

    #[tokio::test]
    async fn test_processor_failure_is_isolated() {
        let (manager, _processor, worker) = setup(SyntheticProcessor::new(32).failing_on(1));
        worker.start().unwrap();

        manager.update_position("T", 0.0, Preset::Adaptive, 1.0).unwrap();
        assert!(worker.wait_idle(IDLE_TIMEOUT).await);

        assert_eq!(manager.check("T", 0, Preset::Adaptive), Some(TierLevel::Hot));
        assert_eq!(manager.check("T", 1, Preset::Adaptive), None);
        assert_eq!(manager.check("T", 3, Preset::Adaptive), Some(TierLevel::Cold));
        assert!(manager.metrics().failed() >= 1);
        assert!(worker.is_running());

        let health = manager.health();
        assert!(health.last_failure.is_some());
        assert!(health.last_success.is_some());

        worker.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_is_safe_mid_drain() {
        let (manager, processor, worker) =
            setup(SyntheticProcessor::new(16).with_latency(Duration::from_millis(20)));

        manager.update_position("T", 0.0, Preset::Adaptive, 1.0).unwrap();
        let queued = manager.pending_work() as u64;
        worker.start().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        worker.stop().await.unwrap();

        assert_eq!(worker.state(), WorkerState::Stopped);
        let processed = processor.calls();
        assert!(processed < queued);
        assert_eq!(manager.pending_work() as u64, queued - processed);

        // Nothing is processed while stopped
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(processor.calls(), processed);

        // Restart resumes from where it stopped
        worker.start().unwrap();
        assert!(worker.wait_idle(IDLE_TIMEOUT).await);
        worker.stop().await.unwrap();
        assert_eq!(processor.calls(), queued);
    }

    #[tokio::test]
    async fn test_oversized_insert_is_rejected() {
        let config = BufferConfig {
            hot_capacity_bytes: 8,
            ..BufferConfig::default()
        };
        let manager = BufferManager::new(config).unwrap();
        let key = ChunkKey::new("T", 0, Preset::Adaptive, 1.0);

        manager
            .insert(key.clone(), Bytes::from_static(b"abc"), TierLevel::Cold, 0.5)
            .unwrap();
        let result = manager.insert(key.clone(), Bytes::from(vec![0u8; 9]), TierLevel::Hot, 1.0);

        assert_matches!(result, Err(Error::Capacity { size: 9, capacity: 8, .. }));
        assert_eq!(manager.check_key(&key), Some(TierLevel::Cold));
    }
}

// =============================================================================
// Management Surface
// =============================================================================

mod management_tests {
    use super::*;

    #[tokio::test]
    async fn test_stats_and_clear() {
        let (manager, _processor, worker) = setup(SyntheticProcessor::new(100));
        worker.start().unwrap();
        manager.update_position("T", 0.0, Preset::Adaptive, 1.0).unwrap();
        assert!(worker.wait_idle(IDLE_TIMEOUT).await);
        worker.stop().await.unwrap();

        let stats = manager.stats();
        assert_eq!(stats.tiers.len(), 3);
        assert_eq!(stats.entries, stats.tiers.iter().map(|t| t.entries).sum::<usize>());
        assert_eq!(stats.used_bytes, stats.entries as u64 * 100);
        assert!(stats.tiers.iter().all(|t| t.used_bytes <= t.capacity_bytes));

        let cold = manager.clear_tier_named("cold").unwrap();
        assert_eq!(cold, 8);
        assert!(manager.tier(TierLevel::Cold).is_empty());
        assert_matches!(manager.clear_tier_named("lukewarm"), Err(Error::UnknownTier(_)));

        let rest = manager.clear_all();
        assert_eq!(rest, stats.entries - cold);
        assert_eq!(manager.stats().used_bytes, 0);
    }

    #[tokio::test]
    async fn test_health_and_export() {
        let (manager, _processor, worker) = setup(SyntheticProcessor::new(8));
        assert_eq!(manager.health().status, HealthStatus::Unhealthy);

        worker.start().unwrap();
        let health = manager.health();
        assert!(health.worker_running);
        assert_eq!(health.status, HealthStatus::Healthy);

        let exporter = MetricsExporter::new().unwrap();
        exporter.update(&manager.stats(), &health);
        let text = exporter.encode().unwrap();
        assert!(text.contains("chunkahead_worker_running 1"));

        worker.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_synchronous_fill_is_served() {
        let (manager, processor, _worker) = setup(SyntheticProcessor::new(48));
        manager.update_position("T", 0.0, Preset::Adaptive, 1.0).unwrap();

        // Miss: the player renders in the request path and hands the result back
        assert!(manager.get("T", 0, Preset::Adaptive).is_none());
        let data = processor.process("T", 0, Preset::Adaptive, 1.0).await.unwrap();
        manager
            .insert(ChunkKey::new("T", 0, Preset::Adaptive, 1.0), data.clone(), TierLevel::Hot, 1.0)
            .unwrap();

        let hit = manager.get("T", 0, Preset::Adaptive).unwrap();
        assert_eq!(hit.data, data);
        assert_eq!(hit.tier, TierLevel::Hot);
        assert_matches!(
            manager.tier(TierLevel::Hot).peek(&ChunkKey::new("T", 0, Preset::Adaptive, 1.0)),
            Some(_)
        );
    }
}
