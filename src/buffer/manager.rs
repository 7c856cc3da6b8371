//! Buffer Manager
//!
//! Owns the three tiers, the branch predictor and the work queue. Every
//! position report runs one planning pass:
//!
//! 1. Validate, then update the session (track, position, preset, intensity).
//! 2. Offer a preset change to the predictor's jitter guard.
//! 3. Skip planning if nothing moved and the last pass is under the throttle.
//! 4. Rank next presets (content-blended when samples are available).
//! 5. For each planned chunk: refresh it if cached at or above its target
//!    tier, move it up if it sits in a colder tier, otherwise enqueue it.
//!
//! Planning never processes audio; callers that miss fall back to
//! processing synchronously and may feed the result back with
//! [`BufferManager::insert`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info, instrument, trace, warn};

use super::entry::{CacheEntry, ChunkKey, EntryInfo};
use super::metrics::{CacheMetrics, MetricsSnapshot};
use super::policy::PrefetchPolicy;
use super::queue::{EnqueueOutcome, WorkItem, WorkQueue};
use super::tier::{CacheTier, TierLevel, TierStats};
use crate::config::BufferConfig;
use crate::error::{Error, Result};
use crate::monitoring::{HealthResponse, WorkerHealth};
use crate::predict::{
    AffinityRules, AnalyzerConfig, AudioContentAnalyzer, AudioFeatures, BranchPredictor,
    Prediction, Preset, SwitchOutcome, TransitionSnapshot,
};
use crate::processor::SampleSource;

/// Intensity assumed by lookups before the first position report
pub const DEFAULT_INTENSITY: f32 = 1.0;

// =============================================================================
// Session State
// =============================================================================

#[derive(Debug, Clone)]
struct Session {
    track_id: Arc<str>,
    position_secs: f64,
    preset: Preset,
    intensity: f32,
    chunk_index: u32,
    planned_at: Instant,
    preset_changed_at: Option<Instant>,
}

/// Current playback state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub track_id: String,
    pub position_secs: f64,
    pub preset: Preset,
    pub intensity: f32,
    pub chunk_index: u32,
    pub ms_since_preset_change: Option<u64>,
}

impl From<&Session> for SessionSnapshot {
    fn from(s: &Session) -> Self {
        Self {
            track_id: s.track_id.to_string(),
            position_secs: s.position_secs,
            preset: s.preset,
            intensity: s.intensity,
            chunk_index: s.chunk_index,
            ms_since_preset_change: s.preset_changed_at.map(|t| t.elapsed().as_millis() as u64),
        }
    }
}

enum Step {
    Throttled,
    Plan {
        track: Arc<str>,
        switch: Option<SwitchOutcome>,
        previous_track: Option<Arc<str>>,
    },
}

// =============================================================================
// Reports
// =============================================================================

/// Result of [`BufferManager::update_position`]
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    /// State updated; planning skipped inside the throttle window
    Throttled,
    /// A planning pass ran
    Planned(PlanSummary),
}

impl UpdateOutcome {
    pub fn is_throttled(&self) -> bool {
        matches!(self, UpdateOutcome::Throttled)
    }
}

/// What one planning pass did
#[derive(Debug, Clone, PartialEq)]
pub struct PlanSummary {
    pub chunk_index: u32,
    /// Outcome of the preset switch, if the preset changed
    pub switch: Option<SwitchOutcome>,
    /// Whether content analysis contributed to the ranking
    pub content_blended: bool,
    /// Full ranked distribution used for planning
    pub predictions: Vec<Prediction>,
    pub planned: usize,
    pub cached: usize,
    pub promoted: usize,
    pub already_pending: usize,
    pub enqueued: usize,
}

/// Where a planned chunk stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coverage {
    /// Held at or above the wanted tier
    Cached(TierLevel),
    /// Moved up from a colder tier
    Promoted { from: TierLevel },
    /// Needs processing
    Missing,
}

/// A cache hit
#[derive(Debug, Clone, PartialEq)]
pub struct CachedChunk {
    pub data: Bytes,
    pub tier: TierLevel,
    pub probability: f64,
}

/// Aggregate statistics for the management surface
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BufferStats {
    pub tiers: Vec<TierStats>,
    pub used_bytes: u64,
    pub capacity_bytes: u64,
    pub entries: usize,
    pub pending_work: usize,
    pub learned_switches: u64,
    pub metrics: MetricsSnapshot,
    pub session: Option<SessionSnapshot>,
}

/// Next-preset predictions for the active session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionReport {
    pub track_id: String,
    pub preset: Preset,
    pub chunk_index: u32,
    /// Learned behaviour only
    pub user: Vec<Prediction>,
    /// Blended with content affinity; absent when no usable samples
    pub blended: Option<Vec<Prediction>>,
    pub transitions: TransitionSnapshot,
}

// =============================================================================
// Buffer Manager
// =============================================================================

/// Predictive multi-tier chunk buffer
pub struct BufferManager {
    config: BufferConfig,
    policy: PrefetchPolicy,
    hot: CacheTier,
    warm: CacheTier,
    cold: CacheTier,
    predictor: Arc<BranchPredictor>,
    sample_source: Option<Arc<dyn SampleSource>>,
    queue: WorkQueue,
    metrics: CacheMetrics,
    health: WorkerHealth,
    session: Mutex<Option<Session>>,
    features: Mutex<HashMap<(Arc<str>, u32), AudioFeatures>>,
    // Serializes cross-tier moves so an entry is never in two tiers
    placement: Mutex<()>,
}

impl BufferManager {
    /// Create a manager with its own predictor and no sample source
    pub fn new(config: BufferConfig) -> Result<Self> {
        config.validate()?;

        let analyzer = AudioContentAnalyzer::with_config(
            AnalyzerConfig {
                min_bpm: config.min_bpm,
                max_bpm: config.max_bpm,
                ..AnalyzerConfig::default()
            },
            AffinityRules::default(),
        );
        let predictor = Arc::new(BranchPredictor::with_config(&config, analyzer));

        Ok(Self {
            policy: PrefetchPolicy::from(&config),
            hot: CacheTier::new(TierLevel::Hot, config.hot_capacity_bytes),
            warm: CacheTier::new(TierLevel::Warm, config.warm_capacity_bytes),
            cold: CacheTier::new(TierLevel::Cold, config.cold_capacity_bytes),
            predictor,
            sample_source: None,
            queue: WorkQueue::new(),
            metrics: CacheMetrics::new(),
            health: WorkerHealth::new(),
            session: Mutex::new(None),
            features: Mutex::new(HashMap::new()),
            placement: Mutex::new(()),
            config,
        })
    }

    /// Share an existing predictor
    pub fn with_predictor(mut self, predictor: Arc<BranchPredictor>) -> Self {
        self.predictor = predictor;
        self
    }

    /// Enable content-aware prediction and track length clamping
    pub fn with_sample_source(mut self, source: Arc<dyn SampleSource>) -> Self {
        self.sample_source = Some(source);
        self
    }

    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    pub fn predictor(&self) -> &Arc<BranchPredictor> {
        &self.predictor
    }

    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    /// Tier at `level`
    pub fn tier(&self, level: TierLevel) -> &CacheTier {
        match level {
            TierLevel::Hot => &self.hot,
            TierLevel::Warm => &self.warm,
            TierLevel::Cold => &self.cold,
        }
    }

    pub(crate) fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    pub(crate) fn worker_health(&self) -> &WorkerHealth {
        &self.health
    }

    // =========================================================================
    // Position Updates
    // =========================================================================

    /// Report playback position and preset, then plan coverage.
    ///
    /// Invalid input is rejected before any state changes.
    #[instrument(skip(self), level = "debug")]
    pub fn update_position(
        &self,
        track_id: &str,
        position_secs: f64,
        preset: Preset,
        intensity: f32,
    ) -> Result<UpdateOutcome> {
        validate_update(track_id, position_secs, intensity)?;
        self.metrics.record_position_update();

        let now = Instant::now();
        let chunk_index = self.config.chunk_index(position_secs);

        let step = {
            let mut guard = self.session.lock();
            match guard.take() {
                Some(mut session) if &*session.track_id == track_id => {
                    let step = self.advance(
                        &mut session,
                        position_secs,
                        preset,
                        intensity,
                        chunk_index,
                        now,
                    );
                    *guard = Some(session);
                    step
                }
                previous => {
                    let track: Arc<str> = Arc::from(track_id);
                    *guard = Some(Session {
                        track_id: Arc::clone(&track),
                        position_secs,
                        preset,
                        intensity,
                        chunk_index,
                        planned_at: now,
                        preset_changed_at: None,
                    });
                    Step::Plan {
                        track,
                        switch: None,
                        previous_track: previous.map(|s| s.track_id),
                    }
                }
            }
        };

        let (track, switch) = match step {
            Step::Throttled => {
                self.metrics.record_throttled();
                trace!(track_id, chunk_index, "Position update throttled");
                return Ok(UpdateOutcome::Throttled);
            }
            Step::Plan {
                track,
                switch,
                previous_track,
            } => {
                if let Some(previous) = previous_track {
                    self.on_track_change(&previous, &track);
                }
                (track, switch)
            }
        };

        let summary = self.plan(&track, chunk_index, preset, intensity, switch);
        debug!(
            track_id,
            chunk_index,
            %preset,
            planned = summary.planned,
            cached = summary.cached,
            promoted = summary.promoted,
            enqueued = summary.enqueued,
            content_blended = summary.content_blended,
            "Planned buffer coverage"
        );
        Ok(UpdateOutcome::Planned(summary))
    }

    /// [`Self::update_position`] with a preset given by name
    pub fn update_position_named(
        &self,
        track_id: &str,
        position_secs: f64,
        preset: &str,
        intensity: f32,
    ) -> Result<UpdateOutcome> {
        let preset: Preset = preset.parse()?;
        self.update_position(track_id, position_secs, preset, intensity)
    }

    fn advance(
        &self,
        session: &mut Session,
        position_secs: f64,
        preset: Preset,
        intensity: f32,
        chunk_index: u32,
        now: Instant,
    ) -> Step {
        let mut switch = None;
        if session.preset != preset {
            let outcome = self
                .predictor
                .record_switch(&session.track_id, session.preset, preset, now);
            session.preset_changed_at = Some(now);
            switch = Some(outcome);
        }

        let unchanged = switch.is_none()
            && session.chunk_index == chunk_index
            && session.intensity == intensity;
        let throttled = unchanged
            && now.saturating_duration_since(session.planned_at) < self.config.update_throttle;

        session.position_secs = position_secs;
        session.preset = preset;
        session.intensity = intensity;
        session.chunk_index = chunk_index;

        if throttled {
            return Step::Throttled;
        }
        session.planned_at = now;
        Step::Plan {
            track: Arc::clone(&session.track_id),
            switch,
            previous_track: None,
        }
    }

    fn on_track_change(&self, previous: &str, next: &str) {
        let dropped = self.queue.drop_track(previous);
        self.features.lock().clear();
        info!(from = previous, to = next, dropped, "Track changed");
    }

    fn plan(
        &self,
        track: &Arc<str>,
        chunk_index: u32,
        preset: Preset,
        intensity: f32,
        switch: Option<SwitchOutcome>,
    ) -> PlanSummary {
        let (predictions, content_blended) = self.rank_next(track, chunk_index, preset);
        let chunk_count = self
            .sample_source
            .as_ref()
            .and_then(|source| source.chunk_count(track));
        let plan = self.policy.plan(chunk_index, preset, &predictions, chunk_count);

        let mut summary = PlanSummary {
            chunk_index,
            switch,
            content_blended,
            predictions,
            planned: plan.len(),
            cached: 0,
            promoted: 0,
            already_pending: 0,
            enqueued: 0,
        };

        for chunk in &plan {
            let key = ChunkKey::new(Arc::clone(track), chunk.chunk_index, chunk.preset, intensity);
            match self.cover(&key, chunk.tier, chunk.probability) {
                Coverage::Cached(_) => summary.cached += 1,
                Coverage::Promoted { .. } => summary.promoted += 1,
                Coverage::Missing => match self.queue.enqueue(key, chunk.tier, chunk.probability) {
                    EnqueueOutcome::Duplicate => summary.already_pending += 1,
                    EnqueueOutcome::Queued | EnqueueOutcome::Upgraded => summary.enqueued += 1,
                },
            }
        }

        self.metrics.record_enqueued(summary.enqueued as u64);
        summary
    }

    /// Full ranked distribution out of `preset`, and whether content was used
    fn rank_next(
        &self,
        track: &Arc<str>,
        chunk_index: u32,
        preset: Preset,
    ) -> (Vec<Prediction>, bool) {
        match self.content_features(track, chunk_index) {
            Some(features) => (
                self.predictor
                    .predict_with_content(preset, &features, Preset::COUNT),
                true,
            ),
            None => (self.predictor.predict(preset, Preset::COUNT), false),
        }
    }

    /// Features for `chunk_index`, or `None` to fall back to history-only ranking
    fn content_features(&self, track: &Arc<str>, chunk_index: u32) -> Option<AudioFeatures> {
        let source = self.sample_source.as_ref()?;
        let cache_key = (Arc::clone(track), chunk_index);

        let cached = self.features.lock().get(&cache_key).copied();
        let features = match cached {
            Some(features) => features,
            None => match source.load(track, chunk_index) {
                Ok(decoded) => {
                    let features = self.predictor.analyzer().extract_interleaved(
                        &decoded.samples,
                        decoded.channels,
                        decoded.sample_rate,
                    );
                    self.features.lock().insert(cache_key, features);
                    features
                }
                Err(e) => {
                    warn!(
                        track_id = %track,
                        chunk_index,
                        error = %e,
                        "Sample load failed, falling back to history-only prediction"
                    );
                    self.metrics.record_prediction_fallback();
                    return None;
                }
            },
        };

        if features.is_neutral() {
            debug!(
                track_id = %track,
                chunk_index,
                "No content signal, using history-only prediction"
            );
            self.metrics.record_prediction_fallback();
            return None;
        }
        Some(features)
    }

    // =========================================================================
    // Placement
    // =========================================================================

    /// Hottest tier holding `key`
    fn locate(&self, key: &ChunkKey) -> Option<TierLevel> {
        TierLevel::ALL
            .into_iter()
            .find(|&level| self.tier(level).contains(key))
    }

    /// Make `key` count toward `target` without processing, if possible
    pub(crate) fn cover(&self, key: &ChunkKey, target: TierLevel, probability: f64) -> Coverage {
        let _placement = self.placement.lock();

        let Some(held) = self.locate(key) else {
            return Coverage::Missing;
        };
        if held >= target {
            self.tier(held).refresh_probability(key, probability);
            return Coverage::Cached(held);
        }

        let Some(mut entry) = self.tier(held).remove(key) else {
            return Coverage::Missing;
        };
        entry.set_probability(probability);

        match self.tier(target).add(entry.clone()) {
            Ok(_) => {
                self.tier(target).counters().record_promotion();
                debug!(%key, from = %held, to = %target, "Promoted cached chunk");
                Coverage::Promoted { from: held }
            }
            Err(e) => {
                warn!(%key, error = %e, "Promotion rejected, keeping chunk in place");
                if let Err(e) = self.tier(held).add(entry) {
                    error!(%key, error = %e, "Failed to restore chunk after rejected promotion");
                    return Coverage::Missing;
                }
                Coverage::Cached(held)
            }
        }
    }

    /// Store processed audio for `key` in `tier`, removing it from any other tier.
    ///
    /// Returns the keys evicted to make room.
    pub fn insert(
        &self,
        key: ChunkKey,
        data: Bytes,
        tier: TierLevel,
        probability: f64,
    ) -> Result<Vec<ChunkKey>> {
        let entry = CacheEntry::new(key, data, tier, probability);
        let target = self.tier(tier);

        let _placement = self.placement.lock();
        if entry.size_bytes() <= target.capacity_bytes() {
            for level in TierLevel::ALL.into_iter().filter(|&l| l != tier) {
                self.tier(level).remove(entry.key());
            }
        }
        target.add(entry)
    }

    /// Store the worker's result for `item`
    pub(crate) fn store(&self, item: &WorkItem, data: Bytes) -> Result<()> {
        let evicted = self.insert(item.key().clone(), data, item.priority(), item.probability())?;
        trace!(
            key = %item.key(),
            tier = %item.priority(),
            evicted = evicted.len(),
            "Stored processed chunk"
        );
        Ok(())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    fn current_intensity(&self) -> f32 {
        self.session
            .lock()
            .as_ref()
            .map_or(DEFAULT_INTENSITY, |s| s.intensity)
    }

    /// Tier holding `(track, chunk, preset)` at the session's intensity
    pub fn check(&self, track_id: &str, chunk_index: u32, preset: Preset) -> Option<TierLevel> {
        if track_id.is_empty() {
            return None;
        }
        self.check_key(&ChunkKey::new(track_id, chunk_index, preset, self.current_intensity()))
    }

    /// Tier holding `key`
    pub fn check_key(&self, key: &ChunkKey) -> Option<TierLevel> {
        let _placement = self.placement.lock();
        self.locate(key)
    }

    /// Read `(track, chunk, preset)` at the session's intensity. Never processes.
    pub fn get(&self, track_id: &str, chunk_index: u32, preset: Preset) -> Option<CachedChunk> {
        if track_id.is_empty() {
            return None;
        }
        self.get_key(&ChunkKey::new(track_id, chunk_index, preset, self.current_intensity()))
    }

    /// Read `key` from the tier holding it.
    ///
    /// Only the holding tier counts a hit; a miss is counted once, buffer-wide.
    pub fn get_key(&self, key: &ChunkKey) -> Option<CachedChunk> {
        let _placement = self.placement.lock();
        let hit = self.locate(key).and_then(|level| {
            self.tier(level).get(key).map(|entry| CachedChunk {
                data: entry.data().clone(),
                tier: level,
                probability: entry.probability(),
            })
        });
        self.metrics.record_lookup(hit.is_some());
        hit
    }

    // =========================================================================
    // Management Surface
    // =========================================================================

    /// Current playback session
    pub fn session(&self) -> Option<SessionSnapshot> {
        self.session.lock().as_ref().map(SessionSnapshot::from)
    }

    /// Work items waiting for the worker
    pub fn pending_work(&self) -> usize {
        self.queue.len()
    }

    /// Aggregate statistics
    pub fn stats(&self) -> BufferStats {
        let tiers: Vec<TierStats> = TierLevel::ALL
            .into_iter()
            .map(|level| self.tier(level).stats())
            .collect();

        BufferStats {
            used_bytes: tiers.iter().map(|t| t.used_bytes).sum(),
            capacity_bytes: tiers.iter().map(|t| t.capacity_bytes).sum(),
            entries: tiers.iter().map(|t| t.entries).sum(),
            tiers,
            pending_work: self.queue.len(),
            learned_switches: self.predictor.model().total(),
            metrics: self.metrics.snapshot(),
            session: self.session(),
        }
    }

    /// Top `top_n` next presets for the active session
    pub fn predictions(&self, top_n: usize) -> Option<PredictionReport> {
        let session = self.session.lock().clone()?;

        let user = self.predictor.predict(session.preset, top_n);
        let blended = self
            .content_features(&session.track_id, session.chunk_index)
            .map(|features| {
                self.predictor
                    .predict_with_content(session.preset, &features, top_n)
            });

        Some(PredictionReport {
            track_id: session.track_id.to_string(),
            preset: session.preset,
            chunk_index: session.chunk_index,
            user,
            blended,
            transitions: self.predictor.snapshot(),
        })
    }

    /// Cached entries of `track_id`, hottest tier first
    pub fn entries_for_track(&self, track_id: &str) -> Vec<EntryInfo> {
        TierLevel::ALL
            .into_iter()
            .flat_map(|level| self.tier(level).entries_for_track(track_id))
            .collect()
    }

    /// Empty every tier. Returns how many entries were removed.
    pub fn clear_all(&self) -> usize {
        let _placement = self.placement.lock();
        let removed: usize = TierLevel::ALL
            .into_iter()
            .map(|level| self.tier(level).clear())
            .sum();
        info!(removed, "Cleared all tiers");
        removed
    }

    /// Empty one tier. Returns how many entries were removed.
    pub fn clear_tier(&self, level: TierLevel) -> usize {
        let _placement = self.placement.lock();
        let removed = self.tier(level).clear();
        info!(tier = %level, removed, "Cleared tier");
        removed
    }

    /// Empty the tier called `name`
    pub fn clear_tier_named(&self, name: &str) -> Result<usize> {
        let level: TierLevel = name.parse()?;
        Ok(self.clear_tier(level))
    }

    /// Worker health report
    pub fn health(&self) -> HealthResponse {
        self.health.report(self.queue.len())
    }
}

impl std::fmt::Debug for BufferManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferManager")
            .field("hot", &self.hot)
            .field("warm", &self.warm)
            .field("cold", &self.cold)
            .field("queue", &self.queue)
            .finish()
    }
}

fn validate_update(track_id: &str, position_secs: f64, intensity: f32) -> Result<()> {
    if track_id.is_empty() {
        return Err(Error::EmptyTrackId);
    }
    if !position_secs.is_finite() || position_secs < 0.0 {
        return Err(Error::InvalidPosition(position_secs));
    }
    if !intensity.is_finite() || !(0.0..=1.0).contains(&intensity) {
        return Err(Error::InvalidIntensity(intensity));
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::SyntheticSource;
    use assert_matches::assert_matches;
    use std::time::Duration;

    fn manager() -> BufferManager {
        BufferManager::new(BufferConfig::default()).unwrap()
    }

    fn planned(outcome: UpdateOutcome) -> PlanSummary {
        match outcome {
            UpdateOutcome::Planned(summary) => summary,
            UpdateOutcome::Throttled => panic!("expected a planning pass"),
        }
    }

    fn key(track: &str, chunk: u32, preset: Preset) -> ChunkKey {
        ChunkKey::new(track, chunk, preset, 1.0)
    }

    #[test]
    fn test_invalid_input_leaves_state_untouched() {
        let m = manager();
        assert_matches!(
            m.update_position("", 0.0, Preset::Adaptive, 1.0),
            Err(Error::EmptyTrackId)
        );
        assert_matches!(
            m.update_position("t", -1.0, Preset::Adaptive, 1.0),
            Err(Error::InvalidPosition(_))
        );
        assert_matches!(
            m.update_position("t", f64::NAN, Preset::Adaptive, 1.0),
            Err(Error::InvalidPosition(_))
        );
        assert_matches!(
            m.update_position("t", 0.0, Preset::Adaptive, 1.5),
            Err(Error::InvalidIntensity(_))
        );
        assert_matches!(
            m.update_position_named("t", 0.0, "loud", 1.0),
            Err(Error::UnknownPreset(_))
        );

        assert!(m.session().is_none());
        assert_eq!(m.pending_work(), 0);
    }

    #[test]
    fn test_first_update_plans_hot_coverage() {
        let m = manager();
        let summary = planned(m.update_position("t", 0.0, Preset::Adaptive, 1.0).unwrap());

        assert_eq!(summary.chunk_index, 0);
        assert!(!summary.content_blended);
        assert_eq!(summary.enqueued, summary.planned);
        let queue = m.queue();
        assert_eq!(queue.pending_priority(&key("t", 0, Preset::Adaptive)), Some(TierLevel::Hot));
        assert_eq!(queue.pending_priority(&key("t", 1, Preset::Adaptive)), Some(TierLevel::Hot));
        assert_eq!(queue.pending_priority(&key("t", 5, Preset::Adaptive)), Some(TierLevel::Cold));
        // Uniform cold start: every other preset clears the 0.15 floor
        assert_eq!(queue.pending_priority(&key("t", 0, Preset::Punchy)), Some(TierLevel::Hot));
    }

    #[test]
    fn test_unseen_presets_get_no_warm_work() {
        let m = manager();
        for _ in 0..5 {
            m.predictor().learn(Preset::Adaptive, Preset::Punchy);
        }
        m.update_position("t", 0.0, Preset::Adaptive, 1.0).unwrap();

        let queue = m.queue();
        assert_eq!(queue.pending_priority(&key("t", 1, Preset::Punchy)), Some(TierLevel::Warm));
        assert_eq!(queue.pending_priority(&key("t", 2, Preset::Punchy)), Some(TierLevel::Warm));
        for preset in [Preset::Bright, Preset::Gentle, Preset::Warm] {
            for chunk in 0..=2 {
                assert_eq!(queue.pending_priority(&key("t", chunk, preset)), None);
            }
        }
    }

    #[test]
    fn test_lookup_counts_only_holding_tier() {
        let m = manager();
        let k = key("t", 2, Preset::Bright);
        m.insert(k.clone(), Bytes::from_static(b"pcm"), TierLevel::Warm, 0.5)
            .unwrap();

        assert!(m.get_key(&k).is_some());
        assert!(m.get_key(&key("t", 3, Preset::Bright)).is_none());

        let hot = m.tier(TierLevel::Hot).counters().snapshot();
        let warm = m.tier(TierLevel::Warm).counters().snapshot();
        let cold = m.tier(TierLevel::Cold).counters().snapshot();
        assert_eq!((hot.hits, hot.misses), (0, 0));
        assert_eq!((warm.hits, warm.misses), (1, 0));
        assert_eq!((cold.hits, cold.misses), (0, 0));

        let snap = m.metrics().snapshot();
        assert_eq!(snap.lookup_hits, 1);
        assert_eq!(snap.lookup_misses, 1);
    }

    #[test]
    fn test_identical_update_is_throttled() {
        let m = manager();
        m.update_position("t", 12.0, Preset::Adaptive, 1.0).unwrap();
        let pending = m.pending_work();

        let second = m.update_position("t", 12.0, Preset::Adaptive, 1.0).unwrap();
        assert!(second.is_throttled());
        assert_eq!(m.pending_work(), pending);
        assert_eq!(m.metrics().snapshot().throttled_updates, 1);
    }

    #[test]
    fn test_chunk_change_bypasses_throttle() {
        let m = manager();
        m.update_position("t", 0.0, Preset::Adaptive, 1.0).unwrap();
        let outcome = m.update_position("t", 31.0, Preset::Adaptive, 1.0).unwrap();
        assert_eq!(planned(outcome).chunk_index, 1);
    }

    #[test]
    fn test_preset_change_records_switch() {
        let m = manager();
        m.update_position("t", 0.0, Preset::Adaptive, 1.0).unwrap();
        let summary = planned(m.update_position("t", 0.0, Preset::Punchy, 1.0).unwrap());

        assert_eq!(summary.switch, Some(SwitchOutcome::Recorded));
        assert_eq!(m.predictor().model().count(Preset::Adaptive, Preset::Punchy), 1);

        // Within the debounce window
        let summary = planned(m.update_position("t", 0.0, Preset::Warm, 1.0).unwrap());
        assert_eq!(summary.switch, Some(SwitchOutcome::Debounced));
        assert_eq!(m.predictor().model().total(), 1);
    }

    #[test]
    fn test_cached_chunk_is_promoted_not_enqueued() {
        let m = manager();
        m.insert(key("t", 1, Preset::Punchy), Bytes::from_static(b"pcm"), TierLevel::Warm, 0.4)
            .unwrap();

        m.update_position("t", 30.0, Preset::Punchy, 1.0).unwrap();

        assert_eq!(m.check("t", 1, Preset::Punchy), Some(TierLevel::Hot));
        assert!(m.tier(TierLevel::Warm).is_empty());
        assert_eq!(m.queue().pending_priority(&key("t", 1, Preset::Punchy)), None);
        assert_eq!(m.tier(TierLevel::Hot).counters().snapshot().promotions, 1);
    }

    #[test]
    fn test_insert_keeps_single_tier() {
        let m = manager();
        let k = key("t", 3, Preset::Gentle);
        m.insert(k.clone(), Bytes::from_static(b"a"), TierLevel::Cold, 0.1).unwrap();
        m.insert(k.clone(), Bytes::from_static(b"bb"), TierLevel::Hot, 0.9).unwrap();

        assert!(m.tier(TierLevel::Cold).is_empty());
        let hit = m.get_key(&k).unwrap();
        assert_eq!(hit.tier, TierLevel::Hot);
        assert_eq!(hit.data, Bytes::from_static(b"bb"));
    }

    #[test]
    fn test_oversized_insert_is_reported() {
        let config = BufferConfig {
            hot_capacity_bytes: 4,
            ..BufferConfig::default()
        };
        let m = BufferManager::new(config).unwrap();
        let k = key("t", 0, Preset::Adaptive);
        m.insert(k.clone(), Bytes::from_static(b"ok"), TierLevel::Warm, 0.5).unwrap();

        let err = m
            .insert(k.clone(), Bytes::from_static(b"too large"), TierLevel::Hot, 0.5)
            .unwrap_err();
        assert_matches!(err, Error::Capacity { .. });
        // Rejected insert leaves the existing copy alone
        assert_eq!(m.check_key(&k), Some(TierLevel::Warm));
    }

    #[test]
    fn test_invalid_lookups_are_misses() {
        let m = manager();
        assert_eq!(m.check("", 0, Preset::Adaptive), None);
        assert!(m.get("", 0, Preset::Adaptive).is_none());
        assert!(m.get("nope", 0, Preset::Adaptive).is_none());
    }

    #[test]
    fn test_track_change_drops_pending_work() {
        let m = manager();
        m.update_position("a", 0.0, Preset::Adaptive, 1.0).unwrap();
        assert!(m.pending_work() > 0);

        m.update_position("b", 0.0, Preset::Adaptive, 1.0).unwrap();
        let queue = m.queue();
        assert_eq!(queue.pending_priority(&key("a", 0, Preset::Adaptive)), None);
        assert_eq!(queue.pending_priority(&key("b", 0, Preset::Adaptive)), Some(TierLevel::Hot));
    }

    #[test]
    fn test_content_blending_with_sample_source() {
        let source = SyntheticSource::new(8_000, Duration::from_secs(3));
        let m = manager().with_sample_source(Arc::new(source));

        let summary = planned(m.update_position("t", 0.0, Preset::Adaptive, 1.0).unwrap());
        assert!(summary.content_blended);
        let total: f64 = summary.predictions.iter().map(|p| p.probability).sum();
        assert!((total - 1.0).abs() < 1e-9);

        let report = m.predictions(2).unwrap();
        assert_eq!(report.user.len(), 2);
        assert!(report.blended.is_some());
    }

    #[test]
    fn test_broken_source_falls_back_to_history() {
        let source = SyntheticSource::default().with_broken_track("t");
        let m = manager().with_sample_source(Arc::new(source));

        let summary = planned(m.update_position("t", 0.0, Preset::Adaptive, 1.0).unwrap());
        assert!(!summary.content_blended);
        assert_eq!(m.metrics().prediction_fallbacks(), 1);
    }

    #[test]
    fn test_track_length_clamps_lookahead() {
        let source = SyntheticSource::new(8_000, Duration::from_secs(3)).with_track_length("t", 3);
        let m = manager().with_sample_source(Arc::new(source));

        m.update_position("t", 30.0, Preset::Adaptive, 1.0).unwrap();
        let queue = m.queue();
        assert_eq!(queue.pending_priority(&key("t", 2, Preset::Adaptive)), Some(TierLevel::Hot));
        assert_eq!(queue.pending_priority(&key("t", 3, Preset::Adaptive)), None);
        assert_eq!(queue.pending_priority(&key("t", 4, Preset::Adaptive)), None);
    }

    #[test]
    fn test_management_surface() {
        let m = manager();
        assert!(m.predictions(3).is_none());

        m.insert(key("t", 0, Preset::Adaptive), Bytes::from_static(b"x"), TierLevel::Hot, 1.0)
            .unwrap();
        m.insert(key("t", 4, Preset::Adaptive), Bytes::from_static(b"yy"), TierLevel::Cold, 0.2)
            .unwrap();

        let stats = m.stats();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.used_bytes, 3);
        assert_eq!(stats.tiers.len(), 3);
        assert_eq!(stats.tiers[0].tier, TierLevel::Hot);

        let listed = m.entries_for_track("t");
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].tier, TierLevel::Hot);

        assert_matches!(m.clear_tier_named("tepid"), Err(Error::UnknownTier(_)));
        assert_eq!(m.clear_tier_named("cold").unwrap(), 1);
        assert_eq!(m.clear_all(), 1);
        assert_eq!(m.stats().used_bytes, 0);

        let json = serde_json::to_string(&m.stats()).unwrap();
        assert!(json.contains("\"pending_work\""));
    }
}
