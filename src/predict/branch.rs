//! Branch Predictor
//!
//! Learns how often the listener switches from one preset to another and
//! ranks the likely next presets, optionally blended with content affinity.
//!
//! # Jitter guard
//!
//! Rapid UI toggling must not corrupt the learned counts. A switch is only
//! recorded when:
//!
//! - at least `switch_debounce` elapsed since the last recorded switch on
//!   the same track, and
//! - no more than `max_switches_per_window` switches were recorded inside
//!   the trailing `jitter_window` (across all tracks).

use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, trace};

use super::analyzer::{AudioContentAnalyzer, AudioFeatures};
use super::preset::Preset;
use crate::config::BufferConfig;

/// A ranked next-preset guess
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Prediction {
    /// Candidate preset
    pub preset: Preset,
    /// Probability within the full distribution (before truncation)
    pub probability: f64,
}

/// Full probability distribution over every known preset
pub type Distribution = [f64; Preset::COUNT];

// =============================================================================
// Transition Model
// =============================================================================

/// Counts of observed `from -> to` preset switches.
///
/// Counts only grow; [`TransitionModel::reset`] is the sole way to lower them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransitionModel {
    counts: [[u64; Preset::COUNT]; Preset::COUNT],
}

impl TransitionModel {
    /// Create an empty model
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one switch; self-transitions are ignored
    pub fn increment(&mut self, from: Preset, to: Preset) -> bool {
        if from == to {
            return false;
        }
        let cell = &mut self.counts[from.index()][to.index()];
        *cell = cell.saturating_add(1);
        true
    }

    /// Count for one transition
    pub fn count(&self, from: Preset, to: Preset) -> u64 {
        self.counts[from.index()][to.index()]
    }

    /// Total switches observed out of `from`
    pub fn row_total(&self, from: Preset) -> u64 {
        self.counts[from.index()].iter().sum()
    }

    /// Total switches observed
    pub fn total(&self) -> u64 {
        Preset::ALL.iter().map(|p| self.row_total(*p)).sum()
    }

    /// Row normalized into probabilities, `None` when the row is empty
    pub fn row_distribution(&self, from: Preset) -> Option<Distribution> {
        let total = self.row_total(from);
        if total == 0 {
            return None;
        }
        let row = &self.counts[from.index()];
        Some(std::array::from_fn(|i| row[i] as f64 / total as f64))
    }

    /// Forget every observation
    pub fn reset(&mut self) {
        self.counts = [[0; Preset::COUNT]; Preset::COUNT];
    }

    /// Non-zero counts keyed by preset name
    pub fn snapshot(&self) -> TransitionSnapshot {
        let mut rows = BTreeMap::new();
        for from in Preset::ALL {
            let row: BTreeMap<Preset, u64> = Preset::ALL
                .iter()
                .filter_map(|to| {
                    let c = self.count(from, *to);
                    (c > 0).then_some((*to, c))
                })
                .collect();
            if !row.is_empty() {
                rows.insert(from, row);
            }
        }
        TransitionSnapshot {
            total: self.total(),
            rows,
        }
    }
}

/// Serializable view of the transition counts
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionSnapshot {
    /// Total recorded switches
    pub total: u64,
    /// `from -> (to -> count)`
    pub rows: BTreeMap<Preset, BTreeMap<Preset, u64>>,
}

// =============================================================================
// Switch History
// =============================================================================

/// Outcome of offering a preset switch to the predictor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchOutcome {
    /// Counted in the model
    Recorded,
    /// `from == to`, nothing to learn
    SamePreset,
    /// Too soon after the previous switch on this track
    Debounced,
    /// Too many switches in the trailing window
    Jitter,
}

impl SwitchOutcome {
    /// True when the model was updated
    pub fn is_recorded(&self) -> bool {
        *self == SwitchOutcome::Recorded
    }
}

#[derive(Debug, Clone)]
struct SwitchRecord {
    track_id: String,
    at: Instant,
}

/// Jitter guard tunables
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchGuard {
    /// Minimum spacing between recorded switches on one track
    pub debounce: Duration,
    /// Trailing window for the rate limit
    pub window: Duration,
    /// A switch is rejected once more than this many were recorded in the window
    pub max_per_window: usize,
    /// Retained history length
    pub history_len: usize,
}

impl Default for SwitchGuard {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
            window: Duration::from_secs(1),
            max_per_window: 10,
            history_len: 64,
        }
    }
}

impl From<&BufferConfig> for SwitchGuard {
    fn from(config: &BufferConfig) -> Self {
        Self {
            debounce: config.switch_debounce,
            window: config.jitter_window,
            max_per_window: config.max_switches_per_window,
            history_len: config
                .switch_history_len
                .max(config.max_switches_per_window.saturating_add(1)),
        }
    }
}

// =============================================================================
// Predictor
// =============================================================================

/// Learns preset switches and predicts the next preset
pub struct BranchPredictor {
    model: RwLock<TransitionModel>,
    history: Mutex<VecDeque<SwitchRecord>>,
    guard: SwitchGuard,
    analyzer: AudioContentAnalyzer,
    user_weight: f64,
}

impl BranchPredictor {
    /// Create a predictor with default tunables
    pub fn new() -> Self {
        Self::with_config(&BufferConfig::default(), AudioContentAnalyzer::new())
    }

    /// Create a predictor from buffer configuration
    pub fn with_config(config: &BufferConfig, analyzer: AudioContentAnalyzer) -> Self {
        Self {
            model: RwLock::new(TransitionModel::new()),
            history: Mutex::new(VecDeque::new()),
            guard: SwitchGuard::from(config),
            analyzer,
            user_weight: config.user_weight,
        }
    }

    /// Get the content analyzer
    pub fn analyzer(&self) -> &AudioContentAnalyzer {
        &self.analyzer
    }

    /// Increment `from -> to` without the jitter guard
    pub fn learn(&self, from: Preset, to: Preset) -> bool {
        let learned = self.model.write().increment(from, to);
        if learned {
            debug!(%from, %to, "Learned preset transition");
        }
        learned
    }

    /// Offer a switch observed on `track_id` at `at`, subject to the jitter guard
    pub fn record_switch(
        &self,
        track_id: &str,
        from: Preset,
        to: Preset,
        at: Instant,
    ) -> SwitchOutcome {
        if from == to {
            return SwitchOutcome::SamePreset;
        }

        let mut history = self.history.lock();

        let debounced = history
            .iter()
            .rev()
            .find(|r| r.track_id == track_id)
            .is_some_and(|r| at.saturating_duration_since(r.at) < self.guard.debounce);
        if debounced {
            trace!(track_id, %from, %to, "Preset switch debounced");
            return SwitchOutcome::Debounced;
        }

        let in_window = history
            .iter()
            .filter(|r| at.saturating_duration_since(r.at) < self.guard.window)
            .count();
        if in_window > self.guard.max_per_window {
            debug!(track_id, in_window, "Preset switch rejected by jitter guard");
            return SwitchOutcome::Jitter;
        }

        history.push_back(SwitchRecord {
            track_id: track_id.to_string(),
            at,
        });
        while history.len() > self.guard.history_len {
            history.pop_front();
        }
        drop(history);

        self.learn(from, to);
        SwitchOutcome::Recorded
    }

    /// Learned distribution out of `current`; uniform on cold start
    pub fn distribution(&self, current: Preset) -> Distribution {
        self.model
            .read()
            .row_distribution(current)
            .unwrap_or([1.0 / Preset::COUNT as f64; Preset::COUNT])
    }

    /// Top `top_n` next presets from learned behaviour alone
    pub fn predict(&self, current: Preset, top_n: usize) -> Vec<Prediction> {
        rank(&self.distribution(current), top_n)
    }

    /// Learned distribution blended with content affinity, renormalized
    pub fn blended_distribution(&self, current: Preset, features: &AudioFeatures) -> Distribution {
        let user = self.distribution(current);
        let affinity = self.analyzer.affinity_for(features).normalized();
        let content_weight = 1.0 - self.user_weight;

        let mut combined: Distribution =
            std::array::from_fn(|i| self.user_weight * user[i] + content_weight * affinity[i]);
        let total: f64 = combined.iter().sum();
        if total > f64::EPSILON {
            for p in combined.iter_mut() {
                *p /= total;
            }
        } else {
            combined = [1.0 / Preset::COUNT as f64; Preset::COUNT];
        }
        combined
    }

    /// Top `top_n` next presets from learned behaviour blended with content
    pub fn predict_with_content(
        &self,
        current: Preset,
        features: &AudioFeatures,
        top_n: usize,
    ) -> Vec<Prediction> {
        rank(&self.blended_distribution(current, features), top_n)
    }

    /// Snapshot of learned counts
    pub fn snapshot(&self) -> TransitionSnapshot {
        self.model.read().snapshot()
    }

    /// Clone of the transition model
    pub fn model(&self) -> TransitionModel {
        self.model.read().clone()
    }

    /// Forget learned transitions and switch history
    pub fn reset(&self) {
        self.model.write().reset();
        self.history.lock().clear();
    }
}

impl Default for BranchPredictor {
    fn default() -> Self {
        Self::new()
    }
}

/// Sort descending by probability, ties by preset name, keep `top_n`
fn rank(dist: &Distribution, top_n: usize) -> Vec<Prediction> {
    let mut ranked: Vec<Prediction> = Preset::ALL
        .iter()
        .map(|p| Prediction {
            preset: *p,
            probability: dist[p.index()],
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.probability
            .partial_cmp(&a.probability)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.preset.cmp(&b.preset))
    });
    ranked.truncate(top_n);
    ranked
}

// =============================================================================
// Tests
// =============================================================================
