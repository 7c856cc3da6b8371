//! Audio Content Analyzer
//!
//! Cheap, single-pass signal measures over one chunk of decoded samples,
//! and a rule table turning those measures into per-preset affinity scores.
//!
//! # Features
//!
//! ```text
//! energy         RMS level, -60 dBFS..0 dBFS mapped to 0..1
//! brightness     first-difference energy vs raw energy (coarse spectral tilt)
//! dynamics       crest factor, 3 dB (sine) .. 20 dB mapped to 0..1
//! vocal_presence 300 Hz..3.4 kHz band energy share (heuristic only)
//! tempo          onset-envelope autocorrelation, BPM range mapped to 0..1
//! ```
//!
//! Degenerate input (empty, silent, non-finite, zero sample rate) yields
//! [`AudioFeatures::NEUTRAL`].

use serde::{Deserialize, Serialize};

use super::preset::Preset;

/// Normalized content features of one chunk, each within [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioFeatures {
    /// Loudness
    pub energy: f64,
    /// High-frequency share
    pub brightness: f64,
    /// Dynamic range (higher = less compressed)
    pub dynamics: f64,
    /// Mid-band concentration
    pub vocal_presence: f64,
    /// Normalized tempo estimate
    pub tempo: f64,
}

impl AudioFeatures {
    /// Feature vector reported for unusable input
    pub const NEUTRAL: AudioFeatures = AudioFeatures {
        energy: 0.5,
        brightness: 0.5,
        dynamics: 0.5,
        vocal_presence: 0.5,
        tempo: 0.5,
    };

    /// Create a feature vector, clamping every value into [0, 1]
    pub fn new(
        energy: f64,
        brightness: f64,
        dynamics: f64,
        vocal_presence: f64,
        tempo: f64,
    ) -> Self {
        Self {
            energy: unit(energy),
            brightness: unit(brightness),
            dynamics: unit(dynamics),
            vocal_presence: unit(vocal_presence),
            tempo: unit(tempo),
        }
    }

    /// True when this is the neutral vector (no content signal)
    pub fn is_neutral(&self) -> bool {
        *self == Self::NEUTRAL
    }
}

impl Default for AudioFeatures {
    fn default() -> Self {
        Self::NEUTRAL
    }
}

/// Clamp into [0, 1], mapping NaN to the neutral midpoint
#[inline]
fn unit(v: f64) -> f64 {
    if v.is_nan() {
        0.5
    } else {
        v.clamp(0.0, 1.0)
    }
}

// =============================================================================
// Preset Affinity
// =============================================================================

/// Content-derived suitability score per preset, each within [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PresetAffinity {
    scores: [f64; Preset::COUNT],
}

impl PresetAffinity {
    /// Build from explicit scores
    pub fn from_scores(scores: [f64; Preset::COUNT]) -> Self {
        Self {
            scores: scores.map(unit),
        }
    }

    /// Score for a preset
    pub fn score(&self, preset: Preset) -> f64 {
        self.scores[preset.index()]
    }

    /// Iterate `(preset, score)` in preset order
    pub fn iter(&self) -> impl Iterator<Item = (Preset, f64)> + '_ {
        Preset::ALL.iter().map(move |p| (*p, self.scores[p.index()]))
    }

    /// Highest-scoring preset, ties broken by name
    pub fn best(&self) -> Preset {
        let mut best = Preset::ALL[0];
        for preset in Preset::ALL {
            if self.score(preset) > self.score(best) {
                best = preset;
            }
        }
        best
    }

    /// Scores rescaled into a probability distribution (uniform when all zero)
    pub fn normalized(&self) -> [f64; Preset::COUNT] {
        let total: f64 = self.scores.iter().sum();
        if total <= f64::EPSILON {
            return [1.0 / Preset::COUNT as f64; Preset::COUNT];
        }
        self.scores.map(|s| s / total)
    }
}

/// Thresholds for the feature-to-preset rule table.
///
/// These are tunable constants, not contracts.
#[derive(Debug, Clone, PartialEq)]
pub struct AffinityRules {
    /// Energy above which material counts as loud
    pub high_energy: f64,
    /// Energy below which material counts as quiet
    pub low_energy: f64,
    /// Dynamics below which material counts as compressed
    pub low_dynamics: f64,
    /// Dynamics above which material counts as open
    pub high_dynamics: f64,
    /// Brightness above which material counts as bright
    pub high_brightness: f64,
    /// Vocal presence above which material counts as vocal
    pub high_vocal: f64,
    /// Brightness band considered "moderate" for vocal material
    pub moderate_brightness: (f64, f64),
    /// Extra punchy affinity per unit of tempo
    pub tempo_punch: f64,
    /// Floor for the neutral default preset
    pub default_floor: f64,
}

impl Default for AffinityRules {
    fn default() -> Self {
        Self {
            high_energy: 0.6,
            low_energy: 0.35,
            low_dynamics: 0.4,
            high_dynamics: 0.6,
            high_brightness: 0.6,
            high_vocal: 0.5,
            moderate_brightness: (0.3, 0.7),
            tempo_punch: 0.15,
            default_floor: 0.25,
        }
    }
}

/// 0 at `threshold`, rising linearly to 1 at 1.0
#[inline]
fn above(x: f64, threshold: f64) -> f64 {
    if threshold >= 1.0 {
        return if x >= 1.0 { 1.0 } else { 0.0 };
    }
    ((x - threshold) / (1.0 - threshold)).clamp(0.0, 1.0)
}

/// 0 at `threshold`, rising linearly to 1 at 0.0
#[inline]
fn below(x: f64, threshold: f64) -> f64 {
    if threshold <= 0.0 {
        return if x <= 0.0 { 1.0 } else { 0.0 };
    }
    ((threshold - x) / threshold).clamp(0.0, 1.0)
}

/// 1 inside `[lo, hi]`, falling off linearly over 0.2 outside
#[inline]
fn within(x: f64, (lo, hi): (f64, f64)) -> f64 {
    const FALLOFF: f64 = 0.2;
    if x < lo {
        (1.0 - (lo - x) / FALLOFF).clamp(0.0, 1.0)
    } else if x > hi {
        (1.0 - (x - hi) / FALLOFF).clamp(0.0, 1.0)
    } else {
        1.0
    }
}

impl AffinityRules {
    /// Apply the rule table
    pub fn apply(&self, f: &AudioFeatures) -> PresetAffinity {
        let punchy = ((above(f.energy, self.high_energy) * below(f.dynamics, self.low_dynamics))
            .sqrt()
            + self.tempo_punch * f.tempo * above(f.energy, self.low_energy))
        .min(1.0);
        let warm = (above(f.vocal_presence, self.high_vocal)
            * within(f.brightness, self.moderate_brightness))
        .sqrt();
        let gentle = below(f.energy, self.low_energy);
        let bright = (above(f.brightness, self.high_brightness)
            * above(f.dynamics, self.high_dynamics))
        .sqrt();

        let strongest = punchy.max(warm).max(gentle).max(bright);
        let adaptive = (1.0 - strongest).max(self.default_floor);

        let mut scores = [0.0; Preset::COUNT];
        scores[Preset::Adaptive.index()] = adaptive;
        scores[Preset::Bright.index()] = bright;
        scores[Preset::Gentle.index()] = gentle;
        scores[Preset::Punchy.index()] = punchy;
        scores[Preset::Warm.index()] = warm;
        PresetAffinity::from_scores(scores)
    }
}

// =============================================================================
// Analyzer
// =============================================================================

/// Analyzer configuration
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzerConfig {
    /// Lower bound of the tempo range
    pub min_bpm: f64,
    /// Upper bound of the tempo range
    pub max_bpm: f64,
    /// Onset envelope frame rate
    pub envelope_rate_hz: f64,
    /// Lower edge of the vocal band
    pub vocal_low_hz: f64,
    /// Upper edge of the vocal band
    pub vocal_high_hz: f64,
    /// RMS below this is treated as silence
    pub silence_rms: f64,
    /// Level mapped to zero energy
    pub energy_floor_db: f64,
    /// Crest factor mapped to zero dynamics
    pub crest_floor_db: f64,
    /// Crest factor mapped to full dynamics
    pub crest_ceiling_db: f64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            min_bpm: 60.0,
            max_bpm: 180.0,
            envelope_rate_hz: 100.0,
            vocal_low_hz: 300.0,
            vocal_high_hz: 3400.0,
            silence_rms: 1e-5,
            energy_floor_db: -60.0,
            crest_floor_db: 3.0,
            crest_ceiling_db: 20.0,
        }
    }
}

/// Extracts [`AudioFeatures`] from decoded samples
#[derive(Debug, Clone, Default)]
pub struct AudioContentAnalyzer {
    config: AnalyzerConfig,
    rules: AffinityRules,
}

impl AudioContentAnalyzer {
    /// Create an analyzer with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an analyzer with custom configuration and rules
    pub fn with_config(config: AnalyzerConfig, rules: AffinityRules) -> Self {
        Self { config, rules }
    }

    /// Get configuration
    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Get the rule table
    pub fn rules(&self) -> &AffinityRules {
        &self.rules
    }

    /// Extract features from interleaved samples, downmixing to mono
    pub fn extract_interleaved(
        &self,
        samples: &[f32],
        channels: u16,
        sample_rate: u32,
    ) -> AudioFeatures {
        match channels {
            0 => AudioFeatures::NEUTRAL,
            1 => self.extract(samples, sample_rate),
            n => {
                let n = n as usize;
                let mono: Vec<f32> = samples
                    .chunks_exact(n)
                    .map(|frame| frame.iter().sum::<f32>() / n as f32)
                    .collect();
                self.extract(&mono, sample_rate)
            }
        }
    }

    /// Extract features from mono samples
    pub fn extract(&self, samples: &[f32], sample_rate: u32) -> AudioFeatures {
        if samples.is_empty() || sample_rate == 0 {
            return AudioFeatures::NEUTRAL;
        }

        let sr = sample_rate as f64;
        let alpha_low = one_pole_alpha(self.config.vocal_low_hz, sr);
        let alpha_high = one_pole_alpha(self.config.vocal_high_hz, sr);
        let hop = ((sr / self.config.envelope_rate_hz).round() as usize).max(1);

        let mut sum_sq = 0.0f64;
        let mut diff_sq = 0.0f64;
        let mut band_sq = 0.0f64;
        let mut peak = 0.0f64;
        let mut prev = 0.0f64;
        let mut lp_low = 0.0f64;
        let mut lp_high = 0.0f64;

        let mut envelope = Vec::with_capacity(samples.len() / hop + 1);
        let mut frame_sq = 0.0f64;
        let mut frame_len = 0usize;

        for (i, &s) in samples.iter().enumerate() {
            let x = s as f64;
            if !x.is_finite() {
                return AudioFeatures::NEUTRAL;
            }

            sum_sq += x * x;
            peak = peak.max(x.abs());
            if i > 0 {
                let d = x - prev;
                diff_sq += d * d;
            }
            prev = x;

            lp_low += alpha_low * (x - lp_low);
            lp_high += alpha_high * (x - lp_high);
            let band = lp_high - lp_low;
            band_sq += band * band;

            frame_sq += x * x;
            frame_len += 1;
            if frame_len == hop {
                envelope.push((frame_sq / hop as f64).sqrt());
                frame_sq = 0.0;
                frame_len = 0;
            }
        }

        let n = samples.len() as f64;
        let rms = (sum_sq / n).sqrt();
        if !rms.is_finite() || rms < self.config.silence_rms {
            return AudioFeatures::NEUTRAL;
        }

        let level_db = 20.0 * rms.log10();
        let energy = (level_db - self.config.energy_floor_db) / -self.config.energy_floor_db;

        // White noise has a difference/raw energy ratio of 2
        let brightness = (diff_sq / sum_sq / 2.0).sqrt();

        let crest_db = 20.0 * (peak / rms).log10();
        let dynamics = (crest_db - self.config.crest_floor_db)
            / (self.config.crest_ceiling_db - self.config.crest_floor_db);

        let vocal_presence = band_sq / sum_sq;

        let tempo = self.tempo(&envelope).unwrap_or(0.5);

        AudioFeatures::new(energy, brightness, dynamics, vocal_presence, tempo)
    }

    /// Normalized tempo from the onset envelope, `None` when no periodicity is found
    fn tempo(&self, envelope: &[f64]) -> Option<f64> {
        let rate = self.config.envelope_rate_hz;
        let min_lag = ((60.0 * rate / self.config.max_bpm).round() as usize).max(1);
        let max_lag = (60.0 * rate / self.config.min_bpm).round() as usize;
        if envelope.len() < 2 * max_lag + 1 {
            return None;
        }

        let mut onset: Vec<f64> = envelope
            .windows(2)
            .map(|w| (w[1] - w[0]).max(0.0))
            .collect();
        let mean = onset.iter().sum::<f64>() / onset.len() as f64;
        for o in onset.iter_mut() {
            *o -= mean;
        }

        let mut best_lag = 0;
        let mut best_score = 0.0;
        for lag in min_lag..=max_lag {
            let score: f64 = onset[lag..]
                .iter()
                .zip(onset.iter())
                .map(|(a, b)| a * b)
                .sum();
            if score > best_score {
                best_score = score;
                best_lag = lag;
            }
        }
        if best_lag == 0 {
            return None;
        }

        let bpm = 60.0 * rate / best_lag as f64;
        Some((bpm - self.config.min_bpm) / (self.config.max_bpm - self.config.min_bpm))
    }

    /// Map features to per-preset affinity
    pub fn affinity_for(&self, features: &AudioFeatures) -> PresetAffinity {
        self.rules.apply(features)
    }
}

#[inline]
fn one_pole_alpha(cutoff_hz: f64, sample_rate: f64) -> f64 {
    1.0 - (-2.0 * std::f64::consts::PI * cutoff_hz / sample_rate).exp()
}

// =============================================================================
// Tests
// =============================================================================
