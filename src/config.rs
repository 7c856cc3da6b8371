//! Buffer Configuration
//!
//! Named tunables for tier budgets, timing windows and prediction blending.
//! Values can be loaded from a YAML file where durations are written as
//! strings (`"30s"`, `"100ms"`, `"1m"`); omitted fields keep their defaults.

use std::ops::RangeInclusive;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One mebibyte
pub const MB: u64 = 1024 * 1024;

/// Default Hot tier budget (18MB)
pub const DEFAULT_HOT_CAPACITY: u64 = 18 * MB;

/// Default Warm tier budget (36MB)
pub const DEFAULT_WARM_CAPACITY: u64 = 36 * MB;

/// Default Cold tier budget (45MB)
pub const DEFAULT_COLD_CAPACITY: u64 = 45 * MB;

/// Default chunk duration (30 seconds)
pub const DEFAULT_CHUNK_DURATION: Duration = Duration::from_secs(30);

/// Configuration for the buffer manager, predictor and analyzer
#[derive(Debug, Clone, PartialEq)]
pub struct BufferConfig {
    /// Duration of one chunk of audio
    pub chunk_duration: Duration,
    /// Hot tier budget in bytes
    pub hot_capacity_bytes: u64,
    /// Warm tier budget in bytes
    pub warm_capacity_bytes: u64,
    /// Cold tier budget in bytes
    pub cold_capacity_bytes: u64,
    /// Minimum spacing between planning passes for an unchanged position stream
    pub update_throttle: Duration,
    /// Minimum spacing between two learned switches on the same track
    pub switch_debounce: Duration,
    /// Trailing window used by the jitter guard
    pub jitter_window: Duration,
    /// Switches recorded in one jitter window before further ones are rejected
    pub max_switches_per_window: usize,
    /// Switch history retained for the jitter guard
    pub switch_history_len: usize,
    /// Weight of learned user behaviour when blending with content affinity
    pub user_weight: f64,
    /// Predicted presets below this probability get no Hot coverage
    pub hot_probability_floor: f64,
    /// Number of predicted presets considered per planning pass
    pub predicted_presets: usize,
    /// Chunks after the current one kept Hot for the active preset
    pub hot_lookahead: u32,
    /// Offsets (from the current chunk) warmed for predicted presets
    pub warm_lookahead: RangeInclusive<u32>,
    /// Offsets (from the current chunk) filled Cold for the active preset
    pub cold_lookahead: RangeInclusive<u32>,
    /// Lower bound of the tempo normalization range
    pub min_bpm: f64,
    /// Upper bound of the tempo normalization range
    pub max_bpm: f64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            chunk_duration: DEFAULT_CHUNK_DURATION,
            hot_capacity_bytes: DEFAULT_HOT_CAPACITY,
            warm_capacity_bytes: DEFAULT_WARM_CAPACITY,
            cold_capacity_bytes: DEFAULT_COLD_CAPACITY,
            update_throttle: Duration::from_millis(100),
            switch_debounce: Duration::from_millis(500),
            jitter_window: Duration::from_secs(1),
            max_switches_per_window: 10,
            switch_history_len: 64,
            user_weight: 0.7,
            hot_probability_floor: 0.15,
            predicted_presets: 3,
            hot_lookahead: 1,
            warm_lookahead: 1..=2,
            cold_lookahead: 3..=10,
            min_bpm: 60.0,
            max_bpm: 180.0,
        }
    }
}

impl BufferConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&raw)
    }

    /// Parse configuration from YAML text
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let file: ConfigFile = serde_yaml::from_str(raw)?;
        let config = file.into_config()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.chunk_duration.is_zero() {
            return Err(Error::Config("chunk_duration must be non-zero".to_string()));
        }
        for (name, cap) in [
            ("hot_capacity_bytes", self.hot_capacity_bytes),
            ("warm_capacity_bytes", self.warm_capacity_bytes),
            ("cold_capacity_bytes", self.cold_capacity_bytes),
        ] {
            if cap == 0 {
                return Err(Error::Config(format!("{} must be non-zero", name)));
            }
        }
        if !(0.0..=1.0).contains(&self.user_weight) {
            return Err(Error::Config(format!(
                "user_weight must be within [0, 1], got {}",
                self.user_weight
            )));
        }
        if !(0.0..=1.0).contains(&self.hot_probability_floor) {
            return Err(Error::Config(format!(
                "hot_probability_floor must be within [0, 1], got {}",
                self.hot_probability_floor
            )));
        }
        if self.max_switches_per_window == 0 {
            return Err(Error::Config(
                "max_switches_per_window must be non-zero".to_string(),
            ));
        }
        if self.warm_lookahead.is_empty() || self.cold_lookahead.is_empty() {
            return Err(Error::Config("lookahead ranges must not be empty".to_string()));
        }
        if self.min_bpm <= 0.0 || self.min_bpm >= self.max_bpm {
            return Err(Error::Config(format!(
                "bpm range must satisfy 0 < min < max, got {}..{}",
                self.min_bpm, self.max_bpm
            )));
        }
        Ok(())
    }

    /// Chunk index containing `position_secs`
    pub fn chunk_index(&self, position_secs: f64) -> u32 {
        let chunk = self.chunk_duration.as_secs_f64();
        (position_secs / chunk).floor().clamp(0.0, u32::MAX as f64) as u32
    }

    /// Blend weight given to content affinity
    pub fn content_weight(&self) -> f64 {
        1.0 - self.user_weight
    }
}

// =============================================================================
// YAML File Layout
// =============================================================================

/// On-disk representation; every field is optional
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    chunk_duration: Option<String>,
    hot_capacity_bytes: Option<u64>,
    warm_capacity_bytes: Option<u64>,
    cold_capacity_bytes: Option<u64>,
    update_throttle: Option<String>,
    switch_debounce: Option<String>,
    jitter_window: Option<String>,
    max_switches_per_window: Option<usize>,
    switch_history_len: Option<usize>,
    user_weight: Option<f64>,
    hot_probability_floor: Option<f64>,
    predicted_presets: Option<usize>,
    hot_lookahead: Option<u32>,
    warm_lookahead: Option<[u32; 2]>,
    cold_lookahead: Option<[u32; 2]>,
    min_bpm: Option<f64>,
    max_bpm: Option<f64>,
}

impl ConfigFile {
    fn into_config(self) -> Result<BufferConfig> {
        let mut config = BufferConfig::default();

        if let Some(s) = self.chunk_duration {
            config.chunk_duration = parse_duration(&s)?;
        }
        if let Some(s) = self.update_throttle {
            config.update_throttle = parse_duration(&s)?;
        }
        if let Some(s) = self.switch_debounce {
            config.switch_debounce = parse_duration(&s)?;
        }
        if let Some(s) = self.jitter_window {
            config.jitter_window = parse_duration(&s)?;
        }
        if let Some(v) = self.hot_capacity_bytes {
            config.hot_capacity_bytes = v;
        }
        if let Some(v) = self.warm_capacity_bytes {
            config.warm_capacity_bytes = v;
        }
        if let Some(v) = self.cold_capacity_bytes {
            config.cold_capacity_bytes = v;
        }
        if let Some(v) = self.max_switches_per_window {
            config.max_switches_per_window = v;
        }
        if let Some(v) = self.switch_history_len {
            config.switch_history_len = v;
        }
        if let Some(v) = self.user_weight {
            config.user_weight = v;
        }
        if let Some(v) = self.hot_probability_floor {
            config.hot_probability_floor = v;
        }
        if let Some(v) = self.predicted_presets {
            config.predicted_presets = v;
        }
        if let Some(v) = self.hot_lookahead {
            config.hot_lookahead = v;
        }
        if let Some([lo, hi]) = self.warm_lookahead {
            config.warm_lookahead = lo..=hi;
        }
        if let Some([lo, hi]) = self.cold_lookahead {
            config.cold_lookahead = lo..=hi;
        }
        if let Some(v) = self.min_bpm {
            config.min_bpm = v;
        }
        if let Some(v) = self.max_bpm {
            config.max_bpm = v;
        }

        Ok(config)
    }
}

// =============================================================================
// Duration Parsing
// =============================================================================

/// Parse a Go-style duration string (e.g., "100ms", "30s", "1m", "1m30s")
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::DurationParse("empty duration string".to_string()));
    }

    let mut total_ms: u64 = 0;
    let mut num_buf = String::new();
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c.is_ascii_digit() {
            num_buf.push(c);
            continue;
        }

        let num: u64 = num_buf
            .parse()
            .map_err(|_| Error::DurationParse(format!("invalid number in duration: {}", s)))?;
        num_buf.clear();

        let multiplier = match c {
            'm' | 'M' if chars.peek().is_some_and(|n| *n == 's' || *n == 'S') => {
                chars.next();
                1
            }
            'h' | 'H' => 3_600_000,
            'm' | 'M' => 60_000,
            's' | 'S' => 1_000,
            _ => {
                return Err(Error::DurationParse(format!(
                    "unknown duration unit: {}",
                    c
                )))
            }
        };

        total_ms = accumulate(total_ms, num, multiplier, s)?;
    }

    // Trailing bare number means seconds
    if !num_buf.is_empty() {
        let num: u64 = num_buf
            .parse()
            .map_err(|_| Error::DurationParse(format!("invalid number in duration: {}", s)))?;
        total_ms = accumulate(total_ms, num, 1_000, s)?;
    }

    Ok(Duration::from_millis(total_ms))
}

/// `total_ms + num * multiplier`, rejecting overflow
fn accumulate(total_ms: u64, num: u64, multiplier: u64, raw: &str) -> Result<u64> {
    num.checked_mul(multiplier)
        .and_then(|ms| total_ms.checked_add(ms))
        .ok_or_else(|| Error::DurationParse(format!("duration out of range: {}", raw)))
}

// =============================================================================
// Tests
// =============================================================================
