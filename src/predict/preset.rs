//! Processing Presets
//!
//! The closed set of processing presets the player can select.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A named audio-processing configuration
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    /// Neutral default, adapts to the material
    #[default]
    Adaptive,
    /// Bright, airy top end
    Bright,
    /// Soft, low-fatigue
    Gentle,
    /// Aggressive, compressed
    Punchy,
    /// Vocal-friendly warmth
    Warm,
}

impl Preset {
    /// Every known preset, sorted by name
    pub const ALL: [Preset; 5] = [
        Preset::Adaptive,
        Preset::Bright,
        Preset::Gentle,
        Preset::Punchy,
        Preset::Warm,
    ];

    /// Number of known presets
    pub const COUNT: usize = Self::ALL.len();

    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Preset::Adaptive => "adaptive",
            Preset::Bright => "bright",
            Preset::Gentle => "gentle",
            Preset::Punchy => "punchy",
            Preset::Warm => "warm",
        }
    }

    /// Dense index into `ALL`
    #[inline]
    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl std::fmt::Display for Preset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Preset {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        Preset::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == name)
            .ok_or_else(|| Error::UnknownPreset(s.to_string()))
    }
}
