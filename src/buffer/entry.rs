//! Cache Entry Types
//!
//! One processed chunk plus the metadata the eviction policy ranks on.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use serde::Serialize;

use super::tier::TierLevel;
use crate::predict::Preset;

/// Intensity resolution stored in keys (thousandths)
const INTENSITY_SCALE: f32 = 1000.0;

/// Composite identity of a processed chunk
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkKey {
    /// Track identifier
    track_id: Arc<str>,
    /// Chunk index within the track
    chunk_index: u32,
    /// Processing preset
    preset: Preset,
    /// Processing intensity in thousandths
    intensity_milli: u16,
}

impl ChunkKey {
    /// Create a new chunk key
    pub fn new(
        track_id: impl Into<Arc<str>>,
        chunk_index: u32,
        preset: Preset,
        intensity: f32,
    ) -> Self {
        Self {
            track_id: track_id.into(),
            chunk_index,
            preset,
            intensity_milli: quantize_intensity(intensity),
        }
    }

    /// Get track identifier
    #[inline]
    pub fn track_id(&self) -> &str {
        &self.track_id
    }

    /// Shared handle to the track identifier
    #[inline]
    pub fn track_handle(&self) -> Arc<str> {
        Arc::clone(&self.track_id)
    }

    /// Get chunk index
    #[inline]
    pub fn chunk_index(&self) -> u32 {
        self.chunk_index
    }

    /// Get preset
    #[inline]
    pub fn preset(&self) -> Preset {
        self.preset
    }

    /// Get intensity
    #[inline]
    pub fn intensity(&self) -> f32 {
        self.intensity_milli as f32 / INTENSITY_SCALE
    }

    /// Same track, chunk and intensity with a different preset
    pub fn with_preset(&self, preset: Preset) -> Self {
        Self {
            preset,
            ..self.clone()
        }
    }

    /// Same track, preset and intensity at a different chunk
    pub fn with_chunk(&self, chunk_index: u32) -> Self {
        Self {
            chunk_index,
            ..self.clone()
        }
    }
}

impl std::fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}#{}/{}@{:.3}",
            self.track_id,
            self.chunk_index,
            self.preset,
            self.intensity()
        )
    }
}

#[inline]
fn quantize_intensity(intensity: f32) -> u16 {
    if !intensity.is_finite() {
        return 0;
    }
    (intensity.clamp(0.0, 1.0) * INTENSITY_SCALE).round() as u16
}

/// Cache entry containing processed audio and metadata
#[derive(Clone)]
pub struct CacheEntry {
    key: ChunkKey,
    data: Bytes,
    tier: TierLevel,
    probability: f64,
    last_access: Instant,
    created_at: Instant,
}

impl CacheEntry {
    /// Create a new cache entry destined for `tier`
    pub fn new(key: ChunkKey, data: Bytes, tier: TierLevel, probability: f64) -> Self {
        let now = Instant::now();
        Self {
            key,
            data,
            tier,
            probability: clamp_probability(probability),
            last_access: now,
            created_at: now,
        }
    }

    /// Get key
    #[inline]
    pub fn key(&self) -> &ChunkKey {
        &self.key
    }

    /// Get data (zero-copy)
    #[inline]
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Size of the processed audio in bytes
    #[inline]
    pub fn size_bytes(&self) -> u64 {
        self.data.len() as u64
    }

    /// Tier currently holding this entry
    #[inline]
    pub fn tier(&self) -> TierLevel {
        self.tier
    }

    /// Prediction confidence that justified caching
    #[inline]
    pub fn probability(&self) -> f64 {
        self.probability
    }

    /// Last access time
    #[inline]
    pub fn last_access(&self) -> Instant {
        self.last_access
    }

    /// Creation time
    #[inline]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Record an access
    #[inline]
    pub fn touch(&mut self) {
        self.last_access = Instant::now();
    }

    /// Refresh prediction confidence
    #[inline]
    pub fn set_probability(&mut self, probability: f64) {
        self.probability = clamp_probability(probability);
    }

    pub(crate) fn set_tier(&mut self, tier: TierLevel) {
        self.tier = tier;
    }

    #[cfg(test)]
    pub(crate) fn set_last_access(&mut self, at: Instant) {
        self.last_access = at;
    }

    /// Serializable summary without the audio payload
    pub fn info(&self) -> EntryInfo {
        EntryInfo {
            track_id: self.key.track_id().to_string(),
            chunk_index: self.key.chunk_index(),
            preset: self.key.preset(),
            intensity: self.key.intensity(),
            tier: self.tier,
            size_bytes: self.size_bytes(),
            probability: self.probability,
            age_ms: self.created_at.elapsed().as_millis() as u64,
            idle_ms: self.last_access.elapsed().as_millis() as u64,
        }
    }
}

#[inline]
fn clamp_probability(p: f64) -> f64 {
    if p.is_nan() {
        0.0
    } else {
        p.clamp(0.0, 1.0)
    }
}

impl std::fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("key", &self.key.to_string())
            .field("size", &self.size_bytes())
            .field("tier", &self.tier)
            .field("probability", &self.probability)
            .finish()
    }
}

/// Debug listing row for one cached chunk
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryInfo {
    pub track_id: String,
    pub chunk_index: u32,
    pub preset: Preset,
    pub intensity: f32,
    pub tier: TierLevel,
    pub size_bytes: u64,
    pub probability: f64,
    pub age_ms: u64,
    pub idle_ms: u64,
}

// =============================================================================
// Tests
// =============================================================================
