//! External Collaborators
//!
//! The buffer never renders audio itself. [`ChunkProcessor`] turns a chunk
//! key into processed bytes and [`SampleSource`] supplies decoded samples for
//! content analysis. Synthetic implementations drive the demo binary and
//! tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{Error, Result};
use crate::predict::Preset;

/// Renders one chunk of a track with a preset and intensity.
///
/// Called by a single worker at a time. Errors are opaque to the buffer:
/// they are logged and the work item is dropped.
#[async_trait]
pub trait ChunkProcessor: Send + Sync {
    async fn process(
        &self,
        track_id: &str,
        chunk_index: u32,
        preset: Preset,
        intensity: f32,
    ) -> Result<Bytes>;
}

/// Decoded, interleaved PCM for one chunk
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedChunk {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Supplies decoded samples for content analysis
pub trait SampleSource: Send + Sync {
    /// Decode `chunk_index` of `track_id`
    fn load(&self, track_id: &str, chunk_index: u32) -> Result<DecodedChunk>;

    /// Number of chunks in the track, if known
    fn chunk_count(&self, _track_id: &str) -> Option<u32> {
        None
    }
}

// =============================================================================
// Synthetic Processor
// =============================================================================

/// Deterministic stand-in for a real rendering pipeline
#[derive(Debug)]
pub struct SyntheticProcessor {
    chunk_bytes: usize,
    latency: Duration,
    failing_chunks: HashSet<u32>,
    calls: AtomicU64,
}

impl SyntheticProcessor {
    /// Produce `chunk_bytes` per chunk without delay
    pub fn new(chunk_bytes: usize) -> Self {
        Self {
            chunk_bytes,
            latency: Duration::ZERO,
            failing_chunks: HashSet::new(),
            calls: AtomicU64::new(0),
        }
    }

    /// Sleep this long per call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail every request for `chunk_index`
    pub fn failing_on(mut self, chunk_index: u32) -> Self {
        self.failing_chunks.insert(chunk_index);
        self
    }

    /// Number of `process` calls so far
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ChunkProcessor for SyntheticProcessor {
    async fn process(
        &self,
        track_id: &str,
        chunk_index: u32,
        preset: Preset,
        intensity: f32,
    ) -> Result<Bytes> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if self.failing_chunks.contains(&chunk_index) {
            return Err(Error::Processing {
                key: format!("{}#{}/{}", track_id, chunk_index, preset),
                reason: "synthetic failure".to_string(),
            });
        }

        let mut rng = XorShift::new(seed(
            track_id,
            chunk_index,
            preset.index() as u64,
            intensity.to_bits() as u64,
        ));
        let data: Vec<u8> = (0..self.chunk_bytes).map(|_| rng.next() as u8).collect();
        Ok(Bytes::from(data))
    }
}

// =============================================================================
// Synthetic Sample Source
// =============================================================================

/// Generates a per-track test signal so content analysis has material.
///
/// Each track hashes to a fixed profile (level, tone, noise mix and pulse
/// rate), so different tracks produce different features.
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    sample_rate: u32,
    clip: Duration,
    track_lengths: HashMap<String, u32>,
    broken_tracks: HashSet<String>,
}

impl SyntheticSource {
    /// `clip` of mono audio at `sample_rate` per chunk
    pub fn new(sample_rate: u32, clip: Duration) -> Self {
        Self {
            sample_rate,
            clip,
            track_lengths: HashMap::new(),
            broken_tracks: HashSet::new(),
        }
    }

    /// Declare `track_id` as `chunks` long
    pub fn with_track_length(mut self, track_id: impl Into<String>, chunks: u32) -> Self {
        self.track_lengths.insert(track_id.into(), chunks);
        self
    }

    /// Make every load for `track_id` fail
    pub fn with_broken_track(mut self, track_id: impl Into<String>) -> Self {
        self.broken_tracks.insert(track_id.into());
        self
    }
}

impl Default for SyntheticSource {
    fn default() -> Self {
        Self::new(22_050, Duration::from_secs(4))
    }
}

impl SampleSource for SyntheticSource {
    fn load(&self, track_id: &str, chunk_index: u32) -> Result<DecodedChunk> {
        if self.broken_tracks.contains(track_id) {
            return Err(Error::SampleSource(format!("cannot decode {}", track_id)));
        }
        if self.chunk_count(track_id).is_some_and(|n| chunk_index >= n) {
            return Err(Error::SampleSource(format!(
                "chunk {} is past the end of {}",
                chunk_index, track_id
            )));
        }

        let profile = seed(track_id, 0, 0, 0);
        let level = 0.05 + (profile % 90) as f32 / 100.0;
        let tone_hz = 110.0 + ((profile >> 8) % 2000) as f32;
        let noise_mix = ((profile >> 20) % 100) as f32 / 100.0;
        let bpm = 70.0 + ((profile >> 28) % 100) as f32;

        let sr = self.sample_rate as f32;
        let frames = (self.clip.as_secs_f64() * self.sample_rate as f64) as usize;
        let beat_period = (sr * 60.0 / bpm) as usize;
        let mut rng = XorShift::new(seed(track_id, chunk_index, 1, 0));

        let samples = (0..frames)
            .map(|i| {
                let t = i as f32 / sr;
                let tone = (2.0 * std::f32::consts::PI * tone_hz * t).sin();
                let noise = rng.next_f32() * 2.0 - 1.0;
                let pulse = if beat_period > 0 && i % beat_period < beat_period / 8 {
                    1.0
                } else {
                    0.4
                };
                level * pulse * ((1.0 - noise_mix) * tone + noise_mix * noise)
            })
            .collect();

        Ok(DecodedChunk {
            samples,
            sample_rate: self.sample_rate,
            channels: 1,
        })
    }

    fn chunk_count(&self, track_id: &str) -> Option<u32> {
        self.track_lengths.get(track_id).copied()
    }
}

fn seed(track_id: &str, chunk_index: u32, a: u64, b: u64) -> u64 {
    // FNV-1a
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    let bytes = track_id
        .bytes()
        .chain(chunk_index.to_le_bytes())
        .chain(a.to_le_bytes())
        .chain(b.to_le_bytes());
    for byte in bytes {
        h ^= byte as u64;
        h = h.wrapping_mul(0x0100_0000_01b3);
    }
    h
}

struct XorShift(u64);

impl XorShift {
    fn new(seed: u64) -> Self {
        Self(seed.max(1))
    }

    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn next_f32(&mut self) -> f32 {
        (self.next() >> 40) as f32 / (1u64 << 24) as f32
    }
}
