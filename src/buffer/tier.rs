//! Cache Tiers
//!
//! A tier is a byte-budgeted map of processed chunks. Insertion evicts the
//! lowest-ranked entries (see [`super::policy::eviction_order`]) until the new
//! entry fits; eviction and insertion happen under one lock so readers never
//! observe a partially evicted tier.

use std::collections::HashMap;
use std::str::FromStr;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace};

use super::entry::{CacheEntry, ChunkKey, EntryInfo};
use super::metrics::{TierCounterSnapshot, TierCounters};
use super::policy::eviction_order;
use crate::error::{Error, Result};

/// Cache tier level; ordering follows urgency (`Hot` is greatest)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierLevel {
    /// Background fill for the active preset further ahead
    Cold,
    /// Near look-ahead for predicted presets
    Warm,
    /// Must be ready for immediate playback
    Hot,
}

impl TierLevel {
    /// Every tier, hottest first
    pub const ALL: [TierLevel; 3] = [TierLevel::Hot, TierLevel::Warm, TierLevel::Cold];

    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            TierLevel::Hot => "hot",
            TierLevel::Warm => "warm",
            TierLevel::Cold => "cold",
        }
    }
}

impl std::fmt::Display for TierLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TierLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hot" => Ok(TierLevel::Hot),
            "warm" => Ok(TierLevel::Warm),
            "cold" => Ok(TierLevel::Cold),
            _ => Err(Error::UnknownTier(s.to_string())),
        }
    }
}

#[derive(Default)]
struct TierState {
    entries: HashMap<ChunkKey, CacheEntry>,
    used_bytes: u64,
}

impl TierState {
    fn take(&mut self, key: &ChunkKey) -> Option<CacheEntry> {
        let removed = self.entries.remove(key)?;
        self.used_bytes -= removed.size_bytes();
        Some(removed)
    }

    /// Keys of the `n` lowest-ranked entries
    fn victims(&self, n: usize) -> Vec<ChunkKey> {
        let mut ranked: Vec<&CacheEntry> = self.entries.values().collect();
        ranked.sort_by(|a, b| eviction_order(a, b));
        ranked.into_iter().take(n).map(|e| e.key().clone()).collect()
    }
}

/// One byte-budgeted cache tier
pub struct CacheTier {
    level: TierLevel,
    capacity_bytes: u64,
    state: Mutex<TierState>,
    counters: TierCounters,
}

impl CacheTier {
    /// Create an empty tier
    pub fn new(level: TierLevel, capacity_bytes: u64) -> Self {
        Self {
            level,
            capacity_bytes,
            state: Mutex::new(TierState::default()),
            counters: TierCounters::new(),
        }
    }

    /// Tier level
    pub fn level(&self) -> TierLevel {
        self.level
    }

    /// Configured byte budget
    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }

    /// Bytes currently held
    pub fn used_bytes(&self) -> u64 {
        self.state.lock().used_bytes
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Whether the tier holds no entries
    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Traffic counters
    pub fn counters(&self) -> &TierCounters {
        &self.counters
    }

    /// Insert `entry`, evicting until it fits. Returns the evicted keys.
    ///
    /// An entry larger than the whole tier is rejected with
    /// [`Error::Capacity`]. Re-inserting an existing key replaces it.
    pub fn add(&self, mut entry: CacheEntry) -> Result<Vec<ChunkKey>> {
        let size = entry.size_bytes();
        if size > self.capacity_bytes {
            self.counters.record_rejection();
            error!(
                tier = %self.level,
                key = %entry.key(),
                size,
                capacity = self.capacity_bytes,
                "Entry exceeds tier capacity"
            );
            return Err(Error::Capacity {
                tier: self.level.to_string(),
                size,
                capacity: self.capacity_bytes,
            });
        }

        entry.set_tier(self.level);

        let mut state = self.state.lock();
        state.take(entry.key());

        let mut evicted = Vec::new();
        if state.used_bytes + size > self.capacity_bytes {
            let mut victims = state.victims(state.entries.len()).into_iter();
            while state.used_bytes + size > self.capacity_bytes {
                let Some(key) = victims.next() else { break };
                state.take(&key);
                evicted.push(key);
            }
        }

        state.used_bytes += size;
        state.entries.insert(entry.key().clone(), entry);
        drop(state);

        self.counters.record_insertion();
        if !evicted.is_empty() {
            self.counters.record_evictions(evicted.len() as u64);
            debug!(tier = %self.level, evicted = evicted.len(), "Evicted entries to make room");
        }
        Ok(evicted)
    }

    /// Look up `key`, recording the access
    pub fn get(&self, key: &ChunkKey) -> Option<CacheEntry> {
        let mut state = self.state.lock();
        match state.entries.get_mut(key) {
            Some(entry) => {
                entry.touch();
                self.counters.record_hit();
                Some(entry.clone())
            }
            None => {
                self.counters.record_miss();
                None
            }
        }
    }

    /// Look up `key` without touching access time or counters
    pub fn peek(&self, key: &ChunkKey) -> Option<CacheEntry> {
        self.state.lock().entries.get(key).cloned()
    }

    /// Whether `key` is present
    pub fn contains(&self, key: &ChunkKey) -> bool {
        self.state.lock().entries.contains_key(key)
    }

    /// Remove `key`
    pub fn remove(&self, key: &ChunkKey) -> Option<CacheEntry> {
        self.state.lock().take(key)
    }

    /// Remove the `n` lowest-ranked entries
    pub fn evict(&self, n: usize) -> Vec<ChunkKey> {
        let mut state = self.state.lock();
        let victims = state.victims(n);
        for key in &victims {
            state.take(key);
        }
        drop(state);

        if !victims.is_empty() {
            self.counters.record_evictions(victims.len() as u64);
            trace!(tier = %self.level, count = victims.len(), "Evicted entries");
        }
        victims
    }

    /// Remove every entry. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let mut state = self.state.lock();
        let removed = state.entries.len();
        state.entries.clear();
        state.used_bytes = 0;
        removed
    }

    /// Update the stored probability for `key`. Returns false on a miss.
    pub fn refresh_probability(&self, key: &ChunkKey, probability: f64) -> bool {
        match self.state.lock().entries.get_mut(key) {
            Some(entry) => {
                entry.set_probability(probability);
                true
            }
            None => false,
        }
    }

    /// Debug listing of entries belonging to `track_id`, ordered by chunk
    pub fn entries_for_track(&self, track_id: &str) -> Vec<EntryInfo> {
        let state = self.state.lock();
        let mut infos: Vec<EntryInfo> = state
            .entries
            .values()
            .filter(|e| e.key().track_id() == track_id)
            .map(CacheEntry::info)
            .collect();
        infos.sort_by(|a, b| {
            a.chunk_index
                .cmp(&b.chunk_index)
                .then_with(|| a.preset.cmp(&b.preset))
        });
        infos
    }

    /// Aggregate statistics
    pub fn stats(&self) -> TierStats {
        let (used_bytes, entries) = {
            let state = self.state.lock();
            (state.used_bytes, state.entries.len())
        };
        TierStats {
            tier: self.level,
            used_bytes,
            capacity_bytes: self.capacity_bytes,
            entries,
            utilization: if self.capacity_bytes == 0 {
                0.0
            } else {
                used_bytes as f64 / self.capacity_bytes as f64
            },
            counters: self.counters.snapshot(),
        }
    }

    #[cfg(test)]
    fn entry_bytes(&self) -> u64 {
        self.state
            .lock()
            .entries
            .values()
            .map(CacheEntry::size_bytes)
            .sum()
    }
}

impl std::fmt::Debug for CacheTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheTier")
            .field("level", &self.level)
            .field("capacity_bytes", &self.capacity_bytes)
            .field("used_bytes", &self.used_bytes())
            .finish()
    }
}

/// Per-tier statistics for the management surface
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierStats {
    pub tier: TierLevel,
    pub used_bytes: u64,
    pub capacity_bytes: u64,
    pub entries: usize,
    pub utilization: f64,
    pub counters: TierCounterSnapshot,
}

// =============================================================================
// Tests
// =============================================================================
