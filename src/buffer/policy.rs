//! Eviction and Prefetch Policies
//!
//! Eviction ranks entries by `(probability, last_access)` ascending: low
//! confidence predictions go first, then the least recently used.
//!
//! Prefetch decides which `(chunk, preset)` pairs each planning pass wants
//! and in which tier:
//!
//! | tier | preset | offsets from current chunk |
//! |------|--------|----------------------------|
//! | Hot  | current | `0..=hot_lookahead` |
//! | Hot  | predicted, probability above floor | `0` |
//! | Warm | predicted, probability above zero | `warm_lookahead` |
//! | Cold | current | `cold_lookahead` |

use std::cmp::Ordering;
use std::collections::HashMap;
use std::ops::RangeInclusive;

use super::entry::CacheEntry;
use super::tier::TierLevel;
use crate::config::BufferConfig;
use crate::predict::{Prediction, Preset};

/// Queue priority of a work item; the target tier doubles as its urgency
pub type WorkPriority = TierLevel;

/// Order in which entries are evicted (first = evicted first)
pub fn eviction_order(a: &CacheEntry, b: &CacheEntry) -> Ordering {
    a.probability()
        .total_cmp(&b.probability())
        .then_with(|| a.last_access().cmp(&b.last_access()))
}

/// One chunk the planner wants cached
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlannedChunk {
    pub chunk_index: u32,
    pub preset: Preset,
    pub tier: TierLevel,
    pub probability: f64,
}

/// Look-ahead layout derived from [`BufferConfig`]
#[derive(Debug, Clone, PartialEq)]
pub struct PrefetchPolicy {
    pub hot_lookahead: u32,
    pub warm_lookahead: RangeInclusive<u32>,
    pub cold_lookahead: RangeInclusive<u32>,
    pub predicted_presets: usize,
    pub hot_probability_floor: f64,
}

impl Default for PrefetchPolicy {
    fn default() -> Self {
        Self::from(&BufferConfig::default())
    }
}

impl From<&BufferConfig> for PrefetchPolicy {
    fn from(config: &BufferConfig) -> Self {
        Self {
            hot_lookahead: config.hot_lookahead,
            warm_lookahead: config.warm_lookahead.clone(),
            cold_lookahead: config.cold_lookahead.clone(),
            predicted_presets: config.predicted_presets,
            hot_probability_floor: config.hot_probability_floor,
        }
    }
}

impl PrefetchPolicy {
    /// Plan coverage around `current_chunk`.
    ///
    /// `predictions` may include the current preset; it is skipped. Chunks at
    /// or past `chunk_count` are dropped. A pair planned for several tiers
    /// keeps the hottest one. Output is ordered hottest first, then in
    /// planning order.
    pub fn plan(
        &self,
        current_chunk: u32,
        current: Preset,
        predictions: &[Prediction],
        chunk_count: Option<u32>,
    ) -> Vec<PlannedChunk> {
        let mut planner = Planner::new(current_chunk, chunk_count);

        for offset in 0..=self.hot_lookahead {
            planner.push(offset, current, TierLevel::Hot, 1.0);
        }

        // A preset the model never saw follow `current` is not a prediction
        let predicted: Vec<&Prediction> = predictions
            .iter()
            .filter(|p| p.preset != current && p.probability > 0.0)
            .take(self.predicted_presets)
            .collect();

        for p in &predicted {
            if p.probability > self.hot_probability_floor {
                planner.push(0, p.preset, TierLevel::Hot, p.probability);
            }
        }

        for p in &predicted {
            for offset in self.warm_lookahead.clone() {
                planner.push(offset, p.preset, TierLevel::Warm, p.probability);
            }
        }

        // Further chunks matter less the further out they are
        for offset in self.cold_lookahead.clone() {
            planner.push(offset, current, TierLevel::Cold, 1.0 / offset.max(1) as f64);
        }

        planner.finish()
    }
}

struct Planner {
    current_chunk: u32,
    chunk_count: Option<u32>,
    chunks: Vec<PlannedChunk>,
    index: HashMap<(u32, Preset), usize>,
}

impl Planner {
    fn new(current_chunk: u32, chunk_count: Option<u32>) -> Self {
        Self {
            current_chunk,
            chunk_count,
            chunks: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn push(&mut self, offset: u32, preset: Preset, tier: TierLevel, probability: f64) {
        let Some(chunk_index) = self.current_chunk.checked_add(offset) else {
            return;
        };
        if self.chunk_count.is_some_and(|count| chunk_index >= count) {
            return;
        }

        match self.index.get(&(chunk_index, preset)) {
            Some(&i) => {
                let existing = &mut self.chunks[i];
                if tier > existing.tier {
                    existing.tier = tier;
                }
                existing.probability = existing.probability.max(probability);
            }
            None => {
                self.index.insert((chunk_index, preset), self.chunks.len());
                self.chunks.push(PlannedChunk {
                    chunk_index,
                    preset,
                    tier,
                    probability,
                });
            }
        }
    }

    fn finish(mut self) -> Vec<PlannedChunk> {
        // Stable: keeps planning order within a tier
        self.chunks.sort_by(|a, b| b.tier.cmp(&a.tier));
        self.chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::entry::ChunkKey;
    use bytes::Bytes;
    use std::time::{Duration, Instant};

    fn predictions(pairs: &[(Preset, f64)]) -> Vec<Prediction> {
        pairs
            .iter()
            .map(|&(preset, probability)| Prediction { preset, probability })
            .collect()
    }

    fn count(plan: &[PlannedChunk], tier: TierLevel) -> usize {
        plan.iter().filter(|c| c.tier == tier).count()
    }

    #[test]
    fn test_eviction_order() {
        let base = Instant::now();
        let key = ChunkKey::new("t", 0, Preset::Adaptive, 1.0);
        let mut low = CacheEntry::new(key.clone(), Bytes::new(), TierLevel::Hot, 0.1);
        let mut high = CacheEntry::new(key.with_chunk(1), Bytes::new(), TierLevel::Hot, 0.9);
        low.set_last_access(base + Duration::from_secs(5));
        high.set_last_access(base);
        assert_eq!(eviction_order(&low, &high), Ordering::Less);

        let mut older = CacheEntry::new(key.with_chunk(2), Bytes::new(), TierLevel::Hot, 0.1);
        older.set_last_access(base);
        assert_eq!(eviction_order(&older, &low), Ordering::Less);
    }

    #[test]
    fn test_default_plan_layout() {
        let policy = PrefetchPolicy::default();
        let preds = predictions(&[
            (Preset::Adaptive, 0.4),
            (Preset::Punchy, 0.3),
            (Preset::Warm, 0.2),
            (Preset::Bright, 0.05),
            (Preset::Gentle, 0.05),
        ]);
        let plan = policy.plan(4, Preset::Adaptive, &preds, None);

        // current + next, plus punchy/warm at offset 0 (bright is under the floor)
        assert_eq!(count(&plan, TierLevel::Hot), 4);
        // punchy, warm, bright at offsets 1..=2
        assert_eq!(count(&plan, TierLevel::Warm), 6);
        // offsets 3..=10 for adaptive
        assert_eq!(count(&plan, TierLevel::Cold), 8);

        assert_eq!(plan[0].tier, TierLevel::Hot);
        assert_eq!(plan[0].chunk_index, 4);
        assert_eq!(plan[0].preset, Preset::Adaptive);
        assert!(plan
            .iter()
            .filter(|c| c.tier == TierLevel::Cold)
            .all(|c| c.preset == Preset::Adaptive && (7..=14).contains(&c.chunk_index)));
        assert!(!plan
            .iter()
            .any(|c| c.preset == Preset::Bright && c.tier == TierLevel::Hot));
    }

    #[test]
    fn test_unseen_presets_are_not_planned() {
        let policy = PrefetchPolicy::default();
        let preds = predictions(&[
            (Preset::Punchy, 1.0),
            (Preset::Adaptive, 0.0),
            (Preset::Bright, 0.0),
            (Preset::Gentle, 0.0),
            (Preset::Warm, 0.0),
        ]);
        let plan = policy.plan(0, Preset::Adaptive, &preds, None);

        assert_eq!(count(&plan, TierLevel::Warm), 2);
        assert!(plan
            .iter()
            .filter(|c| c.tier == TierLevel::Warm)
            .all(|c| c.preset == Preset::Punchy && c.probability == 1.0));
        assert_eq!(count(&plan, TierLevel::Hot), 3);
        assert!(plan
            .iter()
            .all(|c| matches!(c.preset, Preset::Adaptive | Preset::Punchy)));
    }

    #[test]
    fn test_plan_respects_track_length() {
        let policy = PrefetchPolicy::default();
        let plan = policy.plan(2, Preset::Warm, &[], Some(4));
        assert!(plan.iter().all(|c| c.chunk_index < 4));
        assert_eq!(count(&plan, TierLevel::Hot), 2);
        assert_eq!(count(&plan, TierLevel::Cold), 0);
    }

    #[test]
    fn test_overlapping_offsets_keep_hottest_tier() {
        let policy = PrefetchPolicy {
            hot_lookahead: 4,
            ..PrefetchPolicy::default()
        };
        let plan = policy.plan(0, Preset::Gentle, &[], None);
        let chunk3: Vec<_> = plan.iter().filter(|c| c.chunk_index == 3).collect();
        assert_eq!(chunk3.len(), 1);
        assert_eq!(chunk3[0].tier, TierLevel::Hot);
    }

    #[test]
    fn test_plan_near_u32_max() {
        let policy = PrefetchPolicy::default();
        let plan = policy.plan(u32::MAX, Preset::Adaptive, &[], None);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].chunk_index, u32::MAX);
    }
}
