//! Next-Preset Prediction
//!
//! Learned switch statistics blended with cheap content analysis.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      BranchPredictor                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │  TransitionModel (from -> to counts)   weight: user_weight    │
//! │              +                                                │
//! │  AudioContentAnalyzer -> PresetAffinity  weight: 1 - user     │
//! │              │                                                │
//! │      renormalize -> rank (prob desc, name asc) -> top N       │
//! └──────────────────────────────────────────────────────────────┘
//! ```

mod analyzer;
mod branch;
mod preset;

pub use analyzer::{
    AffinityRules, AnalyzerConfig, AudioContentAnalyzer, AudioFeatures, PresetAffinity,
};
pub use branch::{
    BranchPredictor, Distribution, Prediction, SwitchGuard, SwitchOutcome, TransitionModel,
    TransitionSnapshot,
};
pub use preset::Preset;
