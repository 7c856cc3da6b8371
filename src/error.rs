//! Error types for the chunk pre-buffering engine

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while buffering processed audio chunks
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Cache Errors
    // =========================================================================
    /// Entry larger than the whole tier
    #[error("Entry of {size} bytes exceeds {tier} tier capacity of {capacity} bytes")]
    Capacity {
        tier: String,
        size: u64,
        capacity: u64,
    },

    /// Unknown tier name
    #[error("Unknown cache tier: {0}")]
    UnknownTier(String),

    // =========================================================================
    // Validation Errors
    // =========================================================================
    /// Track identifier was empty
    #[error("Track ID must not be empty")]
    EmptyTrackId,

    /// Playback position was negative or not finite
    #[error("Invalid playback position: {0}")]
    InvalidPosition(f64),

    /// Processing intensity outside [0, 1]
    #[error("Invalid processing intensity: {0}")]
    InvalidIntensity(f32),

    /// Preset name not in the known set
    #[error("Unknown preset: {0}")]
    UnknownPreset(String),

    // =========================================================================
    // Collaborator Errors
    // =========================================================================
    /// Chunk processor failed
    #[error("Processing failed for {key}: {reason}")]
    Processing { key: String, reason: String },

    /// Decoded samples could not be loaded for analysis
    #[error("Sample source error: {0}")]
    SampleSource(String),

    // =========================================================================
    // Worker Errors
    // =========================================================================
    /// Illegal worker lifecycle transition
    #[error("Worker state error: {0}")]
    WorkerState(String),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Duration parse error
    #[error("Failed to parse duration: {0}")]
    DurationParse(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML configuration could not be parsed
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // =========================================================================
    // Monitoring Errors
    // =========================================================================
    /// Prometheus registry or encoding failure
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for errors caused by caller input rather than engine state
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::EmptyTrackId
                | Error::InvalidPosition(_)
                | Error::InvalidIntensity(_)
                | Error::UnknownPreset(_)
                | Error::UnknownTier(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_message() {
        let err = Error::Capacity {
            tier: "hot".to_string(),
            size: 20,
            capacity: 10,
        };
        assert_eq!(
            err.to_string(),
            "Entry of 20 bytes exceeds hot tier capacity of 10 bytes"
        );
    }

    #[test]
    fn test_validation_classification() {
        assert!(Error::EmptyTrackId.is_validation());
        assert!(Error::InvalidPosition(-1.0).is_validation());
        assert!(!Error::Internal("x".to_string()).is_validation());
    }
}
