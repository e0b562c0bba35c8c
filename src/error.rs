//! Error types for windowed flow training

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Window size {window_size} is invalid for a store of {num_records} records")]
    InvalidWindowSize {
        window_size: usize,
        num_records: usize,
    },

    #[error("Epoch steps must be less or at least equal to {available}, got {requested}")]
    EpochStepsExceeded { requested: usize, available: usize },

    #[error("A metric must be provided before testing")]
    MissingMetric,

    #[error("Unknown hook event: {0}")]
    UnknownHook(String),

    #[error("Hook '{event}' failed: {message}")]
    Hook { event: String, message: String },

    #[error("Weights file not found: {0:?}")]
    MissingWeights(PathBuf),

    #[error("Data error: {0}")]
    Data(String),

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FlowError {
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn data(msg: impl Into<String>) -> Self {
        Self::Data(msg.into())
    }

    /// Configuration errors are raised before any work is done and never retried.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig(_)
                | Self::InvalidWindowSize { .. }
                | Self::EpochStepsExceeded { .. }
                | Self::MissingMetric
                | Self::UnknownHook(_)
        )
    }

    /// Resource errors come from the filesystem (checkpoints, weights, datasets).
    pub fn is_resource(&self) -> bool {
        matches!(self, Self::MissingWeights(_) | Self::Io(_))
    }
}
