use ledgerlens_core::CoreError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A detector rejecting its own configuration.
///
/// Displays as the detector's message alone so callers can surface it untouched.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct ParamError {
    /// Offending parameter, when the detector can name one.
    pub field: Option<String>,
    pub message: String,
}

impl ParamError {
    pub fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: Some(field.to_string()),
            message: message.into(),
        }
    }

    /// Deserialization failure with no single parameter to blame.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self {
            field: None,
            message: message.into(),
        }
    }
}

/// Strategy problems detected before any transaction is scored.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{field}: strategy must list at least one detector")]
    EmptyStrategy { field: String },

    #[error("{field}: every detector is disabled")]
    NoEnabledDetectors { field: String },

    #[error("{field}: unknown detector {category}.{name}")]
    UnknownDetector {
        field: String,
        category: String,
        name: String,
    },

    #[error("{field}: detector {detector} is configured more than once")]
    DuplicateDetector { field: String, detector: String },

    #[error("{field} ({detector}): {source}")]
    InvalidParameter {
        field: String,
        detector: String,
        source: ParamError,
    },

    #[error("{field}: {message}")]
    InvalidAggregation { field: String, message: String },

    #[error("Strategy parse error: {0}")]
    Parse(String),

    #[error("Failed to read strategy {path}: {message}")]
    Read { path: String, message: String },
}

impl ConfigError {
    /// Path of the offending strategy field, if the error points at one.
    pub fn field(&self) -> Option<&str> {
        match self {
            ConfigError::EmptyStrategy { field }
            | ConfigError::NoEnabledDetectors { field }
            | ConfigError::UnknownDetector { field, .. }
            | ConfigError::DuplicateDetector { field, .. }
            | ConfigError::InvalidParameter { field, .. }
            | ConfigError::InvalidAggregation { field, .. } => Some(field),
            ConfigError::Parse(_) | ConfigError::Read { .. } => None,
        }
    }
}

/// One detector that did not contribute to a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetectorFailure {
    pub detector: String,
    pub error: String,
}

/// Error type for scoring.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DetectError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Invalid input: {0}")]
    InvalidInput(#[from] CoreError),

    #[error("Detector {detector} failed: {message}")]
    Execution { detector: String, message: String },

    #[error("All {} detectors failed", .failures.len())]
    AllDetectorsFailed { failures: Vec<DetectorFailure> },

    #[error("Model has not been fitted")]
    NotFitted,

    #[error("Feature dimension mismatch: model expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

impl DetectError {
    pub fn execution(detector: impl Into<String>, message: impl Into<String>) -> Self {
        DetectError::Execution {
            detector: detector.into(),
            message: message.into(),
        }
    }
}
