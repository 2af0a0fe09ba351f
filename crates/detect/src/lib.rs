//! Transaction anomaly detection.
//!
//! - [`detectors`]: the five scoring algorithms
//! - [`registry`]: strategy entries to typed detector plans
//! - [`strategy`]: strategy documents (YAML / JSON)
//! - [`validation`]: full strategy reports with paths and suggestions
//! - [`engine`]: runs a plan and fuses the scores
//! - [`presets`]: built-in strategies

pub mod aggregate;
pub mod detector;
pub mod detectors;
pub mod engine;
pub mod error;
pub mod presets;
pub mod registry;
pub mod stats;
pub mod strategy;
pub mod validation;

pub use aggregate::{AggregatedScore, DetectorScore};
pub use detector::{Detector, DetectorConfig, DetectorKind};
pub use engine::{AnalysisEngine, AnalysisOutcome, DetectorExecution, RunSummary};
pub use error::{ConfigError, DetectError, DetectorFailure, ParamError};
pub use registry::{ConfiguredDetector, DetectorInfo, DetectorParams, DetectorRegistry, StrategyPlan};
pub use strategy::{AggregationMethod, AggregationSettings, DetectorEntry, Strategy, TieBreak};
pub use validation::{ValidationReport, ValidationWarning};
