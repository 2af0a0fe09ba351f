//! Strategy documents: which detectors run and how their scores are fused.
//!
//! Strategies load from YAML or JSON. Field names of the legacy
//! configuration format are accepted as aliases:
//! - `algorithms` for `detectors`
//! - `type` for `category`
//! - `global_settings` for `aggregation`
//! - `aggregation_method` for `method`

use std::fmt;
use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::detector::DetectorConfig;
use crate::error::ConfigError;

// ── Detector entries ────────────────────────────────────────────────

/// One `{category, name, enabled, config}` item of a strategy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetectorEntry {
    #[serde(alias = "type")]
    pub category: String,
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub config: DetectorConfig,
}

fn default_enabled() -> bool {
    true
}

impl DetectorEntry {
    pub fn new(category: &str, name: &str) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            enabled: true,
            config: DetectorConfig::new(),
        }
    }

    /// Builder-style config insert.
    pub fn with(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.config.insert(key.to_string(), value.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// `category.name`
    pub fn key(&self) -> String {
        format!("{}.{}", self.category, self.name)
    }
}

// ── Aggregation ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMethod {
    #[default]
    Max,
    Min,
    Mean,
    WeightedAverage,
}

impl fmt::Display for AggregationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AggregationMethod::Max => "max",
            AggregationMethod::Min => "min",
            AggregationMethod::Mean => "mean",
            AggregationMethod::WeightedAverage => "weighted_average",
        };
        write!(f, "{s}")
    }
}

/// Which confidence to keep when `max`/`min` find several equal scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    #[default]
    HighestConfidence,
    LowestConfidence,
}

fn default_confidence_threshold() -> f64 {
    0.7
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggregationSettings {
    #[serde(default, alias = "aggregation_method")]
    pub method: AggregationMethod,
    /// `final_score >= confidence_threshold` marks a transaction anomalous.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    /// Per-category weights for `weighted_average`; missing categories weigh 1.0.
    #[serde(default)]
    pub weights: IndexMap<String, f64>,
    #[serde(default)]
    pub tie_break: TieBreak,
}

impl Default for AggregationSettings {
    fn default() -> Self {
        Self {
            method: AggregationMethod::default(),
            confidence_threshold: default_confidence_threshold(),
            weights: IndexMap::new(),
            tie_break: TieBreak::default(),
        }
    }
}

impl AggregationSettings {
    pub fn weight(&self, category: &str) -> f64 {
        self.weights.get(category).copied().unwrap_or(1.0)
    }
}

// ── Strategy ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Strategy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, alias = "algorithms")]
    pub detectors: Vec<DetectorEntry>,
    #[serde(default, alias = "global_settings")]
    pub aggregation: AggregationSettings,
}

impl Strategy {
    pub fn new(detectors: Vec<DetectorEntry>) -> Self {
        Self {
            detectors,
            ..Default::default()
        }
    }

    pub fn with_aggregation(mut self, aggregation: AggregationSettings) -> Self {
        self.aggregation = aggregation;
        self
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load a strategy file; `.json` is parsed as JSON, anything else as YAML.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json_str(&contents)
        } else {
            Self::from_yaml_str(&contents)
        }
    }

    /// Enabled entries with their position in `detectors`.
    pub fn enabled(&self) -> impl Iterator<Item = (usize, &DetectorEntry)> {
        self.detectors.iter().enumerate().filter(|(_, d)| d.enabled)
    }
}
