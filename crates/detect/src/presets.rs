//! Built-in strategies shipped with the binary.
//!
//! The YAML sources live under `data/strategies/` and are embedded at
//! compile time.

use crate::error::ConfigError;
use crate::strategy::Strategy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preset {
    pub name: &'static str,
    pub description: &'static str,
    pub source: &'static str,
}

impl Preset {
    pub fn strategy(&self) -> Result<Strategy, ConfigError> {
        Strategy::from_yaml_str(self.source)
    }
}

const PRESETS: &[Preset] = &[
    Preset {
        name: "basic-statistical",
        description: "Simple z-score detection with standard thresholds",
        source: include_str!("../../../data/strategies/basic-statistical.yml"),
    },
    Preset {
        name: "comprehensive",
        description: "Statistical, rule-based and ML detectors fused by category weight",
        source: include_str!("../../../data/strategies/comprehensive.yml"),
    },
    Preset {
        name: "rule-based",
        description: "Domain rules only",
        source: include_str!("../../../data/strategies/rule-based.yml"),
    },
];

pub fn all() -> &'static [Preset] {
    PRESETS
}

pub fn find(name: &str) -> Option<&'static Preset> {
    PRESETS.iter().find(|p| p.name == name)
}

/// Parse a preset by name.
pub fn load(name: &str) -> Result<Strategy, ConfigError> {
    match find(name) {
        Some(preset) => preset.strategy(),
        None => Err(ConfigError::Parse(format!(
            "unknown preset '{name}' (available: {})",
            PRESETS.iter().map(|p| p.name).collect::<Vec<_>>().join(", ")
        ))),
    }
}
