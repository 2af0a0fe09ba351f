//! Strategy validation with structured errors and suggestions.
//!
//! Unlike [`DetectorRegistry::resolve`](crate::DetectorRegistry::resolve),
//! which stops at the first problem, validation reports every error (blocks
//! execution) and every warning (advisory) with the path of the offending
//! field.

use serde::{Deserialize, Serialize};

use crate::detector::DetectorKind;
use crate::error::ConfigError;
use crate::registry::{DetectorRegistry, StrategyPlan};
use crate::strategy::{AggregationMethod, Strategy};

// ── Result types ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

/// A blocking validation error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationError {
    /// Path-like location, e.g. `"detectors[1].config.threshold"`.
    pub path: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationReport {
    fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn error(&mut self, path: impl Into<String>, message: impl Into<String>, suggestion: Option<String>) {
        self.valid = false;
        self.errors.push(ValidationError {
            path: path.into(),
            message: message.into(),
            suggestion,
        });
    }

    fn warn(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ValidationWarning {
            path: path.into(),
            message: message.into(),
        });
    }
}

// ── Public API ──────────────────────────────────────────────────────

/// Validate a parsed strategy, optionally against a batch size.
pub fn validate_strategy(
    registry: &DetectorRegistry,
    strategy: &Strategy,
    transactions: Option<usize>,
) -> ValidationReport {
    let mut report = ValidationReport::new();
    let (detectors, errors) = registry.check(strategy);

    for err in &errors {
        let suggestion = match err {
            ConfigError::UnknownDetector { category, name, .. } => {
                suggest_detector(&format!("{category}.{name}"))
            }
            _ => None,
        };
        report.error(err.field().unwrap_or(""), err.to_string(), suggestion);
    }

    for (index, entry) in strategy.detectors.iter().enumerate() {
        let path = format!("detectors[{index}]");
        if !entry.enabled {
            report.warn(&path, format!("{} is disabled", entry.key()));
        } else if entry.config.is_empty() {
            report.warn(&path, format!("{} uses its default configuration", entry.key()));
        }
    }

    let aggregation = &strategy.aggregation;
    if aggregation.method == AggregationMethod::WeightedAverage && aggregation.weights.is_empty() {
        report.warn(
            "aggregation.weights",
            "weighted_average without weights; every category weighs 1.0",
        );
    }
    for category in aggregation.weights.keys() {
        let used = strategy
            .enabled()
            .any(|(_, entry)| &entry.category == category);
        if !used {
            report.warn(
                format!("aggregation.weights.{category}"),
                format!("no enabled detector belongs to category '{category}'"),
            );
        }
    }

    if let Some(n) = transactions.filter(|_| errors.is_empty()) {
        let plan = StrategyPlan {
            detectors,
            aggregation: aggregation.clone(),
        };
        report.warnings.extend(registry.check_compatibility(&plan, n));
    }

    report
}

/// Parse raw YAML and validate; parse failures become a single root error.
pub fn validate_yaml(
    registry: &DetectorRegistry,
    yaml: &str,
    transactions: Option<usize>,
) -> ValidationReport {
    match Strategy::from_yaml_str(yaml) {
        Ok(strategy) => validate_strategy(registry, &strategy, transactions),
        Err(e) => {
            let mut report = ValidationReport::new();
            report.error("", e.to_string(), None);
            report
        }
    }
}

// ── Suggestions ─────────────────────────────────────────────────────

/// Closest known `category.name`, if it is a plausible typo.
fn suggest_detector(input: &str) -> Option<String> {
    let input = input.to_lowercase();
    DetectorKind::ALL
        .into_iter()
        .map(|k| {
            let key = k.key();
            (levenshtein(&input, &key), key)
        })
        .min_by_key(|(dist, _)| *dist)
        .filter(|(dist, key)| *dist <= input.len().max(key.len()) / 2)
        .map(|(_, key)| format!("Did you mean '{key}'?"))
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for i in 1..=a.len() {
        curr[0] = i;
        for j in 1..=b.len() {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}
