//! Detector registry: resolves strategy entries to typed, validated plans.
//!
//! The registry is an ordinary value owning one instance of every detector.
//! Resolution happens before any transaction is scored, so a bad strategy
//! never reaches execution.

use std::collections::HashSet;

use ledgerlens_core::{FeatureSet, ScoreRecord};
use serde::Serialize;
use serde_json::Value;

use crate::detector::{Detector, DetectorConfig, DetectorKind};
use crate::detectors::{
    CorrelationDetector, CorrelationParams, IsolationForestDetector, IsolationForestParams,
    TimeSeriesDetector, TimeSeriesParams, WeekendThresholdDetector, WeekendThresholdParams,
    ZScoreDetector, ZScoreParams,
};
use crate::error::{ConfigError, DetectError, ParamError};
use crate::strategy::{AggregationSettings, Strategy};
use crate::validation::{self, ValidationReport, ValidationWarning};

// ── Resolved plan ───────────────────────────────────────────────────

/// Typed, validated parameters for one detector.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DetectorParams {
    ZScore(ZScoreParams),
    Correlation(CorrelationParams),
    TimeSeries(TimeSeriesParams),
    WeekendThreshold(WeekendThresholdParams),
    IsolationForest(IsolationForestParams),
}

impl DetectorParams {
    pub fn kind(&self) -> DetectorKind {
        match self {
            DetectorParams::ZScore(_) => DetectorKind::ZScore,
            DetectorParams::Correlation(_) => DetectorKind::Correlation,
            DetectorParams::TimeSeries(_) => DetectorKind::TimeSeries,
            DetectorParams::WeekendThreshold(_) => DetectorKind::WeekendThreshold,
            DetectorParams::IsolationForest(_) => DetectorKind::IsolationForest,
        }
    }
}

/// An enabled strategy entry ready to run.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfiguredDetector {
    /// Position of the entry in the strategy's `detectors` list.
    pub index: usize,
    pub params: DetectorParams,
}

impl ConfiguredDetector {
    pub fn kind(&self) -> DetectorKind {
        self.params.kind()
    }

    pub fn key(&self) -> String {
        self.kind().key()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StrategyPlan {
    pub detectors: Vec<ConfiguredDetector>,
    pub aggregation: AggregationSettings,
}

/// Catalogue entry returned by [`DetectorRegistry::describe`].
#[derive(Debug, Clone, Serialize)]
pub struct DetectorInfo {
    pub category: &'static str,
    pub name: &'static str,
    pub default_config: Value,
    pub minimum_transactions: usize,
}

// ── Registry ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct DetectorRegistry {
    zscore: ZScoreDetector,
    correlation: CorrelationDetector,
    timeseries: TimeSeriesDetector,
    weekend: WeekendThresholdDetector,
    isolation_forest: IsolationForestDetector,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kinds(&self) -> &'static [DetectorKind] {
        &DetectorKind::ALL
    }

    pub fn lookup(&self, category: &str, name: &str) -> Option<DetectorKind> {
        DetectorKind::from_pair(category, name)
    }

    pub fn minimum_transactions(&self, kind: DetectorKind) -> usize {
        match kind {
            DetectorKind::ZScore => self.zscore.minimum_transactions(),
            DetectorKind::Correlation => self.correlation.minimum_transactions(),
            DetectorKind::TimeSeries => self.timeseries.minimum_transactions(),
            DetectorKind::WeekendThreshold => self.weekend.minimum_transactions(),
            DetectorKind::IsolationForest => self.isolation_forest.minimum_transactions(),
        }
    }

    /// Deserialize and validate one detector's config.
    pub fn parse(
        &self,
        kind: DetectorKind,
        config: &DetectorConfig,
    ) -> Result<DetectorParams, ParamError> {
        Ok(match kind {
            DetectorKind::ZScore => DetectorParams::ZScore(self.zscore.parse_config(config)?),
            DetectorKind::Correlation => {
                DetectorParams::Correlation(self.correlation.parse_config(config)?)
            }
            DetectorKind::TimeSeries => {
                DetectorParams::TimeSeries(self.timeseries.parse_config(config)?)
            }
            DetectorKind::WeekendThreshold => {
                DetectorParams::WeekendThreshold(self.weekend.parse_config(config)?)
            }
            DetectorKind::IsolationForest => {
                DetectorParams::IsolationForest(self.isolation_forest.parse_config(config)?)
            }
        })
    }

    pub fn default_params(&self, kind: DetectorKind) -> DetectorParams {
        match kind {
            DetectorKind::ZScore => DetectorParams::ZScore(ZScoreParams::default()),
            DetectorKind::Correlation => DetectorParams::Correlation(CorrelationParams::default()),
            DetectorKind::TimeSeries => DetectorParams::TimeSeries(TimeSeriesParams::default()),
            DetectorKind::WeekendThreshold => {
                DetectorParams::WeekendThreshold(WeekendThresholdParams::default())
            }
            DetectorKind::IsolationForest => {
                DetectorParams::IsolationForest(IsolationForestParams::default())
            }
        }
    }

    /// Every detector with its defaults, in registry order.
    pub fn describe(&self) -> Vec<DetectorInfo> {
        DetectorKind::ALL
            .into_iter()
            .map(|kind| DetectorInfo {
                category: kind.category(),
                name: kind.name(),
                default_config: serde_json::to_value(self.default_params(kind))
                    .unwrap_or_default(),
                minimum_transactions: self.minimum_transactions(kind),
            })
            .collect()
    }

    /// Resolve a strategy, stopping at the first problem.
    pub fn resolve(&self, strategy: &Strategy) -> Result<StrategyPlan, ConfigError> {
        let (detectors, mut errors) = self.check(strategy);
        if !errors.is_empty() {
            return Err(errors.swap_remove(0));
        }
        Ok(StrategyPlan {
            detectors,
            aggregation: strategy.aggregation.clone(),
        })
    }

    /// Validate without executing, collecting every problem plus advisories.
    pub fn validate(&self, strategy: &Strategy, transactions: Option<usize>) -> ValidationReport {
        validation::validate_strategy(self, strategy, transactions)
    }

    /// Resolve every entry, collecting all errors in strategy order.
    pub(crate) fn check(&self, strategy: &Strategy) -> (Vec<ConfiguredDetector>, Vec<ConfigError>) {
        let mut detectors = Vec::new();
        let mut errors = Vec::new();

        if strategy.detectors.is_empty() {
            errors.push(ConfigError::EmptyStrategy {
                field: "detectors".into(),
            });
            return (detectors, errors);
        }

        let mut seen = HashSet::new();
        for (index, entry) in strategy.detectors.iter().enumerate() {
            let field = format!("detectors[{index}]");
            let Some(kind) = self.lookup(&entry.category, &entry.name) else {
                errors.push(ConfigError::UnknownDetector {
                    field,
                    category: entry.category.clone(),
                    name: entry.name.clone(),
                });
                continue;
            };
            if !entry.enabled {
                continue;
            }
            if !seen.insert(kind) {
                errors.push(ConfigError::DuplicateDetector {
                    field,
                    detector: kind.key(),
                });
                continue;
            }
            match self.parse(kind, &entry.config) {
                Ok(params) => detectors.push(ConfiguredDetector { index, params }),
                Err(source) => errors.push(ConfigError::InvalidParameter {
                    field: match &source.field {
                        Some(param) => format!("{field}.config.{param}"),
                        None => format!("{field}.config"),
                    },
                    detector: kind.key(),
                    source,
                }),
            }
        }

        if strategy.enabled().next().is_none() {
            errors.push(ConfigError::NoEnabledDetectors {
                field: "detectors".into(),
            });
        }
        errors.extend(check_aggregation(&strategy.aggregation));
        (detectors, errors)
    }

    /// Advisory warnings for detectors expecting more rows than the batch has.
    pub fn check_compatibility(
        &self,
        plan: &StrategyPlan,
        transactions: usize,
    ) -> Vec<ValidationWarning> {
        plan.detectors
            .iter()
            .filter_map(|d| {
                let needed = self.minimum_transactions(d.kind());
                (transactions < needed).then(|| ValidationWarning {
                    path: format!("detectors[{}]", d.index),
                    message: format!(
                        "{} expects at least {needed} transactions, batch has {transactions}; \
                         scores will fall back to low confidence",
                        d.key()
                    ),
                })
            })
            .collect()
    }

    /// Run one configured detector against the shared feature set.
    pub fn run(
        &self,
        detector: &ConfiguredDetector,
        features: &FeatureSet,
    ) -> Result<Vec<ScoreRecord>, DetectError> {
        match &detector.params {
            DetectorParams::ZScore(p) => self.zscore.detect(features, p),
            DetectorParams::Correlation(p) => self.correlation.detect(features, p),
            DetectorParams::TimeSeries(p) => self.timeseries.detect(features, p),
            DetectorParams::WeekendThreshold(p) => self.weekend.detect(features, p),
            DetectorParams::IsolationForest(p) => self.isolation_forest.detect(features, p),
        }
    }
}

fn check_aggregation(settings: &AggregationSettings) -> Vec<ConfigError> {
    let mut errors = Vec::new();
    let threshold = settings.confidence_threshold;
    if !(0.0..=1.0).contains(&threshold) {
        errors.push(ConfigError::InvalidAggregation {
            field: "aggregation.confidence_threshold".into(),
            message: format!("confidence_threshold must be between 0 and 1, got {threshold}"),
        });
    }
    for (category, weight) in &settings.weights {
        if !weight.is_finite() || *weight < 0.0 {
            errors.push(ConfigError::InvalidAggregation {
                field: format!("aggregation.weights.{category}"),
                message: format!("weight must be a non-negative number, got {weight}"),
            });
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::DetectorEntry;
    use serde_json::json;

    #[test]
    fn resolves_enabled_entries_in_order() {
        let strategy = Strategy::new(vec![
            DetectorEntry::new("ml_based", "isolation_forest").with("n_estimators", 10),
            DetectorEntry::new("statistical", "correlation").disabled(),
            DetectorEntry::new("statistical", "zscore"),
        ]);
        let plan = DetectorRegistry::new().resolve(&strategy).unwrap();
        let kinds: Vec<_> = plan.detectors.iter().map(|d| (d.index, d.kind())).collect();
        assert_eq!(
            kinds,
            vec![(0, DetectorKind::IsolationForest), (2, DetectorKind::ZScore)]
        );
        match &plan.detectors[0].params {
            DetectorParams::IsolationForest(p) => assert_eq!(p.n_estimators, 10),
            other => panic!("unexpected params {other:?}"),
        }
    }

    #[test]
    fn empty_strategy_is_rejected() {
        let err = DetectorRegistry::new()
            .resolve(&Strategy::new(vec![]))
            .unwrap_err();
        assert_eq!(err.field(), Some("detectors"));
        assert!(matches!(err, ConfigError::EmptyStrategy { .. }));
    }

    #[test]
    fn all_disabled_is_rejected() {
        let strategy = Strategy::new(vec![DetectorEntry::new("statistical", "zscore").disabled()]);
        let err = DetectorRegistry::new().resolve(&strategy).unwrap_err();
        assert!(matches!(err, ConfigError::NoEnabledDetectors { .. }));
    }

    #[test]
    fn unknown_pair_names_the_entry() {
        let strategy = Strategy::new(vec![
            DetectorEntry::new("statistical", "zscore"),
            DetectorEntry::new("statistical", "isolation_forest"),
        ]);
        let err = DetectorRegistry::new().resolve(&strategy).unwrap_err();
        assert_eq!(err.field(), Some("detectors[1]"));
        assert_eq!(
            err.to_string(),
            "detectors[1]: unknown detector statistical.isolation_forest"
        );
    }

    #[test]
    fn detector_messages_are_carried_verbatim() {
        let strategy = Strategy::new(vec![
            DetectorEntry::new("statistical", "correlation").with("features", json!(["amount"])),
        ]);
        let err = DetectorRegistry::new().resolve(&strategy).unwrap_err();
        assert_eq!(err.field(), Some("detectors[0].config.features"));
        let ConfigError::InvalidParameter { source, detector, .. } = &err else {
            panic!("unexpected error {err:?}");
        };
        assert_eq!(detector, "statistical.correlation");
        assert_eq!(
            source.message,
            "At least 2 features required for correlation analysis"
        );
    }

    #[test]
    fn unknown_config_keys_are_rejected() {
        let strategy = Strategy::new(vec![
            DetectorEntry::new("statistical", "zscore").with("treshold", 2.0),
        ]);
        let err = DetectorRegistry::new().resolve(&strategy).unwrap_err();
        assert_eq!(err.field(), Some("detectors[0].config"));
        assert!(err.to_string().contains("treshold"));
    }

    #[test]
    fn duplicates_and_bad_aggregation() {
        let strategy = Strategy::new(vec![
            DetectorEntry::new("statistical", "zscore"),
            DetectorEntry::new("statistical", "zscore").with("threshold", 2.0),
        ]);
        let err = DetectorRegistry::new().resolve(&strategy).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateDetector { .. }));

        let mut strategy = Strategy::new(vec![DetectorEntry::new("statistical", "zscore")]);
        strategy.aggregation.confidence_threshold = 1.5;
        let err = DetectorRegistry::new().resolve(&strategy).unwrap_err();
        assert_eq!(err.field(), Some("aggregation.confidence_threshold"));
    }

    #[test]
    fn describe_lists_every_detector() {
        let infos = DetectorRegistry::new().describe();
        assert_eq!(infos.len(), 5);
        let zscore = &infos[0];
        assert_eq!((zscore.category, zscore.name), ("statistical", "zscore"));
        assert_eq!(zscore.default_config["threshold"], 3.0);
        assert_eq!(infos[4].default_config["max_samples"], "auto");
        assert_eq!(infos[4].minimum_transactions, 50);
    }

    #[test]
    fn compatibility_warns_on_small_batches() {
        let registry = DetectorRegistry::new();
        let strategy = Strategy::new(vec![
            DetectorEntry::new("statistical", "zscore"),
            DetectorEntry::new("ml_based", "isolation_forest"),
        ]);
        let plan = registry.resolve(&strategy).unwrap();
        let warnings = registry.check_compatibility(&plan, 12);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].path, "detectors[1]");
        assert!(registry.check_compatibility(&plan, 500).is_empty());
    }
}
