//! Isolation-forest detector.
//!
//! Builds a standardized numeric matrix per scope (whole batch, or each
//! account with `account_specific`), fits a seeded forest and maps the
//! decision function onto `[0.01, 0.99]` with lower isolation scores giving
//! higher anomaly scores.
//!
//! Sub-modules:
//! - [`forest`]: the ensemble itself

pub mod forest;

use std::fmt;

use ledgerlens_core::{FeatureSet, ScoreRecord, NUMERIC_FEATURES};
use rayon::prelude::*;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::json;

use crate::detector::{check_at_least, into_row_order, Detector, DetectorKind};
use crate::error::{DetectError, ParamError};
use crate::stats;

pub use forest::{ForestConfig, IsolationForest};

/// Sub-sample size used by `max_samples: auto`, capped by the batch size.
const AUTO_SAMPLE_SIZE: usize = 256;

// ── Parameters ──────────────────────────────────────────────────────

/// Rows drawn per tree: `"auto"`, a fraction in (0, 1], or a count.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MaxSamples {
    Auto,
    Fraction(f64),
    Count(usize),
}

impl MaxSamples {
    pub fn resolve(&self, rows: usize) -> usize {
        let n = match self {
            MaxSamples::Auto => AUTO_SAMPLE_SIZE.min(rows),
            MaxSamples::Fraction(f) => (f * rows as f64) as usize,
            MaxSamples::Count(c) => (*c).min(rows),
        };
        n.max(1)
    }
}

impl fmt::Display for MaxSamples {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaxSamples::Auto => write!(f, "auto"),
            MaxSamples::Fraction(v) => write!(f, "{v}"),
            MaxSamples::Count(c) => write!(f, "{c}"),
        }
    }
}

impl Serialize for MaxSamples {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            MaxSamples::Auto => serializer.serialize_str("auto"),
            MaxSamples::Fraction(v) => serializer.serialize_f64(*v),
            MaxSamples::Count(c) => serializer.serialize_u64(*c as u64),
        }
    }
}

impl<'de> Deserialize<'de> for MaxSamples {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Count(u64),
            Fraction(f64),
            Text(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Count(c) => Ok(MaxSamples::Count(c as usize)),
            Raw::Fraction(f) => Ok(MaxSamples::Fraction(f)),
            Raw::Text(s) if s == "auto" => Ok(MaxSamples::Auto),
            Raw::Text(s) => Err(de::Error::custom(format!(
                "max_samples must be \"auto\", a fraction or a count, got \"{s}\""
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct IsolationForestParams {
    pub contamination: f64,
    pub n_estimators: usize,
    pub max_samples: MaxSamples,
    pub features: Vec<String>,
    pub account_specific: bool,
    pub min_samples_fit: usize,
    pub random_state: u64,
}

impl Default for IsolationForestParams {
    fn default() -> Self {
        Self {
            contamination: 0.1,
            n_estimators: 100,
            max_samples: MaxSamples::Auto,
            features: vec!["amount".into(), "hour".into(), "day_of_week".into()],
            account_specific: false,
            min_samples_fit: 50,
            random_state: 42,
        }
    }
}

impl IsolationForestParams {
    fn forest_config(&self, rows: usize) -> ForestConfig {
        ForestConfig {
            n_estimators: self.n_estimators,
            sample_size: self.max_samples.resolve(rows),
            contamination: self.contamination,
            seed: self.random_state,
        }
    }
}

// ── Feature matrix ──────────────────────────────────────────────────

/// Column names derived from the configured features.
///
/// `amount` brings `amount_abs` and `amount_log` along; `day_of_week` is
/// one-hot encoded into seven columns.
fn matrix_columns(requested: &[String]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    let mut push = |c: &str| {
        if !columns.iter().any(|x| x == c) {
            columns.push(c.to_string());
        }
    };
    for name in requested {
        match name.as_str() {
            "day_of_week" => (0..7).for_each(|d| push(&format!("day_of_week_{d}"))),
            n if NUMERIC_FEATURES.contains(&n) => push(n),
            _ => {}
        }
    }
    if requested.iter().any(|f| f == "amount") {
        push("amount_abs");
        push("amount_log");
    }
    columns
}

fn raw_matrix(features: &FeatureSet, positions: &[usize], columns: &[String]) -> Vec<Vec<f64>> {
    positions
        .iter()
        .map(|&p| {
            let row = &features.rows()[p];
            columns
                .iter()
                .map(|c| match c.strip_prefix("day_of_week_") {
                    Some(d) => {
                        let day: u32 = d.parse().unwrap_or(u32::MAX);
                        if row.day_of_week == day { 1.0 } else { 0.0 }
                    }
                    None => row.feature(c).unwrap_or(0.0),
                })
                .collect()
        })
        .collect()
}

/// Column-wise standardization; zero-variance columns keep a unit scale.
#[derive(Debug, Clone)]
struct Scaler {
    means: Vec<f64>,
    scales: Vec<f64>,
}

impl Scaler {
    fn fit(data: &[Vec<f64>]) -> Self {
        let dims = data.first().map(Vec::len).unwrap_or(0);
        let (means, scales) = (0..dims)
            .map(|c| {
                let col: Vec<f64> = data.iter().map(|r| r[c]).collect();
                let mean = stats::mean(&col).unwrap_or(0.0);
                let std = stats::population_std(&col).unwrap_or(0.0);
                (mean, if std > f64::EPSILON { std } else { 1.0 })
            })
            .unzip();
        Self { means, scales }
    }

    fn transform(&self, data: &[Vec<f64>]) -> Vec<Vec<f64>> {
        data.iter()
            .map(|r| {
                r.iter()
                    .zip(self.means.iter().zip(&self.scales))
                    .map(|(v, (m, s))| (v - m) / s)
                    .collect()
            })
            .collect()
    }
}

// ── Detector ────────────────────────────────────────────────────────

/// Model retained by [`IsolationForestDetector::fit`].
#[derive(Debug, Clone)]
pub struct FittedModel {
    forest: IsolationForest,
    scaler: Scaler,
    columns: Vec<String>,
    params: IsolationForestParams,
}

impl FittedModel {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }
}

/// Stateless by default; [`fit`](Self::fit) and [`predict`](Self::predict)
/// split training from scoring when a caller wants to reuse a model.
#[derive(Debug, Clone, Default)]
pub struct IsolationForestDetector {
    model: Option<FittedModel>,
}

impl IsolationForestDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_fitted(&self) -> bool {
        self.model.is_some()
    }

    pub fn model(&self) -> Option<&FittedModel> {
        self.model.as_ref()
    }

    /// Fit one global model on the whole batch and keep it.
    ///
    /// `account_specific` is not applied here: the retained model always
    /// covers every account and [`predict`](Self::predict) scores at the
    /// `global` level. Per-account models exist only inside `detect`.
    pub fn fit(
        &mut self,
        features: &FeatureSet,
        params: &IsolationForestParams,
    ) -> Result<(), DetectError> {
        self.validate_config(params)
            .map_err(|e| DetectError::execution(DetectorKind::IsolationForest.key(), e.message))?;
        if features.len() < params.min_samples_fit {
            return Err(DetectError::execution(
                DetectorKind::IsolationForest.key(),
                format!(
                    "insufficient data: {} transactions, need {}",
                    features.len(),
                    params.min_samples_fit
                ),
            ));
        }
        let positions: Vec<usize> = (0..features.len()).collect();
        self.model = Some(fit_model(features, &positions, params)?);
        Ok(())
    }

    /// Score a batch with the retained model.
    pub fn predict(&self, features: &FeatureSet) -> Result<Vec<ScoreRecord>, DetectError> {
        let model = self.model.as_ref().ok_or(DetectError::NotFitted)?;
        let positions: Vec<usize> = (0..features.len()).collect();
        let raw = raw_matrix(features, &positions, &model.columns);
        let decision = model.forest.decision_function(&model.scaler.transform(&raw))?;
        Ok(into_row_order(records_from_decision(
            features, &positions, &decision, model, "global",
        )))
    }
}

fn fit_model(
    features: &FeatureSet,
    positions: &[usize],
    params: &IsolationForestParams,
) -> Result<FittedModel, DetectError> {
    let columns = matrix_columns(&params.features);
    if columns.is_empty() {
        return Err(DetectError::execution(
            DetectorKind::IsolationForest.key(),
            "none of the configured features are available",
        ));
    }
    let raw = raw_matrix(features, positions, &columns);
    let scaler = Scaler::fit(&raw);
    let forest = IsolationForest::fit(
        &scaler.transform(&raw),
        &params.forest_config(positions.len()),
    )?;
    Ok(FittedModel {
        forest,
        scaler,
        columns,
        params: params.clone(),
    })
}

fn records_from_decision(
    features: &FeatureSet,
    positions: &[usize],
    decision: &[f64],
    model: &FittedModel,
    level: &str,
) -> Vec<(usize, ScoreRecord)> {
    let max = decision.iter().cloned().fold(f64::MIN, f64::max);
    let min = decision.iter().cloned().fold(f64::MAX, f64::min);
    let max_abs = decision.iter().map(|d| d.abs()).fold(0.0, f64::max);
    let max_abs = if max_abs > 0.0 { max_abs } else { 1.0 };
    let params = &model.params;

    positions
        .iter()
        .zip(decision)
        .map(|(&pos, &d)| {
            let row = &features.rows()[pos];
            let is_outlier = d < 0.0;
            let score = if max > min {
                ((max - d) / (max - min)).clamp(0.01, 0.99)
            } else {
                0.1
            };
            let base = d.abs() / max_abs;
            let confidence = if is_outlier {
                (base + 0.3).clamp(0.1, 0.95)
            } else {
                (base + 0.1).clamp(0.1, 0.9)
            };
            let mut r = ScoreRecord::new(&row.id, score, confidence)
                .with("algorithm_type", "ml_based")
                .with("model_type", "isolation_forest")
                .with("analysis_level", level)
                .with("features_used", json!(model.columns))
                .with("isolation_score", d)
                .with("is_outlier", is_outlier)
                .with(
                    "model_params",
                    json!({
                        "n_estimators": params.n_estimators,
                        "contamination": params.contamination,
                        "max_samples": params.max_samples,
                    }),
                );
            if level == "account" {
                r = r.with("account_id", row.account_id.as_str());
            }
            (pos, r)
        })
        .collect()
}

fn fallback(
    features: &FeatureSet,
    positions: &[usize],
    confidence: f64,
    reason: &str,
    level: &str,
) -> Vec<(usize, ScoreRecord)> {
    positions
        .iter()
        .map(|&p| {
            let row = &features.rows()[p];
            let mut r = ScoreRecord::fallback(&row.id, 0.1, confidence, reason)
                .with("algorithm_type", "ml_based")
                .with("model_type", "isolation_forest")
                .with("analysis_level", level)
                .with("available_samples", positions.len());
            if level == "account" {
                r = r.with("account_id", row.account_id.as_str());
            }
            (p, r)
        })
        .collect()
}

/// Fit and score one scope, degrading instead of failing.
fn score_scope(
    features: &FeatureSet,
    positions: &[usize],
    params: &IsolationForestParams,
    level: &str,
) -> Vec<(usize, ScoreRecord)> {
    if positions.len() < params.min_samples_fit {
        let (confidence, reason) = if level == "account" {
            (0.3, "insufficient_account_data")
        } else {
            (0.2, "insufficient_data")
        };
        return fallback(features, positions, confidence, reason, level);
    }

    let scored = fit_model(features, positions, params).and_then(|model| {
        let raw = raw_matrix(features, positions, &model.columns);
        let decision = model.forest.decision_function(&model.scaler.transform(&raw))?;
        Ok(records_from_decision(features, positions, &decision, &model, level))
    });

    match scored {
        Ok(records) => records,
        Err(e) => {
            tracing::warn!(scope = level, error = %e, "isolation forest fit failed");
            fallback(features, positions, 0.1, "model_fitting_failed", level)
                .into_iter()
                .map(|(p, r)| (p, r.with("error", e.to_string())))
                .collect()
        }
    }
}

impl Detector for IsolationForestDetector {
    type Params = IsolationForestParams;

    fn kind(&self) -> DetectorKind {
        DetectorKind::IsolationForest
    }

    fn validate_config(&self, params: &IsolationForestParams) -> Result<(), ParamError> {
        if !(params.contamination > 0.0 && params.contamination <= 0.5) {
            return Err(ParamError::new(
                "contamination",
                format!(
                    "contamination must be in (0, 0.5], got {}",
                    params.contamination
                ),
            ));
        }
        check_at_least("n_estimators", params.n_estimators, 1)?;
        match params.max_samples {
            MaxSamples::Fraction(f) if !(f > 0.0 && f <= 1.0) => {
                return Err(ParamError::new(
                    "max_samples",
                    format!("max_samples fraction must be in (0, 1], got {f}"),
                ));
            }
            MaxSamples::Count(0) => {
                return Err(ParamError::new("max_samples", "max_samples must be at least 1"));
            }
            _ => {}
        }
        if params.features.is_empty() {
            return Err(ParamError::new("features", "features must not be empty"));
        }
        check_at_least("min_samples_fit", params.min_samples_fit, 10)?;
        Ok(())
    }

    fn minimum_transactions(&self) -> usize {
        50
    }

    fn detect(
        &self,
        features: &FeatureSet,
        params: &IsolationForestParams,
    ) -> Result<Vec<ScoreRecord>, DetectError> {
        let tagged: Vec<(usize, ScoreRecord)> = if params.account_specific {
            let groups: Vec<&Vec<usize>> = features.accounts().values().collect();
            groups
                .par_iter()
                .flat_map_iter(|positions| score_scope(features, positions, params, "account"))
                .collect()
        } else {
            let all: Vec<usize> = (0..features.len()).collect();
            score_scope(features, &all, params, "global")
        };
        Ok(into_row_order(tagged))
    }
}
