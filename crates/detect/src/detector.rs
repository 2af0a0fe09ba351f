//! The detector capability interface and the closed set of detector kinds.

use std::collections::HashSet;
use std::fmt;

use ledgerlens_core::{FeatureSet, ScoreRecord};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{DetectError, ParamError};

/// Named parameters for one detector, as written in a strategy.
pub type DetectorConfig = serde_json::Map<String, serde_json::Value>;

// ── Detector kinds ──────────────────────────────────────────────────

/// Every detector the registry knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    ZScore,
    Correlation,
    TimeSeries,
    WeekendThreshold,
    IsolationForest,
}

impl DetectorKind {
    pub const ALL: [DetectorKind; 5] = [
        DetectorKind::ZScore,
        DetectorKind::Correlation,
        DetectorKind::TimeSeries,
        DetectorKind::WeekendThreshold,
        DetectorKind::IsolationForest,
    ];

    pub fn category(&self) -> &'static str {
        match self {
            DetectorKind::ZScore | DetectorKind::Correlation | DetectorKind::TimeSeries => {
                "statistical"
            }
            DetectorKind::WeekendThreshold => "rule_based",
            DetectorKind::IsolationForest => "ml_based",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DetectorKind::ZScore => "zscore",
            DetectorKind::Correlation => "correlation",
            DetectorKind::TimeSeries => "timeseries",
            DetectorKind::WeekendThreshold => "weekend_threshold",
            DetectorKind::IsolationForest => "isolation_forest",
        }
    }

    /// `category.name`, the tag used in aggregated output.
    pub fn key(&self) -> String {
        format!("{}.{}", self.category(), self.name())
    }

    pub fn from_pair(category: &str, name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.category() == category && k.name() == name)
    }
}

impl fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.category(), self.name())
    }
}

// ── Detector trait ──────────────────────────────────────────────────

/// A single independent scoring algorithm.
///
/// Implementations read the shared [`FeatureSet`] and must return exactly
/// one [`ScoreRecord`] per transaction. Missing data degrades to
/// low-confidence records tagged with a `reason`; errors are reserved for
/// genuinely unexpected failures.
pub trait Detector: Send + Sync {
    type Params: DeserializeOwned + Serialize + Default + Clone + fmt::Debug + Send + Sync;

    fn kind(&self) -> DetectorKind;

    /// Range-check already deserialized parameters.
    fn validate_config(&self, params: &Self::Params) -> Result<(), ParamError>;

    /// Advisory lower bound on batch size for meaningful results.
    fn minimum_transactions(&self) -> usize;

    fn detect(
        &self,
        features: &FeatureSet,
        params: &Self::Params,
    ) -> Result<Vec<ScoreRecord>, DetectError>;

    /// Deserialize a strategy entry's config (missing keys take defaults) and validate it.
    fn parse_config(&self, config: &DetectorConfig) -> Result<Self::Params, ParamError> {
        let params: Self::Params =
            serde_json::from_value(serde_json::Value::Object(config.clone()))
                .map_err(|e| ParamError::malformed(e.to_string()))?;
        self.validate_config(&params)?;
        Ok(params)
    }
}

// ── Shared helpers ──────────────────────────────────────────────────

/// Check that `records` cover every transaction exactly once with finite values.
pub fn ensure_coverage(
    detector: &str,
    features: &FeatureSet,
    records: &[ScoreRecord],
) -> Result<(), DetectError> {
    if records.len() != features.len() {
        return Err(DetectError::execution(
            detector,
            format!(
                "produced {} records for {} transactions",
                records.len(),
                features.len()
            ),
        ));
    }
    let mut seen = HashSet::with_capacity(records.len());
    for r in records {
        if !seen.insert(r.transaction_id.as_str()) {
            return Err(DetectError::execution(
                detector,
                format!("duplicate record for transaction {}", r.transaction_id),
            ));
        }
        if !r.score.is_finite() || !r.confidence.is_finite() {
            return Err(DetectError::execution(
                detector,
                format!("non-finite score for transaction {}", r.transaction_id),
            ));
        }
    }
    if let Some(row) = features
        .rows()
        .iter()
        .find(|row| !seen.contains(row.id.as_str()))
    {
        return Err(DetectError::execution(
            detector,
            format!("no record for transaction {}", row.id),
        ));
    }
    Ok(())
}

/// Reorder records tagged with their row position into chronological order.
pub(crate) fn into_row_order(mut tagged: Vec<(usize, ScoreRecord)>) -> Vec<ScoreRecord> {
    tagged.sort_by_key(|(pos, _)| *pos);
    tagged.into_iter().map(|(_, r)| r).collect()
}

/// Same fallback record for every listed row.
pub(crate) fn fallback_all(
    features: &FeatureSet,
    positions: &[usize],
    score: f64,
    confidence: f64,
    reason: &str,
) -> Vec<(usize, ScoreRecord)> {
    positions
        .iter()
        .map(|&p| {
            let row = &features.rows()[p];
            (
                p,
                ScoreRecord::fallback(&row.id, score, confidence, reason)
                    .with("account_id", row.account_id.as_str()),
            )
        })
        .collect()
}

pub(crate) fn check_positive(field: &str, value: f64) -> Result<(), ParamError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ParamError::new(field, format!("{field} must be positive, got {value}")));
    }
    Ok(())
}

pub(crate) fn check_range(field: &str, value: f64, lo: f64, hi: f64) -> Result<(), ParamError> {
    if !value.is_finite() || value < lo || value > hi {
        return Err(ParamError::new(
            field,
            format!("{field} must be between {lo} and {hi}, got {value}"),
        ));
    }
    Ok(())
}

pub(crate) fn check_at_least(field: &str, value: usize, min: usize) -> Result<(), ParamError> {
    if value < min {
        return Err(ParamError::new(
            field,
            format!("{field} must be at least {min}, got {value}"),
        ));
    }
    Ok(())
}
