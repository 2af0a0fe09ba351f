//! Feature-correlation detector.
//!
//! Within a symmetric window around each transaction (same account), feature
//! pairs whose correlation exceeds `correlation_threshold` define a linear
//! relationship. A transaction that sits far from the fitted line of a
//! strongly correlated pair is suspicious.

use ledgerlens_core::{FeatureSet, ScoreRecord, NUMERIC_FEATURES};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::detector::{
    check_at_least, check_range, fallback_all, into_row_order, Detector, DetectorKind,
};
use crate::error::{DetectError, ParamError};
use crate::stats;

/// Windows smaller than this are never correlated.
const MIN_WINDOW_ROWS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrelationType {
    Pearson,
    Spearman,
    Kendall,
}

impl CorrelationType {
    fn correlate(&self, x: &[f64], y: &[f64]) -> Option<f64> {
        match self {
            CorrelationType::Pearson => stats::pearson(x, y),
            CorrelationType::Spearman => stats::spearman(x, y),
            CorrelationType::Kendall => stats::kendall(x, y),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CorrelationParams {
    pub correlation_threshold: f64,
    pub window_size: usize,
    pub features: Vec<String>,
    pub correlation_type: CorrelationType,
}

impl Default for CorrelationParams {
    fn default() -> Self {
        Self {
            correlation_threshold: 0.3,
            window_size: 100,
            features: vec!["amount".into(), "hour".into(), "day_of_week".into()],
            correlation_type: CorrelationType::Pearson,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CorrelationDetector;

impl Detector for CorrelationDetector {
    type Params = CorrelationParams;

    fn kind(&self) -> DetectorKind {
        DetectorKind::Correlation
    }

    fn validate_config(&self, params: &CorrelationParams) -> Result<(), ParamError> {
        check_range("correlation_threshold", params.correlation_threshold, 0.0, 1.0)?;
        check_at_least("window_size", params.window_size, MIN_WINDOW_ROWS)?;
        if params.features.len() < 2 {
            return Err(ParamError::new(
                "features",
                "At least 2 features required for correlation analysis",
            ));
        }
        Ok(())
    }

    fn minimum_transactions(&self) -> usize {
        20
    }

    fn detect(
        &self,
        features: &FeatureSet,
        params: &CorrelationParams,
    ) -> Result<Vec<ScoreRecord>, DetectError> {
        // Unknown names are dropped here rather than rejected up front.
        let usable: Vec<&str> = params
            .features
            .iter()
            .map(String::as_str)
            .filter(|f| NUMERIC_FEATURES.contains(f))
            .collect();

        if usable.len() < 2 {
            let all: Vec<usize> = (0..features.len()).collect();
            return Ok(into_row_order(fallback_all(
                features,
                &all,
                0.1,
                0.3,
                "insufficient_features",
            )));
        }

        let groups: Vec<&Vec<usize>> = features.accounts().values().collect();
        let tagged: Vec<(usize, ScoreRecord)> = groups
            .par_iter()
            .flat_map_iter(|positions| score_account(features, positions, &usable, params))
            .collect();

        Ok(into_row_order(tagged))
    }
}

fn score_account(
    features: &FeatureSet,
    positions: &[usize],
    usable: &[&str],
    params: &CorrelationParams,
) -> Vec<(usize, ScoreRecord)> {
    if positions.len() < params.window_size / 2 {
        return fallback_all(
            features,
            positions,
            0.1,
            0.3,
            "insufficient_data_for_correlation",
        )
        .into_iter()
        .map(|(p, r)| (p, r.with("transaction_count", positions.len())))
        .collect();
    }

    // Columns over the whole account; windows are slices of these.
    let columns: Vec<Vec<f64>> = usable
        .iter()
        .filter_map(|name| features.column(name, positions))
        .collect();

    let half = params.window_size / 2;
    let mut out = Vec::with_capacity(positions.len());
    for (i, &pos) in positions.iter().enumerate() {
        let row = &features.rows()[pos];
        let start = i.saturating_sub(half);
        let end = (i + half + 1).min(positions.len());

        let record = if end - start < MIN_WINDOW_ROWS {
            ScoreRecord::fallback(&row.id, 0.1, 0.2, "insufficient_window_data")
                .with("window_size", end - start)
        } else {
            window_score(&row.id, i, start, end, &columns, usable, params)
        };
        out.push((pos, record.with("account_id", row.account_id.as_str())));
    }
    out
}

fn window_score(
    id: &str,
    current: usize,
    start: usize,
    end: usize,
    columns: &[Vec<f64>],
    usable: &[&str],
    params: &CorrelationParams,
) -> ScoreRecord {
    let mut indicators = Vec::new();
    let mut strengths = Vec::new();
    let mut details = Map::new();

    for a in 0..columns.len() {
        for b in (a + 1)..columns.len() {
            let x = &columns[a][start..end];
            let y = &columns[b][start..end];
            let Some(corr) = params.correlation_type.correlate(x, y) else {
                continue;
            };
            strengths.push(corr.abs());
            if corr.abs() <= params.correlation_threshold || x.len() < 3 {
                continue;
            }
            let Some((slope, intercept)) = stats::linear_fit(x, y) else {
                continue;
            };

            let actual = columns[b][current];
            let predicted = slope * columns[a][current] + intercept;
            let error = (actual - predicted).abs();
            let spread = stats::population_std(y).unwrap_or(0.0);
            let normalized = error / (spread + 1e-6);
            indicators.push(normalized);
            details.insert(
                format!("{}_{}", usable[a], usable[b]),
                json!({
                    "expected_correlation": corr,
                    "predicted_value": predicted,
                    "actual_value": actual,
                    "prediction_error": error,
                    "normalized_error": normalized,
                }),
            );
        }
    }

    if indicators.is_empty() {
        return ScoreRecord::fallback(id, 0.1, 0.2, "no_significant_correlations");
    }

    let mean = stats::mean(&indicators).unwrap_or(0.0);
    let max = indicators.iter().cloned().fold(f64::MIN, f64::max);
    let avg_strength = stats::mean(&strengths).unwrap_or(0.0);

    let score = ((mean + max) / 4.0).clamp(0.0, 1.0);
    let confidence = (avg_strength + 0.3).min(1.0);

    ScoreRecord::new(id, score, confidence)
        .with("correlation_analysis", Value::Object(details))
        .with("anomaly_indicators", indicators.len())
        .with("mean_anomaly_score", mean)
        .with("max_anomaly_score", max)
        .with("average_correlation_strength", avg_strength)
        .with("features_analyzed", json!(usable))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::test_support::{at, batch, tx};

    /// One account whose amount grows linearly with the hour of day.
    fn linear_account(n: usize, outlier_at: Option<usize>) -> FeatureSet {
        let txs: Vec<_> = (0..n)
            .map(|i| {
                let hour = (i % 20) as u32 + 2;
                let mut amount = 10.0 * hour as f64;
                if Some(i) == outlier_at {
                    amount += 150.0;
                }
                tx(&format!("t{i}"), "acct", amount, at(2024, 1, 1 + (i / 20) as u32, hour, 0))
            })
            .collect();
        batch(&txs)
    }

    fn params(features: &[&str]) -> CorrelationParams {
        with_window(features, 20)
    }

    fn with_window(features: &[&str], window_size: usize) -> CorrelationParams {
        CorrelationParams {
            window_size,
            features: features.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn outlier_off_the_fitted_line_scores_highest() {
        let set = linear_account(40, Some(25));
        let records = CorrelationDetector
            .detect(&set, &params(&["hour", "amount"]))
            .unwrap();
        assert_eq!(records.len(), 40);

        let outlier = records.iter().find(|r| r.transaction_id == "t25").unwrap();
        let typical = records.iter().find(|r| r.transaction_id == "t5").unwrap();
        assert!(outlier.score > typical.score);
        assert!(outlier.score > 0.5);
        assert!(outlier.confidence <= 1.0);
        assert!(outlier.metadata.contains_key("correlation_analysis"));
    }

    #[test]
    fn unknown_features_fall_back() {
        let set = linear_account(30, None);
        let records = CorrelationDetector
            .detect(&set, &params(&["amount", "merchant_risk"]))
            .unwrap();
        assert!(records
            .iter()
            .all(|r| r.score == 0.1 && r.confidence == 0.3 && r.reason() == Some("insufficient_features")));
    }

    #[test]
    fn small_accounts_fall_back() {
        let set = linear_account(8, None);
        let records = CorrelationDetector
            .detect(&set, &CorrelationParams::default())
            .unwrap();
        assert_eq!(records.len(), 8);
        assert!(records
            .iter()
            .all(|r| r.reason() == Some("insufficient_data_for_correlation")));
    }

    #[test]
    fn narrow_windows_fall_back() {
        // 12 rows, window 10: edges see only 6 rows.
        let set = linear_account(12, None);
        let records = CorrelationDetector
            .detect(&set, &with_window(&["hour", "amount"], 10))
            .unwrap();
        assert_eq!(records[0].reason(), Some("insufficient_window_data"));
        assert_eq!(records[0].confidence, 0.2);
    }

    #[test]
    fn uncorrelated_features_report_no_correlation() {
        let txs: Vec<_> = (0..30)
            .map(|i| tx(&format!("t{i}"), "acct", 50.0, at(2024, 1, 1, (i % 24) as u32, 0)))
            .collect();
        let set = batch(&txs);
        let records = CorrelationDetector
            .detect(&set, &params(&["hour", "amount"]))
            .unwrap();
        assert!(records
            .iter()
            .filter(|r| r.reason() != Some("insufficient_window_data"))
            .all(|r| r.reason() == Some("no_significant_correlations")));
    }

    #[test]
    fn validation_messages() {
        let p = CorrelationParams {
            features: vec!["amount".into()],
            ..Default::default()
        };
        assert_eq!(
            CorrelationDetector.validate_config(&p).unwrap_err().to_string(),
            "At least 2 features required for correlation analysis"
        );
        let p = CorrelationParams {
            window_size: 5,
            ..Default::default()
        };
        assert!(CorrelationDetector.validate_config(&p).is_err());
    }
}
