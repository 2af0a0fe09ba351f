//! Weekend amount rule.
//!
//! Weekday transactions form the baseline. Weekend transactions are held to
//! a stricter threshold (`weekday threshold × weekend_multiplier`) and
//! accumulate penalties for each rule they break.

use std::collections::HashSet;

use ledgerlens_core::{DerivedTransaction, FeatureSet, ScoreRecord};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::detector::{check_at_least, check_positive, check_range, Detector, DetectorKind};
use crate::error::{DetectError, ParamError};
use crate::stats;

/// Baselines smaller than this lower the confidence of weekend verdicts.
const SMALL_BASELINE: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmountThresholdMethod {
    Percentile,
    MeanStd,
    MedianIqr,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct WeekendThresholdParams {
    /// Scales the weekday baseline threshold.
    pub weekday_multiplier: f64,
    /// Weekend threshold as a fraction of the weekday threshold.
    pub weekend_multiplier: f64,
    pub amount_threshold_method: AmountThresholdMethod,
    pub amount_percentile: f64,
    pub frequency_analysis: bool,
    pub account_specific: bool,
    pub min_weekday_transactions: usize,
}

impl Default for WeekendThresholdParams {
    fn default() -> Self {
        Self {
            weekday_multiplier: 1.0,
            weekend_multiplier: 0.3,
            amount_threshold_method: AmountThresholdMethod::Percentile,
            amount_percentile: 75.0,
            frequency_analysis: true,
            account_specific: true,
            min_weekday_transactions: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WeekendThresholdDetector;

impl Detector for WeekendThresholdDetector {
    type Params = WeekendThresholdParams;

    fn kind(&self) -> DetectorKind {
        DetectorKind::WeekendThreshold
    }

    fn validate_config(&self, params: &WeekendThresholdParams) -> Result<(), ParamError> {
        check_positive("weekday_multiplier", params.weekday_multiplier)?;
        check_positive("weekend_multiplier", params.weekend_multiplier)?;
        check_range("amount_percentile", params.amount_percentile, 1.0, 99.0)?;
        check_at_least("min_weekday_transactions", params.min_weekday_transactions, 1)?;
        Ok(())
    }

    fn minimum_transactions(&self) -> usize {
        10
    }

    fn detect(
        &self,
        features: &FeatureSet,
        params: &WeekendThresholdParams,
    ) -> Result<Vec<ScoreRecord>, DetectError> {
        let all: Vec<usize> = (0..features.len()).collect();
        let global = analyze_scope(features, &all, params, Scope::Global);

        if !params.account_specific {
            return Ok(global.into_iter().map(|(_, r)| r).collect());
        }

        let mut account: Vec<Option<ScoreRecord>> = vec![None; features.len()];
        for positions in features.accounts().values() {
            for (pos, r) in analyze_scope(features, positions, params, Scope::Account) {
                account[pos] = Some(r);
            }
        }

        let merged = global
            .into_iter()
            .map(|(pos, g)| match account[pos].take() {
                Some(a) => merge(a, g),
                None => g,
            })
            .collect();
        Ok(merged)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Global,
    Account,
}

impl Scope {
    fn as_str(&self) -> &'static str {
        match self {
            Scope::Global => "global",
            Scope::Account => "account",
        }
    }
}

// ── Baseline ────────────────────────────────────────────────────────

struct Baseline {
    count: usize,
    /// Weekday threshold after `weekday_multiplier`.
    threshold: f64,
    max_amount: f64,
    frequency_per_day: f64,
}

fn baseline(weekday: &[&DerivedTransaction], params: &WeekendThresholdParams) -> Baseline {
    let amounts: Vec<f64> = weekday.iter().map(|r| r.amount_abs).collect();
    let raw = match params.amount_threshold_method {
        AmountThresholdMethod::Percentile => {
            stats::quantile(&amounts, params.amount_percentile / 100.0).unwrap_or(0.0)
        }
        AmountThresholdMethod::MeanStd => {
            stats::mean(&amounts).unwrap_or(0.0) + 2.0 * stats::sample_std(&amounts).unwrap_or(0.0)
        }
        AmountThresholdMethod::MedianIqr => {
            let q25 = stats::quantile(&amounts, 0.25).unwrap_or(0.0);
            let q75 = stats::quantile(&amounts, 0.75).unwrap_or(0.0);
            stats::median(&amounts).unwrap_or(0.0) + 1.5 * (q75 - q25)
        }
    };

    let first = weekday.iter().map(|r| r.timestamp).min();
    let last = weekday.iter().map(|r| r.timestamp).max();
    let span_days = match (first, last) {
        (Some(a), Some(b)) => (b - a).num_days() as f64,
        _ => 0.0,
    };
    let weekdays = (span_days * 5.0 / 7.0).max(1.0);

    Baseline {
        count: weekday.len(),
        threshold: raw * params.weekday_multiplier,
        max_amount: amounts.iter().cloned().fold(0.0, f64::max),
        frequency_per_day: weekday.len() as f64 / weekdays,
    }
}

// ── Scope analysis ──────────────────────────────────────────────────

fn analyze_scope(
    features: &FeatureSet,
    positions: &[usize],
    params: &WeekendThresholdParams,
    scope: Scope,
) -> Vec<(usize, ScoreRecord)> {
    let rows = features.rows();
    let weekday: Vec<&DerivedTransaction> = positions
        .iter()
        .map(|&p| &rows[p])
        .filter(|r| !r.is_weekend)
        .collect();

    let tag = |r: ScoreRecord, row: &DerivedTransaction| {
        let r = r
            .with("rule_type", "weekend_threshold")
            .with("analysis_level", scope.as_str());
        match scope {
            Scope::Account => r.with("account_id", row.account_id.as_str()),
            Scope::Global => r,
        }
    };

    let required = match scope {
        Scope::Global => 1,
        Scope::Account => params.min_weekday_transactions,
    };
    if weekday.len() < required {
        let (confidence, reason) = match scope {
            Scope::Global => (0.2, "no_weekday_baseline"),
            Scope::Account => (0.3, "insufficient_weekday_data"),
        };
        return positions
            .iter()
            .map(|&p| {
                let row = &rows[p];
                let r = ScoreRecord::fallback(&row.id, 0.1, confidence, reason)
                    .with("weekday_count", weekday.len());
                (p, tag(r, row))
            })
            .collect();
    }

    let base = baseline(&weekday, params);
    let weekend_frequency = params
        .frequency_analysis
        .then(|| weekend_frequency(positions.iter().map(|&p| &rows[p]), &base));

    positions
        .iter()
        .map(|&p| {
            let row = &rows[p];
            let r = if row.is_weekend {
                let mut r = evaluate_weekend(row, &base, params);
                if let Some(freq) = &weekend_frequency {
                    r = r.with("frequency_analysis", freq.clone());
                }
                r
            } else {
                ScoreRecord::fallback(&row.id, 0.1, 0.8, "weekday_transaction")
            };
            (p, tag(r, row))
        })
        .collect()
}

/// Weekend transactions per weekend day with activity, against the weekday rate.
fn weekend_frequency<'a>(
    rows: impl Iterator<Item = &'a DerivedTransaction>,
    base: &Baseline,
) -> Value {
    let mut days = HashSet::new();
    let mut count = 0usize;
    for r in rows.filter(|r| r.is_weekend) {
        days.insert(r.timestamp.date_naive());
        count += 1;
    }
    let per_day = count as f64 / days.len().max(1) as f64;
    let ratio = if base.frequency_per_day > 0.0 {
        per_day / base.frequency_per_day
    } else {
        0.0
    };
    json!({
        "weekday_per_day": base.frequency_per_day,
        "weekend_per_day": per_day,
        "weekend_to_weekday_ratio": ratio,
    })
}

fn evaluate_weekend(
    row: &DerivedTransaction,
    base: &Baseline,
    params: &WeekendThresholdParams,
) -> ScoreRecord {
    let amount = row.amount_abs;
    let expected = base.threshold * params.weekend_multiplier;
    let mut score = 0.1;
    let mut confidence = 0.7;
    let mut violations: Vec<&str> = Vec::new();
    let mut r = ScoreRecord::new(&row.id, 0.0, 0.0)
        .with("transaction_amount", amount)
        .with("is_weekend", true)
        .with("day_of_week", row.day_of_week)
        .with("expected_weekend_threshold", expected)
        .with("weekday_threshold", base.threshold);

    if amount > expected {
        let excess = amount - expected;
        let severity = (excess / (base.max_amount - expected).max(1.0)).min(1.0);
        score += 0.6 * severity;
        violations.push("amount_threshold");
        r = r
            .with("amount_violation_score", severity)
            .with("excess_amount", excess);
    }

    if amount > base.threshold {
        let excess = amount - base.threshold;
        let severity = (excess / (base.max_amount - base.threshold).max(1.0)).min(1.0);
        score += 0.3 * severity;
        violations.push("weekday_threshold");
        r = r.with("weekday_violation_score", severity);
    }

    if row.hour < 6 || row.hour > 22 {
        score += 0.2;
        violations.push("unusual_weekend_hour");
        r = r.with("transaction_hour", row.hour);
    }

    if violations.len() > 1 {
        confidence = f64::min(1.0, confidence + 0.2);
    }
    if base.count < SMALL_BASELINE {
        confidence *= 0.7;
    }

    r.score = f64::min(1.0, score);
    r.confidence = confidence;
    r.with("violations", json!(violations))
}

/// Element-wise maximum of both views; account metadata stays on top.
fn merge(account: ScoreRecord, global: ScoreRecord) -> ScoreRecord {
    let source = if account.score > global.score { "account" } else { "global" };
    let score = account.score.max(global.score);
    let confidence = account.confidence.max(global.confidence);
    let mut r = account
        .with("global_analysis", Value::Object(global.metadata))
        .with("score_source", source);
    r.score = score;
    r.confidence = confidence;
    r
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::test_support::{at, batch, tx};
    use ledgerlens_core::Transaction;

    /// Weekday baseline of 100..=115 spread over two weeks for one account.
    fn weekday_baseline(account: &str) -> Vec<Transaction> {
        // Jan 1 and Jan 8 2024 are Mondays.
        let days = [1, 2, 3, 4, 5, 8, 9, 10, 11, 12];
        days.iter()
            .enumerate()
            .map(|(i, &d)| {
                tx(
                    &format!("{account}-wd{i}"),
                    account,
                    100.0 + i as f64,
                    at(2024, 1, d, 10, 0),
                )
            })
            .collect()
    }

    #[test]
    fn weekday_only_batch_scores_normal() {
        let mut txs = weekday_baseline("a");
        txs.extend(weekday_baseline("b"));
        let set = batch(&txs);
        let records = WeekendThresholdDetector
            .detect(&set, &WeekendThresholdParams::default())
            .unwrap();
        assert_eq!(records.len(), 20);
        assert!(records.iter().all(|r| r.score == 0.1
            && r.confidence == 0.8
            && r.reason() == Some("weekday_transaction")));
    }

    #[test]
    fn large_late_weekend_transaction_accumulates_penalties() {
        let mut txs = weekday_baseline("a");
        // Saturday 23:30, well above the weekday maximum.
        txs.push(tx("sat", "a", 5_000.0, at(2024, 1, 13, 23, 30)));
        // Sunday afternoon, small.
        txs.push(tx("sun", "a", 10.0, at(2024, 1, 14, 14, 0)));
        let set = batch(&txs);
        let records = WeekendThresholdDetector
            .detect(&set, &WeekendThresholdParams::default())
            .unwrap();

        let sat = records.iter().find(|r| r.transaction_id == "sat").unwrap();
        assert_eq!(sat.score, 1.0);
        // 0.7 + 0.2 for multiple violations, baseline of exactly 10 rows.
        assert!((sat.confidence - 0.9).abs() < 1e-10);
        assert_eq!(
            sat.metadata["violations"],
            json!(["amount_threshold", "weekday_threshold", "unusual_weekend_hour"])
        );
        assert!(sat.metadata.contains_key("frequency_analysis"));

        let sun = records.iter().find(|r| r.transaction_id == "sun").unwrap();
        assert!((sun.score - 0.1).abs() < 1e-10);
        assert_eq!(sun.metadata["violations"], json!([]));
    }

    #[test]
    fn weekend_threshold_is_scaled_weekday_threshold() {
        let mut txs = weekday_baseline("a");
        // Weekday p75 ≈ 106.75, weekend threshold ≈ 32: 50 only breaks the weekend rule.
        txs.push(tx("sat", "a", 50.0, at(2024, 1, 13, 12, 0)));
        let set = batch(&txs);
        let records = WeekendThresholdDetector
            .detect(&set, &WeekendThresholdParams::default())
            .unwrap();
        let sat = records.iter().find(|r| r.transaction_id == "sat").unwrap();
        assert!(sat.score > 0.1 && sat.score < 0.7);
        assert_eq!(sat.metadata["violations"], json!(["amount_threshold"]));
        assert!((sat.confidence - 0.7).abs() < 1e-10);
    }

    #[test]
    fn sparse_accounts_fall_back_to_global() {
        let mut txs = weekday_baseline("busy");
        txs.push(tx("q1", "quiet", 20.0, at(2024, 1, 2, 9, 0)));
        txs.push(tx("q2", "quiet", 9_000.0, at(2024, 1, 6, 3, 0)));
        let set = batch(&txs);
        let records = WeekendThresholdDetector
            .detect(&set, &WeekendThresholdParams::default())
            .unwrap();
        let q2 = records.iter().find(|r| r.transaction_id == "q2").unwrap();
        assert_eq!(q2.reason(), Some("insufficient_weekday_data"));
        assert_eq!(q2.metadata["score_source"], "global");
        assert!(q2.score > 0.9);
        assert_eq!(q2.metadata["global_analysis"]["analysis_level"], "global");
    }

    #[test]
    fn weekend_only_batch_has_no_baseline() {
        let txs = vec![
            tx("s1", "a", 10.0, at(2024, 1, 6, 10, 0)),
            tx("s2", "a", 20.0, at(2024, 1, 7, 10, 0)),
        ];
        let set = batch(&txs);
        let params = WeekendThresholdParams {
            account_specific: false,
            ..Default::default()
        };
        let records = WeekendThresholdDetector.detect(&set, &params).unwrap();
        assert!(records.iter().all(|r| r.score == 0.1
            && r.confidence == 0.2
            && r.reason() == Some("no_weekday_baseline")));
    }

    #[test]
    fn rejects_out_of_range_percentile() {
        let params = WeekendThresholdParams {
            amount_percentile: 120.0,
            ..Default::default()
        };
        assert!(WeekendThresholdDetector.validate_config(&params).is_err());
    }
}
