//! Temporal pattern detector.
//!
//! Two independent views are merged per transaction:
//! - global: the batch is bucketed into a contiguous hour/day/week series,
//!   optionally detrended and de-seasonalised, and buckets outside a
//!   threshold band are flagged
//! - account: inter-arrival gaps are compared with the account's usual rhythm
//!
//! The higher score wins; the other view is kept nested in the metadata.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use ledgerlens_core::{FeatureSet, ScoreRecord};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::detector::{check_at_least, check_positive, Detector, DetectorKind};
use crate::error::{DetectError, ParamError};
use crate::stats;

const HOUR_SECS: i64 = 3_600;
const DAY_SECS: i64 = 86_400;
/// 1970-01-01 was a Thursday; shifting by 3 days aligns weeks on Monday.
const EPOCH_TO_MONDAY_DAYS: i64 = 3;
/// Rounding slack so a flat series with a zero-width band never flags itself.
const BAND_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeWindow {
    Hour,
    Day,
    Week,
}

impl TimeWindow {
    fn bucket_id(&self, ts: &DateTime<Utc>) -> i64 {
        let secs = ts.timestamp();
        match self {
            TimeWindow::Hour => secs.div_euclid(HOUR_SECS),
            TimeWindow::Day => secs.div_euclid(DAY_SECS),
            TimeWindow::Week => (secs.div_euclid(DAY_SECS) + EPOCH_TO_MONDAY_DAYS).div_euclid(7),
        }
    }

    fn bucket_start(&self, id: i64) -> Option<DateTime<Utc>> {
        let secs = match self {
            TimeWindow::Hour => id * HOUR_SECS,
            TimeWindow::Day => id * DAY_SECS,
            TimeWindow::Week => (id * 7 - EPOCH_TO_MONDAY_DAYS) * DAY_SECS,
        };
        DateTime::from_timestamp(secs, 0)
    }

    /// Hour of day at which the bucket starts.
    fn hour_of(&self, id: i64) -> usize {
        match self {
            TimeWindow::Hour => id.rem_euclid(24) as usize,
            TimeWindow::Day | TimeWindow::Week => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketAggregation {
    Count,
    Sum,
    Mean,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdMethod {
    Std,
    Iqr,
    Percentile,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct TimeSeriesParams {
    pub time_window: TimeWindow,
    pub aggregation_method: BucketAggregation,
    pub threshold_method: ThresholdMethod,
    pub threshold_multiplier: f64,
    pub seasonal_adjustment: bool,
    /// Minimum number of buckets for the global view.
    pub min_periods: usize,
    /// Minimum rows per account for the timing view.
    pub min_account_transactions: usize,
}

impl Default for TimeSeriesParams {
    fn default() -> Self {
        Self {
            time_window: TimeWindow::Hour,
            aggregation_method: BucketAggregation::Count,
            threshold_method: ThresholdMethod::Std,
            threshold_multiplier: 2.0,
            seasonal_adjustment: true,
            min_periods: 10,
            min_account_transactions: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TimeSeriesDetector;

impl Detector for TimeSeriesDetector {
    type Params = TimeSeriesParams;

    fn kind(&self) -> DetectorKind {
        DetectorKind::TimeSeries
    }

    fn validate_config(&self, params: &TimeSeriesParams) -> Result<(), ParamError> {
        check_positive("threshold_multiplier", params.threshold_multiplier)?;
        check_at_least("min_periods", params.min_periods, 3)?;
        check_at_least("min_account_transactions", params.min_account_transactions, 2)?;
        Ok(())
    }

    fn minimum_transactions(&self) -> usize {
        15
    }

    fn detect(
        &self,
        features: &FeatureSet,
        params: &TimeSeriesParams,
    ) -> Result<Vec<ScoreRecord>, DetectError> {
        let global = global_view(features, params);
        let mut account = account_view(features, params);

        let merged = global
            .into_iter()
            .enumerate()
            .map(|(pos, g)| match account.remove(&pos) {
                Some(a) => merge(g, a),
                None => g,
            })
            .collect();
        Ok(merged)
    }
}

// ── Global series ───────────────────────────────────────────────────

struct Series {
    first_id: i64,
    values: Vec<f64>,
    /// Σ|amount| per bucket, for contribution scaling.
    abs_totals: Vec<f64>,
}

fn build_series(features: &FeatureSet, params: &TimeSeriesParams) -> Series {
    let window = params.time_window;
    let ids: Vec<i64> = features
        .rows()
        .iter()
        .map(|r| window.bucket_id(&r.timestamp))
        .collect();
    let first_id = ids.iter().copied().min().unwrap_or(0);
    let last_id = ids.iter().copied().max().unwrap_or(0);
    let len = (last_id - first_id + 1) as usize;

    let mut counts = vec![0.0; len];
    let mut sums = vec![0.0; len];
    let mut abs_totals = vec![0.0; len];
    for (row, id) in features.rows().iter().zip(&ids) {
        let b = (id - first_id) as usize;
        counts[b] += 1.0;
        sums[b] += row.amount;
        abs_totals[b] += row.amount_abs;
    }

    let values = match params.aggregation_method {
        BucketAggregation::Count => counts,
        BucketAggregation::Sum => sums,
        BucketAggregation::Mean => sums
            .iter()
            .zip(&counts)
            .map(|(s, c)| if *c > 0.0 { s / c } else { 0.0 })
            .collect(),
    };

    Series {
        first_id,
        values,
        abs_totals,
    }
}

/// Remove a centred rolling-mean trend, then the mean per hour of day.
///
/// Positions without a full rolling window are undefined (`None`): they take
/// no part in the threshold band and are never flagged.
fn seasonally_adjust(values: &[f64], hours: &[usize]) -> Vec<Option<f64>> {
    let n = values.len();
    let w = (n / 4).min(24);
    if w < 3 {
        return values.iter().copied().map(Some).collect();
    }

    let behind = w / 2;
    let ahead = (w - 1) / 2;
    let detrended: Vec<Option<f64>> = (0..n)
        .map(|i| {
            if i < behind || i + ahead >= n {
                return None;
            }
            let window = &values[i - behind..=i + ahead];
            stats::mean(window).map(|m| values[i] - m)
        })
        .collect();

    if n < 48 {
        return detrended;
    }

    let mut by_hour: HashMap<usize, (f64, usize)> = HashMap::new();
    for (d, h) in detrended.iter().zip(hours) {
        if let Some(d) = d {
            let e = by_hour.entry(*h).or_insert((0.0, 0));
            e.0 += d;
            e.1 += 1;
        }
    }

    detrended
        .iter()
        .zip(hours)
        .map(|(d, h)| {
            let d = (*d)?;
            let (sum, count) = by_hour.get(h)?;
            Some(d - sum / *count as f64)
        })
        .collect()
}

struct Band {
    upper: f64,
    lower: f64,
}

fn threshold_band(values: &[f64], params: &TimeSeriesParams, adjusted: bool) -> Band {
    let m = params.threshold_multiplier;
    let floor = |v: f64| if adjusted { v } else { v.max(0.0) };
    match params.threshold_method {
        ThresholdMethod::Std => {
            let mean = stats::mean(values).unwrap_or(0.0);
            let std = stats::sample_std(values).unwrap_or(0.0);
            Band {
                upper: mean + m * std,
                lower: floor(mean - m * std),
            }
        }
        ThresholdMethod::Iqr => {
            let q25 = stats::quantile(values, 0.25).unwrap_or(0.0);
            let q75 = stats::quantile(values, 0.75).unwrap_or(0.0);
            let iqr = q75 - q25;
            Band {
                upper: q75 + m * iqr,
                lower: floor(q25 - m * iqr),
            }
        }
        ThresholdMethod::Percentile => {
            let p = if m <= 100.0 { m } else { 95.0 };
            Band {
                upper: stats::quantile(values, p / 100.0).unwrap_or(0.0),
                lower: stats::quantile(values, (100.0 - p) / 100.0).unwrap_or(0.0),
            }
        }
    }
}

struct FlaggedBucket {
    score: f64,
    confidence: f64,
    value: f64,
    expected: f64,
}

/// `values` may hold undefined buckets; statistics use the defined ones only.
fn flag_buckets(values: &[Option<f64>], band: &Band) -> Vec<Option<FlaggedBucket>> {
    let defined: Vec<f64> = values.iter().flatten().copied().collect();
    let expected = stats::mean(&defined).unwrap_or(0.0);
    let max = defined.iter().cloned().fold(f64::MIN, f64::max);
    let min = defined.iter().cloned().fold(f64::MAX, f64::min);

    values
        .iter()
        .map(|v| {
            let v = (*v)?;
            let (dev, range) = if v > band.upper + BAND_TOLERANCE {
                (v - band.upper, max - band.upper)
            } else if v < band.lower - BAND_TOLERANCE {
                (band.lower - v, band.lower - min)
            } else {
                return None;
            };
            let score = (0.5 + 0.5 * dev / range.max(1.0)).min(1.0);
            Some(FlaggedBucket {
                score,
                confidence: 0.7 + 0.3 * score,
                value: v,
                expected,
            })
        })
        .collect()
}

fn global_view(features: &FeatureSet, params: &TimeSeriesParams) -> Vec<ScoreRecord> {
    let series = build_series(features, params);
    let window = params.time_window;

    if series.values.len() < params.min_periods {
        return features
            .rows()
            .iter()
            .map(|r| {
                ScoreRecord::fallback(&r.id, 0.1, 0.2, "insufficient_time_periods")
                    .with("analysis_type", "global_timeseries")
                    .with("periods_available", series.values.len())
            })
            .collect();
    }

    let adjusted = params.seasonal_adjustment && series.values.len() > 24;
    let values = if adjusted {
        let hours: Vec<usize> = (0..series.values.len())
            .map(|i| window.hour_of(series.first_id + i as i64))
            .collect();
        seasonally_adjust(&series.values, &hours)
    } else {
        series.values.iter().copied().map(Some).collect()
    };

    let defined: Vec<f64> = values.iter().flatten().copied().collect();
    let band = threshold_band(&defined, params, adjusted);
    let flagged = flag_buckets(&values, &band);
    let scale_by_contribution = matches!(
        params.aggregation_method,
        BucketAggregation::Sum | BucketAggregation::Mean
    );

    features
        .rows()
        .iter()
        .map(|row| {
            let id = window.bucket_id(&row.timestamp);
            let b = (id - series.first_id) as usize;
            let Some(bucket) = &flagged[b] else {
                return ScoreRecord::fallback(&row.id, 0.1, 0.8, "normal_period")
                    .with("analysis_type", "global_timeseries");
            };

            let mut score = bucket.score;
            if scale_by_contribution {
                let total = series.abs_totals[b];
                let contribution = if total > 0.0 { row.amount_abs / total } else { 0.0 };
                score *= 0.5 + 0.5 * contribution;
            }
            let period = window
                .bucket_start(id)
                .map(|t| Value::from(t.to_rfc3339()))
                .unwrap_or(Value::Null);

            ScoreRecord::new(&row.id, score.min(1.0), bucket.confidence)
                .with("analysis_type", "global_timeseries")
                .with("anomalous_period", period)
                .with("period_score", bucket.score)
                .with("period_value", bucket.value)
                .with("expected_value", bucket.expected)
                .with("deviation", (bucket.value - bucket.expected).abs())
                .with("threshold_upper", band.upper)
                .with("threshold_lower", band.lower)
        })
        .collect()
}

// ── Account timing ──────────────────────────────────────────────────

/// Row position → account timing record.
fn account_view(features: &FeatureSet, params: &TimeSeriesParams) -> HashMap<usize, ScoreRecord> {
    let mut out = HashMap::with_capacity(features.len());
    for (account_id, positions) in features.accounts() {
        let base = |pos: usize, score: f64, confidence: f64| {
            ScoreRecord::new(&features.rows()[pos].id, score, confidence)
                .with("analysis_type", "account_timeseries")
                .with("account_id", account_id.as_str())
        };

        if positions.len() < params.min_account_transactions {
            for &pos in positions {
                let r = base(pos, 0.1, 0.3)
                    .with("reason", "insufficient_account_data")
                    .with("transaction_count", positions.len());
                out.insert(pos, r);
            }
            continue;
        }

        let deltas: Vec<f64> = positions
            .iter()
            .filter_map(|&p| features.rows()[p].hours_since_prev)
            .collect();

        if deltas.len() <= 3 {
            for &pos in positions {
                out.insert(pos, base(pos, 0.1, 0.3).with("reason", "insufficient_timing_data"));
            }
            continue;
        }

        let median = stats::median(&deltas).unwrap_or(0.0);
        let std = stats::sample_std(&deltas).unwrap_or(0.0);

        for &pos in positions {
            let Some(gap) = features.rows()[pos].hours_since_prev else {
                out.insert(pos, base(pos, 0.1, 0.5).with("reason", "first_transaction"));
                continue;
            };
            let r = base(pos, 0.1, 0.6)
                .with("time_diff_hours", gap)
                .with("median_time_diff", median);
            out.insert(pos, classify_gap(r, gap, median, std));
        }
    }
    out
}

fn classify_gap(mut r: ScoreRecord, gap: f64, median: f64, std: f64) -> ScoreRecord {
    if gap < median * 0.1 && gap < 1.0 {
        r.score = 0.8;
        r.confidence = 0.9;
        return r
            .with("timing_pattern", "rapid_transaction")
            .with("deviation_type", "too_fast");
    }
    if gap > median * 10.0 && gap > 168.0 {
        r.score = 0.6;
        r.confidence = 0.7;
        return r
            .with("timing_pattern", "delayed_transaction")
            .with("deviation_type", "too_slow");
    }
    if std > 0.0 {
        let z = (gap - median).abs() / std;
        if z > 3.0 {
            r.score = (0.3 + 0.1 * z).min(0.9);
            r.confidence = 0.8;
            return r.with("timing_pattern", "unusual_interval").with("z_score", z);
        }
    }
    r.with("timing_pattern", "normal")
}

/// Keep the higher-scoring view; nest the other one's metadata.
fn merge(global: ScoreRecord, account: ScoreRecord) -> ScoreRecord {
    if account.score > global.score {
        let confidence = account.confidence.max(global.confidence);
        let mut r = account.with("global_analysis", Value::Object(global.metadata));
        r.confidence = confidence;
        r.with("score_source", "account")
    } else {
        global
            .with("account_analysis", Value::Object(account.metadata))
            .with("score_source", "global")
    }
}
