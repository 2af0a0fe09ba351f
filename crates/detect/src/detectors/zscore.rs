//! Rolling z-score on transaction amounts.
//!
//! Each transaction is compared with the account's recent history (or, with
//! `use_rolling_window = false`, with the account's overall statistics).
//! The mean comes from the preceding `window_size` transactions; the
//! dispersion is the sample standard deviation of that window together with
//! the scored transaction, so an isolated spike after a flat history still
//! registers while a fully constant series stays at zero.

use ledgerlens_core::{FeatureSet, ScoreRecord};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::detector::{
    check_at_least, check_positive, fallback_all, into_row_order, Detector, DetectorKind,
};
use crate::error::{DetectError, ParamError};
use crate::stats;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ZScoreParams {
    /// Z-score at which confidence saturates.
    pub threshold: f64,
    pub window_size: usize,
    /// Accounts with fewer rows are not scored.
    pub min_transactions: usize,
    pub use_rolling_window: bool,
    pub account_specific: bool,
    pub absolute_zscore: bool,
}

impl Default for ZScoreParams {
    fn default() -> Self {
        Self {
            threshold: 3.0,
            window_size: 30,
            min_transactions: 5,
            use_rolling_window: true,
            account_specific: true,
            absolute_zscore: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ZScoreDetector;

impl Detector for ZScoreDetector {
    type Params = ZScoreParams;

    fn kind(&self) -> DetectorKind {
        DetectorKind::ZScore
    }

    fn validate_config(&self, params: &ZScoreParams) -> Result<(), ParamError> {
        check_positive("threshold", params.threshold)?;
        check_at_least("window_size", params.window_size, 2)?;
        check_at_least("min_transactions", params.min_transactions, 1)?;
        Ok(())
    }

    fn minimum_transactions(&self) -> usize {
        2
    }

    fn detect(
        &self,
        features: &FeatureSet,
        params: &ZScoreParams,
    ) -> Result<Vec<ScoreRecord>, DetectError> {
        let groups: Vec<Vec<usize>> = if params.account_specific {
            features.accounts().values().cloned().collect()
        } else {
            vec![(0..features.len()).collect()]
        };

        let tagged: Vec<(usize, ScoreRecord)> = groups
            .par_iter()
            .flat_map_iter(|positions| score_group(features, positions, params))
            .collect();

        Ok(into_row_order(tagged))
    }
}

fn score_group(
    features: &FeatureSet,
    positions: &[usize],
    params: &ZScoreParams,
) -> Vec<(usize, ScoreRecord)> {
    if positions.len() < params.min_transactions {
        return fallback_all(features, positions, 0.0, 0.0, "insufficient_account_history");
    }

    let amounts: Vec<f64> = positions
        .iter()
        .map(|&p| features.rows()[p].amount)
        .collect();

    if params.use_rolling_window {
        rolling_scores(features, positions, &amounts, params)
    } else {
        global_scores(features, positions, &amounts, params)
    }
}

fn rolling_scores(
    features: &FeatureSet,
    positions: &[usize],
    amounts: &[f64],
    params: &ZScoreParams,
) -> Vec<(usize, ScoreRecord)> {
    let mut out = Vec::with_capacity(positions.len());
    for (i, &pos) in positions.iter().enumerate() {
        let row = &features.rows()[pos];
        let start = i.saturating_sub(params.window_size);
        let window = &amounts[start..i];

        let record = if window.len() < 2 {
            ScoreRecord::fallback(&row.id, 0.0, 0.0, "insufficient_history")
        } else {
            // Window plus the current amount, contiguous in `amounts`.
            let spread = stats::sample_std(&amounts[start..=i]).unwrap_or(0.0);
            let window_mean = stats::mean(window).unwrap_or(0.0);
            zscore_record(&row.id, row.amount, window_mean, spread, params)
                .with("window_mean", window_mean)
                .with("window_std", spread)
        };

        out.push((
            pos,
            record
                .with("window_size_used", window.len())
                .with("analysis_type", "rolling")
                .with("account_id", row.account_id.as_str()),
        ));
    }
    out
}

fn global_scores(
    features: &FeatureSet,
    positions: &[usize],
    amounts: &[f64],
    params: &ZScoreParams,
) -> Vec<(usize, ScoreRecord)> {
    let (Some(m), Some(s)) = (stats::mean(amounts), stats::sample_std(amounts)) else {
        return fallback_all(features, positions, 0.0, 0.0, "insufficient_history");
    };

    positions
        .iter()
        .map(|&pos| {
            let row = &features.rows()[pos];
            let record = zscore_record(&row.id, row.amount, m, s, params)
                .with("window_mean", m)
                .with("window_std", s)
                .with("window_size_used", amounts.len())
                .with("analysis_type", "global")
                .with("account_id", row.account_id.as_str());
            (pos, record)
        })
        .collect()
}

fn zscore_record(id: &str, amount: f64, m: f64, s: f64, params: &ZScoreParams) -> ScoreRecord {
    if s <= f64::EPSILON {
        return ScoreRecord::new(id, 0.0, 0.0).with("z_score", 0.0);
    }
    let z = (amount - m) / s;
    let score = if params.absolute_zscore { z.abs() } else { z };
    let confidence = (z.abs() / params.threshold).clamp(0.0, 1.0);
    ScoreRecord::new(id, score, confidence).with("z_score", z)
}
