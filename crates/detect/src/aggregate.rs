//! Score fusion: one verdict per transaction from many detector scores.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::strategy::{AggregationMethod, AggregationSettings, TieBreak};

/// One detector's (clamped) opinion on one transaction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contribution<'a> {
    /// `category.name`
    pub detector: &'a str,
    pub category: &'a str,
    pub score: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectorScore {
    pub score: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedScore {
    pub transaction_id: String,
    pub final_score: f64,
    pub final_confidence: f64,
    pub is_anomaly: bool,
    pub contributing_detectors: Vec<String>,
    pub per_detector_scores: IndexMap<String, DetectorScore>,
}

/// Fuse the contributions for one transaction.
///
/// Scores and confidences are clamped into `[0, 1]` first. The result does
/// not depend on the order of `contributions`.
pub fn fuse(
    transaction_id: &str,
    contributions: &[Contribution<'_>],
    settings: &AggregationSettings,
) -> AggregatedScore {
    let mut sorted: Vec<Contribution<'_>> = contributions
        .iter()
        .map(|c| Contribution {
            score: clamp_unit(c.score),
            confidence: clamp_unit(c.confidence),
            ..*c
        })
        .collect();
    // Fixed summation order keeps mean/weighted results bit-identical.
    sorted.sort_by(|a, b| a.detector.cmp(b.detector));

    let (final_score, final_confidence) = match settings.method {
        AggregationMethod::Max => extreme(&sorted, true, settings.tie_break),
        AggregationMethod::Min => extreme(&sorted, false, settings.tie_break),
        AggregationMethod::Mean => {
            let n = sorted.len() as f64;
            if sorted.is_empty() {
                (0.0, 0.0)
            } else {
                (
                    sorted.iter().map(|c| c.score).sum::<f64>() / n,
                    sorted.iter().map(|c| c.confidence).sum::<f64>() / n,
                )
            }
        }
        AggregationMethod::WeightedAverage => {
            let total: f64 = sorted.iter().map(|c| settings.weight(c.category)).sum();
            if total > 0.0 {
                let (s, c) = sorted.iter().fold((0.0, 0.0), |(s, c), x| {
                    let w = settings.weight(x.category);
                    (s + w * x.score, c + w * x.confidence)
                });
                (s / total, c / total)
            } else {
                (0.0, 0.0)
            }
        }
    };

    AggregatedScore {
        transaction_id: transaction_id.to_string(),
        final_score,
        final_confidence,
        is_anomaly: final_score >= settings.confidence_threshold,
        contributing_detectors: sorted.iter().map(|c| c.detector.to_string()).collect(),
        per_detector_scores: sorted
            .iter()
            .map(|c| {
                (
                    c.detector.to_string(),
                    DetectorScore {
                        score: c.score,
                        confidence: c.confidence,
                    },
                )
            })
            .collect(),
    }
}

fn clamp_unit(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

/// Highest (or lowest) score; equal scores are resolved by confidence.
fn extreme(contributions: &[Contribution<'_>], highest: bool, tie_break: TieBreak) -> (f64, f64) {
    let mut best: Option<(f64, f64)> = None;
    for c in contributions {
        best = match best {
            None => Some((c.score, c.confidence)),
            Some((s, conf)) => {
                let better_score = if highest { c.score > s } else { c.score < s };
                let better_conf = match tie_break {
                    TieBreak::HighestConfidence => c.confidence > conf,
                    TieBreak::LowestConfidence => c.confidence < conf,
                };
                if better_score || (c.score == s && better_conf) {
                    Some((c.score, c.confidence))
                } else {
                    Some((s, conf))
                }
            }
        };
    }
    best.unwrap_or((0.0, 0.0))
}
