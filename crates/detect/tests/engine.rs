//! End-to-end scoring through the public API.

use chrono::{DateTime, Duration, TimeZone, Utc};
use ledgerlens_core::{FeatureSet, Transaction};
use ledgerlens_detect::aggregate::{fuse, Contribution};
use ledgerlens_detect::detectors::{
    IsolationForestDetector, IsolationForestParams, WeekendThresholdDetector,
    WeekendThresholdParams, ZScoreDetector, ZScoreParams,
};
use ledgerlens_detect::{
    presets, AggregationMethod, AggregationSettings, AnalysisEngine, ConfigError, DetectError,
    Detector, DetectorEntry, Strategy,
};
use proptest::prelude::*;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

// ── Fixtures ────────────────────────────────────────────────────────

fn ts(day_offset: i64, hour: u32) -> DateTime<Utc> {
    // 2024-01-01 is a Monday.
    Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap() + Duration::days(day_offset)
}

fn tx(id: &str, account: &str, amount: f64, at: DateTime<Utc>) -> Transaction {
    Transaction::new(id, Decimal::from_f64(amount).unwrap(), at, account)
}

/// Two accounts over eight weeks, every day including weekends, one spike.
fn ledger() -> Vec<Transaction> {
    let mut txs = Vec::new();
    for account in ["alice", "bob"] {
        for day in 0..56 {
            let amount = 80.0 + ((day * 7) % 13) as f64;
            txs.push(tx(
                &format!("{account}-{day}"),
                account,
                amount,
                ts(day, 10 + (day % 6) as u32),
            ));
        }
    }
    txs.push(tx("alice-spike", "alice", 9_500.0, ts(40, 3)));
    txs
}

fn comprehensive_strategy() -> Strategy {
    presets::load("comprehensive").unwrap()
}

// ── Detector scenarios ──────────────────────────────────────────────

#[test]
fn zscore_flags_a_spike_after_a_flat_history() {
    let mut amounts = vec![100.0; 22];
    amounts.push(500.0);
    let txs: Vec<_> = amounts
        .iter()
        .enumerate()
        .map(|(i, a)| tx(&format!("t{i}"), "acct", *a, ts(i as i64, 12)))
        .collect();
    let features = FeatureSet::derive(&txs).unwrap();
    let params = ZScoreParams {
        window_size: 10,
        threshold: 2.0,
        ..Default::default()
    };
    let records = ZScoreDetector.detect(&features, &params).unwrap();
    let spike = records.iter().find(|r| r.transaction_id == "t22").unwrap();
    assert!(spike.score > 2.0, "score {}", spike.score);
    assert!(spike.confidence >= 0.9);
}

#[test]
fn weekday_only_batches_score_as_weekday_transactions() {
    let txs: Vec<_> = (0..5)
        .map(|d| tx(&format!("t{d}"), "acct", 100.0 + d as f64, ts(d, 9)))
        .collect();
    let features = FeatureSet::derive(&txs).unwrap();
    let records = WeekendThresholdDetector
        .detect(&features, &WeekendThresholdParams::default())
        .unwrap();
    assert_eq!(records.len(), 5);
    for r in &records {
        assert_eq!((r.score, r.confidence), (0.1, 0.8));
        assert_eq!(r.reason(), Some("weekday_transaction"));
    }
}

#[test]
fn isolation_forest_needs_enough_rows() {
    let txs: Vec<_> = (0..10)
        .map(|d| tx(&format!("t{d}"), "acct", 50.0, ts(d, 9)))
        .collect();
    let features = FeatureSet::derive(&txs).unwrap();
    let records = IsolationForestDetector::new()
        .detect(&features, &IsolationForestParams::default())
        .unwrap();
    assert!(records
        .iter()
        .all(|r| r.score == 0.1 && r.reason() == Some("insufficient_data")));
}

// ── Engine ──────────────────────────────────────────────────────────

#[test]
fn every_transaction_gets_one_verdict() {
    let txs = ledger();
    let outcome = AnalysisEngine::default()
        .analyze(&txs, &comprehensive_strategy())
        .unwrap();

    assert_eq!(outcome.scores.len(), txs.len());
    for (score, tx) in outcome.scores.iter().zip(&txs) {
        assert_eq!(score.transaction_id, tx.id);
        assert!((0.0..=1.0).contains(&score.final_score));
        assert!((0.0..=1.0).contains(&score.final_confidence));
        assert_eq!(score.contributing_detectors.len(), 3);
    }
    assert_eq!(outcome.summary.detectors_executed, 3);
    assert!(outcome.summary.detectors_failed.is_empty());
    assert_eq!(outcome.detector_records.len(), 3);

    let spike = outcome
        .scores
        .iter()
        .find(|s| s.transaction_id == "alice-spike")
        .unwrap();
    let typical = outcome
        .scores
        .iter()
        .find(|s| s.transaction_id == "alice-22")
        .unwrap();
    assert!(spike.final_score > typical.final_score);
}

#[test]
fn repeated_runs_are_identical() {
    let txs = ledger();
    let strategy = comprehensive_strategy();
    let engine = AnalysisEngine::default();
    let first = engine.analyze(&txs, &strategy).unwrap();
    let second = engine.analyze(&txs, &strategy).unwrap();
    assert_eq!(first.scores, second.scores);
}

#[test]
fn detector_order_does_not_change_the_verdict() {
    let txs = ledger();
    let strategy = comprehensive_strategy();
    let mut reversed = strategy.clone();
    reversed.detectors.reverse();

    let engine = AnalysisEngine::default();
    let a = engine.analyze(&txs, &strategy).unwrap();
    let b = engine.analyze(&txs, &reversed).unwrap();
    assert_eq!(a.scores, b.scores);
}

#[test]
fn mean_threshold_marks_anomalies() {
    let txs = ledger();
    let strategy = Strategy::new(vec![DetectorEntry::new("statistical", "zscore")])
        .with_aggregation(AggregationSettings {
            method: AggregationMethod::Mean,
            confidence_threshold: 0.9,
            ..Default::default()
        });
    let outcome = AnalysisEngine::default().analyze(&txs, &strategy).unwrap();
    for s in &outcome.scores {
        assert_eq!(s.is_anomaly, s.final_score >= 0.9);
    }
    assert!(outcome
        .anomalies()
        .any(|s| s.transaction_id == "alice-spike"));
    assert_eq!(outcome.summary.anomaly_count, outcome.anomalies().count());
}

#[test]
fn strategy_validation_names_the_offending_field() {
    let engine = AnalysisEngine::default();
    let txs = ledger();

    let empty = Strategy::from_yaml_str("algorithms: []\n").unwrap();
    match engine.analyze(&txs, &empty).unwrap_err() {
        DetectError::Config(e) => {
            assert!(matches!(e, ConfigError::EmptyStrategy { .. }));
            assert_eq!(e.field(), Some("detectors"));
        }
        other => panic!("unexpected error {other}"),
    }

    let unknown = Strategy::from_yaml_str(
        "algorithms:\n  - type: statistical\n    name: zscore\n  - type: rule_based\n    name: periodization\n",
    )
    .unwrap();
    match engine.analyze(&txs, &unknown).unwrap_err() {
        DetectError::Config(e) => {
            assert_eq!(e.field(), Some("detectors[1]"));
            assert!(e.to_string().contains("rule_based.periodization"));
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn invalid_batches_are_rejected() {
    let mut txs = ledger();
    let dup = txs[0].clone();
    txs.push(dup);
    let err = AnalysisEngine::default()
        .analyze(&txs, &comprehensive_strategy())
        .unwrap_err();
    assert!(matches!(err, DetectError::InvalidInput(_)));
}

// ── Fusion property ─────────────────────────────────────────────────

const DETECTORS: [(&str, &str); 5] = [
    ("statistical.zscore", "statistical"),
    ("statistical.correlation", "statistical"),
    ("statistical.timeseries", "statistical"),
    ("rule_based.weekend_threshold", "rule_based"),
    ("ml_based.isolation_forest", "ml_based"),
];

proptest! {
    #[test]
    fn max_fusion_returns_the_largest_score(
        scores in prop::collection::vec((0.0f64..=1.0, 0.0f64..=1.0), 1..=5)
    ) {
        let contributions: Vec<Contribution<'_>> = scores
            .iter()
            .zip(DETECTORS)
            .map(|(&(score, confidence), (detector, category))| Contribution {
                detector,
                category,
                score,
                confidence,
            })
            .collect();
        let fused = fuse("t", &contributions, &AggregationSettings::default());
        let expected = scores.iter().map(|(s, _)| *s).fold(f64::MIN, f64::max);
        prop_assert_eq!(fused.final_score, expected);
        prop_assert_eq!(fused.is_anomaly, expected >= 0.7);
    }
}
