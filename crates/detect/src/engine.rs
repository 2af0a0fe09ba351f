//! Strategy aggregation engine.
//!
//! One analysis run:
//! 1. Resolve the strategy through the registry (fails before any scoring).
//! 2. Derive the shared [`FeatureSet`] once.
//! 3. Run every configured detector, concurrently unless disabled.
//! 4. Drop detectors whose run fails, panics included.
//! 5. Fuse the surviving scores per transaction, in input order.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use indexmap::IndexMap;
use ledgerlens_core::{EngineSettings, FeatureSet, ScoreRecord, Transaction};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::aggregate::{fuse, AggregatedScore, Contribution};
use crate::detector::ensure_coverage;
use crate::error::{DetectError, DetectorFailure};
use crate::registry::{ConfiguredDetector, DetectorRegistry, StrategyPlan};
use crate::strategy::{AggregationMethod, Strategy};

/// Records above this score count as anomalies in execution statistics.
const EXECUTION_ANOMALY_SCORE: f64 = 0.5;

// ── Outcome types ───────────────────────────────────────────────────

/// Bookkeeping for one detector that ran to completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorExecution {
    pub detector: String,
    pub transactions_processed: usize,
    pub elapsed_ms: u64,
    pub anomalies_found: usize,
    pub anomaly_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_transactions: usize,
    pub anomaly_count: usize,
    pub anomaly_rate: f64,
    pub detectors_executed: usize,
    pub detectors_failed: Vec<DetectorFailure>,
    pub executions: Vec<DetectorExecution>,
    pub method: AggregationMethod,
    pub confidence_threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOutcome {
    /// One verdict per input transaction, in input order.
    pub scores: Vec<AggregatedScore>,
    /// Raw records of every successful detector, in strategy order.
    pub detector_records: IndexMap<String, Vec<ScoreRecord>>,
    pub summary: RunSummary,
}

impl AnalysisOutcome {
    pub fn anomalies(&self) -> impl Iterator<Item = &AggregatedScore> {
        self.scores.iter().filter(|s| s.is_anomaly)
    }
}

// ── Engine ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct AnalysisEngine {
    registry: DetectorRegistry,
    parallel: bool,
}

impl Default for AnalysisEngine {
    fn default() -> Self {
        Self::new(DetectorRegistry::new())
    }
}

struct DetectorRun<'a> {
    detector: &'a ConfiguredDetector,
    result: Result<Vec<ScoreRecord>, DetectError>,
    elapsed_ms: u64,
}

impl AnalysisEngine {
    pub fn new(registry: DetectorRegistry) -> Self {
        Self {
            registry,
            parallel: true,
        }
    }

    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self::default().with_parallel(settings.parallel)
    }

    /// Run detectors one at a time instead of on the rayon pool.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn registry(&self) -> &DetectorRegistry {
        &self.registry
    }

    pub fn analyze(
        &self,
        transactions: &[Transaction],
        strategy: &Strategy,
    ) -> Result<AnalysisOutcome, DetectError> {
        let plan = self.registry.resolve(strategy)?;
        self.analyze_plan(transactions, &plan)
    }

    pub fn analyze_plan(
        &self,
        transactions: &[Transaction],
        plan: &StrategyPlan,
    ) -> Result<AnalysisOutcome, DetectError> {
        let start = Instant::now();
        let features = FeatureSet::derive(transactions)?;

        for w in self.registry.check_compatibility(plan, features.len()) {
            debug!(path = %w.path, "{}", w.message);
        }

        let runs: Vec<DetectorRun<'_>> = if self.parallel {
            plan.detectors
                .par_iter()
                .map(|d| self.execute(d, &features))
                .collect()
        } else {
            plan.detectors
                .iter()
                .map(|d| self.execute(d, &features))
                .collect()
        };

        let outcome = self.assemble(transactions, plan, runs)?;
        info!(
            transactions = outcome.summary.total_transactions,
            anomalies = outcome.summary.anomaly_count,
            detectors = outcome.summary.detectors_executed,
            failed = outcome.summary.detectors_failed.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "analysis completed"
        );
        Ok(outcome)
    }

    /// Split runs into survivors and failures, then fuse the survivors.
    fn assemble(
        &self,
        transactions: &[Transaction],
        plan: &StrategyPlan,
        runs: Vec<DetectorRun<'_>>,
    ) -> Result<AnalysisOutcome, DetectError> {
        let mut detector_records = IndexMap::new();
        let mut executions = Vec::new();
        let mut failures = Vec::new();
        for run in runs {
            let key = run.detector.key();
            match run.result {
                Ok(records) => {
                    let anomalies_found = records
                        .iter()
                        .filter(|r| r.score > EXECUTION_ANOMALY_SCORE)
                        .count();
                    info!(
                        detector = %key,
                        elapsed_ms = run.elapsed_ms,
                        anomalies_found,
                        "detector completed"
                    );
                    executions.push(DetectorExecution {
                        detector: key.clone(),
                        transactions_processed: records.len(),
                        elapsed_ms: run.elapsed_ms,
                        anomalies_found,
                        anomaly_rate: rate(anomalies_found, records.len()),
                    });
                    detector_records.insert(key, records);
                }
                Err(e) => {
                    warn!(detector = %key, error = %e, "detector failed, excluded from aggregation");
                    failures.push(DetectorFailure {
                        detector: key,
                        error: e.to_string(),
                    });
                }
            }
        }

        if detector_records.is_empty() {
            return Err(DetectError::AllDetectorsFailed { failures });
        }

        let scores = self.aggregate(transactions, plan, &detector_records);
        let anomaly_count = scores.iter().filter(|s| s.is_anomaly).count();
        let summary = RunSummary {
            total_transactions: scores.len(),
            anomaly_count,
            anomaly_rate: rate(anomaly_count, scores.len()),
            detectors_executed: detector_records.len(),
            detectors_failed: failures,
            executions,
            method: plan.aggregation.method,
            confidence_threshold: plan.aggregation.confidence_threshold,
        };

        Ok(AnalysisOutcome {
            scores,
            detector_records,
            summary,
        })
    }

    /// Run one detector. A panic or incomplete coverage comes back as `Err`
    /// so the caller can drop the detector and carry on.
    fn execute<'a>(&self, detector: &'a ConfiguredDetector, features: &FeatureSet) -> DetectorRun<'a> {
        let start = Instant::now();
        let key = detector.key();
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.registry.run(detector, features)))
            .unwrap_or_else(|payload| {
                Err(DetectError::execution(
                    key.as_str(),
                    format!("panicked: {}", panic_message(payload.as_ref())),
                ))
            });
        let result = checked(&key, features, result);
        DetectorRun {
            detector,
            result,
            elapsed_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn aggregate(
        &self,
        transactions: &[Transaction],
        plan: &StrategyPlan,
        detector_records: &IndexMap<String, Vec<ScoreRecord>>,
    ) -> Vec<AggregatedScore> {
        let categories: HashMap<String, &'static str> = plan
            .detectors
            .iter()
            .map(|d| (d.key(), d.kind().category()))
            .collect();

        let lookups: Vec<(&str, &str, HashMap<&str, &ScoreRecord>)> = detector_records
            .iter()
            .map(|(key, records)| {
                let category = categories.get(key).copied().unwrap_or_default();
                let by_id = records
                    .iter()
                    .map(|r| (r.transaction_id.as_str(), r))
                    .collect();
                (key.as_str(), category, by_id)
            })
            .collect();

        transactions
            .iter()
            .map(|tx| {
                let contributions: Vec<Contribution<'_>> = lookups
                    .iter()
                    .filter_map(|(detector, category, by_id)| {
                        by_id.get(tx.id.as_str()).map(|r| Contribution {
                            detector,
                            category,
                            score: r.score,
                            confidence: r.confidence,
                        })
                    })
                    .collect();
                fuse(&tx.id, &contributions, &plan.aggregation)
            })
            .collect()
    }
}

fn checked(
    key: &str,
    features: &FeatureSet,
    result: Result<Vec<ScoreRecord>, DetectError>,
) -> Result<Vec<ScoreRecord>, DetectError> {
    let records = result?;
    ensure_coverage(key, features, &records)?;
    Ok(records)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn rate(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64
    }
}
