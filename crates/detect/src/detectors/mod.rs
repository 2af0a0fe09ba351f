//! Built-in detectors.
//!
//! - [`zscore`]: per-account amount deviation
//! - [`correlation`]: departures from correlated feature pairs
//! - [`timeseries`]: bucketed volume spikes and odd transaction gaps
//! - [`weekend`]: weekend activity against a weekday baseline
//! - [`isolation_forest`]: unsupervised isolation forest

pub mod correlation;
pub mod isolation_forest;
pub mod timeseries;
pub mod weekend;
pub mod zscore;

pub use correlation::{CorrelationDetector, CorrelationParams, CorrelationType};
pub use isolation_forest::{IsolationForestDetector, IsolationForestParams, MaxSamples};
pub use timeseries::{
    BucketAggregation, ThresholdMethod, TimeSeriesDetector, TimeSeriesParams, TimeWindow,
};
pub use weekend::{AmountThresholdMethod, WeekendThresholdDetector, WeekendThresholdParams};
pub use zscore::{ZScoreDetector, ZScoreParams};

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use ledgerlens_core::{FeatureSet, Transaction};
    use rust_decimal::prelude::FromPrimitive;
    use rust_decimal::Decimal;

    pub fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, hour, minute, 0)
            .single()
            .unwrap_or_else(|| panic!("invalid test timestamp {year}-{month}-{day} {hour}:{minute}"))
    }

    pub fn tx(id: &str, account: &str, amount: f64, timestamp: DateTime<Utc>) -> Transaction {
        let amount = Decimal::from_f64(amount)
            .unwrap_or_else(|| panic!("amount {amount} is not representable"));
        Transaction::new(id, amount, timestamp, account)
    }

    /// One transaction per day at noon, starting 2024-01-01.
    pub fn daily(account: &str, amounts: &[f64]) -> Vec<Transaction> {
        let start = at(2024, 1, 1, 12, 0);
        amounts
            .iter()
            .enumerate()
            .map(|(i, &a)| {
                tx(
                    &format!("{account}-{i}"),
                    account,
                    a,
                    start + Duration::days(i as i64),
                )
            })
            .collect()
    }

    pub fn batch(transactions: &[Transaction]) -> FeatureSet {
        FeatureSet::derive(transactions).expect("valid test batch")
    }
}
