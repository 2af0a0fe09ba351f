//! Transaction feature deriver.
//!
//! Turns a cleaned batch into an immutable, chronologically ordered
//! [`FeatureSet`] shared read-only by every detector:
//! - calendar features (hour, day of week, weekend, business hours)
//! - amount features (absolute value, log, category, debit/credit)
//! - per-account sequence and inter-arrival gap

use std::collections::HashSet;

use chrono::{DateTime, Datelike, Timelike, Utc};
use indexmap::IndexMap;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::transaction::Transaction;

/// Feature names addressable through [`DerivedTransaction::feature`].
pub const NUMERIC_FEATURES: &[&str] = &[
    "amount",
    "amount_abs",
    "amount_log",
    "hour",
    "day_of_week",
    "is_weekend",
    "is_business_hours",
    "year",
    "month",
    "day",
    "sequence",
    "hours_since_prev",
];

// ── Amount category ─────────────────────────────────────────────────

/// Coarse amount bucket on the absolute value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AmountCategory {
    Micro,
    Small,
    Medium,
    Large,
    Huge,
}

impl AmountCategory {
    /// Upper bounds are inclusive: 100, 1 000, 10 000, 100 000.
    pub fn from_abs(amount_abs: f64) -> Self {
        if amount_abs <= 100.0 {
            AmountCategory::Micro
        } else if amount_abs <= 1_000.0 {
            AmountCategory::Small
        } else if amount_abs <= 10_000.0 {
            AmountCategory::Medium
        } else if amount_abs <= 100_000.0 {
            AmountCategory::Large
        } else {
            AmountCategory::Huge
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AmountCategory::Micro => "micro",
            AmountCategory::Small => "small",
            AmountCategory::Medium => "medium",
            AmountCategory::Large => "large",
            AmountCategory::Huge => "huge",
        }
    }
}

// ── Derived row ─────────────────────────────────────────────────────

/// A transaction plus its derived features.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DerivedTransaction {
    pub id: String,
    pub account_id: String,
    pub timestamp: DateTime<Utc>,
    /// Position of the transaction in the caller's batch.
    pub input_index: usize,
    pub amount: f64,
    pub amount_abs: f64,
    /// `ln(1 + |amount|)`.
    pub amount_log: f64,
    pub amount_category: AmountCategory,
    pub is_debit: bool,
    pub is_credit: bool,
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    /// 0 = Monday … 6 = Sunday.
    pub day_of_week: u32,
    pub is_weekend: bool,
    /// Hour in 9..=17.
    pub is_business_hours: bool,
    /// 1-based chronological position within the account.
    pub sequence: usize,
    /// Hours since the previous transaction of the same account.
    pub hours_since_prev: Option<f64>,
}

impl DerivedTransaction {
    fn from_transaction(tx: &Transaction, input_index: usize) -> Result<Self, CoreError> {
        let amount = tx
            .amount
            .to_f64()
            .filter(|a| a.is_finite())
            .ok_or_else(|| CoreError::UnrepresentableAmount(tx.id.clone()))?;
        let amount_abs = amount.abs();
        let day_of_week = tx.timestamp.weekday().num_days_from_monday();
        let hour = tx.timestamp.hour();

        Ok(Self {
            id: tx.id.clone(),
            account_id: tx.account_id.clone(),
            timestamp: tx.timestamp,
            input_index,
            amount,
            amount_abs,
            amount_log: amount_abs.ln_1p(),
            amount_category: AmountCategory::from_abs(amount_abs),
            is_debit: amount < 0.0,
            is_credit: amount > 0.0,
            year: tx.timestamp.year(),
            month: tx.timestamp.month(),
            day: tx.timestamp.day(),
            hour,
            day_of_week,
            is_weekend: day_of_week >= 5,
            is_business_hours: (9..=17).contains(&hour),
            sequence: 0,
            hours_since_prev: None,
        })
    }

    /// Look up a numeric feature by name. Booleans map to 0/1.
    pub fn feature(&self, name: &str) -> Option<f64> {
        let flag = |b: bool| if b { 1.0 } else { 0.0 };
        match name {
            "amount" => Some(self.amount),
            "amount_abs" => Some(self.amount_abs),
            "amount_log" => Some(self.amount_log),
            "hour" => Some(self.hour as f64),
            "day_of_week" => Some(self.day_of_week as f64),
            "is_weekend" => Some(flag(self.is_weekend)),
            "is_business_hours" => Some(flag(self.is_business_hours)),
            "year" => Some(self.year as f64),
            "month" => Some(self.month as f64),
            "day" => Some(self.day as f64),
            "sequence" => Some(self.sequence as f64),
            "hours_since_prev" => self.hours_since_prev,
            _ => None,
        }
    }
}

// ── Feature set ─────────────────────────────────────────────────────

/// Immutable, chronologically sorted view of a batch.
///
/// Ties on timestamp keep the caller's order. Account groups hold row
/// positions in chronological order, keyed in order of first appearance.
#[derive(Debug, Clone)]
pub struct FeatureSet {
    rows: Vec<DerivedTransaction>,
    accounts: IndexMap<String, Vec<usize>>,
}

impl FeatureSet {
    /// Validate the ingestion contract and derive every feature.
    pub fn derive(transactions: &[Transaction]) -> Result<Self, CoreError> {
        if transactions.is_empty() {
            return Err(CoreError::EmptyBatch);
        }

        let mut seen = HashSet::with_capacity(transactions.len());
        for tx in transactions {
            if tx.id.is_empty() {
                return Err(CoreError::MissingField {
                    id: tx.id.clone(),
                    field: "id",
                });
            }
            if tx.account_id.is_empty() {
                return Err(CoreError::MissingField {
                    id: tx.id.clone(),
                    field: "account_id",
                });
            }
            if !seen.insert(tx.id.as_str()) {
                return Err(CoreError::DuplicateId(tx.id.clone()));
            }
        }

        let mut order: Vec<usize> = (0..transactions.len()).collect();
        // sort_by_key is stable, so equal timestamps keep input order.
        order.sort_by_key(|&i| transactions[i].timestamp);

        let mut rows = Vec::with_capacity(order.len());
        for &i in &order {
            rows.push(DerivedTransaction::from_transaction(&transactions[i], i)?);
        }

        let mut accounts: IndexMap<String, Vec<usize>> = IndexMap::new();
        for (pos, row) in rows.iter().enumerate() {
            accounts.entry(row.account_id.clone()).or_default().push(pos);
        }

        for positions in accounts.values() {
            let mut prev: Option<DateTime<Utc>> = None;
            for (seq, &pos) in positions.iter().enumerate() {
                let row = &mut rows[pos];
                row.sequence = seq + 1;
                row.hours_since_prev =
                    prev.map(|p| (row.timestamp - p).num_milliseconds() as f64 / 3_600_000.0);
                prev = Some(row.timestamp);
            }
        }

        Ok(Self { rows, accounts })
    }

    /// Rows in chronological order.
    pub fn rows(&self) -> &[DerivedTransaction] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Account id → chronological row positions.
    pub fn accounts(&self) -> &IndexMap<String, Vec<usize>> {
        &self.accounts
    }

    /// Row positions ordered as the caller supplied them.
    pub fn input_order(&self) -> Vec<usize> {
        let mut positions: Vec<usize> = (0..self.rows.len()).collect();
        positions.sort_by_key(|&p| self.rows[p].input_index);
        positions
    }

    /// Values of a named feature for the given rows, `None` for unknown names.
    pub fn column(&self, name: &str, positions: &[usize]) -> Option<Vec<f64>> {
        if !NUMERIC_FEATURES.contains(&name) {
            return None;
        }
        Some(
            positions
                .iter()
                .map(|&p| self.rows[p].feature(name).unwrap_or(0.0))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal::Decimal;

    fn tx(id: &str, amount: i64, day: u32, hour: u32, account: &str) -> Transaction {
        Transaction::new(
            id,
            Decimal::from(amount),
            // 2024-01-01 is a Monday.
            Utc.with_ymd_and_hms(2024, 1, day, hour, 0, 0).unwrap(),
            account,
        )
    }

    #[test]
    fn derives_calendar_features() {
        let set = FeatureSet::derive(&[tx("sat", 50, 6, 23, "a"), tx("mon", 50, 1, 10, "a")])
            .unwrap();
        let mon = &set.rows()[0];
        assert_eq!(mon.id, "mon");
        assert_eq!(mon.day_of_week, 0);
        assert!(!mon.is_weekend);
        assert!(mon.is_business_hours);

        let sat = &set.rows()[1];
        assert_eq!(sat.day_of_week, 5);
        assert!(sat.is_weekend);
        assert!(!sat.is_business_hours);
    }

    #[test]
    fn derives_amount_features() {
        let set = FeatureSet::derive(&[tx("d", -2_500, 2, 9, "a"), tx("c", 100, 2, 10, "a")])
            .unwrap();
        let debit = &set.rows()[0];
        assert!(debit.is_debit);
        assert!(!debit.is_credit);
        assert_eq!(debit.amount_abs, 2_500.0);
        assert!((debit.amount_log - 2_501f64.ln()).abs() < 1e-10);
        assert_eq!(debit.amount_category, AmountCategory::Medium);
        assert_eq!(set.rows()[1].amount_category, AmountCategory::Micro);
    }

    #[test]
    fn amount_category_boundaries() {
        assert_eq!(AmountCategory::from_abs(0.0), AmountCategory::Micro);
        assert_eq!(AmountCategory::from_abs(100.0), AmountCategory::Micro);
        assert_eq!(AmountCategory::from_abs(100.01), AmountCategory::Small);
        assert_eq!(AmountCategory::from_abs(100_000.0), AmountCategory::Large);
        assert_eq!(AmountCategory::from_abs(100_000.5), AmountCategory::Huge);
    }

    #[test]
    fn sorts_chronologically_and_groups_accounts() {
        let set = FeatureSet::derive(&[
            tx("b2", 10, 3, 12, "b"),
            tx("a1", 10, 1, 12, "a"),
            tx("b1", 10, 2, 12, "b"),
            tx("a2", 10, 4, 18, "a"),
        ])
        .unwrap();
        let ids: Vec<&str> = set.rows().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a1", "b1", "b2", "a2"]);

        let accounts: Vec<&str> = set.accounts().keys().map(|k| k.as_str()).collect();
        assert_eq!(accounts, vec!["a", "b"]);
        assert_eq!(set.accounts()["a"], vec![0, 3]);

        let a2 = &set.rows()[3];
        assert_eq!(a2.sequence, 2);
        assert_eq!(a2.hours_since_prev, Some(78.0));
        assert_eq!(set.rows()[0].hours_since_prev, None);

        let input: Vec<&str> = set
            .input_order()
            .into_iter()
            .map(|p| set.rows()[p].id.as_str())
            .collect();
        assert_eq!(input, vec!["b2", "a1", "b1", "a2"]);
    }

    #[test]
    fn equal_timestamps_keep_input_order() {
        let set =
            FeatureSet::derive(&[tx("x", 1, 1, 8, "a"), tx("y", 2, 1, 8, "a")]).unwrap();
        assert_eq!(set.rows()[0].id, "x");
        assert_eq!(set.rows()[1].id, "y");
    }

    #[test]
    fn rejects_contract_violations() {
        assert_eq!(FeatureSet::derive(&[]).unwrap_err(), CoreError::EmptyBatch);
        assert_eq!(
            FeatureSet::derive(&[tx("t", 1, 1, 1, "a"), tx("t", 2, 1, 2, "a")]).unwrap_err(),
            CoreError::DuplicateId("t".into())
        );
        assert!(matches!(
            FeatureSet::derive(&[tx("t", 1, 1, 1, "")]).unwrap_err(),
            CoreError::MissingField { field: "account_id", .. }
        ));
    }

    #[test]
    fn column_lookup() {
        let set = FeatureSet::derive(&[tx("t", 7, 1, 3, "a")]).unwrap();
        assert_eq!(set.column("hour", &[0]), Some(vec![3.0]));
        assert_eq!(set.column("nope", &[0]), None);
    }
}
