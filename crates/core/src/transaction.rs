use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Unique transaction identifier within a batch.
pub type TransactionId = String;

/// A cleaned transaction as handed over by the ingestion layer.
///
/// `amount` is signed: debits are negative, credits positive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub id: TransactionId,
    pub amount: Decimal,
    pub timestamp: DateTime<Utc>,
    pub account_id: String,
}

impl Transaction {
    pub fn new(
        id: impl Into<TransactionId>,
        amount: Decimal,
        timestamp: DateTime<Utc>,
        account_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            amount,
            timestamp,
            account_id: account_id.into(),
        }
    }
}
