use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Free-form, algorithm-specific explanation attached to a score.
pub type Metadata = serde_json::Map<String, Value>;

/// One detector's verdict on one transaction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreRecord {
    pub transaction_id: String,
    pub score: f64,
    pub confidence: f64,
    #[serde(default)]
    pub metadata: Metadata,
}

impl ScoreRecord {
    pub fn new(transaction_id: impl Into<String>, score: f64, confidence: f64) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            score,
            confidence,
            metadata: Metadata::new(),
        }
    }

    /// Low-confidence record emitted when there is not enough data to judge.
    pub fn fallback(
        transaction_id: impl Into<String>,
        score: f64,
        confidence: f64,
        reason: &str,
    ) -> Self {
        Self::new(transaction_id, score, confidence).with("reason", reason)
    }

    /// Builder-style metadata insert.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn reason(&self) -> Option<&str> {
        self.metadata.get("reason").and_then(Value::as_str)
    }
}
