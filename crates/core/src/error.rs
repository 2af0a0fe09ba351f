use thiserror::Error;

/// Violations of the ingestion contract, raised before any scoring.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("Transaction batch is empty")]
    EmptyBatch,

    #[error("Duplicate transaction id: {0}")]
    DuplicateId(String),

    #[error("Transaction {id} has an empty {field}")]
    MissingField { id: String, field: &'static str },

    #[error("Transaction {0} has an amount outside the f64 range")]
    UnrepresentableAmount(String),
}
