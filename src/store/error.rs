//! Ledger Store Errors

/// Errors that can occur in the ledger store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A persisted row violates a domain invariant
    #[error("Invalid row data: {0}")]
    InvalidRow(String),

    /// Store cannot be reached
    #[error("Store unavailable")]
    Unavailable,
}
