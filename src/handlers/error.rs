//! Ledger Service errors

use std::time::Duration;

use crate::domain::DomainError;
use crate::store::StoreError;

/// Failure taxonomy of ledger operations
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Validation, capacity-exceeded or authorization failure
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Store I/O failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Deadline expired before the operation finished
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
}
