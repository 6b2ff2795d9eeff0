//! Domain Error Types
//!
//! Pure domain errors that don't depend on infrastructure.

use rust_decimal::Decimal;
use thiserror::Error;

use super::AmountError;

/// Business rule violations of the ledger.
///
/// These are rejected synchronously: nothing is persisted and nothing is emitted.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    /// Invalid amount (zero, negative, or too precise)
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// User identity is not a positive integer
    #[error("Invalid user ID: {0}")]
    InvalidUserId(i64),

    /// Creating the transaction would push the user's cumulative total over the cap
    #[error("Total amount exceeds maximum: current total {current_total:.2}, requested {requested:.2}, max {max_allowed:.2}")]
    CapacityExceeded {
        current_total: Decimal,
        requested: Decimal,
        max_allowed: Decimal,
    },

    /// Caller is not the subject of the operation
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

impl DomainError {
    /// Create a capacity exceeded error
    pub fn capacity_exceeded(current_total: Decimal, requested: Decimal, max_allowed: Decimal) -> Self {
        Self::CapacityExceeded {
            current_total,
            requested,
            max_allowed,
        }
    }

    /// Check if this is a validation error (malformed input)
    pub fn is_validation_error(&self) -> bool {
        matches!(self, Self::InvalidAmount(_) | Self::InvalidUserId(_))
    }
}

impl From<AmountError> for DomainError {
    fn from(err: AmountError) -> Self {
        Self::InvalidAmount(err.to_string())
    }
}
