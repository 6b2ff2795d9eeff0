//! Command definitions
//!
//! Commands represent intentions to change the ledger.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Command to record a new transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTransactionCommand {
    /// Raw user identity, validated by the handler
    pub user_id: i64,
    /// Raw amount, validated by the handler
    pub amount: Decimal,
    #[serde(default)]
    pub description: String,
}

impl CreateTransactionCommand {
    pub fn new(user_id: i64, amount: Decimal) -> Self {
        Self {
            user_id,
            amount,
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Result of a bulk pay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayResult {
    pub paid_count: u64,
}
