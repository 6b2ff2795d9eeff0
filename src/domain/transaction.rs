//! Transaction records
//!
//! The ledger's unit of record and the user identity it is keyed by.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{Amount, DomainError};

/// Identity of the user owning a transaction.
///
/// Issued by the external identity service; only positive integers are valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct UserId(i64);

impl UserId {
    pub fn new(value: i64) -> Result<Self, DomainError> {
        if value <= 0 {
            return Err(DomainError::InvalidUserId(value));
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> i64 {
        self.0
    }

    /// Routing key used on the broker (one ordering lane per user).
    pub fn routing_key(&self) -> String {
        self.0.to_string()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<i64> for UserId {
    type Error = DomainError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        UserId::new(value)
    }
}

impl From<UserId> for i64 {
    fn from(user_id: UserId) -> Self {
        user_id.0
    }
}

/// A recorded monetary transaction.
///
/// `id` and `created_at` are assigned by the store. `is_paid` only ever moves
/// from `false` to `true`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub user_id: UserId,
    pub amount: Amount,
    pub description: String,
    pub is_paid: bool,
    pub created_at: DateTime<Utc>,
}

/// A validated transaction that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub user_id: UserId,
    pub amount: Amount,
    pub description: String,
}

impl NewTransaction {
    pub fn new(user_id: UserId, amount: Amount, description: impl Into<String>) -> Self {
        Self {
            user_id,
            amount,
            description: description.into(),
        }
    }
}
