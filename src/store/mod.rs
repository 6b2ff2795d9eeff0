//! Ledger Store module
//!
//! Persistent record of transactions and per-user running totals.
//! The cap check and the insert happen as one atomic primitive so that
//! concurrent creators for the same user can never jointly overshoot the cap.

mod error;
mod memory;
mod repository;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::domain::{NewTransaction, Transaction, UserId};

pub use error::StoreError;
pub use memory::InMemoryLedgerStore;
pub use repository::PgLedgerStore;

/// Outcome of a capped insert
#[derive(Debug, Clone, PartialEq)]
pub enum CappedInsert {
    /// Row persisted; the user's total is now `new_total` (<= cap)
    Inserted {
        transaction: Transaction,
        new_total: Decimal,
    },
    /// Nothing persisted; the total observed inside the atomic scope
    CapExceeded { current_total: Decimal },
}

/// Storage primitives used by the ledger handler
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Insert `new` only if the user's cumulative total plus its amount stays
    /// within `cap`. Check and insert are a single atomic step.
    async fn insert_capped(&self, new: NewTransaction, cap: Decimal) -> Result<CappedInsert, StoreError>;

    /// All transactions of a user, newest first
    async fn find_by_user(&self, user_id: UserId) -> Result<Vec<Transaction>, StoreError>;

    /// Sum of all amounts ever recorded for a user, paid or not
    async fn total_for_user(&self, user_id: UserId) -> Result<Decimal, StoreError>;

    /// Flip every unpaid transaction of a user to paid; returns how many flipped
    async fn mark_all_paid(&self, user_id: UserId) -> Result<u64, StoreError>;
}
