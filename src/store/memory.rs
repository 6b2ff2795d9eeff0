//! In-memory Ledger Store
//!
//! Process-local store with the same atomicity contract as the PostgreSQL
//! one: the cap check and the insert run under a single lock scope.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;

use crate::domain::{NewTransaction, Transaction, UserId};

use super::{CappedInsert, LedgerStore, StoreError};

#[derive(Debug, Default)]
struct LedgerState {
    next_id: i64,
    transactions: Vec<Transaction>,
    totals: HashMap<UserId, Decimal>,
}

/// Ledger store held in process memory
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    state: Mutex<LedgerState>,
    unavailable: AtomicBool,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with [`StoreError::Unavailable`]
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of rows stored across all users
    pub fn len(&self) -> usize {
        self.state.lock().transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable);
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn insert_capped(&self, new: NewTransaction, cap: Decimal) -> Result<CappedInsert, StoreError> {
        self.check_available()?;

        let mut state = self.state.lock();
        let current_total = state.totals.get(&new.user_id).copied().unwrap_or(Decimal::ZERO);

        if !new.amount.fits_under(current_total, cap) {
            return Ok(CappedInsert::CapExceeded { current_total });
        }

        state.next_id += 1;
        let transaction = Transaction {
            id: state.next_id,
            user_id: new.user_id,
            amount: new.amount,
            description: new.description,
            is_paid: false,
            created_at: Utc::now(),
        };

        let new_total = current_total + transaction.amount.value();
        state.totals.insert(transaction.user_id, new_total);
        state.transactions.push(transaction.clone());

        Ok(CappedInsert::Inserted {
            transaction,
            new_total,
        })
    }

    async fn find_by_user(&self, user_id: UserId) -> Result<Vec<Transaction>, StoreError> {
        self.check_available()?;

        let state = self.state.lock();
        // Ids are assigned in creation order
        Ok(state
            .transactions
            .iter()
            .rev()
            .filter(|tx| tx.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn total_for_user(&self, user_id: UserId) -> Result<Decimal, StoreError> {
        self.check_available()?;

        Ok(self
            .state
            .lock()
            .totals
            .get(&user_id)
            .copied()
            .unwrap_or(Decimal::ZERO))
    }

    async fn mark_all_paid(&self, user_id: UserId) -> Result<u64, StoreError> {
        self.check_available()?;

        let mut state = self.state.lock();
        let mut flipped = 0;
        for tx in state
            .transactions
            .iter_mut()
            .filter(|tx| tx.user_id == user_id && !tx.is_paid)
        {
            tx.is_paid = true;
            flipped += 1;
        }

        Ok(flipped)
    }
}
