//! Analytics Projection
//!
//! Folds ledger events into process-local running statistics. The state is
//! never persisted: it starts empty and only grows.
//!
//! There is no deduplication. A `transaction.created` delivered twice is
//! counted twice.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::{DomainEvent, UserId};

#[derive(Debug, Default)]
struct AnalyticsState {
    events_processed: u64,
    total_transactions: u64,
    total_amount: Decimal,
    total_paid_transactions: u64,
    transactions_by_user: HashMap<UserId, u64>,
    amount_by_user: HashMap<UserId, Decimal>,
    last_event_time: Option<DateTime<Utc>>,
}

/// Point-in-time copy of the aggregate
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsSnapshot {
    pub total_transactions: u64,
    pub total_amount: Decimal,
    pub total_paid_transactions: u64,
    pub events_processed: u64,
    pub unique_users: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_event_time: Option<DateTime<Utc>>,
}

/// Errors applying an event
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProjectionError {
    #[error("Applying the event would overflow {0}")]
    Overflow(&'static str),
}

/// Per-user breakdown
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct UserStats {
    pub transaction_count: u64,
    pub amount: Decimal,
}

/// Aggregate of all consumed events.
///
/// Writers take the lock exclusively, so events applied from concurrent
/// lanes never interleave their updates.
#[derive(Debug, Default)]
pub struct AnalyticsProjection {
    state: RwLock<AnalyticsState>,
}

impl AnalyticsProjection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event into the aggregate.
    ///
    /// Every running total is computed before any is written, so an event
    /// that would overflow one of them leaves the aggregate untouched.
    pub fn apply(&self, event: &DomainEvent) -> Result<(), ProjectionError> {
        let mut state = self.state.write();

        let events_processed = state
            .events_processed
            .checked_add(1)
            .ok_or(ProjectionError::Overflow("events_processed"))?;

        match event {
            DomainEvent::TransactionCreated { user_id, amount, .. } => {
                let amount = amount.value();
                let total_transactions = state
                    .total_transactions
                    .checked_add(1)
                    .ok_or(ProjectionError::Overflow("total_transactions"))?;
                let total_amount = state
                    .total_amount
                    .checked_add(amount)
                    .ok_or(ProjectionError::Overflow("total_amount"))?;
                let user_count = state
                    .transactions_by_user
                    .get(user_id)
                    .copied()
                    .unwrap_or(0)
                    .checked_add(1)
                    .ok_or(ProjectionError::Overflow("transactions_by_user"))?;
                let user_amount = state
                    .amount_by_user
                    .get(user_id)
                    .copied()
                    .unwrap_or(Decimal::ZERO)
                    .checked_add(amount)
                    .ok_or(ProjectionError::Overflow("amount_by_user"))?;

                state.total_transactions = total_transactions;
                state.total_amount = total_amount;
                state.transactions_by_user.insert(*user_id, user_count);
                state.amount_by_user.insert(*user_id, user_amount);
            }
            DomainEvent::TransactionPaid {
                transactions_paid, ..
            } => {
                state.total_paid_transactions = state
                    .total_paid_transactions
                    .checked_add(*transactions_paid)
                    .ok_or(ProjectionError::Overflow("total_paid_transactions"))?;
            }
        }

        state.events_processed = events_processed;
        state.last_event_time = Some(event.timestamp());
        Ok(())
    }

    pub fn snapshot(&self) -> AnalyticsSnapshot {
        let state = self.state.read();

        AnalyticsSnapshot {
            total_transactions: state.total_transactions,
            total_amount: state.total_amount,
            total_paid_transactions: state.total_paid_transactions,
            events_processed: state.events_processed,
            unique_users: state.transactions_by_user.len(),
            last_event_time: state.last_event_time,
        }
    }

    /// Creation stats of one user, `None` if no creation event was seen
    pub fn user_stats(&self, user_id: UserId) -> Option<UserStats> {
        let state = self.state.read();

        let transaction_count = *state.transactions_by_user.get(&user_id)?;
        let amount = state
            .amount_by_user
            .get(&user_id)
            .copied()
            .unwrap_or(Decimal::ZERO);

        Some(UserStats {
            transaction_count,
            amount,
        })
    }
}
