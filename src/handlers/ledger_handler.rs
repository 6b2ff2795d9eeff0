//! Ledger Handler
//!
//! Validates requests, enforces the cumulative cap, mutates the store and
//! triggers event emission.

use std::future::Future;
use std::sync::Arc;

use rust_decimal::Decimal;

use crate::domain::{
    Amount, DomainError, DomainEvent, NewTransaction, OperationContext, Transaction, UserId,
    TRANSACTION_CAP,
};
use crate::emitter::{EmissionHandle, EventEmitter};
use crate::store::{CappedInsert, LedgerStore, StoreError};

use super::{CreateTransactionCommand, LedgerError, PayResult};

/// Operation result together with the emission it started, if any
#[derive(Debug)]
pub struct Emitted<T> {
    pub value: T,
    pub emission: Option<EmissionHandle>,
}

/// Handler for all ledger operations
pub struct LedgerHandler {
    store: Arc<dyn LedgerStore>,
    emitter: EventEmitter,
    cap: Decimal,
}

impl LedgerHandler {
    pub fn new(store: Arc<dyn LedgerStore>, emitter: EventEmitter) -> Self {
        Self {
            store,
            emitter,
            cap: TRANSACTION_CAP,
        }
    }

    /// Override the cumulative cap
    pub fn with_cap(mut self, cap: Decimal) -> Self {
        self.cap = cap;
        self
    }

    pub fn cap(&self) -> Decimal {
        self.cap
    }

    // =========================================================================
    // CreateTransaction
    // =========================================================================

    /// Record a transaction if it keeps the user's cumulative total within the cap
    pub async fn create_transaction(
        &self,
        command: CreateTransactionCommand,
        context: &OperationContext,
    ) -> Result<Transaction, LedgerError> {
        Ok(self.create_transaction_tracked(command, context).await?.value)
    }

    /// Same as [`Self::create_transaction`], also returning the emission handle
    pub async fn create_transaction_tracked(
        &self,
        command: CreateTransactionCommand,
        context: &OperationContext,
    ) -> Result<Emitted<Transaction>, LedgerError> {
        let amount = Amount::new(command.amount).map_err(DomainError::from)?;
        let user_id = UserId::new(command.user_id)?;
        authorize(context, user_id)?;

        let new = NewTransaction::new(user_id, amount, command.description);
        let outcome = within_deadline(context, self.store.insert_capped(new, self.cap)).await?;

        match outcome {
            CappedInsert::Inserted {
                transaction,
                new_total,
            } => {
                tracing::info!(
                    transaction_id = transaction.id,
                    user_id = %user_id,
                    amount = %transaction.amount,
                    new_total = %new_total,
                    correlation_id = ?context.correlation_id,
                    "Transaction created"
                );

                let emission = self.emitter.emit(DomainEvent::created(&transaction));
                Ok(Emitted {
                    value: transaction,
                    emission: Some(emission),
                })
            }
            CappedInsert::CapExceeded { current_total } => {
                tracing::warn!(
                    user_id = %user_id,
                    current_total = %current_total,
                    requested = %amount,
                    max_allowed = %self.cap,
                    correlation_id = ?context.correlation_id,
                    "Transaction rejected: cap exceeded"
                );

                Err(DomainError::capacity_exceeded(current_total, amount.value(), self.cap).into())
            }
        }
    }

    // =========================================================================
    // ListTransactions
    // =========================================================================

    /// All transactions of a user, newest first; empty when there are none
    pub async fn list_transactions(
        &self,
        user_id: i64,
        context: &OperationContext,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let user_id = UserId::new(user_id)?;
        authorize(context, user_id)?;

        within_deadline(context, self.store.find_by_user(user_id)).await
    }

    // =========================================================================
    // PayAllUnpaid
    // =========================================================================

    /// Mark every unpaid transaction of a user as paid
    pub async fn pay_all_unpaid(
        &self,
        user_id: i64,
        context: &OperationContext,
    ) -> Result<PayResult, LedgerError> {
        Ok(self.pay_all_unpaid_tracked(user_id, context).await?.value)
    }

    /// Same as [`Self::pay_all_unpaid`], also returning the emission handle.
    /// No event is emitted when nothing was paid.
    pub async fn pay_all_unpaid_tracked(
        &self,
        user_id: i64,
        context: &OperationContext,
    ) -> Result<Emitted<PayResult>, LedgerError> {
        let user_id = UserId::new(user_id)?;
        authorize(context, user_id)?;

        let paid_count = within_deadline(context, self.store.mark_all_paid(user_id)).await?;

        tracing::info!(
            user_id = %user_id,
            paid_count,
            correlation_id = ?context.correlation_id,
            "Transactions paid"
        );

        let emission = (paid_count > 0).then(|| self.emitter.emit(DomainEvent::paid(user_id, paid_count)));

        Ok(Emitted {
            value: PayResult { paid_count },
            emission,
        })
    }

    // =========================================================================
    // GetCurrentTotal
    // =========================================================================

    /// Cumulative total of a user, paid or not
    pub async fn current_total(
        &self,
        user_id: i64,
        context: &OperationContext,
    ) -> Result<Decimal, LedgerError> {
        let user_id = UserId::new(user_id)?;
        authorize(context, user_id)?;

        within_deadline(context, self.store.total_for_user(user_id)).await
    }
}

/// The caller may only act on its own ledger
fn authorize(context: &OperationContext, subject: UserId) -> Result<(), DomainError> {
    match context.request_user_id {
        Some(caller) if caller != subject => Err(DomainError::Unauthorized(format!(
            "user {} cannot access transactions of user {}",
            caller, subject
        ))),
        _ => Ok(()),
    }
}

/// Run a store call, abandoning it when the context deadline passes
async fn within_deadline<T, F>(context: &OperationContext, operation: F) -> Result<T, LedgerError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match context.deadline {
        Some(deadline) => {
            let budget = context.remaining().unwrap_or_default();
            tokio::time::timeout_at(deadline, operation)
                .await
                .map_err(|_| LedgerError::Timeout(budget))?
                .map_err(LedgerError::from)
        }
        None => operation.await.map_err(LedgerError::from),
    }
}
