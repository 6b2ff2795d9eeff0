//! PostgreSQL Ledger Store
//!
//! Transactions live in `transactions`; the running total per user is
//! materialized in `user_totals` and advanced with a conditional upsert in
//! the same database transaction as the row insert.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;

use crate::domain::{Amount, NewTransaction, Transaction, UserId};

use super::{CappedInsert, LedgerStore, StoreError};

/// Raw `transactions` row
#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    id: i64,
    user_id: i64,
    amount: Decimal,
    description: String,
    is_paid: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = StoreError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let user_id = UserId::new(row.user_id)
            .map_err(|e| StoreError::InvalidRow(format!("transaction {}: {}", row.id, e)))?;
        let amount = Amount::new(row.amount)
            .map_err(|e| StoreError::InvalidRow(format!("transaction {}: {}", row.id, e)))?;

        Ok(Transaction {
            id: row.id,
            user_id,
            amount,
            description: row.description,
            is_paid: row.is_paid,
            created_at: row.created_at,
        })
    }
}

/// Ledger store backed by PostgreSQL
#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    /// Create a new PgLedgerStore with a database pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn insert_capped(&self, new: NewTransaction, cap: Decimal) -> Result<CappedInsert, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Advances the running total only when the result stays within the cap.
        // A concurrent creator for the same user blocks on the row lock and then
        // re-evaluates the WHERE clause against the committed total.
        let new_total: Option<Decimal> = sqlx::query_scalar(
            r#"
            INSERT INTO user_totals (user_id, total)
            SELECT $1, $2 WHERE $2 <= $3
            ON CONFLICT (user_id) DO UPDATE
            SET total = user_totals.total + EXCLUDED.total,
                updated_at = NOW()
            WHERE user_totals.total + EXCLUDED.total <= $3
            RETURNING total
            "#,
        )
        .bind(new.user_id.value())
        .bind(new.amount.value())
        .bind(cap)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(new_total) = new_total else {
            let current_total: Decimal = sqlx::query_scalar(
                "SELECT COALESCE((SELECT total FROM user_totals WHERE user_id = $1), 0)",
            )
            .bind(new.user_id.value())
            .fetch_one(&mut *tx)
            .await?;

            tx.rollback().await?;
            return Ok(CappedInsert::CapExceeded { current_total });
        };

        let row: TransactionRow = sqlx::query_as(
            r#"
            INSERT INTO transactions (user_id, amount, description, is_paid)
            VALUES ($1, $2, $3, false)
            RETURNING id, user_id, amount, description, is_paid, created_at
            "#,
        )
        .bind(new.user_id.value())
        .bind(new.amount.value())
        .bind(&new.description)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(CappedInsert::Inserted {
            transaction: row.try_into()?,
            new_total,
        })
    }

    async fn find_by_user(&self, user_id: UserId) -> Result<Vec<Transaction>, StoreError> {
        let rows: Vec<TransactionRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, amount, description, is_paid, created_at
            FROM transactions
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(user_id.value())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Transaction::try_from).collect()
    }

    async fn total_for_user(&self, user_id: UserId) -> Result<Decimal, StoreError> {
        let total: Decimal = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0) FROM transactions WHERE user_id = $1",
        )
        .bind(user_id.value())
        .fetch_one(&self.pool)
        .await?;

        Ok(total)
    }

    async fn mark_all_paid(&self, user_id: UserId) -> Result<u64, StoreError> {
        let rows_affected = sqlx::query(
            "UPDATE transactions SET is_paid = true WHERE user_id = $1 AND is_paid = false",
        )
        .bind(user_id.value())
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows_affected)
    }
}
