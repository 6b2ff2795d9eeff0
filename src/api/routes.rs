//! API Routes
//!
//! Ledger HTTP endpoints.

use std::sync::Arc;

use axum::{
    extract::{Extension, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{OperationContext, Transaction};
use crate::error::{AppError, AppResult};
use crate::handlers::{CreateTransactionCommand, LedgerHandler};

/// Shared state of the ledger routes
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<LedgerHandler>,
}

// =========================================================================
// Request/Response types
// =========================================================================

#[derive(Debug, Deserialize)]
pub struct CreateTransactionRequest {
    pub user_id: i64,
    pub amount: Decimal,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct UserQuery {
    #[serde(default)]
    pub user_id: Option<String>,
}

impl UserQuery {
    fn user_id(&self) -> AppResult<i64> {
        let raw = self
            .user_id
            .as_deref()
            .ok_or_else(|| AppError::InvalidRequest("user_id query parameter required".to_string()))?;

        raw.trim()
            .parse()
            .map_err(|_| AppError::InvalidRequest("invalid user_id".to_string()))
    }
}

#[derive(Debug, Serialize)]
pub struct PayResponse {
    pub message: String,
    pub paid_count: u64,
}

#[derive(Debug, Serialize)]
pub struct TotalResponse {
    pub user_id: i64,
    pub current_total: Decimal,
    pub max_allowed: Decimal,
}

// =========================================================================
// API Router
// =========================================================================

/// Create the ledger router
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/transactions", post(create_transaction).get(list_transactions))
        .route("/transactions/pay", post(pay_transactions))
        .route("/transactions/total", get(current_total))
}

// =========================================================================
// POST /transactions
// =========================================================================

/// Record a transaction for the caller
async fn create_transaction(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Json(request): Json<CreateTransactionRequest>,
) -> AppResult<(StatusCode, Json<Transaction>)> {
    let command = CreateTransactionCommand::new(request.user_id, request.amount)
        .with_description(request.description);

    let transaction = state.ledger.create_transaction(command, &context).await?;

    Ok((StatusCode::CREATED, Json(transaction)))
}

// =========================================================================
// GET /transactions?user_id=
// =========================================================================

async fn list_transactions(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Query(query): Query<UserQuery>,
) -> AppResult<Json<Vec<Transaction>>> {
    let transactions = state
        .ledger
        .list_transactions(query.user_id()?, &context)
        .await?;

    Ok(Json(transactions))
}

// =========================================================================
// POST /transactions/pay?user_id=
// =========================================================================

async fn pay_transactions(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Query(query): Query<UserQuery>,
) -> AppResult<Json<PayResponse>> {
    let result = state
        .ledger
        .pay_all_unpaid(query.user_id()?, &context)
        .await?;

    Ok(Json(PayResponse {
        message: "All transactions paid".to_string(),
        paid_count: result.paid_count,
    }))
}

// =========================================================================
// GET /transactions/total?user_id=
// =========================================================================

async fn current_total(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Query(query): Query<UserQuery>,
) -> AppResult<Json<TotalResponse>> {
    let user_id = query.user_id()?;
    let current_total = state.ledger.current_total(user_id, &context).await?;

    Ok(Json(TotalResponse {
        user_id,
        current_total,
        max_allowed: state.ledger.cap(),
    }))
}
