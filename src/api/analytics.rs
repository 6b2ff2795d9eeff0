//! Analytics Routes
//!
//! Read surface of the analytics projection.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};

use crate::domain::UserId;
use crate::error::{AppError, AppResult};
use crate::projection::{AnalyticsProjection, AnalyticsSnapshot, UserStats};

#[derive(Debug, Serialize)]
pub struct UserStatsResponse {
    pub user_id: UserId,
    #[serde(flatten)]
    pub stats: UserStats,
}

/// Create the analytics router
pub fn create_analytics_router() -> Router<Arc<AnalyticsProjection>> {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/stats/users/:user_id", get(user_stats))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Point-in-time aggregate
async fn stats(State(projection): State<Arc<AnalyticsProjection>>) -> Json<AnalyticsSnapshot> {
    Json(projection.snapshot())
}

async fn user_stats(
    State(projection): State<Arc<AnalyticsProjection>>,
    Path(user_id): Path<i64>,
) -> AppResult<Json<UserStatsResponse>> {
    let user_id = UserId::new(user_id)?;
    let stats = projection
        .user_stats(user_id)
        .ok_or_else(|| AppError::NotFound(format!("no transactions seen for user {}", user_id)))?;

    Ok(Json(UserStatsResponse { user_id, stats }))
}
