//! API module
//!
//! HTTP API endpoints and middleware.

pub mod analytics;
pub mod middleware;
pub mod routes;

use std::sync::Arc;
use std::time::Duration;

use axum::{middleware as axum_middleware, routing::get, Router};

use crate::handlers::LedgerHandler;
use crate::projection::AnalyticsProjection;

pub use analytics::create_analytics_router;
pub use routes::{create_router, AppState};

/// Full ledger application: routes, identity and logging middleware, health.
///
/// `request_timeout` is the deadline applied when the caller sends no
/// `X-Request-Timeout-Ms` header.
pub fn ledger_app(ledger: Arc<LedgerHandler>, request_timeout: Duration) -> Router {
    // Order: logging -> identity -> handler
    let protected_routes = create_router()
        .layer(axum_middleware::from_fn_with_state(
            request_timeout,
            middleware::identity_middleware,
        ))
        .layer(axum_middleware::from_fn(middleware::logging_middleware));

    Router::new()
        // Health check (no identity)
        .route("/health", get(health_check))
        .merge(protected_routes)
        .with_state(AppState { ledger })
}

/// Analytics application serving the projection
pub fn analytics_app(projection: Arc<AnalyticsProjection>) -> Router {
    create_analytics_router().with_state(projection)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}
