//! Error handling module
//!
//! Centralized error types and HTTP response conversion.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::DomainError;
use crate::handlers::LedgerError;
use crate::store::StoreError;

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Client errors (4xx)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Missing required header: {0}")]
    MissingHeader(String),

    #[error("Invalid header {header}: {reason}")]
    InvalidHeader { header: String, reason: String },

    #[error("Not found: {0}")]
    NotFound(String),

    // Domain errors
    #[error(transparent)]
    Domain(#[from] DomainError),

    // Server errors (5xx)
    #[error("Storage error")]
    Store(#[from] StoreError),

    #[error("Operation timed out")]
    Timeout,
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Domain(e) => AppError::Domain(e),
            LedgerError::Store(e) => AppError::Store(e),
            LedgerError::Timeout(_) => AppError::Timeout,
        }
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_total: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_allowed: Option<Decimal>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut current_total = None;
        let mut max_allowed = None;

        let (status, error_code, details) = match &self {
            // 400 Bad Request
            AppError::InvalidRequest(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", Some(msg.clone()))
            }
            AppError::InvalidHeader { header, .. } => {
                (StatusCode::BAD_REQUEST, "invalid_header", Some(header.clone()))
            }

            // 401 Unauthorized
            AppError::MissingHeader(header) => {
                (StatusCode::UNAUTHORIZED, "missing_header", Some(header.clone()))
            }

            // 404 Not Found
            AppError::NotFound(what) => {
                (StatusCode::NOT_FOUND, "not_found", Some(what.clone()))
            }

            // Domain errors - map to appropriate HTTP status
            AppError::Domain(domain_err) => match domain_err {
                DomainError::InvalidAmount(msg) => {
                    (StatusCode::BAD_REQUEST, "invalid_amount", Some(msg.clone()))
                }
                DomainError::InvalidUserId(id) => {
                    (StatusCode::BAD_REQUEST, "invalid_user_id", Some(id.to_string()))
                }
                DomainError::CapacityExceeded {
                    current_total: total,
                    max_allowed: max,
                    ..
                } => {
                    current_total = Some(money(*total));
                    max_allowed = Some(money(*max));
                    (StatusCode::BAD_REQUEST, "capacity_exceeded", None)
                }
                DomainError::Unauthorized(msg) => {
                    (StatusCode::FORBIDDEN, "unauthorized", Some(msg.clone()))
                }
            },

            // 504 Gateway Timeout
            AppError::Timeout => (StatusCode::GATEWAY_TIMEOUT, "timeout", None),

            // 500 Internal Server Error
            AppError::Store(e) => {
                tracing::error!(error = ?e, "Store error");
                (StatusCode::INTERNAL_SERVER_ERROR, "store_error", None)
            }
        };

        let body = ErrorResponse {
            error: self.to_string(),
            error_code: error_code.to_string(),
            details,
            current_total,
            max_allowed,
        };

        (status, Json(body)).into_response()
    }
}

/// Render with exactly two decimal places
fn money(value: Decimal) -> Decimal {
    let mut value = value;
    value.rescale(2);
    value
}
