//! API Middleware
//!
//! Caller identity and request logging middleware.

use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::domain::{OperationContext, UserId};
use crate::error::AppError;

pub const USER_ID_HEADER: &str = "X-User-Id";
pub const CORRELATION_ID_HEADER: &str = "X-Correlation-Id";
pub const REQUEST_TIMEOUT_HEADER: &str = "X-Request-Timeout-Ms";

// =========================================================================
// Identity Middleware
// =========================================================================

/// Build the [`OperationContext`] from the gateway headers.
///
/// The gateway authenticates the caller and forwards its identity in
/// `X-User-Id`; this service trusts it as is.
pub async fn identity_middleware(
    State(default_timeout): State<Duration>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let headers = request.headers();

    let raw_user_id = headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::MissingHeader(USER_ID_HEADER.to_string()))?;

    let user_id = raw_user_id
        .trim()
        .parse::<i64>()
        .map_err(|e| invalid_header(USER_ID_HEADER, e.to_string()))
        .and_then(|id| UserId::new(id).map_err(|e| invalid_header(USER_ID_HEADER, e.to_string())))?;

    // Extract correlation ID or generate new one
    let correlation_id = headers
        .get(CORRELATION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(Uuid::new_v4);

    let timeout = match headers.get(REQUEST_TIMEOUT_HEADER) {
        Some(value) => {
            let millis = value
                .to_str()
                .ok()
                .and_then(|s| s.trim().parse::<u64>().ok())
                .filter(|ms| *ms > 0)
                .ok_or_else(|| invalid_header(REQUEST_TIMEOUT_HEADER, "expected positive milliseconds".to_string()))?;
            Duration::from_millis(millis)
        }
        None => default_timeout,
    };

    let context = OperationContext::new()
        .with_request_user(user_id)
        .with_correlation_id(correlation_id)
        .with_timeout(timeout);

    request.extensions_mut().insert(context);

    Ok(next.run(request).await)
}

fn invalid_header(header: &str, reason: String) -> AppError {
    AppError::InvalidHeader {
        header: header.to_string(),
        reason,
    }
}

// =========================================================================
// mask_headers_for_logging
// =========================================================================

/// Headers that should be masked in logs
const SENSITIVE_HEADERS: &[&str] = &["authorization", "cookie", "set-cookie", "x-api-key"];

/// Mask sensitive headers for logging
pub fn mask_headers_for_logging(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let name_lower = name.as_str().to_lowercase();
            let masked_value = if SENSITIVE_HEADERS.contains(&name_lower.as_str()) {
                "[REDACTED]".to_string()
            } else {
                value.to_str().unwrap_or("[invalid utf8]").to_string()
            };
            (name.to_string(), masked_value)
        })
        .collect()
}

// =========================================================================
// Request Logging Middleware
// =========================================================================

/// Request logging middleware
pub async fn logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let headers = mask_headers_for_logging(request.headers());

    // Runs outside the identity layer, so read the raw header
    let correlation_id = request
        .headers()
        .get(CORRELATION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let start = std::time::Instant::now();

    tracing::debug!(
        method = %method,
        uri = %uri,
        correlation_id = ?correlation_id,
        headers = ?headers,
        "Incoming request"
    );

    let response = next.run(request).await;

    tracing::info!(
        method = %method,
        uri = %uri,
        status = %response.status(),
        duration_ms = %start.elapsed().as_millis(),
        correlation_id = ?correlation_id,
        "Request completed"
    );

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_headers_for_logging() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", "application/json".parse().unwrap());
        headers.insert("authorization", "Bearer secret".parse().unwrap());
        headers.insert("x-user-id", "12".parse().unwrap());

        let masked = mask_headers_for_logging(&headers);

        let auth = masked.iter().find(|(k, _)| k == "authorization");
        let content_type = masked.iter().find(|(k, _)| k == "content-type");
        let user_id = masked.iter().find(|(k, _)| k == "x-user-id");

        assert_eq!(auth.unwrap().1, "[REDACTED]");
        assert_eq!(content_type.unwrap().1, "application/json");
        assert_eq!(user_id.unwrap().1, "12");
    }

    #[test]
    fn test_sensitive_headers_list() {
        assert!(SENSITIVE_HEADERS.contains(&"authorization"));
        assert!(!SENSITIVE_HEADERS.contains(&"x-user-id"));
    }
}
