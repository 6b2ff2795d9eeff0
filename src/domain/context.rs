//! Operation Context
//!
//! Contains metadata about the current operation: who is calling, how to
//! correlate its logs, and how long it may run.

use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use super::UserId;

/// Context for a ledger operation.
#[derive(Debug, Clone, Default)]
pub struct OperationContext {
    /// Caller identity asserted by the gateway
    pub request_user_id: Option<UserId>,

    /// Correlation ID for request tracing
    pub correlation_id: Option<Uuid>,

    /// Instant after which the operation is abandoned
    pub deadline: Option<Instant>,
}

impl OperationContext {
    /// Create a new empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Create context with request user ID
    pub fn with_request_user(mut self, user_id: UserId) -> Self {
        self.request_user_id = Some(user_id);
        self
    }

    /// Create context with correlation ID
    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Create context with an absolute deadline
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Create context with a deadline `timeout` from now
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Time left before the deadline, `None` when unbounded
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }
}
