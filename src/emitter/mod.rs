//! Event Emitter
//!
//! Turns ledger mutations into broker messages keyed by user, so every event
//! of one user travels the same ordering lane.
//!
//! Emission runs on its own task and is never awaited by the ledger handler:
//! the ledger operation succeeds whether or not the event makes it to the
//! broker. A failed publish is logged and dropped (no retry, no outbox), so
//! downstream aggregates can under-count relative to the ledger.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::broker::{Broker, BrokerError};
use crate::domain::DomainEvent;

/// Emission errors
#[derive(Debug, thiserror::Error)]
pub enum EmitError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Emission task failed: {0}")]
    Task(String),
}

/// Handle on a spawned emission.
///
/// Dropping it detaches the task; awaiting [`EmissionHandle::outcome`]
/// observes whether the event reached the broker.
#[derive(Debug)]
pub struct EmissionHandle {
    event_type: &'static str,
    task: JoinHandle<Result<(), EmitError>>,
}

impl EmissionHandle {
    pub fn event_type(&self) -> &'static str {
        self.event_type
    }

    /// Wait for the publish to finish
    pub async fn outcome(self) -> Result<(), EmitError> {
        self.task
            .await
            .map_err(|e| EmitError::Task(e.to_string()))?
    }
}

/// Publishes domain events to one broker channel
#[derive(Clone)]
pub struct EventEmitter {
    broker: Arc<dyn Broker>,
    channel: String,
}

impl EventEmitter {
    pub fn new(broker: Arc<dyn Broker>, channel: impl Into<String>) -> Self {
        Self {
            broker,
            channel: channel.into(),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Publish `event` in the background
    pub fn emit(&self, event: DomainEvent) -> EmissionHandle {
        let emitter = self.clone();
        let event_type = event.event_type();

        let task = tokio::spawn(async move {
            let result = emitter.publish(&event).await;
            if let Err(e) = &result {
                tracing::error!(
                    event_type = event.event_type(),
                    user_id = %event.user_id(),
                    channel = %emitter.channel,
                    error = %e,
                    "Failed to publish event, dropping it"
                );
            }
            result
        });

        EmissionHandle { event_type, task }
    }

    /// Publish `event` and wait for the broker to accept it
    pub async fn publish(&self, event: &DomainEvent) -> Result<(), EmitError> {
        let payload = event.encode()?;
        let key = event.user_id().routing_key();

        self.broker.publish(&self.channel, &key, payload).await?;

        tracing::info!(
            event_type = event.event_type(),
            user_id = %event.user_id(),
            channel = %self.channel,
            "Event published"
        );
        Ok(())
    }
}
