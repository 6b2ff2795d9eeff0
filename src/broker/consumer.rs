//! Consume loop
//!
//! Pulls deliveries from a channel, hands them to a [`MessageHandler`] and
//! settles each one according to the handler outcome and the
//! [`RedeliveryPolicy`]:
//!
//! | handler result          | policy not exhausted | policy exhausted |
//! |-------------------------|----------------------|------------------|
//! | `Ok`                    | ack                  | ack              |
//! | `HandlerError::Transient` | nack (redeliver)   | dead-letter      |
//! | `HandlerError::Permanent` | dead-letter        | dead-letter      |

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use super::{Broker, BrokerError, BrokerResult, Delivery};

/// Pause after a receive error before trying again
const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// Why a handler could not process a delivery
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    /// May succeed on redelivery
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Will never succeed; redelivering is pointless
    #[error("Permanent failure: {0}")]
    Permanent(String),
}

/// Processes one delivery at a time
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, delivery: &Delivery) -> Result<(), HandlerError>;
}

/// Bound on redeliveries of a transiently failing message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedeliveryPolicy {
    /// `None` redelivers forever
    pub max_deliveries: Option<u32>,
}

impl RedeliveryPolicy {
    /// Redeliver without bound (a poison message loops forever)
    pub fn unbounded() -> Self {
        Self { max_deliveries: None }
    }

    /// Dead-letter after `max_deliveries` failed attempts
    pub fn bounded(max_deliveries: u32) -> Self {
        Self {
            max_deliveries: Some(max_deliveries.max(1)),
        }
    }

    /// From a config value where 0 means unbounded
    pub fn from_max_deliveries(max_deliveries: u32) -> Self {
        if max_deliveries == 0 {
            Self::unbounded()
        } else {
            Self::bounded(max_deliveries)
        }
    }

    /// Whether a delivery that just failed on attempt `delivery_count` is out of attempts
    pub fn is_exhausted(&self, delivery_count: u32) -> bool {
        self.max_deliveries
            .map_or(false, |max| delivery_count >= max)
    }
}

impl Default for RedeliveryPolicy {
    fn default() -> Self {
        Self::bounded(5)
    }
}

/// What happened to a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Acked,
    Requeued,
    DeadLettered,
}

/// Consumer of one channel
#[derive(Clone)]
pub struct Consumer {
    broker: Arc<dyn Broker>,
    channel: String,
    policy: RedeliveryPolicy,
}

impl Consumer {
    pub fn new(broker: Arc<dyn Broker>, channel: impl Into<String>, policy: RedeliveryPolicy) -> Self {
        Self {
            broker,
            channel: channel.into(),
            policy,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn policy(&self) -> RedeliveryPolicy {
        self.policy
    }

    /// Run until `shutdown` flips to true or the broker closes.
    ///
    /// Shutdown is only observed between messages: a delivery that was already
    /// received is handled and settled before the loop exits.
    pub async fn run<H>(&self, handler: &H, mut shutdown: watch::Receiver<bool>) -> BrokerResult<()>
    where
        H: MessageHandler + ?Sized,
    {
        tracing::info!(channel = %self.channel, policy = ?self.policy, "Consumer started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let delivery = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                received = self.broker.receive(&self.channel) => received,
            };

            match delivery {
                Ok(delivery) => {
                    // An unsettled delivery stays leased and comes back later
                    if let Err(e) = self.process(handler, &delivery).await {
                        tracing::error!(
                            channel = %self.channel,
                            message_id = delivery.id,
                            error = %e,
                            "Failed to settle message"
                        );
                    }
                }
                Err(BrokerError::Closed) => break,
                Err(e) => {
                    tracing::error!(channel = %self.channel, error = %e, "Failed to receive message");
                    tokio::time::sleep(RECEIVE_ERROR_BACKOFF).await;
                }
            }
        }

        tracing::info!(channel = %self.channel, "Consumer stopped");
        Ok(())
    }

    /// Handle one delivery and settle it with the broker
    pub async fn process<H>(&self, handler: &H, delivery: &Delivery) -> BrokerResult<Disposition>
    where
        H: MessageHandler + ?Sized,
    {
        tracing::debug!(
            channel = %delivery.channel,
            message_id = delivery.id,
            lane = delivery.lane,
            delivery_count = delivery.delivery_count,
            "Message received"
        );

        match handler.handle(delivery).await {
            Ok(()) => {
                self.broker.ack(delivery).await?;
                Ok(Disposition::Acked)
            }
            Err(HandlerError::Permanent(reason)) => {
                self.broker.dead_letter(delivery, &reason).await?;
                Ok(Disposition::DeadLettered)
            }
            Err(HandlerError::Transient(reason)) if self.policy.is_exhausted(delivery.delivery_count) => {
                let reason = format!(
                    "gave up after {} deliveries: {}",
                    delivery.delivery_count, reason
                );
                self.broker.dead_letter(delivery, &reason).await?;
                Ok(Disposition::DeadLettered)
            }
            Err(HandlerError::Transient(reason)) => {
                tracing::warn!(
                    channel = %delivery.channel,
                    message_id = delivery.id,
                    delivery_count = delivery.delivery_count,
                    error = %reason,
                    "Failed to handle message, requeueing"
                );
                self.broker.nack(delivery).await?;
                Ok(Disposition::Requeued)
            }
        }
    }
}
