//! Analytics consume loop
//!
//! Decodes deliveries from the transaction channel and applies them to the
//! [`AnalyticsProjection`].

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::broker::{BrokerResult, Consumer, Delivery, HandlerError, MessageHandler};
use crate::domain::{DecodedEnvelope, DomainEvent};

use super::AnalyticsProjection;

/// Message handler feeding the projection
#[derive(Debug, Clone)]
pub struct AnalyticsConsumer {
    projection: Arc<AnalyticsProjection>,
}

impl AnalyticsConsumer {
    pub fn new(projection: Arc<AnalyticsProjection>) -> Self {
        Self { projection }
    }

    pub fn projection(&self) -> &Arc<AnalyticsProjection> {
        &self.projection
    }

    /// Run `workers` consume loops on `consumer` until `shutdown` flips.
    ///
    /// Each loop takes one lane at a time, so more workers means more lanes
    /// processed in parallel without breaking per-user order. The returned
    /// set yields each loop as it exits.
    pub fn spawn_workers(
        &self,
        consumer: Consumer,
        workers: usize,
        shutdown: watch::Receiver<bool>,
    ) -> JoinSet<BrokerResult<()>> {
        let mut set = JoinSet::new();
        for worker in 0..workers.max(1) {
            let consumer = consumer.clone();
            let handler = self.clone();
            let shutdown = shutdown.clone();
            set.spawn(async move {
                tracing::debug!(worker, channel = consumer.channel(), "Analytics worker starting");
                consumer.run(&handler, shutdown).await
            });
        }
        set
    }
}

/// Wait until every worker in `workers` has exited, logging each exit as it
/// happens. Returns how many exited with an error or a panic.
pub async fn wait_for_workers(workers: &mut JoinSet<BrokerResult<()>>) -> usize {
    let mut failed = 0;
    while let Some(exit) = workers.join_next().await {
        match exit {
            Ok(Ok(())) => tracing::info!(remaining = workers.len(), "Analytics worker exited"),
            Ok(Err(e)) => {
                failed += 1;
                tracing::error!(remaining = workers.len(), error = %e, "Analytics worker failed");
            }
            Err(e) => {
                failed += 1;
                tracing::error!(remaining = workers.len(), error = %e, "Analytics worker panicked");
            }
        }
    }
    failed
}

#[async_trait]
impl MessageHandler for AnalyticsConsumer {
    async fn handle(&self, delivery: &Delivery) -> Result<(), HandlerError> {
        match DomainEvent::decode(&delivery.payload) {
            Ok(DecodedEnvelope::Event(event)) => {
                if let Err(e) = self.projection.apply(&event) {
                    tracing::error!(
                        event_type = event.event_type(),
                        user_id = %event.user_id(),
                        message_id = delivery.id,
                        error = %e,
                        "Event rejected by projection"
                    );
                    return Err(HandlerError::Permanent(e.to_string()));
                }
                tracing::info!(
                    event_type = event.event_type(),
                    user_id = %event.user_id(),
                    lane = delivery.lane,
                    "Event processed"
                );
                Ok(())
            }
            Ok(DecodedEnvelope::Unknown(event_type)) => {
                tracing::debug!(event_type = %event_type, message_id = delivery.id, "Ignoring unknown event type");
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    channel = %delivery.channel,
                    message_id = delivery.id,
                    error = %e,
                    "Failed to decode event"
                );
                Err(HandlerError::Permanent(format!("undecodable envelope: {}", e)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{dead_letter_channel, Broker, Disposition, InMemoryBroker, RedeliveryPolicy};
    use crate::domain::{Amount, UserId};
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    const CHANNEL: &str = "transactions";

    fn setup() -> (Arc<InMemoryBroker>, Consumer, AnalyticsConsumer) {
        let broker = Arc::new(InMemoryBroker::new(4));
        let consumer = Consumer::new(broker.clone(), CHANNEL, RedeliveryPolicy::default());
        let handler = AnalyticsConsumer::new(Arc::new(AnalyticsProjection::new()));
        (broker, consumer, handler)
    }

    fn created_payload(user: i64) -> Vec<u8> {
        DomainEvent::TransactionCreated {
            transaction_id: 1,
            user_id: UserId::new(user).unwrap(),
            amount: Amount::new(dec!(10.00)).unwrap(),
            description: "coffee".to_string(),
            timestamp: Utc::now(),
        }
        .encode()
        .unwrap()
    }

    async fn process_next(broker: &InMemoryBroker, consumer: &Consumer, handler: &AnalyticsConsumer) -> Disposition {
        let delivery = broker.receive(CHANNEL).await.unwrap();
        consumer.process(handler, &delivery).await.unwrap()
    }

    #[tokio::test]
    async fn test_event_is_applied_and_acked() {
        let (broker, consumer, handler) = setup();
        broker.publish(CHANNEL, "1", created_payload(1)).await.unwrap();

        assert_eq!(process_next(&broker, &consumer, &handler).await, Disposition::Acked);
        assert_eq!(handler.projection().snapshot().total_transactions, 1);
        assert_eq!(broker.pending(CHANNEL), 0);
    }

    #[tokio::test]
    async fn test_unknown_event_type_is_acked_without_effect() {
        let (broker, consumer, handler) = setup();
        let payload = br#"{"event_type":"user.deleted","user_id":1}"#.to_vec();
        broker.publish(CHANNEL, "1", payload).await.unwrap();

        assert_eq!(process_next(&broker, &consumer, &handler).await, Disposition::Acked);
        assert_eq!(handler.projection().snapshot().events_processed, 0);
    }

    #[tokio::test]
    async fn test_undecodable_message_is_dead_lettered() {
        let (broker, consumer, handler) = setup();
        broker.publish(CHANNEL, "1", b"{broken".to_vec()).await.unwrap();

        assert_eq!(process_next(&broker, &consumer, &handler).await, Disposition::DeadLettered);
        assert_eq!(broker.pending(&dead_letter_channel(CHANNEL)), 1);
        assert_eq!(handler.projection().snapshot().events_processed, 0);
    }

    #[tokio::test]
    async fn test_out_of_range_amount_is_dead_lettered() {
        let (broker, consumer, handler) = setup();
        for amount in ["-500", "79228162514264337593543950335"] {
            let payload = format!(
                r#"{{"event_type":"transaction.created","transaction_id":1,"user_id":1,"amount":"{}","description":"","timestamp":"2026-01-02T03:04:05Z"}}"#,
                amount
            );
            broker.publish(CHANNEL, "1", payload.into_bytes()).await.unwrap();
            assert_eq!(process_next(&broker, &consumer, &handler).await, Disposition::DeadLettered);
        }

        assert_eq!(broker.pending(&dead_letter_channel(CHANNEL)), 2);
        let snapshot = handler.projection().snapshot();
        assert_eq!(snapshot.events_processed, 0);
        assert_eq!(snapshot.total_amount, rust_decimal::Decimal::ZERO);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_overflowing_event_is_dead_lettered_and_lane_keeps_moving() {
        let (broker, consumer, handler) = setup();
        let user = UserId::new(6).unwrap();
        for event in [
            DomainEvent::paid(user, u64::MAX),
            DomainEvent::paid(user, u64::MAX),
            DomainEvent::paid(user, 0),
        ] {
            broker.publish(CHANNEL, "6", event.encode().unwrap()).await.unwrap();
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut workers = handler.spawn_workers(consumer, 2, shutdown_rx);

        for _ in 0..400 {
            if broker.pending(CHANNEL) == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        shutdown_tx.send(true).unwrap();
        while let Some(exit) = workers.join_next().await {
            exit.unwrap().unwrap();
        }

        assert_eq!(broker.pending(CHANNEL), 0);
        assert_eq!(broker.pending(&dead_letter_channel(CHANNEL)), 1);
        let snapshot = handler.projection().snapshot();
        assert_eq!(snapshot.events_processed, 2);
        assert_eq!(snapshot.total_paid_transactions, u64::MAX);
    }

    #[tokio::test]
    async fn test_wait_for_workers_returns_when_broker_closes() {
        let (broker, consumer, handler) = setup();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut workers = handler.spawn_workers(consumer, 2, shutdown_rx);

        broker.close();
        let failed = tokio::time::timeout(Duration::from_secs(5), wait_for_workers(&mut workers))
            .await
            .unwrap();

        assert_eq!(failed, 0);
        assert!(workers.is_empty());
    }

    #[tokio::test]
    async fn test_wait_for_workers_counts_failures_and_panics() {
        let mut workers: JoinSet<BrokerResult<()>> = JoinSet::new();
        workers.spawn(async { Ok(()) });
        workers.spawn(async { Err(crate::broker::BrokerError::Closed) });
        workers.spawn(async { panic!("worker blew up") });

        assert_eq!(wait_for_workers(&mut workers).await, 2);
    }

    #[tokio::test]
    async fn test_redelivered_event_double_counts() {
        let (broker, consumer, handler) = setup();
        let payload = created_payload(3);
        // Same envelope delivered twice, as after a crash before ack
        broker.publish(CHANNEL, "3", payload.clone()).await.unwrap();
        broker.publish(CHANNEL, "3", payload).await.unwrap();

        process_next(&broker, &consumer, &handler).await;
        process_next(&broker, &consumer, &handler).await;

        let snapshot = handler.projection().snapshot();
        assert_eq!(snapshot.total_transactions, 2);
        assert_eq!(snapshot.total_amount, dec!(20.00));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_workers_drain_channel_and_stop() {
        let (broker, consumer, handler) = setup();
        for user in 1..=20 {
            broker
                .publish(CHANNEL, &user.to_string(), created_payload(user))
                .await
                .unwrap();
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut workers = handler.spawn_workers(consumer, 3, shutdown_rx);

        while broker.pending(CHANNEL) > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        shutdown_tx.send(true).unwrap();
        while let Some(exit) = workers.join_next().await {
            exit.unwrap().unwrap();
        }

        let snapshot = handler.projection().snapshot();
        assert_eq!(snapshot.total_transactions, 20);
        assert_eq!(snapshot.unique_users, 20);
    }
}
