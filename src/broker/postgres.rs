//! PostgreSQL broker
//!
//! Durable queue in the `broker_messages` table. A publish returns only after
//! the row is committed. Receivers lease the head of a lane with
//! `FOR UPDATE SKIP LOCKED`; a lease that is never acked or nacked (consumer
//! crash) is handed back by the lease reclaim job, which is what makes the
//! delivery at-least-once.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{dead_letter_channel, lane_for, Broker, BrokerError, BrokerResult, Delivery};

/// Tuning for [`PgBroker`]
#[derive(Debug, Clone)]
pub struct PgBrokerConfig {
    /// Number of ordering lanes per channel
    pub lanes: u32,
    /// How long to sleep when no lane has a message ready
    pub poll_interval: Duration,
    /// How long a receiver owns a message before it can be reclaimed
    pub lease: Duration,
}

impl Default for PgBrokerConfig {
    fn default() -> Self {
        Self {
            lanes: 16,
            poll_interval: Duration::from_millis(200),
            lease: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MessageRow {
    id: i64,
    channel: String,
    routing_key: String,
    lane: i32,
    payload: Vec<u8>,
    delivery_count: i32,
    published_at: DateTime<Utc>,
}

impl From<MessageRow> for Delivery {
    fn from(row: MessageRow) -> Self {
        Delivery {
            id: row.id,
            channel: row.channel,
            key: row.routing_key,
            lane: row.lane.max(0) as u32,
            payload: row.payload,
            delivery_count: row.delivery_count.max(0) as u32,
            published_at: row.published_at,
        }
    }
}

/// Broker backed by PostgreSQL
#[derive(Debug, Clone)]
pub struct PgBroker {
    pool: PgPool,
    config: PgBrokerConfig,
}

impl PgBroker {
    pub fn new(pool: PgPool) -> Self {
        Self::with_config(pool, PgBrokerConfig::default())
    }

    pub fn with_config(pool: PgPool, config: PgBrokerConfig) -> Self {
        Self { pool, config }
    }

    /// Lease the head of some idle lane, if any
    async fn try_receive(&self, channel: &str) -> BrokerResult<Option<Delivery>> {
        let lease_secs = self.config.lease.as_secs_f64();

        let row: Option<MessageRow> = sqlx::query_as(
            r#"
            UPDATE broker_messages
            SET status = 'in_flight',
                delivery_count = delivery_count + 1,
                locked_until = NOW() + make_interval(secs => $2)
            WHERE id = (
                SELECT m.id
                FROM broker_messages m
                WHERE m.channel = $1
                  AND m.status = 'ready'
                  AND m.id = (
                      SELECT MIN(h.id) FROM broker_messages h
                      WHERE h.channel = m.channel
                        AND h.lane = m.lane
                        AND h.status IN ('ready', 'in_flight')
                  )
                ORDER BY m.id
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING id, channel, routing_key, lane, payload, delivery_count, published_at
            "#,
        )
        .bind(channel)
        .bind(lease_secs)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Delivery::from))
    }

    /// Settle an in-flight message; fails if it is no longer leased to us
    async fn settle(&self, delivery: &Delivery, sql: &str) -> BrokerResult<()> {
        let rows = sqlx::query(sql)
            .bind(delivery.id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if rows == 0 {
            return Err(BrokerError::UnknownDelivery {
                channel: delivery.channel.clone(),
                id: delivery.id,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Broker for PgBroker {
    async fn publish(&self, channel: &str, key: &str, payload: Vec<u8>) -> BrokerResult<()> {
        let lane = lane_for(key, self.config.lanes);

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO broker_messages (channel, routing_key, lane, payload)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(channel)
        .bind(key)
        .bind(lane as i32)
        .bind(&payload)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| BrokerError::Publish(e.to_string()))?;

        tracing::debug!(channel, key, lane, message_id = id, "Message published");
        Ok(())
    }

    async fn receive(&self, channel: &str) -> BrokerResult<Delivery> {
        loop {
            if let Some(delivery) = self.try_receive(channel).await? {
                return Ok(delivery);
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> BrokerResult<()> {
        self.settle(
            delivery,
            r#"
            UPDATE broker_messages
            SET status = 'acked', locked_until = NULL, settled_at = NOW()
            WHERE id = $1 AND status = 'in_flight'
            "#,
        )
        .await
    }

    async fn nack(&self, delivery: &Delivery) -> BrokerResult<()> {
        self.settle(
            delivery,
            r#"
            UPDATE broker_messages
            SET status = 'ready', locked_until = NULL
            WHERE id = $1 AND status = 'in_flight'
            "#,
        )
        .await
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> BrokerResult<()> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            r#"
            UPDATE broker_messages
            SET status = 'dead_lettered', locked_until = NULL, settled_at = NOW(), last_error = $2
            WHERE id = $1 AND status = 'in_flight'
            "#,
        )
        .bind(delivery.id)
        .bind(reason)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if rows == 0 {
            return Err(BrokerError::UnknownDelivery {
                channel: delivery.channel.clone(),
                id: delivery.id,
            });
        }

        sqlx::query(
            r#"
            INSERT INTO broker_messages (channel, routing_key, lane, payload, last_error)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(dead_letter_channel(&delivery.channel))
        .bind(&delivery.key)
        .bind(delivery.lane as i32)
        .bind(&delivery.payload)
        .bind(reason)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::warn!(
            channel = %delivery.channel,
            message_id = delivery.id,
            delivery_count = delivery.delivery_count,
            reason,
            "Message moved to dead-letter channel"
        );
        Ok(())
    }
}
