//! Broker Transport module
//!
//! At-least-once delivery of keyed messages over named channels.
//! Messages with the same key share an ordering lane; a lane never has more
//! than one message in flight, so per-key order survives concurrent consumers.

mod consumer;
mod error;
mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use consumer::{Consumer, Disposition, HandlerError, MessageHandler, RedeliveryPolicy};
pub use error::{BrokerError, BrokerResult};
pub use memory::InMemoryBroker;
pub use postgres::{PgBroker, PgBrokerConfig};

/// A message handed to a consumer, pending ack/nack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Broker-assigned message id
    pub id: i64,
    pub channel: String,
    pub key: String,
    pub lane: u32,
    pub payload: Vec<u8>,
    /// 1 on first delivery, incremented on every redelivery
    pub delivery_count: u32,
    pub published_at: DateTime<Utc>,
}

/// Publish/consume primitives
#[async_trait]
pub trait Broker: Send + Sync {
    /// Store a message on `channel`; returns once the broker has accepted it
    async fn publish(&self, channel: &str, key: &str, payload: Vec<u8>) -> BrokerResult<()>;

    /// Wait for the next message whose lane has nothing in flight
    async fn receive(&self, channel: &str) -> BrokerResult<Delivery>;

    /// Handler succeeded: remove the message
    async fn ack(&self, delivery: &Delivery) -> BrokerResult<()>;

    /// Handler failed: put the message back at the head of its lane
    async fn nack(&self, delivery: &Delivery) -> BrokerResult<()>;

    /// Move the message to the channel's dead-letter channel
    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> BrokerResult<()>;
}

/// Dead-letter channel paired with `channel`
pub fn dead_letter_channel(channel: &str) -> String {
    format!("{}.dead_letter", channel)
}

/// Ordering lane of a routing key.
///
/// BLAKE3 of the key, first four bytes little-endian, modulo the lane count,
/// so every producer process maps a key to the same lane.
pub fn lane_for(key: &str, lanes: u32) -> u32 {
    let hash = blake3::hash(key.as_bytes());
    let bytes = hash.as_bytes();
    let hash_u32 = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    hash_u32 % lanes.max(1)
}
