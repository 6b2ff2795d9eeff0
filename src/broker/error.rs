//! Error types for the broker transport

use thiserror::Error;

/// Broker error
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Message could not be stored
    #[error("Publish error: {0}")]
    Publish(String),

    /// Ack/nack/dead-letter for a message that is not in flight
    #[error("Unknown delivery {id} on channel {channel}")]
    UnknownDelivery { channel: String, id: i64 },

    /// Broker was shut down
    #[error("Broker closed")]
    Closed,

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result type
pub type BrokerResult<T> = std::result::Result<T, BrokerError>;
