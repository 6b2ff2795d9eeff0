//! Domain Events
//!
//! Immutable facts describing ledger mutations, published for downstream
//! consumers. The serialized event is its own envelope: an `event_type` tag,
//! the type-specific fields and an RFC3339 `timestamp`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Amount, Transaction, UserId};

pub const EVENT_TRANSACTION_CREATED: &str = "transaction.created";
pub const EVENT_TRANSACTION_PAID: &str = "transaction.paid";

/// Ledger events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum DomainEvent {
    /// A transaction was recorded
    #[serde(rename = "transaction.created")]
    TransactionCreated {
        transaction_id: i64,
        user_id: UserId,
        amount: Amount,
        description: String,
        timestamp: DateTime<Utc>,
    },

    /// Every unpaid transaction of a user was paid in one operation
    #[serde(rename = "transaction.paid")]
    TransactionPaid {
        user_id: UserId,
        transactions_paid: u64,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// Build the creation event for a freshly persisted transaction
    pub fn created(transaction: &Transaction) -> Self {
        DomainEvent::TransactionCreated {
            transaction_id: transaction.id,
            user_id: transaction.user_id,
            amount: transaction.amount,
            description: transaction.description.clone(),
            timestamp: Utc::now(),
        }
    }

    /// Build the bulk-pay event
    pub fn paid(user_id: UserId, transactions_paid: u64) -> Self {
        DomainEvent::TransactionPaid {
            user_id,
            transactions_paid,
            timestamp: Utc::now(),
        }
    }

    /// Get the event type tag
    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::TransactionCreated { .. } => EVENT_TRANSACTION_CREATED,
            DomainEvent::TransactionPaid { .. } => EVENT_TRANSACTION_PAID,
        }
    }

    /// Get the user this event relates to
    pub fn user_id(&self) -> UserId {
        match self {
            DomainEvent::TransactionCreated { user_id, .. } => *user_id,
            DomainEvent::TransactionPaid { user_id, .. } => *user_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            DomainEvent::TransactionCreated { timestamp, .. } => *timestamp,
            DomainEvent::TransactionPaid { timestamp, .. } => *timestamp,
        }
    }

    /// Serialize to the wire envelope
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decode a wire envelope.
    ///
    /// Envelopes carrying an `event_type` this build does not know are
    /// returned as [`DecodedEnvelope::Unknown`] rather than failing.
    pub fn decode(bytes: &[u8]) -> Result<DecodedEnvelope, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_slice(bytes)?;

        let event_type = match value.get("event_type").and_then(|t| t.as_str()) {
            Some(tag) => tag.to_string(),
            None => {
                // Let serde produce the "missing field" error
                return serde_json::from_value::<DomainEvent>(value).map(DecodedEnvelope::Event);
            }
        };

        match event_type.as_str() {
            EVENT_TRANSACTION_CREATED | EVENT_TRANSACTION_PAID => {
                serde_json::from_value(value).map(DecodedEnvelope::Event)
            }
            _ => Ok(DecodedEnvelope::Unknown(event_type)),
        }
    }
}

/// Result of decoding a wire envelope
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedEnvelope {
    Event(DomainEvent),
    Unknown(String),
}
