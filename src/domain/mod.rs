//! Domain module
//!
//! Core domain types and business rules of the capped ledger.

pub mod amount;
pub mod context;
pub mod error;
pub mod events;
pub mod transaction;

pub use amount::{Amount, AmountError, MAX_AMOUNT, TRANSACTION_CAP};
pub use context::OperationContext;
pub use error::DomainError;
pub use events::{DecodedEnvelope, DomainEvent, EVENT_TRANSACTION_CREATED, EVENT_TRANSACTION_PAID};
pub use transaction::{NewTransaction, Transaction, UserId};
