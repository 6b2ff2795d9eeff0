//! capped_ledger Library
//!
//! Capped transaction ledger, its event emission path, the broker transport
//! and the analytics projection fed by it.

pub mod api;
pub mod broker;
pub mod config;
pub mod db;
pub mod domain;
pub mod emitter;
pub mod handlers;
pub mod jobs;
pub mod projection;
pub mod server;
pub mod store;

mod error;

pub use config::Config;
pub use domain::{Amount, AmountError, DomainError, DomainEvent, OperationContext, Transaction, UserId};
pub use error::{AppError, AppResult, ErrorResponse};
