//! Projection module
//!
//! Analytics read model derived from the transaction event stream.
//! The projection is eventually consistent with the ledger and lives only in
//! the memory of the analytics process.

mod consumer;
mod service;

pub use consumer::{wait_for_workers, AnalyticsConsumer};
pub use service::{AnalyticsProjection, AnalyticsSnapshot, ProjectionError, UserStats};
