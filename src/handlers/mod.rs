//! Command Handlers module
//!
//! Orchestrates ledger operations: validation, authorization, the capped
//! store mutation and event emission.

mod commands;
mod error;
mod ledger_handler;

#[cfg(test)]
mod tests;

pub use commands::*;
pub use error::LedgerError;
pub use ledger_handler::{Emitted, LedgerHandler};
