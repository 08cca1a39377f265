//! Instant Transfers Library
//!
//! Account ledger with an atomic, idempotent transfer engine.
//! Re-exports modules for integration testing and the binaries.

pub mod api;
pub mod config;
pub mod db;
pub mod domain;
pub mod engine;
pub mod store;

mod error;

pub use config::{Config, StorageBackend};
pub use domain::{Amount, AmountError, Balance, OperationContext, TransferError};
pub use engine::TransferEngine;
pub use error::{AppError, AppResult, ErrorResponse};
