//! Domain module
//!
//! Core domain types: monetary primitives, accounts, transfers, errors.

pub mod account;
pub mod amount;
pub mod context;
pub mod error;
pub mod transfer;

pub use account::{Account, AccountId, NewAccount, OwnerId};
pub use amount::{Amount, AmountError, Balance};
pub use context::OperationContext;
pub use error::TransferError;
pub use transfer::{IdempotencyKey, NewTransfer, TransferCommand, TransferId, TransferRecord};
