//! Transfer Error Types
//!
//! The caller-visible outcomes of a transfer attempt. Storage details never
//! leak through these; they are logged where they occur.

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::AccountId;

/// Errors returned by the transfer engine.
///
/// Every variant is returned only after the unit of work has been rolled
/// back, so none of them implies a partial effect.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransferError {
    /// Malformed request: self-transfer, non-positive amount, missing field
    #[error("Invalid transfer: {0}")]
    InvalidTransfer(String),

    /// Source balance too low at evaluation time, or the guarded update lost a race
    #[error("Insufficient funds in account {account_id}")]
    InsufficientFunds { account_id: AccountId },

    /// The idempotency triple is already recorded
    #[error("Duplicate transfer: {from_account_id}->{to_account_id} at {requested_at} already recorded")]
    DuplicateTransfer {
        from_account_id: AccountId,
        to_account_id: AccountId,
        requested_at: DateTime<Utc>,
    },

    /// One of the accounts does not exist at lock time
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    /// Storage or infrastructure failure
    #[error("Transfer failed")]
    TransferFailed,
}

impl TransferError {
    /// Create an invalid transfer error
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidTransfer(reason.into())
    }

    /// Check if an identical retry may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransferFailed)
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidTransfer(_) => "invalid_transfer",
            Self::InsufficientFunds { .. } => "insufficient_funds",
            Self::DuplicateTransfer { .. } => "duplicate_transfer",
            Self::AccountNotFound(_) => "account_not_found",
            Self::TransferFailed => "transfer_failed",
        }
    }
}
