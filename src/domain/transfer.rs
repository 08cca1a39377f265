//! Transfer requests and ledger records

use chrono::{DateTime, SubsecRound, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{AccountId, Amount, TransferError};

/// Server-assigned ledger sequence id
pub type TransferId = i64;

// =========================================================================
// TransferCommand
// =========================================================================

/// Raw transfer request as received from a caller.
///
/// Every field is optional here so that a missing field surfaces as
/// `InvalidTransfer` from [`TransferCommand::validate`] instead of a
/// deserialization failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransferCommand {
    #[serde(default)]
    pub from_account_id: Option<AccountId>,
    #[serde(default)]
    pub to_account_id: Option<AccountId>,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub requested_at: Option<DateTime<Utc>>,
}

impl TransferCommand {
    pub fn new(
        from_account_id: AccountId,
        to_account_id: AccountId,
        amount: Decimal,
        requested_at: DateTime<Utc>,
    ) -> Self {
        Self {
            from_account_id: Some(from_account_id),
            to_account_id: Some(to_account_id),
            amount: Some(amount),
            requested_at: Some(requested_at),
        }
    }

    /// Check request shape. Runs before any storage access.
    pub fn validate(&self) -> Result<NewTransfer, TransferError> {
        let from_account_id = self
            .from_account_id
            .ok_or_else(|| TransferError::invalid("from_account_id is required"))?;
        let to_account_id = self
            .to_account_id
            .ok_or_else(|| TransferError::invalid("to_account_id is required"))?;
        let amount = self
            .amount
            .ok_or_else(|| TransferError::invalid("amount is required"))?;
        // Microsecond resolution is what every backend can store, so the
        // idempotency key is compared at that resolution everywhere
        let requested_at = self
            .requested_at
            .ok_or_else(|| TransferError::invalid("requested_at is required"))?
            .trunc_subsecs(6);

        if from_account_id == to_account_id {
            return Err(TransferError::invalid("self-transfer: source and destination must differ"));
        }

        let amount = Amount::new(amount).map_err(|e| match e {
            super::AmountError::NotPositive(_) => {
                TransferError::invalid(format!("non-positive amount: {}", amount))
            }
            other => TransferError::invalid(format!("amount: {}", other)),
        })?;

        Ok(NewTransfer {
            from_account_id,
            to_account_id,
            amount,
            requested_at,
        })
    }
}

// =========================================================================
// NewTransfer
// =========================================================================

/// A validated transfer, ready to be executed and recorded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransfer {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: Amount,
    pub requested_at: DateTime<Utc>,
}

impl NewTransfer {
    pub fn idempotency_key(&self) -> IdempotencyKey {
        IdempotencyKey {
            from_account_id: self.from_account_id,
            to_account_id: self.to_account_id,
            requested_at: self.requested_at,
        }
    }
}

/// The `(from, to, requested_at)` triple that identifies a transfer request.
/// Amount is deliberately not part of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdempotencyKey {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub requested_at: DateTime<Utc>,
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}->{}@{}",
            self.from_account_id,
            self.to_account_id,
            self.requested_at.to_rfc3339()
        )
    }
}

// =========================================================================
// TransferRecord
// =========================================================================

/// An immutable ledger entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub id: TransferId,
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: Decimal,
    pub requested_at: DateTime<Utc>,
}

impl TransferRecord {
    pub fn idempotency_key(&self) -> IdempotencyKey {
        IdempotencyKey {
            from_account_id: self.from_account_id,
            to_account_id: self.to_account_id,
            requested_at: self.requested_at,
        }
    }
}
