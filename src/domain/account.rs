//! Account records
//!
//! Accounts are plain rows owned by the account store. The transfer engine
//! only ever sees them through a locked read inside a unit of work.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Balance;

/// Stable account identity, assigned by the store and never reused
pub type AccountId = i64;

/// Opaque reference to the account holder
pub type OwnerId = i64;

/// A stored account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub owner_id: OwnerId,
    pub balance: Decimal,
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Balance as a validated domain value.
    ///
    /// The storage check constraint keeps this non-negative; a row that
    /// violates it is reported rather than silently clamped.
    pub fn balance(&self) -> Result<Balance, super::AmountError> {
        Balance::new(self.balance)
    }
}

/// Input for creating an account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAccount {
    pub owner_id: OwnerId,
    pub initial_balance: Balance,
}

impl NewAccount {
    pub fn new(owner_id: OwnerId, initial_balance: Balance) -> Self {
        Self {
            owner_id,
            initial_balance,
        }
    }
}
