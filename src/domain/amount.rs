//! Amount and Balance types
//!
//! Domain primitives for monetary values. Both share the storage scale of
//! `NUMERIC(18,2)`: at most two fractional digits and sixteen integer digits.
//! Values are validated at construction, so an invalid amount cannot reach
//! the transfer engine or the store.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest value representable by `NUMERIC(18,2)`
const MAX_VALUE: Decimal = Decimal::from_parts(2_808_348_671, 232_830_643, 0, false, 2);

/// Maximum decimal places (2)
pub const SCALE: u32 = 2;

/// Amount represents a validated, strictly positive monetary value.
///
/// # Invariants
/// - Value is always positive (> 0)
/// - At most 2 decimal places
/// - At most 9999999999999999.99
///
/// # Example
/// ```
/// use rust_decimal::Decimal;
/// use instant_transfers::domain::Amount;
///
/// let amount = Amount::new(Decimal::new(50000, 2)).unwrap();
/// assert_eq!(amount.value(), Decimal::new(500, 0));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(Decimal);

/// Errors that can occur when creating an Amount or Balance
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("amount must be positive (got {0})")]
    NotPositive(Decimal),

    #[error("balance must not be negative (got {0})")]
    Negative(Decimal),

    #[error("too many decimal places (max {SCALE}, got {0})")]
    TooManyDecimals(u32),

    #[error("value exceeds maximum allowed ({MAX_VALUE})")]
    Overflow,
}

/// Shared scale/range rules for both primitives.
fn check_precision(value: Decimal) -> Result<(), AmountError> {
    // 500.00 and 500 are the same amount; only significant digits count
    let normalized = value.normalize();
    if normalized.scale() > SCALE {
        return Err(AmountError::TooManyDecimals(normalized.scale()));
    }
    if value > MAX_VALUE {
        return Err(AmountError::Overflow);
    }
    Ok(())
}

impl Amount {
    /// Create a new Amount with validation.
    ///
    /// # Errors
    /// - `AmountError::NotPositive` if value <= 0
    /// - `AmountError::TooManyDecimals` if more than 2 decimal places
    /// - `AmountError::Overflow` if value does not fit `NUMERIC(18,2)`
    pub fn new(value: Decimal) -> Result<Self, AmountError> {
        if value <= Decimal::ZERO {
            return Err(AmountError::NotPositive(value));
        }
        check_precision(value)?;

        let mut value = value;
        value.rescale(SCALE);
        Ok(Self(value))
    }

    /// Get the underlying Decimal value (always at scale 2).
    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

/// Balance represents an account balance (zero or positive).
/// Unlike Amount, Balance can be zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Balance(Decimal);

impl Balance {
    /// Create a new balance (zero or positive)
    pub fn new(value: Decimal) -> Result<Self, AmountError> {
        if value < Decimal::ZERO {
            return Err(AmountError::Negative(value));
        }
        check_precision(value)?;

        let mut value = value;
        value.rescale(SCALE);
        Ok(Self(value))
    }

    /// Create a zero balance
    pub fn zero() -> Self {
        Self(Decimal::new(0, SCALE))
    }

    /// Get the underlying value
    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Check if balance covers a withdrawal of `amount`
    pub fn is_sufficient_for(&self, amount: &Amount) -> bool {
        self.0 >= amount.value()
    }
}

impl TryFrom<Decimal> for Balance {
    type Error = AmountError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Balance::new(value)
    }
}

impl From<Balance> for Decimal {
    fn from(balance: Balance) -> Self {
        balance.0
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl Default for Balance {
    fn default() -> Self {
        Self::zero()
    }
}
