//! Credit amount type
//!
//! Domain primitive for signed ledger movements. The sign encodes the
//! direction: negative amounts are debits, positive amounts are credits.
//! All amounts are validated at construction time, so a zero or
//! over-precise movement can never reach the ledger.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Largest absolute value of a single movement
const MAX_ABS_AMOUNT: i64 = 1_000_000_000;

/// Maximum decimal places (cents)
const MAX_SCALE: u32 = 2;

/// A validated, signed, non-zero credit movement.
///
/// # Invariants
/// - Value is never zero
/// - At most 2 decimal places
/// - Absolute value at most 1,000,000,000
///
/// # Example
/// ```
/// use rust_decimal::Decimal;
/// use ticket_ledger::domain::CreditAmount;
///
/// let debit = CreditAmount::new(Decimal::new(-2500, 2)).unwrap();
/// assert!(!debit.is_addition());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct CreditAmount(Decimal);

/// Errors that can occur when creating a CreditAmount
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("Amount must not be zero")]
    Zero,

    #[error("Amount has too many decimal places (max {MAX_SCALE}, got {0})")]
    TooManyDecimals(u32),

    #[error("Amount exceeds maximum allowed magnitude ({MAX_ABS_AMOUNT})")]
    Overflow,

    #[error("Invalid amount format: {0}")]
    ParseError(String),
}

impl CreditAmount {
    /// Create a new CreditAmount with validation.
    ///
    /// Trailing zeros beyond the second decimal place are accepted
    /// (`25.000` is `25.00`).
    pub fn new(value: Decimal) -> Result<Self, AmountError> {
        if value.is_zero() {
            return Err(AmountError::Zero);
        }

        let normalized = value.normalize();
        if normalized.scale() > MAX_SCALE {
            return Err(AmountError::TooManyDecimals(normalized.scale()));
        }

        if value.abs() > Decimal::from(MAX_ABS_AMOUNT) {
            return Err(AmountError::Overflow);
        }

        let mut value = value;
        value.rescale(MAX_SCALE);
        Ok(Self(value))
    }

    /// Get the underlying Decimal value.
    pub fn value(&self) -> Decimal {
        self.0
    }

    /// True when the movement adds to the balance.
    pub fn is_addition(&self) -> bool {
        self.0.is_sign_positive()
    }
}

impl fmt::Display for CreditAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl FromStr for CreditAmount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decimal =
            Decimal::from_str(s.trim()).map_err(|e| AmountError::ParseError(e.to_string()))?;
        CreditAmount::new(decimal)
    }
}

impl TryFrom<Decimal> for CreditAmount {
    type Error = AmountError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        CreditAmount::new(value)
    }
}

impl From<CreditAmount> for Decimal {
    fn from(amount: CreditAmount) -> Self {
        amount.0
    }
}
