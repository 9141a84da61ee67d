//! Amount - Non-negative money value
//!
//! Event amounts, opening balances and account balances are all `Amount`s.
//! A negative value can only exist as a signed ledger movement, which is a
//! plain `Decimal`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised when building an amount
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmountError {
    #[error("Amount cannot be negative: {0}")]
    Negative(Decimal),

    #[error("Invalid amount literal: {0}")]
    InvalidLiteral(String),

    #[error("Amount overflow")]
    Overflow,
}

/// A non-negative decimal amount.
///
/// # Invariant
/// The inner value is always >= 0.
///
/// # Example
/// ```
/// use edalab_core::Amount;
/// use rust_decimal::Decimal;
///
/// let balance = Amount::new(Decimal::new(1000, 0)).unwrap();
/// let withdrawal = Amount::new(Decimal::new(200, 0)).unwrap();
/// assert_eq!(balance.checked_sub(&withdrawal).unwrap().value(), Decimal::new(800, 0));
///
/// // Overdrawing is not representable
/// assert!(withdrawal.checked_sub(&balance).is_none());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    pub const ZERO: Self = Self(Decimal::ZERO);

    /// Create a new Amount, rejecting negative values.
    pub fn new(value: Decimal) -> Result<Self, AmountError> {
        if value.is_sign_negative() && !value.is_zero() {
            Err(AmountError::Negative(value))
        } else {
            Ok(Self(value))
        }
    }

    /// Whole units, e.g. `Amount::from_units(1000)` for 1000.00
    pub fn from_units(units: u64) -> Self {
        Self(Decimal::from(units))
    }

    /// Amount with a fixed number of decimal places (`from_minor(12345, 2)` is 123.45)
    pub fn from_minor(minor: u64, scale: u32) -> Self {
        Self(Decimal::from(minor) / Decimal::from(10u64.pow(scale.min(18))))
    }

    #[inline]
    pub const fn value(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        !self.0.is_zero()
    }

    /// The amount as a signed outgoing movement (`-value`)
    pub fn negated(&self) -> Decimal {
        -self.0
    }

    pub fn checked_add(&self, other: &Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    /// Returns None when the result would go below zero
    pub fn checked_sub(&self, other: &Amount) -> Option<Amount> {
        let result = self.0.checked_sub(other.0)?;
        if result < Decimal::ZERO {
            None
        } else {
            Some(Amount(result))
        }
    }

    /// Round to the given number of decimal places (banker's rounding)
    pub fn round_dp(&self, dp: u32) -> Amount {
        Amount(self.0.round_dp(dp))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = Decimal::from_str(s.trim())
            .map_err(|_| AmountError::InvalidLiteral(s.to_string()))?;
        Self::new(value)
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = AmountError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl Default for Amount {
    fn default() -> Self {
        Self::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_negative_rejected() {
        let result = Amount::new(dec!(-0.01));
        assert!(matches!(result, Err(AmountError::Negative(_))));
    }

    #[test]
    fn test_negative_zero_accepted() {
        let amount = Amount::new(-Decimal::ZERO).unwrap();
        assert!(amount.is_zero());
    }

    #[test]
    fn test_from_minor() {
        assert_eq!(Amount::from_minor(12345, 2).value(), dec!(123.45));
        assert_eq!(Amount::from_units(1000).value(), dec!(1000));
    }

    #[test]
    fn test_checked_sub_never_goes_negative() {
        let balance = Amount::from_units(1000);
        assert!(balance.checked_sub(&Amount::from_units(5000)).is_none());
        assert_eq!(
            balance.checked_sub(&Amount::from_units(1000)).unwrap(),
            Amount::ZERO
        );
    }

    #[test]
    fn test_negated() {
        assert_eq!(Amount::from_units(200).negated(), dec!(-200));
    }

    #[test]
    fn test_parse() {
        assert_eq!("42.50".parse::<Amount>().unwrap().value(), dec!(42.50));
        assert!(matches!(
            "abc".parse::<Amount>(),
            Err(AmountError::InvalidLiteral(_))
        ));
        assert!(matches!("-1".parse::<Amount>(), Err(AmountError::Negative(_))));
    }

    #[test]
    fn test_serde_as_string() {
        let amount = Amount::from_minor(150050, 2);
        let json = serde_json::to_string(&amount).unwrap();
        assert_eq!(json, "\"1500.50\"");
        let parsed: Amount = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, amount);
    }

    #[test]
    fn test_serde_rejects_negative() {
        let parsed: Result<Amount, _> = serde_json::from_str("\"-10\"");
        assert!(parsed.is_err());
    }
}
