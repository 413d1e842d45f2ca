//! # Money Module
//!
//! Provides the `Money` type for cash drawer arithmetic.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE FLOATING POINT PROBLEM                                             │
//! │                                                                         │
//! │    0.1 + 0.2 = 0.30000000000000004  ❌                                  │
//! │                                                                         │
//! │  A shift sums hundreds of receipts. Float drift shows up as a          │
//! │  phantom variance the cashier never caused.                            │
//! │                                                                         │
//! │  OUR SOLUTION: Integer Cents                                            │
//! │    every persisted amount is an i64 in minor units                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Persisted records keep plain `i64` cents fields so their serialized shape
//! stays stable; `Money` is the arithmetic and display wrapper around them.
//!
//! ## Usage
//! ```rust
//! use till_core::money::Money;
//!
//! let float = Money::from_cents(100_000);
//! let drawer = float
//!     .checked_add(Money::from_cents(15_000))
//!     .and_then(|m| m.checked_sub(Money::from_cents(5_000)));
//! assert_eq!(drawer.map(|m| m.cents()), Some(110_000));
//!
//! // Receipt totals come from outside; sums must not wrap.
//! assert_eq!(Money::from_cents(i64::MAX).checked_add(Money::from_cents(1)), None);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Neg;
use ts_rs::TS;

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in the smallest currency unit (cents for USD).
///
/// Signed: refunds, payouts and variances are negative. There is no
/// unchecked `+`/`-`; totals built from receipts use [`Money::checked_add`]
/// and [`Money::checked_sub`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from cents.
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Returns the value in cents.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    /// `self + other`, or `None` if the sum leaves the i64 range.
    #[inline]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(cents) => Some(Money(cents)),
            None => None,
        }
    }

    /// `self - other`, or `None` if the difference leaves the i64 range.
    #[inline]
    pub const fn checked_sub(self, other: Self) -> Option<Self> {
        match self.0.checked_sub(other.0) {
            Some(cents) => Some(Money(cents)),
            None => None,
        }
    }
}

/// Display for logs and the audit binary. Not localized.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}${}.{:02}", sign, abs / 100, abs % 100)
    }
}

/// Callers only negate validated, non-negative amounts.
impl Neg for Money {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        Money(-self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Money::from_cents(1099).to_string(), "$10.99");
        assert_eq!(Money::from_cents(-1000).to_string(), "-$10.00");
        assert_eq!(Money::from_cents(5).to_string(), "$0.05");
        assert_eq!(Money::from_cents(i64::MIN).to_string(), "-$92233720368547758.08");
    }

    #[test]
    fn test_checked_arithmetic() {
        let a = Money::from_cents(1000);
        let b = Money::from_cents(250);

        assert_eq!(a.checked_add(b), Some(Money::from_cents(1250)));
        assert_eq!(a.checked_sub(b), Some(Money::from_cents(750)));
        assert_eq!((-b).cents(), -250);
    }

    #[test]
    fn test_checked_arithmetic_detects_overflow() {
        let half = Money::from_cents(i64::MAX / 2 + 1);
        assert_eq!(half.checked_add(half), None);
        assert_eq!(Money::from_cents(i64::MIN).checked_sub(Money::from_cents(1)), None);
    }
}
