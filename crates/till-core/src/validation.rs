//! # Validation Module
//!
//! Input validation for ledger and shift operations.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: THIS MODULE                                                  │
//! │  ├── Required identifiers, text lengths                                │
//! │  └── Amount ranges, date ranges                                        │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Domain invariants (ledger.rs, shift.rs)                      │
//! │  └── delta consistency, sign rules, status transitions                 │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── CHECK (new_stock = previous_stock + quantity)                     │
//! │  ├── UNIQUE active shift per user                                      │
//! │  └── Foreign key constraints                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};

use crate::error::ValidationError;
use crate::{MAX_CASH_AMOUNT_CENTS, MAX_REASON_LENGTH};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// String Validators
// =============================================================================

fn require(field: &str, value: &str, max: usize) -> ValidationResult<()> {
    let value = value.trim();

    if value.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if value.len() > max {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max,
        });
    }

    Ok(())
}

/// Validates a product identifier (1-64 characters).
pub fn validate_product_id(id: &str) -> ValidationResult<()> {
    require("productId", id, 64)
}

/// Validates a user identifier (1-64 characters).
pub fn validate_user_id(id: &str) -> ValidationResult<()> {
    require("userId", id, 64)
}

/// Validates a SKU.
///
/// ## Rules
/// - 1 to 50 characters
/// - Only alphanumeric characters, hyphens, underscores
///
/// ```rust
/// use till_core::validation::validate_sku;
///
/// assert!(validate_sku("COKE-330").is_ok());
/// assert!(validate_sku("").is_err());
/// ```
pub fn validate_sku(sku: &str) -> ValidationResult<()> {
    require("sku", sku, 50)?;

    if !sku
        .trim()
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::InvalidFormat {
            field: "sku".to_string(),
            reason: "must contain only letters, numbers, hyphens, and underscores".to_string(),
        });
    }

    Ok(())
}

/// Validates a free-text reason. Empty is allowed; length is capped.
pub fn validate_reason(reason: &str) -> ValidationResult<()> {
    if reason.len() > MAX_REASON_LENGTH {
        return Err(ValidationError::TooLong {
            field: "reason".to_string(),
            max: MAX_REASON_LENGTH,
        });
    }
    Ok(())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a pay-in / pay-out amount.
///
/// ## Rules
/// - Must be positive (> 0); direction is carried by the movement type
/// - Must not exceed MAX_CASH_AMOUNT_CENTS
pub fn validate_cash_amount(cents: i64) -> ValidationResult<()> {
    if cents <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "amount".to_string(),
        });
    }

    if cents > MAX_CASH_AMOUNT_CENTS {
        return Err(ValidationError::OutOfRange {
            field: "amount".to_string(),
            min: 1,
            max: MAX_CASH_AMOUNT_CENTS,
        });
    }

    Ok(())
}

/// Validates a receipt total or refund amount.
///
/// Receipts are authored elsewhere, so only the sign is enforced here;
/// [`crate::ShiftTotals`] rejects sums that would overflow.
pub fn validate_receipt_amount(field: &str, cents: i64) -> ValidationResult<()> {
    if cents < 0 {
        return Err(ValidationError::Negative {
            field: field.to_string(),
            value: cents,
        });
    }
    Ok(())
}

/// Validates a drawer count (starting float or counted cash at close).
///
/// Zero is allowed: a drawer can open empty.
pub fn validate_drawer_count(field: &str, cents: i64) -> ValidationResult<()> {
    if !(0..=MAX_CASH_AMOUNT_CENTS).contains(&cents) {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            min: 0,
            max: MAX_CASH_AMOUNT_CENTS,
        });
    }
    Ok(())
}

/// Validates a query page size.
pub fn validate_limit(limit: u32) -> ValidationResult<()> {
    if limit == 0 || limit > 10_000 {
        return Err(ValidationError::OutOfRange {
            field: "limit".to_string(),
            min: 1,
            max: 10_000,
        });
    }
    Ok(())
}

// =============================================================================
// Date Validators
// =============================================================================

/// Validates that `from` does not come after `to`.
pub fn validate_date_range(from: DateTime<Utc>, to: DateTime<Utc>) -> ValidationResult<()> {
    if from > to {
        return Err(ValidationError::InvalidFormat {
            field: "date range".to_string(),
            reason: format!("start {} is after end {}", from, to),
        });
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_validate_sku() {
        assert!(validate_sku("COKE-330").is_ok());
        assert!(validate_sku("product_1").is_ok());

        assert!(validate_sku("").is_err());
        assert!(validate_sku("   ").is_err());
        assert!(validate_sku("has space").is_err());
        assert!(validate_sku(&"A".repeat(100)).is_err());
    }

    #[test]
    fn test_validate_ids() {
        assert!(validate_product_id("prod-1").is_ok());
        assert!(validate_product_id("").is_err());
        assert!(validate_user_id(&"u".repeat(65)).is_err());
    }

    #[test]
    fn test_validate_cash_amount() {
        assert!(validate_cash_amount(1).is_ok());
        assert!(validate_cash_amount(0).is_err());
        assert!(validate_cash_amount(-50).is_err());
        assert!(validate_cash_amount(MAX_CASH_AMOUNT_CENTS + 1).is_err());
    }

    #[test]
    fn test_validate_receipt_amount() {
        assert!(validate_receipt_amount("total", 0).is_ok());
        assert!(validate_receipt_amount("total", i64::MAX).is_ok());
        assert!(matches!(
            validate_receipt_amount("refundAmount", -1),
            Err(ValidationError::Negative { value: -1, .. })
        ));
    }

    #[test]
    fn test_validate_drawer_count() {
        assert!(validate_drawer_count("startingCash", 0).is_ok());
        assert!(validate_drawer_count("startingCash", 100_000).is_ok());
        assert!(validate_drawer_count("actualCash", -1).is_err());
    }

    #[test]
    fn test_validate_date_range() {
        let now = Utc::now();
        assert!(validate_date_range(now, now).is_ok());
        assert!(validate_date_range(now - Duration::days(1), now).is_ok());
        assert!(validate_date_range(now, now - Duration::days(1)).is_err());
    }

    #[test]
    fn test_validate_limit() {
        assert!(validate_limit(50).is_ok());
        assert!(validate_limit(0).is_err());
    }
}
