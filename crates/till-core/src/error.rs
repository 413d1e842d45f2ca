//! # Error Types
//!
//! Domain-specific error types for till-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  till-core errors (this file)                                          │
//! │  ├── CoreError        - Invariant violations and domain rule failures  │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  till-db errors (separate crate)                                       │
//! │  └── DbError          - Storage failures, wraps CoreError              │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → caller                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core domain errors.
///
/// Every variant except [`CoreError::Validation`] is an invariant violation:
/// the request would leave the ledger or a shift in a state that history can
/// no longer explain.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A ledger entry whose snapshot does not match its delta.
    ///
    /// ## When This Occurs
    /// ```text
    /// previous_stock: 10, quantity: -3, new_stock: 8
    ///                                    ▲
    ///                           10 + (-3) = 7, not 8
    /// ```
    #[error(
        "Stock delta mismatch for {product_id}: {previous_stock} + ({quantity}) != {new_stock}"
    )]
    StockDeltaMismatch {
        product_id: String,
        previous_stock: i64,
        quantity: i64,
        new_stock: i64,
    },

    /// A movement's quantity sign contradicts its type (e.g. a positive sale).
    #[error("{movement_type} movement for {product_id} cannot have quantity {quantity}")]
    InvalidMovementQuantity {
        product_id: String,
        movement_type: String,
        quantity: i64,
    },

    /// An appended entry is timestamped before the product's latest entry.
    ///
    /// Ledger order is timestamp order; back-dating an entry would change
    /// which row `current_stock` reports.
    #[error("Movement for {product_id} at {timestamp} precedes latest entry at {latest}")]
    OutOfOrderMovement {
        product_id: String,
        timestamp: DateTime<Utc>,
        latest: DateTime<Utc>,
    },

    /// Shift is not in a state that allows the requested operation.
    ///
    /// ## When This Occurs
    /// - Recording a sale against a completed shift
    /// - Closing a shift twice
    #[error("Shift {shift_id} is {current_status}, cannot {operation}")]
    InvalidShiftStatus {
        shift_id: String,
        current_status: String,
        operation: String,
    },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Creates an InvalidShiftStatus error.
    pub fn invalid_shift_status(
        shift_id: impl Into<String>,
        current_status: impl ToString,
        operation: impl Into<String>,
    ) -> Self {
        CoreError::InvalidShiftStatus {
            shift_id: shift_id.into(),
            current_status: current_status.to_string(),
            operation: operation.into(),
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Used for early validation before any storage round-trip.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Value must be zero or more.
    #[error("{field} must not be negative, got {value}")]
    Negative { field: String, value: i64 },

    /// A running total would leave the representable range.
    #[error("{field} overflows")]
    Overflow { field: String },

    /// Invalid format (e.g., invalid UUID, inverted date range).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delta_mismatch_message() {
        let err = CoreError::StockDeltaMismatch {
            product_id: "prod-1".to_string(),
            previous_stock: 10,
            quantity: -3,
            new_stock: 8,
        };
        assert_eq!(
            err.to_string(),
            "Stock delta mismatch for prod-1: 10 + (-3) != 8"
        );
    }

    #[test]
    fn test_invalid_shift_status_message() {
        let err = CoreError::invalid_shift_status("shift-1", "completed", "record a sale");
        assert_eq!(
            err.to_string(),
            "Shift shift-1 is completed, cannot record a sale"
        );
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "userId".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
