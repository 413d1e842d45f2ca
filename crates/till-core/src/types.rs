//! # Domain Types
//!
//! Persisted record shapes for the stock ledger and the shift store.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌────────────────────┐   ┌─────────────────┐   ┌─────────────────┐    │
//! │  │ StockMovementEntry │   │      Shift      │   │  CashMovement   │    │
//! │  │  ────────────────  │   │  ─────────────  │   │  ─────────────  │    │
//! │  │  productId         │   │  id, userId     │   │  type           │    │
//! │  │  type              │   │  status         │   │  amount         │    │
//! │  │  quantity (±)      │   │  startingCash   │   │  reason         │    │
//! │  │  previousStock     │   │  expectedCash   │   │  timestamp      │    │
//! │  │  newStock          │   │  total*Sales    │   └─────────────────┘    │
//! │  │  timestamp         │   │  transactions[] │                          │
//! │  └────────────────────┘   └─────────────────┘                          │
//! │                                                                         │
//! │  Append-only:  StockMovementEntry, CashMovement                        │
//! │  Mutable:      Shift (incremental totals, close, reconciliation)       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Compatibility Surface
//! Serialized field names (camelCase, `type` for movement kinds) are read by
//! the reporting and receipt subsystems. Renaming a field is a breaking change.
//!
//! All monetary fields are signed cents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::money::Money;

// =============================================================================
// Movement Type
// =============================================================================

/// Why a stock movement happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    /// Opening balance when a product enters the ledger.
    Initial,
    /// Stock leaving through a receipt (negative quantity).
    Sale,
    /// Stock arriving against a purchase order (positive quantity).
    PurchaseOrder,
    /// Manual correction: shrinkage, damage, recount.
    Adjustment,
}

impl MovementType {
    /// Returns the persisted name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            MovementType::Initial => "initial",
            MovementType::Sale => "sale",
            MovementType::PurchaseOrder => "purchase_order",
            MovementType::Adjustment => "adjustment",
        }
    }
}

impl fmt::Display for MovementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Stock Movement Entry
// =============================================================================

/// One immutable line of the stock ledger.
///
/// ## Invariant
/// `new_stock == previous_stock + quantity`, checked by
/// [`StockMovementEntry::check_delta`] before anything is persisted.
///
/// `product_name` and `sku` are denormalized for audit readability only.
/// They are a snapshot, never the authoritative product record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct StockMovementEntry {
    /// Unique identifier (UUID v4). Makes appends idempotent on retry.
    pub id: String,
    pub product_id: String,
    pub product_name: String,
    pub sku: String,
    #[serde(rename = "type")]
    pub movement_type: MovementType,
    /// Signed delta applied to stock.
    pub quantity: i64,
    pub previous_stock: i64,
    pub new_stock: i64,
    pub reason: Option<String>,
    /// Originating receipt or purchase order.
    pub reference_id: Option<String>,
    pub user_id: String,
    pub user_name: String,
    /// Ordering key.
    #[ts(as = "String")]
    pub timestamp: DateTime<Utc>,
}

/// Request to record a movement whose snapshot the ledger fills in.
///
/// Used by the hot path (sales, purchase orders) where the caller knows the
/// delta but must not guess the previous stock.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct NewStockMovement {
    pub product_id: String,
    pub product_name: String,
    pub sku: String,
    #[serde(rename = "type")]
    pub movement_type: MovementType,
    pub quantity: i64,
    pub reason: Option<String>,
    pub reference_id: Option<String>,
    pub user_id: String,
    pub user_name: String,
    /// Stock to start from when the product has no ledger history yet.
    /// Comes from static product metadata owned elsewhere.
    pub fallback_stock: Option<i64>,
}

// =============================================================================
// Shift Status
// =============================================================================

/// Lifecycle of a shift: `active -> completed` (terminal).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum ShiftStatus {
    Active,
    Completed,
}

impl Default for ShiftStatus {
    fn default() -> Self {
        ShiftStatus::Active
    }
}

impl fmt::Display for ShiftStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShiftStatus::Active => write!(f, "active"),
            ShiftStatus::Completed => write!(f, "completed"),
        }
    }
}

/// How a completed shift was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum CloseType {
    /// Cashier counted the drawer; `actual_cash` is a physical count.
    Counted,
    /// Anomaly cleanup; `actual_cash` was forced to `expected_cash`.
    Auto,
}

// =============================================================================
// Cash Movement
// =============================================================================

/// Direction of a non-sale drawer movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum CashMovementType {
    /// Cash put into the drawer (change float top-up).
    Payin,
    /// Cash taken out (supplier paid from the till, bank drop).
    Payout,
}

/// A pay-in or pay-out recorded against a shift. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct CashMovement {
    #[serde(rename = "type")]
    pub movement_type: CashMovementType,
    /// Always positive; direction comes from `movement_type`.
    pub amount: i64,
    pub reason: String,
    #[ts(as = "String")]
    pub timestamp: DateTime<Utc>,
}

impl CashMovement {
    /// Signed effect on the drawer.
    pub fn signed_amount(&self) -> Money {
        match self.movement_type {
            CashMovementType::Payin => Money::from_cents(self.amount),
            CashMovementType::Payout => -Money::from_cents(self.amount),
        }
    }
}

// =============================================================================
// Shift
// =============================================================================

/// One cashier work session with its own cash-drawer accounting.
///
/// ## Invariants
/// ```text
/// while active:  expected_cash == starting_cash + total_cash_sales
///                                 - total_cash_refunds
///                                 + total_paid_in - total_paid_out
/// on close:      variance == actual_cash - expected_cash
/// ```
///
/// The per-method totals are a cache maintained incrementally; the
/// reconciliation engine can rebuild them from `transactions` at any time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Shift {
    pub id: String,
    pub user_id: String,
    pub user_name: String,
    #[ts(as = "String")]
    pub start_time: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub end_time: Option<DateTime<Utc>>,
    pub status: ShiftStatus,

    pub starting_cash: i64,
    pub expected_cash: i64,
    /// Set on close. For `CloseType::Counted` this is the physical count.
    pub actual_cash: Option<i64>,
    pub variance: Option<i64>,

    pub total_cash_sales: i64,
    pub total_card_sales: i64,
    pub total_bank_transfer_sales: i64,
    pub total_crypto_sales: i64,
    pub total_other_sales: i64,
    pub total_cash_refunds: i64,
    pub total_refunds: i64,
    pub total_paid_in: i64,
    pub total_paid_out: i64,
    /// Net cash effect of approved retroactive payment corrections.
    pub total_payment_changes_affecting_cash: i64,

    pub cash_movements: Vec<CashMovement>,
    /// Receipt ids, in the order they were recorded. Append-only.
    pub transactions: Vec<String>,

    pub notes: Option<String>,
    pub close_type: Option<CloseType>,
    pub close_reason: Option<String>,
    #[ts(as = "Option<String>")]
    pub last_reconciled_at: Option<DateTime<Utc>>,

    /// Incremented on every mutation; guards reconciliation writes.
    pub version: i64,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Shift {
    /// Returns true while the drawer is open.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.status == ShiftStatus::Active
    }

    /// Returns true if the shift was force-closed during anomaly cleanup.
    #[inline]
    pub fn was_auto_closed(&self) -> bool {
        self.close_type == Some(CloseType::Auto)
    }
}

// =============================================================================
// Shift Statistics
// =============================================================================

/// Aggregate view over shifts, optionally scoped to one user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct ShiftStatistics {
    pub total_shifts: i64,
    pub active_shifts: i64,
    pub completed_shifts: i64,
    pub auto_closed_shifts: i64,
    pub total_sales: i64,
    pub total_cash_sales: i64,
    pub total_refunds: i64,
    pub total_paid_in: i64,
    pub total_paid_out: i64,
    /// Sum of variances over completed shifts.
    pub total_variance: i64,
    /// Mean variance over completed shifts, truncated toward zero.
    pub average_variance: i64,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_movement_type_display_matches_serde() {
        for kind in [
            MovementType::Initial,
            MovementType::Sale,
            MovementType::PurchaseOrder,
            MovementType::Adjustment,
        ] {
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json, kind.to_string());
        }
    }

    #[test]
    fn test_entry_serializes_with_compatible_field_names() {
        let entry = StockMovementEntry {
            id: "e1".to_string(),
            product_id: "p1".to_string(),
            product_name: "Cola".to_string(),
            sku: "COLA-330".to_string(),
            movement_type: MovementType::PurchaseOrder,
            quantity: 20,
            previous_stock: 7,
            new_stock: 27,
            reason: None,
            reference_id: Some("po-9".to_string()),
            user_id: "u1".to_string(),
            user_name: "Ana".to_string(),
            timestamp: Utc::now(),
        };

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["type"], "purchase_order");
        assert_eq!(json["previousStock"], 7);
        assert_eq!(json["newStock"], 27);
        assert_eq!(json["referenceId"], "po-9");
    }

    #[test]
    fn test_cash_movement_signed_amount() {
        let payout = CashMovement {
            movement_type: CashMovementType::Payout,
            amount: 5_000,
            reason: "Milk supplier".to_string(),
            timestamp: Utc::now(),
        };
        assert_eq!(payout.signed_amount().cents(), -5_000);

        let json = serde_json::to_value(&payout).unwrap();
        assert_eq!(json["type"], "payout");
    }

    #[test]
    fn test_shift_status_default() {
        assert_eq!(ShiftStatus::default(), ShiftStatus::Active);
        assert_eq!(ShiftStatus::Completed.to_string(), "completed");
    }
}
