//! # Reconciliation Engine
//!
//! Rebuilds a shift's totals from scratch by replaying its receipts. The
//! shift's incrementally maintained totals are treated as a possibly stale
//! cache and fully overwritten.
//!
//! ## Algorithm
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  for each receipt reference in shift.transactions                       │
//! │       │                                                                 │
//! │       ├── unresolved? ──► record in warning, skip, keep going           │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  effective method (latest approved correction, else original)           │
//! │       │                                                                 │
//! │       ├── refunded ──► total_refunds (+ total_cash_refunds if cash)     │
//! │       └── sale     ──► exactly one per-method sales total               │
//! │                        + cash↔non-cash correction tracking              │
//! │                                                                         │
//! │  then: paid in/out replayed from shift.cash_movements                   │
//! │        expected_cash = starting + cash sales - cash refunds + in - out  │
//! │        actual/variance per CashCountPolicy                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Idempotence
//! [`recalculate`] reads nothing but its arguments. Two calls with the same
//! shift and the same receipts produce identical totals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use ts_rs::TS;

use crate::error::CoreResult;
use crate::payment::Receipt;
use crate::shift::{variance, ShiftTotals};
use crate::types::{CloseType, Shift};

// =============================================================================
// Cash Count Policy
// =============================================================================

/// What recalculation does with `actual_cash`.
///
/// There is no physical count at recalculation time, so the question is
/// whether an earlier count survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum CashCountPolicy {
    /// Keep the cashier's physical count from a counted close and recompute
    /// variance against the new expected cash. Auto-closed shifts get
    /// `actual = expected`. Active shifts keep no actual cash.
    #[default]
    PreserveCounted,
    /// Set `actual = expected` (variance 0) on every completed shift.
    /// Discards counted drift.
    Recompute,
}

impl fmt::Display for CashCountPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CashCountPolicy::PreserveCounted => write!(f, "preserve_counted"),
            CashCountPolicy::Recompute => write!(f, "recompute"),
        }
    }
}

impl std::str::FromStr for CashCountPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "preserve_counted" | "preserve" => Ok(CashCountPolicy::PreserveCounted),
            "recompute" => Ok(CashCountPolicy::Recompute),
            other => Err(format!("Unknown cash count policy: {}", other)),
        }
    }
}

// =============================================================================
// Resolution Inputs
// =============================================================================

/// A transaction reference that could not be turned into a receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct UnresolvedReceipt {
    pub reference: String,
    pub reason: String,
}

/// Result of looking up one transaction reference.
#[derive(Debug, Clone)]
pub enum ReceiptResolution {
    Resolved(Receipt),
    Unresolved(UnresolvedReceipt),
}

impl ReceiptResolution {
    pub fn unresolved(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        ReceiptResolution::Unresolved(UnresolvedReceipt {
            reference: reference.into(),
            reason: reason.into(),
        })
    }
}

/// One or more receipts were skipped. Not fatal; totals cover the rest.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
#[error("{} receipt(s) could not be resolved during reconciliation", .unresolved.len())]
pub struct PartialReconciliationWarning {
    pub unresolved: Vec<UnresolvedReceipt>,
}

// =============================================================================
// Reconciliation Outcome
// =============================================================================

/// The recomputed shift plus what changed and what was skipped.
#[derive(Debug, Clone)]
pub struct Reconciliation {
    /// The shift with totals, expected cash, actual cash and variance rewritten.
    pub shift: Shift,
    /// Totals the shift carried before recalculation.
    pub previous_totals: ShiftTotals,
    pub previous_expected_cash: i64,
    pub receipts_processed: usize,
    pub warning: Option<PartialReconciliationWarning>,
}

impl Reconciliation {
    /// Number of receipts that could not be resolved.
    pub fn warning_count(&self) -> usize {
        self.warning.as_ref().map_or(0, |w| w.unresolved.len())
    }

    /// True when the incremental totals disagreed with the replay.
    pub fn had_drift(&self) -> bool {
        self.previous_totals != self.shift.totals()
            || self.previous_expected_cash != self.shift.expected_cash
    }
}

// =============================================================================
// Recalculate
// =============================================================================

/// Recomputes `shift` from its resolved receipts.
///
/// `resolutions` holds one entry per reference in `shift.transactions`.
/// `now` stamps `last_reconciled_at`; it does not influence any total.
///
/// Fails with a validation error if a resolved receipt carries a negative
/// amount or the replayed totals overflow. Nothing is partially applied.
pub fn recalculate(
    shift: &Shift,
    resolutions: Vec<ReceiptResolution>,
    policy: CashCountPolicy,
    now: DateTime<Utc>,
) -> CoreResult<Reconciliation> {
    let mut totals = ShiftTotals::default();
    let mut unresolved = Vec::new();
    let mut processed = 0;

    for resolution in resolutions {
        match resolution {
            ReceiptResolution::Resolved(receipt) => {
                totals.apply_receipt(&receipt)?;
                processed += 1;
            }
            ReceiptResolution::Unresolved(missing) => unresolved.push(missing),
        }
    }

    for movement in &shift.cash_movements {
        totals.apply_cash_movement(movement)?;
    }

    let mut rebuilt = shift.clone();
    rebuilt.set_totals(&totals)?;
    apply_cash_count_policy(&mut rebuilt, policy)?;
    rebuilt.last_reconciled_at = Some(now);

    Ok(Reconciliation {
        previous_totals: shift.totals(),
        previous_expected_cash: shift.expected_cash,
        shift: rebuilt,
        receipts_processed: processed,
        warning: if unresolved.is_empty() {
            None
        } else {
            Some(PartialReconciliationWarning { unresolved })
        },
    })
}

fn apply_cash_count_policy(shift: &mut Shift, policy: CashCountPolicy) -> CoreResult<()> {
    let expected = shift.expected_cash;

    let actual = if shift.is_active() {
        None
    } else {
        match (policy, shift.close_type, shift.actual_cash) {
            (CashCountPolicy::PreserveCounted, Some(CloseType::Counted), Some(counted)) => {
                Some(counted)
            }
            _ => Some(expected),
        }
    };

    shift.variance = actual.map(|a| variance(a, expected)).transpose()?;
    shift.actual_cash = actual;
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payment::{CorrectionStatus, PaymentCorrection, ReceiptPayment};
    use crate::types::{CashMovement, CashMovementType, ShiftStatus};

    fn receipt(id: &str, method: &str, total: i64) -> Receipt {
        Receipt {
            id: id.to_string(),
            receipt_number: None,
            total,
            payments: vec![ReceiptPayment {
                method: method.to_string(),
                amount: total,
            }],
            payment_history: vec![],
            payment_method: None,
            is_refunded: false,
            refund_amount: 0,
        }
    }

    fn shift_with(receipts: &[&Receipt]) -> Shift {
        let mut shift = Shift::open("s1", "u1", "Ana", 100_000, Utc::now());
        for r in receipts {
            shift.transactions.push(r.id.clone());
            let (delta, _) = ShiftTotals::from_receipt(r).unwrap();
            let totals = shift.totals().checked_add(&delta).unwrap();
            shift.set_totals(&totals).unwrap();
        }
        shift
    }

    fn resolved(receipts: &[&Receipt]) -> Vec<ReceiptResolution> {
        receipts
            .iter()
            .map(|r| ReceiptResolution::Resolved((*r).clone()))
            .collect()
    }

    #[test]
    fn test_recalculate_matches_incremental_totals() {
        let a = receipt("r1", "cash", 15_000);
        let b = receipt("r2", "cash", 20_000);
        let shift = shift_with(&[&a, &b]);

        let outcome = recalculate(
            &shift,
            resolved(&[&a, &b]),
            CashCountPolicy::default(),
            Utc::now(),
        )
        .unwrap();

        assert_eq!(outcome.shift.expected_cash, 135_000);
        assert_eq!(outcome.receipts_processed, 2);
        assert!(!outcome.had_drift());
        assert!(outcome.warning.is_none());
        assert_eq!(outcome.shift.actual_cash, None);
    }

    #[test]
    fn test_recalculate_is_idempotent() {
        let a = receipt("r1", "cash", 1_000);
        let b = receipt("r2", "card", 2_000);
        let shift = shift_with(&[&a, &b]);
        let now = Utc::now();

        let first = recalculate(
            &shift,
            resolved(&[&a, &b]),
            CashCountPolicy::Recompute,
            now,
        )
        .unwrap();
        let second = recalculate(
            &first.shift,
            resolved(&[&a, &b]),
            CashCountPolicy::Recompute,
            now,
        )
        .unwrap();

        assert_eq!(first.shift, second.shift);
        assert!(!second.had_drift());
    }

    #[test]
    fn test_approved_correction_moves_sale_to_card() {
        let original = receipt("r1", "cash", 5_000);
        let shift = shift_with(&[&original]);
        assert_eq!(shift.total_cash_sales, 5_000);

        let mut corrected = original.clone();
        corrected.payment_history.push(PaymentCorrection {
            old_method: "cash".to_string(),
            new_method: "credit card".to_string(),
            status: CorrectionStatus::Approved,
        });

        let outcome = recalculate(
            &shift,
            resolved(&[&corrected]),
            CashCountPolicy::default(),
            Utc::now(),
        )
        .unwrap();

        assert_eq!(outcome.shift.total_cash_sales, 0);
        assert_eq!(outcome.shift.total_card_sales, 5_000);
        assert_eq!(outcome.shift.total_payment_changes_affecting_cash, -5_000);
        assert_eq!(outcome.shift.expected_cash, 100_000);
        assert!(outcome.had_drift());
    }

    #[test]
    fn test_unresolved_receipt_is_skipped_and_reported() {
        let a = receipt("r1", "cash", 1_000);
        let mut shift = shift_with(&[&a]);
        shift.transactions.push("missing".to_string());

        let mut inputs = resolved(&[&a]);
        inputs.push(ReceiptResolution::unresolved("missing", "not found"));

        let outcome = recalculate(
            &shift,
            inputs,
            CashCountPolicy::default(),
            Utc::now(),
        )
        .unwrap();

        assert_eq!(outcome.shift.total_cash_sales, 1_000);
        assert_eq!(outcome.warning_count(), 1);
        assert_eq!(outcome.shift.transactions.len(), 2);
        let warning = outcome.warning.unwrap();
        assert_eq!(
            warning.to_string(),
            "1 receipt(s) could not be resolved during reconciliation"
        );
    }

    #[test]
    fn test_cash_movements_replayed() {
        let mut shift = Shift::open("s1", "u1", "Ana", 10_000, Utc::now());
        shift.cash_movements.push(CashMovement {
            movement_type: CashMovementType::Payin,
            amount: 2_000,
            reason: "Float top-up".to_string(),
            timestamp: Utc::now(),
        });
        // Stale cache: paid-in total never recorded.
        let outcome = recalculate(
            &shift,
            vec![],
            CashCountPolicy::default(),
            Utc::now(),
        )
        .unwrap();

        assert_eq!(outcome.shift.total_paid_in, 2_000);
        assert_eq!(outcome.shift.expected_cash, 12_000);
    }

    #[test]
    fn test_preserve_counted_keeps_physical_count() {
        let a = receipt("r1", "cash", 1_000);
        let mut shift = shift_with(&[&a]);
        shift.status = ShiftStatus::Completed;
        shift.close_type = Some(CloseType::Counted);
        shift.actual_cash = Some(100_900);
        shift.variance = Some(-100);

        let outcome = recalculate(
            &shift,
            resolved(&[&a]),
            CashCountPolicy::PreserveCounted,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(outcome.shift.actual_cash, Some(100_900));
        assert_eq!(outcome.shift.variance, Some(-100));
        assert_eq!(outcome.shift.status, ShiftStatus::Completed);

        let recomputed = recalculate(
            &shift,
            resolved(&[&a]),
            CashCountPolicy::Recompute,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(recomputed.shift.actual_cash, Some(101_000));
        assert_eq!(recomputed.shift.variance, Some(0));
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!(
            "preserve_counted".parse::<CashCountPolicy>().unwrap(),
            CashCountPolicy::PreserveCounted
        );
        assert_eq!(
            "RECOMPUTE".parse::<CashCountPolicy>().unwrap(),
            CashCountPolicy::Recompute
        );
        assert!("guess".parse::<CashCountPolicy>().is_err());
    }
}
