//! # Shift Arithmetic
//!
//! Totals bookkeeping shared by the incremental path (one receipt at a time,
//! as sales happen) and the reconciliation path (every receipt replayed from
//! scratch). Both go through [`ShiftTotals::apply_receipt`], so a shift that
//! was never touched by a correction reconciles to exactly its incremental
//! totals.
//!
//! ## Drawer Formula
//! ```text
//! expected_cash = starting_cash
//!               + total_cash_sales
//!               - total_cash_refunds
//!               + total_paid_in
//!               - total_paid_out
//!
//! variance      = actual_cash - expected_cash      (negative = short)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::payment::{PaymentMethod, Receipt};
use crate::types::{CashMovement, CashMovementType, Shift, ShiftStatus};
use crate::validation::validate_receipt_amount;

// =============================================================================
// Shift Totals
// =============================================================================

/// The recomputable part of a shift.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct ShiftTotals {
    pub total_cash_sales: i64,
    pub total_card_sales: i64,
    pub total_bank_transfer_sales: i64,
    pub total_crypto_sales: i64,
    pub total_other_sales: i64,
    pub total_cash_refunds: i64,
    pub total_refunds: i64,
    pub total_paid_in: i64,
    pub total_paid_out: i64,
    pub total_payment_changes_affecting_cash: i64,
}

/// How one receipt was booked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiptEffect {
    pub method: PaymentMethod,
    pub refunded: bool,
    pub amount: Money,
    /// Signed cash moved by an approved cash↔non-cash correction.
    pub cash_correction: Money,
}

impl ShiftTotals {
    /// Totals contributed by a single receipt.
    pub fn from_receipt(receipt: &Receipt) -> CoreResult<(Self, ReceiptEffect)> {
        let mut totals = ShiftTotals::default();
        let effect = totals.apply_receipt(receipt)?;
        Ok((totals, effect))
    }

    /// Totals contributed by a single cash movement.
    pub fn from_cash_movement(movement: &CashMovement) -> CoreResult<Self> {
        let mut totals = ShiftTotals::default();
        totals.apply_cash_movement(movement)?;
        Ok(totals)
    }

    /// Books one receipt.
    ///
    /// - refunded: the refunded amount goes to `total_refunds` (and
    ///   `total_cash_refunds` when the effective method is cash); no sales
    ///   total moves
    /// - otherwise: the receipt total goes to exactly one per-method sales
    ///   total, chosen by the effective payment method
    ///
    /// Negative amounts and sums past the i64 range are rejected before any
    /// total changes.
    pub fn apply_receipt(&mut self, receipt: &Receipt) -> CoreResult<ReceiptEffect> {
        validate_receipt_amount("total", receipt.total)?;
        if receipt.is_refunded {
            validate_receipt_amount("refundAmount", receipt.refund_amount)?;
        }

        let method = receipt.effective_payment_method();
        let mut next = *self;

        if receipt.is_refunded {
            let amount = receipt.refunded_amount();
            accumulate("totalRefunds", &mut next.total_refunds, amount)?;
            if method.is_cash() {
                accumulate("totalCashRefunds", &mut next.total_cash_refunds, amount)?;
            }
            *self = next;
            return Ok(ReceiptEffect {
                method,
                refunded: true,
                amount,
                cash_correction: Money::zero(),
            });
        }

        let amount = receipt.total();
        let (field, bucket) = next.sales_bucket(method);
        accumulate(field, bucket, amount)?;

        let mut cash_correction = Money::zero();
        if receipt.latest_approved_correction().is_some() {
            let original = receipt.original_payment_method();
            if original.is_cash() && !method.is_cash() {
                cash_correction = -amount;
            } else if !original.is_cash() && method.is_cash() {
                cash_correction = amount;
            }
        }
        accumulate(
            "totalPaymentChangesAffectingCash",
            &mut next.total_payment_changes_affecting_cash,
            cash_correction,
        )?;

        *self = next;
        Ok(ReceiptEffect {
            method,
            refunded: false,
            amount,
            cash_correction,
        })
    }

    /// Books one pay-in or pay-out.
    pub fn apply_cash_movement(&mut self, movement: &CashMovement) -> CoreResult<()> {
        validate_receipt_amount("amount", movement.amount)?;
        let amount = Money::from_cents(movement.amount);
        match movement.movement_type {
            CashMovementType::Payin => accumulate("totalPaidIn", &mut self.total_paid_in, amount),
            CashMovementType::Payout => {
                accumulate("totalPaidOut", &mut self.total_paid_out, amount)
            }
        }
    }

    /// Field-wise sum, as when a delta is applied to stored totals.
    pub fn checked_add(&self, delta: &ShiftTotals) -> CoreResult<ShiftTotals> {
        let mut sum = *self;
        let pairs = [
            ("totalCashSales", &mut sum.total_cash_sales, delta.total_cash_sales),
            ("totalCardSales", &mut sum.total_card_sales, delta.total_card_sales),
            (
                "totalBankTransferSales",
                &mut sum.total_bank_transfer_sales,
                delta.total_bank_transfer_sales,
            ),
            ("totalCryptoSales", &mut sum.total_crypto_sales, delta.total_crypto_sales),
            ("totalOtherSales", &mut sum.total_other_sales, delta.total_other_sales),
            ("totalCashRefunds", &mut sum.total_cash_refunds, delta.total_cash_refunds),
            ("totalRefunds", &mut sum.total_refunds, delta.total_refunds),
            ("totalPaidIn", &mut sum.total_paid_in, delta.total_paid_in),
            ("totalPaidOut", &mut sum.total_paid_out, delta.total_paid_out),
            (
                "totalPaymentChangesAffectingCash",
                &mut sum.total_payment_changes_affecting_cash,
                delta.total_payment_changes_affecting_cash,
            ),
        ];
        for (field, total, amount) in pairs {
            accumulate(field, total, Money::from_cents(amount))?;
        }
        Ok(sum)
    }

    fn sales_bucket(&mut self, method: PaymentMethod) -> (&'static str, &mut i64) {
        match method {
            PaymentMethod::Cash => ("totalCashSales", &mut self.total_cash_sales),
            PaymentMethod::Card => ("totalCardSales", &mut self.total_card_sales),
            PaymentMethod::BankTransfer => {
                ("totalBankTransferSales", &mut self.total_bank_transfer_sales)
            }
            PaymentMethod::Crypto => ("totalCryptoSales", &mut self.total_crypto_sales),
            PaymentMethod::Other => ("totalOtherSales", &mut self.total_other_sales),
        }
    }

    /// Net effect on the drawer, excluding the starting float.
    pub fn cash_effect(&self) -> CoreResult<Money> {
        let money = Money::from_cents;
        money(self.total_cash_sales)
            .checked_sub(money(self.total_cash_refunds))
            .and_then(|m| m.checked_add(money(self.total_paid_in)))
            .and_then(|m| m.checked_sub(money(self.total_paid_out)))
            .ok_or_else(|| overflow("expectedCash"))
    }

    /// Expected drawer contents for a given starting float.
    pub fn expected_cash(&self, starting_cash: i64) -> CoreResult<Money> {
        Money::from_cents(starting_cash)
            .checked_add(self.cash_effect()?)
            .ok_or_else(|| overflow("expectedCash"))
    }
}

/// Adds `amount` to one running total, refusing to wrap.
fn accumulate(field: &str, total: &mut i64, amount: Money) -> CoreResult<()> {
    let sum = Money::from_cents(*total)
        .checked_add(amount)
        .ok_or_else(|| overflow(field))?;
    *total = sum.cents();
    Ok(())
}

fn overflow(field: &str) -> CoreError {
    ValidationError::Overflow {
        field: field.to_string(),
    }
    .into()
}

// =============================================================================
// Shift Behaviour
// =============================================================================

impl Shift {
    /// A freshly opened shift: no sales, `expected_cash == starting_cash`.
    pub fn open(
        id: impl Into<String>,
        user_id: impl Into<String>,
        user_name: impl Into<String>,
        starting_cash: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Shift {
            id: id.into(),
            user_id: user_id.into(),
            user_name: user_name.into(),
            start_time: now,
            end_time: None,
            status: ShiftStatus::Active,
            starting_cash,
            expected_cash: starting_cash,
            actual_cash: None,
            variance: None,
            total_cash_sales: 0,
            total_card_sales: 0,
            total_bank_transfer_sales: 0,
            total_crypto_sales: 0,
            total_other_sales: 0,
            total_cash_refunds: 0,
            total_refunds: 0,
            total_paid_in: 0,
            total_paid_out: 0,
            total_payment_changes_affecting_cash: 0,
            cash_movements: Vec::new(),
            transactions: Vec::new(),
            notes: None,
            close_type: None,
            close_reason: None,
            last_reconciled_at: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Fails with `InvalidShiftStatus` unless the shift is active.
    pub fn ensure_active(&self, operation: &str) -> CoreResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(CoreError::invalid_shift_status(
                &self.id,
                self.status,
                operation,
            ))
        }
    }

    /// Snapshot of the recomputable totals.
    pub fn totals(&self) -> ShiftTotals {
        ShiftTotals {
            total_cash_sales: self.total_cash_sales,
            total_card_sales: self.total_card_sales,
            total_bank_transfer_sales: self.total_bank_transfer_sales,
            total_crypto_sales: self.total_crypto_sales,
            total_other_sales: self.total_other_sales,
            total_cash_refunds: self.total_cash_refunds,
            total_refunds: self.total_refunds,
            total_paid_in: self.total_paid_in,
            total_paid_out: self.total_paid_out,
            total_payment_changes_affecting_cash: self.total_payment_changes_affecting_cash,
        }
    }

    /// Overwrites every totals field and re-derives `expected_cash`.
    /// Identity, status and the transaction list are untouched.
    pub fn set_totals(&mut self, totals: &ShiftTotals) -> CoreResult<()> {
        let expected_cash = totals.expected_cash(self.starting_cash)?;
        self.total_cash_sales = totals.total_cash_sales;
        self.total_card_sales = totals.total_card_sales;
        self.total_bank_transfer_sales = totals.total_bank_transfer_sales;
        self.total_crypto_sales = totals.total_crypto_sales;
        self.total_other_sales = totals.total_other_sales;
        self.total_cash_refunds = totals.total_cash_refunds;
        self.total_refunds = totals.total_refunds;
        self.total_paid_in = totals.total_paid_in;
        self.total_paid_out = totals.total_paid_out;
        self.total_payment_changes_affecting_cash = totals.total_payment_changes_affecting_cash;
        self.expected_cash = expected_cash.cents();
        Ok(())
    }
}

/// `actual - expected`; negative means the drawer is short.
pub fn variance(actual_cash: i64, expected_cash: i64) -> CoreResult<i64> {
    Money::from_cents(actual_cash)
        .checked_sub(Money::from_cents(expected_cash))
        .map(|m| m.cents())
        .ok_or_else(|| overflow("variance"))
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payment::{CorrectionStatus, PaymentCorrection, ReceiptPayment};

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

    fn payout(amount: i64) -> CashMovement {
        CashMovement {
            movement_type: CashMovementType::Payout,
            amount,
            reason: "Supplier".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_open_shift_expects_starting_cash() {
        let shift = Shift::open("s1", "u1", "Ana", 100_000, Utc::now());
        assert_eq!(shift.expected_cash, 100_000);
        assert!(shift.is_active());
        assert!(shift.ensure_active("record a sale").is_ok());
    }

    #[test]
    fn test_drawer_scenario() {
        let mut totals = ShiftTotals::default();
        totals.apply_receipt(&receipt("r1", "cash", 15_000)).unwrap();
        totals.apply_receipt(&receipt("r2", "Cash", 20_000)).unwrap();
        assert_eq!(totals.expected_cash(100_000).unwrap().cents(), 135_000);

        totals.apply_cash_movement(&payout(5_000)).unwrap();
        assert_eq!(totals.expected_cash(100_000).unwrap().cents(), 130_000);
        assert_eq!(variance(129_000, 130_000).unwrap(), -1_000);
    }

    #[test]
    fn test_each_method_lands_in_one_bucket() {
        let mut totals = ShiftTotals::default();
        totals.apply_receipt(&receipt("r1", "credit card", 100)).unwrap();
        totals.apply_receipt(&receipt("r2", "bank transfer", 200)).unwrap();
        totals.apply_receipt(&receipt("r3", "crypto", 300)).unwrap();
        totals.apply_receipt(&receipt("r4", "voucher", 400)).unwrap();

        assert_eq!(totals.total_card_sales, 100);
        assert_eq!(totals.total_bank_transfer_sales, 200);
        assert_eq!(totals.total_crypto_sales, 300);
        assert_eq!(totals.total_other_sales, 400);
        assert_eq!(totals.total_cash_sales, 0);
        assert_eq!(totals.cash_effect().unwrap().cents(), 0);
    }

    #[test]
    fn test_refund_excluded_from_sales() {
        let mut r = receipt("r1", "cash", 1_000);
        r.is_refunded = true;
        r.refund_amount = 600;

        let (totals, effect) = ShiftTotals::from_receipt(&r).unwrap();
        assert!(effect.refunded);
        assert_eq!(totals.total_cash_sales, 0);
        assert_eq!(totals.total_refunds, 600);
        assert_eq!(totals.total_cash_refunds, 600);
        assert_eq!(totals.cash_effect().unwrap().cents(), -600);
    }

    #[test]
    fn test_card_refund_does_not_touch_drawer() {
        let mut r = receipt("r1", "card", 1_000);
        r.is_refunded = true;

        let (totals, _) = ShiftTotals::from_receipt(&r).unwrap();
        assert_eq!(totals.total_refunds, 1_000);
        assert_eq!(totals.total_cash_refunds, 0);
    }

    #[test]
    fn test_cash_to_card_correction_tracked() {
        let mut r = receipt("r1", "cash", 2_500);
        r.payment_history.push(PaymentCorrection {
            old_method: "cash".to_string(),
            new_method: "card".to_string(),
            status: CorrectionStatus::Approved,
        });

        let (totals, effect) = ShiftTotals::from_receipt(&r).unwrap();
        assert_eq!(effect.method, PaymentMethod::Card);
        assert_eq!(totals.total_card_sales, 2_500);
        assert_eq!(totals.total_cash_sales, 0);
        assert_eq!(totals.total_payment_changes_affecting_cash, -2_500);
    }

    #[test]
    fn test_set_totals_rederives_expected_cash() {
        let mut shift = Shift::open("s1", "u1", "Ana", 10_000, Utc::now());
        let mut totals = ShiftTotals::default();
        totals.apply_receipt(&receipt("r1", "cash", 500)).unwrap();
        totals.apply_cash_movement(&payout(200)).unwrap();

        shift.set_totals(&totals).unwrap();
        assert_eq!(shift.expected_cash, 10_300);
        assert_eq!(shift.totals(), totals);
    }

    #[test]
    fn test_negative_receipt_amounts_rejected() {
        let negative = receipt("r1", "cash", -500);
        assert!(matches!(
            ShiftTotals::from_receipt(&negative),
            Err(CoreError::Validation(ValidationError::Negative { .. }))
        ));

        let mut refund = receipt("r2", "cash", 500);
        refund.is_refunded = true;
        refund.refund_amount = -1;
        assert!(matches!(
            ShiftTotals::from_receipt(&refund),
            Err(CoreError::Validation(ValidationError::Negative { .. }))
        ));
    }

    #[test]
    fn test_overflowing_sales_rejected_without_partial_update() {
        let mut totals = ShiftTotals::default();
        totals.apply_receipt(&receipt("r1", "cash", 1)).unwrap();

        let result = totals.apply_receipt(&receipt("r2", "cash", i64::MAX));
        assert!(matches!(
            result,
            Err(CoreError::Validation(ValidationError::Overflow { .. }))
        ));
        assert_eq!(totals.total_cash_sales, 1);

        let half = receipt("r3", "card", i64::MAX / 2 + 1);
        let mut card = ShiftTotals::default();
        card.apply_receipt(&half).unwrap();
        assert!(card.apply_receipt(&half).is_err());
        assert_eq!(card.total_card_sales, i64::MAX / 2 + 1);
    }

    #[test]
    fn test_expected_cash_overflow_is_an_error() {
        let mut totals = ShiftTotals::default();
        totals.apply_receipt(&receipt("r1", "cash", i64::MAX)).unwrap();
        assert!(totals.cash_effect().is_ok());
        assert!(totals.expected_cash(1).is_err());

        let (delta, _) = ShiftTotals::from_receipt(&receipt("r2", "cash", 1)).unwrap();
        assert!(totals.checked_add(&delta).is_err());
        assert_eq!(ShiftTotals::default().checked_add(&delta).unwrap(), delta);
    }

    #[test]
    fn test_ensure_active_rejects_completed() {
        let mut shift = Shift::open("s1", "u1", "Ana", 0, Utc::now());
        shift.status = ShiftStatus::Completed;
        assert!(matches!(
            shift.ensure_active("record a sale"),
            Err(CoreError::InvalidShiftStatus { .. })
        ));
    }
}
