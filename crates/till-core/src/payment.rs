//! # Payment Methods & Receipts
//!
//! The receipt is an external, read-only collaborator. This module defines the
//! subset of its shape the reconciliation engine reads, and the closed
//! [`PaymentMethod`] enum that raw method strings normalize into.
//!
//! ## Effective Payment Method
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  receipt.paymentHistory                                                 │
//! │    [ {cash → card, pending},                                            │
//! │      {cash → card, approved},     ◄── latest approved wins              │
//! │      {card → crypto, rejected} ]                                        │
//! │                                                                         │
//! │  no approved entry?  → payments[0].type                                 │
//! │  no payments?        → receipt.paymentMethod                            │
//! │  nothing at all?     → Other                                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::money::Money;

// =============================================================================
// Payment Method
// =============================================================================

/// Payment method categories a shift keeps separate totals for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    BankTransfer,
    Crypto,
    Other,
}

impl PaymentMethod {
    /// Maps a free-form method name onto a category.
    ///
    /// Matching is case-insensitive and checked in this order. `cash` must be
    /// a whole word (so "cashless card" is a card); the other names are
    /// substring tests.
    ///
    /// | contains                         | category       |
    /// |----------------------------------|----------------|
    /// | the word `cash`                  | `Cash`         |
    /// | `card`, `credit`, `debit`        | `Card`         |
    /// | `bank`, `transfer`, `wire`       | `BankTransfer` |
    /// | `crypto`, `bitcoin`, `btc`, `usdt` | `Crypto`     |
    /// | anything else (including empty)  | `Other`        |
    ///
    /// ```rust
    /// use till_core::payment::PaymentMethod;
    ///
    /// assert_eq!(PaymentMethod::normalize("credit card"), PaymentMethod::Card);
    /// assert_eq!(PaymentMethod::normalize("cashless card"), PaymentMethod::Card);
    /// assert_eq!(PaymentMethod::normalize("Bank Transfer"), PaymentMethod::BankTransfer);
    /// assert_eq!(PaymentMethod::normalize("voucher"), PaymentMethod::Other);
    /// ```
    pub fn normalize(raw: &str) -> Self {
        let name = raw.trim().to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| name.contains(n));
        let has_word = |word: &str| name.split(|c: char| !c.is_alphanumeric()).any(|w| w == word);

        if name.is_empty() {
            PaymentMethod::Other
        } else if has_word("cash") {
            PaymentMethod::Cash
        } else if has(&["card", "credit", "debit"]) {
            PaymentMethod::Card
        } else if has(&["bank", "transfer", "wire"]) {
            PaymentMethod::BankTransfer
        } else if has(&["crypto", "bitcoin", "btc", "usdt"]) {
            PaymentMethod::Crypto
        } else {
            PaymentMethod::Other
        }
    }

    /// Returns true if money taken with this method lands in the drawer.
    #[inline]
    pub fn is_cash(&self) -> bool {
        matches!(self, PaymentMethod::Cash)
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Card => "card",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::Crypto => "crypto",
            PaymentMethod::Other => "other",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Receipt Collaborator
// =============================================================================

/// One tender line on a receipt, as the receipts subsystem stores it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptPayment {
    /// Raw method name ("Cash", "credit card", ...).
    #[serde(rename = "type")]
    pub method: String,
    pub amount: i64,
}

/// Review state of a retroactive payment-method correction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum CorrectionStatus {
    Pending,
    Approved,
    Rejected,
    /// Any status this engine does not know about. Never applied.
    #[serde(other)]
    Unknown,
}

/// A request to change a receipt's payment method after the fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct PaymentCorrection {
    pub old_method: String,
    pub new_method: String,
    pub status: CorrectionStatus,
}

/// The fields of a receipt this core reads. Never written here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub id: String,
    /// Human-facing business identifier; legacy shift references used it.
    pub receipt_number: Option<String>,
    pub total: i64,
    #[serde(default)]
    pub payments: Vec<ReceiptPayment>,
    #[serde(default)]
    pub payment_history: Vec<PaymentCorrection>,
    /// Legacy single-method field, consulted when `payments` is empty.
    pub payment_method: Option<String>,
    #[serde(default)]
    pub is_refunded: bool,
    #[serde(default)]
    pub refund_amount: i64,
}

impl Receipt {
    /// The latest approved correction, if any.
    pub fn latest_approved_correction(&self) -> Option<&PaymentCorrection> {
        self.payment_history
            .iter()
            .rev()
            .find(|c| c.status == CorrectionStatus::Approved)
    }

    /// Payment method as originally tendered, ignoring corrections.
    pub fn original_payment_method(&self) -> PaymentMethod {
        self.payments
            .first()
            .map(|p| p.method.as_str())
            .or(self.payment_method.as_deref())
            .map(PaymentMethod::normalize)
            .unwrap_or(PaymentMethod::Other)
    }

    /// Payment method after applying the latest approved correction.
    pub fn effective_payment_method(&self) -> PaymentMethod {
        match self.latest_approved_correction() {
            Some(correction) => PaymentMethod::normalize(&correction.new_method),
            None => self.original_payment_method(),
        }
    }

    /// Amount returned to the customer. Falls back to the full total when
    /// the refund amount was not recorded.
    pub fn refunded_amount(&self) -> Money {
        if self.refund_amount > 0 {
            Money::from_cents(self.refund_amount)
        } else {
            Money::from_cents(self.total)
        }
    }

    #[inline]
    pub fn total(&self) -> Money {
        Money::from_cents(self.total)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
