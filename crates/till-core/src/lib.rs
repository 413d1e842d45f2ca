//! # till-core: Pure Domain Logic for Till
//!
//! The two subsystems of the point-of-sale platform where correctness depends
//! on deriving current state from append-only history:
//!
//! - the **stock movement ledger** (inventory deltas per product), and
//! - the **shift cash-reconciliation engine** (cash drawer accounting per
//!   cashier session, rebuilt from receipts on demand).
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           Till Architecture                             │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │          Order entry / receipts / reporting (external)          │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ till-core (THIS CRATE) ★                        │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │  ledger   │  │   shift   │  │ reconcile │  │  payment  │  │   │
//! │  │   │ invariant │  │  totals   │  │  replay   │  │  method   │  │   │
//! │  │   │  chain    │  │  close    │  │  policy   │  │  receipt  │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    till-db (Database Layer)                     │   │
//! │  │         SQLite ledger, shift store, receipt lookups             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Persisted record shapes (ledger entries, shifts, cash movements)
//! - [`payment`] - Payment method normalization and the receipt collaborator
//! - [`ledger`] - Stock ledger invariants and replay helpers
//! - [`shift`] - Shift totals arithmetic and close rules
//! - [`reconcile`] - Full recomputation of a shift from its receipts
//! - [`money`] - Money type with integer arithmetic (no floating point!)
//! - [`error`] - Domain error types
//! - [`validation`] - Input validation
//!
//! ## Example Usage
//!
//! ```rust
//! use till_core::payment::PaymentMethod;
//!
//! assert_eq!(PaymentMethod::normalize("Credit Card"), PaymentMethod::Card);
//! assert_eq!(PaymentMethod::normalize("CASH"), PaymentMethod::Cash);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod ledger;
pub mod money;
pub mod payment;
pub mod reconcile;
pub mod shift;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use payment::{CorrectionStatus, PaymentCorrection, PaymentMethod, Receipt, ReceiptPayment};
pub use reconcile::{
    CashCountPolicy, PartialReconciliationWarning, ReceiptResolution, Reconciliation,
    UnresolvedReceipt,
};
pub use shift::ShiftTotals;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum length of free-text reasons on ledger entries and cash movements.
pub const MAX_REASON_LENGTH: usize = 500;

/// Upper bound for a single cash movement or starting float, in cents.
///
/// Catches fat-finger entries (typing 100000 instead of 1000.00).
pub const MAX_CASH_AMOUNT_CENTS: i64 = 100_000_000;
