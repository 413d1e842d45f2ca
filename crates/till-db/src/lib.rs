//! # till-db: Database Layer for Till
//!
//! SQLite storage for the stock movement ledger and the shift store, plus
//! the reconciliation service that replays receipts into shift totals.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           Till Data Flow                                │
//! │                                                                         │
//! │  Order entry (sale) / till-audit                                       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     till-db (THIS CRATE)                        │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │               │    │  (embedded)  │  │   │
//! │  │   │               │    │ StockLedger   │    │ 001 ledger   │  │   │
//! │  │   │ SqlitePool    │◄───│ Shift         │    │ 002 shifts   │  │   │
//! │  │   │ RetryPolicy   │    │ Receipt       │    │ 003 receipts │  │   │
//! │  │   └───────────────┘    └───────┬───────┘    └──────────────┘  │   │
//! │  │                                │                                │   │
//! │  │                        ┌───────▼───────┐                        │   │
//! │  │                        │  Reconciler   │ ◄── till_core::reconcile│   │
//! │  │                        └───────────────┘                        │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database (WAL)                       │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Stock ledger, shift and receipt repositories
//! - [`reconciliation`] - Shift recalculation against stored receipts
//! - [`retry`] - Backoff for transient store failures
//! - [`config`] - TOML + environment configuration
//!
//! ## Usage
//!
//! ```rust,ignore
//! use till_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("path/to/till.db")).await?;
//!
//! // A sale: one ledger entry per product, one reference on the shift
//! db.stock_ledger().record(movement).await?;
//! db.shifts().add_transaction(&shift.id, &receipt).await?;
//!
//! // Audit
//! let outcome = db.reconciler(CashCountPolicy::default()).recalculate(&shift.id).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;
pub mod migrations;
pub mod pool;
pub mod reconciliation;
pub mod repository;
pub mod retry;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::TillConfig;
pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};
pub use reconciliation::{ReconciliationReport, Reconciler};
pub use retry::{with_retry, RetryPolicy};

// Repository re-exports for convenience
pub use repository::receipt::ReceiptRepository;
pub use repository::shift::ShiftRepository;
pub use repository::stock::{ProjectionRebuild, StockLedgerRepository};
