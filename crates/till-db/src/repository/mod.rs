//! # Repository Module
//!
//! Database repository implementations for Till.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Pattern                                   │
//! │                                                                         │
//! │  Order entry / audit tooling                                           │
//! │       │                                                                 │
//! │       │  db.stock_ledger().record(movement)                            │
//! │       │  db.shifts().add_transaction(shift_id, &receipt)               │
//! │       ▼                                                                 │
//! │  StockLedgerRepository      ShiftRepository       ReceiptRepository    │
//! │  ├── append / record        ├── start / end       ├── get_by_id        │
//! │  ├── current_stock          ├── add_transaction   ├── get_by_number    │
//! │  ├── history*               ├── add_cash_movement └── resolve          │
//! │  └── rebuild_projection     └── get_statistics                         │
//! │       │                                                                 │
//! │       │  SQL (runtime-checked, FromRow rows)                            │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! │                                                                         │
//! │  Rules (ledger invariants, totals math) live in till-core; the        │
//! │  repositories only decide what is read and written atomically.        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`StockLedgerRepository`] - Append-only stock movements and projection
//! - [`ShiftRepository`] - Shift lifecycle and drawer totals
//! - [`ReceiptRepository`] - Receipt lookups for reconciliation

pub mod receipt;
pub mod shift;
pub mod stock;

pub use receipt::ReceiptRepository;
pub use shift::{ShiftRepository, DUPLICATE_SHIFT_REASON};
pub use stock::{ProjectionDrift, ProjectionRebuild, StockLedgerRepository};
