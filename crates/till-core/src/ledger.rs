//! # Stock Ledger Rules
//!
//! Pure invariants and replay helpers for the append-only stock ledger.
//!
//! ## Ledger Model
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  product "COLA-330"                                                     │
//! │                                                                         │
//! │  t0  initial          +10   0  → 10                                     │
//! │  t1  sale              -3  10  →  7                                     │
//! │  t2  purchase_order   +20   7  → 27                                     │
//! │  t3  adjustment        -5  27  → 22   ◄── current stock = 22            │
//! │                                                                         │
//! │  every row:   new = previous + quantity                                 │
//! │  chained:     row[n].previous == row[n-1].new                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use ts_rs::TS;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::types::{MovementType, NewStockMovement, StockMovementEntry};
use crate::validation::{validate_product_id, validate_reason, validate_sku, validate_user_id};

// =============================================================================
// Entry Invariants
// =============================================================================

impl StockMovementEntry {
    /// Checks `new_stock == previous_stock + quantity`.
    pub fn check_delta(&self) -> CoreResult<()> {
        let expected = self.previous_stock.checked_add(self.quantity);
        if expected != Some(self.new_stock) {
            return Err(CoreError::StockDeltaMismatch {
                product_id: self.product_id.clone(),
                previous_stock: self.previous_stock,
                quantity: self.quantity,
                new_stock: self.new_stock,
            });
        }
        Ok(())
    }

    /// Full pre-append validation: identifiers, sign rules, delta.
    pub fn validate(&self) -> CoreResult<()> {
        validate_product_id(&self.product_id)?;
        validate_sku(&self.sku)?;
        validate_user_id(&self.user_id)?;
        if let Some(reason) = &self.reason {
            validate_reason(reason)?;
        }
        check_quantity_sign(&self.product_id, self.movement_type, self.quantity)?;
        self.check_delta()
    }
}

/// Sign rules per movement type.
///
/// - `sale`: strictly negative
/// - `purchase_order`: strictly positive
/// - `adjustment`: non-zero
/// - `initial`: anything (opening balance may be zero)
pub fn check_quantity_sign(
    product_id: &str,
    movement_type: MovementType,
    quantity: i64,
) -> CoreResult<()> {
    let ok = match movement_type {
        MovementType::Initial => true,
        MovementType::Sale => quantity < 0,
        MovementType::PurchaseOrder => quantity > 0,
        MovementType::Adjustment => quantity != 0,
    };

    if ok {
        Ok(())
    } else {
        Err(CoreError::InvalidMovementQuantity {
            product_id: product_id.to_string(),
            movement_type: movement_type.to_string(),
            quantity,
        })
    }
}

/// Rejects an entry timestamped before the product's latest entry.
/// Equal timestamps are allowed; insertion order breaks the tie.
pub fn check_ordering(
    product_id: &str,
    timestamp: DateTime<Utc>,
    latest: Option<DateTime<Utc>>,
) -> CoreResult<()> {
    match latest {
        Some(latest) if timestamp < latest => Err(CoreError::OutOfOrderMovement {
            product_id: product_id.to_string(),
            timestamp,
            latest,
        }),
        _ => Ok(()),
    }
}

impl NewStockMovement {
    /// Builds the entry that applies this movement on top of `previous_stock`.
    pub fn into_entry(
        self,
        previous_stock: i64,
        timestamp: DateTime<Utc>,
    ) -> CoreResult<StockMovementEntry> {
        let new_stock = previous_stock.checked_add(self.quantity).ok_or_else(|| {
            CoreError::StockDeltaMismatch {
                product_id: self.product_id.clone(),
                previous_stock,
                quantity: self.quantity,
                new_stock: i64::MAX,
            }
        })?;

        let entry = StockMovementEntry {
            id: Uuid::new_v4().to_string(),
            product_id: self.product_id,
            product_name: self.product_name,
            sku: self.sku,
            movement_type: self.movement_type,
            quantity: self.quantity,
            previous_stock,
            new_stock,
            reason: self.reason,
            reference_id: self.reference_id,
            user_id: self.user_id,
            user_name: self.user_name,
            timestamp,
        };
        entry.validate()?;
        Ok(entry)
    }
}

// =============================================================================
// Replay
// =============================================================================

/// Current stock per product from entries ordered newest first.
///
/// Single pass: the first entry seen for a product is its most recent one,
/// later entries for that product are skipped.
pub fn latest_stock_by_product<'a, I>(entries_newest_first: I) -> HashMap<String, i64>
where
    I: IntoIterator<Item = &'a StockMovementEntry>,
{
    latest_entry_by_product(entries_newest_first)
        .into_iter()
        .map(|(product_id, entry)| (product_id, entry.new_stock))
        .collect()
}

/// Most recent entry per product, from entries ordered newest first.
pub fn latest_entry_by_product<'a, I>(
    entries_newest_first: I,
) -> HashMap<String, &'a StockMovementEntry>
where
    I: IntoIterator<Item = &'a StockMovementEntry>,
{
    let mut latest = HashMap::new();
    for entry in entries_newest_first {
        latest.entry(entry.product_id.clone()).or_insert(entry);
    }
    latest
}

/// A place where one product's ledger does not explain itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct ChainBreak {
    pub entry_id: String,
    pub kind: ChainBreakKind,
    /// What the entry should have started from (prior entry's new stock).
    pub expected_previous_stock: Option<i64>,
    pub actual_previous_stock: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ChainBreakKind {
    /// `new_stock != previous_stock + quantity` on the entry itself.
    DeltaMismatch,
    /// `previous_stock` differs from the prior entry's `new_stock`.
    Gap,
}

/// Audits one product's entries, ordered oldest first.
pub fn verify_chain(entries_oldest_first: &[StockMovementEntry]) -> Vec<ChainBreak> {
    let mut breaks = Vec::new();
    let mut prior_new: Option<i64> = None;

    for entry in entries_oldest_first {
        if entry.check_delta().is_err() {
            breaks.push(ChainBreak {
                entry_id: entry.id.clone(),
                kind: ChainBreakKind::DeltaMismatch,
                expected_previous_stock: prior_new,
                actual_previous_stock: entry.previous_stock,
            });
        }

        if let Some(expected) = prior_new {
            if entry.previous_stock != expected {
                breaks.push(ChainBreak {
                    entry_id: entry.id.clone(),
                    kind: ChainBreakKind::Gap,
                    expected_previous_stock: Some(expected),
                    actual_previous_stock: entry.previous_stock,
                });
            }
        }

        prior_new = Some(entry.new_stock);
    }

    breaks
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;
    use chrono::Duration;

    fn movement(product_id: &str, kind: MovementType, quantity: i64) -> NewStockMovement {
        NewStockMovement {
            product_id: product_id.to_string(),
            product_name: "Cola 330ml".to_string(),
            sku: "COLA-330".to_string(),
            movement_type: kind,
            quantity,
            reason: None,
            reference_id: None,
            user_id: "user-1".to_string(),
            user_name: "Ana".to_string(),
            fallback_stock: None,
        }
    }

    /// initial 10, sale -3, purchase +20, adjustment -5.
    fn scenario() -> Vec<StockMovementEntry> {
        let t0 = Utc::now();
        let steps = [
            (MovementType::Initial, 10),
            (MovementType::Sale, -3),
            (MovementType::PurchaseOrder, 20),
            (MovementType::Adjustment, -5),
        ];

        let mut stock = 0;
        let mut entries = Vec::new();
        for (i, (kind, qty)) in steps.into_iter().enumerate() {
            let entry = movement("p1", kind, qty)
                .into_entry(stock, t0 + Duration::seconds(i as i64))
                .unwrap();
            stock = entry.new_stock;
            entries.push(entry);
        }
        entries
    }

    #[test]
    fn test_scenario_ends_at_22() {
        let entries = scenario();
        let stocks: Vec<i64> = entries.iter().map(|e| e.new_stock).collect();
        assert_eq!(stocks, vec![10, 7, 27, 22]);
        assert!(entries.iter().all(|e| e.new_stock - e.previous_stock == e.quantity));
    }

    #[test]
    fn test_check_delta_rejects_inconsistent_entry() {
        let mut entry = scenario().remove(1);
        entry.new_stock = 8;
        assert!(matches!(
            entry.check_delta(),
            Err(CoreError::StockDeltaMismatch { new_stock: 8, .. })
        ));
    }

    #[test]
    fn test_sign_rules() {
        assert!(check_quantity_sign("p", MovementType::Sale, -1).is_ok());
        assert!(check_quantity_sign("p", MovementType::Sale, 2).is_err());
        assert!(check_quantity_sign("p", MovementType::PurchaseOrder, 0).is_err());
        assert!(check_quantity_sign("p", MovementType::Adjustment, 0).is_err());
        assert!(check_quantity_sign("p", MovementType::Adjustment, -4).is_ok());
        assert!(check_quantity_sign("p", MovementType::Initial, 0).is_ok());
    }

    #[test]
    fn test_check_ordering() {
        let now = Utc::now();
        assert!(check_ordering("p1", now, None).is_ok());
        assert!(check_ordering("p1", now, Some(now)).is_ok());
        assert!(matches!(
            check_ordering("p1", now - Duration::seconds(1), Some(now)),
            Err(CoreError::OutOfOrderMovement { .. })
        ));
    }

    #[test]
    fn test_into_entry_rejects_positive_sale() {
        let result = movement("p1", MovementType::Sale, 3).into_entry(10, Utc::now());
        assert!(matches!(result, Err(CoreError::InvalidMovementQuantity { .. })));
    }

    #[test]
    fn test_into_entry_rejects_malformed_sku() {
        let mut bad = movement("p1", MovementType::Initial, 5);
        bad.sku = "COLA 330".to_string();
        assert!(matches!(
            bad.into_entry(0, Utc::now()),
            Err(CoreError::Validation(ValidationError::InvalidFormat { .. }))
        ));

        let mut blank = movement("p1", MovementType::Initial, 5);
        blank.sku = String::new();
        assert!(matches!(
            blank.into_entry(0, Utc::now()),
            Err(CoreError::Validation(ValidationError::Required { .. }))
        ));
    }

    #[test]
    fn test_latest_stock_by_product_keeps_first_seen() {
        let mut entries = scenario();
        let other = movement("p2", MovementType::Initial, 4)
            .into_entry(0, Utc::now())
            .unwrap();
        entries.push(other);
        entries.reverse();

        let latest = latest_stock_by_product(&entries);
        assert_eq!(latest.get("p1"), Some(&22));
        assert_eq!(latest.get("p2"), Some(&4));
    }

    #[test]
    fn test_verify_chain_clean() {
        assert!(verify_chain(&scenario()).is_empty());
    }

    #[test]
    fn test_verify_chain_reports_gap_and_mismatch() {
        let mut entries = scenario();
        entries[2].previous_stock = 9; // gap after the sale, and 9 + 20 != 27
        let breaks = verify_chain(&entries);

        assert_eq!(breaks.len(), 2);
        assert_eq!(breaks[0].kind, ChainBreakKind::DeltaMismatch);
        assert_eq!(breaks[1].kind, ChainBreakKind::Gap);
        assert_eq!(breaks[1].expected_previous_stock, Some(7));
    }
}
