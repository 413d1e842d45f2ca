//! # Shift Reconciliation
//!
//! Rebuilds a shift's totals from its receipts and saves them, without
//! clobbering sales recorded while the replay was running.
//!
//! ## Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  recalculate(shift_id)                                                  │
//! │                                                                         │
//! │  load shift (version v) ──► resolve each transaction reference          │
//! │                               │ found      → Resolved(receipt)          │
//! │                               │ missing    → Unresolved (warning)       │
//! │                               │ read error → fail this attempt          │
//! │                               ▼                                         │
//! │                    till_core::reconcile::recalculate (pure)             │
//! │                               │                                         │
//! │                               ▼                                         │
//! │            UPDATE shifts ... WHERE id = ? AND version = v               │
//! │                 │ ok                      │ stale                       │
//! │                 ▼                         ▼                             │
//! │          Reconciliation           reload and replay again               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::{DbError, DbResult};
use crate::repository::receipt::ReceiptRepository;
use crate::repository::shift::ShiftRepository;
use till_core::reconcile;
use till_core::validation::validate_date_range;
use till_core::{CashCountPolicy, ReceiptResolution, Reconciliation};

/// Replays before giving up when sales keep landing mid-reconciliation.
const MAX_RECONCILE_ATTEMPTS: u32 = 3;

/// Outcome of reconciling every shift in a window.
#[derive(Debug, Default)]
pub struct ReconciliationReport {
    pub reconciled: Vec<Reconciliation>,
    /// Shifts that could not be reconciled, with the reason.
    pub failed: Vec<(String, DbError)>,
}

impl ReconciliationReport {
    /// Total unresolved receipts across all reconciled shifts.
    pub fn warning_count(&self) -> usize {
        self.reconciled.iter().map(Reconciliation::warning_count).sum()
    }

    /// Shifts whose stored totals disagreed with the replay.
    pub fn drifted(&self) -> usize {
        self.reconciled.iter().filter(|r| r.had_drift()).count()
    }
}

/// Reconciles shifts against the receipts they reference.
#[derive(Debug, Clone)]
pub struct Reconciler {
    shifts: ShiftRepository,
    receipts: ReceiptRepository,
    policy: CashCountPolicy,
}

impl Reconciler {
    pub fn new(
        shifts: ShiftRepository,
        receipts: ReceiptRepository,
        policy: CashCountPolicy,
    ) -> Self {
        Reconciler {
            shifts,
            receipts,
            policy,
        }
    }

    pub fn policy(&self) -> CashCountPolicy {
        self.policy
    }

    /// Recomputes one shift from its receipts and persists the result.
    ///
    /// Receipts that no longer exist are skipped and reported in
    /// [`Reconciliation::warning`]; they never fail the call. Any other read
    /// failure aborts the replay, since skipping a receipt that is merely
    /// unreadable would save totals that are missing a real sale.
    ///
    /// ## Errors
    /// - `NotFound`: unknown shift
    /// - `StaleSnapshot`: the shift kept changing across every attempt
    /// - `Transient`: a receipt read kept failing after retries
    /// - `Serialization`: a stored receipt could not be decoded
    /// - `InvariantViolation(Validation)`: a receipt carries a negative or
    ///   overflowing amount
    pub async fn recalculate(&self, shift_id: &str) -> DbResult<Reconciliation> {
        let mut attempt = 0;

        loop {
            attempt += 1;

            let shift = self
                .shifts
                .get_by_id(shift_id)
                .await?
                .ok_or_else(|| DbError::not_found("Shift", shift_id))?;

            let resolutions = self.resolve_all(&shift.id, &shift.transactions).await?;
            let outcome = reconcile::recalculate(&shift, resolutions, self.policy, Utc::now())?;

            match self
                .shifts
                .apply_reconciliation(&outcome.shift, shift.version)
                .await
            {
                Ok(saved) => {
                    if let Some(warning) = &outcome.warning {
                        warn!(
                            shift_id = %shift_id,
                            unresolved = warning.unresolved.len(),
                            "Partial reconciliation"
                        );
                    }

                    info!(
                        shift_id = %shift_id,
                        receipts = outcome.receipts_processed,
                        previous_expected_cash = outcome.previous_expected_cash,
                        expected_cash = saved.expected_cash,
                        variance = ?saved.variance,
                        drift = outcome.had_drift(),
                        policy = %self.policy,
                        "Shift reconciled"
                    );

                    return Ok(Reconciliation {
                        shift: saved,
                        ..outcome
                    });
                }
                Err(e) if e.is_stale() && attempt < MAX_RECONCILE_ATTEMPTS => {
                    debug!(
                        shift_id = %shift_id,
                        attempt,
                        "Shift changed during reconciliation, replaying"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Reconciles every shift started within `[from, to]`.
    ///
    /// One shift failing does not stop the others.
    pub async fn recalculate_all(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DbResult<ReconciliationReport> {
        validate_date_range(from, to)?;

        let shifts = self.shifts.get_by_date_range(from, to).await?;
        let mut report = ReconciliationReport::default();

        for shift in shifts {
            match self.recalculate(&shift.id).await {
                Ok(outcome) => report.reconciled.push(outcome),
                Err(e) => {
                    warn!(shift_id = %shift.id, error = %e, "Shift reconciliation failed");
                    report.failed.push((shift.id, e));
                }
            }
        }

        info!(
            reconciled = report.reconciled.len(),
            failed = report.failed.len(),
            drifted = report.drifted(),
            warnings = report.warning_count(),
            "Reconciliation pass complete"
        );

        Ok(report)
    }

    async fn resolve_all(
        &self,
        shift_id: &str,
        references: &[String],
    ) -> DbResult<Vec<ReceiptResolution>> {
        let mut resolutions = Vec::with_capacity(references.len());

        for reference in references {
            let resolution = match self.receipts.resolve(reference).await {
                Ok(Some(receipt)) => ReceiptResolution::Resolved(receipt),
                Ok(None) | Err(DbError::NotFound { .. }) => {
                    warn!(
                        shift_id = %shift_id,
                        receipt = %reference,
                        "Receipt not found, skipping"
                    );
                    ReceiptResolution::unresolved(reference.as_str(), "receipt not found")
                }
                Err(e) => {
                    warn!(
                        shift_id = %shift_id,
                        receipt = %reference,
                        error = %e,
                        "Receipt could not be read"
                    );
                    return Err(e);
                }
            };
            resolutions.push(resolution);
        }

        Ok(resolutions)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use till_core::{CorrectionStatus, PaymentCorrection, Receipt, ReceiptPayment};

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

    async fn setup() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    #[tokio::test]
    async fn test_untouched_shift_reconciles_to_same_totals() {
        let db = setup().await;
        let shift = db.shifts().start_shift("user-1", "Ana", 1000).await.unwrap();

        for (id, method, total) in [("r1", "cash", 150), ("r2", "card", 80), ("r3", "cash", 200)] {
            let r = receipt(id, method, total);
            db.receipts().save(&r).await.unwrap();
            db.shifts().add_transaction(&shift.id, &r).await.unwrap();
        }
        let before = db.shifts().get_by_id(&shift.id).await.unwrap().unwrap();

        let outcome = db
            .reconciler(CashCountPolicy::default())
            .recalculate(&shift.id)
            .await
            .unwrap();

        assert!(!outcome.had_drift());
        assert_eq!(outcome.shift.totals(), before.totals());
        assert_eq!(outcome.shift.expected_cash, 1350);
        assert_eq!(outcome.receipts_processed, 3);
        assert!(outcome.warning.is_none());
        assert!(outcome.shift.last_reconciled_at.is_some());
        assert_eq!(outcome.shift.actual_cash, None);
    }

    #[tokio::test]
    async fn test_recalculate_twice_is_idempotent() {
        let db = setup().await;
        let shift = db.shifts().start_shift("user-1", "Ana", 0).await.unwrap();
        let r = receipt("r1", "cash", 500);
        db.receipts().save(&r).await.unwrap();
        db.shifts().add_transaction(&shift.id, &r).await.unwrap();

        let reconciler = db.reconciler(CashCountPolicy::default());
        let first = reconciler.recalculate(&shift.id).await.unwrap();
        let second = reconciler.recalculate(&shift.id).await.unwrap();

        assert_eq!(first.shift.totals(), second.shift.totals());
        assert_eq!(first.shift.expected_cash, second.shift.expected_cash);
        assert!(!second.had_drift());
    }

    #[tokio::test]
    async fn test_approved_correction_moves_sale_to_card() {
        let db = setup().await;
        let shift = db.shifts().start_shift("user-1", "Ana", 1000).await.unwrap();
        let mut r = receipt("r1", "cash", 400);
        db.receipts().save(&r).await.unwrap();
        db.shifts().add_transaction(&shift.id, &r).await.unwrap();

        r.payment_history.push(PaymentCorrection {
            old_method: "cash".to_string(),
            new_method: "card".to_string(),
            status: CorrectionStatus::Approved,
        });
        db.receipts().save(&r).await.unwrap();

        let outcome = db
            .reconciler(CashCountPolicy::default())
            .recalculate(&shift.id)
            .await
            .unwrap();

        assert!(outcome.had_drift());
        assert_eq!(outcome.shift.total_cash_sales, 0);
        assert_eq!(outcome.shift.total_card_sales, 400);
        assert_eq!(outcome.shift.total_payment_changes_affecting_cash, -400);
        assert_eq!(outcome.shift.expected_cash, 1000);

        let stored = db.shifts().get_by_id(&shift.id).await.unwrap().unwrap();
        assert_eq!(stored.total_card_sales, 400);
    }

    #[tokio::test]
    async fn test_missing_receipt_is_warning_not_error() {
        let db = setup().await;
        let shift = db.shifts().start_shift("user-1", "Ana", 0).await.unwrap();

        let kept = receipt("r1", "cash", 100);
        db.receipts().save(&kept).await.unwrap();
        db.shifts().add_transaction(&shift.id, &kept).await.unwrap();
        // Linked but never saved to the receipts table.
        db.shifts()
            .add_transaction(&shift.id, &receipt("ghost", "cash", 999))
            .await
            .unwrap();

        let outcome = db
            .reconciler(CashCountPolicy::default())
            .recalculate(&shift.id)
            .await
            .unwrap();

        assert_eq!(outcome.warning_count(), 1);
        assert_eq!(outcome.receipts_processed, 1);
        assert_eq!(outcome.shift.total_cash_sales, 100);
        let warning = outcome.warning.unwrap();
        assert_eq!(warning.unresolved[0].reference, "ghost");

        let stored = db.shifts().get_by_id(&shift.id).await.unwrap().unwrap();
        assert_eq!(stored.total_cash_sales, 100);
        assert_eq!(stored.expected_cash, 100);
        assert!(stored.last_reconciled_at.is_some());
    }

    #[tokio::test]
    async fn test_unreadable_receipt_fails_without_saving() {
        let db = setup().await;
        let shift = db.shifts().start_shift("user-1", "Ana", 0).await.unwrap();

        let kept = receipt("r1", "cash", 100);
        db.receipts().save(&kept).await.unwrap();
        db.shifts().add_transaction(&shift.id, &kept).await.unwrap();

        let broken = receipt("r2", "cash", 50);
        db.receipts().save(&broken).await.unwrap();
        db.shifts().add_transaction(&shift.id, &broken).await.unwrap();
        sqlx::query("UPDATE receipts SET payments = 'not json' WHERE id = 'r2'")
            .execute(db.pool())
            .await
            .unwrap();
        let before = db.shifts().get_by_id(&shift.id).await.unwrap().unwrap();

        let result = db
            .reconciler(CashCountPolicy::default())
            .recalculate(&shift.id)
            .await;
        assert!(matches!(result, Err(DbError::Serialization(_))));

        let after = db.shifts().get_by_id(&shift.id).await.unwrap().unwrap();
        assert_eq!(after.version, before.version);
        assert_eq!(after.totals(), before.totals());
        assert!(after.last_reconciled_at.is_none());
    }

    #[tokio::test]
    async fn test_counted_close_policy() {
        let db = setup().await;
        let shift = db.shifts().start_shift("user-1", "Ana", 1000).await.unwrap();
        let r = receipt("r1", "cash", 200);
        db.receipts().save(&r).await.unwrap();
        db.shifts().add_transaction(&shift.id, &r).await.unwrap();
        db.shifts().end_shift(&shift.id, 1190, None).await.unwrap();

        let preserved = db
            .reconciler(CashCountPolicy::PreserveCounted)
            .recalculate(&shift.id)
            .await
            .unwrap();
        assert_eq!(preserved.shift.actual_cash, Some(1190));
        assert_eq!(preserved.shift.variance, Some(-10));

        let recomputed = db
            .reconciler(CashCountPolicy::Recompute)
            .recalculate(&shift.id)
            .await
            .unwrap();
        assert_eq!(recomputed.shift.actual_cash, Some(1200));
        assert_eq!(recomputed.shift.variance, Some(0));
    }

    #[tokio::test]
    async fn test_unknown_shift_is_not_found() {
        let db = setup().await;
        let result = db
            .reconciler(CashCountPolicy::default())
            .recalculate("missing")
            .await;
        assert!(matches!(result, Err(DbError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_recalculate_all_covers_window() {
        let db = setup().await;
        let from = Utc::now() - chrono::Duration::seconds(1);

        let a = db.shifts().start_shift("user-1", "Ana", 0).await.unwrap();
        let b = db.shifts().start_shift("user-2", "Ben", 0).await.unwrap();
        let r = receipt("r1", "card", 75);
        db.receipts().save(&r).await.unwrap();
        db.shifts().add_transaction(&b.id, &r).await.unwrap();

        let report = db
            .reconciler(CashCountPolicy::default())
            .recalculate_all(from, Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();

        assert_eq!(report.reconciled.len(), 2);
        assert!(report.failed.is_empty());
        assert_eq!(report.drifted(), 0);
        assert!(report.reconciled.iter().any(|r| r.shift.id == a.id));

        let inverted = db
            .reconciler(CashCountPolicy::default())
            .recalculate_all(Utc::now(), from)
            .await;
        assert!(inverted.is_err());
    }
}
