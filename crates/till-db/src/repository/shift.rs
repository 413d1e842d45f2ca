//! # Shift Repository
//!
//! Shift lifecycle and the incremental cash-drawer totals.
//!
//! ## Shift Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Shift Lifecycle                                   │
//! │                                                                         │
//! │  1. START                                                              │
//! │     └── start_shift() → Shift { status: active }                       │
//! │         (returns the open shift if the user already has one)           │
//! │                                                                         │
//! │  2. DURING THE SESSION                                                 │
//! │     └── add_transaction()  → link receipt + atomic totals increment    │
//! │     └── add_cash_movement() → pay-in / pay-out + atomic increment      │
//! │                                                                         │
//! │  3. CLOSE (terminal)                                                   │
//! │     └── end_shift()        → counted close, variance = actual - exp.   │
//! │     └── auto_close_shift() → anomaly cleanup, variance = 0             │
//! │                                                                         │
//! │  4. (ANY TIME) RECONCILE                                               │
//! │     └── apply_reconciliation() → overwrite totals if version matches   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency
//! Totals are never read-modified-written from Rust. Every increment is a
//! single `UPDATE ... SET total = total + ?` guarded by `status = 'active'`,
//! and each mutation bumps `version`. Only reconciliation writes absolute
//! totals, and only if `version` is still the one it replayed against.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteArguments;
use sqlx::{Sqlite, SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::retry::{with_retry, RetryPolicy};
use till_core::validation::{
    validate_cash_amount, validate_date_range, validate_drawer_count, validate_limit,
    validate_reason, validate_user_id,
};
use till_core::{CashMovement, CloseType, Receipt, Shift, ShiftStatistics, ShiftStatus, ShiftTotals};

/// Close reason recorded when `start_shift` cleans up duplicate active shifts.
pub const DUPLICATE_SHIFT_REASON: &str = "Duplicate active shift detected at shift start";

const SELECT_SHIFTS: &str = r#"
    SELECT
        id, user_id, user_name, start_time, end_time, status,
        starting_cash, expected_cash, actual_cash, variance,
        total_cash_sales, total_card_sales, total_bank_transfer_sales,
        total_crypto_sales, total_other_sales, total_cash_refunds, total_refunds,
        total_paid_in, total_paid_out, total_payment_changes_affecting_cash,
        notes, close_type, close_reason, last_reconciled_at,
        version, created_at, updated_at
    FROM shifts
"#;

/// Adds a totals delta to an active shift. `?11` is the change in
/// expected cash.
const APPLY_DELTA: &str = r#"
    UPDATE shifts SET
        total_cash_sales                     = total_cash_sales + ?1,
        total_card_sales                     = total_card_sales + ?2,
        total_bank_transfer_sales            = total_bank_transfer_sales + ?3,
        total_crypto_sales                   = total_crypto_sales + ?4,
        total_other_sales                    = total_other_sales + ?5,
        total_cash_refunds                   = total_cash_refunds + ?6,
        total_refunds                        = total_refunds + ?7,
        total_paid_in                        = total_paid_in + ?8,
        total_paid_out                       = total_paid_out + ?9,
        total_payment_changes_affecting_cash = total_payment_changes_affecting_cash + ?10,
        expected_cash                        = expected_cash + ?11,
        version                              = version + 1,
        updated_at                           = ?12
    WHERE id = ?13 AND status = 'active'
"#;

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// Binds the ten totals fields, in column order.
fn bind_totals<'q>(query: SqliteQuery<'q>, totals: &ShiftTotals) -> SqliteQuery<'q> {
    query
        .bind(totals.total_cash_sales)
        .bind(totals.total_card_sales)
        .bind(totals.total_bank_transfer_sales)
        .bind(totals.total_crypto_sales)
        .bind(totals.total_other_sales)
        .bind(totals.total_cash_refunds)
        .bind(totals.total_refunds)
        .bind(totals.total_paid_in)
        .bind(totals.total_paid_out)
        .bind(totals.total_payment_changes_affecting_cash)
}

/// The scalar columns of `shifts`. Transactions and cash movements live in
/// their own tables.
#[derive(Debug, sqlx::FromRow)]
struct ShiftRow {
    id: String,
    user_id: String,
    user_name: String,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    status: ShiftStatus,
    starting_cash: i64,
    expected_cash: i64,
    actual_cash: Option<i64>,
    variance: Option<i64>,
    total_cash_sales: i64,
    total_card_sales: i64,
    total_bank_transfer_sales: i64,
    total_crypto_sales: i64,
    total_other_sales: i64,
    total_cash_refunds: i64,
    total_refunds: i64,
    total_paid_in: i64,
    total_paid_out: i64,
    total_payment_changes_affecting_cash: i64,
    notes: Option<String>,
    close_type: Option<CloseType>,
    close_reason: Option<String>,
    last_reconciled_at: Option<DateTime<Utc>>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ShiftRow {
    fn into_shift(self, transactions: Vec<String>, cash_movements: Vec<CashMovement>) -> Shift {
        Shift {
            id: self.id,
            user_id: self.user_id,
            user_name: self.user_name,
            start_time: self.start_time,
            end_time: self.end_time,
            status: self.status,
            starting_cash: self.starting_cash,
            expected_cash: self.expected_cash,
            actual_cash: self.actual_cash,
            variance: self.variance,
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
            cash_movements,
            transactions,
            notes: self.notes,
            close_type: self.close_type,
            close_reason: self.close_reason,
            last_reconciled_at: self.last_reconciled_at,
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct StatisticsRow {
    total_shifts: i64,
    active_shifts: i64,
    completed_shifts: i64,
    auto_closed_shifts: i64,
    total_sales: i64,
    total_cash_sales: i64,
    total_refunds: i64,
    total_paid_in: i64,
    total_paid_out: i64,
    total_variance: i64,
}

/// Repository for shift database operations.
#[derive(Debug, Clone)]
pub struct ShiftRepository {
    pool: SqlitePool,
    retry: RetryPolicy,
}

impl ShiftRepository {
    /// Creates a new ShiftRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ShiftRepository {
            pool,
            retry: RetryPolicy::default(),
        }
    }

    /// Replaces the retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Opens a shift for the user, or resumes the one already open.
    ///
    /// ## Behaviour
    /// - one active shift: returned unchanged
    /// - several active shifts (data left by a crash): each is auto-closed,
    ///   then a new shift is opened
    /// - none: a new shift with `expected_cash = starting_cash`
    ///
    /// A concurrent start for the same user loses on the unique index and
    /// returns the winner's shift.
    pub async fn start_shift(
        &self,
        user_id: &str,
        user_name: &str,
        starting_cash: i64,
    ) -> DbResult<Shift> {
        validate_user_id(user_id)?;
        validate_drawer_count("startingCash", starting_cash)?;

        with_retry(&self.retry, "start_shift", move || {
            self.try_start_shift(user_id, user_name, starting_cash)
        })
        .await
    }

    async fn try_start_shift(
        &self,
        user_id: &str,
        user_name: &str,
        starting_cash: i64,
    ) -> DbResult<Shift> {
        let mut active = self.active_shifts(user_id).await?;

        if active.len() == 1 {
            let shift = active.remove(0);
            debug!(shift_id = %shift.id, user_id = %user_id, "Resuming active shift");
            return Ok(shift);
        }

        if active.len() > 1 {
            warn!(
                user_id = %user_id,
                count = active.len(),
                "Multiple active shifts found, auto-closing all"
            );
            for stale in &active {
                self.auto_close_shift(&stale.id, DUPLICATE_SHIFT_REASON).await?;
            }
        }

        let shift = Shift::open(
            Uuid::new_v4().to_string(),
            user_id,
            user_name,
            starting_cash,
            Utc::now(),
        );

        match self.insert_shift(&shift).await {
            Ok(()) => {
                info!(
                    shift_id = %shift.id,
                    user_id = %user_id,
                    starting_cash,
                    "Shift started"
                );
                Ok(shift)
            }
            Err(DbError::UniqueViolation { .. }) => {
                debug!(user_id = %user_id, "Concurrent shift start won, resuming it");
                self.get_active_shift(user_id)
                    .await?
                    .ok_or_else(|| DbError::stale("Shift", user_id, "active shift vanished"))
            }
            Err(e) => Err(e),
        }
    }

    async fn insert_shift(&self, shift: &Shift) -> DbResult<()> {
        let query = sqlx::query(
            r#"
            INSERT INTO shifts (
                total_cash_sales, total_card_sales, total_bank_transfer_sales,
                total_crypto_sales, total_other_sales, total_cash_refunds, total_refunds,
                total_paid_in, total_paid_out, total_payment_changes_affecting_cash,
                id, user_id, user_name, start_time, end_time, status,
                starting_cash, expected_cash, actual_cash, variance,
                notes, close_type, close_reason, last_reconciled_at,
                version, created_at, updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
                ?11, ?12, ?13, ?14, ?15, ?16,
                ?17, ?18, ?19, ?20,
                ?21, ?22, ?23, ?24,
                ?25, ?26, ?27
            )
            "#,
        );

        bind_totals(query, &shift.totals())
            .bind(&shift.id)
            .bind(&shift.user_id)
            .bind(&shift.user_name)
            .bind(shift.start_time)
            .bind(shift.end_time)
            .bind(shift.status)
            .bind(shift.starting_cash)
            .bind(shift.expected_cash)
            .bind(shift.actual_cash)
            .bind(shift.variance)
            .bind(&shift.notes)
            .bind(shift.close_type)
            .bind(&shift.close_reason)
            .bind(shift.last_reconciled_at)
            .bind(shift.version)
            .bind(shift.created_at)
            .bind(shift.updated_at)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Links a receipt to an active shift and books it into the totals.
    ///
    /// Linking the same receipt twice is a no-op that returns the shift.
    ///
    /// ## Errors
    /// - `NotFound`: unknown shift
    /// - `InvariantViolation(InvalidShiftStatus)`: the shift is completed
    /// - `InvariantViolation(Validation)`: a negative amount, or totals that
    ///   would overflow
    pub async fn add_transaction(&self, shift_id: &str, receipt: &Receipt) -> DbResult<Shift> {
        let (delta, effect) = ShiftTotals::from_receipt(receipt)?;
        let receipt_id = receipt.id.as_str();

        let linked = with_retry(&self.retry, "add_shift_transaction", move || {
            self.try_add_transaction(shift_id, receipt_id, delta)
        })
        .await?;

        if linked {
            debug!(
                shift_id = %shift_id,
                receipt_id = %receipt_id,
                method = %effect.method,
                refunded = effect.refunded,
                amount = effect.amount.cents(),
                "Transaction added to shift"
            );
        } else {
            debug!(
                shift_id = %shift_id,
                receipt_id = %receipt_id,
                "Receipt already linked to shift"
            );
        }

        self.require(shift_id).await
    }

    async fn try_add_transaction(
        &self,
        shift_id: &str,
        receipt_id: &str,
        delta: ShiftTotals,
    ) -> DbResult<bool> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO shift_transactions (shift_id, receipt_id, recorded_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (shift_id, receipt_id) DO NOTHING
            "#,
        )
        .bind(shift_id)
        .bind(receipt_id)
        .bind(now)
        .execute(&mut *tx)
        .await;

        let linked = match inserted {
            Ok(result) => result.rows_affected(),
            Err(e) => {
                return Err(match DbError::from(e) {
                    DbError::ForeignKeyViolation { .. } => DbError::not_found("Shift", shift_id),
                    other => other,
                })
            }
        };

        if linked == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        if let Err(e) = check_delta(&mut tx, shift_id, &delta, "record a transaction").await {
            tx.rollback().await?;
            return Err(e);
        }

        if apply_delta(&mut tx, shift_id, &delta, now).await? == 0 {
            tx.rollback().await?;
            return Err(self.not_active(shift_id, "record a transaction").await);
        }

        tx.commit().await?;
        Ok(true)
    }

    /// Records a pay-in or pay-out against an active shift.
    pub async fn add_cash_movement(
        &self,
        shift_id: &str,
        movement: CashMovement,
    ) -> DbResult<Shift> {
        validate_cash_amount(movement.amount)?;
        validate_reason(&movement.reason)?;

        let movement = &movement;
        with_retry(&self.retry, "add_cash_movement", move || {
            self.try_add_cash_movement(shift_id, movement)
        })
        .await?;

        info!(
            shift_id = %shift_id,
            amount = movement.signed_amount().cents(),
            reason = %movement.reason,
            "Cash movement recorded"
        );

        self.require(shift_id).await
    }

    async fn try_add_cash_movement(&self, shift_id: &str, movement: &CashMovement) -> DbResult<()> {
        let now = Utc::now();
        let delta = ShiftTotals::from_cash_movement(movement)?;
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO cash_movements (shift_id, movement_type, amount, reason, timestamp)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(shift_id)
        .bind(movement.movement_type)
        .bind(movement.amount)
        .bind(&movement.reason)
        .bind(movement.timestamp)
        .execute(&mut *tx)
        .await;

        if let Err(e) = inserted {
            return Err(match DbError::from(e) {
                DbError::ForeignKeyViolation { .. } => DbError::not_found("Shift", shift_id),
                other => other,
            });
        }

        if let Err(e) = check_delta(&mut tx, shift_id, &delta, "record a cash movement").await {
            tx.rollback().await?;
            return Err(e);
        }

        if apply_delta(&mut tx, shift_id, &delta, now).await? == 0 {
            tx.rollback().await?;
            return Err(self.not_active(shift_id, "record a cash movement").await);
        }

        tx.commit().await?;
        Ok(())
    }

    /// Closes a shift with the cashier's physical count.
    ///
    /// `variance = actual_cash - expected_cash`; negative means short.
    pub async fn end_shift(
        &self,
        shift_id: &str,
        actual_cash: i64,
        notes: Option<&str>,
    ) -> DbResult<Shift> {
        validate_drawer_count("actualCash", actual_cash)?;
        if let Some(notes) = notes {
            validate_reason(notes)?;
        }

        let now = Utc::now();
        let result = with_retry(&self.retry, "end_shift", move || async move {
            let result = sqlx::query(
                r#"
                UPDATE shifts SET
                    actual_cash = ?1,
                    variance = ?1 - expected_cash,
                    status = 'completed',
                    close_type = 'counted',
                    end_time = ?2,
                    notes = COALESCE(?3, notes),
                    version = version + 1,
                    updated_at = ?2
                WHERE id = ?4 AND status = 'active'
                "#,
            )
            .bind(actual_cash)
            .bind(now)
            .bind(notes)
            .bind(shift_id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        })
        .await?;

        if result == 0 {
            return Err(self.not_active(shift_id, "end shift").await);
        }

        let shift = self.require(shift_id).await?;
        info!(
            shift_id = %shift_id,
            expected_cash = shift.expected_cash,
            actual_cash,
            variance = ?shift.variance,
            "Shift ended"
        );
        Ok(shift)
    }

    /// Force-closes a shift during anomaly cleanup.
    ///
    /// Sets `actual_cash = expected_cash`, so `variance` is always zero, and
    /// marks the close as `auto` with the given reason.
    pub async fn auto_close_shift(&self, shift_id: &str, reason: &str) -> DbResult<Shift> {
        validate_reason(reason)?;

        let now = Utc::now();
        let result = with_retry(&self.retry, "auto_close_shift", move || async move {
            let result = sqlx::query(
                r#"
                UPDATE shifts SET
                    actual_cash = expected_cash,
                    variance = 0,
                    status = 'completed',
                    close_type = 'auto',
                    close_reason = ?1,
                    end_time = ?2,
                    version = version + 1,
                    updated_at = ?2
                WHERE id = ?3 AND status = 'active'
                "#,
            )
            .bind(reason)
            .bind(now)
            .bind(shift_id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        })
        .await?;

        if result == 0 {
            return Err(self.not_active(shift_id, "auto-close shift").await);
        }

        warn!(shift_id = %shift_id, reason = %reason, "Shift auto-closed");
        self.require(shift_id).await
    }

    /// Overwrites a shift's totals with a reconciled copy.
    ///
    /// Succeeds only if the stored version is still `expected_version`;
    /// otherwise a concurrent mutation happened and the caller must replay.
    pub async fn apply_reconciliation(
        &self,
        shift: &Shift,
        expected_version: i64,
    ) -> DbResult<Shift> {
        let now = Utc::now();
        let totals = shift.totals();

        let query = sqlx::query(
            r#"
            UPDATE shifts SET
                total_cash_sales = ?1,
                total_card_sales = ?2,
                total_bank_transfer_sales = ?3,
                total_crypto_sales = ?4,
                total_other_sales = ?5,
                total_cash_refunds = ?6,
                total_refunds = ?7,
                total_paid_in = ?8,
                total_paid_out = ?9,
                total_payment_changes_affecting_cash = ?10,
                expected_cash = ?11,
                actual_cash = ?12,
                variance = ?13,
                last_reconciled_at = ?14,
                version = version + 1,
                updated_at = ?15
            WHERE id = ?16 AND version = ?17
            "#,
        );

        let result = bind_totals(query, &totals)
            .bind(shift.expected_cash)
            .bind(shift.actual_cash)
            .bind(shift.variance)
            .bind(shift.last_reconciled_at)
            .bind(now)
            .bind(&shift.id)
            .bind(expected_version)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return match self.get_by_id(&shift.id).await? {
                Some(current) => Err(DbError::stale(
                    "Shift",
                    &shift.id,
                    format!(
                        "version {} expected, found {}",
                        expected_version, current.version
                    ),
                )),
                None => Err(DbError::not_found("Shift", &shift.id)),
            };
        }

        self.require(&shift.id).await
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Gets a shift by ID.
    pub async fn get_by_id(&self, shift_id: &str) -> DbResult<Option<Shift>> {
        with_retry(&self.retry, "get_shift", move || async move {
            let row = sqlx::query_as::<_, ShiftRow>(&format!("{} WHERE id = ?1", SELECT_SHIFTS))
                .bind(shift_id)
                .fetch_optional(&self.pool)
                .await?;

            match row {
                Some(row) => Ok(Some(self.hydrate(row).await?)),
                None => Ok(None),
            }
        })
        .await
    }

    /// The user's open shift, if any.
    pub async fn get_active_shift(&self, user_id: &str) -> DbResult<Option<Shift>> {
        Ok(self.active_shifts(user_id).await?.into_iter().next())
    }

    /// A user's shifts, most recent first.
    pub async fn get_by_user(&self, user_id: &str, limit: u32) -> DbResult<Vec<Shift>> {
        validate_limit(limit)?;

        let sql = format!(
            "{} WHERE user_id = ?1 ORDER BY start_time DESC LIMIT ?2",
            SELECT_SHIFTS
        );
        let sql = sql.as_str();
        with_retry(&self.retry, "get_shifts_by_user", move || async move {
            let rows = sqlx::query_as::<_, ShiftRow>(sql)
                .bind(user_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?;
            self.hydrate_all(rows).await
        })
        .await
    }

    /// Shifts started within `[from, to]`, oldest first.
    pub async fn get_by_date_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DbResult<Vec<Shift>> {
        validate_date_range(from, to)?;

        let sql = format!(
            "{} WHERE start_time >= ?1 AND start_time <= ?2 ORDER BY start_time ASC",
            SELECT_SHIFTS
        );
        let sql = sql.as_str();
        with_retry(&self.retry, "get_shifts_by_date_range", move || async move {
            let rows = sqlx::query_as::<_, ShiftRow>(sql)
                .bind(from)
                .bind(to)
                .fetch_all(&self.pool)
                .await?;
            self.hydrate_all(rows).await
        })
        .await
    }

    /// Aggregates over all shifts, or one user's shifts.
    pub async fn get_statistics(&self, user_id: Option<&str>) -> DbResult<ShiftStatistics> {
        let row = with_retry(&self.retry, "shift_statistics", move || async move {
            let row = sqlx::query_as::<_, StatisticsRow>(
                r#"
                SELECT
                    COUNT(*) AS total_shifts,
                    COALESCE(SUM(CASE WHEN status = 'active' THEN 1 ELSE 0 END), 0) AS active_shifts,
                    COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0) AS completed_shifts,
                    COALESCE(SUM(CASE WHEN close_type = 'auto' THEN 1 ELSE 0 END), 0) AS auto_closed_shifts,
                    COALESCE(SUM(total_cash_sales + total_card_sales + total_bank_transfer_sales
                                 + total_crypto_sales + total_other_sales), 0) AS total_sales,
                    COALESCE(SUM(total_cash_sales), 0) AS total_cash_sales,
                    COALESCE(SUM(total_refunds), 0) AS total_refunds,
                    COALESCE(SUM(total_paid_in), 0) AS total_paid_in,
                    COALESCE(SUM(total_paid_out), 0) AS total_paid_out,
                    COALESCE(SUM(CASE WHEN status = 'completed' THEN COALESCE(variance, 0) ELSE 0 END), 0) AS total_variance
                FROM shifts
                WHERE ?1 IS NULL OR user_id = ?1
                "#,
            )
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
            Ok(row)
        })
        .await?;

        let average_variance = if row.completed_shifts > 0 {
            row.total_variance / row.completed_shifts
        } else {
            0
        };

        Ok(ShiftStatistics {
            total_shifts: row.total_shifts,
            active_shifts: row.active_shifts,
            completed_shifts: row.completed_shifts,
            auto_closed_shifts: row.auto_closed_shifts,
            total_sales: row.total_sales,
            total_cash_sales: row.total_cash_sales,
            total_refunds: row.total_refunds,
            total_paid_in: row.total_paid_in,
            total_paid_out: row.total_paid_out,
            total_variance: row.total_variance,
            average_variance,
        })
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn active_shifts(&self, user_id: &str) -> DbResult<Vec<Shift>> {
        let sql = format!(
            "{} WHERE user_id = ?1 AND status = 'active' ORDER BY start_time DESC",
            SELECT_SHIFTS
        );
        let sql = sql.as_str();
        with_retry(&self.retry, "get_active_shifts", move || async move {
            let rows = sqlx::query_as::<_, ShiftRow>(sql)
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;
            self.hydrate_all(rows).await
        })
        .await
    }

    async fn require(&self, shift_id: &str) -> DbResult<Shift> {
        self.get_by_id(shift_id)
            .await?
            .ok_or_else(|| DbError::not_found("Shift", shift_id))
    }

    /// Explains why a guarded update touched no row.
    async fn not_active(&self, shift_id: &str, operation: &str) -> DbError {
        match self.get_by_id(shift_id).await {
            Ok(Some(shift)) => match shift.ensure_active(operation) {
                Err(e) => e.into(),
                Ok(()) => DbError::stale("Shift", shift_id, "status changed during update"),
            },
            Ok(None) => DbError::not_found("Shift", shift_id),
            Err(e) => e,
        }
    }

    async fn hydrate(&self, row: ShiftRow) -> DbResult<Shift> {
        let transactions = sqlx::query_scalar::<_, String>(
            "SELECT receipt_id FROM shift_transactions WHERE shift_id = ?1 ORDER BY rowid",
        )
        .bind(&row.id)
        .fetch_all(&self.pool)
        .await?;

        let cash_movements = sqlx::query_as::<_, CashMovement>(
            r#"
            SELECT movement_type, amount, reason, timestamp
            FROM cash_movements
            WHERE shift_id = ?1
            ORDER BY seq
            "#,
        )
        .bind(&row.id)
        .fetch_all(&self.pool)
        .await?;

        Ok(row.into_shift(transactions, cash_movements))
    }

    async fn hydrate_all(&self, rows: Vec<ShiftRow>) -> DbResult<Vec<Shift>> {
        let mut shifts = Vec::with_capacity(rows.len());
        for row in rows {
            shifts.push(self.hydrate(row).await?);
        }
        Ok(shifts)
    }
}

/// Rejects a delta the shift cannot take: the shift is closed, or a total
/// would leave the i64 range. SQLite turns an overflowing `+` into a REAL,
/// so this runs inside the write transaction, before `APPLY_DELTA`.
async fn check_delta(
    conn: &mut SqliteConnection,
    shift_id: &str,
    delta: &ShiftTotals,
    operation: &str,
) -> DbResult<()> {
    let row = sqlx::query_as::<_, ShiftRow>(&format!("{} WHERE id = ?1", SELECT_SHIFTS))
        .bind(shift_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DbError::not_found("Shift", shift_id))?;

    let mut shift = row.into_shift(Vec::new(), Vec::new());
    shift.ensure_active(operation)?;

    let next = shift.totals().checked_add(delta)?;
    shift.set_totals(&next)?;
    Ok(())
}

async fn apply_delta(
    conn: &mut SqliteConnection,
    shift_id: &str,
    delta: &ShiftTotals,
    now: DateTime<Utc>,
) -> DbResult<u64> {
    let result = bind_totals(sqlx::query(APPLY_DELTA), delta)
        .bind(delta.cash_effect()?.cents())
        .bind(now)
        .bind(shift_id)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use till_core::{CashMovementType, CoreError, ReceiptPayment, ValidationError};

    async fn shifts() -> (Database, ShiftRepository) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.shifts();
        (db, repo)
    }

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
            reason: "Supplier paid from till".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_start_shift_is_idempotent() {
        let (_db, repo) = shifts().await;

        let first = repo.start_shift("user-1", "Ana", 1000).await.unwrap();
        let second = repo.start_shift("user-1", "Ana", 5000).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.starting_cash, 1000);
        assert_eq!(second.expected_cash, 1000);
        assert!(second.is_active());
    }

    #[tokio::test]
    async fn test_start_shift_validates_input() {
        let (_db, repo) = shifts().await;
        assert!(repo.start_shift("", "Ana", 0).await.is_err());
        assert!(repo.start_shift("user-1", "Ana", -5).await.is_err());
    }

    #[tokio::test]
    async fn test_drawer_scenario_ends_with_variance() {
        let (_db, repo) = shifts().await;
        let shift = repo.start_shift("user-1", "Ana", 1000).await.unwrap();

        repo.add_transaction(&shift.id, &receipt("r1", "cash", 150)).await.unwrap();
        let after_sales = repo
            .add_transaction(&shift.id, &receipt("r2", "Cash", 200))
            .await
            .unwrap();
        assert_eq!(after_sales.expected_cash, 1350);
        assert_eq!(after_sales.transactions, vec!["r1", "r2"]);

        let after_payout = repo.add_cash_movement(&shift.id, payout(50)).await.unwrap();
        assert_eq!(after_payout.expected_cash, 1300);
        assert_eq!(after_payout.total_paid_out, 50);
        assert_eq!(after_payout.cash_movements.len(), 1);

        let closed = repo.end_shift(&shift.id, 1290, Some("count ok")).await.unwrap();
        assert_eq!(closed.status, ShiftStatus::Completed);
        assert_eq!(closed.close_type, Some(CloseType::Counted));
        assert_eq!(closed.actual_cash, Some(1290));
        assert_eq!(closed.variance, Some(-10));
        assert!(closed.end_time.is_some());
    }

    #[tokio::test]
    async fn test_card_sale_leaves_expected_cash() {
        let (_db, repo) = shifts().await;
        let shift = repo.start_shift("user-1", "Ana", 500).await.unwrap();

        let updated = repo
            .add_transaction(&shift.id, &receipt("r1", "Credit Card", 900))
            .await
            .unwrap();

        assert_eq!(updated.total_card_sales, 900);
        assert_eq!(updated.expected_cash, 500);
        assert_eq!(updated.version, shift.version + 1);
    }

    #[tokio::test]
    async fn test_add_transaction_twice_is_noop() {
        let (_db, repo) = shifts().await;
        let shift = repo.start_shift("user-1", "Ana", 0).await.unwrap();
        let sale = receipt("r1", "cash", 300);

        repo.add_transaction(&shift.id, &sale).await.unwrap();
        let again = repo.add_transaction(&shift.id, &sale).await.unwrap();

        assert_eq!(again.total_cash_sales, 300);
        assert_eq!(again.transactions.len(), 1);
    }

    #[tokio::test]
    async fn test_add_transaction_unknown_shift() {
        let (_db, repo) = shifts().await;
        let result = repo.add_transaction("missing", &receipt("r1", "cash", 1)).await;
        assert!(matches!(result, Err(DbError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_completed_shift_rejects_mutations() {
        let (_db, repo) = shifts().await;
        let shift = repo.start_shift("user-1", "Ana", 0).await.unwrap();
        repo.end_shift(&shift.id, 0, None).await.unwrap();

        let sale = repo.add_transaction(&shift.id, &receipt("r1", "cash", 10)).await;
        assert!(matches!(
            sale,
            Err(DbError::InvariantViolation(CoreError::InvalidShiftStatus { .. }))
        ));

        let stored = repo.get_by_id(&shift.id).await.unwrap().unwrap();
        assert!(stored.transactions.is_empty());

        assert!(repo.add_cash_movement(&shift.id, payout(5)).await.is_err());
        assert!(repo.end_shift(&shift.id, 0, None).await.is_err());
        assert!(repo.auto_close_shift(&shift.id, "cleanup").await.is_err());
    }

    #[tokio::test]
    async fn test_cash_movement_on_unknown_shift() {
        let (_db, repo) = shifts().await;
        let result = repo.add_cash_movement("missing", payout(5)).await;
        assert!(matches!(result, Err(DbError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_negative_receipt_is_rejected() {
        let (_db, repo) = shifts().await;
        let shift = repo.start_shift("user-1", "Ana", 100).await.unwrap();

        let result = repo.add_transaction(&shift.id, &receipt("r1", "cash", -40)).await;
        assert!(matches!(
            result,
            Err(DbError::InvariantViolation(CoreError::Validation(
                ValidationError::Negative { .. }
            )))
        ));

        let stored = repo.get_by_id(&shift.id).await.unwrap().unwrap();
        assert_eq!(stored.expected_cash, 100);
        assert!(stored.transactions.is_empty());
    }

    #[tokio::test]
    async fn test_overflowing_receipt_leaves_totals_untouched() {
        let (_db, repo) = shifts().await;
        let shift = repo.start_shift("user-1", "Ana", 0).await.unwrap();
        repo.add_transaction(&shift.id, &receipt("r1", "cash", 1)).await.unwrap();

        let result = repo
            .add_transaction(&shift.id, &receipt("r2", "cash", i64::MAX))
            .await;
        assert!(matches!(
            result,
            Err(DbError::InvariantViolation(CoreError::Validation(
                ValidationError::Overflow { .. }
            )))
        ));

        let stored = repo.get_by_id(&shift.id).await.unwrap().unwrap();
        assert_eq!(stored.total_cash_sales, 1);
        assert_eq!(stored.expected_cash, 1);
        assert_eq!(stored.transactions, vec!["r1"]);
    }

    #[tokio::test]
    async fn test_auto_close_forces_zero_variance() {
        let (_db, repo) = shifts().await;
        let shift = repo.start_shift("user-1", "Ana", 1000).await.unwrap();
        repo.add_transaction(&shift.id, &receipt("r1", "cash", 250)).await.unwrap();

        let closed = repo.auto_close_shift(&shift.id, "Left open overnight").await.unwrap();

        assert_eq!(closed.actual_cash, Some(1250));
        assert_eq!(closed.variance, Some(0));
        assert!(closed.was_auto_closed());
        assert_eq!(closed.close_reason.as_deref(), Some("Left open overnight"));
    }

    #[tokio::test]
    async fn test_cash_movement_amount_must_be_positive() {
        let (_db, repo) = shifts().await;
        let shift = repo.start_shift("user-1", "Ana", 0).await.unwrap();
        assert!(repo.add_cash_movement(&shift.id, payout(0)).await.is_err());
    }

    #[tokio::test]
    async fn test_apply_reconciliation_checks_version() {
        let (_db, repo) = shifts().await;
        let shift = repo.start_shift("user-1", "Ana", 100).await.unwrap();

        let mut rebuilt = shift.clone();
        rebuilt.total_card_sales = 40;

        repo.add_transaction(&shift.id, &receipt("r1", "cash", 10)).await.unwrap();

        let stale = repo.apply_reconciliation(&rebuilt, shift.version).await;
        assert!(matches!(stale, Err(DbError::StaleSnapshot { .. })));

        let current = repo.get_by_id(&shift.id).await.unwrap().unwrap();
        let saved = repo.apply_reconciliation(&rebuilt, current.version).await.unwrap();
        assert_eq!(saved.total_card_sales, 40);
        assert_eq!(saved.version, current.version + 1);
    }

    #[tokio::test]
    async fn test_queries_and_statistics() {
        let (_db, repo) = shifts().await;
        let from = Utc::now() - chrono::Duration::seconds(1);

        let a = repo.start_shift("user-1", "Ana", 100).await.unwrap();
        repo.add_transaction(&a.id, &receipt("r1", "cash", 50)).await.unwrap();
        repo.end_shift(&a.id, 140, None).await.unwrap();

        let b = repo.start_shift("user-1", "Ana", 0).await.unwrap();
        repo.add_transaction(&b.id, &receipt("r2", "card", 70)).await.unwrap();

        let c = repo.start_shift("user-2", "Ben", 0).await.unwrap();
        repo.auto_close_shift(&c.id, "cleanup").await.unwrap();

        assert_eq!(repo.get_active_shift("user-1").await.unwrap().unwrap().id, b.id);
        assert!(repo.get_active_shift("user-2").await.unwrap().is_none());

        let by_user = repo.get_by_user("user-1", 10).await.unwrap();
        assert_eq!(by_user.len(), 2);
        assert_eq!(by_user[0].id, b.id);

        let window = repo
            .get_by_date_range(from, Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(window.len(), 3);

        let all = repo.get_statistics(None).await.unwrap();
        assert_eq!(all.total_shifts, 3);
        assert_eq!(all.active_shifts, 1);
        assert_eq!(all.completed_shifts, 2);
        assert_eq!(all.auto_closed_shifts, 1);
        assert_eq!(all.total_sales, 120);
        assert_eq!(all.total_cash_sales, 50);
        assert_eq!(all.total_variance, -10);
        assert_eq!(all.average_variance, -5);

        let ben = repo.get_statistics(Some("user-2")).await.unwrap();
        assert_eq!(ben.total_shifts, 1);
        assert_eq!(ben.total_sales, 0);
    }
}
