//! # Stock Ledger Repository
//!
//! Append-only stock movements plus a latest-stock projection kept in step
//! with every append.
//!
//! ## Write Paths
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  append(entry)            caller supplies previous/new stock            │
//! │  ─────────────            ─────────────────────────────────             │
//! │  validate delta + sign                                                  │
//! │  read snapshot ─► previous_stock matches? ─► not older than latest?     │
//! │  BEGIN                                                                  │
//! │    UPDATE product_stock ... WHERE last_movement_id = <snapshot>  (CAS)  │
//! │    0 rows? ──► ROLLBACK, StaleSnapshot                                  │
//! │    INSERT stock_movements                                               │
//! │  COMMIT                                                                 │
//! │                                                                         │
//! │  record(movement)         ledger fills in the snapshot                  │
//! │  ────────────────         ───────────────────────────                   │
//! │  BEGIN                                                                  │
//! │    INSERT OR IGNORE product_stock (seed from ledger)  ◄── write lock    │
//! │    SELECT stock ─► build entry ─► upsert projection ─► INSERT entry     │
//! │  COMMIT                   (batch: all movements or none)                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Reads that define truth (`current_stock`, `current_stock_for_all`,
//! `verify_chain`) go to the ledger. `latest_stock` reads the projection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::error::{DbError, DbResult};
use crate::retry::{with_retry, RetryPolicy};
use till_core::ledger::{self, ChainBreak};
use till_core::validation::{validate_date_range, validate_limit, validate_product_id};
use till_core::{MovementType, NewStockMovement, StockMovementEntry};

const SELECT_ENTRIES: &str = r#"
    SELECT
        id, product_id, product_name, sku, movement_type, quantity,
        previous_stock, new_stock, reason, reference_id, user_id, user_name,
        timestamp
    FROM stock_movements
"#;

/// Latest stock as seen by a writer before it commits.
#[derive(Debug, Clone)]
struct Snapshot {
    stock: i64,
    last_movement_id: String,
    last_movement_at: DateTime<Utc>,
    /// False when reconstructed from the ledger because the projection row
    /// is missing.
    projected: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct ProjectionRow {
    stock: i64,
    last_movement_id: String,
    last_movement_at: DateTime<Utc>,
}

/// One product whose projection disagreed with the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionDrift {
    pub product_id: String,
    pub projected: Option<i64>,
    pub ledger: Option<i64>,
}

/// Outcome of [`StockLedgerRepository::rebuild_projection`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionRebuild {
    /// Products with at least one ledger entry.
    pub products: usize,
    pub drifted: Vec<ProjectionDrift>,
}

/// Repository for the stock movement ledger.
///
/// ## Usage
/// ```rust,ignore
/// let ledger = db.stock_ledger();
///
/// let entry = ledger.record(sale_movement).await?;
/// let stock = ledger.current_stock("prod-1").await?;
/// ```
#[derive(Debug, Clone)]
pub struct StockLedgerRepository {
    pool: SqlitePool,
    retry: RetryPolicy,
}

impl StockLedgerRepository {
    /// Creates a new StockLedgerRepository.
    pub fn new(pool: SqlitePool) -> Self {
        StockLedgerRepository {
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
    // Writes
    // =========================================================================

    /// Appends a fully formed entry.
    ///
    /// ## Errors
    /// - `InvariantViolation`: delta or sign rule broken, or the entry is
    ///   timestamped before the product's latest entry
    /// - `StaleSnapshot`: `previous_stock` is not the product's current stock,
    ///   or a concurrent append won
    /// - `UniqueViolation`: the id is taken by a different movement
    ///
    /// Re-appending an entry that is already stored returns the stored copy.
    pub async fn append(&self, entry: &StockMovementEntry) -> DbResult<StockMovementEntry> {
        entry.validate()?;

        debug!(
            entry_id = %entry.id,
            product_id = %entry.product_id,
            quantity = entry.quantity,
            "Appending stock movement"
        );

        with_retry(&self.retry, "append_stock_movement", move || {
            self.try_append(entry)
        })
        .await
    }

    async fn try_append(&self, entry: &StockMovementEntry) -> DbResult<StockMovementEntry> {
        if let Some(existing) = self.get_entry(&entry.id).await? {
            return same_movement(existing, entry);
        }

        let snapshot = self.snapshot(&entry.product_id).await?;
        if let Some(snap) = &snapshot {
            if snap.stock != entry.previous_stock {
                return Err(DbError::stale(
                    "Product",
                    &entry.product_id,
                    format!(
                        "previous stock {} but current stock is {}",
                        entry.previous_stock, snap.stock
                    ),
                ));
            }
            ledger::check_ordering(
                &entry.product_id,
                entry.timestamp,
                Some(snap.last_movement_at),
            )?;
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let claimed = match &snapshot {
            Some(snap) if snap.projected => sqlx::query(
                r#"
                UPDATE product_stock
                SET stock = ?1, last_movement_id = ?2, last_movement_at = ?3, updated_at = ?4
                WHERE product_id = ?5 AND last_movement_id = ?6
                "#,
            )
            .bind(entry.new_stock)
            .bind(&entry.id)
            .bind(entry.timestamp)
            .bind(now)
            .bind(&entry.product_id)
            .bind(&snap.last_movement_id)
            .execute(&mut *tx)
            .await?
            .rows_affected(),

            _ => sqlx::query(
                r#"
                INSERT INTO product_stock
                    (product_id, stock, last_movement_id, last_movement_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT (product_id) DO NOTHING
                "#,
            )
            .bind(&entry.product_id)
            .bind(entry.new_stock)
            .bind(&entry.id)
            .bind(entry.timestamp)
            .bind(now)
            .execute(&mut *tx)
            .await?
            .rows_affected(),
        };

        if claimed == 0 {
            tx.rollback().await?;

            // A retry of this same entry may have landed first.
            if let Some(existing) = self.get_entry(&entry.id).await? {
                return same_movement(existing, entry);
            }

            return Err(DbError::stale(
                "Product",
                &entry.product_id,
                "a concurrent movement was recorded first",
            ));
        }

        insert_entry(&mut tx, entry).await?;
        tx.commit().await?;

        info!(
            entry_id = %entry.id,
            product_id = %entry.product_id,
            new_stock = entry.new_stock,
            "Stock movement appended"
        );

        Ok(entry.clone())
    }

    /// Records one movement, taking the previous stock from the ledger.
    pub async fn record(&self, movement: NewStockMovement) -> DbResult<StockMovementEntry> {
        let product_id = movement.product_id.clone();
        self.record_batch(vec![movement])
            .await?
            .pop()
            .ok_or_else(|| DbError::Internal(format!("No entry recorded for {}", product_id)))
    }

    /// Records several movements atomically: all are appended or none are.
    ///
    /// Movements for the same product chain in the given order.
    pub async fn record_batch(
        &self,
        movements: Vec<NewStockMovement>,
    ) -> DbResult<Vec<StockMovementEntry>> {
        if movements.is_empty() {
            return Ok(Vec::new());
        }

        for movement in &movements {
            validate_product_id(&movement.product_id)?;
            ledger::check_quantity_sign(
                &movement.product_id,
                movement.movement_type,
                movement.quantity,
            )?;
        }

        let movements = &movements;
        let entries = with_retry(&self.retry, "record_stock_movements", move || {
            self.try_record_batch(movements)
        })
        .await?;

        info!(count = entries.len(), "Stock movements recorded");
        Ok(entries)
    }

    async fn try_record_batch(
        &self,
        movements: &[NewStockMovement],
    ) -> DbResult<Vec<StockMovementEntry>> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let mut entries = Vec::with_capacity(movements.len());

        for movement in movements {
            // Seed a missing projection row from the ledger. As the first
            // statement it also takes the write lock.
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO product_stock
                    (product_id, stock, last_movement_id, last_movement_at, updated_at)
                SELECT product_id, new_stock, id, timestamp, ?2
                FROM stock_movements
                WHERE product_id = ?1
                ORDER BY timestamp DESC, seq DESC
                LIMIT 1
                "#,
            )
            .bind(&movement.product_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            let current: Option<ProjectionRow> = sqlx::query_as(
                "SELECT stock, last_movement_id, last_movement_at FROM product_stock WHERE product_id = ?1",
            )
            .bind(&movement.product_id)
            .fetch_optional(&mut *tx)
            .await?;

            let (previous_stock, timestamp) = match &current {
                Some(row) => (row.stock, now.max(row.last_movement_at)),
                None => (movement.fallback_stock.unwrap_or(0), now),
            };

            let entry = movement.clone().into_entry(previous_stock, timestamp)?;

            sqlx::query(
                r#"
                INSERT INTO product_stock
                    (product_id, stock, last_movement_id, last_movement_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT (product_id) DO UPDATE SET
                    stock = excluded.stock,
                    last_movement_id = excluded.last_movement_id,
                    last_movement_at = excluded.last_movement_at,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&entry.product_id)
            .bind(entry.new_stock)
            .bind(&entry.id)
            .bind(entry.timestamp)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            insert_entry(&mut tx, &entry).await?;

            debug!(
                product_id = %entry.product_id,
                movement_type = %entry.movement_type,
                previous_stock = entry.previous_stock,
                new_stock = entry.new_stock,
                "Stock movement staged"
            );
            entries.push(entry);
        }

        tx.commit().await?;
        Ok(entries)
    }

    /// Rebuilds the projection by full replay of the ledger.
    ///
    /// Returns the products whose projected stock was wrong (or missing).
    pub async fn rebuild_projection(&self) -> DbResult<ProjectionRebuild> {
        with_retry(&self.retry, "rebuild_stock_projection", move || {
            self.try_rebuild_projection()
        })
        .await
    }

    async fn try_rebuild_projection(&self) -> DbResult<ProjectionRebuild> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let previous: HashMap<String, i64> =
            sqlx::query_as::<_, (String, i64)>("DELETE FROM product_stock RETURNING product_id, stock")
                .fetch_all(&mut *tx)
                .await?
                .into_iter()
                .collect();

        let entries: Vec<StockMovementEntry> = sqlx::query_as(&format!(
            "{} ORDER BY timestamp DESC, seq DESC",
            SELECT_ENTRIES
        ))
        .fetch_all(&mut *tx)
        .await?;

        let latest = ledger::latest_entry_by_product(&entries);
        let mut drifted = Vec::new();

        for (product_id, entry) in &latest {
            sqlx::query(
                r#"
                INSERT INTO product_stock
                    (product_id, stock, last_movement_id, last_movement_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )
            .bind(product_id)
            .bind(entry.new_stock)
            .bind(&entry.id)
            .bind(entry.timestamp)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            let projected = previous.get(product_id).copied();
            if projected != Some(entry.new_stock) {
                drifted.push(ProjectionDrift {
                    product_id: product_id.clone(),
                    projected,
                    ledger: Some(entry.new_stock),
                });
            }
        }

        for (product_id, stock) in &previous {
            if !latest.contains_key(product_id) {
                drifted.push(ProjectionDrift {
                    product_id: product_id.clone(),
                    projected: Some(*stock),
                    ledger: None,
                });
            }
        }

        tx.commit().await?;

        drifted.sort_by(|a, b| a.product_id.cmp(&b.product_id));
        for drift in &drifted {
            warn!(
                product_id = %drift.product_id,
                projected = ?drift.projected,
                ledger = ?drift.ledger,
                "Stock projection drift corrected"
            );
        }

        info!(
            products = latest.len(),
            drifted = drifted.len(),
            "Stock projection rebuilt"
        );

        Ok(ProjectionRebuild {
            products: latest.len(),
            drifted,
        })
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Gets one entry by id.
    pub async fn get_entry(&self, id: &str) -> DbResult<Option<StockMovementEntry>> {
        let entry = sqlx::query_as::<_, StockMovementEntry>(&format!(
            "{} WHERE id = ?1",
            SELECT_ENTRIES
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(entry)
    }

    /// `new_stock` of the product's latest ledger entry, or `None` if the
    /// product has no entries.
    pub async fn current_stock(&self, product_id: &str) -> DbResult<Option<i64>> {
        with_retry(&self.retry, "current_stock", move || async move {
            let stock = sqlx::query_scalar::<_, i64>(
                r#"
                SELECT new_stock FROM stock_movements
                WHERE product_id = ?1
                ORDER BY timestamp DESC, seq DESC
                LIMIT 1
                "#,
            )
            .bind(product_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(stock)
        })
        .await
    }

    /// Current stock from the projection. O(1); for availability checks.
    pub async fn latest_stock(&self, product_id: &str) -> DbResult<Option<i64>> {
        with_retry(&self.retry, "latest_stock", move || async move {
            let stock = sqlx::query_scalar::<_, i64>(
                "SELECT stock FROM product_stock WHERE product_id = ?1",
            )
            .bind(product_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(stock)
        })
        .await
    }

    /// Current stock of every product, by a single pass over the full ledger.
    pub async fn current_stock_for_all(&self) -> DbResult<HashMap<String, i64>> {
        let entries = with_retry(&self.retry, "current_stock_for_all", move || {
            self.fetch_entries(format!("{} ORDER BY timestamp DESC, seq DESC", SELECT_ENTRIES))
        })
        .await?;

        debug!(entries = entries.len(), "Replayed ledger for current stock");
        Ok(ledger::latest_stock_by_product(&entries))
    }

    /// A product's entries, newest first.
    pub async fn history(
        &self,
        product_id: &str,
        limit: u32,
    ) -> DbResult<Vec<StockMovementEntry>> {
        validate_limit(limit)?;

        with_retry(&self.retry, "stock_history", move || async move {
            let entries = sqlx::query_as::<_, StockMovementEntry>(&format!(
                "{} WHERE product_id = ?1 ORDER BY timestamp DESC, seq DESC LIMIT ?2",
                SELECT_ENTRIES
            ))
            .bind(product_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
            Ok(entries)
        })
        .await
    }

    /// Entries of one movement type across all products, newest first.
    pub async fn history_by_type(
        &self,
        movement_type: MovementType,
        limit: u32,
    ) -> DbResult<Vec<StockMovementEntry>> {
        validate_limit(limit)?;

        with_retry(&self.retry, "stock_history_by_type", move || async move {
            let entries = sqlx::query_as::<_, StockMovementEntry>(&format!(
                "{} WHERE movement_type = ?1 ORDER BY timestamp DESC, seq DESC LIMIT ?2",
                SELECT_ENTRIES
            ))
            .bind(movement_type)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
            Ok(entries)
        })
        .await
    }

    /// Entries with `from <= timestamp <= to`, newest first.
    pub async fn history_by_date_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DbResult<Vec<StockMovementEntry>> {
        validate_date_range(from, to)?;

        with_retry(&self.retry, "stock_history_by_date_range", move || async move {
            let entries = sqlx::query_as::<_, StockMovementEntry>(&format!(
                "{} WHERE timestamp >= ?1 AND timestamp <= ?2 ORDER BY timestamp DESC, seq DESC",
                SELECT_ENTRIES
            ))
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await?;
            Ok(entries)
        })
        .await
    }

    /// Audits one product's chain: each entry must start where the previous
    /// one ended.
    pub async fn verify_chain(&self, product_id: &str) -> DbResult<Vec<ChainBreak>> {
        let entries = with_retry(&self.retry, "verify_stock_chain", move || async move {
            let entries = sqlx::query_as::<_, StockMovementEntry>(&format!(
                "{} WHERE product_id = ?1 ORDER BY timestamp ASC, seq ASC",
                SELECT_ENTRIES
            ))
            .bind(product_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(entries)
        })
        .await?;

        let breaks = ledger::verify_chain(&entries);
        if !breaks.is_empty() {
            warn!(
                product_id = %product_id,
                breaks = breaks.len(),
                "Stock ledger chain is broken"
            );
        }
        Ok(breaks)
    }

    async fn fetch_entries(&self, sql: String) -> DbResult<Vec<StockMovementEntry>> {
        let entries = sqlx::query_as::<_, StockMovementEntry>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(entries)
    }

    /// Projection row, or the latest ledger entry when the row is missing.
    async fn snapshot(&self, product_id: &str) -> DbResult<Option<Snapshot>> {
        let projected: Option<ProjectionRow> = sqlx::query_as(
            "SELECT stock, last_movement_id, last_movement_at FROM product_stock WHERE product_id = ?1",
        )
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = projected {
            return Ok(Some(Snapshot {
                stock: row.stock,
                last_movement_id: row.last_movement_id,
                last_movement_at: row.last_movement_at,
                projected: true,
            }));
        }

        let latest = sqlx::query_as::<_, StockMovementEntry>(&format!(
            "{} WHERE product_id = ?1 ORDER BY timestamp DESC, seq DESC LIMIT 1",
            SELECT_ENTRIES
        ))
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(latest.map(|entry| Snapshot {
            stock: entry.new_stock,
            last_movement_id: entry.id,
            last_movement_at: entry.timestamp,
            projected: false,
        }))
    }
}

async fn insert_entry(conn: &mut SqliteConnection, entry: &StockMovementEntry) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO stock_movements (
            id, product_id, product_name, sku, movement_type, quantity,
            previous_stock, new_stock, reason, reference_id, user_id, user_name,
            timestamp
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
        "#,
    )
    .bind(&entry.id)
    .bind(&entry.product_id)
    .bind(&entry.product_name)
    .bind(&entry.sku)
    .bind(entry.movement_type)
    .bind(entry.quantity)
    .bind(entry.previous_stock)
    .bind(entry.new_stock)
    .bind(&entry.reason)
    .bind(&entry.reference_id)
    .bind(&entry.user_id)
    .bind(&entry.user_name)
    .bind(entry.timestamp)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Resolves a re-append of an id that is already stored.
fn same_movement(
    existing: StockMovementEntry,
    entry: &StockMovementEntry,
) -> DbResult<StockMovementEntry> {
    let same = existing.product_id == entry.product_id
        && existing.movement_type == entry.movement_type
        && existing.quantity == entry.quantity
        && existing.previous_stock == entry.previous_stock
        && existing.new_stock == entry.new_stock;

    if same {
        debug!(entry_id = %entry.id, "Stock movement already recorded");
        Ok(existing)
    } else {
        Err(DbError::duplicate("stock_movements.id", &entry.id))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
