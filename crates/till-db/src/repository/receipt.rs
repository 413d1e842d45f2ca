//! # Receipt Repository
//!
//! Read side of the receipts subsystem, as reconciliation sees it.
//!
//! Receipts are authored elsewhere; this repository only looks them up.
//! `save` exists so the receipts subsystem (and tests) can feed the table.
//! Tender lines and payment corrections are stored as JSON arrays.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};
use crate::retry::{with_retry, RetryPolicy};
use till_core::Receipt;

const SELECT_RECEIPTS: &str = r#"
    SELECT
        id, receipt_number, total, payments, payment_history,
        payment_method, is_refunded, refund_amount
    FROM receipts
"#;

#[derive(Debug, sqlx::FromRow)]
struct ReceiptRow {
    id: String,
    receipt_number: Option<String>,
    total: i64,
    payments: String,
    payment_history: String,
    payment_method: Option<String>,
    is_refunded: bool,
    refund_amount: i64,
}

impl TryFrom<ReceiptRow> for Receipt {
    type Error = DbError;

    fn try_from(row: ReceiptRow) -> Result<Self, Self::Error> {
        Ok(Receipt {
            id: row.id,
            receipt_number: row.receipt_number,
            total: row.total,
            payments: serde_json::from_str(&row.payments)?,
            payment_history: serde_json::from_str(&row.payment_history)?,
            payment_method: row.payment_method,
            is_refunded: row.is_refunded,
            refund_amount: row.refund_amount,
        })
    }
}

/// Repository for receipt lookups.
#[derive(Debug, Clone)]
pub struct ReceiptRepository {
    pool: SqlitePool,
    retry: RetryPolicy,
}

impl ReceiptRepository {
    /// Creates a new ReceiptRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ReceiptRepository {
            pool,
            retry: RetryPolicy::default(),
        }
    }

    /// Replaces the retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Gets a receipt by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Receipt>> {
        self.fetch_one_by("id", id).await
    }

    /// Gets a receipt by its human-facing number.
    pub async fn get_by_number(&self, receipt_number: &str) -> DbResult<Option<Receipt>> {
        self.fetch_one_by("receipt_number", receipt_number).await
    }

    /// Resolves a shift transaction reference.
    ///
    /// References are receipt ids; older shifts stored receipt numbers, so
    /// the number is tried when no id matches.
    pub async fn resolve(&self, reference: &str) -> DbResult<Option<Receipt>> {
        if let Some(receipt) = self.get_by_id(reference).await? {
            return Ok(Some(receipt));
        }

        let by_number = self.get_by_number(reference).await?;
        if by_number.is_some() {
            debug!(reference = %reference, "Resolved transaction by receipt number");
        }
        Ok(by_number)
    }

    /// Inserts or replaces a receipt.
    pub async fn save(&self, receipt: &Receipt) -> DbResult<()> {
        let payments = serde_json::to_string(&receipt.payments)?;
        let payment_history = serde_json::to_string(&receipt.payment_history)?;
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO receipts (
                id, receipt_number, total, payments, payment_history,
                payment_method, is_refunded, refund_amount, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
            ON CONFLICT (id) DO UPDATE SET
                receipt_number = excluded.receipt_number,
                total = excluded.total,
                payments = excluded.payments,
                payment_history = excluded.payment_history,
                payment_method = excluded.payment_method,
                is_refunded = excluded.is_refunded,
                refund_amount = excluded.refund_amount,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&receipt.id)
        .bind(&receipt.receipt_number)
        .bind(receipt.total)
        .bind(payments)
        .bind(payment_history)
        .bind(&receipt.payment_method)
        .bind(receipt.is_refunded)
        .bind(receipt.refund_amount)
        .bind(now)
        .execute(&self.pool)
        .await?;

        debug!(receipt_id = %receipt.id, "Receipt saved");
        Ok(())
    }

    async fn fetch_one_by(&self, column: &'static str, value: &str) -> DbResult<Option<Receipt>> {
        let sql = format!("{} WHERE {} = ?1", SELECT_RECEIPTS, column);
        let sql = sql.as_str();

        let row = with_retry(&self.retry, "get_receipt", move || async move {
            let row = sqlx::query_as::<_, ReceiptRow>(sql)
                .bind(value)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        })
        .await?;

        row.map(Receipt::try_from).transpose()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
