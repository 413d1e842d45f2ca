//! # Database Error Types
//!
//! Error types for storage operations.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  SQLite Error (sqlx::Error)        CoreError (ledger / shift rules)    │
//! │       │                                  │                              │
//! │       ▼                                  ▼                              │
//! │  DbError (this module) ← categorized: not found, invariant, stale,     │
//! │       │                  transient, constraint, config                  │
//! │       ▼                                                                 │
//! │  Caller (audit binary, order entry, reporting)                         │
//! │       │                                                                 │
//! │       └── is_transient()? ──► retry with backoff (retry.rs)            │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;
use till_core::{CoreError, ValidationError};

/// Storage operation errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Entity not found in database.
    ///
    /// ## When This Occurs
    /// - Unknown shift id
    /// - Unknown receipt reference
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// The write would break a ledger or shift rule.
    ///
    /// ## When This Occurs
    /// - `new_stock != previous_stock + quantity`
    /// - Sign rule broken (positive sale)
    /// - Recording a sale against a completed shift
    #[error("Invariant violation: {0}")]
    InvariantViolation(#[from] CoreError),

    /// A compare-and-swap lost against a concurrent writer.
    ///
    /// ## When This Occurs
    /// - `append` with a `previous_stock` that is no longer current
    /// - Reconciliation write after a concurrent sale bumped the version
    ///
    /// Re-read and try again.
    #[error("Stale snapshot for {entity} {id}: {detail}")]
    StaleSnapshot {
        entity: String,
        id: String,
        detail: String,
    },

    /// Store temporarily unavailable (busy, locked, pool timeout, I/O).
    ///
    /// Reads are safe to retry. Appends are retried by entry id.
    #[error("Transient storage failure: {0}")]
    Transient(String),

    /// Unique constraint violation.
    #[error("Duplicate {field}: '{value}' already exists")]
    UniqueViolation { field: String, value: String },

    /// Foreign key constraint violation.
    ///
    /// ## When This Occurs
    /// - Linking a receipt to a shift id that does not exist
    #[error("Foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// Database connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Stored JSON or column value could not be decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration present but unusable.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration file could not be read or parsed.
    #[error("Failed to load configuration: {0}")]
    ConfigLoadFailed(String),

    /// Internal database error.
    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Creates a UniqueViolation error.
    pub fn duplicate(field: impl Into<String>, value: impl Into<String>) -> Self {
        DbError::UniqueViolation {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Creates a StaleSnapshot error.
    pub fn stale(
        entity: impl Into<String>,
        id: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        DbError::StaleSnapshot {
            entity: entity.into(),
            id: id.into(),
            detail: detail.into(),
        }
    }

    /// Returns true if retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, DbError::Transient(_))
    }

    /// Returns true for a lost compare-and-swap.
    pub fn is_stale(&self) -> bool {
        matches!(self, DbError::StaleSnapshot { .. })
    }
}

/// Convert sqlx errors to DbError.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::RowNotFound    → DbError::NotFound
/// sqlx::Error::Database       → Analyze message for constraint / lock type
/// sqlx::Error::PoolTimedOut   → DbError::Transient
/// sqlx::Error::Io             → DbError::Transient
/// sqlx::Error::ColumnDecode   → DbError::Serialization
/// Other                       → DbError::Internal
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::NotFound {
                entity: "Record".to_string(),
                id: "unknown".to_string(),
            },

            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();

                // UNIQUE constraint: "UNIQUE constraint failed: <table>.<column>"
                // FK constraint: "FOREIGN KEY constraint failed"
                // SQLITE_BUSY / SQLITE_LOCKED: "database is locked", "database table is locked"
                if msg.contains("UNIQUE constraint failed") {
                    let field = msg
                        .split("UNIQUE constraint failed: ")
                        .nth(1)
                        .unwrap_or("unknown")
                        .to_string();
                    DbError::UniqueViolation {
                        field,
                        value: "unknown".to_string(),
                    }
                } else if msg.contains("FOREIGN KEY constraint failed") {
                    DbError::ForeignKeyViolation {
                        message: msg.to_string(),
                    }
                } else if msg.contains("is locked") || msg.contains("database is busy") {
                    DbError::Transient(msg.to_string())
                } else {
                    DbError::QueryFailed(msg.to_string())
                }
            }

            sqlx::Error::PoolTimedOut => {
                DbError::Transient("Timed out waiting for a pooled connection".to_string())
            }

            sqlx::Error::Io(io_err) => DbError::Transient(io_err.to_string()),

            sqlx::Error::PoolClosed => DbError::ConnectionFailed("Pool is closed".to_string()),

            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                DbError::Serialization(err.to_string())
            }

            _ => DbError::Internal(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

impl From<ValidationError> for DbError {
    fn from(err: ValidationError) -> Self {
        DbError::InvariantViolation(CoreError::Validation(err))
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for DbError {
    fn from(err: toml::de::Error) -> Self {
        DbError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for DbError {
    fn from(err: toml::ser::Error) -> Self {
        DbError::Serialization(err.to_string())
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(DbError::Transient("database is locked".into()).is_transient());
        assert!(!DbError::not_found("Shift", "s1").is_transient());
        assert!(!DbError::stale("Product", "p1", "moved").is_transient());
        assert!(DbError::stale("Product", "p1", "moved").is_stale());
    }

    #[test]
    fn test_pool_timeout_is_transient() {
        let err: DbError = sqlx::Error::PoolTimedOut.into();
        assert!(err.is_transient());
    }

    #[test]
    fn test_validation_becomes_invariant_violation() {
        let err: DbError = ValidationError::Required {
            field: "userId".to_string(),
        }
        .into();
        assert!(matches!(
            err,
            DbError::InvariantViolation(CoreError::Validation(_))
        ));
    }

    #[test]
    fn test_not_found_message() {
        assert_eq!(
            DbError::not_found("Shift", "s-9").to_string(),
            "Shift not found: s-9"
        );
    }
}
