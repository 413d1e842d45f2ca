//! # Till Configuration
//!
//! Settings for the database, retry policy and reconciliation.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     TILL_DB_PATH=/var/lib/till/till.db                                 │
//! │     TILL_CASH_COUNT_POLICY=recompute                                   │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/pos/till.toml (Linux)                                    │
//! │     ~/Library/Application Support/com.till.pos/till.toml (macOS)       │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     database in the platform data dir, preserve_counted policy         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # till.toml
//! [database]
//! path = "/var/lib/till/till.db"
//! max_connections = 5
//! busy_timeout_ms = 5000
//!
//! [retry]
//! initial_backoff_ms = 50
//! max_backoff_secs = 2
//! max_elapsed_secs = 10
//!
//! [reconciliation]
//! cash_count_policy = "preserve_counted"  # preserve_counted | recompute
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{DbError, DbResult};
use crate::pool::DbConfig;
use crate::retry::RetryPolicy;
use till_core::CashCountPolicy;

// =============================================================================
// Database Settings
// =============================================================================

/// `[database]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Database file. Defaults to `till.db` in the platform data directory.
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// How long a writer waits on a locked database before failing.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

fn default_max_connections() -> u32 {
    5
}
fn default_min_connections() -> u32 {
    1
}
fn default_connect_timeout() -> u64 {
    30
}
fn default_busy_timeout() -> u64 {
    5000
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

// =============================================================================
// Reconciliation Settings
// =============================================================================

/// `[reconciliation]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationSettings {
    /// What recalculation does with a physically counted `actual_cash`.
    #[serde(default)]
    pub cash_count_policy: CashCountPolicy,
}

// =============================================================================
// Main Configuration
// =============================================================================

/// Complete configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TillConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub reconciliation: ReconciliationSettings,
}

impl TillConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (till.toml); an explicit path must exist
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> DbResult<Self> {
        let mut config = Self::default();

        match config_path {
            Some(path) => {
                config = Self::from_file(&path)?;
            }
            None => match Self::default_config_path() {
                Some(path) if path.exists() => config = Self::from_file(&path)?,
                Some(path) => debug!(?path, "Config file not found, using defaults"),
                None => debug!("No config directory on this platform, using defaults"),
            },
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load till config: {}. Using defaults.", e);
            Self::default()
        })
    }

    fn from_file(path: &Path) -> DbResult<Self> {
        info!(?path, "Loading till config from file");
        let contents = std::fs::read_to_string(path)
            .map_err(|e| DbError::ConfigLoadFailed(format!("{}: {}", path.display(), e)))?;
        Ok(toml::from_str(&contents)?)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> DbResult<()> {
        let db = &self.database;

        if db.max_connections == 0 {
            return Err(DbError::InvalidConfig(
                "max_connections must be greater than 0".into(),
            ));
        }

        if db.min_connections > db.max_connections {
            return Err(DbError::InvalidConfig(format!(
                "min_connections ({}) exceeds max_connections ({})",
                db.min_connections, db.max_connections
            )));
        }

        if let Some(path) = &db.path {
            if path.as_os_str().is_empty() {
                return Err(DbError::InvalidConfig("database path is empty".into()));
            }
        }

        if self.retry.is_enabled() && self.retry.initial_backoff_ms == 0 {
            return Err(DbError::InvalidConfig(
                "initial_backoff_ms must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("TILL_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = Some(PathBuf::from(path));
        }

        if let Ok(max) = std::env::var("TILL_MAX_CONNECTIONS") {
            match max.parse::<u32>() {
                Ok(n) => self.database.max_connections = n,
                Err(_) => warn!(value = %max, "Ignoring invalid TILL_MAX_CONNECTIONS"),
            }
        }

        if let Ok(policy) = std::env::var("TILL_CASH_COUNT_POLICY") {
            match policy.parse::<CashCountPolicy>() {
                Ok(parsed) => {
                    debug!(policy = %parsed, "Overriding cash count policy from environment");
                    self.reconciliation.cash_count_policy = parsed;
                }
                Err(e) => warn!(error = %e, "Ignoring invalid TILL_CASH_COUNT_POLICY"),
            }
        }

        if let Ok(secs) = std::env::var("TILL_RETRY_MAX_ELAPSED_SECS") {
            match secs.parse::<u64>() {
                Ok(n) => self.retry.max_elapsed_secs = n,
                Err(_) => warn!(value = %secs, "Ignoring invalid TILL_RETRY_MAX_ELAPSED_SECS"),
            }
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "till", "pos")
            .map(|dirs| dirs.config_dir().join("till.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// The configured database file, or `till.db` in the platform data
    /// directory, or `./till.db`.
    pub fn database_path(&self) -> PathBuf {
        self.database.path.clone().unwrap_or_else(|| {
            directories::ProjectDirs::from("com", "till", "pos")
                .map(|dirs| dirs.data_dir().join("till.db"))
                .unwrap_or_else(|| PathBuf::from("till.db"))
        })
    }

    /// Pool configuration for [`crate::Database::new`].
    pub fn db_config(&self) -> DbConfig {
        DbConfig::new(self.database_path())
            .max_connections(self.database.max_connections)
            .min_connections(self.database.min_connections)
            .connect_timeout(Duration::from_secs(self.database.connect_timeout_secs))
            .busy_timeout(Duration::from_millis(self.database.busy_timeout_ms))
            .retry(self.retry.clone())
    }

    /// Returns the cash count policy.
    pub fn cash_count_policy(&self) -> CashCountPolicy {
        self.reconciliation.cash_count_policy
    }
}
