//! # Transient Failure Retry
//!
//! Exponential backoff around store calls that are safe to repeat.
//!
//! ## What Gets Retried
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  DbError::Transient (busy, locked, pool timeout, I/O)   ──► retry       │
//! │  everything else (not found, invariant, stale, ...)     ──► return      │
//! │                                                                         │
//! │  Safe callers:                                                          │
//! │  • read queries (the ledger is read-only for queries)                  │
//! │  • append / record (idempotent by entry id, rolled back on failure)    │
//! │  • add_transaction (idempotent by (shift, receipt))                    │
//! │                                                                         │
//! │  attempt 1 ──✗── 100ms ──► attempt 2 ──✗── 200ms ──► ... ──► give up    │
//! │                           (jittered, capped, bounded by max elapsed)    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::DbResult;

/// Backoff settings. Also the `[retry]` section of the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// First delay, in milliseconds.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Largest single delay, in seconds.
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,

    /// Give up once this much time has passed. Zero disables retries.
    #[serde(default = "default_max_elapsed_secs")]
    pub max_elapsed_secs: u64,
}

fn default_initial_backoff_ms() -> u64 {
    50
}

fn default_max_backoff_secs() -> u64 {
    2
}

fn default_max_elapsed_secs() -> u64 {
    10
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_secs: default_max_backoff_secs(),
            max_elapsed_secs: default_max_elapsed_secs(),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        RetryPolicy {
            max_elapsed_secs: 0,
            ..Self::default()
        }
    }

    /// Returns true if this policy can retry at all.
    pub fn is_enabled(&self) -> bool {
        self.max_elapsed_secs > 0
    }

    fn create_backoff(&self) -> ExponentialBackoff {
        let mut backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(self.initial_backoff_ms),
            max_interval: Duration::from_secs(self.max_backoff_secs),
            multiplier: 2.0,
            max_elapsed_time: Some(Duration::from_secs(self.max_elapsed_secs)),
            ..Default::default()
        };
        backoff.reset();
        backoff
    }
}

/// Runs `f` until it succeeds, fails permanently, or the policy gives up.
///
/// `operation` names the call in logs.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut f: F) -> DbResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = DbResult<T>>,
{
    let mut backoff = policy.create_backoff();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;

        let err = match f().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation, attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_transient() && policy.is_enabled() => err,
            Err(err) => return Err(err),
        };

        match backoff.next_backoff() {
            Some(delay) => {
                warn!(operation, attempt, ?delay, error = %err, "Transient failure, retrying");
                tokio::time::sleep(delay).await;
            }
            None => {
                warn!(operation, attempt, error = %err, "Transient failure, giving up");
                return Err(err);
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy {
            initial_backoff_ms: 1,
            max_backoff_secs: 1,
            max_elapsed_secs: 5,
        }
    }

    #[tokio::test]
    async fn test_retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result = with_retry(&fast(), "flaky", move || async move {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(DbError::Transient("database is locked".into()))
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_does_not_retry_permanent_errors() {
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result: DbResult<()> = with_retry(&fast(), "missing", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(DbError::not_found("Shift", "s1"))
        })
        .await;

        assert!(matches!(result, Err(DbError::NotFound { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disabled_policy_fails_fast() {
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result: DbResult<()> = with_retry(&RetryPolicy::none(), "locked", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(DbError::Transient("database is locked".into()))
        })
        .await;

        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
