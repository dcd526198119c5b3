//! Retrying statement executor
//!
//! Every store statement goes through [`QueryExecutor::query`]. Failures of
//! any kind are retried with a fixed delay. What happens once the attempt
//! budget is spent depends on `fail_on_exhausted_retries`: by default the
//! failure is logged and an empty result is returned, otherwise it surfaces
//! as [`AuthStateError::RetriesExhausted`].

use std::sync::Arc;

use super::{AuthPool, Dialect, Row, SqlParam};
use crate::config::StoreConfig;
use crate::error::{AuthStateError, Result};
use crate::utils::{RetryConfig, retry, truncate_str};

/// Longest SQL excerpt written to the log.
const LOGGED_SQL_LEN: usize = 120;

#[derive(Debug, Clone)]
pub struct QueryExecutor {
    pool: Arc<AuthPool>,
    retry: RetryConfig,
    fail_on_exhausted: bool,
}

impl QueryExecutor {
    pub fn new(pool: Arc<AuthPool>, retry: RetryConfig) -> Self {
        Self {
            pool,
            retry,
            fail_on_exhausted: false,
        }
    }

    /// Executor with the retry settings of `config`.
    pub fn from_config(pool: Arc<AuthPool>, config: &StoreConfig) -> Self {
        Self::new(pool, config.retry_config()).fail_on_exhausted(config.fail_on_exhausted_retries)
    }

    /// Return `RetriesExhausted` instead of an empty result when every attempt fails.
    pub fn fail_on_exhausted(mut self, fail: bool) -> Self {
        self.fail_on_exhausted = fail;
        self
    }

    pub fn dialect(&self) -> Dialect {
        self.pool.dialect()
    }

    /// Run `sql` with retries.
    pub async fn query(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<Row>> {
        Ok(self.execute(sql, params).await?.unwrap_or_default())
    }

    /// Like [`query`](Self::query), but `None` when every attempt failed and
    /// the policy absorbed the failure.
    pub async fn execute(&self, sql: &str, params: &[SqlParam]) -> Result<Option<Vec<Row>>> {
        let outcome = retry(
            |attempt| {
                tracing::debug!(
                    "Executing (attempt {}): {}",
                    attempt,
                    truncate_str(sql, LOGGED_SQL_LEN)
                );
                self.pool.run(sql, params)
            },
            &self.retry,
        )
        .await;

        match outcome {
            Ok(rows) => Ok(Some(rows)),
            Err(exhausted) => {
                tracing::error!(
                    "Query failed after {} attempt(s): {} ({})",
                    exhausted.attempts,
                    exhausted.last_error,
                    truncate_str(sql, LOGGED_SQL_LEN)
                );
                if self.fail_on_exhausted {
                    Err(AuthStateError::RetriesExhausted {
                        attempts: exhausted.attempts,
                        last_error: exhausted.last_error.to_string(),
                    })
                } else {
                    Ok(None)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::QueryBackend;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Fails the first `failures` calls, then returns one row.
    struct FlakyBackend {
        failures: u32,
        calls: AtomicU32,
    }

    impl FlakyBackend {
        fn new(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                failures,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl QueryBackend for FlakyBackend {
        fn dialect(&self) -> Dialect {
            Dialect::MySql
        }

        async fn run(&self, _sql: &str, _params: &[SqlParam]) -> Result<Vec<Row>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(AuthStateError::Database(sqlx::Error::PoolTimedOut));
            }
            let mut row = Row::new();
            row.insert("value".to_string(), json!("ok"));
            Ok(vec![row])
        }
    }

    fn executor(backend: Arc<FlakyBackend>, attempts: u32) -> QueryExecutor {
        let pool = Arc::new(AuthPool::from_backend(backend));
        QueryExecutor::new(pool, RetryConfig::new(attempts, Duration::from_millis(200)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let backend = FlakyBackend::new(2);
        let start = tokio::time::Instant::now();

        let rows = executor(backend.clone(), 10)
            .query("SELECT value FROM auth", &[])
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["value"], json!("ok"));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_empty_by_default() {
        let backend = FlakyBackend::new(u32::MAX);
        let rows = executor(backend.clone(), 3)
            .query("SELECT value FROM auth", &[])
            .await
            .unwrap();

        assert!(rows.is_empty());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_reports_absorbed_exhaustion() {
        let rows = executor(FlakyBackend::new(u32::MAX), 2)
            .execute("SELECT value FROM auth", &[])
            .await
            .unwrap();
        assert!(rows.is_none());

        let rows = executor(FlakyBackend::new(1), 2)
            .execute("SELECT value FROM auth", &[])
            .await
            .unwrap();
        assert_eq!(rows.map(|rows| rows.len()), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_can_fail() {
        let backend = FlakyBackend::new(u32::MAX);
        let err = executor(backend, 2)
            .fail_on_exhausted(true)
            .query("SELECT value FROM auth", &[])
            .await
            .unwrap_err();

        match err {
            AuthStateError::RetriesExhausted { attempts, last_error } => {
                assert_eq!(attempts, 2);
                assert!(last_error.contains("timed out"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_runs_once() {
        let backend = FlakyBackend::new(u32::MAX);
        executor(backend.clone(), 0)
            .query("DELETE FROM auth", &[])
            .await
            .unwrap();
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_queue_is_retried() {
        let backend = FlakyBackend::new(0);
        let pool = Arc::new(AuthPool::from_backend(backend.clone()).with_admission_limit(0));
        let err = QueryExecutor::new(pool, RetryConfig::new(3, Duration::from_millis(10)))
            .fail_on_exhausted(true)
            .query("SELECT 1", &[])
            .await
            .unwrap_err();

        assert!(matches!(err, AuthStateError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }
}
