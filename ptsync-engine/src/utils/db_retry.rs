//! Lock-contention retry for bookkeeping writes
//!
//! Checkpoint saves run under their own [`RetryPolicy`] with SQLite lock
//! contention as the only retryable condition. The connection's own
//! `busy_timeout` is spent first on every attempt.

use super::RetryPolicy;
use ptsync_common::{Error, Result};
use std::future::Future;
use std::time::Duration;

/// Policy for checkpoint writes: about five seconds of lock waiting in total
pub fn checkpoint_lock_policy() -> RetryPolicy {
    RetryPolicy::new("checkpoint-lock", 50, Duration::from_millis(100))
}

/// Run `operation` under `policy`, retrying only "database is locked"
pub async fn retry_on_lock<F, Fut, T>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let outcome = policy
        .run(operation_name, Error::is_database_locked, |_| operation())
        .await;

    match outcome.result {
        Err(err) if err.is_database_locked() => Err(Error::Internal(format!(
            "{}: database still locked after {} attempts",
            operation_name, outcome.attempts
        ))),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ptsync_common::db::{init_database, PoolSettings};
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    fn quick_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new("test-lock", max_attempts, Duration::from_millis(20))
    }

    #[tokio::test]
    async fn test_retry_succeeds_first_attempt() {
        let result = retry_on_lock(&quick_policy(3), "test_op", || async { Ok::<i32, Error>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_non_lock_error_fails_immediately() {
        let mut attempts = 0;

        let result = retry_on_lock(&quick_policy(5), "test_op", || {
            attempts += 1;
            async move { Err::<i32, Error>(Error::Internal("other error".to_string())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts, 1);
    }

    #[tokio::test]
    async fn test_internal_error_mentioning_lock_is_not_retried() {
        // Only sqlx database errors count as lock contention
        let mut attempts = 0;

        let result = retry_on_lock(&quick_policy(5), "test_op", || {
            attempts += 1;
            async move { Err::<i32, Error>(Error::Internal("database is locked".to_string())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts, 1);
    }

    /// Two pools on one file; the holder keeps an IMMEDIATE transaction open
    async fn locked_database(
        busy_timeout: Duration,
    ) -> (TempDir, sqlx::SqlitePool, sqlx::pool::PoolConnection<sqlx::Sqlite>) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lock.db");
        let settings = PoolSettings {
            max_connections: 2,
            busy_timeout,
        };
        let pool = init_database(&path, &settings).await.unwrap();
        let holder_pool = init_database(&path, &settings).await.unwrap();

        let mut holder = holder_pool.acquire().await.unwrap();
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *holder).await.unwrap();
        sqlx::query("INSERT INTO clients (external_id) VALUES ('held')")
            .execute(&mut *holder)
            .await
            .unwrap();

        (dir, pool, holder)
    }

    #[tokio::test]
    async fn test_lock_contention_retried_until_released() {
        let (_dir, pool, mut holder) = locked_database(Duration::from_millis(10)).await;

        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            sqlx::query("COMMIT").execute(&mut *holder).await.unwrap();
        });

        let attempts = AtomicU32::new(0);
        let result = retry_on_lock(&quick_policy(50), "insert_client", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            let pool = pool.clone();
            async move {
                sqlx::query("INSERT INTO clients (external_id) VALUES ('waiting')")
                    .execute(&pool)
                    .await?;
                Ok(())
            }
        })
        .await;
        release.await.unwrap();

        assert!(result.is_ok(), "write failed: {:?}", result);
        assert!(attempts.load(Ordering::SeqCst) > 1);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM clients")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_lock_held_past_budget_fails() {
        let (_dir, pool, _holder) = locked_database(Duration::from_millis(5)).await;

        let attempts = AtomicU32::new(0);
        let result = retry_on_lock(&quick_policy(3), "insert_client", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            let pool = pool.clone();
            async move {
                sqlx::query("INSERT INTO clients (external_id) VALUES ('waiting')")
                    .execute(&pool)
                    .await?;
                Ok(())
            }
        })
        .await;

        assert!(matches!(result, Err(Error::Internal(ref msg)) if msg.contains("still locked")));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
