//! Sync checkpoint persistence
//!
//! Writes go through `retry_on_lock`: a checkpoint that cannot be saved ends
//! the run, so brief lock contention must not.

use crate::models::SyncCheckpoint;
use crate::types::CheckpointStore;
use crate::utils::{checkpoint_lock_policy, retry_on_lock, RetryPolicy};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use ptsync_common::{Error, Result};
use sqlx::{Row, SqlitePool};

#[derive(Clone)]
pub struct SqliteCheckpointStore {
    pool: SqlitePool,
    lock_retry: RetryPolicy,
}

impl SqliteCheckpointStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            lock_retry: checkpoint_lock_policy(),
        }
    }
}

fn to_storage(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_stored(column: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse {} '{}': {}", column, value, e)))
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn load(&self, target_id: &str) -> Result<Option<SyncCheckpoint>> {
        let row = sqlx::query(
            "SELECT cursor, window_start, walk_started_at, last_success_at FROM sync_checkpoints WHERE target_id = ?",
        )
        .bind(target_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let window_start: String = row.get("window_start");
                let walk_started_at: Option<String> = row.get("walk_started_at");
                let last_success_at: String = row.get("last_success_at");
                Ok(Some(SyncCheckpoint {
                    cursor: row.get("cursor"),
                    window_start: parse_stored("window_start", &window_start)?,
                    walk_started_at: walk_started_at
                        .as_deref()
                        .map(|v| parse_stored("walk_started_at", v))
                        .transpose()?,
                    last_success_at: parse_stored("last_success_at", &last_success_at)?,
                }))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, target_id: &str, checkpoint: &SyncCheckpoint) -> Result<()> {
        // Prepare values before acquiring a connection
        let cursor = checkpoint.cursor.clone();
        let window_start = to_storage(&checkpoint.window_start);
        let walk_started_at = checkpoint.walk_started_at.as_ref().map(to_storage);
        let last_success_at = to_storage(&checkpoint.last_success_at);

        retry_on_lock(&self.lock_retry, "save_checkpoint", || async {
            sqlx::query(
                r#"
                INSERT INTO sync_checkpoints
                    (target_id, cursor, window_start, walk_started_at, last_success_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(target_id) DO UPDATE SET
                    cursor = excluded.cursor,
                    window_start = excluded.window_start,
                    walk_started_at = excluded.walk_started_at,
                    last_success_at = excluded.last_success_at,
                    updated_at = CURRENT_TIMESTAMP
                "#,
            )
            .bind(target_id)
            .bind(&cursor)
            .bind(&window_start)
            .bind(&walk_started_at)
            .bind(&last_success_at)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

            Ok(())
        })
        .await?;

        tracing::debug!(
            target = target_id,
            cursor = cursor.as_deref().unwrap_or("<none>"),
            "Checkpoint saved"
        );
        Ok(())
    }

    async fn clear(&self, target_id: &str) -> Result<()> {
        retry_on_lock(&self.lock_retry, "clear_checkpoint", || async {
            sqlx::query("DELETE FROM sync_checkpoints WHERE target_id = ?")
                .bind(target_id)
                .execute(&self.pool)
                .await
                .map_err(Error::Database)?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ptsync_common::db::{init_database, PoolSettings};
    use tempfile::TempDir;

    async fn store() -> (TempDir, SqliteCheckpointStore) {
        let dir = TempDir::new().unwrap();
        let pool = init_database(&dir.path().join("cp.db"), &PoolSettings::default())
            .await
            .unwrap();
        (dir, SqliteCheckpointStore::new(pool))
    }

    #[tokio::test]
    async fn test_missing_checkpoint_is_none() {
        let (_dir, store) = store().await;
        assert!(store.load("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_load_overwrite_clear() {
        let (_dir, store) = store().await;
        let window_start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let walk_started_at = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();

        let mid = SyncCheckpoint::in_progress("c42".into(), window_start, walk_started_at);
        store.save("shop", &mid).await.unwrap();
        let loaded = store.load("shop").await.unwrap().unwrap();
        assert_eq!(loaded.cursor.as_deref(), Some("c42"));
        assert_eq!(loaded.window_start, window_start);
        assert_eq!(loaded.walk_started_at, Some(walk_started_at));

        let done = SyncCheckpoint::completed(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap());
        store.save("shop", &done).await.unwrap();
        let loaded = store.load("shop").await.unwrap().unwrap();
        assert_eq!(loaded.cursor, None);
        assert_eq!(loaded.walk_started_at, None);
        assert!(!loaded.is_mid_walk());

        store.clear("shop").await.unwrap();
        assert!(store.load("shop").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_targets_are_independent() {
        let (_dir, store) = store().await;
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        store.save("a", &SyncCheckpoint::in_progress("ca".into(), ts, ts)).await.unwrap();
        store.save("b", &SyncCheckpoint::in_progress("cb".into(), ts, ts)).await.unwrap();

        assert_eq!(store.load("a").await.unwrap().unwrap().cursor.as_deref(), Some("ca"));
        assert_eq!(store.load("b").await.unwrap().unwrap().cursor.as_deref(), Some("cb"));
    }
}
