//! Service record persistence
//!
//! Upserts keyed by `external_id`. A row keeps its `guid` and `created_at`
//! for life; every other column is overwritten by the latest write.

use crate::error::PersistError;
use crate::models::{NormalizedRecord, ParentKind, ParentRefs};
use crate::types::RecordSink;
use async_trait::async_trait;
use sqlx::error::ErrorKind;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use uuid::Uuid;

const INSERT_COLUMNS: &str = "INSERT INTO service_records (
    guid, external_id, category, source_category, title, description, occurred_at,
    client_id, piano_id, invoice_id, user_id, metadata
) ";

const ON_CONFLICT_MERGE: &str = "
ON CONFLICT(external_id) DO UPDATE SET
    category = excluded.category,
    source_category = excluded.source_category,
    title = excluded.title,
    description = excluded.description,
    occurred_at = excluded.occurred_at,
    client_id = excluded.client_id,
    piano_id = excluded.piano_id,
    invoice_id = excluded.invoice_id,
    user_id = excluded.user_id,
    metadata = excluded.metadata,
    updated_at = CURRENT_TIMESTAMP";

/// Column values for one record, prepared before touching the pool
struct RecordRow {
    guid: String,
    external_id: String,
    category: String,
    source_category: String,
    title: Option<String>,
    description: Option<String>,
    occurred_at: Option<String>,
    client_id: Option<String>,
    piano_id: Option<String>,
    invoice_id: Option<String>,
    user_id: Option<String>,
    metadata: Option<String>,
}

impl RecordRow {
    fn from_record(record: &NormalizedRecord) -> Result<Self, PersistError> {
        let metadata = record
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| PersistError::Rejected(format!("metadata not serializable: {}", e)))?;

        Ok(Self {
            guid: Uuid::new_v4().to_string(),
            external_id: record.external_id.clone(),
            category: record.category.as_str().to_string(),
            source_category: record.source_category.clone(),
            title: record.title.clone(),
            description: record.description.clone(),
            occurred_at: record.occurred_at.as_ref().map(|ts| ts.to_storage_string()),
            client_id: record.parent_refs.client_id.clone(),
            piano_id: record.parent_refs.piano_id.clone(),
            invoice_id: record.parent_refs.invoice_id.clone(),
            user_id: record.parent_refs.user_id.clone(),
            metadata,
        })
    }
}

/// Row as stored, for status output and verification
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub guid: Uuid,
    pub external_id: String,
    pub category: String,
    pub source_category: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub occurred_at: Option<String>,
    pub parent_refs: ParentRefs,
    pub metadata: Option<serde_json::Value>,
}

/// SQLite implementation of [`RecordSink`]
#[derive(Clone)]
pub struct SqliteRecordSink {
    pool: SqlitePool,
}

impl SqliteRecordSink {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn count(&self) -> ptsync_common::Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM service_records")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    pub async fn load(&self, external_id: &str) -> ptsync_common::Result<Option<StoredRecord>> {
        let row = sqlx::query(
            r#"
            SELECT guid, external_id, category, source_category, title, description,
                   occurred_at, client_id, piano_id, invoice_id, user_id, metadata
            FROM service_records
            WHERE external_id = ?
            "#,
        )
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let guid: String = row.get("guid");
        let guid = Uuid::parse_str(&guid)
            .map_err(|e| ptsync_common::Error::Internal(format!("Invalid guid '{}': {}", guid, e)))?;
        let metadata: Option<String> = row.get("metadata");
        let metadata = metadata
            .map(|m| serde_json::from_str(&m))
            .transpose()
            .map_err(|e| ptsync_common::Error::Internal(format!("Invalid metadata: {}", e)))?;

        Ok(Some(StoredRecord {
            guid,
            external_id: row.get("external_id"),
            category: row.get("category"),
            source_category: row.get("source_category"),
            title: row.get("title"),
            description: row.get("description"),
            occurred_at: row.get("occurred_at"),
            parent_refs: ParentRefs {
                client_id: row.get("client_id"),
                piano_id: row.get("piano_id"),
                invoice_id: row.get("invoice_id"),
                user_id: row.get("user_id"),
            },
            metadata,
        }))
    }

    /// Parent references of `refs` with no matching parent row
    async fn missing_parents(&self, refs: &ParentRefs) -> Vec<ParentKind> {
        let mut missing = Vec::new();
        for kind in refs.present() {
            let Some(id) = refs.get(kind) else { continue };
            let sql = format!("SELECT 1 FROM {} WHERE external_id = ?", kind.table());
            match sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await {
                Ok(None) => missing.push(kind),
                Ok(Some(_)) => {}
                Err(e) => {
                    tracing::debug!(table = kind.table(), error = %e, "Parent lookup failed");
                }
            }
        }
        missing
    }

    async fn to_persist_error(&self, err: sqlx::Error, record: Option<&NormalizedRecord>) -> PersistError {
        match classify_sqlx_error(&err) {
            ErrorClass::Transient => PersistError::Transient(err.to_string()),
            ErrorClass::ForeignKey => {
                let missing = match record {
                    Some(r) => self.missing_parents(&r.parent_refs).await,
                    None => Vec::new(),
                };
                PersistError::ReferentialViolation {
                    missing,
                    message: err.to_string(),
                }
            }
            ErrorClass::Rejected => PersistError::Rejected(err.to_string()),
        }
    }
}

#[async_trait]
impl RecordSink for SqliteRecordSink {
    async fn upsert_bulk(&self, records: &[NormalizedRecord]) -> Result<(), PersistError> {
        if records.is_empty() {
            return Ok(());
        }
        let rows = records
            .iter()
            .map(RecordRow::from_record)
            .collect::<Result<Vec<_>, _>>()?;

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(INSERT_COLUMNS);
        builder.push_values(rows, |mut b, row| {
            b.push_bind(row.guid)
                .push_bind(row.external_id)
                .push_bind(row.category)
                .push_bind(row.source_category)
                .push_bind(row.title)
                .push_bind(row.description)
                .push_bind(row.occurred_at)
                .push_bind(row.client_id)
                .push_bind(row.piano_id)
                .push_bind(row.invoice_id)
                .push_bind(row.user_id)
                .push_bind(row.metadata);
        });
        builder.push(ON_CONFLICT_MERGE);

        // One statement, one transaction: all rows or none
        let mut tx = match self.pool.begin().await {
            Ok(tx) => tx,
            Err(e) => return Err(self.to_persist_error(e, None).await),
        };
        if let Err(e) = builder.build().execute(&mut *tx).await {
            return Err(self.to_persist_error(e, None).await);
        }
        if let Err(e) = tx.commit().await {
            return Err(self.to_persist_error(e, None).await);
        }

        tracing::debug!(records = records.len(), "Bulk upsert committed");
        Ok(())
    }

    async fn upsert_one(&self, record: &NormalizedRecord) -> Result<(), PersistError> {
        let row = RecordRow::from_record(record)?;
        let sql = format!(
            "{}VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?){}",
            INSERT_COLUMNS, ON_CONFLICT_MERGE
        );

        let result = sqlx::query(&sql)
            .bind(row.guid)
            .bind(row.external_id)
            .bind(row.category)
            .bind(row.source_category)
            .bind(row.title)
            .bind(row.description)
            .bind(row.occurred_at)
            .bind(row.client_id)
            .bind(row.piano_id)
            .bind(row.invoice_id)
            .bind(row.user_id)
            .bind(row.metadata)
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) => Err(self.to_persist_error(e, Some(record)).await),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ErrorClass {
    Transient,
    ForeignKey,
    Rejected,
}

fn classify_sqlx_error(err: &sqlx::Error) -> ErrorClass {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => ErrorClass::Transient,
        sqlx::Error::Database(db_err) => {
            if matches!(db_err.kind(), ErrorKind::ForeignKeyViolation) {
                return ErrorClass::ForeignKey;
            }
            let msg = db_err.message().to_lowercase();
            if msg.contains("database is locked")
                || msg.contains("database table is locked")
                || msg.contains("busy")
            {
                ErrorClass::Transient
            } else {
                ErrorClass::Rejected
            }
        }
        _ => ErrorClass::Rejected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CanonicalCategory, NormalizedTimestamp};
    use chrono::{TimeZone, Utc};
    use ptsync_common::db::{init_database, PoolSettings};
    use tempfile::TempDir;

    async fn setup() -> (TempDir, SqliteRecordSink) {
        let dir = TempDir::new().unwrap();
        let pool = init_database(&dir.path().join("test.db"), &PoolSettings::default())
            .await
            .unwrap();
        sqlx::query("INSERT INTO clients (external_id, display_name) VALUES ('cli_1', 'Ada')")
            .execute(&pool)
            .await
            .unwrap();
        (dir, SqliteRecordSink::new(pool))
    }

    fn record(id: &str) -> NormalizedRecord {
        NormalizedRecord {
            external_id: id.into(),
            category: CanonicalCategory::Service,
            source_category: "SERVICE_ENTRY_MANUAL".into(),
            title: Some("Tuning".into()),
            description: Some("Tuned to 440Hz".into()),
            occurred_at: Some(NormalizedTimestamp::Utc(
                Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            )),
            parent_refs: ParentRefs {
                client_id: Some("cli_1".into()),
                ..Default::default()
            },
            metadata: Some(serde_json::json!({ "frequency": 440.0 })),
        }
    }

    #[tokio::test]
    async fn test_bulk_upsert_and_load() {
        let (_dir, sink) = setup().await;

        sink.upsert_bulk(&[record("a"), record("b")]).await.unwrap();

        assert_eq!(sink.count().await.unwrap(), 2);
        let stored = sink.load("a").await.unwrap().unwrap();
        assert_eq!(stored.category, "SERVICE");
        assert_eq!(stored.occurred_at.as_deref(), Some("2024-05-01T12:00:00Z"));
        assert_eq!(stored.parent_refs.client_id.as_deref(), Some("cli_1"));
        assert_eq!(stored.metadata.unwrap()["frequency"], 440.0);
    }

    #[tokio::test]
    async fn test_upsert_overwrites_and_keeps_guid() {
        let (_dir, sink) = setup().await;

        sink.upsert_one(&record("a")).await.unwrap();
        let first = sink.load("a").await.unwrap().unwrap();

        let mut changed = record("a");
        changed.title = Some("Regulation".into());
        changed.metadata = None;
        sink.upsert_bulk(&[changed]).await.unwrap();

        let second = sink.load("a").await.unwrap().unwrap();
        assert_eq!(sink.count().await.unwrap(), 1);
        assert_eq!(second.guid, first.guid);
        assert_eq!(second.title.as_deref(), Some("Regulation"));
        assert_eq!(second.metadata, None);
    }

    #[tokio::test]
    async fn test_missing_parent_diagnosed() {
        let (_dir, sink) = setup().await;

        let mut orphan = record("orphan");
        orphan.parent_refs.piano_id = Some("pno_missing".into());

        match sink.upsert_one(&orphan).await {
            Err(PersistError::ReferentialViolation { missing, .. }) => {
                assert_eq!(missing, vec![ParentKind::Piano]);
            }
            other => panic!("expected referential violation, got {other:?}"),
        }
        assert!(sink.load("orphan").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_bulk_is_all_or_nothing() {
        let (_dir, sink) = setup().await;

        let mut orphan = record("orphan");
        orphan.parent_refs.user_id = Some("usr_missing".into());

        let err = sink.upsert_bulk(&[record("good"), orphan]).await.unwrap_err();
        assert!(matches!(err, PersistError::ReferentialViolation { .. }));
        assert!(!err.is_transient());
        assert_eq!(sink.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_empty_bulk_is_noop() {
        let (_dir, sink) = setup().await;
        sink.upsert_bulk(&[]).await.unwrap();
        assert_eq!(sink.count().await.unwrap(), 0);
    }
}
