//! Database Test Utilities
//!
//! Temp-file SQLite destinations and schema inspection

use anyhow::Result;
use ptsync_common::db::{init_database, PoolSettings};
use sqlx::SqlitePool;
use tempfile::TempDir;

/// Column information from PRAGMA table_info
#[derive(Debug)]
pub struct ColumnInfo {
    pub cid: i32,
    pub name: String,
    pub r#type: String,
    pub notnull: i32,
    pub dflt_value: Option<String>,
    pub pk: i32,
}

/// Create temporary destination database with the schema applied
///
/// Returns (TempDir, SqlitePool) - TempDir must be kept alive for duration of test
pub async fn create_test_db() -> Result<(TempDir, SqlitePool)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test_ptsync.db");
    let pool = init_database(&db_path, &PoolSettings::default()).await?;
    Ok((temp_dir, pool))
}

/// Insert parent rows so foreign keys on service_records resolve
pub async fn seed_parents(pool: &SqlitePool, clients: &[&str], pianos: &[&str]) -> Result<()> {
    for id in clients {
        sqlx::query("INSERT OR IGNORE INTO clients (external_id, display_name) VALUES (?, ?)")
            .bind(id)
            .bind(format!("Client {}", id))
            .execute(pool)
            .await?;
    }
    for id in pianos {
        sqlx::query("INSERT OR IGNORE INTO pianos (external_id, make) VALUES (?, 'Steinway')")
            .bind(id)
            .execute(pool)
            .await?;
    }
    Ok(())
}

/// Get table schema information
pub async fn get_table_columns(pool: &SqlitePool, table_name: &str) -> Result<Vec<ColumnInfo>> {
    let query = format!("PRAGMA table_info({})", table_name);
    let rows = sqlx::query_as::<_, (i32, String, String, i32, Option<String>, i32)>(&query)
        .fetch_all(pool)
        .await?;
    Ok(rows
        .into_iter()
        .map(|(cid, name, r#type, notnull, dflt_value, pk)| ColumnInfo {
            cid,
            name,
            r#type,
            notnull,
            dflt_value,
            pk,
        })
        .collect())
}

/// Check if table has specific column
pub async fn has_column(pool: &SqlitePool, table_name: &str, column_name: &str) -> Result<bool> {
    let columns = get_table_columns(pool, table_name).await?;
    Ok(columns.iter().any(|c| c.name == column_name))
}

/// Get all table names in database
pub async fn get_table_names(pool: &SqlitePool) -> Result<Vec<String>> {
    let tables = sqlx::query_scalar::<_, String>(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )
    .fetch_all(pool)
    .await?;
    Ok(tables)
}
