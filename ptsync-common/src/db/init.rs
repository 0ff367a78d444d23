//! Database initialization
//!
//! Opens (or creates) the destination SQLite database and applies the schema.
//! Schema creation is idempotent, so this runs on every start.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Connection pool settings for the destination database
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Maximum pool connections
    ///
    /// Record-level fallback writes run concurrently, so this should be at
    /// least the configured record concurrency.
    pub max_connections: u32,
    /// SQLite busy_timeout applied on every connection
    pub busy_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 8,
            busy_timeout: Duration::from_millis(250),
        }
    }
}

/// Initialize database connection pool and create tables if needed
pub async fn init_database(db_path: &Path, settings: &PoolSettings) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // Foreign keys and busy_timeout are per-connection pragmas, so they go on
    // the connect options rather than a one-off query against the pool.
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(settings.busy_timeout);

    let pool = SqlitePoolOptions::new()
        .max_connections(settings.max_connections)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    crate::db::schema::create_all_tables(&pool).await?;

    Ok(pool)
}
