//! Destination store adapters
//!
//! SQLite implementations of the Persist capability and checkpoint storage.
//! The pool and schema come from `ptsync_common::db`.

pub mod checkpoints;
pub mod records;

pub use checkpoints::SqliteCheckpointStore;
pub use records::{SqliteRecordSink, StoredRecord};

use crate::config::SyncConfig;
use anyhow::{Context, Result};
use ptsync_common::db::{init_database, PoolSettings};
use sqlx::SqlitePool;

/// Open the destination database named by the configuration
///
/// The pool is sized to cover the concurrent fallback writes.
pub async fn open_destination(config: &SyncConfig) -> Result<SqlitePool> {
    let path = config.database_path();
    let settings = PoolSettings {
        max_connections: (config.destination.record_concurrency as u32 + 2)
            .max(PoolSettings::default().max_connections),
        ..PoolSettings::default()
    };

    tracing::debug!("Opening destination database: {}", path.display());

    init_database(&path, &settings)
        .await
        .with_context(|| format!("Failed to open destination database {}", path.display()))
}
