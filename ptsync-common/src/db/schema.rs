//! Destination schema
//!
//! Parent entity tables (`clients`, `pianos`, `invoices`, `users`) are owned by
//! other sync targets; `service_records` references them with enforced foreign
//! keys, which is what surfaces referential violations to the writer.

use crate::Result;
use sqlx::SqlitePool;

/// Create every table used by the engine (idempotent)
pub async fn create_all_tables(pool: &SqlitePool) -> Result<()> {
    create_clients_table(pool).await?;
    create_pianos_table(pool).await?;
    create_invoices_table(pool).await?;
    create_users_table(pool).await?;
    create_service_records_table(pool).await?;
    create_sync_checkpoints_table(pool).await?;
    Ok(())
}

pub async fn create_clients_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS clients (
            external_id TEXT PRIMARY KEY,
            display_name TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_pianos_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pianos (
            external_id TEXT PRIMARY KEY,
            client_id TEXT REFERENCES clients(external_id) ON DELETE SET NULL,
            make TEXT,
            model TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_invoices_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS invoices (
            external_id TEXT PRIMARY KEY,
            client_id TEXT REFERENCES clients(external_id) ON DELETE SET NULL,
            number TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_users_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            external_id TEXT PRIMARY KEY,
            name TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Synchronized timeline records, keyed for upsert by `external_id`
pub async fn create_service_records_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS service_records (
            guid TEXT PRIMARY KEY,
            external_id TEXT NOT NULL UNIQUE,
            category TEXT NOT NULL,
            source_category TEXT NOT NULL,
            title TEXT,
            description TEXT,
            occurred_at TEXT,
            client_id TEXT REFERENCES clients(external_id),
            piano_id TEXT REFERENCES pianos(external_id),
            invoice_id TEXT REFERENCES invoices(external_id),
            user_id TEXT REFERENCES users(external_id),
            metadata TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_service_records_occurred_at ON service_records(occurred_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// One row per sync target; written only by the orchestrator of that target
pub async fn create_sync_checkpoints_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_checkpoints (
            target_id TEXT PRIMARY KEY,
            cursor TEXT,
            window_start TEXT NOT NULL,
            walk_started_at TEXT,
            last_success_at TEXT NOT NULL,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
