//! ptsync-engine - operator CLI
//!
//! Non-interactive entry point for scheduled or manual runs:
//! - `sync`   run the engine for one target and print the run report
//! - `scan`   dry run: classify and normalize without writing
//! - `status` show the stored checkpoint
//! - `reset`  forget the stored checkpoint (next run starts from the window)

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use ptsync_engine::config::SyncConfig;
use ptsync_engine::db::{open_destination, SqliteCheckpointStore, SqliteRecordSink};
use ptsync_engine::models::SyncState;
use ptsync_engine::services::{GraphQlRecordSource, SyncOrchestrator};
use ptsync_engine::types::CheckpointStore;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_HASH"),
    ", ",
    env!("BUILD_PROFILE"),
    ", built ",
    env!("BUILD_TIMESTAMP"),
    ")"
);

#[derive(Parser, Debug)]
#[command(name = "ptsync-engine")]
#[command(about = "Incremental sync of timeline records into the local store")]
#[command(version, long_version = LONG_VERSION)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, env = "PTSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Destination SQLite database
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a sync for one target
    Sync(RunArgs),
    /// Walk and classify without writing or checkpointing
    Scan(RunArgs),
    /// Print the stored checkpoint for a target
    Status(TargetArgs),
    /// Clear the stored checkpoint for a target
    Reset(TargetArgs),
}

#[derive(Args, Debug)]
struct TargetArgs {
    /// Sync target id (checkpoint key)
    #[arg(long)]
    target: String,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Sync target id (checkpoint key)
    #[arg(long)]
    target: String,

    /// GraphQL endpoint
    #[arg(long)]
    endpoint: Option<String>,

    /// Lower occurred-at bound when no checkpoint exists (RFC 3339)
    #[arg(long)]
    since: Option<DateTime<Utc>>,

    /// Upper occurred-at bound (RFC 3339)
    #[arg(long)]
    until: Option<DateTime<Utc>>,

    /// Records per page
    #[arg(long)]
    page_size: Option<u32>,

    /// Records per bulk write
    #[arg(long)]
    batch_size: Option<usize>,

    /// Also write the JSON report to this file
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,
}

impl RunArgs {
    fn apply(&self, config: &mut SyncConfig) {
        if let Some(endpoint) = &self.endpoint {
            config.source.endpoint = Some(endpoint.clone());
        }
        if let Some(since) = self.since {
            config.window.start = Some(since);
        }
        if let Some(until) = self.until {
            config.window.end = Some(until);
        }
        if let Some(page_size) = self.page_size {
            config.source.page_size = page_size;
        }
        if let Some(batch_size) = self.batch_size {
            config.destination.batch_size = batch_size;
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = SyncConfig::load(cli.config.as_deref())?;
    if let Some(database) = &cli.database {
        config.destination.database_path = Some(database.clone());
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("ptsync-engine {}", LONG_VERSION);

    match cli.command {
        Command::Sync(args) => run_sync(config, args).await,
        Command::Scan(args) => run_scan(config, args).await,
        Command::Status(args) => show_status(config, args).await,
        Command::Reset(args) => reset_checkpoint(config, args).await,
    }
}

async fn build_orchestrator(config: SyncConfig, target: &str) -> Result<SyncOrchestrator> {
    config.validate()?;
    let source = GraphQlRecordSource::from_config(&config.source)?;
    let pool = open_destination(&config).await?;

    let orchestrator = SyncOrchestrator::new(
        config,
        target,
        Arc::new(source),
        Arc::new(SqliteRecordSink::new(pool.clone())),
        Arc::new(SqliteCheckpointStore::new(pool)),
    )?;
    Ok(orchestrator)
}

/// Cancel `token` on Ctrl-C; the run stops at the next page boundary
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing current page before stopping");
            token.cancel();
        }
    });
}

async fn run_sync(mut config: SyncConfig, args: RunArgs) -> Result<ExitCode> {
    args.apply(&mut config);
    let orchestrator = build_orchestrator(config, &args.target).await?;

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let report = orchestrator.run(cancel).await;
    let json = serde_json::to_string_pretty(&report)?;
    println!("{}", json);

    if let Some(path) = &args.report {
        std::fs::write(path, &json)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        info!("Run report written to {}", path.display());
    }

    Ok(match report.final_state {
        SyncState::Done => ExitCode::SUCCESS,
        SyncState::Cancelled => ExitCode::from(130),
        _ => ExitCode::FAILURE,
    })
}

async fn run_scan(mut config: SyncConfig, args: RunArgs) -> Result<ExitCode> {
    args.apply(&mut config);
    let orchestrator = build_orchestrator(config, &args.target).await?;

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let summary = orchestrator.scan(cancel).await?;
    let json = serde_json::to_string_pretty(&summary)?;
    println!("{}", json);

    if let Some(path) = &args.report {
        std::fs::write(path, &json)
            .with_context(|| format!("Failed to write scan summary to {}", path.display()))?;
    }
    Ok(ExitCode::SUCCESS)
}

async fn show_status(config: SyncConfig, args: TargetArgs) -> Result<ExitCode> {
    let pool = open_destination(&config).await?;
    let checkpoints = SqliteCheckpointStore::new(pool.clone());
    let records = SqliteRecordSink::new(pool);

    let checkpoint = checkpoints.load(&args.target).await?;
    let status = serde_json::json!({
        "target_id": args.target,
        "checkpoint": checkpoint,
        "stored_records": records.count().await?,
    });
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(ExitCode::SUCCESS)
}

async fn reset_checkpoint(config: SyncConfig, args: TargetArgs) -> Result<ExitCode> {
    let pool = open_destination(&config).await?;
    SqliteCheckpointStore::new(pool).clear(&args.target).await?;
    info!(target = %args.target, "Checkpoint cleared");
    Ok(ExitCode::SUCCESS)
}
