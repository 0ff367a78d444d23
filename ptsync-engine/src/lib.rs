//! ptsync-engine library
//!
//! Incremental synchronization of a cursor-paginated records source into a
//! SQLite destination. The binary in `main.rs` is a thin operator CLI over
//! [`services::SyncOrchestrator`]; everything it uses is public here so the
//! integration tests can drive the engine with fake sources and sinks.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod types;
pub mod utils;

pub use crate::config::SyncConfig;
pub use crate::error::{FetchError, PersistError, SyncError, SyncResult, ValidationError};
pub use crate::services::SyncOrchestrator;
pub use crate::types::{CheckpointStore, RecordSink, RecordSource, TokenProvider, WindowFilter};
