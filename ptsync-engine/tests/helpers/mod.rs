//! Test Helper Utilities
//!
//! Shared utilities for ptsync-engine integration tests

#![allow(dead_code)]

pub mod db_utils;
pub mod fake_source;
pub mod faulty_stores;

pub use db_utils::{create_test_db, get_table_columns, get_table_names, has_column, seed_parents};
pub use fake_source::{raw_record, PagedSource};
pub use faulty_stores::{FailingCheckpointStore, FlakyBulkSink};

use ptsync_engine::config::SyncConfig;

/// Config with no pauses or request spacing, for fast tests
pub fn fast_config() -> SyncConfig {
    let mut config = SyncConfig::default();
    config.source.min_request_interval_ms = 0;
    config.source.fetch_retry_pause_ms = 1;
    config.destination.write_retry_pause_ms = 1;
    config
}
