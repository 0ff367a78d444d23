//! Capability traits consumed by the engine
//!
//! The orchestrator never talks to a concrete API client or database. It is
//! constructed with implementations of these traits, which keeps shared
//! clients out of global state and lets tests substitute fakes.
//!
//! - [`RecordSource`]: cursor-paginated Fetch capability
//! - [`RecordSink`]: idempotent upsert (Persist capability)
//! - [`CheckpointStore`]: durable per-target progress
//! - [`TokenProvider`]: bearer token accessor for the source

use crate::error::{FetchError, PersistError};
use crate::models::{NormalizedRecord, RawPage, SyncCheckpoint};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Occurred-at bounds forwarded to the source with every page request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowFilter {
    /// Inclusive lower bound
    pub start: Option<DateTime<Utc>>,
    /// Inclusive upper bound
    pub end: Option<DateTime<Utc>>,
}

impl WindowFilter {
    /// True when `ts` is past the upper bound
    pub fn is_after_end(&self, ts: DateTime<Utc>) -> bool {
        self.end.map_or(false, |end| ts > end)
    }
}

/// Fetch capability
///
/// Implementations must surface `has_more` and the continuation token
/// exactly as the source sends them, and must classify failures as
/// transient or permanent (see [`FetchError::is_transient`]).
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Name for logging
    fn name(&self) -> &str;

    /// Fetch one page starting at `cursor` (`None` = first page)
    async fn fetch_page(
        &self,
        cursor: Option<&str>,
        page_size: u32,
        window: &WindowFilter,
    ) -> Result<RawPage, FetchError>;
}

/// Persist capability
///
/// Both methods upsert keyed by `external_id` with a merge policy: an
/// existing row keeps its identity and has every non-key field overwritten.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Write all records as one operation; all-or-nothing
    async fn upsert_bulk(&self, records: &[NormalizedRecord]) -> Result<(), PersistError>;

    /// Write a single record (fallback path)
    async fn upsert_one(&self, record: &NormalizedRecord) -> Result<(), PersistError>;
}

/// Durable checkpoint storage, one entry per sync target
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self, target_id: &str) -> ptsync_common::Result<Option<SyncCheckpoint>>;

    async fn save(&self, target_id: &str, checkpoint: &SyncCheckpoint) -> ptsync_common::Result<()>;

    async fn clear(&self, target_id: &str) -> ptsync_common::Result<()>;
}

/// Source of a currently valid bearer token
///
/// Token acquisition and refresh live outside the engine.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn bearer_token(&self) -> Result<String, FetchError>;
}
