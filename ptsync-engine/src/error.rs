//! Error types for ptsync-engine
//!
//! Errors are split by the layer that raises them, because each layer has a
//! different propagation rule:
//! - [`FetchError`] may end a run (after retries)
//! - [`PersistError`] never ends a run; it becomes a `failed` entry
//! - [`ValidationError`] is per record; reported and skipped
//! - [`SyncError`] is what a run (or its construction) can fail with

use crate::models::ParentKind;
use std::time::Duration;
use thiserror::Error;

/// Errors from the Fetch capability and the page walker
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Network failure, 5xx or 429 from the source
    #[error("Transient fetch error: {0}")]
    Transient(String),

    /// Per-call timeout elapsed
    #[error("Fetch timed out after {0:?}")]
    Timeout(Duration),

    /// 4xx, unparseable response, or a query error the source will repeat
    #[error("Permanent fetch error: {0}")]
    Permanent(String),

    /// Pagination contract broken by the source
    #[error("Malformed pagination cursor: {0}")]
    MalformedCursor(String),

    /// Transient failures continued past the retry budget
    #[error("Fetch failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<FetchError> },
}

impl FetchError {
    /// Whether the fetch retry policy applies
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_) | FetchError::Timeout(_))
    }
}

/// Errors from the Persist capability
#[derive(Debug, Clone, Error)]
pub enum PersistError {
    /// Lock contention, pool exhaustion, I/O, per-call timeout
    #[error("Transient write error: {0}")]
    Transient(String),

    /// A parent reference points at a row that does not exist
    #[error("Referential constraint violation on [{}]: {message}", format_kinds(.missing))]
    ReferentialViolation {
        /// Parent references the store could not resolve (empty if unknown)
        missing: Vec<ParentKind>,
        message: String,
    },

    /// Any other permanent rejection (constraint, malformed value)
    #[error("Write rejected: {0}")]
    Rejected(String),
}

impl PersistError {
    /// Whether the write retry policy applies
    pub fn is_transient(&self) -> bool {
        matches!(self, PersistError::Transient(_))
    }
}

fn format_kinds(kinds: &[ParentKind]) -> String {
    if kinds.is_empty() {
        return "unknown".to_string();
    }
    kinds
        .iter()
        .map(|k| k.column())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Malformed record content; the record is reported and skipped
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("record has no source id")]
    MissingSourceId,

    #[error("source id is {len} characters, maximum is {max}")]
    SourceIdTooLong { len: usize, max: usize },
}

/// Run-level errors
#[derive(Debug, Error)]
pub enum SyncError {
    /// Missing or invalid configuration; raised before any fetch
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Unrecoverable fetch-path failure
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Checkpoint could not be loaded or saved
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Shared infrastructure error
    #[error(transparent)]
    Common(#[from] ptsync_common::Error),
}

/// Result type for engine operations
pub type SyncResult<T> = Result<T, SyncError>;
