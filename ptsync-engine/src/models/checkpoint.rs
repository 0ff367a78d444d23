//! Resumption state for one sync target

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted progress of a sync target
///
/// Owned by the orchestrator. Written only after a page's batch has been
/// fully handled, so the stored cursor never points past unwritten records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCheckpoint {
    /// Cursor of the next page to fetch; `None` means start of window
    pub cursor: Option<String>,
    /// Lower bound of the occurred-at window the cursor belongs to
    pub window_start: DateTime<Utc>,
    /// Start of the first run of an unfinished walk; `None` once it completes
    pub walk_started_at: Option<DateTime<Utc>>,
    /// When a page was last fully handled
    pub last_success_at: DateTime<Utc>,
}

impl SyncCheckpoint {
    /// Checkpoint that resumes mid-walk
    pub fn in_progress(
        cursor: String,
        window_start: DateTime<Utc>,
        walk_started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            cursor: Some(cursor),
            window_start,
            walk_started_at: Some(walk_started_at),
            last_success_at: Utc::now(),
        }
    }

    /// Checkpoint left after a finished walk; the next run starts a new window
    pub fn completed(next_window_start: DateTime<Utc>) -> Self {
        Self {
            cursor: None,
            window_start: next_window_start,
            walk_started_at: None,
            last_success_at: Utc::now(),
        }
    }

    pub fn is_mid_walk(&self) -> bool {
        self.cursor.is_some()
    }
}
