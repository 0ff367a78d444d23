//! Sync run state machine, statistics and report

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Orchestrator state
///
/// IDLE → FETCHING → CLASSIFYING → WRITING → (CHECKPOINTING → FETCHING | DONE) | FATAL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SyncState {
    Idle,
    Fetching,
    Classifying,
    Writing,
    Checkpointing,
    /// Pagination exhausted or window upper bound reached
    Done,
    /// Unrecoverable fetch or checkpoint error
    Fatal,
    /// Stop signal observed at the top of a fetch cycle
    Cancelled,
}

impl SyncState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncState::Done | SyncState::Fatal | SyncState::Cancelled)
    }
}

/// Counters for one run; only ever incremented
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatistics {
    /// Raw records received from the source
    pub fetched: u64,
    /// Records rejected by the classifier
    pub classified_noise: u64,
    /// Records that produced a normalized record
    pub normalized: u64,
    /// Records confirmed written
    pub written: u64,
    /// Records that ended in the failed list (validation or write)
    pub record_errors: u64,
    /// Whole-batch retry attempts
    pub batch_retries: u64,
    /// Pages fully handled and checkpointed
    pub pages_completed: u64,
    /// Unknown source categories routed to the default category
    pub category_fallbacks: u64,
    /// Records beyond the window upper bound
    pub out_of_window: u64,
    /// Milliseconds spent waiting on request spacing
    pub throttled_ms: u64,
}

impl RunStatistics {
    pub fn display_string(&self) -> String {
        format!(
            "{} fetched, {} noise, {} normalized, {} written, {} errors, {} batch retries, {} pages, {} category fallbacks, {}ms throttled",
            self.fetched,
            self.classified_noise,
            self.normalized,
            self.written,
            self.record_errors,
            self.batch_retries,
            self.pages_completed,
            self.category_fallbacks,
            self.throttled_ms,
        )
    }
}

/// A record that was not written, with the reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedRecord {
    pub external_id: String,
    pub error: String,
}

/// End-of-run summary, produced for every terminal state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub target_id: String,
    pub final_state: SyncState,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub statistics: RunStatistics,
    /// Message of the error that ended a FATAL run
    pub fatal_error: Option<String>,
    pub failed: Vec<FailedRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(SyncState::Done.is_terminal());
        assert!(SyncState::Fatal.is_terminal());
        assert!(SyncState::Cancelled.is_terminal());
        assert!(!SyncState::Checkpointing.is_terminal());
        assert!(!SyncState::Idle.is_terminal());
    }

    #[test]
    fn test_state_serializes_uppercase() {
        let json = serde_json::to_string(&SyncState::Checkpointing).unwrap();
        assert_eq!(json, "\"CHECKPOINTING\"");
    }

    #[test]
    fn test_statistics_display() {
        let stats = RunStatistics {
            fetched: 10,
            classified_noise: 2,
            normalized: 8,
            written: 7,
            record_errors: 1,
            ..Default::default()
        };
        let s = stats.display_string();
        assert!(s.starts_with("10 fetched, 2 noise, 8 normalized, 7 written, 1 errors"));
    }
}
