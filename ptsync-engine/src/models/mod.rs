//! Data models for ptsync-engine
//!
//! - Raw source records and pages
//! - Normalized destination records
//! - Sync checkpoint and run state/statistics

pub mod checkpoint;
pub mod normalized_record;
pub mod raw_record;
pub mod sync_run;

pub use checkpoint::SyncCheckpoint;
pub use normalized_record::{
    CanonicalCategory, Measurements, NormalizedRecord, NormalizedTimestamp, ParentKind, ParentRefs,
};
pub use raw_record::{ParentObject, RawPage, RawParentRefs, RawRecord};
pub use sync_run::{FailedRecord, RunReport, RunStatistics, SyncState};
