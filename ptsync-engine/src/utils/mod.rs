//! Utility modules for ptsync-engine

pub mod db_retry;
pub mod retry;
pub mod text;

pub use db_retry::{checkpoint_lock_policy, retry_on_lock};
pub use retry::{RetryOutcome, RetryPolicy};
pub use text::truncate_chars;
