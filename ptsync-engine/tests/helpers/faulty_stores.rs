//! Sink and checkpoint store wrappers that inject failures

use async_trait::async_trait;
use ptsync_engine::error::PersistError;
use ptsync_engine::models::{NormalizedRecord, SyncCheckpoint};
use ptsync_engine::types::{CheckpointStore, RecordSink};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Fails the first `transient_failures` bulk calls, then delegates
pub struct FlakyBulkSink {
    inner: Arc<dyn RecordSink>,
    transient_failures: AtomicU32,
    pub bulk_calls: AtomicU32,
    pub single_calls: AtomicU32,
}

impl FlakyBulkSink {
    pub fn new(inner: Arc<dyn RecordSink>, transient_failures: u32) -> Self {
        Self {
            inner,
            transient_failures: AtomicU32::new(transient_failures),
            bulk_calls: AtomicU32::new(0),
            single_calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl RecordSink for FlakyBulkSink {
    async fn upsert_bulk(&self, records: &[NormalizedRecord]) -> Result<(), PersistError> {
        self.bulk_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(PersistError::Transient("database is locked".into()));
        }
        self.inner.upsert_bulk(records).await
    }

    async fn upsert_one(&self, record: &NormalizedRecord) -> Result<(), PersistError> {
        self.single_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.upsert_one(record).await
    }
}

/// Lets `allowed_saves` saves through, then fails every save
pub struct FailingCheckpointStore {
    inner: Arc<dyn CheckpointStore>,
    allowed_saves: AtomicU32,
}

impl FailingCheckpointStore {
    pub fn new(inner: Arc<dyn CheckpointStore>, allowed_saves: u32) -> Self {
        Self {
            inner,
            allowed_saves: AtomicU32::new(allowed_saves),
        }
    }
}

#[async_trait]
impl CheckpointStore for FailingCheckpointStore {
    async fn load(&self, target_id: &str) -> ptsync_common::Result<Option<SyncCheckpoint>> {
        self.inner.load(target_id).await
    }

    async fn save(&self, target_id: &str, checkpoint: &SyncCheckpoint) -> ptsync_common::Result<()> {
        let remaining = self.allowed_saves.load(Ordering::SeqCst);
        if remaining == 0 {
            return Err(ptsync_common::Error::Internal("checkpoint volume unavailable".into()));
        }
        self.allowed_saves.store(remaining - 1, Ordering::SeqCst);
        self.inner.save(target_id, checkpoint).await
    }

    async fn clear(&self, target_id: &str) -> ptsync_common::Result<()> {
        self.inner.clear(target_id).await
    }
}
