//! Idempotent bounded-batch writes with per-record failure isolation
//!
//! **Write path per chunk:**
//! 1. Bulk upsert under the write retry policy (transient errors only)
//! 2. On a non-transient or exhausted bulk failure, fall back to single
//!    record upserts with bounded concurrency, each under the same policy
//! 3. A referential violation on a single record gets exactly one more
//!    attempt with the offending parent references nulled
//!
//! Every input id ends up in exactly one of `succeeded` / `failed`.

use crate::config::SyncConfig;
use crate::error::PersistError;
use crate::models::{FailedRecord, NormalizedRecord, ParentKind};
use crate::types::RecordSink;
use crate::utils::RetryPolicy;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Writer settings fixed for one run
#[derive(Debug, Clone)]
pub struct BatchWriterSettings {
    pub batch_size: usize,
    pub record_concurrency: usize,
    pub call_timeout: Duration,
    pub retry: RetryPolicy,
}

impl BatchWriterSettings {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            batch_size: config.destination.batch_size.max(1),
            record_concurrency: config.destination.record_concurrency.max(1),
            call_timeout: config.write_timeout(),
            retry: config.write_retry_policy(),
        }
    }
}

/// Outcome of one `write_batch` call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchResult {
    /// External ids confirmed written
    pub succeeded: Vec<String>,
    pub failed: Vec<FailedRecord>,
    /// Bulk write retries (attempts beyond the first, summed over chunks)
    pub retries: u32,
}

pub struct BatchWriter {
    sink: Arc<dyn RecordSink>,
    settings: BatchWriterSettings,
}

impl BatchWriter {
    pub fn new(sink: Arc<dyn RecordSink>, settings: BatchWriterSettings) -> Self {
        Self { sink, settings }
    }

    /// Write `records`, never failing as a whole
    pub async fn write_batch(&self, records: Vec<NormalizedRecord>) -> BatchResult {
        let mut result = BatchResult::default();
        let records = dedupe_last_wins(records);

        for chunk in records.chunks(self.settings.batch_size) {
            self.write_chunk(chunk, &mut result).await;
        }

        result
    }

    async fn write_chunk(&self, chunk: &[NormalizedRecord], result: &mut BatchResult) {
        let outcome = self
            .settings
            .retry
            .run("upsert_bulk", PersistError::is_transient, |_| {
                self.with_timeout(self.sink.upsert_bulk(chunk))
            })
            .await;
        result.retries += outcome.retries();

        match outcome.result {
            Ok(()) => {
                result
                    .succeeded
                    .extend(chunk.iter().map(|r| r.external_id.clone()));
            }
            Err(err) => {
                tracing::warn!(
                    records = chunk.len(),
                    attempts = outcome.attempts,
                    error = %err,
                    "Bulk write failed, falling back to per-record writes"
                );

                let outcomes: Vec<(String, Result<(), PersistError>)> = stream::iter(chunk)
                    .map(|record| self.write_one(record))
                    .buffer_unordered(self.settings.record_concurrency)
                    .collect()
                    .await;

                for (external_id, outcome) in outcomes {
                    match outcome {
                        Ok(()) => result.succeeded.push(external_id),
                        Err(err) => {
                            tracing::warn!(external_id = %external_id, error = %err, "Record write failed");
                            result.failed.push(FailedRecord {
                                external_id,
                                error: err.to_string(),
                            });
                        }
                    }
                }
            }
        }
    }

    async fn write_one(&self, record: &NormalizedRecord) -> (String, Result<(), PersistError>) {
        let external_id = record.external_id.clone();

        let outcome = self
            .settings
            .retry
            .run("upsert_one", PersistError::is_transient, |_| {
                self.with_timeout(self.sink.upsert_one(record))
            })
            .await;

        let missing = match outcome.result {
            Ok(()) => return (external_id, Ok(())),
            Err(PersistError::ReferentialViolation { missing, .. }) => missing,
            Err(err) => return (external_id, Err(err)),
        };

        let kinds: Vec<ParentKind> = if missing.is_empty() {
            record.parent_refs.present()
        } else {
            missing
        };

        let mut fallback = record.clone();
        for kind in &kinds {
            fallback.parent_refs.clear(*kind);
        }

        tracing::debug!(
            external_id = %external_id,
            nulled = ?kinds,
            "Retrying record with unresolved parent references nulled"
        );

        let result = self.with_timeout(self.sink.upsert_one(&fallback)).await;
        (external_id, result)
    }

    async fn with_timeout<F>(&self, call: F) -> Result<(), PersistError>
    where
        F: Future<Output = Result<(), PersistError>>,
    {
        let limit = self.settings.call_timeout;
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(PersistError::Transient(format!(
                "write timed out after {:?}",
                limit
            ))),
        }
    }
}

/// Keep only the last occurrence of each external id, in input order
fn dedupe_last_wins(records: Vec<NormalizedRecord>) -> Vec<NormalizedRecord> {
    let mut last_index: HashMap<String, usize> = HashMap::with_capacity(records.len());
    for (idx, record) in records.iter().enumerate() {
        last_index.insert(record.external_id.clone(), idx);
    }

    let before = records.len();
    let deduped: Vec<NormalizedRecord> = records
        .into_iter()
        .enumerate()
        .filter(|(idx, record)| last_index.get(&record.external_id) == Some(idx))
        .map(|(_, record)| record)
        .collect();

    if deduped.len() < before {
        tracing::debug!(
            dropped = before - deduped.len(),
            "Collapsed duplicate external ids within batch"
        );
    }
    deduped
}
