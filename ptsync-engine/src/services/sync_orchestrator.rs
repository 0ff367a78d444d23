//! Sync run driver
//!
//! **State machine:**
//! IDLE → FETCHING → CLASSIFYING → WRITING → CHECKPOINTING → (FETCHING | DONE)
//!
//! Fetch-path and checkpoint errors move the run to FATAL. The cancellation
//! token is checked at the top of each fetch cycle; an in-flight batch always
//! completes and is checkpointed before the run stops as CANCELLED.
//!
//! Every run ends with a [`RunReport`], whatever the terminal state.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::models::{
    FailedRecord, NormalizedRecord, RawRecord, RunReport, RunStatistics, SyncCheckpoint,
    SyncState,
};
use crate::services::batch_writer::{BatchWriter, BatchWriterSettings};
use crate::services::field_normalizer::FieldNormalizer;
use crate::services::page_walker::{Page, PageWalker, PageWalkerSettings};
use crate::services::value_classifier::{ValueClassifier, VerdictReason};
use crate::types::{CheckpointStore, RecordSink, RecordSource, WindowFilter};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Mutable state of one run
struct RunContext {
    run_id: Uuid,
    state: SyncState,
    statistics: RunStatistics,
    failed: Vec<FailedRecord>,
}

impl RunContext {
    fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            state: SyncState::Idle,
            statistics: RunStatistics::default(),
            failed: Vec::new(),
        }
    }

    fn transition(&mut self, target_id: &str, next: SyncState) {
        tracing::debug!(
            target = target_id,
            run_id = %self.run_id,
            from = ?self.state,
            to = ?next,
            "Sync state transition"
        );
        self.state = next;
    }
}

/// Records from one page that survived classification and normalization
struct PreparedPage {
    records: Vec<NormalizedRecord>,
    /// A record beyond the window upper bound was seen
    reached_window_end: bool,
}

/// Result of a dry run
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanSummary {
    pub target_id: String,
    pub pages: u64,
    pub statistics: RunStatistics,
    /// Normalized records per canonical category
    pub categories: BTreeMap<String, u64>,
    /// Source categories that fell back to the default, with counts
    pub unmapped_categories: BTreeMap<String, u64>,
    /// Noise verdicts by reason
    pub noise_reasons: BTreeMap<String, u64>,
    pub failed: Vec<FailedRecord>,
    pub cancelled: bool,
}

pub struct SyncOrchestrator {
    target_id: String,
    config: SyncConfig,
    source: Arc<dyn RecordSource>,
    checkpoints: Arc<dyn CheckpointStore>,
    classifier: ValueClassifier,
    normalizer: FieldNormalizer,
    writer: BatchWriter,
    walker_settings: PageWalkerSettings,
}

impl SyncOrchestrator {
    /// Validate configuration and assemble the pipeline
    ///
    /// Fails with [`SyncError::Configuration`] before anything is fetched.
    pub fn new(
        config: SyncConfig,
        target_id: impl Into<String>,
        source: Arc<dyn RecordSource>,
        sink: Arc<dyn RecordSink>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> SyncResult<Self> {
        let target_id = target_id.into();
        if target_id.trim().is_empty() {
            return Err(SyncError::Configuration("sync target id is empty".into()));
        }
        config.validate()?;

        let classifier = ValueClassifier::new(&config.classifier)?;
        let normalizer = FieldNormalizer::new(&config.normalizer)?;
        let writer = BatchWriter::new(sink, BatchWriterSettings::from_config(&config));
        let walker_settings = PageWalkerSettings::from_config(&config);

        Ok(Self {
            target_id,
            config,
            source,
            checkpoints,
            classifier,
            normalizer,
            writer,
            walker_settings,
        })
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    /// Run until pagination ends, a fatal error occurs, or `cancel` fires
    pub async fn run(&self, cancel: CancellationToken) -> RunReport {
        let started_at = Utc::now();
        let mut ctx = RunContext::new();

        tracing::info!(
            target = %self.target_id,
            run_id = %ctx.run_id,
            source = self.source.name(),
            "Sync run started"
        );

        let fatal_error = match self.execute(&cancel, &mut ctx, started_at).await {
            Ok(()) => None,
            Err(err) => {
                tracing::error!(
                    target = %self.target_id,
                    run_id = %ctx.run_id,
                    error = %err,
                    "Sync run failed"
                );
                ctx.transition(&self.target_id, SyncState::Fatal);
                Some(err.to_string())
            }
        };

        let report = RunReport {
            run_id: ctx.run_id,
            target_id: self.target_id.clone(),
            final_state: ctx.state,
            started_at,
            ended_at: Utc::now(),
            statistics: ctx.statistics,
            fatal_error,
            failed: ctx.failed,
        };

        tracing::info!(
            target = %report.target_id,
            run_id = %report.run_id,
            state = ?report.final_state,
            elapsed_ms = (report.ended_at - report.started_at).num_milliseconds(),
            "Sync run finished: {}",
            report.statistics.display_string()
        );

        report
    }

    async fn execute(
        &self,
        cancel: &CancellationToken,
        ctx: &mut RunContext,
        started_at: DateTime<Utc>,
    ) -> SyncResult<()> {
        let resume = self.resume_point().await?;
        let window = resume.window;
        let walk_started_at = resume.walk_started_at.unwrap_or(started_at);
        let mut cursor = resume.cursor;
        let walker = PageWalker::new(Arc::clone(&self.source), self.walker_settings.clone(), window);

        loop {
            if cancel.is_cancelled() {
                tracing::info!(target = %self.target_id, "Stop requested, ending run at page boundary");
                ctx.transition(&self.target_id, SyncState::Cancelled);
                return Ok(());
            }

            ctx.transition(&self.target_id, SyncState::Fetching);
            let mut page = walker.next_page(cursor.as_deref()).await?;
            take_intake(&mut page, &mut ctx.statistics, &mut ctx.failed);

            tracing::debug!(
                target = %self.target_id,
                page = ctx.statistics.pages_completed + 1,
                records = page.records.len(),
                "Page received"
            );

            ctx.transition(&self.target_id, SyncState::Classifying);
            let prepared = self.prepare_page(
                &page.records,
                &window,
                &mut ctx.statistics,
                &mut ctx.failed,
                None,
            );

            ctx.transition(&self.target_id, SyncState::Writing);
            if !prepared.records.is_empty() {
                let result = self.writer.write_batch(prepared.records).await;
                ctx.statistics.written += result.succeeded.len() as u64;
                ctx.statistics.record_errors += result.failed.len() as u64;
                ctx.statistics.batch_retries += u64::from(result.retries);
                ctx.failed.extend(result.failed);
            }

            ctx.transition(&self.target_id, SyncState::Checkpointing);
            let finished = page.is_last() || prepared.reached_window_end;
            let checkpoint = match (finished, page.next_cursor) {
                (false, Some(next)) => {
                    let cp = SyncCheckpoint::in_progress(
                        next,
                        window.start.unwrap_or_default(),
                        walk_started_at,
                    );
                    cursor = cp.cursor.clone();
                    cp
                }
                _ => SyncCheckpoint::completed(next_window_start(&window, walk_started_at)),
            };
            self.checkpoints
                .save(&self.target_id, &checkpoint)
                .await
                .map_err(|e| SyncError::Checkpoint(e.to_string()))?;
            ctx.statistics.pages_completed += 1;

            if !checkpoint.is_mid_walk() {
                ctx.transition(&self.target_id, SyncState::Done);
                return Ok(());
            }
        }
    }

    /// Dry run: walk, classify and normalize without writing or checkpointing
    pub async fn scan(&self, cancel: CancellationToken) -> SyncResult<ScanSummary> {
        let ResumePoint { cursor, window, .. } = self.resume_point().await?;
        let walker = PageWalker::new(Arc::clone(&self.source), self.walker_settings.clone(), window);

        let mut summary = ScanSummary {
            target_id: self.target_id.clone(),
            ..Default::default()
        };
        let mut observed = ScanObservations::default();

        let pages = walker.pages(cursor);
        futures::pin_mut!(pages);

        while let Some(page) = pages.next().await {
            let mut page = page?;
            summary.pages += 1;
            take_intake(&mut page, &mut summary.statistics, &mut summary.failed);

            let prepared = self.prepare_page(
                &page.records,
                &window,
                &mut summary.statistics,
                &mut summary.failed,
                Some(&mut observed),
            );
            for record in &prepared.records {
                *summary
                    .categories
                    .entry(record.category.as_str().to_string())
                    .or_default() += 1;
            }

            if prepared.reached_window_end {
                break;
            }
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
        }

        summary.unmapped_categories = observed.unmapped_categories;
        summary.noise_reasons = observed.noise_reasons;
        Ok(summary)
    }

    /// Where to start: stored checkpoint, else configuration
    async fn resume_point(&self) -> SyncResult<ResumePoint> {
        let checkpoint = self
            .checkpoints
            .load(&self.target_id)
            .await
            .map_err(|e| SyncError::Checkpoint(e.to_string()))?;

        let end = self.config.window.end;
        match checkpoint {
            Some(cp) => {
                tracing::info!(
                    target = %self.target_id,
                    mid_walk = cp.is_mid_walk(),
                    window_start = %cp.window_start,
                    "Resuming from checkpoint"
                );
                let start = Some(cp.window_start).filter(|ts| *ts != DateTime::<Utc>::default());
                Ok(ResumePoint {
                    walk_started_at: cp.walk_started_at.filter(|_| cp.is_mid_walk()),
                    cursor: cp.cursor,
                    window: WindowFilter { start, end },
                })
            }
            None => Ok(ResumePoint {
                cursor: None,
                window: WindowFilter {
                    start: self.config.window.start,
                    end,
                },
                walk_started_at: None,
            }),
        }
    }

    fn prepare_page(
        &self,
        records: &[RawRecord],
        window: &WindowFilter,
        statistics: &mut RunStatistics,
        failed: &mut Vec<FailedRecord>,
        mut observed: Option<&mut ScanObservations>,
    ) -> PreparedPage {
        let mut prepared = PreparedPage {
            records: Vec::with_capacity(records.len()),
            reached_window_end: false,
        };

        for raw in records {
            let verdict = self.classifier.classify(raw);
            if !verdict.keep {
                statistics.classified_noise += 1;
                if let Some(obs) = observed.as_deref_mut() {
                    *obs.noise_reasons.entry(reason_label(verdict.reason)).or_default() += 1;
                }
                tracing::trace!(source_id = %raw.source_id, reason = ?verdict.reason, "Noise dropped");
                continue;
            }

            let normalized = match self.normalizer.normalize(raw) {
                Ok(n) => n,
                Err(err) => {
                    tracing::warn!(source_id = %raw.source_id, error = %err, "Record failed validation");
                    statistics.record_errors += 1;
                    failed.push(FailedRecord {
                        external_id: raw.source_id.clone(),
                        error: err.to_string(),
                    });
                    continue;
                }
            };
            statistics.normalized += 1;
            if normalized.used_default_category {
                statistics.category_fallbacks += 1;
                if let Some(obs) = observed.as_deref_mut() {
                    *obs.unmapped_categories.entry(raw.category.clone()).or_default() += 1;
                }
            }

            let beyond_window = normalized
                .record
                .occurred_at
                .as_ref()
                .and_then(|ts| ts.as_utc())
                .map_or(false, |ts| window.is_after_end(ts));
            if beyond_window {
                statistics.out_of_window += 1;
                prepared.reached_window_end = true;
                continue;
            }

            prepared.records.push(normalized.record);
        }

        prepared
    }
}

struct ResumePoint {
    cursor: Option<String>,
    window: WindowFilter,
    /// Set when resuming a walk an earlier run began
    walk_started_at: Option<DateTime<Utc>>,
}

/// Count a fetched page and move its undecodable nodes into `failed`
fn take_intake(page: &mut Page, statistics: &mut RunStatistics, failed: &mut Vec<FailedRecord>) {
    statistics.fetched += (page.records.len() + page.rejected.len()) as u64;
    statistics.throttled_ms += page.throttled.as_millis() as u64;
    statistics.record_errors += page.rejected.len() as u64;
    failed.append(&mut page.rejected);
}

#[derive(Default)]
struct ScanObservations {
    unmapped_categories: BTreeMap<String, u64>,
    noise_reasons: BTreeMap<String, u64>,
}

fn reason_label(reason: VerdictReason) -> String {
    match reason {
        VerdictReason::Valuable => "VALUABLE",
        VerdictReason::NoisePatternMatch => "NOISE_PATTERN_MATCH",
        VerdictReason::EmptyContent => "EMPTY_CONTENT",
    }
    .to_string()
}

/// Lower bound for the next incremental walk
///
/// `walk_started_at` is when the first run of the finished walk began, so
/// records that arrived while a resumed walk was paused are picked up next
/// time. With an upper bound before that, the next walk starts at the bound.
fn next_window_start(window: &WindowFilter, walk_started_at: DateTime<Utc>) -> DateTime<Utc> {
    window.end.map_or(walk_started_at, |end| end.min(walk_started_at))
}
