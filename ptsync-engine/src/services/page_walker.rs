//! Cursor pagination over the Fetch capability
//!
//! The walker forwards the exact cursor the source returned and never builds
//! one itself, so any previously returned cursor is a valid restart point.
//! Every fetch attempt (retries included) passes through the rate limiter
//! and a per-call timeout.

use crate::config::SyncConfig;
use crate::error::FetchError;
use crate::models::{FailedRecord, RawRecord};
use crate::services::rate_limiter::RateLimiter;
use crate::types::{RecordSource, WindowFilter};
use crate::utils::RetryPolicy;
use async_stream::try_stream;
use futures::Stream;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A fetched page, validated against the pagination contract
#[derive(Debug, Clone)]
pub struct Page {
    pub records: Vec<RawRecord>,
    /// Nodes the source returned that did not decode
    pub rejected: Vec<FailedRecord>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
    /// Fetch attempts spent on this page
    pub attempts: u32,
    /// Time spent held back by the rate limiter across all attempts
    pub throttled: Duration,
}

impl Page {
    /// No further page should be requested after this one
    ///
    /// A page whose every node was rejected still counts as non-empty.
    pub fn is_last(&self) -> bool {
        !self.has_more || (self.records.is_empty() && self.rejected.is_empty())
    }
}

/// Walker settings fixed for one run
#[derive(Debug, Clone)]
pub struct PageWalkerSettings {
    pub page_size: u32,
    pub min_interval: Duration,
    pub call_timeout: Duration,
    pub retry: RetryPolicy,
}

impl PageWalkerSettings {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            page_size: config.source.page_size,
            min_interval: config.min_request_interval(),
            call_timeout: config.request_timeout(),
            retry: config.fetch_retry_policy(),
        }
    }
}

pub struct PageWalker {
    source: Arc<dyn RecordSource>,
    rate_limiter: RateLimiter,
    settings: PageWalkerSettings,
    window: WindowFilter,
}

impl PageWalker {
    pub fn new(source: Arc<dyn RecordSource>, settings: PageWalkerSettings, window: WindowFilter) -> Self {
        Self {
            source,
            rate_limiter: RateLimiter::new(settings.min_interval),
            settings,
            window,
        }
    }

    /// Fetch the page at `cursor` (`None` = first page)
    ///
    /// Transient failures are retried under the fetch policy; exhausting it
    /// yields [`FetchError::RetriesExhausted`]. Permanent failures and
    /// pagination contract violations return immediately.
    pub async fn next_page(&self, cursor: Option<&str>) -> Result<Page, FetchError> {
        let call_timeout = self.settings.call_timeout;
        let throttled_us = AtomicU64::new(0);
        let throttled_us = &throttled_us;

        let outcome = self
            .settings
            .retry
            .run("fetch_page", FetchError::is_transient, |attempt| async move {
                let waited = self.rate_limiter.wait().await;
                throttled_us.fetch_add(waited.as_micros() as u64, Ordering::Relaxed);

                tracing::debug!(
                    source = self.source.name(),
                    cursor = cursor.unwrap_or("<start>"),
                    attempt,
                    "Fetching page"
                );

                match tokio::time::timeout(
                    call_timeout,
                    self.source
                        .fetch_page(cursor, self.settings.page_size, &self.window),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(FetchError::Timeout(call_timeout)),
                }
            })
            .await;

        let attempts = outcome.attempts;
        let raw = match outcome.result {
            Ok(raw) => raw,
            Err(err) if err.is_transient() => {
                return Err(FetchError::RetriesExhausted {
                    attempts,
                    last: Box::new(err),
                })
            }
            Err(err) => return Err(err),
        };

        let page = Page {
            records: raw.records,
            rejected: raw.rejected,
            next_cursor: raw.next_cursor,
            has_more: raw.has_more,
            attempts,
            throttled: Duration::from_micros(throttled_us.load(Ordering::Relaxed)),
        };
        validate_pagination(cursor, &page)?;

        tracing::debug!(
            source = self.source.name(),
            records = page.records.len(),
            rejected = page.rejected.len(),
            has_more = page.has_more,
            "Page fetched"
        );

        Ok(page)
    }

    /// Lazy sequence of pages starting at `start_cursor`
    ///
    /// Ends after the last page, or after yielding the first fatal error.
    pub fn pages(
        &self,
        start_cursor: Option<String>,
    ) -> impl Stream<Item = Result<Page, FetchError>> + '_ {
        try_stream! {
            let mut cursor = start_cursor;
            loop {
                let page = self.next_page(cursor.as_deref()).await?;
                let last = page.is_last();
                let next = page.next_cursor.clone();
                yield page;
                if last {
                    break;
                }
                cursor = next;
            }
        }
    }
}

/// A page that promises more must hand back a usable, advancing cursor
fn validate_pagination(current: Option<&str>, page: &Page) -> Result<(), FetchError> {
    if page.is_last() {
        return Ok(());
    }

    match page.next_cursor.as_deref() {
        None => Err(FetchError::MalformedCursor(
            "source reported more pages but returned no cursor".to_string(),
        )),
        Some(next) if next.trim().is_empty() => Err(FetchError::MalformedCursor(
            "source reported more pages but returned an empty cursor".to_string(),
        )),
        Some(next) if Some(next) == current => Err(FetchError::MalformedCursor(format!(
            "cursor did not advance past '{}'",
            next
        ))),
        Some(_) => Ok(()),
    }
}
