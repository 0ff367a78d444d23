//! Scripted in-memory record source
//!
//! Serves a fixed record list in pages. Cursors are opaque strings of the
//! form `offset:N`, so any returned cursor is a valid restart point.

use async_trait::async_trait;
use ptsync_engine::error::FetchError;
use ptsync_engine::models::{ParentObject, RawPage, RawParentRefs, RawRecord};
use ptsync_engine::types::{RecordSource, WindowFilter};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Build a raw record as the source would send it
pub fn raw_record(
    id: &str,
    category: &str,
    body: Option<&str>,
    occurred_at: &str,
    client: Option<&str>,
) -> RawRecord {
    RawRecord {
        source_id: id.to_string(),
        category: category.to_string(),
        occurred_at: Some(occurred_at.to_string()),
        title: None,
        body: body.map(String::from),
        parents: RawParentRefs {
            client: client.map(|c| ParentObject {
                id: Some(c.to_string()),
            }),
            ..Default::default()
        },
    }
}

pub struct PagedSource {
    records: Vec<RawRecord>,
    /// Errors returned instead of a page, keyed by 1-based call number
    failures: Mutex<HashMap<usize, FetchError>>,
    /// Cancel this token when the given call number is served
    cancel_on_call: Mutex<Option<(usize, CancellationToken)>>,
    calls: Mutex<Vec<(Instant, Option<String>)>>,
}

impl PagedSource {
    pub fn new(records: Vec<RawRecord>) -> Self {
        Self {
            records,
            failures: Mutex::new(HashMap::new()),
            cancel_on_call: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_call(self, call: usize, error: FetchError) -> Self {
        self.failures.lock().unwrap().insert(call, error);
        self
    }

    pub fn cancel_on_call(self, call: usize, token: CancellationToken) -> Self {
        *self.cancel_on_call.lock().unwrap() = Some((call, token));
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn cursors(&self) -> Vec<Option<String>> {
        self.calls.lock().unwrap().iter().map(|(_, c)| c.clone()).collect()
    }

    pub fn call_instants(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().iter().map(|(t, _)| *t).collect()
    }
}

#[async_trait]
impl RecordSource for PagedSource {
    fn name(&self) -> &str {
        "paged-fake"
    }

    async fn fetch_page(
        &self,
        cursor: Option<&str>,
        page_size: u32,
        _window: &WindowFilter,
    ) -> Result<RawPage, FetchError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((Instant::now(), cursor.map(String::from)));
            calls.len()
        };

        if let Some((on_call, token)) = self.cancel_on_call.lock().unwrap().as_ref() {
            if *on_call == call {
                token.cancel();
            }
        }
        if let Some(err) = self.failures.lock().unwrap().remove(&call) {
            return Err(err);
        }

        let start = match cursor {
            None => 0,
            Some(c) => c
                .strip_prefix("offset:")
                .and_then(|n| n.parse::<usize>().ok())
                .ok_or_else(|| FetchError::MalformedCursor(format!("unknown cursor {}", c)))?,
        };
        let end = (start + page_size as usize).min(self.records.len());
        let has_more = end < self.records.len();

        Ok(RawPage {
            records: self.records[start.min(end)..end].to_vec(),
            next_cursor: has_more.then(|| format!("offset:{}", end)),
            has_more,
            ..Default::default()
        })
    }
}
