//! GraphQL timeline source
//!
//! Fetch capability over the remote business-records API. Pages through
//! `allTimelineEntries` with `first`/`after` and reports `pageInfo` verbatim.
//! Rate limiting and retries are applied by the page walker, not here.

use crate::config::SourceConfig;
use crate::error::{FetchError, SyncError, SyncResult};
use crate::models::{FailedRecord, RawPage, RawRecord};
use crate::types::{RecordSource, TokenProvider, WindowFilter};
use async_trait::async_trait;
use chrono::SecondsFormat;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const USER_AGENT: &str = concat!("ptsync/", env!("CARGO_PKG_VERSION"));

const TIMELINE_QUERY: &str = r#"
query TimelineEntries($first: Int!, $after: String, $filters: TimelineEntryFilters) {
  allTimelineEntries(first: $first, after: $after, filters: $filters) {
    nodes {
      id
      type
      occurredAt
      summary
      comment
      client { id }
      piano { id }
      invoice { id }
      user { id }
    }
    pageInfo {
      hasNextPage
      endCursor
    }
  }
}
"#;

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<TimelineData>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct TimelineData {
    #[serde(rename = "allTimelineEntries")]
    entries: Option<TimelineConnection>,
}

#[derive(Debug, Deserialize)]
struct TimelineConnection {
    /// Kept as raw JSON so one malformed node cannot sink the page
    #[serde(default)]
    nodes: Vec<Value>,
    #[serde(rename = "pageInfo")]
    page_info: PageInfo,
}

#[derive(Debug, Deserialize)]
struct PageInfo {
    #[serde(rename = "hasNextPage")]
    has_next_page: bool,
    #[serde(rename = "endCursor")]
    end_cursor: Option<String>,
}

/// Token supplied up front (configuration or `PTSYNC_API_TOKEN`)
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn bearer_token(&self) -> Result<String, FetchError> {
        Ok(self.token.clone())
    }
}

/// HTTP GraphQL implementation of [`RecordSource`]
pub struct GraphQlRecordSource {
    http_client: reqwest::Client,
    endpoint: reqwest::Url,
    tokens: Arc<dyn TokenProvider>,
    request_timeout: Duration,
}

impl GraphQlRecordSource {
    pub fn new(
        endpoint: &str,
        tokens: Arc<dyn TokenProvider>,
        request_timeout: Duration,
    ) -> SyncResult<Self> {
        let endpoint = reqwest::Url::parse(endpoint).map_err(|e| {
            SyncError::Configuration(format!("source.endpoint '{}' is not a URL: {}", endpoint, e))
        })?;

        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(request_timeout)
            .build()
            .map_err(|e| SyncError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            endpoint,
            tokens,
            request_timeout,
        })
    }

    /// Build from `[source]`; endpoint and token are both required
    pub fn from_config(config: &SourceConfig) -> SyncResult<Self> {
        let endpoint = config
            .endpoint
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| {
                SyncError::Configuration(
                    "source.endpoint is not set (config file or PTSYNC_ENDPOINT)".into(),
                )
            })?;
        let token = config
            .api_token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| SyncError::Configuration("PTSYNC_API_TOKEN is not set".into()))?;

        Self::new(
            endpoint,
            Arc::new(StaticTokenProvider::new(token)),
            Duration::from_secs(config.request_timeout_secs),
        )
    }
}

#[async_trait]
impl RecordSource for GraphQlRecordSource {
    fn name(&self) -> &str {
        "graphql"
    }

    async fn fetch_page(
        &self,
        cursor: Option<&str>,
        page_size: u32,
        window: &WindowFilter,
    ) -> Result<RawPage, FetchError> {
        let token = self.tokens.bearer_token().await?;
        let body = json!({
            "query": TIMELINE_QUERY,
            "variables": query_variables(cursor, page_size, window),
        });

        tracing::debug!(endpoint = %self.endpoint, page_size, "Querying timeline entries");

        let response = self
            .http_client
            .post(self.endpoint.clone())
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_request_error(e, self.request_timeout))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| map_request_error(e, self.request_timeout))?;
        interpret_response(status, &text)
    }
}

fn query_variables(cursor: Option<&str>, page_size: u32, window: &WindowFilter) -> Value {
    let mut filters = serde_json::Map::new();
    if let Some(start) = window.start {
        filters.insert(
            "occurredAtGet".into(),
            json!(start.to_rfc3339_opts(SecondsFormat::Secs, true)),
        );
    }
    if let Some(end) = window.end {
        filters.insert(
            "occurredAtLet".into(),
            json!(end.to_rfc3339_opts(SecondsFormat::Secs, true)),
        );
    }

    json!({
        "first": page_size,
        "after": cursor,
        "filters": if filters.is_empty() { Value::Null } else { Value::Object(filters) },
    })
}

fn map_request_error(err: reqwest::Error, request_timeout: Duration) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout(request_timeout)
    } else if err.is_decode() || err.is_builder() {
        FetchError::Permanent(err.to_string())
    } else {
        FetchError::Transient(err.to_string())
    }
}

/// Map an HTTP status and body onto a page or a classified error
fn interpret_response(status: StatusCode, body: &str) -> Result<RawPage, FetchError> {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        return Err(FetchError::Transient(format!("HTTP {}: {}", status, snippet(body))));
    }
    if !status.is_success() {
        return Err(FetchError::Permanent(format!("HTTP {}: {}", status, snippet(body))));
    }

    let parsed: GraphQlResponse = serde_json::from_str(body)
        .map_err(|e| FetchError::Permanent(format!("Unparseable response: {}", e)))?;

    if let Some(err) = parsed.errors.first() {
        let lowered = err.message.to_lowercase();
        return Err(if lowered.contains("cursor") {
            FetchError::MalformedCursor(err.message.clone())
        } else if lowered.contains("rate limit") || lowered.contains("throttl") {
            FetchError::Transient(err.message.clone())
        } else {
            FetchError::Permanent(format!("GraphQL error: {}", err.message))
        });
    }

    let connection = parsed
        .data
        .and_then(|d| d.entries)
        .ok_or_else(|| FetchError::Permanent("Response has no allTimelineEntries".into()))?;

    let mut page = RawPage {
        next_cursor: connection.page_info.end_cursor,
        has_more: connection.page_info.has_next_page,
        ..Default::default()
    };
    for (index, node) in connection.nodes.into_iter().enumerate() {
        match decode_node(index, node) {
            Ok(record) => page.records.push(record),
            Err(rejected) => {
                tracing::warn!(
                    external_id = %rejected.external_id,
                    error = %rejected.error,
                    "Skipping undecodable timeline node"
                );
                page.rejected.push(rejected);
            }
        }
    }
    Ok(page)
}

/// Decode one node, naming it by its id when that much is readable
fn decode_node(index: usize, node: Value) -> Result<RawRecord, FailedRecord> {
    let external_id = node
        .get("id")
        .and_then(Value::as_str)
        .map_or_else(|| format!("<node {} without id>", index), String::from);

    serde_json::from_value(node).map_err(|e| FailedRecord {
        external_id,
        error: format!("Undecodable node: {}", e),
    })
}

fn snippet(body: &str) -> String {
    crate::utils::truncate_chars(body.trim(), 200)
}
