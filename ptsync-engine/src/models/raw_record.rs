//! As-fetched source records
//!
//! Field names follow the source's JSON node shape so a page deserializes
//! straight into these types. Every field except `id` is optional on the wire;
//! an explicit `null` id or type decodes as empty and is rejected downstream.

use super::FailedRecord;
use serde::{Deserialize, Deserializer, Serialize};

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// A nested parent object (`client { id }`, `piano { id }`, ...)
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ParentObject {
    #[serde(default)]
    pub id: Option<String>,
}

/// Optional references to related entities
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct RawParentRefs {
    /// Owning client
    #[serde(default)]
    pub client: Option<ParentObject>,
    /// Owning piano
    #[serde(default)]
    pub piano: Option<ParentObject>,
    /// Related invoice
    #[serde(default)]
    pub invoice: Option<ParentObject>,
    /// Acting user
    #[serde(default)]
    pub user: Option<ParentObject>,
}

/// One timeline entry as returned by the source
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct RawRecord {
    /// Stable source identifier
    #[serde(rename = "id", default, deserialize_with = "null_as_empty")]
    pub source_id: String,

    /// Source category vocabulary (may be unknown to the mapper)
    #[serde(rename = "type", default, deserialize_with = "null_as_empty")]
    pub category: String,

    /// Timestamp as sent; may lack an offset
    #[serde(rename = "occurredAt", default)]
    pub occurred_at: Option<String>,

    /// Summary line
    #[serde(rename = "summary", default)]
    pub title: Option<String>,

    /// Comment body
    #[serde(rename = "comment", default)]
    pub body: Option<String>,

    #[serde(flatten)]
    pub parents: RawParentRefs,
}

impl RawRecord {
    /// Title and body joined with a newline, skipping empty parts
    pub fn combined_text(&self) -> String {
        [self.title.as_deref(), self.body.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// True when neither free-text field has non-whitespace content
    pub fn has_no_text(&self) -> bool {
        let blank = |s: &Option<String>| s.as_deref().map_or(true, |t| t.trim().is_empty());
        blank(&self.title) && blank(&self.body)
    }
}

/// One page from the Fetch capability
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawPage {
    pub records: Vec<RawRecord>,
    /// Nodes on this page that could not be decoded into a [`RawRecord`]
    pub rejected: Vec<FailedRecord>,
    /// Opaque continuation token for the next call
    pub next_cursor: Option<String>,
    pub has_more: bool,
}
