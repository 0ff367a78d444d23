//! Destination-schema records

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Fixed destination enumeration of record types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CanonicalCategory {
    Service,
    Note,
    Appointment,
    Contact,
    Invoice,
    Estimate,
    Measurement,
    System,
}

impl CanonicalCategory {
    pub const ALL: [CanonicalCategory; 8] = [
        CanonicalCategory::Service,
        CanonicalCategory::Note,
        CanonicalCategory::Appointment,
        CanonicalCategory::Contact,
        CanonicalCategory::Invoice,
        CanonicalCategory::Estimate,
        CanonicalCategory::Measurement,
        CanonicalCategory::System,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CanonicalCategory::Service => "SERVICE",
            CanonicalCategory::Note => "NOTE",
            CanonicalCategory::Appointment => "APPOINTMENT",
            CanonicalCategory::Contact => "CONTACT",
            CanonicalCategory::Invoice => "INVOICE",
            CanonicalCategory::Estimate => "ESTIMATE",
            CanonicalCategory::Measurement => "MEASUREMENT",
            CanonicalCategory::System => "SYSTEM",
        }
    }
}

impl fmt::Display for CanonicalCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CanonicalCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase();
        CanonicalCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == wanted)
            .ok_or_else(|| format!("unknown canonical category '{}'", s))
    }
}

/// Which parent reference a value belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParentKind {
    Client,
    Piano,
    Invoice,
    User,
}

impl ParentKind {
    pub const ALL: [ParentKind; 4] = [
        ParentKind::Client,
        ParentKind::Piano,
        ParentKind::Invoice,
        ParentKind::User,
    ];

    /// Column name on the destination record
    pub fn column(&self) -> &'static str {
        match self {
            ParentKind::Client => "client_id",
            ParentKind::Piano => "piano_id",
            ParentKind::Invoice => "invoice_id",
            ParentKind::User => "user_id",
        }
    }

    /// Table holding the referenced parent rows
    pub fn table(&self) -> &'static str {
        match self {
            ParentKind::Client => "clients",
            ParentKind::Piano => "pianos",
            ParentKind::Invoice => "invoices",
            ParentKind::User => "users",
        }
    }
}

/// Resolved parent references
///
/// Serialization always emits all four keys; absent references are `null`,
/// never omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentRefs {
    pub client_id: Option<String>,
    pub piano_id: Option<String>,
    pub invoice_id: Option<String>,
    pub user_id: Option<String>,
}

impl ParentRefs {
    pub fn get(&self, kind: ParentKind) -> Option<&str> {
        match kind {
            ParentKind::Client => self.client_id.as_deref(),
            ParentKind::Piano => self.piano_id.as_deref(),
            ParentKind::Invoice => self.invoice_id.as_deref(),
            ParentKind::User => self.user_id.as_deref(),
        }
    }

    pub fn clear(&mut self, kind: ParentKind) {
        match kind {
            ParentKind::Client => self.client_id = None,
            ParentKind::Piano => self.piano_id = None,
            ParentKind::Invoice => self.invoice_id = None,
            ParentKind::User => self.user_id = None,
        }
    }

    /// Kinds that currently hold a value
    pub fn present(&self) -> Vec<ParentKind> {
        ParentKind::ALL
            .into_iter()
            .filter(|k| self.get(*k).is_some())
            .collect()
    }
}

/// Timestamp after normalization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NormalizedTimestamp {
    /// Parsed and converted to UTC
    Utc(DateTime<Utc>),
    /// Could not be parsed; kept verbatim
    Unparsed(String),
}

impl NormalizedTimestamp {
    /// Value written to the destination column
    pub fn to_storage_string(&self) -> String {
        match self {
            NormalizedTimestamp::Utc(dt) => dt.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            NormalizedTimestamp::Unparsed(raw) => raw.clone(),
        }
    }

    pub fn as_utc(&self) -> Option<DateTime<Utc>> {
        match self {
            NormalizedTimestamp::Utc(dt) => Some(*dt),
            NormalizedTimestamp::Unparsed(_) => None,
        }
    }
}

/// Numeric signals extracted from free text
///
/// `None` means "not found", which is distinct from a value of zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Measurements {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency: Option<f64>,
}

impl Measurements {
    pub fn is_empty(&self) -> bool {
        self.humidity.is_none() && self.temperature.is_none() && self.frequency.is_none()
    }

    /// JSON object with only the found quantities, or `None` if nothing was found
    pub fn to_metadata(&self) -> Option<serde_json::Value> {
        if self.is_empty() {
            return None;
        }
        serde_json::to_value(self).ok()
    }
}

/// Record in destination shape, keyed by `external_id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    /// Idempotency key; equals the source id
    pub external_id: String,
    pub category: CanonicalCategory,
    /// Original source category, kept for auditing the mapping
    pub source_category: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub occurred_at: Option<NormalizedTimestamp>,
    pub parent_refs: ParentRefs,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub metadata: Option<serde_json::Value>,
}
