//! Raw record → destination record
//!
//! Derives the idempotency key, maps the category, converts timestamps to
//! UTC, resolves parent references, extracts measurements from the full
//! text and truncates the text fields.

use crate::config::NormalizerConfig;
use crate::error::{SyncError, ValidationError};
use crate::models::{
    NormalizedRecord, NormalizedTimestamp, ParentObject, ParentRefs, RawRecord,
};
use crate::services::category_mapper::CategoryMapper;
use crate::services::measurement_extractor::MeasurementExtractor;
use crate::utils::truncate_chars;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

/// Longest accepted source id
pub const MAX_SOURCE_ID_CHARS: usize = 255;

/// Naive date-time shapes assumed to be UTC
const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Offset forms `parse_from_rfc3339` rejects ("+0000", space separator)
const OFFSET_DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%:z"];

/// Output of a successful normalization
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub record: NormalizedRecord,
    /// Source category was unknown and routed to the default
    pub used_default_category: bool,
}

#[derive(Debug, Clone)]
pub struct FieldNormalizer {
    mapper: CategoryMapper,
    extractor: MeasurementExtractor,
    title_max_chars: usize,
    description_max_chars: usize,
}

impl FieldNormalizer {
    pub fn new(config: &NormalizerConfig) -> Result<Self, SyncError> {
        Ok(Self {
            mapper: CategoryMapper::new(config)?,
            extractor: MeasurementExtractor::new(),
            title_max_chars: config.title_max_chars,
            description_max_chars: config.description_max_chars,
        })
    }

    pub fn normalize(&self, raw: &RawRecord) -> Result<Normalized, ValidationError> {
        let external_id = validate_source_id(&raw.source_id)?;
        let mapping = self.mapper.map(&raw.category);

        // Extraction sees the full text; truncation comes after
        let measurements = self.extractor.extract(&raw.combined_text());

        let record = NormalizedRecord {
            external_id,
            category: mapping.category,
            source_category: raw.category.clone(),
            title: non_blank(raw.title.as_deref())
                .map(|t| truncate_chars(t, self.title_max_chars)),
            description: non_blank(raw.body.as_deref())
                .map(|d| truncate_chars(d, self.description_max_chars)),
            occurred_at: raw.occurred_at.as_deref().and_then(parse_timestamp),
            parent_refs: ParentRefs {
                client_id: parent_id(&raw.parents.client),
                piano_id: parent_id(&raw.parents.piano),
                invoice_id: parent_id(&raw.parents.invoice),
                user_id: parent_id(&raw.parents.user),
            },
            metadata: measurements.to_metadata(),
        };

        Ok(Normalized {
            record,
            used_default_category: mapping.used_default,
        })
    }
}

fn validate_source_id(source_id: &str) -> Result<String, ValidationError> {
    if source_id.trim().is_empty() {
        return Err(ValidationError::MissingSourceId);
    }
    let len = source_id.chars().count();
    if len > MAX_SOURCE_ID_CHARS {
        return Err(ValidationError::SourceIdTooLong {
            len,
            max: MAX_SOURCE_ID_CHARS,
        });
    }
    Ok(source_id.to_string())
}

fn non_blank(text: Option<&str>) -> Option<&str> {
    text.map(str::trim).filter(|t| !t.is_empty())
}

fn parent_id(parent: &Option<ParentObject>) -> Option<String> {
    parent
        .as_ref()
        .and_then(|p| non_blank(p.id.as_deref()))
        .map(String::from)
}

/// Parse a source timestamp; `None` only when the input is blank
///
/// Offsets are converted to UTC, naive values are assumed UTC, and anything
/// unparseable is kept verbatim.
pub fn parse_timestamp(raw: &str) -> Option<NormalizedTimestamp> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(NormalizedTimestamp::Utc(dt.with_timezone(&Utc)));
    }
    for format in OFFSET_DATETIME_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(value, format) {
            return Some(NormalizedTimestamp::Utc(dt.with_timezone(&Utc)));
        }
    }
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(NormalizedTimestamp::Utc(Utc.from_utc_datetime(&naive)));
        }
    }
    if let Some(naive) = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    {
        return Some(NormalizedTimestamp::Utc(Utc.from_utc_datetime(&naive)));
    }

    tracing::debug!(raw = value, "Unparseable timestamp kept verbatim");
    Some(NormalizedTimestamp::Unparsed(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CanonicalCategory, RawParentRefs};

    fn normalizer() -> FieldNormalizer {
        FieldNormalizer::new(&NormalizerConfig::default()).unwrap()
    }

    fn raw(id: &str, category: &str) -> RawRecord {
        RawRecord {
            source_id: id.into(),
            category: category.into(),
            ..Default::default()
        }
    }

    fn utc(ts: &str) -> String {
        parse_timestamp(ts).unwrap().to_storage_string()
    }

    #[test]
    fn test_timestamp_with_offset_converted_to_utc() {
        assert_eq!(utc("2024-03-05T09:30:00-05:00"), "2024-03-05T14:30:00Z");
        assert_eq!(utc("2024-03-05T09:30:00+0200"), "2024-03-05T07:30:00Z");
        assert_eq!(utc("2024-03-05T09:30:00Z"), "2024-03-05T09:30:00Z");
    }

    #[test]
    fn test_naive_timestamps_assumed_utc() {
        assert_eq!(utc("2024-03-05T09:30:00"), "2024-03-05T09:30:00Z");
        assert_eq!(utc("2024-03-05 09:30:00.250"), "2024-03-05T09:30:00.250Z");
        assert_eq!(utc("2024-03-05 09:30"), "2024-03-05T09:30:00Z");
        assert_eq!(utc("2024-03-05"), "2024-03-05T00:00:00Z");
    }

    #[test]
    fn test_unparseable_timestamp_kept() {
        assert_eq!(
            parse_timestamp("next tuesday"),
            Some(NormalizedTimestamp::Unparsed("next tuesday".into()))
        );
        assert_eq!(parse_timestamp("  "), None);
    }

    #[test]
    fn test_full_record() {
        let mut r = raw("tle_42", "SERVICE_ENTRY_AUTOMATED");
        r.occurred_at = Some("2024-01-10T08:00:00-08:00".into());
        r.title = Some("  Tuning  ".into());
        r.body = Some("Tuned to 440Hz. Humidity 38%, temp 68F".into());
        r.parents = RawParentRefs {
            client: Some(ParentObject { id: Some("cli_1".into()) }),
            piano: Some(ParentObject { id: None }),
            invoice: None,
            user: Some(ParentObject { id: Some("usr_9".into()) }),
        };

        let out = normalizer().normalize(&r).unwrap();
        assert!(!out.used_default_category);

        let rec = out.record;
        assert_eq!(rec.external_id, "tle_42");
        assert_eq!(rec.category, CanonicalCategory::Service);
        assert_eq!(rec.source_category, "SERVICE_ENTRY_AUTOMATED");
        assert_eq!(rec.title.as_deref(), Some("Tuning"));
        assert_eq!(
            rec.occurred_at.unwrap().as_utc(),
            Some(Utc.with_ymd_and_hms(2024, 1, 10, 16, 0, 0).unwrap())
        );
        assert_eq!(rec.parent_refs.client_id.as_deref(), Some("cli_1"));
        assert_eq!(rec.parent_refs.piano_id, None);
        assert_eq!(rec.parent_refs.invoice_id, None);
        assert_eq!(rec.parent_refs.user_id.as_deref(), Some("usr_9"));

        let metadata = rec.metadata.unwrap();
        assert_eq!(metadata["frequency"], 440.0);
        assert_eq!(metadata["humidity"], 38.0);
        assert_eq!(metadata["temperature"], 68.0);
    }

    #[test]
    fn test_unknown_category_flagged() {
        let out = normalizer().normalize(&raw("tle_1", "SOMETHING_NEW")).unwrap();
        assert_eq!(out.record.category, CanonicalCategory::Note);
        assert!(out.used_default_category);
    }

    #[test]
    fn test_missing_source_id_rejected() {
        assert_eq!(
            normalizer().normalize(&raw("  ", "NOTE")).unwrap_err(),
            ValidationError::MissingSourceId
        );
    }

    #[test]
    fn test_overlong_source_id_rejected() {
        let id = "x".repeat(MAX_SOURCE_ID_CHARS + 1);
        assert!(matches!(
            normalizer().normalize(&raw(&id, "NOTE")),
            Err(ValidationError::SourceIdTooLong { .. })
        ));
    }

    #[test]
    fn test_truncation_after_extraction() {
        let config = NormalizerConfig {
            description_max_chars: 10,
            ..Default::default()
        };
        let n = FieldNormalizer::new(&config).unwrap();

        let mut r = raw("tle_7", "NOTE");
        r.body = Some("Long note before the reading, humidity 51%".into());

        let rec = n.normalize(&r).unwrap().record;
        assert_eq!(rec.description.as_deref(), Some("Long note "));
        assert_eq!(rec.metadata.unwrap()["humidity"], 51.0);
    }

    #[test]
    fn test_no_measurements_no_metadata() {
        let mut r = raw("tle_8", "NOTE");
        r.body = Some("Client will call back".into());
        assert!(normalizer().normalize(&r).unwrap().record.metadata.is_none());
    }
}
