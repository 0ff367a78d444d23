//! Noise filter for fetched records
//!
//! Separates operator-valuable entries (service notes, comments,
//! measurements) from automated noise (email delivery receipts, bare
//! appointment lifecycle notices, empty administrative entries).

use crate::config::ClassifierConfig;
use crate::error::SyncError;
use crate::models::RawRecord;
use regex::{Regex, RegexBuilder};
use serde::Serialize;
use std::collections::HashSet;

/// Prefix marking a configured pattern as a regex
const REGEX_PREFIX: &str = "re:";

/// Why a record was kept or dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerdictReason {
    Valuable,
    NoisePatternMatch,
    EmptyContent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClassificationVerdict {
    pub keep: bool,
    pub reason: VerdictReason,
}

impl ClassificationVerdict {
    fn valuable() -> Self {
        Self {
            keep: true,
            reason: VerdictReason::Valuable,
        }
    }

    fn noise(reason: VerdictReason) -> Self {
        Self { keep: false, reason }
    }
}

#[derive(Debug, Clone)]
enum NoisePattern {
    /// Lowercased needle, matched against lowercased text
    Substring(String),
    /// Compiled case-insensitive
    Regex(Regex),
}

impl NoisePattern {
    fn parse(raw: &str) -> Result<Self, SyncError> {
        match raw.strip_prefix(REGEX_PREFIX) {
            Some(expr) => RegexBuilder::new(expr)
                .case_insensitive(true)
                .build()
                .map(NoisePattern::Regex)
                .map_err(|e| {
                    SyncError::Configuration(format!(
                        "classifier.noise_patterns: invalid regex '{}': {}",
                        expr, e
                    ))
                }),
            None => Ok(NoisePattern::Substring(raw.to_lowercase())),
        }
    }

    fn matches(&self, text: &str, lowered: &str) -> bool {
        match self {
            NoisePattern::Substring(needle) => !needle.is_empty() && lowered.contains(needle.as_str()),
            NoisePattern::Regex(re) => re.is_match(text),
        }
    }
}

/// Deterministic keep/drop decision for raw records
#[derive(Debug, Clone)]
pub struct ValueClassifier {
    patterns: Vec<NoisePattern>,
    empty_content_categories: HashSet<String>,
}

impl ValueClassifier {
    /// Compile the configured patterns; an invalid regex is a configuration error
    pub fn new(config: &ClassifierConfig) -> Result<Self, SyncError> {
        let patterns = config
            .noise_patterns
            .iter()
            .map(|p| NoisePattern::parse(p))
            .collect::<Result<Vec<_>, _>>()?;

        let empty_content_categories = config
            .empty_content_categories
            .iter()
            .map(|c| c.trim().to_uppercase())
            .collect();

        Ok(Self {
            patterns,
            empty_content_categories,
        })
    }

    /// First matching rule wins: empty admin entry, noise pattern, else valuable
    pub fn classify(&self, record: &RawRecord) -> ClassificationVerdict {
        if record.has_no_text()
            && self
                .empty_content_categories
                .contains(&record.category.trim().to_uppercase())
        {
            return ClassificationVerdict::noise(VerdictReason::EmptyContent);
        }

        let text = record.combined_text();
        if !text.is_empty() {
            let lowered = text.to_lowercase();
            if self.patterns.iter().any(|p| p.matches(&text, &lowered)) {
                return ClassificationVerdict::noise(VerdictReason::NoisePatternMatch);
            }
        }

        ClassificationVerdict::valuable()
    }
}
