//! Source category → canonical category mapping
//!
//! The mapping table is explicit and visible; configuration entries are
//! layered over the built-in table. Unknown categories never fail, they
//! route to the configured default and the caller counts them.

use crate::config::NormalizerConfig;
use crate::error::SyncError;
use crate::models::CanonicalCategory;
use std::collections::HashMap;
use std::str::FromStr;

const AUTOMATED_SUFFIX: &str = "_AUTOMATED";

/// Result of mapping one source category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryMapping {
    pub category: CanonicalCategory,
    /// True when the source category was unknown
    pub used_default: bool,
}

#[derive(Debug, Clone)]
pub struct CategoryMapper {
    mappings: HashMap<String, CanonicalCategory>,
    default_category: CanonicalCategory,
}

impl CategoryMapper {
    /// Built-in table plus configured overrides
    ///
    /// An override naming an unknown canonical category is a configuration error.
    pub fn new(config: &NormalizerConfig) -> Result<Self, SyncError> {
        let default_category = CanonicalCategory::from_str(&config.default_category)
            .map_err(|e| SyncError::Configuration(format!("normalizer.default_category: {}", e)))?;

        let mut mappings = Self::build_default_mappings();
        for (source, canonical) in &config.category_map {
            let category = CanonicalCategory::from_str(canonical).map_err(|e| {
                SyncError::Configuration(format!("normalizer.category_map[{}]: {}", source, e))
            })?;
            mappings.insert(normalize_key(source), category);
        }

        Ok(Self {
            mappings,
            default_category,
        })
    }

    /// Map a source category; `*_AUTOMATED` falls back to its manual counterpart
    pub fn map(&self, source_category: &str) -> CategoryMapping {
        let key = normalize_key(source_category);

        if let Some(category) = self.lookup(&key) {
            return CategoryMapping {
                category,
                used_default: false,
            };
        }

        tracing::debug!(
            source_category,
            default = %self.default_category,
            "Unknown source category, using default"
        );
        CategoryMapping {
            category: self.default_category,
            used_default: true,
        }
    }

    fn lookup(&self, key: &str) -> Option<CanonicalCategory> {
        if let Some(category) = self.mappings.get(key) {
            return Some(*category);
        }
        let base = key.strip_suffix(AUTOMATED_SUFFIX)?;
        self.mappings
            .get(base)
            .or_else(|| self.mappings.get(&format!("{}_MANUAL", base)))
            .copied()
    }

    fn build_default_mappings() -> HashMap<String, CanonicalCategory> {
        use CanonicalCategory::*;

        let table: &[(&str, CanonicalCategory)] = &[
            // Service history
            ("SERVICE_ENTRY_MANUAL", Service),
            ("SERVICE_ENTRY", Service),
            ("SERVICE", Service),
            ("TUNING", Service),
            ("REPAIR", Service),
            // Notes
            ("NOTE", Note),
            ("USER_COMMENT", Note),
            ("CLIENT_NOTE", Note),
            ("PIANO_NOTE", Note),
            // Scheduling
            ("APPOINTMENT", Appointment),
            ("APPOINTMENT_CREATED", Appointment),
            ("APPOINTMENT_UPDATED", Appointment),
            ("APPOINTMENT_DELETED", Appointment),
            ("APPOINTMENT_CANCELLED", Appointment),
            ("APPOINTMENT_RESCHEDULED", Appointment),
            ("APPOINTMENT_COMPLETED", Appointment),
            ("APPOINTMENT_CONFIRMED", Appointment),
            // Client contact
            ("CONTACT_EMAIL", Contact),
            ("CONTACT_PHONE", Contact),
            ("CONTACT_TEXT", Contact),
            ("EMAIL", Contact),
            ("PHONE_CALL", Contact),
            ("SMS", Contact),
            ("EMAIL_SUBSCRIPTION_CHANGED", Contact),
            // Billing
            ("INVOICE", Invoice),
            ("INVOICE_CREATED", Invoice),
            ("INVOICE_SENT", Invoice),
            ("INVOICE_PAID", Invoice),
            ("INVOICE_PAYMENT", Invoice),
            ("INVOICE_VOIDED", Invoice),
            ("ESTIMATE", Estimate),
            ("ESTIMATE_CREATED", Estimate),
            ("ESTIMATE_SENT", Estimate),
            ("ESTIMATE_ACCEPTED", Estimate),
            ("ESTIMATE_DECLINED", Estimate),
            // Instrument readings
            ("PIANO_MEASUREMENT", Measurement),
            ("MEASUREMENT", Measurement),
            // Platform
            ("SYSTEM_NOTIFICATION", System),
            ("SYSTEM_MESSAGE", System),
            ("SYSTEM", System),
        ];

        table
            .iter()
            .map(|(source, category)| (source.to_string(), *category))
            .collect()
    }
}

fn normalize_key(source_category: &str) -> String {
    source_category.trim().to_ascii_uppercase()
}
