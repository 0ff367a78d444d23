//! Humidity, temperature and pitch frequency from free-text service notes
//!
//! Technicians write readings in many shapes ("RH 42%", "68F", "22°C",
//! "tuned to 440 Hz"). Each quantity has an ordered rule list; the first
//! rule that matches wins and later rules are not consulted.

use crate::models::Measurements;
use once_cell::sync::Lazy;
use regex::Regex;

/// Readings above this are taken as Fahrenheit
const FAHRENHEIT_THRESHOLD: f64 = 100.0;

fn ci(pattern: &str) -> Regex {
    Regex::new(&format!("(?i){}", pattern)).expect("valid measurement regex")
}

static HUMIDITY_RULES: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        // "humidity: 45%", "relative humidity at 38.5 %", "RH 42%"
        ci(r"(?:\bhumidity|\brh)\b\s*(?:of|at|is|was|:|=)?\s*(\d{1,3}(?:\.\d+)?)\s*%"),
        // "42% RH"
        ci(r"(\d{1,3}(?:\.\d+)?)\s*%\s*rh\b"),
        // Bare "34%"
        ci(r"(?:^|[^\d.])(\d{1,3})\s*%"),
    ]
});

static TEMPERATURE_RULES: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        // "temp 68", "Temperature: 22"
        ci(r"\btemp(?:erature)?\b\s*(?:of|at|is|was|:|=)?\s*(-?\d{1,3}(?:\.\d+)?)"),
        // "22°C", "71 °"
        ci(r"(-?\d{1,3}(?:\.\d+)?)\s*°"),
        // "24c", "104 F"; a following '#' is a note name ("3 F# dampers")
        ci(r"(?:^|[^\d.])(\d{1,3}(?:\.\d+)?)\s?[cf](?:$|[^\w#])"),
    ]
});

static FREQUENCY_RULES: Lazy<Vec<Regex>> = Lazy::new(|| vec![ci(r"(\d+(?:\.\d+)?)\s?hz\b")]);

/// Stateless extractor over ordered rule lists
#[derive(Debug, Clone, Copy, Default)]
pub struct MeasurementExtractor;

impl MeasurementExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, text: &str) -> Measurements {
        if text.trim().is_empty() {
            return Measurements::default();
        }

        Measurements {
            humidity: first_match(&HUMIDITY_RULES, text),
            temperature: first_match(&TEMPERATURE_RULES, text).map(to_celsius),
            frequency: first_match(&FREQUENCY_RULES, text),
        }
    }
}

fn first_match(rules: &[Regex], text: &str) -> Option<f64> {
    rules.iter().find_map(|rule| {
        rule.captures(text)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok())
    })
}

fn to_celsius(value: f64) -> f64 {
    if value > FAHRENHEIT_THRESHOLD {
        (value - 32.0) * 5.0 / 9.0
    } else {
        value
    }
}
