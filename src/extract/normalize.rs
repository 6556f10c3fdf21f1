// src/extract/normalize.rs

// --- Imports ---
use std::str::FromStr;

use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;

// --- Regex (Lazy Static) ---
static NON_NUMERIC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\d.,]").expect("Failed to compile NON_NUMERIC_RE"));

// --- Datetime formats ---
// Brazilian portal pages are day-first; formats are tried in order and the
// first hit wins. Date-only matches are completed to midnight.
const DATETIME_FORMATS: &[&str] = &["%d/%m/%Y %H:%M:%S", "%d/%m/%Y %H:%M", "%d-%m-%Y %H:%M:%S"];
const DATE_FORMATS: &[&str] = &["%d/%m/%Y", "%d-%m-%Y"];

/// Parses a Brazilian-formatted numeric string into an exact decimal.
///
/// Everything except digits, '.' and ',' is stripped first, so currency
/// symbols and stray labels are tolerated. Separator interpretation:
/// * both '.' and ',' present: '.' is a thousands separator, ',' is the
///   decimal mark ("1.234,56" -> 1234.56);
/// * only ',' present: decimal mark ("2,500" -> 2.500);
/// * only '.' present once: already machine-formatted ("215.70" -> 215.70);
/// * several '.' and no ',': the last '.' is the decimal mark, the rest are
///   thousands separators.
///
/// Returns None when nothing numeric survives the strip (silently) or when
/// the cleaned string still fails to parse (with a warning).
pub fn parse_decimal(raw: &str) -> Option<BigDecimal> {
    let stripped = NON_NUMERIC_RE.replace_all(raw, "");
    if stripped.is_empty() {
        return None;
    }

    let normalized = if stripped.contains('.') && stripped.contains(',') {
        stripped.replace('.', "").replace(',', ".")
    } else if stripped.contains(',') {
        stripped.replace(',', ".")
    } else if stripped.matches('.').count() > 1 {
        let parts: Vec<&str> = stripped.split('.').collect();
        format!("{}.{}", parts[..parts.len() - 1].concat(), parts[parts.len() - 1])
    } else {
        stripped.into_owned()
    };

    match BigDecimal::from_str(&normalized) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("Could not parse decimal from '{}' (cleaned: '{}'): {}", raw, normalized, e);
            None
        }
    }
}

/// Parses a day-first timestamp as rendered on the invoice page.
///
/// No timezone is attached; the page does not state one.
pub fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Some(dt);
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, fmt) {
            return date.and_hms_opt(0, 0, 0);
        }
    }

    tracing::warn!("Could not parse datetime from '{}'", trimmed);
    None
}

/// Trims surrounding whitespace; whitespace-only input is absent, never an
/// empty string.
pub fn clean_text(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
