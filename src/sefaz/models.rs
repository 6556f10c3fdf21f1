// src/sefaz/models.rs
use bigdecimal::BigDecimal;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Length of an NFC-e access key once every separator is stripped.
pub const ACCESS_KEY_DIGITS: usize = 44;

/// One purchased product line from the invoice item table.
///
/// Every field is best-effort: the extractor emits a row as soon as it has
/// (code or description) plus quantity and value *strings*; a field whose
/// string later fails normalization ends up None on an otherwise-kept row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceItem {
    /// External product code. Numeric-looking but kept as text: leading
    /// zeros are significant.
    pub code: Option<String>,
    pub description: Option<String>,
    /// Fractional quantities are legal (weighed goods).
    pub quantity: Option<BigDecimal>,
    /// Short unit-of-measure code, e.g. "UN" or "KG".
    pub unit: Option<String>,
    /// Total monetary value of the line.
    pub value: Option<BigDecimal>,
}

/// A consumer invoice extracted from the SEFAZ QR-code viewer page.
///
/// Constructed once per extraction, never mutated afterwards. Identity is
/// the 44-digit projection of `access_key`; the stored string keeps the
/// formatting the page displayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub access_key: Option<String>,
    pub market_name: Option<String>,
    /// Naive on purpose: the portal never states a timezone, so none is
    /// asserted here.
    pub issued_at: Option<NaiveDateTime>,
    pub total_value: Option<BigDecimal>,
    /// Item count as printed on the page. Independent of `items.len()`;
    /// the source is allowed to disagree with the rows it renders.
    pub declared_item_count: Option<u32>,
    /// Document row order.
    pub items: Vec<InvoiceItem>,
}

impl Invoice {
    /// The 44-digit identity of this invoice, if the access key is present
    /// and well-formed. This is the only value persistence may key on;
    /// separators in `access_key` are cosmetic.
    pub fn key_digits(&self) -> Option<String> {
        self.access_key
            .as_deref()
            .map(digits_only)
            .filter(|d| d.len() == ACCESS_KEY_DIGITS)
    }
}

/// Projects a string onto its ASCII digits.
pub fn digits_only(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_digit()).collect()
}
