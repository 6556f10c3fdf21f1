// src/extract/items.rs

// --- Imports ---
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};

use super::collect_text;
use crate::extract::normalize::{clean_text, parse_decimal};
use crate::sefaz::models::InvoiceItem;

// --- CSS Selectors (Lazy Static) ---
static ITEM_TABLE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("tbody#myTable").expect("Failed to compile ITEM_TABLE_SELECTOR"));

static ROW_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("tr").expect("Failed to compile ROW_SELECTOR"));

static CELL_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("td").expect("Failed to compile CELL_SELECTOR"));

// --- Regex Patterns (Lazy Static) ---
// Cell 0 carries "DESCRIPTION (Código: 12345)".
static DESCRIPTION_CODE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)(.*?)\s+\(Código:\s*(\d+)\)").expect("Failed to compile DESCRIPTION_CODE_RE")
});

static QUANTITY_AFTER_COLON_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r":\s*([\d.,]+)").expect("Failed to compile QUANTITY_AFTER_COLON_RE"));

static NUMERIC_RUN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\d.,]+").expect("Failed to compile NUMERIC_RUN_RE"));

static UNIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)UN\.?:?\s*(\w+)").expect("Failed to compile UNIT_RE"));

// Tolerates "Vl." for "Valor", an optional "total", currency symbols on
// either side of the colon, and a missing colon.
static ITEM_VALUE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:Valor|Vl)\.?\s*(?:total)?\s*R?\$?\s*:?\s*R?\$?\s*([\d.,]+)")
        .expect("Failed to compile ITEM_VALUE_RE")
});

/// Extracts the purchased items from the invoice table.
///
/// A missing table yields an empty list, not an error. A row is kept only
/// when it shows an identity (description or code) plus quantity and value
/// strings; rows failing that gate are skipped with a diagnostic and never
/// abort the rest of the table. Kept rows may still normalize individual
/// fields to None.
pub fn extract_items(document: &Html) -> Vec<InvoiceItem> {
    let mut items = Vec::new();

    let table_body = match document.select(&ITEM_TABLE_SELECTOR).next() {
        Some(body) => body,
        None => {
            tracing::warn!("Item table body not found in page; no items extracted");
            return items;
        }
    };

    for (index, row) in table_body.select(&ROW_SELECTOR).enumerate() {
        let row_number = index + 1;
        let cells: Vec<_> = row.select(&CELL_SELECTOR).collect();
        if cells.len() < 4 {
            tracing::debug!("Item row {} has {} cells, skipping", row_number, cells.len());
            continue;
        }

        let cell0 = collect_text(cells[0]);
        let (description, code) = match DESCRIPTION_CODE_RE.captures(&cell0) {
            Some(caps) => (
                caps.get(1).map(|m| m.as_str().trim().to_string()).unwrap_or_default(),
                caps.get(2).map(|m| m.as_str().to_string()),
            ),
            // No code marker: the whole cell is the description.
            None => (cell0.clone(), None),
        };

        let cell1 = collect_text(cells[1]);
        let quantity_str = QUANTITY_AFTER_COLON_RE
            .captures(&cell1)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .or_else(|| NUMERIC_RUN_RE.find(&cell1).map(|m| m.as_str().to_string()));

        let cell2 = collect_text(cells[2]);
        let unit = UNIT_RE
            .captures(&cell2)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string());

        let cell3 = collect_text(cells[3]);
        let value_str = ITEM_VALUE_RE
            .captures(&cell3)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string());

        tracing::trace!(
            "Item row {}: description='{}' code={:?} quantity={:?} unit={:?} value={:?}",
            row_number,
            description,
            code,
            quantity_str,
            unit,
            value_str
        );

        let has_identity = !description.is_empty() || code.is_some();
        if !(has_identity && quantity_str.is_some() && value_str.is_some()) {
            tracing::warn!(
                "Item row {} is missing essential data (identity: {}, quantity: {:?}, value: {:?}), skipping",
                row_number,
                has_identity,
                quantity_str,
                value_str
            );
            continue;
        }

        items.push(InvoiceItem {
            code,
            description: clean_text(&description),
            quantity: quantity_str.as_deref().and_then(parse_decimal),
            unit,
            value: value_str.as_deref().and_then(parse_decimal),
        });
    }

    tracing::debug!("Extracted {} items from the page table", items.len());
    items
}
