// src/extract/fields.rs

// --- Imports ---
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{node::Node, ElementRef, Html, Selector};

use super::normalize::clean_text;
use super::{collect_text, sole_text};
use crate::sefaz::models::{digits_only, ACCESS_KEY_DIGITS};

// --- Constants ---
const ACCESS_KEY_TEXT_PREFIX: &str = "Chave de acesso ";

// --- CSS Selectors (Lazy Static) ---
static MARKET_HEADER_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("th.text-center.text-uppercase")
        .expect("Failed to compile MARKET_HEADER_SELECTOR")
});

static MARKET_NAME_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("h4 b").expect("Failed to compile MARKET_NAME_SELECTOR"));

// Tags the portal uses to carry the "Data de Emissão" label.
static DATE_LABEL_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("div, td, span").expect("Failed to compile DATE_LABEL_SELECTOR"));

static TOTAL_LABEL_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("strong, label, span, div").expect("Failed to compile TOTAL_LABEL_SELECTOR")
});

static ITEM_COUNT_COLUMN_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("div.col-lg-2").expect("Failed to compile ITEM_COUNT_COLUMN_SELECTOR")
});

static STRONG_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("strong").expect("Failed to compile STRONG_SELECTOR"));

// Display elements worth scanning for a formatted access key.
static KEY_CANDIDATE_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("span, td, div, strong, p").expect("Failed to compile KEY_CANDIDATE_SELECTOR")
});

// --- Regex Patterns (Lazy Static) ---
static DATE_LABEL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)Data de Emissão").expect("Failed to compile DATE_LABEL_RE"));

static DATE_TIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\d{2}/\d{2}/\d{4}\s+\d{2}:\d{2}:\d{2}").expect("Failed to compile DATE_TIME_RE")
});

static TOTAL_LABEL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)Valor\s+total\s+R?\$\s*:?").expect("Failed to compile TOTAL_LABEL_RE")
});

static NUMBER_RUN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\d.,]+").expect("Failed to compile NUMBER_RUN_RE"));

static BARE_INTEGER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+$").expect("Failed to compile BARE_INTEGER_RE"));

// A formatted key is one long run of digits and separators.
static KEY_RUN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d[\d./-]{40,}").expect("Failed to compile KEY_RUN_RE"));

// --- Tree helpers ---

/// Nearest `div` or `tr` ancestor, the block an inline label belongs to.
fn parent_block(element: ElementRef) -> Option<ElementRef> {
    for ancestor in element.ancestors() {
        if let Some(el) = ElementRef::wrap(ancestor) {
            if ["div", "tr"].contains(&el.value().name()) {
                return Some(el);
            }
        }
    }
    None
}

/// First element after `label` in document order whose tag is one of
/// `names`. Descendants of the label count; the label itself does not.
fn next_element_after<'a>(
    document: &'a Html,
    label: ElementRef<'a>,
    names: &[&str],
) -> Option<ElementRef<'a>> {
    let mut past_label = false;
    for node in document.root_element().descendants() {
        if node.id() == label.id() {
            past_label = true;
            continue;
        }
        if !past_label {
            continue;
        }
        if let Some(el) = ElementRef::wrap(node) {
            if names.contains(&el.value().name()) {
                return Some(el);
            }
        }
    }
    None
}

// --- Field extractors ---
// Each reads the immutable parsed document and returns the raw string it
// found (normalization happens at assembly). Absence is logged, never raised.

/// Issuer name from the page header: a centered uppercase table header cell
/// wrapping an `h4` wrapping bold text.
pub fn extract_market_name(document: &Html) -> Option<String> {
    let name = document
        .select(&MARKET_HEADER_SELECTOR)
        .next()
        .and_then(|header| header.select(&MARKET_NAME_SELECTOR).next())
        .and_then(|bold| clean_text(&collect_text(bold)));
    if name.is_none() {
        tracing::warn!("Market name heading not found in page");
    }
    name
}

/// Issuance timestamp as displayed, e.g. "04/02/2025 17:36:12".
///
/// Preferred path: a `div`/`td`/`span` whose text is the "Data de Emissão"
/// label, searched within its enclosing block. Fallback: first
/// timestamp-shaped substring anywhere in the page text.
pub fn extract_issue_date_str(document: &Html) -> Option<String> {
    for label in document.select(&DATE_LABEL_SELECTOR) {
        let label_text = match sole_text(label) {
            Some(text) => text,
            None => continue,
        };
        if !DATE_LABEL_RE.is_match(&label_text) {
            continue;
        }
        let container = parent_block(label).unwrap_or(label);
        let container_text = collect_text(container);
        if let Some(found) = DATE_TIME_RE.find(&container_text) {
            tracing::debug!("Issue date found next to its label: '{}'", found.as_str());
            return Some(found.as_str().to_string());
        }
    }

    for node in document.root_element().descendants() {
        if let Node::Text(text) = node.value() {
            if let Some(found) = DATE_TIME_RE.find(&text.text) {
                tracing::debug!("Issue date found by page-wide scan: '{}'", found.as_str());
                return Some(found.as_str().to_string());
            }
        }
    }

    tracing::warn!("Issue date not found in page");
    None
}

/// Invoice grand total as displayed, e.g. "215,70".
///
/// Finds the "Valor total R$" label, then tries the next display element in
/// document order and the label's enclosing block, preferring bold text in
/// either, and takes the first numeric run.
pub fn extract_total_value_str(document: &Html) -> Option<String> {
    let mut label = None;
    for element in document.select(&TOTAL_LABEL_SELECTOR) {
        let is_label = sole_text(element).map_or(false, |text| TOTAL_LABEL_RE.is_match(&text));
        if is_label {
            label = Some(element);
            break;
        }
    }
    let label = match label {
        Some(element) => element,
        None => {
            tracing::warn!("Total value label not found in page");
            return None;
        }
    };
    tracing::debug!("Total value label found in <{}>", label.value().name());

    let candidates = [
        next_element_after(document, label, &["div", "span", "td", "strong"]),
        parent_block(label),
    ];
    for candidate in candidates.into_iter().flatten() {
        let target_text = match candidate.select(&STRONG_SELECTOR).next() {
            Some(strong) => collect_text(strong),
            None => collect_text(candidate),
        };
        if let Some(found) = NUMBER_RUN_RE.find(&target_text) {
            tracing::debug!("Total value found: '{}'", found.as_str());
            return Some(found.as_str().to_string());
        }
    }

    tracing::warn!("Total value label present but no numeric value near it");
    None
}

/// Declared number of purchased items, as a digit string.
///
/// Reads the first layout column that carries the count, preferring its bold
/// child and falling back to the column's own text. Anything other than a
/// bare integer is rejected.
pub fn extract_declared_item_count_str(document: &Html) -> Option<String> {
    let column = match document.select(&ITEM_COUNT_COLUMN_SELECTOR).next() {
        Some(div) => div,
        None => {
            tracing::warn!("Item count column not found in page");
            return None;
        }
    };

    let mut candidates = Vec::new();
    if let Some(strong) = column.select(&STRONG_SELECTOR).next() {
        candidates.push(collect_text(strong));
    }
    candidates.push(collect_text(column));

    for raw in candidates {
        if BARE_INTEGER_RE.is_match(&raw) {
            tracing::debug!("Declared item count found: '{}'", raw);
            return Some(raw);
        }
        tracing::debug!("Item count candidate '{}' is not a bare integer", raw);
    }

    tracing::warn!("Item count column present but holds no bare integer");
    None
}

/// Formatted access key as displayed somewhere on the page.
///
/// A candidate element must show digits plus at least one `-`/`/`/`.`
/// separator over 44+ characters, and its digit projection must be exactly
/// 44 digits. From a valid candidate the key is taken as the long
/// digit-and-separator run, or as whatever follows the "Chave de acesso "
/// label when the run is broken up by spaces.
pub fn extract_html_access_key(document: &Html) -> Option<String> {
    for element in document.select(&KEY_CANDIDATE_SELECTOR) {
        let text = collect_text(element);
        if text.chars().count() < ACCESS_KEY_DIGITS
            || !text.chars().any(|c| c.is_ascii_digit())
            || !text.contains(['-', '/', '.'])
        {
            continue;
        }
        if digits_only(&text).len() != ACCESS_KEY_DIGITS {
            continue;
        }

        if let Some(found) = KEY_RUN_RE.find(&text) {
            let candidate = found.as_str().trim();
            if digits_only(candidate).len() == ACCESS_KEY_DIGITS {
                tracing::debug!("Formatted access key extracted from page: '{}'", candidate);
                return Some(candidate.to_string());
            }
        }
        if let Some(rest) = text.strip_prefix(ACCESS_KEY_TEXT_PREFIX) {
            let cleaned = rest.trim();
            if digits_only(cleaned).len() == ACCESS_KEY_DIGITS {
                tracing::debug!("Access key extracted after its label: '{}'", cleaned);
                return Some(cleaned.to_string());
            }
        }
    }

    tracing::debug!("No formatted access key found in page");
    None
}

/// Reconciles the page-displayed key with the key embedded in the QR
/// parameter (everything before the first '|').
///
/// The page value wins whenever present; a digit mismatch against a valid
/// parameter is logged loudly but does not override it. Without a page
/// value, a valid parameter key is used verbatim. A parameter without the
/// '|' delimiter is treated as invalid.
pub fn resolve_access_key(page_key: Option<String>, qr_param: Option<&str>) -> Option<String> {
    let mut param_key = None;
    if let Some(param) = qr_param {
        match param.split_once('|') {
            Some((head, _)) => {
                if digits_only(head).len() == ACCESS_KEY_DIGITS {
                    param_key = Some(head.to_string());
                } else {
                    tracing::warn!(
                        "QR parameter key segment '{}' does not clean to {} digits",
                        head,
                        ACCESS_KEY_DIGITS
                    );
                }
            }
            None => tracing::warn!("QR parameter has unexpected format (no '|'): '{}'", param),
        }
    }

    match (page_key, param_key) {
        (Some(page), Some(param)) => {
            if digits_only(&page) != digits_only(&param) {
                tracing::error!(
                    "Access key digits from page ('{}') and QR parameter ('{}') disagree; keeping the page value",
                    page,
                    param
                );
            } else {
                tracing::debug!("Page and QR parameter access keys agree");
            }
            Some(page)
        }
        (Some(page), None) => Some(page),
        (None, Some(param)) => {
            tracing::warn!(
                "Access key not found in page; using QR parameter value '{}'",
                param
            );
            Some(param)
        }
        (None, None) => {
            tracing::error!("No valid access key in page or QR parameter");
            None
        }
    }
}

// --- Tests ---
#[cfg(test)]
mod tests {
    use super::*;

    const KEY_DIGITS: &str = "31250204641376021486650640001334691832214190";
    const KEY_DOTTED: &str = "3125.0204.6413.7602.1486.6506.4000.1334.6918.3221.4190";

    fn doc(html: &str) -> Html {
        Html::parse_document(html)
    }

    #[test]
    fn test_market_name_from_header_cell() {
        let html = r#"
            <table><tr>
              <th class="text-center text-uppercase"><h4><b>BRETAS SUPERMERCADO LTDA</b></h4></th>
            </tr></table>
        "#;
        assert_eq!(
            extract_market_name(&doc(html)).as_deref(),
            Some("BRETAS SUPERMERCADO LTDA")
        );
    }

    #[test]
    fn test_market_name_requires_nested_bold() {
        let html = r#"
            <table><tr>
              <th class="text-center text-uppercase"><h4>NO BOLD HERE</h4></th>
            </tr></table>
        "#;
        assert_eq!(extract_market_name(&doc(html)), None);
    }

    #[test]
    fn test_issue_date_via_label() {
        let html = r#"
            <table><tr>
              <td><span>Data de Emissão</span></td>
              <td>04/02/2025 17:36:12</td>
            </tr></table>
        "#;
        assert_eq!(
            extract_issue_date_str(&doc(html)).as_deref(),
            Some("04/02/2025 17:36:12")
        );
    }

    #[test]
    fn test_issue_date_fallback_scan() {
        let html = r#"<p>Nota emitida em 31/12/2024 08:05:00 pela SEFAZ.</p>"#;
        assert_eq!(
            extract_issue_date_str(&doc(html)).as_deref(),
            Some("31/12/2024 08:05:00")
        );
    }

    #[test]
    fn test_issue_date_absent() {
        let html = r#"<p>Sem data aqui.</p>"#;
        assert_eq!(extract_issue_date_str(&doc(html)), None);
    }

    #[test]
    fn test_total_value_next_to_label() {
        let html = r#"
            <div><span>Valor total R$:</span><strong>215,70</strong></div>
        "#;
        assert_eq!(extract_total_value_str(&doc(html)).as_deref(), Some("215,70"));
    }

    #[test]
    fn test_total_value_in_following_cell() {
        let html = r#"
            <table><tr>
              <td><span>Valor total R$:</span></td>
              <td>1.059,89</td>
            </tr></table>
        "#;
        assert_eq!(extract_total_value_str(&doc(html)).as_deref(), Some("1.059,89"));
    }

    #[test]
    fn test_total_value_from_enclosing_block() {
        let html = r#"<div><span>Valor total R$: 88,00</span></div>"#;
        assert_eq!(extract_total_value_str(&doc(html)).as_deref(), Some("88,00"));
    }

    #[test]
    fn test_total_value_label_missing() {
        let html = r#"<div><span>Subtotal: 10,00</span></div>"#;
        assert_eq!(extract_total_value_str(&doc(html)), None);
    }

    #[test]
    fn test_item_count_prefers_bold() {
        let html = r#"<div class="col-lg-2"><strong>7</strong></div>"#;
        assert_eq!(extract_declared_item_count_str(&doc(html)).as_deref(), Some("7"));
    }

    #[test]
    fn test_item_count_column_text_fallback() {
        let html = r#"<div class="col-lg-2">12</div>"#;
        assert_eq!(extract_declared_item_count_str(&doc(html)).as_deref(), Some("12"));
    }

    #[test]
    fn test_item_count_rejects_non_integer() {
        let html = r#"<div class="col-lg-2"><strong>sete</strong></div>"#;
        assert_eq!(extract_declared_item_count_str(&doc(html)), None);
    }

    #[test]
    fn test_item_count_only_first_column_considered() {
        let html = r#"
            <div class="col-lg-2">Qtde. total de itens</div>
            <div class="col-lg-2"><strong>7</strong></div>
        "#;
        assert_eq!(extract_declared_item_count_str(&doc(html)), None);
    }

    #[test]
    fn test_page_key_extracted_from_formatted_run() {
        let html = format!(r#"<div><span>Chave de acesso</span><span>{}</span></div>"#, KEY_DOTTED);
        assert_eq!(extract_html_access_key(&doc(&html)).as_deref(), Some(KEY_DOTTED));
    }

    #[test]
    fn test_page_key_after_label_when_run_is_spaced() {
        // Separator present but the key itself is broken up by spaces, so
        // the long-run pattern fails and the label prefix path takes over.
        let spaced = "3125.0204 6413 7602 1486 6506 4000 1334 6918 3221 4190";
        let html = format!("<p>Chave de acesso {}</p>", spaced);
        assert_eq!(extract_html_access_key(&doc(&html)).as_deref(), Some(spaced));
    }

    #[test]
    fn test_page_key_requires_separator() {
        // 44 bare digits with no separators never qualify as a candidate.
        let html = format!("<span>{}</span>", KEY_DIGITS);
        assert_eq!(extract_html_access_key(&doc(&html)), None);
    }

    #[test]
    fn test_page_key_skips_wrong_digit_counts() {
        // The protocol line passes the candidate pre-filter (digits, dots,
        // 44+ characters) but does not clean to exactly 44 digits.
        let html = format!(
            r#"<div>Protocolo de autorização: 123.456.789.012.345 registrado em 04/02/2025 às 17:36</div><span>{}</span>"#,
            KEY_DOTTED
        );
        assert_eq!(extract_html_access_key(&doc(&html)).as_deref(), Some(KEY_DOTTED));
    }

    #[test]
    fn test_resolve_prefers_page_key() {
        let param = format!("{}|2|1|1|HASH", KEY_DIGITS);
        let resolved = resolve_access_key(Some(KEY_DOTTED.to_string()), Some(&param));
        assert_eq!(resolved.as_deref(), Some(KEY_DOTTED));
    }

    #[test]
    fn test_resolve_keeps_page_key_on_mismatch() {
        let other = format!("{}9|2|1", &KEY_DIGITS[1..]);
        let resolved = resolve_access_key(Some(KEY_DOTTED.to_string()), Some(&other));
        assert_eq!(resolved.as_deref(), Some(KEY_DOTTED));
    }

    #[test]
    fn test_resolve_falls_back_to_param() {
        let param = format!("{}|2|1|1|HASH", KEY_DIGITS);
        let resolved = resolve_access_key(None, Some(&param));
        assert_eq!(resolved.as_deref(), Some(KEY_DIGITS));
    }

    #[test]
    fn test_resolve_param_needs_delimiter() {
        // Even a perfect 44-digit value is rejected without the '|' format.
        assert_eq!(resolve_access_key(None, Some(KEY_DIGITS)), None);
    }

    #[test]
    fn test_resolve_param_needs_44_digits() {
        assert_eq!(resolve_access_key(None, Some("1234|2|1")), None);
    }

    #[test]
    fn test_resolve_nothing_valid() {
        assert_eq!(resolve_access_key(None, None), None);
    }
}
