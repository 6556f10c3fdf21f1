// src/extract/mod.rs

pub mod fields;
pub mod items;
pub mod normalize;

use scraper::{node::Node, ElementRef, Html};

use crate::sefaz::models::{digits_only, Invoice, ACCESS_KEY_DIGITS};
use crate::utils::error::ExtractError;

/// Whitespace-normalized text of an element: each descendant text node is
/// trimmed, empties are dropped, the rest joined with single spaces.
pub(crate) fn collect_text(element: ElementRef) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// The element's text when it wraps exactly one text node, looking through
/// single-child wrappers, so `<td><b>Data de Emissão</b></td>` reads as the
/// label itself. Elements with mixed or multiple children yield None.
pub(crate) fn sole_text(element: ElementRef) -> Option<String> {
    let mut children = element.children();
    let only = children.next()?;
    if children.next().is_some() {
        return None;
    }
    match only.value() {
        Node::Text(text) => Some(text.text.to_string()),
        Node::Element(_) => ElementRef::wrap(only).and_then(sole_text),
        _ => None,
    }
}

/// Runs all extractors over one invoice page and assembles the result.
///
/// `qr_param` is the raw scanned QR value, when the caller has one; it only
/// participates in access-key reconciliation. Missing or unparsable fields
/// end up as None and never fail the call. The error path exists solely for
/// a record too malformed to hand out, which must never reach storage.
pub fn extract_invoice(html: &str, qr_param: Option<&str>) -> Result<Invoice, ExtractError> {
    let document = Html::parse_document(html);

    let market_name = fields::extract_market_name(&document);
    let issued_at =
        fields::extract_issue_date_str(&document).and_then(|raw| normalize::parse_datetime(&raw));
    let total_value =
        fields::extract_total_value_str(&document).and_then(|raw| normalize::parse_decimal(&raw));
    let declared_item_count =
        fields::extract_declared_item_count_str(&document).and_then(|raw| {
            match raw.parse::<u32>() {
                Ok(count) => Some(count),
                Err(e) => {
                    tracing::warn!("Declared item count '{}' does not fit an integer: {}", raw, e);
                    None
                }
            }
        });

    let page_key = fields::extract_html_access_key(&document);
    let access_key = fields::resolve_access_key(page_key, qr_param);

    let items = items::extract_items(&document);

    if let Some(declared) = declared_item_count {
        if declared as usize != items.len() {
            tracing::warn!(
                "Page declares {} items but {} rows were extracted",
                declared,
                items.len()
            );
        }
    }

    let invoice = Invoice {
        access_key,
        market_name,
        issued_at,
        total_value,
        declared_item_count,
        items,
    };

    if let Some(key) = &invoice.access_key {
        if digits_only(key).len() != ACCESS_KEY_DIGITS {
            return Err(ExtractError::Assembly(format!(
                "resolved access key '{}' does not project to {} digits",
                key, ACCESS_KEY_DIGITS
            )));
        }
    }

    tracing::info!(
        "Extracted invoice: key={}, market={:?}, items={}",
        invoice.key_digits().as_deref().unwrap_or("<absent>"),
        invoice.market_name,
        invoice.items.len()
    );
    Ok(invoice)
}

// --- Tests ---
#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use chrono::NaiveDate;
    use std::str::FromStr;

    const KEY_DIGITS: &str = "31250204641376021486650640001334691832214190";
    const KEY_DOTTED: &str = "3125.0204.6413.7602.1486.6506.4000.1334.6918.3221.4190";

    fn full_page() -> String {
        format!(
            r#"
            <html><body><div id="conteudo">
              <table><tr>
                <th class="text-center text-uppercase"><h4><b>BRETAS SUPERMERCADO LTDA</b></h4></th>
              </tr></table>
              <table><tbody id="myTable">
                <tr>
                  <td><span>BANANA PRATA</span> <span>(Código: 12345)</span></td>
                  <td>Qtde.: 0,418</td>
                  <td>UN.: KG</td>
                  <td>Valor total R$: 3,49</td>
                </tr>
                <tr>
                  <td><span>CAFE TORRADO 500G</span> <span>(Código: 888)</span></td>
                  <td>Qtde.: 2</td>
                  <td>UN.: UN</td>
                  <td>Valor total R$: 37,80</td>
                </tr>
              </tbody></table>
              <div class="row">
                <div class="col-lg-10">Qtde. total de itens:</div>
                <div class="col-lg-2"><strong>2</strong></div>
              </div>
              <div class="row">
                <div><span>Valor total R$:</span><strong>41,29</strong></div>
              </div>
              <div><span>Data de Emissão</span><span> 04/02/2025 17:36:12 - Via consumidor</span></div>
              <p>Chave de acesso</p>
              <p>{}</p>
            </div></body></html>
            "#,
            KEY_DOTTED
        )
    }

    #[test]
    fn test_extract_complete_page() {
        let qr_param = format!("{}|2|1|1|DEADBEEF", KEY_DIGITS);
        let invoice = extract_invoice(&full_page(), Some(&qr_param)).unwrap();

        assert_eq!(invoice.access_key.as_deref(), Some(KEY_DOTTED));
        assert_eq!(invoice.key_digits().as_deref(), Some(KEY_DIGITS));
        assert_eq!(invoice.market_name.as_deref(), Some("BRETAS SUPERMERCADO LTDA"));
        assert_eq!(
            invoice.issued_at,
            NaiveDate::from_ymd_opt(2025, 2, 4).unwrap().and_hms_opt(17, 36, 12)
        );
        assert_eq!(invoice.total_value, Some(BigDecimal::from_str("41.29").unwrap()));
        assert_eq!(invoice.declared_item_count, Some(2));

        assert_eq!(invoice.items.len(), 2);
        assert_eq!(invoice.items[0].description.as_deref(), Some("BANANA PRATA"));
        assert_eq!(invoice.items[0].quantity, Some(BigDecimal::from_str("0.418").unwrap()));
        assert_eq!(invoice.items[1].code.as_deref(), Some("888"));
        assert_eq!(invoice.items[1].value, Some(BigDecimal::from_str("37.80").unwrap()));
    }

    #[test]
    fn test_extract_sparse_page_falls_back_to_param() {
        let qr_param = format!("{}|2|1|1|DEADBEEF", KEY_DIGITS);
        let invoice =
            extract_invoice("<html><body><p>Página vazia.</p></body></html>", Some(&qr_param))
                .unwrap();

        assert_eq!(invoice.access_key.as_deref(), Some(KEY_DIGITS));
        assert_eq!(invoice.market_name, None);
        assert_eq!(invoice.issued_at, None);
        assert_eq!(invoice.total_value, None);
        assert_eq!(invoice.declared_item_count, None);
        assert!(invoice.items.is_empty());
    }

    #[test]
    fn test_extract_short_param_key_yields_no_key() {
        // A 4-digit key segment is rejected and nothing on the page helps;
        // the record still comes back, it just cannot be persisted.
        let invoice =
            extract_invoice("<html><body><p>Nada.</p></body></html>", Some("1234|2|1")).unwrap();
        assert_eq!(invoice.access_key, None);
        assert_eq!(invoice.key_digits(), None);
    }

    #[test]
    fn test_extract_without_param_uses_page_key() {
        let invoice = extract_invoice(&full_page(), None).unwrap();
        assert_eq!(invoice.access_key.as_deref(), Some(KEY_DOTTED));
    }
}
