// src/sefaz/client.rs
use reqwest::Client;
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::utils::error::FetchError;

/// Builds the URL of the QR-code viewer page for one invoice.
///
/// `qr_param` is the raw value scanned from the printed QR code and is
/// passed through verbatim as the `p` query parameter.
pub fn qrcode_url(base_url: &str, qr_param: &str) -> String {
    format!("{}/qrcode.xhtml?p={}", base_url.trim_end_matches('/'), qr_param)
}

/// HTTP client configured for the SEFAZ portal.
///
/// The portal rejects clients without a browser-looking User-Agent, so the
/// configured one is always set.
pub fn build_portal_client(config: &AppConfig) -> Result<Client, FetchError> {
    let client = Client::builder()
        .user_agent(&config.user_agent)
        .timeout(std::time::Duration::from_secs(config.http_timeout_secs))
        .build()?;
    Ok(client)
}

/// Fetches the rendered invoice page for a scanned QR parameter.
///
/// Returns the page body on HTTP 200; any non-success status becomes
/// `FetchError::Http` so callers can log the exact failure.
pub async fn fetch_invoice_page(config: &AppConfig, qr_param: &str) -> Result<String, FetchError> {
    let url = qrcode_url(&config.portal_base_url, qr_param);
    debug!("Requesting invoice page: {}", url);

    let client = build_portal_client(config)?;
    let response = client.get(&url).send().await.map_err(|e| {
        if e.is_timeout() {
            FetchError::Timeout(url.clone())
        } else {
            FetchError::Network(e)
        }
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Http { status, url });
    }

    let body = response.text().await?;
    info!("Fetched invoice page ({} bytes)", body.len());
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qrcode_url_joins_base_and_param() {
        let url = qrcode_url(
            "https://portalsped.fazenda.mg.gov.br/portalnfce/sistema",
            "31250204641376021486650640001334691832214190|2|1|1|ABCD",
        );
        assert_eq!(
            url,
            "https://portalsped.fazenda.mg.gov.br/portalnfce/sistema/qrcode.xhtml?p=31250204641376021486650640001334691832214190|2|1|1|ABCD"
        );
    }

    #[test]
    fn test_qrcode_url_tolerates_trailing_slash() {
        let url = qrcode_url("https://example.test/base/", "p1");
        assert_eq!(url, "https://example.test/base/qrcode.xhtml?p=p1");
    }
}
