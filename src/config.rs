// src/config.rs

/// Runtime configuration, resolved from environment variables with
/// defaults that match the SEFAZ-MG production portal.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Base URL of the NFC-e QR-code viewer (no trailing slash needed).
    pub portal_base_url: String,
    /// Path of the SQLite invoice store.
    pub db_path: String,
    /// Request timeout for the portal fetch, in seconds.
    pub http_timeout_secs: u64,
    /// User-Agent sent to the portal; it rejects clients without one.
    pub user_agent: String,
}

const DEFAULT_PORTAL_BASE_URL: &str = "https://portalsped.fazenda.mg.gov.br/portalnfce/sistema";
const DEFAULT_DB_PATH: &str = "data/invoices.sqlite";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            portal_base_url: DEFAULT_PORTAL_BASE_URL.to_string(),
            db_path: DEFAULT_DB_PATH.to_string(),
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl AppConfig {
    /// Loads the configuration from environment variables, keeping the
    /// default for anything unset or unparsable.
    pub fn from_env() -> Self {
        Self {
            portal_base_url: std::env::var("NFCE_PORTAL_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_PORTAL_BASE_URL.to_string()),
            db_path: std::env::var("NFCE_DB_PATH").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string()),
            http_timeout_secs: std::env::var("NFCE_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
            user_agent: std::env::var("NFCE_USER_AGENT")
                .unwrap_or_else(|_| DEFAULT_USER_AGENT.to_string()),
        }
    }
}
