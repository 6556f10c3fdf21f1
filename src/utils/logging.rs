// src/utils/logging.rs
use tracing_subscriber::{fmt, EnvFilter};

/// Installs the tracing subscriber. Level filters come from `RUST_LOG`,
/// falling back to "info" when the variable is unset.
pub fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt().with_env_filter(filter).init();
}
