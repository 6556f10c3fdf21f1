// src/utils/error.rs
use thiserror::Error;

// One enum per layer. Field-level parse failures never appear here: they
// degrade to None plus a warning inside the extractors, so these types only
// carry failures that genuinely stop a request.

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("network request failed: {0}")]
    Network(#[from] reqwest::Error), // Automatically convert reqwest errors

    #[error("request timed out fetching {0}")]
    Timeout(String),

    #[error("HTTP error {status} fetching {url}")]
    Http {
        status: reqwest::StatusCode,
        url: String,
    },
}

#[derive(Error, Debug)]
pub enum ExtractError {
    // The single fatal path in extraction: the assembled record itself is
    // inconsistent and must never reach the store.
    #[error("invoice assembly failed: {0}")]
    Assembly(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("invoice '{key}' cannot be stored: {reason}")]
    InvalidRecord { key: String, reason: String },
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error), // Automatically convert IO errors

    #[error("portal fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("extraction failed: {0}")]
    Extraction(#[from] ExtractError),

    #[error("storage failed: {0}")]
    Store(#[from] StoreError),

    #[error("data processing failed: {0}")]
    Processing(String),
}
