// src/main.rs
mod config;
mod extract;
mod sefaz;
mod store;
mod utils;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use config::AppConfig;
use sefaz::client;
use sefaz::models::Invoice;
use store::sqlite::SqliteStore;
use store::{persist, PersistOutcome};
use utils::AppError;

/// Command line interface for the NFC-e invoice extractor
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch an invoice page from the SEFAZ portal, extract it and store it
    Fetch {
        /// Raw 'p' parameter scanned from the printed QR code
        qr_param: String,

        /// Extract and print only, skip the database
        #[arg(long)]
        no_store: bool,

        /// Fail unless a 44-digit access key is resolved
        #[arg(long)]
        require_key: bool,
    },

    /// Extract an invoice from a saved HTML file
    File {
        /// Path to the HTML document
        path: PathBuf,

        /// QR-code parameter, when available, for access-key reconciliation
        #[arg(long)]
        qr_param: Option<String>,

        /// Extract and print only, skip the database
        #[arg(long)]
        no_store: bool,
    },

    /// List recently stored invoices
    List {
        /// Maximum number of rows to show; 0 shows everything
        #[arg(long, default_value = "20")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // 1. Setup logging (reads RUST_LOG env var)
    utils::logging::setup_logging();

    // 2. Load configuration and CLI arguments
    let config = AppConfig::from_env();
    let cli = Cli::parse();

    match cli.command {
        Command::Fetch { qr_param, no_store, require_key } => {
            fetch_and_process(&config, &qr_param, no_store, require_key).await
        }
        Command::File { path, qr_param, no_store } => {
            process_file(&config, &path, qr_param.as_deref(), no_store)
        }
        Command::List { limit } => list_invoices(&config, limit),
    }
}

async fn fetch_and_process(
    config: &AppConfig,
    qr_param: &str,
    no_store: bool,
    require_key: bool,
) -> Result<(), AppError> {
    if qr_param.trim().is_empty() {
        return Err(AppError::Config("QR-code parameter must not be empty".to_string()));
    }

    // 3. Fetch the rendered invoice page
    let html = client::fetch_invoice_page(config, qr_param).await?;

    // 4. Extract the invoice from the page
    let invoice = extract::extract_invoice(&html, Some(qr_param))?;

    if require_key && invoice.key_digits().is_none() {
        return Err(AppError::Processing(
            "no valid access key could be resolved for this invoice".to_string(),
        ));
    }

    // 5. Store (at most once per access key), then show the result
    if no_store {
        tracing::info!("Skipping storage (--no-store)");
    } else {
        let store_handle = open_store(config)?;
        report_outcome(persist(&store_handle, &invoice)?);
    }

    print_invoice(&invoice)
}

fn process_file(
    config: &AppConfig,
    path: &Path,
    qr_param: Option<&str>,
    no_store: bool,
) -> Result<(), AppError> {
    tracing::info!("Reading invoice page from {}", path.display());
    let html = std::fs::read_to_string(path)?;

    let invoice = extract::extract_invoice(&html, qr_param)?;

    if no_store {
        tracing::info!("Skipping storage (--no-store)");
    } else {
        let store_handle = open_store(config)?;
        report_outcome(persist(&store_handle, &invoice)?);
    }

    print_invoice(&invoice)
}

fn list_invoices(config: &AppConfig, limit: usize) -> Result<(), AppError> {
    let store_handle = open_store(config)?;
    let rows = store_handle.list_recent(limit)?;

    if rows.is_empty() {
        println!("No invoices stored yet.");
        return Ok(());
    }

    println!(
        "{:<44}  {:<30}  {:<19}  {:>10}  {:>5}",
        "ACCESS KEY", "MARKET", "ISSUED AT", "TOTAL", "ITEMS"
    );
    for row in rows {
        println!(
            "{:<44}  {:<30}  {:<19}  {:>10}  {:>5}",
            row.key_digits,
            row.market_name.as_deref().unwrap_or("-"),
            row.issued_at.as_deref().unwrap_or("-"),
            row.total_value.as_deref().unwrap_or("-"),
            row.item_count,
        );
    }
    Ok(())
}

fn open_store(config: &AppConfig) -> Result<SqliteStore, AppError> {
    if let Some(dir) = Path::new(&config.db_path).parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)?;
        }
    }
    Ok(SqliteStore::open(&config.db_path)?)
}

fn report_outcome(outcome: PersistOutcome) {
    match outcome {
        PersistOutcome::Stored => tracing::info!("Invoice stored in the database"),
        PersistOutcome::AlreadyStored => tracing::info!("Invoice was already in the database"),
        PersistOutcome::SkippedNoKey => {
            tracing::warn!("Invoice has no access key; it was returned but not stored")
        }
    }
}

fn print_invoice(invoice: &Invoice) -> Result<(), AppError> {
    let rendered = serde_json::to_string_pretty(invoice)
        .map_err(|e| AppError::Processing(format!("could not render invoice as JSON: {}", e)))?;
    println!("{}", rendered);
    Ok(())
}
