// src/store/sqlite.rs

// --- Imports ---
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use bigdecimal::BigDecimal;
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};

use super::{InsertOutcome, InvoiceStore};
use crate::sefaz::models::{Invoice, InvoiceItem};
use crate::utils::error::StoreError;

// --- Constants ---
// Column format for timestamps; NaiveDateTime's Display and FromStr do not
// round-trip, so the format is pinned on both sides.
const DATETIME_COLUMN_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// SQLite-backed invoice store.
///
/// Monetary and quantity columns are TEXT holding canonical decimal
/// strings; a REAL column would corrupt them. The access-key digit
/// projection is the primary key, so uniqueness is enforced by the engine
/// even for writers that race past the find step.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (creating if necessary) the database at `path` and ensures the
    /// schema exists.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Throwaway in-memory database.
    #[cfg(test)]
    fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        init_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    // A poisoned lock only means another thread panicked mid-query; the
    // connection itself is still usable.
    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stored invoices, newest issue date first; undated rows sort last.
    /// A zero limit lists everything.
    pub fn list_recent(&self, limit: usize) -> Result<Vec<InvoiceSummary>, StoreError> {
        let conn = self.lock();
        // LIMIT -1 is how SQLite spells "no limit".
        let limit = if limit == 0 { -1 } else { limit as i64 };
        let sql = format!(
            "SELECT i.key_digits, i.market_name, i.issued_at, i.total_value,
                    (SELECT COUNT(*) FROM invoice_items it WHERE it.invoice_key = i.key_digits)
             FROM invoices i
             ORDER BY i.issued_at DESC, i.created_at DESC
             LIMIT {}",
            limit
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(InvoiceSummary {
                    key_digits: row.get(0)?,
                    market_name: row.get(1)?,
                    issued_at: row.get(2)?,
                    total_value: row.get(3)?,
                    item_count: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

/// One line of `list_recent` output; column text is passed through as
/// stored, ready for display.
pub struct InvoiceSummary {
    pub key_digits: String,
    pub market_name: Option<String>,
    pub issued_at: Option<String>,
    pub total_value: Option<String>,
    pub item_count: i64,
}

impl InvoiceStore for SqliteStore {
    fn find_by_key(&self, key_digits: &str) -> Result<Option<Invoice>, StoreError> {
        let conn = self.lock();
        let header = conn
            .query_row(
                "SELECT access_key, market_name, issued_at, total_value, declared_item_count
                 FROM invoices WHERE key_digits = ?1",
                params![key_digits],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<u32>>(4)?,
                    ))
                },
            )
            .optional()?;

        let (access_key, market_name, issued_at_raw, total_raw, declared_item_count) = match header
        {
            Some(columns) => columns,
            None => return Ok(None),
        };

        let mut stmt = conn.prepare(
            "SELECT code, description, quantity, unit, value
             FROM invoice_items WHERE invoice_key = ?1
             ORDER BY position",
        )?;
        let items = stmt
            .query_map(params![key_digits], |row| {
                Ok((
                    row.get::<_, Option<String>>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|(code, description, quantity, unit, value)| InvoiceItem {
                code,
                description,
                quantity: decimal_column(quantity, "quantity", key_digits),
                unit,
                value: decimal_column(value, "value", key_digits),
            })
            .collect();

        Ok(Some(Invoice {
            access_key: Some(access_key),
            market_name,
            issued_at: datetime_column(issued_at_raw, key_digits),
            total_value: decimal_column(total_raw, "total_value", key_digits),
            declared_item_count,
            items,
        }))
    }

    fn insert_unique(&self, invoice: &Invoice) -> Result<InsertOutcome, StoreError> {
        let key_digits = match invoice.key_digits() {
            Some(digits) => digits,
            None => {
                return Err(StoreError::InvalidRecord {
                    key: invoice.access_key.clone().unwrap_or_default(),
                    reason: "access key does not project to 44 digits".to_string(),
                })
            }
        };

        let conn = self.lock();
        let tx = conn.unchecked_transaction()?;

        let header_insert = tx.execute(
            "INSERT INTO invoices
             (key_digits, access_key, market_name, issued_at, total_value, declared_item_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                key_digits,
                invoice.access_key,
                invoice.market_name,
                invoice.issued_at.map(|dt| dt.format(DATETIME_COLUMN_FORMAT).to_string()),
                invoice.total_value.as_ref().map(|v| v.to_string()),
                invoice.declared_item_count,
            ],
        );
        match header_insert {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                tracing::debug!("Invoice {} was already present at insert time", key_digits);
                return Ok(InsertOutcome::DuplicateKey);
            }
            Err(e) => return Err(e.into()),
        }

        {
            let mut stmt = tx.prepare(
                "INSERT INTO invoice_items
                 (invoice_key, position, code, description, quantity, unit, value)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for (position, item) in invoice.items.iter().enumerate() {
                stmt.execute(params![
                    key_digits,
                    position as i64,
                    item.code,
                    item.description,
                    item.quantity.as_ref().map(|q| q.to_string()),
                    item.unit,
                    item.value.as_ref().map(|v| v.to_string()),
                ])?;
            }
        }

        tx.commit()?;
        Ok(InsertOutcome::Inserted)
    }
}

fn init_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS invoices (
            key_digits          TEXT PRIMARY KEY,
            access_key          TEXT NOT NULL,
            market_name         TEXT,
            issued_at           TEXT,
            total_value         TEXT,
            declared_item_count INTEGER,
            created_at          TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS invoice_items (
            id          INTEGER PRIMARY KEY,
            invoice_key TEXT NOT NULL REFERENCES invoices(key_digits),
            position    INTEGER NOT NULL,
            code        TEXT,
            description TEXT,
            quantity    TEXT,
            unit        TEXT,
            value       TEXT,
            UNIQUE(invoice_key, position)
        );
        CREATE INDEX IF NOT EXISTS idx_items_invoice ON invoice_items(invoice_key);
        ",
    )
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    e.sqlite_error_code() == Some(ErrorCode::ConstraintViolation)
}

fn decimal_column(raw: Option<String>, column: &str, key: &str) -> Option<BigDecimal> {
    let raw = raw?;
    match BigDecimal::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("Stored {} '{}' for invoice {} is not a decimal: {}", column, raw, key, e);
            None
        }
    }
}

fn datetime_column(raw: Option<String>, key: &str) -> Option<NaiveDateTime> {
    let raw = raw?;
    match NaiveDateTime::parse_from_str(&raw, DATETIME_COLUMN_FORMAT) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("Stored issued_at '{}' for invoice {} is not a timestamp: {}", raw, key, e);
            None
        }
    }
}
