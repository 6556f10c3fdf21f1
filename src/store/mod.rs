// src/store/mod.rs

pub mod sqlite;

use crate::sefaz::models::Invoice;
use crate::utils::error::StoreError;

/// Result of a single uniqueness-guarded insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// The store already holds a row with this key, discovered at insert
    /// time (typically a concurrent writer).
    DuplicateKey,
}

/// What the persistence gate did with an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    Stored,
    AlreadyStored,
    /// The invoice carries no 44-digit access key, so it has no identity to
    /// store under.
    SkippedNoKey,
}

/// Storage collaborator for extracted invoices.
///
/// Implementations key rows on the invoice's 44-digit projection and must
/// enforce uniqueness on it, reporting violations as `DuplicateKey` rather
/// than an error.
pub trait InvoiceStore {
    fn find_by_key(&self, key_digits: &str) -> Result<Option<Invoice>, StoreError>;
    fn insert_unique(&self, invoice: &Invoice) -> Result<InsertOutcome, StoreError>;
}

/// Stores an invoice at most once per access key.
///
/// Find-then-insert keeps the common re-scan case to a single read; losing
/// the race between those two steps to a concurrent writer surfaces as a
/// duplicate-key insert, which counts as success. Stored rows are never
/// updated.
pub fn persist(store: &dyn InvoiceStore, invoice: &Invoice) -> Result<PersistOutcome, StoreError> {
    let key_digits = match invoice.key_digits() {
        Some(digits) => digits,
        None => {
            tracing::warn!("Invoice has no valid access key and will not be stored");
            return Ok(PersistOutcome::SkippedNoKey);
        }
    };

    if store.find_by_key(&key_digits)?.is_some() {
        tracing::info!("Invoice {} already stored; nothing to do", key_digits);
        return Ok(PersistOutcome::AlreadyStored);
    }

    match store.insert_unique(invoice)? {
        InsertOutcome::Inserted => {
            tracing::info!("Invoice {} stored", key_digits);
            Ok(PersistOutcome::Stored)
        }
        InsertOutcome::DuplicateKey => {
            tracing::info!("Invoice {} was stored concurrently; treating as success", key_digits);
            Ok(PersistOutcome::AlreadyStored)
        }
    }
}
