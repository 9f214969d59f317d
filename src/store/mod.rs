//! Reference-backed content store.
//!
//! [`ContentStore`] is the contract the HTTP layer depends on. An entry's
//! references are claimed when it is stored, but the entry only becomes
//! resolvable once its [`EntryWriter`] is finished.

mod repository;

pub use repository::{EntryRepository, EntryWriter, StoreSettings};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::object_store::{ObjectReader, ObjectStoreError};
use crate::storage::models::EntryRecord;
use crate::storage::DatabaseError;

/// Streamable content of a resolved entry. Dropping it releases the handle.
pub type EntryReader = Box<dyn ObjectReader>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("entry not found")]
    NotFound,
    #[error("content store used before initialization")]
    NotInitialized,
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("metadata and content out of sync: {0}")]
    Inconsistency(String),
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error(transparent)]
    Object(#[from] ObjectStoreError),
}

/// One stored file plus its metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    /// Assigned by the store; empty until then.
    pub id: String,
    pub call_reference: String,
    pub delete_reference: String,
    pub author: Uuid,
    pub filename: String,
    pub content_type: String,
    pub upload_date: DateTime<Utc>,
    pub byte_size: u64,
}

impl Entry {
    /// A new, unsaved entry uploaded now.
    pub fn new(author: Uuid, filename: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            call_reference: String::new(),
            delete_reference: String::new(),
            author,
            filename: filename.into(),
            content_type: content_type.into(),
            upload_date: Utc::now(),
            byte_size: 0,
        }
    }
}

impl From<EntryRecord> for Entry {
    fn from(record: EntryRecord) -> Self {
        Self {
            id: record.id,
            call_reference: record.call_reference,
            delete_reference: record.delete_reference,
            author: record.author,
            filename: record.filename,
            content_type: record.content_type,
            upload_date: record.upload_date,
            byte_size: record.byte_size,
        }
    }
}

impl From<&Entry> for EntryRecord {
    fn from(entry: &Entry) -> Self {
        Self {
            id: entry.id.clone(),
            call_reference: entry.call_reference.clone(),
            delete_reference: entry.delete_reference.clone(),
            author: entry.author,
            filename: entry.filename.clone(),
            content_type: entry.content_type.clone(),
            byte_size: entry.byte_size,
            upload_date: entry.upload_date,
        }
    }
}

/// Storage contract for uploaded entries.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Create tables and indexes. Must succeed before any other call.
    async fn initialize(&self) -> Result<(), StoreError>;

    /// Assign id and references to `entry` and open a writer for its content.
    /// The entry becomes resolvable when the writer is finished.
    async fn store(&self, entry: &mut Entry) -> Result<EntryWriter, StoreError>;

    /// Look up a committed entry by call reference and open its content.
    async fn resolve(&self, call_reference: &str) -> Result<(Entry, EntryReader), StoreError>;

    /// Delete a committed entry and its content by delete reference.
    async fn remove(&self, delete_reference: &str) -> Result<(), StoreError>;

    /// Release backend resources. Idempotent.
    ///
    /// Only the store's own handles are released. Anything else sharing the
    /// database (a `UserManager`, a live `EntryWriter`) keeps it open until
    /// it is dropped.
    async fn close(&self) -> Result<(), StoreError>;
}
