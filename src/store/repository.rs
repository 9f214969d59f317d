use async_trait::async_trait;
use bytes::Bytes;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use super::{ContentStore, Entry, EntryReader, StoreError};
use crate::object_store::{LocalStore, MemoryStore, ObjectStore, ObjectStoreError, ObjectUpload};
use crate::reference::{
    ReferenceGenerator, DEFAULT_CALL_REFERENCE_LENGTH, DEFAULT_DELETE_REFERENCE_LENGTH,
};
use crate::storage::models::EntryRecord;
use crate::storage::{Database, ReservedReferences};

/// Reference lengths used when storing new entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreSettings {
    pub call_reference_length: usize,
    pub delete_reference_length: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            call_reference_length: DEFAULT_CALL_REFERENCE_LENGTH,
            delete_reference_length: DEFAULT_DELETE_REFERENCE_LENGTH,
        }
    }
}

/// [`ContentStore`] backed by redb metadata and an [`ObjectStore`] for content.
pub struct EntryRepository {
    db: RwLock<Option<Database>>,
    objects: Arc<dyn ObjectStore>,
    generator: Arc<ReferenceGenerator>,
    settings: StoreSettings,
    initialized: AtomicBool,
}

impl EntryRepository {
    pub fn new(db: Database, objects: Arc<dyn ObjectStore>, settings: StoreSettings) -> Self {
        Self {
            db: RwLock::new(Some(db)),
            objects,
            generator: Arc::new(ReferenceGenerator::default()),
            settings,
            initialized: AtomicBool::new(false),
        }
    }

    /// Metadata in `data_dir`, content as files in `files_dir`.
    pub fn open_local<P: AsRef<Path>, Q: AsRef<Path>>(
        data_dir: P,
        files_dir: Q,
        settings: StoreSettings,
    ) -> Result<Self, StoreError> {
        let db = Database::open(data_dir)?;
        let objects = LocalStore::new(files_dir).map_err(ObjectStoreError::from)?;
        Ok(Self::new(db, Arc::new(objects), settings))
    }

    /// Everything kept in memory; nothing survives the process.
    pub fn in_memory(settings: StoreSettings) -> Result<Self, StoreError> {
        let db = Database::in_memory()?;
        Ok(Self::new(db, Arc::new(MemoryStore::new()), settings))
    }

    pub fn with_generator(mut self, generator: ReferenceGenerator) -> Self {
        self.generator = Arc::new(generator);
        self
    }

    fn open_database(&self) -> Result<Database, StoreError> {
        let guard = self
            .db
            .read()
            .map_err(|_| StoreError::Unavailable("database handle poisoned".to_string()))?;
        guard
            .clone()
            .ok_or_else(|| StoreError::Unavailable("content store is closed".to_string()))
    }

    fn database(&self) -> Result<Database, StoreError> {
        let db = self.open_database()?;
        if !self.initialized.load(Ordering::Acquire) {
            return Err(StoreError::NotInitialized);
        }
        Ok(db)
    }
}

#[async_trait]
impl ContentStore for EntryRepository {
    async fn initialize(&self) -> Result<(), StoreError> {
        let db = self.open_database()?;
        db.ensure_tables()?;
        self.initialized.store(true, Ordering::Release);
        tracing::info!(
            backend = self.objects.backend_name(),
            call_reference_length = self.settings.call_reference_length,
            delete_reference_length = self.settings.delete_reference_length,
            "Content store initialized"
        );
        Ok(())
    }

    async fn store(&self, entry: &mut Entry) -> Result<EntryWriter, StoreError> {
        let db = self.database()?;
        let id = uuid::Uuid::new_v4().to_string();

        let reserved = db.reserve_references(
            &id,
            &self.generator,
            self.settings.call_reference_length,
            self.settings.delete_reference_length,
        )?;

        let upload = match self.objects.put_stream(&id).await {
            Ok(upload) => upload,
            Err(e) => {
                if let Err(release_err) = db.release_references(&id, &reserved) {
                    tracing::warn!(entry_id = %id, error = %release_err, "Failed to release references");
                }
                return Err(e.into());
            }
        };

        entry.id = id;
        entry.call_reference = reserved.call_reference.clone();
        entry.delete_reference = reserved.delete_reference.clone();
        entry.byte_size = 0;

        tracing::debug!(
            entry_id = %entry.id,
            call_reference = %entry.call_reference,
            "Opened entry writer"
        );

        Ok(EntryWriter {
            record: EntryRecord::from(&*entry),
            upload: Some(upload),
            db,
            objects: Arc::clone(&self.objects),
            reserved,
            done: false,
        })
    }

    async fn resolve(&self, call_reference: &str) -> Result<(Entry, EntryReader), StoreError> {
        let db = self.database()?;
        let record = db
            .get_entry_by_call_reference(call_reference)?
            .ok_or(StoreError::NotFound)?;

        match self.objects.open(&record.id).await {
            Ok(reader) => Ok((Entry::from(record), reader)),
            Err(ObjectStoreError::NotFound(_)) => {
                // A concurrent delete may have removed it in between
                if db.get_entry_by_call_reference(call_reference)?.is_some() {
                    tracing::error!(
                        entry_id = %record.id,
                        call_reference,
                        "Committed entry has no content"
                    );
                    return Err(StoreError::Inconsistency(format!(
                        "content of entry {} is missing",
                        record.id
                    )));
                }
                Err(StoreError::NotFound)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, delete_reference: &str) -> Result<(), StoreError> {
        let db = self.database()?;
        let record = db
            .remove_entry_by_delete_reference(delete_reference)?
            .ok_or(StoreError::NotFound)?;

        if let Err(e) = self.objects.delete(&record.id).await {
            tracing::error!(
                entry_id = %record.id,
                call_reference = %record.call_reference,
                error = %e,
                "Entry metadata removed but content deletion failed"
            );
            return Err(StoreError::Inconsistency(format!(
                "content of entry {} was not deleted: {e}",
                record.id
            )));
        }

        tracing::debug!(entry_id = %record.id, "Removed entry");
        Ok(())
    }

    /// Drops this repository's database handle. redb releases its file lock
    /// once the last clone of the handle is gone.
    async fn close(&self) -> Result<(), StoreError> {
        let mut guard = self
            .db
            .write()
            .map_err(|_| StoreError::Unavailable("database handle poisoned".to_string()))?;
        if guard.take().is_some() {
            tracing::info!("Content store closed");
        }
        Ok(())
    }
}

/// Streams the content of a newly stored entry.
///
/// `finish` publishes the content and then commits the metadata, which is the
/// moment the entry becomes resolvable. A writer that is dropped unfinished
/// (for example when the client disconnects) discards the content and
/// releases the entry's references.
pub struct EntryWriter {
    record: EntryRecord,
    upload: Option<Box<dyn ObjectUpload>>,
    db: Database,
    objects: Arc<dyn ObjectStore>,
    reserved: ReservedReferences,
    done: bool,
}

impl EntryWriter {
    /// Append a chunk of content.
    pub async fn write(&mut self, data: Bytes) -> Result<(), StoreError> {
        let upload = self.upload.as_mut().ok_or_else(closed_writer)?;
        upload.write(data).await?;
        Ok(())
    }

    /// Commit content and metadata, returning the now visible entry.
    pub async fn finish(mut self) -> Result<Entry, StoreError> {
        let upload = self.upload.take().ok_or_else(closed_writer)?;
        self.record.byte_size = upload.finish().await?;

        if let Err(e) = self.db.commit_entry(&self.record) {
            if let Err(cleanup) = self.objects.delete(&self.record.id).await {
                tracing::error!(
                    entry_id = %self.record.id,
                    error = %cleanup,
                    "Metadata commit failed and content could not be removed"
                );
            }
            return Err(e.into());
        }

        self.done = true;
        tracing::debug!(
            entry_id = %self.record.id,
            bytes = self.record.byte_size,
            "Committed entry"
        );
        Ok(Entry::from(self.record.clone()))
    }

    /// Discard the content and release the references.
    pub async fn abort(mut self) -> Result<(), StoreError> {
        if let Some(upload) = self.upload.take() {
            upload.abort().await?;
        }
        self.db.release_references(&self.record.id, &self.reserved)?;
        self.done = true;
        Ok(())
    }
}

impl Drop for EntryWriter {
    fn drop(&mut self) {
        if !self.done {
            tracing::debug!(entry_id = %self.record.id, "Discarding unfinished entry");
            if let Err(e) = self.db.release_references(&self.record.id, &self.reserved) {
                tracing::warn!(entry_id = %self.record.id, error = %e, "Failed to release references");
            }
        }
    }
}

fn closed_writer() -> StoreError {
    StoreError::Object(ObjectStoreError::Backend(
        "entry writer already closed".to_string(),
    ))
}
