use redb::{ReadableTable, ReadableTableMetadata};

use super::db::{Database, DatabaseError};
use super::models::EntryRecord;
use super::tables::*;
use crate::reference::ReferenceGenerator;

/// References claimed for an entry that has not been committed yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservedReferences {
    pub call_reference: String,
    pub delete_reference: String,
}

impl Database {
    // ========================================================================
    // Entry operations
    // ========================================================================

    /// Generate and claim a unique call and delete reference for `id`.
    ///
    /// Generation, the collision check and the claim happen in one write
    /// transaction, so concurrent uploads can never be handed the same value.
    pub fn reserve_references(
        &self,
        id: &str,
        generator: &ReferenceGenerator,
        call_reference_length: usize,
        delete_reference_length: usize,
    ) -> Result<ReservedReferences, DatabaseError> {
        debug_assert!(!id.is_empty(), "entry id must not be empty");

        let write_txn = self.begin_write()?;
        let reserved = {
            let mut calls = write_txn.open_table(CALL_REFERENCES)?;
            let call_reference = generator.generate_unique(call_reference_length, |c| {
                Ok::<_, DatabaseError>(calls.get(c)?.is_some())
            })?;
            calls.insert(call_reference.as_str(), id)?;

            let mut deletes = write_txn.open_table(DELETE_REFERENCES)?;
            let delete_reference = generator.generate_unique(delete_reference_length, |d| {
                Ok::<_, DatabaseError>(deletes.get(d)?.is_some())
            })?;
            deletes.insert(delete_reference.as_str(), id)?;

            ReservedReferences {
                call_reference,
                delete_reference,
            }
        };
        write_txn.commit()?;
        Ok(reserved)
    }

    /// Drop the reservations of an entry that was never committed.
    pub fn release_references(
        &self,
        id: &str,
        reserved: &ReservedReferences,
    ) -> Result<(), DatabaseError> {
        let write_txn = self.begin_write()?;
        {
            let committed = write_txn.open_table(ENTRIES)?.get(id)?.is_some();
            if !committed {
                let mut calls = write_txn.open_table(CALL_REFERENCES)?;
                let owned = calls
                    .get(reserved.call_reference.as_str())?
                    .is_some_and(|v| v.value() == id);
                if owned {
                    calls.remove(reserved.call_reference.as_str())?;
                }

                let mut deletes = write_txn.open_table(DELETE_REFERENCES)?;
                let owned = deletes
                    .get(reserved.delete_reference.as_str())?
                    .is_some_and(|v| v.value() == id);
                if owned {
                    deletes.remove(reserved.delete_reference.as_str())?;
                }
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Make an entry visible. Its references must still be reserved for it.
    pub fn commit_entry(&self, entry: &EntryRecord) -> Result<(), DatabaseError> {
        let write_txn = self.begin_write()?;
        {
            let calls = write_txn.open_table(CALL_REFERENCES)?;
            let call_owned = calls
                .get(entry.call_reference.as_str())?
                .is_some_and(|v| v.value() == entry.id);
            let deletes = write_txn.open_table(DELETE_REFERENCES)?;
            let delete_owned = deletes
                .get(entry.delete_reference.as_str())?
                .is_some_and(|v| v.value() == entry.id);
            if !call_owned || !delete_owned {
                return Err(DatabaseError::Conflict(format!(
                    "references of entry {} are no longer reserved",
                    entry.id
                )));
            }

            let mut table = write_txn.open_table(ENTRIES)?;
            let data = rmp_serde::to_vec_named(entry)?;
            table.insert(entry.id.as_str(), data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Get a committed entry by its call reference
    pub fn get_entry_by_call_reference(
        &self,
        call_reference: &str,
    ) -> Result<Option<EntryRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let calls = read_txn.open_table(CALL_REFERENCES)?;

        let id = match calls.get(call_reference)? {
            Some(data) => data.value().to_string(),
            None => return Ok(None),
        };

        let entries = read_txn.open_table(ENTRIES)?;
        match entries.get(id.as_str())? {
            Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
            None => Ok(None),
        }
    }

    /// Remove a committed entry and both of its references in one transaction.
    /// Returns the removed record, or `None` if no committed entry matched.
    pub fn remove_entry_by_delete_reference(
        &self,
        delete_reference: &str,
    ) -> Result<Option<EntryRecord>, DatabaseError> {
        let write_txn = self.begin_write()?;

        let id: Option<String> = {
            let deletes = write_txn.open_table(DELETE_REFERENCES)?;
            let result = deletes.get(delete_reference)?.map(|v| v.value().to_string());
            result
        };

        let removed = match id {
            Some(id) => {
                let record: Option<EntryRecord> = {
                    let mut entries = write_txn.open_table(ENTRIES)?;
                    let result = match entries.remove(id.as_str())? {
                        Some(data) => Some(rmp_serde::from_slice(data.value())?),
                        None => None,
                    };
                    result
                };

                // Reservations of an uncommitted upload stay untouched
                if let Some(ref record) = record {
                    let mut calls = write_txn.open_table(CALL_REFERENCES)?;
                    calls.remove(record.call_reference.as_str())?;
                    let mut deletes = write_txn.open_table(DELETE_REFERENCES)?;
                    deletes.remove(delete_reference)?;
                }
                record
            }
            None => None,
        };

        write_txn.commit()?;
        Ok(removed)
    }

    /// Check if a call reference is claimed (committed or reserved)
    pub fn call_reference_exists(&self, call_reference: &str) -> Result<bool, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(CALL_REFERENCES)?;
        Ok(table.get(call_reference)?.is_some())
    }

    /// Check if a delete reference is claimed (committed or reserved)
    pub fn delete_reference_exists(&self, delete_reference: &str) -> Result<bool, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(DELETE_REFERENCES)?;
        Ok(table.get(delete_reference)?.is_some())
    }

    /// Number of committed entries
    pub fn entry_count(&self) -> Result<u64, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(ENTRIES)?;
        Ok(table.len()?)
    }
}
