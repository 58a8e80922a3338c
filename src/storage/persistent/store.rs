//! WAL-backed contact store.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::RwLock;

use chrono::Utc;

use crate::contact::{Contact, ContactId, NewContact};
use crate::storage::index::{ContactIndex, Demote};
use crate::storage::traits::{ContactStore, StorageError};

use super::file_lock::StoreLock;
use super::wal::{WalEntryKind, WriteAheadLog};
use super::PersistentConfig;

/// File name of the log inside the store directory.
pub const WAL_FILE_NAME: &str = "contacts.wal";

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

fn io_err(context: &'static str, e: &std::io::Error) -> StorageError {
    StorageError::BackendError(format!("{context}: {e}"))
}

/// Durable contact store.
///
/// Reads are served from an in-memory index rebuilt from the WAL on open.
/// Writes hold the index lock across guard check, WAL append and apply, so
/// a mutation is either logged and visible or neither.
pub struct PersistentContactStore {
    index: RwLock<ContactIndex>,
    wal: WriteAheadLog,
    _lock: StoreLock,
}

impl std::fmt::Debug for PersistentContactStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentContactStore")
            .field("wal", &self.wal.path())
            .finish_non_exhaustive()
    }
}

impl PersistentContactStore {
    /// Open or create a store in `dir`.
    pub(super) fn open(dir: &Path, config: &PersistentConfig) -> Result<Self, StorageError> {
        fs::create_dir_all(dir).map_err(|e| io_err("create store directory", &e))?;

        let lock = StoreLock::acquire(dir).map_err(|e| match e.kind() {
            ErrorKind::WouldBlock => StorageError::ConnectionError(e.to_string()),
            _ => io_err("lock store directory", &e),
        })?;

        let wal = WriteAheadLog::open(&dir.join(WAL_FILE_NAME), config.sync_on_write)
            .map_err(|e| io_err("open wal", &e))?;

        let mut index = ContactIndex::default();
        let mut replayed = 0usize;
        for entry in wal.iter().map_err(|e| io_err("read wal", &e))? {
            let entry = entry.map_err(|e| io_err("replay wal", &e))?;
            match entry.kind {
                WalEntryKind::Insert(contact) => index.apply_insert(contact),
                WalEntryKind::Relink {
                    old_primary,
                    new_primary,
                    at,
                } => {
                    index.apply_relink(old_primary, new_primary, at);
                }
                WalEntryKind::Demote {
                    id,
                    new_primary,
                    at,
                } => index.apply_demote(id, new_primary, at),
            }
            replayed += 1;
        }

        tracing::info!(
            path = %dir.display(),
            replayed,
            contacts = index.len(),
            "opened persistent contact store"
        );

        Ok(Self {
            index: RwLock::new(index),
            wal,
            _lock: lock,
        })
    }

    fn append(&self, kind: WalEntryKind) -> Result<(), StorageError> {
        self.wal
            .append(kind)
            .map(|_| ())
            .map_err(|e| io_err("append wal", &e))
    }
}

impl ContactStore for PersistentContactStore {
    fn find_by_phone_number(&self, phone_number: &str) -> Result<Vec<Contact>, StorageError> {
        let index = self
            .index
            .read()
            .map_err(|_| lock_err("contact.find_by_phone_number"))?;
        Ok(index.find_by_phone_number(phone_number))
    }

    fn find_by_email(&self, email: &str) -> Result<Vec<Contact>, StorageError> {
        let index = self.index.read().map_err(|_| lock_err("contact.find_by_email"))?;
        Ok(index.find_by_email(email))
    }

    fn insert(&self, contact: NewContact) -> Result<Contact, StorageError> {
        let mut index = self.index.write().map_err(|_| lock_err("contact.insert"))?;
        index.check_insert(&contact)?;
        let stored = Contact::from_draft(index.next_id(), contact, Utc::now());
        self.append(WalEntryKind::Insert(stored.clone()))?;
        index.apply_insert(stored.clone());
        Ok(stored)
    }

    fn relink_all_with_linked_id(
        &self,
        old_primary: ContactId,
        new_primary: ContactId,
    ) -> Result<usize, StorageError> {
        let mut index = self.index.write().map_err(|_| lock_err("contact.relink"))?;
        index.check_relink(old_primary, new_primary)?;
        let at = Utc::now();
        self.append(WalEntryKind::Relink {
            old_primary,
            new_primary,
            at,
        })?;
        Ok(index.apply_relink(old_primary, new_primary, at))
    }

    fn update_to_secondary(
        &self,
        id: ContactId,
        new_primary: ContactId,
    ) -> Result<(), StorageError> {
        let mut index = self.index.write().map_err(|_| lock_err("contact.demote"))?;
        if index.check_demote(id, new_primary)? == Demote::AlreadyLinked {
            return Ok(());
        }
        let at = Utc::now();
        self.append(WalEntryKind::Demote { id, new_primary, at })?;
        index.apply_demote(id, new_primary, at);
        Ok(())
    }

    fn find_secondaries_of(&self, primary: ContactId) -> Result<Vec<Contact>, StorageError> {
        let index = self
            .index
            .read()
            .map_err(|_| lock_err("contact.find_secondaries_of"))?;
        Ok(index.secondaries_of(primary))
    }

    fn get(&self, id: ContactId) -> Result<Option<Contact>, StorageError> {
        let index = self.index.read().map_err(|_| lock_err("contact.get"))?;
        Ok(index.get(id).cloned())
    }

    fn list(&self) -> Result<Vec<Contact>, StorageError> {
        let index = self.index.read().map_err(|_| lock_err("contact.list"))?;
        Ok(index.list())
    }
}
