//! Persistent storage backend for contactlink.
//!
//! This module provides a durable, crash-safe contact store with:
//! - a write-ahead log (the only on-disk state) replayed on open
//! - file locking for single-process access
//! - CRC32 checksums for corruption detection
//!
//! # Layout
//!
//! ```text
//! <dir>/
//! ├── .lock          exclusive process lock
//! └── contacts.wal   append-only mutation log
//! ```

mod codec;
mod file_lock;
mod store;
mod wal;

pub use file_lock::StoreLock;
pub use store::{PersistentContactStore, WAL_FILE_NAME};
pub use wal::{WalEntry, WalEntryKind, WriteAheadLog};

use std::path::Path;

use crate::storage::StorageError;

/// Configuration for persistent storage.
#[derive(Debug, Clone)]
pub struct PersistentConfig {
    /// Whether to fsync after every write (slower but safer).
    pub sync_on_write: bool,
}

impl Default for PersistentConfig {
    fn default() -> Self {
        Self {
            sync_on_write: true,
        }
    }
}

impl PersistentConfig {
    /// Config for throwaway stores (tests, benchmarks).
    #[must_use]
    pub fn unsynced() -> Self {
        Self {
            sync_on_write: false,
        }
    }
}

/// Open or create a persistent contact store in `path`.
///
/// The returned store holds an exclusive lock on the directory until it is
/// dropped.
///
/// # Errors
/// - `ConnectionError` if another process holds the lock
/// - `BackendError` if the directory cannot be created or the WAL cannot be
///   read
///
/// # Example
/// ```rust,ignore
/// use std::sync::Arc;
/// use contactlink::storage::persistent::open_store;
/// use contactlink::IdentityResolver;
///
/// let store = open_store("./contacts.db", None)?;
/// let resolver = IdentityResolver::new(Arc::new(store));
/// ```
pub fn open_store(
    path: impl AsRef<Path>,
    config: Option<PersistentConfig>,
) -> Result<PersistentContactStore, StorageError> {
    let cfg = config.unwrap_or_default();
    PersistentContactStore::open(path.as_ref(), &cfg)
}
