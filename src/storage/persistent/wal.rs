//! Write-ahead log of contact mutations.
//!
//! The log is the source of truth for the persistent store: every mutation
//! is appended (and optionally fsynced) before it is applied to the
//! in-memory index, and the index is rebuilt by replaying the log on open.
//!
//! # File Format
//! ```text
//! [MAGIC: 4 bytes][VERSION: 1 byte]
//! [ENTRY 1: codec-framed WalEntry]
//! [ENTRY 2: codec-framed WalEntry]
//! ...
//! ```
//!
//! A torn or corrupted tail (crash mid-append) is cut off on open; every
//! entry before it survives. An append that fails while the process keeps
//! running is cut off immediately, so no later entry ever lands behind a
//! partial frame.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Error as IoError, ErrorKind, Result as IoResult, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::contact::{Contact, ContactId};

use super::codec;

/// A single entry in the write-ahead log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    /// Monotonically increasing sequence number.
    pub sequence: u64,
    pub kind: WalEntryKind,
}

/// A logged mutation. Timestamps are recorded so replay is deterministic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WalEntryKind {
    Insert(Contact),
    Relink {
        old_primary: ContactId,
        new_primary: ContactId,
        at: DateTime<Utc>,
    },
    Demote {
        id: ContactId,
        new_primary: ContactId,
        at: DateTime<Utc>,
    },
}

/// Result of scanning an existing log.
struct Scan {
    last_sequence: u64,
    valid_len: u64,
    corrupt: Option<String>,
}

/// The write end of a log file.
trait LogFile: Write {
    fn truncate_to(&mut self, len: u64) -> IoResult<()>;
    fn sync(&mut self) -> IoResult<()>;
}

impl LogFile for File {
    fn truncate_to(&mut self, len: u64) -> IoResult<()> {
        self.set_len(len)
    }

    fn sync(&mut self) -> IoResult<()> {
        self.sync_data()
    }
}

/// Writer state: everything up to `len` is complete entries.
struct Tail<F> {
    file: F,
    sequence: u64,
    len: u64,
    /// A failed append could not be cut back off the file.
    torn: bool,
}

impl<F: LogFile> Tail<F> {
    fn new(file: F, sequence: u64, len: u64) -> Self {
        Self {
            file,
            sequence,
            len,
            torn: false,
        }
    }

    fn write_frame(&mut self, frame: &[u8], sync: bool) -> IoResult<()> {
        self.file.write_all(frame)?;
        self.file.flush()?;
        if sync {
            self.file.sync()?;
        }
        Ok(())
    }

    /// Appends one encoded entry. On failure the file is cut back to the
    /// last complete entry; if even that fails, every later append is
    /// refused until the log is reopened.
    fn append(&mut self, frame: &[u8], sync: bool) -> IoResult<()> {
        if self.torn {
            return Err(IoError::new(
                ErrorKind::Other,
                "wal has a partial entry at its tail; reopen the store",
            ));
        }
        if let Err(e) = self.write_frame(frame, sync) {
            if let Err(cut) = self.file.truncate_to(self.len) {
                self.torn = true;
                tracing::error!(
                    error = %cut,
                    valid_len = self.len,
                    "failed to remove partial WAL entry; refusing further appends"
                );
            }
            return Err(e);
        }
        self.len += frame.len() as u64;
        Ok(())
    }
}

/// Append-only mutation log.
///
/// Thread-safe via internal mutex.
pub struct WriteAheadLog {
    path: PathBuf,
    tail: Mutex<Tail<File>>,
    sync_on_write: bool,
}

fn poisoned() -> IoError {
    IoError::new(ErrorKind::Other, "poisoned lock: wal.tail")
}

impl WriteAheadLog {
    /// Open or create a WAL file.
    ///
    /// An existing file is scanned to find the last sequence number; a torn
    /// tail is truncated away so new entries append after the last good one.
    pub fn open(path: &Path, sync_on_write: bool) -> IoResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let last_sequence = if file.metadata()?.len() >= codec::HEADER_LEN {
            let scan = Self::scan(path)?;
            if let Some(reason) = &scan.corrupt {
                tracing::warn!(
                    path = %path.display(),
                    last_sequence = scan.last_sequence,
                    reason = %reason,
                    "WAL tail corrupted; truncating to last valid entry"
                );
                file.set_len(scan.valid_len)?;
                file.sync_all()?;
            }
            scan.last_sequence
        } else {
            let mut file = file;
            file.set_len(0)?;
            codec::write_header(&mut file)?;
            file.sync_all()?;
            0
        };

        let file = OpenOptions::new().append(true).open(path)?;
        let len = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            tail: Mutex::new(Tail::new(file, last_sequence, len)),
            sync_on_write,
        })
    }

    /// Append an entry to the WAL.
    ///
    /// Returns the sequence number assigned to this entry. The sequence only
    /// advances once the entry is fully written.
    pub fn append(&self, kind: WalEntryKind) -> IoResult<u64> {
        let mut tail = self.tail.lock().map_err(|_| poisoned())?;

        let entry = WalEntry {
            sequence: tail.sequence + 1,
            kind,
        };
        let encoded = codec::encode(&entry)?;
        tail.append(&encoded, self.sync_on_write)?;

        tail.sequence = entry.sequence;
        Ok(entry.sequence)
    }

    /// Iterate over all entries in the WAL.
    pub fn iter(&self) -> IoResult<WalIterator> {
        WalIterator::new(&self.path)
    }

    /// Get the current sequence number.
    pub fn current_sequence(&self) -> IoResult<u64> {
        Ok(self.tail.lock().map_err(|_| poisoned())?.sequence)
    }

    /// Path of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn scan(path: &Path) -> IoResult<Scan> {
        let mut iter = WalIterator::new(path)?;
        let mut scan = Scan {
            last_sequence: 0,
            valid_len: iter.position()?,
            corrupt: None,
        };

        while let Some(result) = iter.next() {
            match result {
                Ok(entry) => {
                    scan.last_sequence = entry.sequence;
                    scan.valid_len = iter.position()?;
                }
                Err(e) => {
                    scan.corrupt = Some(e.to_string());
                    break;
                }
            }
        }
        if scan.corrupt.is_none() && scan.valid_len < iter.file_size {
            scan.corrupt = Some("truncated entry at end of log".to_string());
        }
        Ok(scan)
    }
}

/// Iterator over WAL entries. Stops at the first incomplete entry.
pub struct WalIterator {
    reader: BufReader<File>,
    file_size: u64,
}

impl WalIterator {
    fn new(path: &Path) -> IoResult<Self> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let _version = codec::read_header(&mut reader)?;
        Ok(Self { reader, file_size })
    }

    fn position(&mut self) -> IoResult<u64> {
        self.reader.stream_position()
    }
}

impl Iterator for WalIterator {
    type Item = IoResult<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.position() {
            Ok(pos) if pos >= self.file_size => return None,
            Ok(_) => {}
            Err(e) => return Some(Err(e)),
        }

        match codec::decode(&mut self.reader) {
            Ok(entry) => Some(Ok(entry)),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => None,
            Err(e) => Some(Err(e)),
        }
    }
}
