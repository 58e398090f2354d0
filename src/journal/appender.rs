//! Journal Appender
//!
//! Appends records to one journal file.
//!
//! ## Write path
//! Under the `state` lock, then the `file` lock:
//! 1. Check the record fits before `max_file_length`
//! 2. Write the bytes at the current position
//! 3. Persist the new end of data in the header
//! 4. Advance the in-memory position
//!
//! A failure at step 2 or 3 leaves the position where it was, so the header
//! never points past a write that has not finished. Whatever a failed write
//! left on disk lies beyond the header's position and the next record
//! overwrites it. The record is then folded into the dangling index under
//! its own lock.
//!
//! Lock order is `state` → `file`; `dangling` is never held with either.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use fs2::FileExt;
use parking_lot::Mutex;

use crate::error::{CoordError, Result};
use crate::uid::{current_time_millis, Uid};

use super::{DanglingIndex, JournalHeader, LogRecord, LogState, HEADER_LENGTH};

/// Outcome of [`JournalAppender::append`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteResult {
    /// Record written at `position`
    Written { position: u64, length: u64 },
    /// The record does not fit; the caller must switch files
    RolloverNeeded,
}

/// Bytes behind an appender; [`File`] in production
pub trait JournalStorage: Read + Write + Seek + Send {
    /// Flush written data to stable storage
    fn sync(&mut self) -> io::Result<()>;

    /// Give up any lock held on the storage
    fn release(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl JournalStorage for File {
    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }

    fn release(&mut self) -> io::Result<()> {
        FileExt::unlock(&*self)
    }
}

struct WriteState {
    header: JournalHeader,
    /// Next free offset; always equal to the persisted header position
    position: u64,
}

/// Appends records to a single locked journal file
pub struct JournalAppender<F: JournalStorage = File> {
    path: PathBuf,
    max_file_length: u64,
    file: Mutex<F>,
    state: Mutex<WriteState>,
    dangling: Mutex<DanglingIndex>,
    closed: AtomicBool,
}

impl JournalAppender<File> {
    /// Open or create a journal file, locking it for this process
    pub fn open(path: &Path, max_file_length: u64) -> Result<Self> {
        check_max_file_length(max_file_length)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        file.try_lock_exclusive().map_err(|e| {
            if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() {
                CoordError::JournalLocked {
                    path: path.to_path_buf(),
                }
            } else {
                CoordError::Io(e)
            }
        })?;

        let mut appender = Self::with_storage(path, file, max_file_length)?;
        let file = appender.file.get_mut();
        if file.metadata()?.len() < max_file_length {
            file.set_len(max_file_length)?;
            file.sync_all()?;
        }
        Ok(appender)
    }
}

impl<F: JournalStorage> JournalAppender<F> {
    /// Run an appender over already opened storage; `path` names the
    /// journal in logs and errors
    pub fn with_storage(path: &Path, mut storage: F, max_file_length: u64) -> Result<Self> {
        check_max_file_length(max_file_length)?;

        let storage_length = storage.seek(SeekFrom::End(0))?;
        let mut header = if storage_length < HEADER_LENGTH {
            let header = JournalHeader::new(current_time_millis());
            header.write_to(&mut storage)?;
            tracing::debug!(path = %path.display(), "initialized new journal file");
            header
        } else {
            JournalHeader::read_from(&mut storage, path)?
        };

        if header.position > max_file_length {
            return Err(CoordError::InvalidJournal {
                path: path.to_path_buf(),
                reason: format!(
                    "write position {} is beyond the configured max length {}",
                    header.position, max_file_length
                ),
            });
        }

        if header.state == LogState::Unclean {
            tracing::warn!(
                path = %path.display(),
                "journal was not closed cleanly, last write position {}",
                header.position
            );
        }

        header.state = LogState::Unclean;
        JournalHeader::write_state(&mut storage, LogState::Unclean)?;
        storage.sync()?;

        let position = header.position;
        Ok(Self {
            path: path.to_path_buf(),
            max_file_length,
            file: Mutex::new(storage),
            state: Mutex::new(WriteState { header, position }),
            dangling: Mutex::new(DanglingIndex::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Append a record, or report that the file is full
    pub fn append(&self, record: &LogRecord) -> Result<WriteResult> {
        self.ensure_open()?;

        let bytes = record.to_bytes();
        let length = bytes.len() as u64;

        let position = {
            let mut state = self.state.lock();
            let position = state.position;
            if position + length > self.max_file_length {
                tracing::debug!(
                    path = %self.path.display(),
                    "journal full at position {}, {} bytes needed",
                    position,
                    length
                );
                return Ok(WriteResult::RolloverNeeded);
            }

            let end = position + length;
            let written = {
                let mut file = self.file.lock();
                write_at(&mut *file, position, &bytes)
                    .and_then(|()| JournalHeader::write_position(&mut *file, end))
            };
            if let Err(e) = written {
                tracing::error!(
                    path = %self.path.display(),
                    position,
                    "failed writing journal record {}: {}",
                    record,
                    e
                );
                return Err(e);
            }

            state.position = end;
            state.header.position = end;
            position
        };

        self.dangling.lock().apply(record);
        tracing::trace!(position, length, "appended {}", record);
        Ok(WriteResult::Written { position, length })
    }

    /// Flush OS buffers to disk
    pub fn force(&self) -> Result<()> {
        self.file.lock().sync()?;
        Ok(())
    }

    /// Mark the file clean, flush it and release the lock
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let mut state = self.state.lock();
        state.header.state = LogState::Clean;
        state.header.position = state.position;

        let mut file = self.file.lock();
        JournalHeader::write_position(&mut *file, state.position)?;
        JournalHeader::write_state(&mut *file, LogState::Clean)?;
        file.sync()?;
        file.release()?;

        tracing::debug!(
            path = %self.path.display(),
            "closed journal at position {}",
            state.position
        );
        Ok(())
    }

    /// Empty the file so it can be reused after a rollover
    pub fn rewind(&self) -> Result<()> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        {
            let mut file = self.file.lock();
            JournalHeader::write_position(&mut *file, HEADER_LENGTH)?;
        }
        state.position = HEADER_LENGTH;
        state.header.position = HEADER_LENGTH;
        self.dangling.lock().clear();
        Ok(())
    }

    /// Stamp the header; the newest timestamp marks the active file
    pub fn set_timestamp(&self, timestamp: i64) -> Result<()> {
        let mut state = self.state.lock();
        let mut file = self.file.lock();
        JournalHeader::write_timestamp(&mut *file, timestamp)?;
        state.header.timestamp = timestamp;
        Ok(())
    }

    // =========================================================================
    // Dangling Index
    // =========================================================================

    /// Snapshot of the dangling records
    pub fn dangling_records(&self) -> HashMap<Uid, LogRecord> {
        self.dangling.lock().records().clone()
    }

    pub fn dangling_count(&self) -> usize {
        self.dangling.lock().len()
    }

    /// Replace the index, after a cold-start replay
    pub fn set_dangling_records(&self, index: DanglingIndex) {
        *self.dangling.lock() = index;
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Next free offset
    pub fn position(&self) -> u64 {
        self.state.lock().position
    }

    pub fn max_file_length(&self) -> u64 {
        self.max_file_length
    }

    pub fn timestamp(&self) -> i64 {
        self.state.lock().header.timestamp
    }

    /// The header as last persisted
    pub fn header(&self) -> JournalHeader {
        self.state.lock().header
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(CoordError::IllegalState(format!(
                "journal {} is closed",
                self.path.display()
            )));
        }
        Ok(())
    }
}

fn write_at<F: Write + Seek>(file: &mut F, position: u64, bytes: &[u8]) -> Result<()> {
    file.seek(SeekFrom::Start(position))?;
    file.write_all(bytes)?;
    Ok(())
}

fn check_max_file_length(max_file_length: u64) -> Result<()> {
    if max_file_length <= HEADER_LENGTH {
        return Err(CoordError::Config(format!(
            "journal max length {} does not leave room for records",
            max_file_length
        )));
    }
    Ok(())
}
