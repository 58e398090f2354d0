//! Journal Cursor
//!
//! Replays a journal file from the first record to the header's recorded
//! write position, on its own read handle.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::{CoordError, CorruptionError, CorruptionKind, Result};

use super::record::{MIN_RECORD_LENGTH, RECORD_PREFIX_LENGTH};
use super::{DanglingIndex, JournalHeader, LogRecord, HEADER_LENGTH};

/// Sequential reader over one journal file
pub struct JournalCursor {
    path: PathBuf,
    reader: BufReader<File>,
    header: JournalHeader,
    /// Offset of the next record
    position: u64,
    /// Logical end of data, from the header
    end_position: u64,
}

impl JournalCursor {
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let header = JournalHeader::read_from(&mut file, path)?;
        file.seek(SeekFrom::Start(HEADER_LENGTH))?;

        Ok(Self {
            path: path.to_path_buf(),
            reader: BufReader::new(file),
            header,
            position: HEADER_LENGTH,
            end_position: header.position,
        })
    }

    /// Read the next record.
    ///
    /// Returns `Ok(None)` at end of data. Structural damage yields
    /// `CoordError::Corruption` and leaves the cursor past the bad record;
    /// when the record's own length cannot be trusted the cursor jumps to the
    /// end of data.
    pub fn read_next(&mut self, skip_crc_check: bool) -> Result<Option<LogRecord>> {
        if self.position >= self.end_position {
            return Ok(None);
        }

        let record_start = self.position;
        let available = self.end_position - self.position;
        if available < RECORD_PREFIX_LENGTH as u64 {
            return Err(self.give_up(
                record_start,
                CorruptionKind::Truncated {
                    needed: RECORD_PREFIX_LENGTH as u64,
                    available,
                },
            ));
        }

        let mut prefix = [0u8; RECORD_PREFIX_LENGTH];
        if let Err(e) = self.read_exact(&mut prefix) {
            return Err(self.read_failure(record_start, e, RECORD_PREFIX_LENGTH as u64));
        }
        let status_code = i32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]);
        let record_length = i32::from_be_bytes([prefix[4], prefix[5], prefix[6], prefix[7]]);

        let total = RECORD_PREFIX_LENGTH as u64 + record_length.max(0) as u64;
        if record_length < MIN_RECORD_LENGTH || total > available {
            return Err(self.give_up(record_start, CorruptionKind::BadRecordLength(record_length)));
        }

        let mut payload = vec![0u8; record_length as usize];
        if let Err(e) = self.read_exact(&mut payload) {
            return Err(self.read_failure(record_start, e, total));
        }
        self.position = record_start + total;

        let record = LogRecord::decode_payload(status_code, record_length, &payload)
            .map_err(|kind| CorruptionError::new(record_start, kind))?;

        if !skip_crc_check {
            let computed = record.calculate_crc32();
            if computed != record.crc32() {
                return Err(CorruptionError::new(
                    record_start,
                    CorruptionKind::CrcMismatch {
                        stored: record.crc32(),
                        computed,
                    },
                )
                .into());
            }
        }

        Ok(Some(record))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &JournalHeader {
        &self.header
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn end_position(&self) -> u64 {
        self.end_position
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        self.reader.read_exact(buf)
    }

    /// Nothing after `record_start` can be located reliably
    fn give_up(&mut self, record_start: u64, kind: CorruptionKind) -> CoordError {
        self.position = self.end_position;
        CorruptionError::new(record_start, kind).into()
    }

    fn read_failure(&mut self, record_start: u64, error: std::io::Error, needed: u64) -> CoordError {
        if error.kind() == std::io::ErrorKind::UnexpectedEof {
            let available = self.end_position - record_start;
            self.give_up(record_start, CorruptionKind::Truncated { needed, available })
        } else {
            self.position = self.end_position;
            CoordError::Io(error)
        }
    }
}

// =============================================================================
// Iterator
// =============================================================================

/// Iterator over a cursor's records.
///
/// With `skip_corrupted` set, corrupted records are logged, counted and
/// skipped; otherwise the first corruption is yielded and iteration stops.
pub struct JournalIterator {
    cursor: JournalCursor,
    skip_crc_check: bool,
    skip_corrupted: bool,
    corrupted: u64,
    done: bool,
}

impl JournalIterator {
    pub fn new(cursor: JournalCursor, skip_crc_check: bool, skip_corrupted: bool) -> Self {
        Self {
            cursor,
            skip_crc_check,
            skip_corrupted,
            corrupted: 0,
            done: false,
        }
    }

    /// Number of corrupted records skipped so far
    pub fn corrupted_count(&self) -> u64 {
        self.corrupted
    }

    pub fn cursor(&self) -> &JournalCursor {
        &self.cursor
    }
}

impl Iterator for JournalIterator {
    type Item = Result<LogRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            match self.cursor.read_next(self.skip_crc_check) {
                Ok(Some(record)) => return Some(Ok(record)),
                Ok(None) => self.done = true,
                Err(CoordError::Corruption(e)) if self.skip_corrupted => {
                    self.corrupted += 1;
                    tracing::warn!(
                        path = %self.cursor.path().display(),
                        "skipping corrupted journal record: {}",
                        e
                    );
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}

/// Rebuild the dangling index of a journal file from scratch
pub fn collect_dangling_records(path: &Path, skip_corrupted: bool) -> Result<DanglingIndex> {
    let cursor = JournalCursor::open(path)?;
    let mut iter = JournalIterator::new(cursor, false, skip_corrupted);
    let mut index = DanglingIndex::new();
    let mut replayed = 0u64;

    for record in iter.by_ref() {
        index.apply(&record?);
        replayed += 1;
    }

    tracing::debug!(
        path = %path.display(),
        replayed,
        corrupted = iter.corrupted_count(),
        dangling = index.len(),
        "replayed journal"
    );
    Ok(index)
}
