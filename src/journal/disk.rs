//! Disk Journal
//!
//! Two alternating journal files. The one with the newer header timestamp is
//! active; when it fills up, the dangling records are copied into the other
//! file, which then becomes active.
//!
//! ## Concurrency:
//! - `files`: RwLock. Appends take the read lock (the appender serializes
//!   offsets itself); a rollover takes the write lock.
//! - `sequence`: atomic record sequence number for this process

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI32, Ordering};

use parking_lot::RwLock;

use crate::config::TmConfig;
use crate::error::{CoordError, Result};
use crate::uid::{current_time_millis, Uid};

use super::{collect_dangling_records, Journal, JournalAppender, JournalStats, LogRecord, Status, WriteResult};

/// Settings for a [`DiskJournal`]
#[derive(Debug, Clone)]
pub struct DiskJournalConfig {
    pub part1: PathBuf,
    pub part2: PathBuf,
    pub max_file_length: u64,
    pub forced_write_enabled: bool,
    pub skip_corrupted_logs: bool,
}

impl From<&TmConfig> for DiskJournalConfig {
    fn from(config: &TmConfig) -> Self {
        Self {
            part1: config.log_part1_filename.clone(),
            part2: config.log_part2_filename.clone(),
            max_file_length: config.max_log_size_bytes(),
            forced_write_enabled: config.forced_write_enabled,
            skip_corrupted_logs: config.skip_corrupted_logs,
        }
    }
}

struct JournalFiles {
    active: JournalAppender,
    passive: JournalAppender,
}

/// Durable dual-file journal
pub struct DiskJournal {
    config: DiskJournalConfig,
    files: RwLock<Option<JournalFiles>>,
    sequence: AtomicI32,
}

impl DiskJournal {
    pub fn new(config: DiskJournalConfig) -> Self {
        Self {
            config,
            files: RwLock::new(None),
            sequence: AtomicI32::new(0),
        }
    }

    pub fn is_open(&self) -> bool {
        self.files.read().is_some()
    }

    /// Path of the file currently receiving records
    pub fn active_path(&self) -> Option<PathBuf> {
        self.files.read().as_ref().map(|f| f.active.path().to_path_buf())
    }

    fn next_sequence(&self) -> i32 {
        self.sequence.fetch_add(1, Ordering::SeqCst).wrapping_add(1)
    }

    /// Move the dangling records to the passive file and make it active.
    /// The passive file's timestamp is bumped last, so a crash mid-swap
    /// leaves the old file authoritative.
    fn swap_journal_files(files: &mut JournalFiles) -> Result<()> {
        tracing::info!(
            from = %files.active.path().display(),
            to = %files.passive.path().display(),
            "journal file full, rolling over"
        );

        files.passive.rewind()?;
        let dangling = files.active.dangling_records();
        for record in dangling.values() {
            if let WriteResult::RolloverNeeded = files.passive.append(record)? {
                return Err(CoordError::JournalWrite(
                    "dangling records do not fit in an empty journal file".to_string(),
                ));
            }
        }
        files.passive.force()?;

        let timestamp = current_time_millis().max(files.active.timestamp() + 1);
        files.passive.set_timestamp(timestamp)?;
        files.passive.force()?;

        std::mem::swap(&mut files.active, &mut files.passive);
        tracing::info!(
            active = %files.active.path().display(),
            carried_over = dangling.len(),
            "journal rollover complete"
        );
        Ok(())
    }
}

impl Journal for DiskJournal {
    fn open(&self) -> Result<()> {
        let mut guard = self.files.write();
        if guard.is_some() {
            return Ok(());
        }

        for path in [&self.config.part1, &self.config.part2] {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
        }

        let part1 = JournalAppender::open(&self.config.part1, self.config.max_file_length)?;
        let part2 = JournalAppender::open(&self.config.part2, self.config.max_file_length)?;

        let (active, passive) = if part2.timestamp() > part1.timestamp() {
            (part2, part1)
        } else {
            (part1, part2)
        };

        let index = collect_dangling_records(active.path(), self.config.skip_corrupted_logs)?;
        tracing::info!(
            active = %active.path().display(),
            position = active.position(),
            dangling = index.len(),
            "disk journal opened"
        );
        active.set_dangling_records(index);

        *guard = Some(JournalFiles { active, passive });
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let files = match self.files.write().take() {
            Some(files) => files,
            None => return Ok(()),
        };
        files.active.close()?;
        files.passive.close()?;
        tracing::info!("disk journal closed");
        Ok(())
    }

    fn log(&self, status: Status, gtrid: &Uid, unique_names: &BTreeSet<String>) -> Result<()> {
        let record = LogRecord::new(status, gtrid.clone(), unique_names.clone(), self.next_sequence());

        {
            let guard = self.files.read();
            let files = guard.as_ref().ok_or_else(not_open)?;
            if let WriteResult::Written { .. } = files.active.append(&record)? {
                return Ok(());
            }
        }

        let mut guard = self.files.write();
        let files = guard.as_mut().ok_or_else(not_open)?;
        // another writer may have rolled over while we waited
        if let WriteResult::Written { .. } = files.active.append(&record)? {
            return Ok(());
        }
        Self::swap_journal_files(files)?;
        match files.active.append(&record)? {
            WriteResult::Written { .. } => Ok(()),
            WriteResult::RolloverNeeded => Err(CoordError::JournalWrite(format!(
                "record of {} bytes does not fit in a journal of {} bytes",
                record.calculate_total_size(),
                self.config.max_file_length
            ))),
        }
    }

    fn force(&self) -> Result<()> {
        if !self.config.forced_write_enabled {
            return Ok(());
        }
        let guard = self.files.read();
        let files = guard.as_ref().ok_or_else(not_open)?;
        files.active.force()
    }

    fn collect_dangling_records(&self) -> Result<HashMap<Uid, LogRecord>> {
        let guard = self.files.read();
        let files = guard.as_ref().ok_or_else(not_open)?;
        Ok(files.active.dangling_records())
    }

    fn stats(&self) -> Option<JournalStats> {
        let guard = self.files.read();
        guard.as_ref().map(|files| JournalStats {
            active_file: Some(files.active.path().to_path_buf()),
            position: files.active.position(),
            max_file_length: files.active.max_file_length(),
            dangling: files.active.dangling_count(),
        })
    }
}

fn not_open() -> CoordError {
    CoordError::IllegalState("disk journal is not open".to_string())
}
