//! Non-durable journals
//!
//! [`InMemoryJournal`] keeps every record and the dangling index in memory;
//! [`NullJournal`] drops everything.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use parking_lot::Mutex;

use crate::error::{CoordError, Result};
use crate::uid::Uid;

use super::{DanglingIndex, Journal, JournalStats, LogRecord, Status};

/// Journal that lives and dies with the process
#[derive(Default)]
pub struct InMemoryJournal {
    records: Mutex<Vec<LogRecord>>,
    dangling: Mutex<DanglingIndex>,
    sequence: AtomicI32,
    open: AtomicBool,
}

impl InMemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record logged so far, oldest first
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    /// Records logged for one transaction, oldest first
    pub fn records_for(&self, gtrid: &Uid) -> Vec<LogRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.gtrid() == gtrid)
            .cloned()
            .collect()
    }
}

impl Journal for InMemoryJournal {
    fn open(&self) -> Result<()> {
        self.open.store(true, Ordering::Release);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::Release);
        Ok(())
    }

    fn log(&self, status: Status, gtrid: &Uid, unique_names: &BTreeSet<String>) -> Result<()> {
        if !self.open.load(Ordering::Acquire) {
            return Err(CoordError::IllegalState("in-memory journal is not open".to_string()));
        }
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst).wrapping_add(1);
        let record = LogRecord::new(status, gtrid.clone(), unique_names.clone(), sequence);
        self.dangling.lock().apply(&record);
        self.records.lock().push(record);
        Ok(())
    }

    fn force(&self) -> Result<()> {
        Ok(())
    }

    fn collect_dangling_records(&self) -> Result<HashMap<Uid, LogRecord>> {
        Ok(self.dangling.lock().records().clone())
    }

    fn stats(&self) -> Option<JournalStats> {
        Some(JournalStats {
            active_file: None,
            position: self.records.lock().len() as u64,
            max_file_length: 0,
            dangling: self.dangling.lock().len(),
        })
    }
}

/// Journal that records nothing; every in-doubt branch recovers as rollback
#[derive(Debug, Default)]
pub struct NullJournal;

impl NullJournal {
    pub fn new() -> Self {
        Self
    }
}

impl Journal for NullJournal {
    fn open(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }

    fn log(&self, _status: Status, _gtrid: &Uid, _unique_names: &BTreeSet<String>) -> Result<()> {
        Ok(())
    }

    fn force(&self) -> Result<()> {
        Ok(())
    }

    fn collect_dangling_records(&self) -> Result<HashMap<Uid, LogRecord>> {
        Ok(HashMap::new())
    }
}
