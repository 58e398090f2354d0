//! Dangling transaction index
//!
//! Maps each gtrid whose commit decision is journaled but not yet fully
//! applied to the resource names still in doubt.
//!
//! - COMMITTING adds the record's names
//! - COMMITTED / ROLLEDBACK / UNKNOWN remove the names they mention
//! - an entry disappears once no name is left

use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};

use crate::uid::Uid;

use super::{LogRecord, Status};

#[derive(Debug, Clone, Default)]
pub struct DanglingIndex {
    records: HashMap<Uid, LogRecord>,
}

impl DanglingIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replay `records` in order
    pub fn rebuild(records: impl IntoIterator<Item = LogRecord>) -> Self {
        let mut index = Self::new();
        for record in records {
            index.apply(&record);
        }
        index
    }

    /// Fold one written record into the index
    pub fn apply(&mut self, record: &LogRecord) {
        match record.status() {
            Status::Committing => {
                if record.unique_names().is_empty() {
                    return;
                }
                match self.records.entry(record.gtrid().clone()) {
                    Entry::Occupied(mut existing) => {
                        existing.get_mut().add_unique_names(record.unique_names());
                    }
                    Entry::Vacant(slot) => {
                        slot.insert(record.clone());
                    }
                }
            }
            status if status.is_terminal() => {
                let now_empty = match self.records.get_mut(record.gtrid()) {
                    Some(existing) => {
                        existing.remove_unique_names(record.unique_names());
                        existing.unique_names().is_empty()
                    }
                    None => false,
                };
                if now_empty {
                    self.records.remove(record.gtrid());
                    tracing::trace!(gtrid = %record.gtrid(), "dangling transaction resolved");
                }
            }
            _ => {}
        }
    }

    pub fn contains(&self, gtrid: &Uid) -> bool {
        self.records.contains_key(gtrid)
    }

    pub fn get(&self, gtrid: &Uid) -> Option<&LogRecord> {
        self.records.get(gtrid)
    }

    /// Names still in doubt for `gtrid`
    pub fn remaining_names(&self, gtrid: &Uid) -> Option<&BTreeSet<String>> {
        self.records.get(gtrid).map(|r| r.unique_names())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn records(&self) -> &HashMap<Uid, LogRecord> {
        &self.records
    }

    pub fn into_records(self) -> HashMap<Uid, LogRecord> {
        self.records
    }
}

impl From<HashMap<Uid, LogRecord>> for DanglingIndex {
    fn from(records: HashMap<Uid, LogRecord>) -> Self {
        Self { records }
    }
}
