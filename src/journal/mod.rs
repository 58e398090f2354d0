//! Journal Module
//!
//! Write-ahead log of transaction status transitions.
//!
//! ## Responsibilities
//! - Append a [`LogRecord`] for each journaled status change
//! - CRC32 checksums and end markers for corruption detection
//! - Track dangling transactions (commit decided, not yet applied everywhere)
//! - Replay on startup, skipping or rejecting corrupted records
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Header (21 bytes)                                       │
//! │   FormatId (4) | Timestamp (8) | State (1) | Pos (8)    │
//! ├─────────────────────────────────────────────────────────┤
//! │ Record 1                                                │
//! │   Status | RecLen | HdrLen | Time | Seq | CRC | ...     │
//! ├─────────────────────────────────────────────────────────┤
//! │ Record 2 ...                                            │
//! ├─────────────────────────────────────────────────────────┤
//! │ (garbage after the header's position is ignored)        │
//! └─────────────────────────────────────────────────────────┘
//! ```

mod appender;
mod cursor;
mod dangling;
mod disk;
mod header;
mod memory;
mod record;

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use crate::config::{JournalKind, TmConfig};
use crate::error::Result;
use crate::uid::Uid;

pub use appender::{JournalAppender, JournalStorage, WriteResult};
pub use cursor::{collect_dangling_records, JournalCursor, JournalIterator};
pub use dangling::DanglingIndex;
pub use disk::{DiskJournal, DiskJournalConfig};
pub use header::{JournalHeader, LogState, FORMAT_ID, HEADER_LENGTH};
pub use memory::{InMemoryJournal, NullJournal};
pub use record::{LogRecord, Status, END_RECORD, MIN_RECORD_LENGTH, RECORD_HEADER_LENGTH};

/// Durable record of transaction status transitions
pub trait Journal: Send + Sync {
    fn open(&self) -> Result<()>;

    fn close(&self) -> Result<()>;

    /// Record that `gtrid` reached `status` on the named resources
    fn log(&self, status: Status, gtrid: &Uid, unique_names: &BTreeSet<String>) -> Result<()>;

    /// Make everything logged so far survive a crash
    fn force(&self) -> Result<()>;

    /// Transactions whose commit decision has not been applied everywhere
    fn collect_dangling_records(&self) -> Result<HashMap<Uid, LogRecord>>;

    /// Close, logging instead of returning failures
    fn shutdown(&self) {
        if let Err(e) = self.close() {
            tracing::error!("error shutting down journal: {}", e);
        }
    }

    /// Read-only figures for monitoring
    fn stats(&self) -> Option<JournalStats> {
        None
    }
}

/// Snapshot of a journal's position
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JournalStats {
    /// File receiving records, if the journal is file-backed
    pub active_file: Option<PathBuf>,
    pub position: u64,
    pub max_file_length: u64,
    pub dangling: usize,
}

/// Build the journal selected by `config`
pub fn from_config(config: &TmConfig) -> Arc<dyn Journal> {
    match config.journal {
        JournalKind::Disk => Arc::new(DiskJournal::new(DiskJournalConfig::from(config))),
        JournalKind::InMemory => Arc::new(InMemoryJournal::new()),
        JournalKind::Null => Arc::new(NullJournal::new()),
    }
}
