//! Configuration for xacoord
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{CoordError, Result};
use crate::uid::MAX_SERVER_ID_LENGTH;

/// Main configuration for a transaction manager instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TmConfig {
    // -------------------------------------------------------------------------
    // Identity
    // -------------------------------------------------------------------------
    /// Embedded in every generated gtrid; recovery uses it to tell this
    /// node's branches apart. Truncated to 51 bytes.
    pub server_id: Option<String>,

    // -------------------------------------------------------------------------
    // Journal Configuration
    // -------------------------------------------------------------------------
    /// Which journal implementation backs the manager
    pub journal: JournalKind,

    /// First of the two alternating journal files
    pub log_part1_filename: PathBuf,

    /// Second of the two alternating journal files
    pub log_part2_filename: PathBuf,

    /// Maximum size of each journal file (in MB)
    pub max_log_size_mb: u64,

    /// fsync the journal when a commit decision is logged
    pub forced_write_enabled: bool,

    /// Keep replaying past corrupted records instead of failing startup
    pub skip_corrupted_logs: bool,

    /// Only journal COMMITTING, COMMITTED and UNKNOWN transitions
    pub filter_log_status: bool,

    // -------------------------------------------------------------------------
    // Two-Phase Commit Configuration
    // -------------------------------------------------------------------------
    /// Run jobs of one scheduler position concurrently on a worker pool
    pub async_2pc: bool,

    /// Worker threads used when `async_2pc` is set
    pub async_2pc_threads: usize,

    /// How long to wait for a single resource call (milliseconds, 0 = forever).
    /// Only honoured by the asynchronous executor.
    pub phase_timeout_ms: u64,

    /// Log a warning when a transaction commits with nothing enlisted
    pub warn_about_zero_resource_transaction: bool,

    // -------------------------------------------------------------------------
    // Recovery Configuration
    // -------------------------------------------------------------------------
    /// Ignore in-doubt branches generated by other server ids
    pub current_node_only_recovery: bool,

    /// Interval between background recovery passes (seconds, 0 = disabled)
    pub background_recovery_interval_secs: u64,
}

/// Journal implementation selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalKind {
    /// Dual-file on-disk journal (durable)
    Disk,

    /// Records kept in memory only (tests, embedded use)
    InMemory,

    /// Nothing is logged; recovery always rolls back
    Null,
}

impl Default for TmConfig {
    fn default() -> Self {
        Self {
            server_id: None,
            journal: JournalKind::Disk,
            log_part1_filename: PathBuf::from("./xacoord_data/part1.tlog"),
            log_part2_filename: PathBuf::from("./xacoord_data/part2.tlog"),
            max_log_size_mb: 2,
            forced_write_enabled: true,
            skip_corrupted_logs: false,
            filter_log_status: false,
            async_2pc: false,
            async_2pc_threads: 4,
            phase_timeout_ms: 0,
            warn_about_zero_resource_transaction: true,
            current_node_only_recovery: true,
            background_recovery_interval_secs: 60,
        }
    }
}

impl TmConfig {
    /// Create a new config builder
    pub fn builder() -> TmConfigBuilder {
        TmConfigBuilder::default()
    }

    /// Maximum journal file length in bytes
    pub fn max_log_size_bytes(&self) -> u64 {
        self.max_log_size_mb * 1024 * 1024
    }

    /// The server id with the default applied, as raw bytes
    pub fn server_id_bytes(&self) -> Vec<u8> {
        let id = self
            .server_id
            .clone()
            .unwrap_or_else(|| format!("xacoord-{}", std::process::id()));
        let mut bytes = id.into_bytes();
        if bytes.len() > MAX_SERVER_ID_LENGTH {
            tracing::warn!(
                "server id is longer than {} bytes, truncating it",
                MAX_SERVER_ID_LENGTH
            );
            bytes.truncate(MAX_SERVER_ID_LENGTH);
        }
        bytes
    }

    /// Reject settings the manager cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.journal == JournalKind::Disk {
            if self.max_log_size_mb == 0 {
                return Err(CoordError::Config(
                    "max_log_size_mb must be at least 1".to_string(),
                ));
            }
            if self.log_part1_filename == self.log_part2_filename {
                return Err(CoordError::Config(
                    "the two journal files must be distinct".to_string(),
                ));
            }
        }
        if self.async_2pc && self.async_2pc_threads == 0 {
            return Err(CoordError::Config(
                "async_2pc requires at least one worker thread".to_string(),
            ));
        }
        if matches!(&self.server_id, Some(id) if id.is_empty()) {
            return Err(CoordError::Config("server_id cannot be empty".to_string()));
        }
        Ok(())
    }
}

/// Builder for TmConfig
#[derive(Default)]
pub struct TmConfigBuilder {
    config: TmConfig,
}

impl TmConfigBuilder {
    /// Set the server id
    pub fn server_id(mut self, id: impl Into<String>) -> Self {
        self.config.server_id = Some(id.into());
        self
    }

    /// Select the journal implementation
    pub fn journal(mut self, kind: JournalKind) -> Self {
        self.config.journal = kind;
        self
    }

    /// Place both journal files in `dir` with their default names
    pub fn journal_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        self.config.log_part1_filename = dir.join("part1.tlog");
        self.config.log_part2_filename = dir.join("part2.tlog");
        self
    }

    /// Set both journal file paths
    pub fn log_files(mut self, part1: impl Into<PathBuf>, part2: impl Into<PathBuf>) -> Self {
        self.config.log_part1_filename = part1.into();
        self.config.log_part2_filename = part2.into();
        self
    }

    /// Set the maximum size of each journal file (in MB)
    pub fn max_log_size_mb(mut self, mb: u64) -> Self {
        self.config.max_log_size_mb = mb;
        self
    }

    pub fn forced_write_enabled(mut self, enabled: bool) -> Self {
        self.config.forced_write_enabled = enabled;
        self
    }

    pub fn skip_corrupted_logs(mut self, skip: bool) -> Self {
        self.config.skip_corrupted_logs = skip;
        self
    }

    pub fn filter_log_status(mut self, filter: bool) -> Self {
        self.config.filter_log_status = filter;
        self
    }

    /// Enable the asynchronous executor with `threads` workers
    pub fn async_2pc(mut self, threads: usize) -> Self {
        self.config.async_2pc = true;
        self.config.async_2pc_threads = threads;
        self
    }

    /// Set the per-resource call timeout (in milliseconds)
    pub fn phase_timeout_ms(mut self, ms: u64) -> Self {
        self.config.phase_timeout_ms = ms;
        self
    }

    pub fn warn_about_zero_resource_transaction(mut self, warn: bool) -> Self {
        self.config.warn_about_zero_resource_transaction = warn;
        self
    }

    pub fn current_node_only_recovery(mut self, only: bool) -> Self {
        self.config.current_node_only_recovery = only;
        self
    }

    /// Set the background recovery interval (in seconds, 0 disables it)
    pub fn background_recovery_interval_secs(mut self, secs: u64) -> Self {
        self.config.background_recovery_interval_secs = secs;
        self
    }

    pub fn build(self) -> TmConfig {
        self.config
    }
}
