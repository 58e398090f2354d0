//! Error types for xacoord
//!
//! Provides a unified error type for journal, phase and recovery operations.
//! Resource-level failures are reported separately as [`XaError`] and wrapped
//! into [`CoordError`] once the coordinator has classified them.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::resource::{XaError, Xid};
use crate::twopc::Outcome;

/// Result type alias using CoordError
pub type Result<T> = std::result::Result<T, CoordError>;

/// Unified error type for coordinator operations
#[derive(Debug, Error)]
pub enum CoordError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Journal Errors
    // -------------------------------------------------------------------------
    #[error("journal corruption detected: {0}")]
    Corruption(#[from] CorruptionError),

    #[error("journal file {} is locked by another process", path.display())]
    JournalLocked { path: PathBuf },

    #[error("journal file {} is not a valid journal: {reason}", path.display())]
    InvalidJournal { path: PathBuf, reason: String },

    #[error("journal write failed: {0}")]
    JournalWrite(String),

    // -------------------------------------------------------------------------
    // Resource Errors
    // -------------------------------------------------------------------------
    #[error("resource {unique_name} failed on branch {branch}: {source}")]
    Resource {
        unique_name: String,
        branch: String,
        #[source]
        source: XaError,
    },

    #[error("resource {unique_name} is unavailable for branch {branch}, recovery will retry: {source}")]
    TransientFailure {
        unique_name: String,
        branch: String,
        #[source]
        source: XaError,
    },

    #[error("resource {unique_name} did not answer within {after_ms}ms for branch {branch}")]
    PhaseTimeout {
        unique_name: String,
        branch: String,
        after_ms: u64,
    },

    #[error("resource {unique_name} reported {outcome:?} on branch {branch}")]
    HeuristicHazard {
        unique_name: String,
        branch: String,
        outcome: Outcome,
    },

    // -------------------------------------------------------------------------
    // Transaction Errors
    // -------------------------------------------------------------------------
    #[error("{0}")]
    Phase(PhaseError),

    #[error("transaction {gtrid} has been rolled back: {source}")]
    Rollback {
        gtrid: String,
        #[source]
        source: Box<CoordError>,
    },

    #[error("transaction {gtrid} ended with a heuristic mixed outcome (hazard: {hazard}): {phase}")]
    HeuristicMixed {
        gtrid: String,
        hazard: bool,
        phase: PhaseError,
    },

    #[error("transaction {gtrid} was rolled back heuristically by all resources: {phase}")]
    HeuristicRollback { gtrid: String, phase: PhaseError },

    #[error("transaction {gtrid} was committed heuristically by all resources: {phase}")]
    HeuristicCommit { gtrid: String, phase: PhaseError },

    #[error("illegal state: {0}")]
    IllegalState(String),

    // -------------------------------------------------------------------------
    // Registry / Recovery Errors
    // -------------------------------------------------------------------------
    #[error("a resource named {0} is already registered")]
    DuplicateResource(String),

    #[error("resource {0} failed recovery and cannot be enlisted")]
    ResourceUnavailable(String),

    #[error("failed recovering resource {unique_name}: {source}")]
    Recovery {
        unique_name: String,
        #[source]
        source: Box<CoordError>,
    },

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("configuration error: {0}")]
    Config(String),
}

impl CoordError {
    /// True for errors that leave a branch prepared for recovery to retry
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CoordError::TransientFailure { .. } | CoordError::PhaseTimeout { .. }
        )
    }

    /// The heuristic outcome carried by this error, if any
    pub fn heuristic_outcome(&self) -> Option<Outcome> {
        match self {
            CoordError::HeuristicHazard { outcome, .. } => Some(*outcome),
            _ => None,
        }
    }
}

// =============================================================================
// Journal Corruption
// =============================================================================

/// Structural damage found while replaying a journal
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} at position {position}")]
pub struct CorruptionError {
    /// File offset of the record that could not be trusted
    pub position: u64,
    pub kind: CorruptionKind,
}

impl CorruptionError {
    pub fn new(position: u64, kind: CorruptionKind) -> Self {
        Self { position, kind }
    }
}

/// What exactly was wrong with a record
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CorruptionKind {
    /// Fewer bytes left than the record needs
    #[error("truncated record ({needed} bytes needed, {available} available)")]
    Truncated { needed: u64, available: u64 },

    /// Declared record length is negative, too small or runs past end of data
    #[error("invalid record length {0}")]
    BadRecordLength(i32),

    #[error("invalid header length {0}")]
    BadHeaderLength(i32),

    #[error("invalid end-of-record marker {0:#010x}")]
    BadEndMarker(i32),

    #[error("CRC32 mismatch (stored {stored:#010x}, computed {computed:#010x})")]
    CrcMismatch { stored: u32, computed: u32 },

    #[error("unknown status code {0}")]
    UnknownStatus(i32),

    #[error("unique name is not valid UTF-8")]
    InvalidUniqueName,

    /// Declared length leaves bytes nobody parsed
    #[error("{0} unparsed bytes inside record")]
    TrailingBytes(usize),
}

// =============================================================================
// Phase Errors
// =============================================================================

/// Which 2PC phase produced a [`PhaseError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseKind {
    Prepare,
    Commit,
    Rollback,
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PhaseKind::Prepare => "prepare",
            PhaseKind::Commit => "commit",
            PhaseKind::Rollback => "rollback",
        };
        f.write_str(name)
    }
}

/// One or more resources failed a phase.
///
/// `resources`, `branches` and `errors` are index-aligned: entry `i` of each
/// describes the same failed branch.
#[derive(Debug)]
pub struct PhaseError {
    pub phase: PhaseKind,
    pub resources: Vec<String>,
    pub branches: Vec<Xid>,
    pub errors: Vec<CoordError>,
}

impl PhaseError {
    pub fn new(phase: PhaseKind) -> Self {
        Self {
            phase,
            resources: Vec::new(),
            branches: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn push(&mut self, unique_name: impl Into<String>, branch: Xid, error: CoordError) {
        self.resources.push(unique_name.into());
        self.branches.push(branch);
        self.errors.push(error);
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Iterate failures as (unique name, branch, error)
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Xid, &CoordError)> {
        self.resources
            .iter()
            .zip(self.branches.iter())
            .zip(self.errors.iter())
            .map(|((name, xid), err)| (name.as_str(), xid, err))
    }
}

impl fmt::Display for PhaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} phase failed on {} resource(s):", self.phase, self.len())?;
        for (name, _, err) in self.iter() {
            write!(f, " [{}: {}]", name, err)?;
        }
        Ok(())
    }
}
