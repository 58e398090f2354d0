//! Recovery Module
//!
//! Reconciles resources' in-doubt branches with the journal after a crash
//! or on demand.
//!
//! ## Decision rule
//! ```text
//! branch gtrid in dangling index  → commit,   journal COMMITTED{name}
//! otherwise                       → rollback, journal ROLLEDBACK{name}
//! ```
//!
//! ## Responsibilities
//! - [`helper`]: the recover scan and single-branch resolution
//! - [`IncrementalRecoverer`]: one producer, sets its failed flag
//! - [`Recoverer`]: every registered producer, plus cleanup of dangling
//!   entries nobody holds anymore
//! - [`RecoveryStats`]: counters exposed read-only

use std::collections::HashSet;

use crate::uid::Uid;

pub mod helper;
mod incremental;
mod recoverer;
mod stats;

pub use incremental::IncrementalRecoverer;
pub use recoverer::{Recoverer, RecoveryPass};
pub use stats::{RecoveryStats, RecoveryStatsSnapshot};

/// What recovering one producer did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub unique_name: String,
    /// Branches of ours the resource reported
    pub in_doubt: usize,
    pub committed: usize,
    pub rolled_back: usize,
    /// Left alone because their transaction is still running here
    pub skipped: usize,
    /// Incompatible heuristics and unknown branches
    pub unresolved: usize,
    /// Gtrids of the skipped and unresolved branches, still held by the
    /// resource after this pass
    pub held: HashSet<Uid>,
}

impl RecoveryReport {
    pub fn new(unique_name: impl Into<String>) -> Self {
        Self {
            unique_name: unique_name.into(),
            ..Self::default()
        }
    }

    /// Nothing was found in doubt
    pub fn is_empty(&self) -> bool {
        self.in_doubt == 0
    }

    /// Every in-doubt branch was resolved as the journal dictates
    pub fn is_clean(&self) -> bool {
        self.unresolved == 0
    }
}
