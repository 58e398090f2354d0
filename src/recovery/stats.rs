//! Recovery counters

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use super::RecoveryReport;

/// Running totals across every recovery pass
#[derive(Debug, Default)]
pub struct RecoveryStats {
    committed: AtomicU64,
    rolled_back: AtomicU64,
    unresolved: AtomicU64,
    failed_resources: AtomicU64,
    executions: AtomicU64,
}

/// Serializable copy of [`RecoveryStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryStatsSnapshot {
    pub committed: u64,
    pub rolled_back: u64,
    /// Branches left to an operator (incompatible heuristics, unknown branches)
    pub unresolved: u64,
    /// Resource scans that hit an unexpected error
    pub failed_resources: u64,
    /// Full recovery passes run
    pub executions: u64,
}

impl RecoveryStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&self, report: &RecoveryReport) {
        self.committed.fetch_add(report.committed as u64, Ordering::Relaxed);
        self.rolled_back.fetch_add(report.rolled_back as u64, Ordering::Relaxed);
        self.unresolved.fetch_add(report.unresolved as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failed_resources.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_execution(&self) {
        self.executions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RecoveryStatsSnapshot {
        RecoveryStatsSnapshot {
            committed: self.committed.load(Ordering::Relaxed),
            rolled_back: self.rolled_back.load(Ordering::Relaxed),
            unresolved: self.unresolved.load(Ordering::Relaxed),
            failed_resources: self.failed_resources.load(Ordering::Relaxed),
            executions: self.executions.load(Ordering::Relaxed),
        }
    }
}
