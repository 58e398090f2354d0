//! Two-Phase Commit Module
//!
//! The 2PC state machine:
//!
//! ```text
//! ACTIVE → PREPARING → PREPARED → COMMITTING → COMMITTED
//!                  └─────────────→ ROLLING_BACK → ROLLEDBACK
//! (a phase that fails outright leaves the transaction UNKNOWN)
//! ```
//!
//! ## Responsibilities
//! - [`Preparer`]: collect votes, natural position order, fail-fast
//! - [`Committer`] / [`Rollbacker`]: apply the decision, reverse position
//!   order, every position runs even after a failure
//! - [`PhaseEngine`]: one job per branch, barrier between positions
//! - [`classify`]: XA error codes → [`Outcome`]

mod committer;
mod engine;
mod executor;
mod outcome;
mod preparer;
mod rollbacker;

use std::collections::BTreeSet;
use std::sync::Arc;

pub use committer::Committer;
pub use engine::{FailurePolicy, PhaseEngine, PhaseOperation, PhaseRun};
pub use executor::{AsyncExecutor, Executor, Job, JobHandle, SyncExecutor};
pub use outcome::{classify, outcome_of, Outcome};
pub use preparer::Preparer;
pub use rollbacker::Rollbacker;

use crate::config::TmConfig;
use crate::error::{PhaseError, Result};
use crate::journal::{Journal, Status};
use crate::resource::ResourceHolderState;
use crate::uid::Uid;

/// The three phases of one coordinator, sharing an executor and journal
pub struct Phases {
    pub preparer: Preparer,
    pub committer: Committer,
    pub rollbacker: Rollbacker,
}

impl Phases {
    pub fn new(config: &TmConfig, journal: Arc<dyn Journal>, executor: Arc<dyn Executor>) -> Self {
        let engine = PhaseEngine::new(executor, config.phase_timeout_ms);
        Self {
            preparer: Preparer::new(engine.clone(), config.warn_about_zero_resource_transaction),
            committer: Committer::new(engine.clone(), Arc::clone(&journal), config.filter_log_status),
            rollbacker: Rollbacker::new(engine, journal, config.filter_log_status),
        }
    }
}

/// Journal a status transition, unless `filter` restricts journaling to
/// the transitions recovery depends on
pub(crate) fn log_status(
    journal: &dyn Journal,
    filter: bool,
    status: Status,
    gtrid: &Uid,
    unique_names: &BTreeSet<String>,
) -> Result<()> {
    if filter && !matches!(status, Status::Committing | Status::Committed | Status::Unknown) {
        return Ok(());
    }
    journal.log(status, gtrid, unique_names)
}

/// Tell a resource to drop its memory of a heuristic decision
pub(crate) fn forget(holder: &ResourceHolderState) {
    tracing::info!(
        unique_name = holder.unique_name(),
        branch = %holder.xid(),
        "forgetting heuristic outcome"
    );
    if let Err(e) = holder.resource().forget(holder.xid()) {
        tracing::warn!(
            unique_name = holder.unique_name(),
            branch = %holder.xid(),
            "forget failed: {}",
            e
        );
    }
}

pub(crate) fn report_heuristics(gtrid: &Uid, failures: &PhaseError) {
    let branches: Vec<String> = failures.branches.iter().map(|xid| xid.to_string()).collect();
    tracing::error!(
        gtrid = %gtrid,
        phase = %failures.phase,
        resources = ?failures.resources,
        branches = ?branches,
        "heuristic outcome, manual reconciliation may be required: {}",
        failures
    );
}
