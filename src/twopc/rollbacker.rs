//! Phase 2: rollback

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::{CoordError, PhaseKind, Result};
use crate::journal::{Journal, Status};
use crate::resource::{ResourceHolderState, XaError, XaErrorCode};
use crate::scheduler::PositionalScheduler;
use crate::uid::Uid;

use super::engine::{FailurePolicy, PhaseEngine, PhaseOperation};
use super::outcome::{classify, needs_forget, outcome_of, Outcome};
use super::{forget, log_status, report_heuristics};

/// Applies the rollback decision
pub struct Rollbacker {
    engine: PhaseEngine,
    journal: Arc<dyn Journal>,
    filter_log_status: bool,
}

impl Rollbacker {
    pub fn new(engine: PhaseEngine, journal: Arc<dyn Journal>, filter_log_status: bool) -> Self {
        Self {
            engine,
            journal,
            filter_log_status,
        }
    }

    /// Roll back `resources`, reverse position order.
    ///
    /// Branches the resource already rolled back or no longer knows count as
    /// rolled back. A ROLLEDBACK record names every rolled-back branch plus
    /// the enlisted names not in `resources`.
    pub fn rollback(
        &self,
        gtrid: &Uid,
        resources: &PositionalScheduler<ResourceHolderState>,
        enlisted: &BTreeSet<String>,
    ) -> Result<()> {
        let operation: PhaseOperation = Arc::new(|holder: &ResourceHolderState| {
            match holder.resource().rollback(holder.xid()) {
                Ok(()) => Ok(()),
                Err(e) => rollback_failure(holder, e),
            }
        });

        let run = self
            .engine
            .run(PhaseKind::Rollback, resources, true, FailurePolicy::Continue, operation);

        let participants: BTreeSet<String> = resources
            .iter()
            .map(|holder| holder.unique_name().to_string())
            .collect();
        let mut rolled_back: BTreeSet<String> = enlisted.difference(&participants).cloned().collect();
        rolled_back.extend(run.succeeded.iter().map(|h| h.unique_name().to_string()));

        if !rolled_back.is_empty() {
            log_status(
                self.journal.as_ref(),
                self.filter_log_status,
                Status::RolledBack,
                gtrid,
                &rolled_back,
            )?;
        }

        if run.failures.is_empty() {
            tracing::debug!(gtrid = %gtrid, rolled_back = rolled_back.len(), "rollback phase complete");
            return Ok(());
        }

        let failures = run.failures;
        let all_committed = failures.len() == resources.size()
            && failures
                .errors
                .iter()
                .all(|e| outcome_of(e) == Outcome::HeuristicCommit);
        let hazard = failures.errors.iter().any(|e| !e.is_transient());

        if all_committed {
            report_heuristics(gtrid, &failures);
            return Err(CoordError::HeuristicCommit {
                gtrid: gtrid.to_string(),
                phase: failures,
            });
        }

        if hazard {
            report_heuristics(gtrid, &failures);
        } else {
            tracing::warn!(
                gtrid = %gtrid,
                resources = ?failures.resources,
                "rollback incomplete, recovery will retry: {}",
                failures
            );
        }
        Err(CoordError::HeuristicMixed {
            gtrid: gtrid.to_string(),
            hazard,
            phase: failures,
        })
    }
}

fn rollback_failure(holder: &ResourceHolderState, error: XaError) -> Result<()> {
    let unique_name = holder.unique_name().to_string();
    let branch = holder.xid().to_string();

    if let XaErrorCode::RolledBack(_) = error.code {
        return Ok(());
    }

    match classify(&error) {
        Outcome::Ok => Ok(()),
        Outcome::HeuristicRollback => {
            forget(holder);
            Ok(())
        }
        Outcome::UnknownBranch => {
            tracing::debug!(
                unique_name = %unique_name,
                branch = %branch,
                "branch unknown to resource, treating as rolled back"
            );
            Ok(())
        }
        Outcome::TransientFailure => {
            tracing::warn!(
                unique_name = %unique_name,
                branch = %branch,
                "resource unavailable during rollback: {}",
                error
            );
            Err(CoordError::TransientFailure {
                unique_name,
                branch,
                source: error,
            })
        }
        outcome => {
            if needs_forget(error.code) {
                forget(holder);
            }
            Err(CoordError::HeuristicHazard {
                unique_name,
                branch,
                outcome,
            })
        }
    }
}
