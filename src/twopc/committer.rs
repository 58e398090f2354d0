//! Phase 2: commit

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::{CoordError, PhaseError, PhaseKind, Result};
use crate::journal::{Journal, Status};
use crate::resource::{ResourceHolderState, XaError, XaErrorCode};
use crate::scheduler::PositionalScheduler;
use crate::uid::Uid;

use super::engine::{FailurePolicy, PhaseEngine, PhaseOperation};
use super::outcome::{classify, needs_forget, outcome_of, Outcome};
use super::{forget, log_status, report_heuristics};

/// Applies the commit decision to every interested branch
pub struct Committer {
    engine: PhaseEngine,
    journal: Arc<dyn Journal>,
    filter_log_status: bool,
}

impl Committer {
    pub fn new(engine: PhaseEngine, journal: Arc<dyn Journal>, filter_log_status: bool) -> Self {
        Self {
            engine,
            journal,
            filter_log_status,
        }
    }

    /// Commit `interested`, reverse position order.
    ///
    /// `enlisted` names every branch of the transaction; the ones missing
    /// from `interested` voted read-only and count as committed. After a
    /// two-phase run a COMMITTED record names the committed branches only,
    /// so transient failures stay dangling for recovery.
    ///
    /// With `one_phase` the single branch is committed with the one-phase
    /// flag and nothing is journaled; a failure rolls the transaction back.
    pub fn commit(
        &self,
        gtrid: &Uid,
        interested: &PositionalScheduler<ResourceHolderState>,
        enlisted: &BTreeSet<String>,
        one_phase: bool,
    ) -> Result<()> {
        if one_phase {
            return self.commit_one_phase(gtrid, interested);
        }

        let operation: PhaseOperation = Arc::new(|holder: &ResourceHolderState| {
            match holder.resource().commit(holder.xid(), false) {
                Ok(()) => Ok(()),
                Err(e) => commit_failure(holder, e),
            }
        });

        let run = self
            .engine
            .run(PhaseKind::Commit, interested, true, FailurePolicy::Continue, operation);

        let interested_names: BTreeSet<String> = interested
            .iter()
            .map(|holder| holder.unique_name().to_string())
            .collect();
        let mut committed: BTreeSet<String> = enlisted.difference(&interested_names).cloned().collect();
        committed.extend(run.succeeded.iter().map(|h| h.unique_name().to_string()));

        if !committed.is_empty() {
            log_status(
                self.journal.as_ref(),
                self.filter_log_status,
                Status::Committed,
                gtrid,
                &committed,
            )?;
        }

        if run.failures.is_empty() {
            tracing::debug!(gtrid = %gtrid, committed = committed.len(), "commit phase complete");
            return Ok(());
        }

        Err(self.phase_failure(gtrid, run.failures, interested.size()))
    }

    fn commit_one_phase(
        &self,
        gtrid: &Uid,
        interested: &PositionalScheduler<ResourceHolderState>,
    ) -> Result<()> {
        let operation: PhaseOperation = Arc::new(|holder: &ResourceHolderState| {
            let error = match holder.resource().commit(holder.xid(), true) {
                Ok(()) => return Ok(()),
                Err(error) => error,
            };
            match error.code {
                XaErrorCode::HeuristicCommit => {
                    forget(holder);
                    Ok(())
                }
                XaErrorCode::HeuristicMixed | XaErrorCode::HeuristicHazard => {
                    forget(holder);
                    Err(CoordError::HeuristicHazard {
                        unique_name: holder.unique_name().to_string(),
                        branch: holder.xid().to_string(),
                        outcome: classify(&error),
                    })
                }
                code => {
                    // rolled back either way; a heuristic rollback is still remembered
                    if code == XaErrorCode::HeuristicRollback {
                        forget(holder);
                    }
                    Err(CoordError::Resource {
                        unique_name: holder.unique_name().to_string(),
                        branch: holder.xid().to_string(),
                        source: error,
                    })
                }
            }
        });

        let run = self
            .engine
            .run(PhaseKind::Commit, interested, true, FailurePolicy::Continue, operation);
        if run.failures.is_empty() {
            tracing::debug!(gtrid = %gtrid, "one-phase commit complete");
            return Ok(());
        }

        let failures = run.failures;
        if failures.errors.iter().any(|e| e.heuristic_outcome().is_some()) {
            report_heuristics(gtrid, &failures);
            return Err(CoordError::HeuristicMixed {
                gtrid: gtrid.to_string(),
                hazard: true,
                phase: failures,
            });
        }

        tracing::warn!(gtrid = %gtrid, "one-phase commit failed, transaction rolled back: {}", failures);
        Err(CoordError::Rollback {
            gtrid: gtrid.to_string(),
            source: Box::new(CoordError::Phase(failures)),
        })
    }

    fn phase_failure(&self, gtrid: &Uid, failures: PhaseError, interested: usize) -> CoordError {
        let all_rolled_back = failures.len() == interested
            && failures
                .errors
                .iter()
                .all(|e| outcome_of(e) == Outcome::HeuristicRollback);
        let hazard = failures.errors.iter().any(|e| !e.is_transient());

        if all_rolled_back {
            report_heuristics(gtrid, &failures);
            return CoordError::HeuristicRollback {
                gtrid: gtrid.to_string(),
                phase: failures,
            };
        }

        if hazard {
            report_heuristics(gtrid, &failures);
        } else {
            tracing::warn!(
                gtrid = %gtrid,
                resources = ?failures.resources,
                "commit incomplete, recovery will retry: {}",
                failures
            );
        }
        CoordError::HeuristicMixed {
            gtrid: gtrid.to_string(),
            hazard,
            phase: failures,
        }
    }
}

fn commit_failure(holder: &ResourceHolderState, error: XaError) -> Result<()> {
    let unique_name = holder.unique_name().to_string();
    let branch = holder.xid().to_string();

    match classify(&error) {
        Outcome::Ok => Ok(()),
        Outcome::HeuristicCommit => {
            forget(holder);
            Ok(())
        }
        Outcome::TransientFailure => {
            tracing::warn!(
                unique_name = %unique_name,
                branch = %branch,
                "resource unavailable during commit: {}",
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
