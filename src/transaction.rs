//! Transaction
//!
//! One global transaction: its gtrid, status, and the branches enlisted in
//! it, ordered by a [`PositionalScheduler`].
//!
//! ## Commit flow
//! 1. PREPARING → prepare phase → PREPARED (read-only voters drop out)
//! 2. COMMITTING is journaled and forced: the commit decision is durable
//! 3. Commit phase; the committer journals COMMITTED for the branches done
//!
//! One-phase (single branch) and empty transactions never journal
//! COMMITTING or COMMITTED.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{CoordError, Result};
use crate::journal::{Journal, Status};
use crate::resource::{validate_unique_name, RegisteredResource, ResourceHolderState, XaResource, Xid};
use crate::scheduler::PositionalScheduler;
use crate::twopc::{self, outcome_of, Outcome, Phases};
use crate::uid::{Uid, UidGenerator};

/// Gtrids of the transactions still running in this process.
///
/// Recovery leaves their branches alone.
#[derive(Debug, Default)]
pub struct InFlightTransactions {
    gtrids: Mutex<HashSet<Uid>>,
}

impl InFlightTransactions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, gtrid: Uid) {
        self.gtrids.lock().insert(gtrid);
    }

    pub fn remove(&self, gtrid: &Uid) -> bool {
        self.gtrids.lock().remove(gtrid)
    }

    pub fn contains(&self, gtrid: &Uid) -> bool {
        self.gtrids.lock().contains(gtrid)
    }

    /// The gtrids running right now
    pub fn snapshot(&self) -> HashSet<Uid> {
        self.gtrids.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.gtrids.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.gtrids.lock().is_empty()
    }
}

/// A global transaction driven through 2PC
pub struct Transaction {
    gtrid: Uid,
    status: Mutex<Status>,
    resources: PositionalScheduler<ResourceHolderState>,
    journal: Arc<dyn Journal>,
    uids: Arc<UidGenerator>,
    phases: Arc<Phases>,
    in_flight: Arc<InFlightTransactions>,
    filter_log_status: bool,
    /// Held for the whole of commit or rollback
    completion: Mutex<()>,
}

impl Transaction {
    pub(crate) fn new(
        gtrid: Uid,
        journal: Arc<dyn Journal>,
        uids: Arc<UidGenerator>,
        phases: Arc<Phases>,
        in_flight: Arc<InFlightTransactions>,
        filter_log_status: bool,
    ) -> Self {
        in_flight.insert(gtrid.clone());
        Self {
            gtrid,
            status: Mutex::new(Status::Active),
            resources: PositionalScheduler::new(),
            journal,
            uids,
            phases,
            in_flight,
            filter_log_status,
            completion: Mutex::new(()),
        }
    }

    pub fn gtrid(&self) -> &Uid {
        &self.gtrid
    }

    pub fn status(&self) -> Status {
        *self.status.lock()
    }

    /// Number of enlisted branches
    pub fn resource_count(&self) -> usize {
        self.resources.size()
    }

    /// Unique names of every enlisted branch
    pub fn unique_names(&self) -> BTreeSet<String> {
        self.resources
            .iter()
            .map(|holder| holder.unique_name().to_string())
            .collect()
    }

    // =========================================================================
    // Enlistment
    // =========================================================================

    /// Enlist `resource` under `unique_name` at a 2PC ordering position.
    ///
    /// Enlisting a name a second time joins the existing branch and returns
    /// its xid.
    pub fn enlist(
        &self,
        unique_name: &str,
        resource: Arc<dyn XaResource>,
        position: i32,
    ) -> Result<Xid> {
        validate_unique_name(unique_name)?;
        self.ensure_status(Status::Active, "enlist")?;

        if let Some(existing) = self
            .resources
            .iter()
            .find(|holder| holder.unique_name() == unique_name)
        {
            return Ok(existing.xid().clone());
        }

        let xid = self.uids.generate_xid(&self.gtrid);
        let holder = Arc::new(ResourceHolderState::new(unique_name, resource, xid.clone(), position));
        self.resources.add(holder, position);
        tracing::debug!(gtrid = %self.gtrid, unique_name, position, branch = %xid, "enlisted resource");
        Ok(xid)
    }

    /// Enlist a resource obtained from a registered producer
    pub fn enlist_resource(&self, registered: &RegisteredResource) -> Result<Xid> {
        if registered.is_failed() {
            return Err(CoordError::ResourceUnavailable(registered.unique_name().to_string()));
        }
        let producer = registered.producer();
        let resource = producer.xa_resource()?;
        self.enlist(producer.unique_name(), resource, producer.two_pc_ordering_position())
    }

    /// Only rollback remains possible
    pub fn set_rollback_only(&self) -> Result<()> {
        let mut status = self.status.lock();
        match *status {
            Status::Active | Status::MarkedRollback => {
                *status = Status::MarkedRollback;
                Ok(())
            }
            other => Err(CoordError::IllegalState(format!(
                "cannot mark a {} transaction rollback-only",
                other
            ))),
        }
    }

    // =========================================================================
    // Completion
    // =========================================================================

    pub fn commit(&self) -> Result<()> {
        let _completion = self.completion.lock();
        let result = self.commit_inner();
        self.in_flight.remove(&self.gtrid);
        result
    }

    pub fn rollback(&self) -> Result<()> {
        let _completion = self.completion.lock();
        let result = match self.status() {
            Status::Active | Status::MarkedRollback => {
                let enlisted = self.unique_names();
                self.rollback_branches(&self.resources, &enlisted)
            }
            other => Err(CoordError::IllegalState(format!(
                "cannot roll back a {} transaction",
                other
            ))),
        };
        self.in_flight.remove(&self.gtrid);
        result
    }

    fn commit_inner(&self) -> Result<()> {
        match self.status() {
            Status::Active => {}
            Status::MarkedRollback => {
                let enlisted = self.unique_names();
                self.rollback_branches(&self.resources, &enlisted)?;
                return Err(CoordError::Rollback {
                    gtrid: self.gtrid.to_string(),
                    source: Box::new(CoordError::IllegalState(
                        "transaction was marked rollback-only".to_string(),
                    )),
                });
            }
            other => {
                return Err(CoordError::IllegalState(format!(
                    "cannot commit a {} transaction",
                    other
                )))
            }
        }

        let enlisted = self.unique_names();
        let branch_count = self.resources.size();

        self.set_status(Status::Preparing, &enlisted)?;
        let interested = match self.phases.preparer.prepare(&self.gtrid, &self.resources) {
            Ok(interested) => interested,
            Err(e) => return Err(self.rollback_after_failed_prepare(e, &enlisted)),
        };
        self.set_status(Status::Prepared, &enlisted)?;

        let one_phase = branch_count == 1;
        if !one_phase && interested.is_empty() {
            // no decision to journal: nothing is left prepared
            self.set_status_in_memory(Status::Committed);
            tracing::debug!(gtrid = %self.gtrid, branches = branch_count, "no branch to commit");
            return Ok(());
        }
        if branch_count > 1 {
            let logged = self
                .set_status(Status::Committing, &enlisted)
                .and_then(|()| self.journal.force());
            if let Err(e) = logged {
                tracing::error!(gtrid = %self.gtrid, "failed journaling commit decision, rolling back: {}", e);
                self.rollback_branches(&interested, &enlisted)?;
                return Err(CoordError::Rollback {
                    gtrid: self.gtrid.to_string(),
                    source: Box::new(e),
                });
            }
        } else {
            self.set_status_in_memory(Status::Committing);
        }

        match self
            .phases
            .committer
            .commit(&self.gtrid, &interested, &enlisted, one_phase)
        {
            Ok(()) => {
                self.set_status_in_memory(Status::Committed);
                tracing::debug!(gtrid = %self.gtrid, branches = branch_count, "transaction committed");
                Ok(())
            }
            Err(e) => {
                let status = match e {
                    CoordError::Rollback { .. } => Status::RolledBack,
                    _ => Status::Unknown,
                };
                self.set_status_in_memory(status);
                Err(e)
            }
        }
    }

    /// Roll back after prepare failed. Branches whose prepare failure shows
    /// they already rolled back, or that the resource no longer knows, are
    /// not called again.
    fn rollback_after_failed_prepare(&self, error: CoordError, enlisted: &BTreeSet<String>) -> CoordError {
        let finished: HashSet<&Xid> = match &error {
            CoordError::Phase(failures) => failures
                .iter()
                .filter(|(_, _, e)| {
                    matches!(outcome_of(e), Outcome::HeuristicRollback | Outcome::UnknownBranch)
                })
                .map(|(_, xid, _)| xid)
                .collect(),
            _ => HashSet::new(),
        };

        let to_rollback = PositionalScheduler::new();
        for holder in self.resources.iter() {
            if !finished.contains(holder.xid()) {
                to_rollback.add(Arc::clone(&holder), holder.position());
            }
        }

        tracing::warn!(gtrid = %self.gtrid, "prepare failed, rolling back: {}", error);
        match self.rollback_branches(&to_rollback, enlisted) {
            Ok(()) => CoordError::Rollback {
                gtrid: self.gtrid.to_string(),
                source: Box::new(error),
            },
            Err(rollback_error) => rollback_error,
        }
    }

    fn rollback_branches(
        &self,
        resources: &PositionalScheduler<ResourceHolderState>,
        enlisted: &BTreeSet<String>,
    ) -> Result<()> {
        self.set_status(Status::RollingBack, enlisted)?;
        match self.phases.rollbacker.rollback(&self.gtrid, resources, enlisted) {
            Ok(()) => {
                self.set_status_in_memory(Status::RolledBack);
                tracing::debug!(gtrid = %self.gtrid, "transaction rolled back");
                Ok(())
            }
            Err(e) => {
                self.set_status_in_memory(Status::Unknown);
                Err(e)
            }
        }
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn set_status(&self, status: Status, unique_names: &BTreeSet<String>) -> Result<()> {
        twopc::log_status(
            self.journal.as_ref(),
            self.filter_log_status,
            status,
            &self.gtrid,
            unique_names,
        )?;
        self.set_status_in_memory(status);
        Ok(())
    }

    fn set_status_in_memory(&self, status: Status) {
        let mut current = self.status.lock();
        tracing::trace!(gtrid = %self.gtrid, from = %*current, to = %status, "status change");
        *current = status;
    }

    fn ensure_status(&self, expected: Status, action: &str) -> Result<()> {
        let current = self.status();
        if current != expected {
            return Err(CoordError::IllegalState(format!(
                "cannot {} in a {} transaction",
                action, current
            )));
        }
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        self.in_flight.remove(&self.gtrid);
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("gtrid", &self.gtrid)
            .field("status", &self.status())
            .field("resources", &self.resources)
            .finish()
    }
}
