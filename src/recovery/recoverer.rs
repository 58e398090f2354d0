//! Full recovery pass over every registered producer

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::journal::{Journal, Status};
use crate::resource::ResourceRegistry;
use crate::transaction::InFlightTransactions;
use crate::uid::Uid;

use super::{IncrementalRecoverer, RecoveryStats};

/// Totals of one [`Recoverer::run`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryPass {
    pub resources: usize,
    pub failed_resources: Vec<String>,
    pub committed: usize,
    pub rolled_back: usize,
    pub unresolved: usize,
    /// Dangling gtrids closed because clean resources no longer held them
    pub closed_dangling: usize,
}

/// Runs the incremental procedure on every producer, then closes the
/// dangling entries no producer holds anymore
pub struct Recoverer {
    registry: Arc<ResourceRegistry>,
    incremental: Arc<IncrementalRecoverer>,
    journal: Arc<dyn Journal>,
    in_flight: Arc<InFlightTransactions>,
    stats: Arc<RecoveryStats>,
    running: Mutex<()>,
}

impl Recoverer {
    pub fn new(
        registry: Arc<ResourceRegistry>,
        incremental: Arc<IncrementalRecoverer>,
        journal: Arc<dyn Journal>,
        in_flight: Arc<InFlightTransactions>,
        stats: Arc<RecoveryStats>,
    ) -> Self {
        Self {
            registry,
            incremental,
            journal,
            in_flight,
            stats,
            running: Mutex::new(()),
        }
    }

    pub fn incremental(&self) -> &Arc<IncrementalRecoverer> {
        &self.incremental
    }

    /// Run one pass. Returns `Ok(None)` when another pass is already running.
    pub fn run(&self) -> Result<Option<RecoveryPass>> {
        let _running = match self.running.try_lock() {
            Some(guard) => guard,
            None => {
                tracing::debug!("recovery already running, skipping this pass");
                return Ok(None);
            }
        };

        self.stats.record_execution();
        let in_flight_at_start = self.in_flight.snapshot();
        let dangling = self.journal.collect_dangling_records()?;
        let resources = self.registry.resources();

        let mut pass = RecoveryPass {
            resources: resources.len(),
            ..RecoveryPass::default()
        };
        // unique name of each clean producer -> gtrids it still holds
        let mut clean: HashMap<String, HashSet<Uid>> = HashMap::new();

        for resource in &resources {
            match self.incremental.recover(resource) {
                Ok(report) => {
                    pass.committed += report.committed;
                    pass.rolled_back += report.rolled_back;
                    pass.unresolved += report.unresolved;
                    clean.insert(resource.unique_name().to_string(), report.held);
                }
                Err(_) => pass.failed_resources.push(resource.unique_name().to_string()),
            }
        }

        // Only a decision journaled before the scans, by a transaction that
        // had already finished, is covered by what the scans saw. A clean
        // producer that holds no branch of such a gtrid is closed out of it.
        let current = self.journal.collect_dangling_records()?;
        for (gtrid, before) in &dangling {
            if in_flight_at_start.contains(gtrid) || self.in_flight.contains(gtrid) {
                continue;
            }
            let Some(now) = current.get(gtrid) else {
                continue;
            };
            let names: BTreeSet<String> = before
                .unique_names()
                .intersection(now.unique_names())
                .filter(|name| matches!(clean.get(name.as_str()), Some(held) if !held.contains(gtrid)))
                .cloned()
                .collect();
            if names.is_empty() {
                continue;
            }
            tracing::debug!(gtrid = %gtrid, names = ?names, "closing dangling transaction");
            self.journal.log(Status::Committed, gtrid, &names)?;
            pass.closed_dangling += 1;
        }

        tracing::info!(
            resources = pass.resources,
            failed = pass.failed_resources.len(),
            committed = pass.committed,
            rolled_back = pass.rolled_back,
            unresolved = pass.unresolved,
            closed_dangling = pass.closed_dangling,
            "recovery pass complete"
        );
        Ok(Some(pass))
    }
}
