//! Incremental Recoverer
//!
//! Recovers a single resource producer against the journal's dangling
//! records: branches of a dangling gtrid are committed, everything else is
//! rolled back. Each resolution is journaled so the dangling index shrinks.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::{CoordError, Result};
use crate::journal::{Journal, Status};
use crate::resource::RegisteredResource;
use crate::transaction::InFlightTransactions;

use super::{helper, RecoveryReport, RecoveryStats};

/// Recovers one producer at a time
pub struct IncrementalRecoverer {
    journal: Arc<dyn Journal>,
    in_flight: Arc<InFlightTransactions>,
    stats: Arc<RecoveryStats>,
    /// Set when only this node's branches are recovered
    server_id: Option<Vec<u8>>,
}

impl IncrementalRecoverer {
    pub fn new(
        journal: Arc<dyn Journal>,
        in_flight: Arc<InFlightTransactions>,
        stats: Arc<RecoveryStats>,
        server_id: Option<Vec<u8>>,
    ) -> Self {
        Self {
            journal,
            in_flight,
            stats,
            server_id,
        }
    }

    /// Recover `resource` against the journal's dangling records.
    ///
    /// The producer is flagged failed when an unexpected error occurs and
    /// cleared after a clean pass; `end_recovery` is always called.
    pub fn recover(&self, resource: &RegisteredResource) -> Result<RecoveryReport> {
        let unique_name = resource.unique_name().to_string();

        let mut result = self.resolve_in_doubt(resource);
        if let Err(e) = resource.producer().end_recovery() {
            tracing::warn!(unique_name = %unique_name, "end of recovery failed: {}", e);
            if result.is_ok() {
                result = Err(e);
            }
        }

        match result {
            Ok(report) => {
                resource.set_failed(false);
                self.stats.record(&report);
                if report.is_empty() {
                    tracing::debug!(unique_name = %unique_name, "nothing to recover");
                } else {
                    tracing::info!(
                        unique_name = %unique_name,
                        committed = report.committed,
                        rolled_back = report.rolled_back,
                        unresolved = report.unresolved,
                        "recovered resource"
                    );
                }
                Ok(report)
            }
            Err(e) => {
                resource.set_failed(true);
                self.stats.record_failure();
                tracing::error!(unique_name = %unique_name, "recovery failed: {}", e);
                Err(CoordError::Recovery {
                    unique_name,
                    source: Box::new(e),
                })
            }
        }
    }

    fn resolve_in_doubt(&self, resource: &RegisteredResource) -> Result<RecoveryReport> {
        let unique_name = resource.unique_name();
        let mut report = RecoveryReport::new(unique_name);

        let xa_resource = resource.producer().start_recovery()?;
        let xids = helper::recover(xa_resource.as_ref(), unique_name, self.server_id.as_deref())?;
        report.in_doubt = xids.len();

        let mut finished = Vec::with_capacity(xids.len());
        for xid in xids {
            if self.in_flight.contains(xid.gtrid()) {
                tracing::debug!(unique_name, branch = %xid, "transaction still running, leaving branch alone");
                report.skipped += 1;
                report.held.insert(xid.gtrid().clone());
            } else {
                finished.push(xid);
            }
        }
        if finished.is_empty() {
            return Ok(report);
        }

        // Read after the in-flight checks: a transaction that finished before
        // its check has journaled its decision by now.
        let dangling = self.journal.collect_dangling_records()?;

        let names: BTreeSet<String> = BTreeSet::from([unique_name.to_string()]);
        for xid in finished {
            let gtrid = xid.gtrid();
            let resolved = if dangling.contains_key(gtrid) {
                tracing::debug!(unique_name, branch = %xid, "committing dangling branch");
                let committed = helper::commit(xa_resource.as_ref(), unique_name, &xid)?;
                if committed {
                    self.journal.log(Status::Committed, gtrid, &names)?;
                    report.committed += 1;
                }
                committed
            } else {
                tracing::debug!(unique_name, branch = %xid, "rolling back branch with no commit record");
                let rolled_back = helper::rollback(xa_resource.as_ref(), unique_name, &xid)?;
                if rolled_back {
                    self.journal.log(Status::RolledBack, gtrid, &names)?;
                    report.rolled_back += 1;
                }
                rolled_back
            };
            if !resolved {
                report.unresolved += 1;
                report.held.insert(gtrid.clone());
            }
        }

        Ok(report)
    }
}
