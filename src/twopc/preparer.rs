//! Phase 1: prepare

use std::sync::Arc;

use crate::error::{CoordError, PhaseKind, Result};
use crate::resource::{ResourceHolderState, Vote};
use crate::scheduler::PositionalScheduler;
use crate::uid::Uid;

use super::engine::{FailurePolicy, PhaseEngine, PhaseOperation};

/// Collects votes from every enlisted branch
pub struct Preparer {
    engine: PhaseEngine,
    warn_about_zero_resource_transaction: bool,
}

impl Preparer {
    pub fn new(engine: PhaseEngine, warn_about_zero_resource_transaction: bool) -> Self {
        Self {
            engine,
            warn_about_zero_resource_transaction,
        }
    }

    /// Prepare every branch of `resources`, natural position order.
    ///
    /// Returns the branches that still need a phase-2 call: read-only voters
    /// are left out. A single enlisted branch is marked prepared without a
    /// prepare call, so it can be committed in one phase. Any failure aborts
    /// the phase with `CoordError::Phase`.
    pub fn prepare(
        &self,
        gtrid: &Uid,
        resources: &PositionalScheduler<ResourceHolderState>,
    ) -> Result<PositionalScheduler<ResourceHolderState>> {
        let interested = PositionalScheduler::new();

        match resources.size() {
            0 => {
                if self.warn_about_zero_resource_transaction {
                    tracing::warn!(gtrid = %gtrid, "preparing a transaction with no enlisted resource");
                }
                return Ok(interested);
            }
            1 => {
                for holder in resources.iter() {
                    holder.set_prepared(true);
                    tracing::debug!(
                        gtrid = %gtrid,
                        unique_name = holder.unique_name(),
                        "single resource, skipping prepare"
                    );
                    interested.add(Arc::clone(&holder), holder.position());
                }
                return Ok(interested);
            }
            _ => {}
        }

        let operation: PhaseOperation = Arc::new(|holder: &ResourceHolderState| {
            match holder.resource().prepare(holder.xid()) {
                Ok(Vote::Ok) => {
                    holder.set_prepared(true);
                    Ok(())
                }
                Ok(Vote::ReadOnly) => {
                    tracing::debug!(unique_name = holder.unique_name(), "voted read-only");
                    holder.set_read_only(true);
                    Ok(())
                }
                Err(source) => Err(CoordError::Resource {
                    unique_name: holder.unique_name().to_string(),
                    branch: holder.xid().to_string(),
                    source,
                }),
            }
        });

        let run = self
            .engine
            .run(PhaseKind::Prepare, resources, false, FailurePolicy::FailFast, operation);
        let voted = run.into_result()?;

        for holder in voted {
            interested.add(Arc::clone(&holder), holder.position());
        }

        let mut iter = interested.iter();
        while let Some(holder) = iter.next() {
            if holder.is_read_only() {
                iter.remove()?;
            }
        }

        tracing::debug!(
            gtrid = %gtrid,
            enlisted = resources.size(),
            interested = interested.size(),
            "prepare phase complete"
        );
        Ok(interested)
    }
}
