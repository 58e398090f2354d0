//! Phase Engine
//!
//! Runs one phase across the branches of a scheduler, position by position.
//!
//! ## Execution
//! ```text
//! position A: submit job(r1), job(r2) ... → wait for all   (may run in parallel)
//!             ─── barrier ───
//! position B: submit job(r3) ...          → wait for all
//! ```
//!
//! Failures are collected into one [`PhaseError`]. With
//! [`FailurePolicy::FailFast`] a failing position stops the phase; with
//! [`FailurePolicy::Continue`] later positions still run.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{CoordError, PhaseError, PhaseKind, Result};
use crate::resource::ResourceHolderState;
use crate::scheduler::PositionalScheduler;

use super::executor::Executor;

/// The single-branch operation a phase applies
pub type PhaseOperation = Arc<dyn Fn(&ResourceHolderState) -> Result<()> + Send + Sync>;

/// What a phase does after a position reports failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Skip every later position
    FailFast,
    /// Keep going; every branch must hear the decided outcome
    Continue,
}

/// Result of running a phase
#[derive(Debug)]
pub struct PhaseRun {
    /// Branches whose job succeeded, in execution order
    pub succeeded: Vec<Arc<ResourceHolderState>>,
    pub failures: PhaseError,
    /// Positions never reached because of `FailFast`
    pub skipped_positions: Vec<i32>,
}

impl PhaseRun {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn into_result(self) -> Result<Vec<Arc<ResourceHolderState>>> {
        if self.failures.is_empty() {
            Ok(self.succeeded)
        } else {
            Err(CoordError::Phase(self.failures))
        }
    }
}

/// Drives jobs through an executor with a barrier between positions
#[derive(Clone)]
pub struct PhaseEngine {
    executor: Arc<dyn Executor>,
    timeout: Option<Duration>,
}

impl PhaseEngine {
    /// `timeout_ms == 0` waits for every job without limit
    pub fn new(executor: Arc<dyn Executor>, timeout_ms: u64) -> Self {
        let timeout = if timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(timeout_ms))
        };
        Self { executor, timeout }
    }

    pub fn run(
        &self,
        phase: PhaseKind,
        resources: &PositionalScheduler<ResourceHolderState>,
        reverse: bool,
        policy: FailurePolicy,
        operation: PhaseOperation,
    ) -> PhaseRun {
        let positions = if reverse {
            resources.reverse_order_positions()
        } else {
            resources.natural_order_positions()
        };

        let mut run = PhaseRun {
            succeeded: Vec::new(),
            failures: PhaseError::new(phase),
            skipped_positions: Vec::new(),
        };

        for (index, position) in positions.iter().enumerate() {
            let holders = resources.by_position(*position, reverse);
            tracing::trace!(%phase, position, branches = holders.len(), "running position");

            let handles: Vec<_> = holders
                .into_iter()
                .map(|holder| {
                    let operation = Arc::clone(&operation);
                    let target = Arc::clone(&holder);
                    let handle = self.executor.submit(Box::new(move || operation(&target)));
                    (holder, handle)
                })
                .collect();

            let mut position_failed = false;
            for (holder, handle) in handles {
                let result = handle.wait(self.timeout).unwrap_or_else(|| {
                    Err(CoordError::PhaseTimeout {
                        unique_name: holder.unique_name().to_string(),
                        branch: holder.xid().to_string(),
                        after_ms: self.timeout.map(|t| t.as_millis() as u64).unwrap_or(0),
                    })
                });

                match result {
                    Ok(()) => run.succeeded.push(holder),
                    Err(e) => {
                        position_failed = true;
                        run.failures.push(holder.unique_name(), holder.xid().clone(), e);
                    }
                }
            }

            if position_failed && policy == FailurePolicy::FailFast {
                run.skipped_positions = positions[index + 1..].to_vec();
                if !run.skipped_positions.is_empty() {
                    tracing::debug!(
                        %phase,
                        position,
                        skipped = ?run.skipped_positions,
                        "position failed, not running later positions"
                    );
                }
                break;
            }
        }

        run
    }
}
