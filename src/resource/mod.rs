//! Resource Module
//!
//! The contract the coordinator consumes from transactional resources, the
//! per-branch bookkeeping it keeps for each enlistment, and the registry of
//! resource producers.
//!
//! ## Responsibilities
//! - [`XaResource`]: prepare / commit / rollback / forget / recover on a branch
//! - [`ResourceProducer`]: a named source of resources that can be recovered
//! - [`ResourceHolderState`]: one enlisted branch inside a transaction
//! - [`ResourceRegistry`]: producers by unique name, with incremental recovery
//!   when one appears while the coordinator is running

mod holder;
mod registry;
mod xa;

use std::sync::Arc;

pub use holder::ResourceHolderState;
pub use registry::{RegisteredResource, ResourceRegistry};
pub(crate) use registry::validate_unique_name;
pub use xa::{XaError, XaErrorCode, XaResult, Xid};

use crate::error::Result;
use crate::scheduler::DEFAULT_POSITION;

/// Longest unique name the journal format can carry (i16 length prefix)
pub const MAX_UNIQUE_NAME_LENGTH: usize = i16::MAX as usize;

/// A resource's answer to prepare
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    /// Prepared, expects a phase-2 call
    Ok,
    /// Nothing was written; no phase-2 call needed
    ReadOnly,
}

/// Flags for the recover scan sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverFlag {
    StartScan,
    NoFlags,
    EndScan,
}

/// A transactional resource driven by the coordinator.
///
/// Calls are blocking and authoritative; the coordinator never cancels one
/// that is in flight.
pub trait XaResource: Send + Sync {
    fn prepare(&self, xid: &Xid) -> XaResult<Vote>;

    fn commit(&self, xid: &Xid, one_phase: bool) -> XaResult<()>;

    fn rollback(&self, xid: &Xid) -> XaResult<()>;

    fn forget(&self, xid: &Xid) -> XaResult<()>;

    /// List prepared branches. Called with `StartScan`, then `NoFlags`
    /// until nothing new comes back, then `EndScan`.
    fn recover(&self, flag: RecoverFlag) -> XaResult<Vec<Xid>>;
}

/// A named producer of resources (a pool, a connection factory...).
pub trait ResourceProducer: Send + Sync {
    /// Name recorded in the journal for branches of this producer
    fn unique_name(&self) -> &str;

    /// A resource to enlist in a new transaction
    fn xa_resource(&self) -> Result<Arc<dyn XaResource>>;

    /// A resource dedicated to a recovery scan
    fn start_recovery(&self) -> Result<Arc<dyn XaResource>>;

    /// Release what `start_recovery` acquired
    fn end_recovery(&self) -> Result<()>;

    /// Position of this producer's branches in the 2PC ordering
    fn two_pc_ordering_position(&self) -> i32 {
        DEFAULT_POSITION
    }
}
