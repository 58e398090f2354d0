//! Per-branch enlistment state

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{XaResource, Xid};

/// One branch of a transaction on one resource
pub struct ResourceHolderState {
    unique_name: String,
    resource: Arc<dyn XaResource>,
    xid: Xid,
    position: i32,
    /// Voted read-only; excluded from phase 2
    read_only: AtomicBool,
    prepared: AtomicBool,
}

impl ResourceHolderState {
    pub fn new(
        unique_name: impl Into<String>,
        resource: Arc<dyn XaResource>,
        xid: Xid,
        position: i32,
    ) -> Self {
        Self {
            unique_name: unique_name.into(),
            resource,
            xid,
            position,
            read_only: AtomicBool::new(false),
            prepared: AtomicBool::new(false),
        }
    }

    pub fn unique_name(&self) -> &str {
        &self.unique_name
    }

    pub fn resource(&self) -> &dyn XaResource {
        self.resource.as_ref()
    }

    pub fn xid(&self) -> &Xid {
        &self.xid
    }

    pub fn position(&self) -> i32 {
        self.position
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::Acquire)
    }

    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::Release);
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared.load(Ordering::Acquire)
    }

    pub fn set_prepared(&self, prepared: bool) {
        self.prepared.store(prepared, Ordering::Release);
    }
}

impl fmt::Debug for ResourceHolderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceHolderState")
            .field("unique_name", &self.unique_name)
            .field("xid", &self.xid)
            .field("position", &self.position)
            .field("read_only", &self.is_read_only())
            .field("prepared", &self.is_prepared())
            .finish()
    }
}
