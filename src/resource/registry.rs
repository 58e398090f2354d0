//! Resource Registry
//!
//! Known resource producers keyed by unique name.
//!
//! ## Concurrency:
//! - `resources`: RwLock (lookups from enlisting threads run concurrently)
//! - `registration`: serializes register/unregister so a producer is
//!   recovered exactly once before it becomes visible
//! - `recoverer`: set while the transaction manager is running

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::{CoordError, Result};
use crate::recovery::IncrementalRecoverer;

use super::{ResourceProducer, MAX_UNIQUE_NAME_LENGTH};

/// A producer plus the registry's view of its health
pub struct RegisteredResource {
    producer: Arc<dyn ResourceProducer>,
    /// Set when the last recovery pass hit an unexpected error
    failed: AtomicBool,
}

impl RegisteredResource {
    pub fn new(producer: Arc<dyn ResourceProducer>) -> Self {
        Self {
            producer,
            failed: AtomicBool::new(false),
        }
    }

    pub fn unique_name(&self) -> &str {
        self.producer.unique_name()
    }

    pub fn producer(&self) -> &Arc<dyn ResourceProducer> {
        &self.producer
    }

    /// Failed producers cannot be enlisted until a clean recovery pass
    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    pub fn set_failed(&self, failed: bool) {
        let previous = self.failed.swap(failed, Ordering::AcqRel);
        if previous != failed {
            tracing::info!(
                unique_name = self.unique_name(),
                failed,
                "resource failure flag changed"
            );
        }
    }
}

/// Producers by unique name
#[derive(Default)]
pub struct ResourceRegistry {
    resources: RwLock<HashMap<String, Arc<RegisteredResource>>>,
    registration: Mutex<()>,
    recoverer: RwLock<Option<Arc<IncrementalRecoverer>>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a producer.
    ///
    /// While the coordinator is running the producer is recovered before it
    /// becomes visible. A failed recovery does not prevent registration; the
    /// producer is flagged failed and refuses enlistment until a later pass
    /// succeeds.
    pub fn register(&self, producer: Arc<dyn ResourceProducer>) -> Result<Arc<RegisteredResource>> {
        let unique_name = producer.unique_name().to_string();
        validate_unique_name(&unique_name)?;

        let _registration = self.registration.lock();
        if self.resources.read().contains_key(&unique_name) {
            return Err(CoordError::DuplicateResource(unique_name));
        }

        let entry = Arc::new(RegisteredResource::new(producer));

        let recoverer = self.recoverer.read().clone();
        if let Some(recoverer) = recoverer {
            if let Err(e) = recoverer.recover(&entry) {
                tracing::warn!(
                    unique_name = %unique_name,
                    "incremental recovery failed, registering resource as failed: {}",
                    e
                );
            }
        }

        self.resources.write().insert(unique_name.clone(), Arc::clone(&entry));
        tracing::debug!(unique_name = %unique_name, "registered resource");
        Ok(entry)
    }

    /// Remove a producer; returns it if it was registered
    pub fn unregister(&self, unique_name: &str) -> Option<Arc<RegisteredResource>> {
        let _registration = self.registration.lock();
        let removed = self.resources.write().remove(unique_name);
        if removed.is_some() {
            tracing::debug!(unique_name, "unregistered resource");
        }
        removed
    }

    pub fn lookup(&self, unique_name: &str) -> Option<Arc<RegisteredResource>> {
        self.resources.read().get(unique_name).cloned()
    }

    /// All registered producers, ordered by unique name
    pub fn resources(&self) -> Vec<Arc<RegisteredResource>> {
        let mut all: Vec<_> = self.resources.read().values().cloned().collect();
        all.sort_by(|a, b| a.unique_name().cmp(b.unique_name()));
        all
    }

    pub fn len(&self) -> usize {
        self.resources.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.read().is_empty()
    }

    /// Whether registration currently triggers recovery
    pub fn is_recovery_attached(&self) -> bool {
        self.recoverer.read().is_some()
    }

    pub(crate) fn attach_recoverer(&self, recoverer: Arc<IncrementalRecoverer>) {
        *self.recoverer.write() = Some(recoverer);
    }

    pub(crate) fn detach_recoverer(&self) {
        *self.recoverer.write() = None;
    }
}

pub(crate) fn validate_unique_name(unique_name: &str) -> Result<()> {
    if unique_name.is_empty() {
        return Err(CoordError::Config("resource unique name cannot be empty".to_string()));
    }
    if unique_name.len() > MAX_UNIQUE_NAME_LENGTH {
        return Err(CoordError::Config(format!(
            "resource unique name is longer than {} bytes",
            MAX_UNIQUE_NAME_LENGTH
        )));
    }
    Ok(())
}
