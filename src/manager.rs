//! Transaction Manager
//!
//! The coordinator instance that owns every shared component.
//!
//! ## Responsibilities
//! - Open the journal and recover every registered resource on startup
//! - Hand out transactions bound to this instance's journal and phases
//! - Recover producers registered while running, and periodically in the
//!   background
//! - Shut everything down in order

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Sender};
use parking_lot::Mutex;

use crate::config::TmConfig;
use crate::error::{CoordError, Result};
use crate::journal::{self, Journal, JournalStats};
use crate::recovery::{IncrementalRecoverer, Recoverer, RecoveryPass, RecoveryStats, RecoveryStatsSnapshot};
use crate::resource::ResourceRegistry;
use crate::transaction::{InFlightTransactions, Transaction};
use crate::twopc::{AsyncExecutor, Executor, Phases, SyncExecutor};
use crate::uid::UidGenerator;

struct BackgroundRecovery {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

/// A transaction coordinator
///
/// ## Concurrency Model
///
/// - **Transactions** run concurrently; each one drives its own phases on
///   the calling thread (fanning out to the async executor when enabled)
/// - **Journal** serializes offsets internally; readers never block writers
/// - **Recovery** passes are serialized by the [`Recoverer`] and skip
///   gtrids still in flight here
pub struct TransactionManager {
    config: TmConfig,
    journal: Arc<dyn Journal>,
    uids: Arc<UidGenerator>,
    registry: Arc<ResourceRegistry>,
    executor: Arc<dyn Executor>,
    phases: Arc<Phases>,
    in_flight: Arc<InFlightTransactions>,
    recovery_stats: Arc<RecoveryStats>,
    recoverer: Arc<Recoverer>,
    background: Mutex<Option<BackgroundRecovery>>,
    running: AtomicBool,
}

impl TransactionManager {
    /// Build a manager whose journal is chosen by `config`
    pub fn new(config: TmConfig) -> Result<Self> {
        let journal = journal::from_config(&config);
        Self::with_journal(config, journal)
    }

    /// Build a manager around an existing journal
    pub fn with_journal(config: TmConfig, journal: Arc<dyn Journal>) -> Result<Self> {
        config.validate()?;

        let server_id = config.server_id_bytes();
        let uids = Arc::new(UidGenerator::new(server_id.clone()));

        let executor: Arc<dyn Executor> = if config.async_2pc {
            Arc::new(AsyncExecutor::new(config.async_2pc_threads)?)
        } else {
            Arc::new(SyncExecutor::new())
        };
        let phases = Arc::new(Phases::new(&config, Arc::clone(&journal), Arc::clone(&executor)));

        let registry = Arc::new(ResourceRegistry::new());
        let in_flight = Arc::new(InFlightTransactions::new());
        let recovery_stats = Arc::new(RecoveryStats::new());

        let recovery_server_id = if config.current_node_only_recovery {
            Some(server_id)
        } else {
            None
        };
        let incremental = Arc::new(IncrementalRecoverer::new(
            Arc::clone(&journal),
            Arc::clone(&in_flight),
            Arc::clone(&recovery_stats),
            recovery_server_id,
        ));
        let recoverer = Arc::new(Recoverer::new(
            Arc::clone(&registry),
            incremental,
            Arc::clone(&journal),
            Arc::clone(&in_flight),
            Arc::clone(&recovery_stats),
        ));

        Ok(Self {
            config,
            journal,
            uids,
            registry,
            executor,
            phases,
            in_flight,
            recovery_stats,
            recoverer,
            background: Mutex::new(None),
            running: AtomicBool::new(false),
        })
    }

    /// Start the manager
    ///
    /// On startup:
    /// 1. Open the journal (rebuilding the dangling index)
    /// 2. Recover every resource registered so far
    /// 3. Recover producers as soon as they register from now on
    /// 4. Start background recovery if an interval is configured
    pub fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let started = self.start_inner();
        if started.is_err() {
            self.running.store(false, Ordering::Release);
        }
        started
    }

    fn start_inner(&self) -> Result<()> {
        // Step 1: Journal
        self.journal.open()?;

        // Step 2: Cold-start recovery
        if let Some(pass) = self.recoverer.run()? {
            if !pass.failed_resources.is_empty() {
                tracing::warn!(
                    failed = ?pass.failed_resources,
                    "some resources failed recovery and cannot be enlisted until a later pass succeeds"
                );
            }
        }

        // Step 3: Incremental recovery on registration
        self.registry
            .attach_recoverer(Arc::clone(self.recoverer.incremental()));

        // Step 4: Background recovery
        let interval = self.config.background_recovery_interval_secs;
        if interval > 0 {
            *self.background.lock() = Some(self.spawn_background_recovery(Duration::from_secs(interval))?);
        }

        tracing::info!(
            server_id = %String::from_utf8_lossy(self.uids.server_id()),
            journal = ?self.config.journal,
            async_2pc = self.config.async_2pc,
            "transaction manager started"
        );
        Ok(())
    }

    fn spawn_background_recovery(&self, interval: Duration) -> Result<BackgroundRecovery> {
        let (stop, stopped) = channel::bounded::<()>(1);
        let ticker = channel::tick(interval);
        let recoverer = Arc::clone(&self.recoverer);

        let handle = thread::Builder::new()
            .name("xacoord-recovery".to_string())
            .spawn(move || loop {
                crossbeam::select! {
                    recv(ticker) -> _ => {
                        if let Err(e) = recoverer.run() {
                            tracing::error!("background recovery failed: {}", e);
                        }
                    }
                    recv(stopped) -> _ => break,
                }
            })?;

        tracing::debug!(interval_secs = interval.as_secs(), "background recovery scheduled");
        Ok(BackgroundRecovery { stop, handle })
    }

    /// Begin a new transaction
    pub fn begin(&self) -> Result<Arc<Transaction>> {
        if !self.is_running() {
            return Err(CoordError::IllegalState(
                "transaction manager is not running".to_string(),
            ));
        }
        let gtrid = self.uids.generate_uid();
        tracing::trace!(gtrid = %gtrid, "begin");
        Ok(Arc::new(Transaction::new(
            gtrid,
            Arc::clone(&self.journal),
            Arc::clone(&self.uids),
            Arc::clone(&self.phases),
            Arc::clone(&self.in_flight),
            self.config.filter_log_status,
        )))
    }

    /// Run a full recovery pass now; `Ok(None)` if one is already running
    pub fn recover_now(&self) -> Result<Option<RecoveryPass>> {
        if !self.is_running() {
            return Err(CoordError::IllegalState(
                "transaction manager is not running".to_string(),
            ));
        }
        self.recoverer.run()
    }

    /// Stop background recovery, the executor and the journal
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }

        if let Some(background) = self.background.lock().take() {
            let _ = background.stop.send(());
            if background.handle.join().is_err() {
                tracing::error!("background recovery thread panicked");
            }
        }

        self.registry.detach_recoverer();
        self.executor.shutdown();

        let in_flight = self.in_flight.len();
        if in_flight > 0 {
            tracing::warn!(in_flight, "shutting down with transactions still in flight");
        }

        self.journal.shutdown();
        tracing::info!("transaction manager stopped");
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn registry(&self) -> &Arc<ResourceRegistry> {
        &self.registry
    }

    pub fn journal(&self) -> &Arc<dyn Journal> {
        &self.journal
    }

    pub fn journal_stats(&self) -> Option<JournalStats> {
        self.journal.stats()
    }

    pub fn recovery_stats(&self) -> RecoveryStatsSnapshot {
        self.recovery_stats.snapshot()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn server_id(&self) -> &[u8] {
        self.uids.server_id()
    }

    pub fn config(&self) -> &TmConfig {
        &self.config
    }
}

impl Drop for TransactionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
