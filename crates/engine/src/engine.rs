//! Process-wide engine handle
//!
//! An `Engine` is built once from an analyzed workload and a config. It owns
//! the only shared mutable state of the system (lock table, switch
//! coordinator, transaction counters) and hands out one [`Worker`] per
//! client connection. Cloning the handle is cheap.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tailor_analysis::AnalyzedWorkload;
use tailor_concurrency::LockTable;
use tailor_core::{IsolationProtocol, KeyDeriver, StoreConnection, TailorResult, WorkerId};
use tracing::info;

use crate::config::EngineConfig;
use crate::key::ColumnKeyDeriver;
use crate::metrics::{TransactionCounters, TransactionMetrics};
use crate::switch::{SwitchCoordinator, SwitchPhase, SwitchProgress, SwitchReport, SwitchStats};
use crate::worker::Worker;

/// State shared by every worker of one engine
pub(crate) struct EngineShared {
    pub(crate) workload: Arc<AnalyzedWorkload>,
    pub(crate) locks: LockTable,
    pub(crate) switch: SwitchCoordinator,
    pub(crate) keys: Arc<dyn KeyDeriver>,
    pub(crate) config: EngineConfig,
    pub(crate) counters: TransactionCounters,
    next_txn: AtomicU64,
}

impl EngineShared {
    /// Next transaction id; smaller ids are older
    pub(crate) fn next_txn_id(&self) -> u64 {
        self.next_txn.fetch_add(1, Ordering::Relaxed)
    }
}

/// Handle to a running engine
#[derive(Clone)]
pub struct Engine {
    shared: Arc<EngineShared>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("protocol", &self.current_protocol())
            .field("workers", &self.shared.switch.worker_count())
            .finish()
    }
}

impl Engine {
    /// Build an engine using [`ColumnKeyDeriver`]
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the config does not validate.
    pub fn new(workload: AnalyzedWorkload, config: EngineConfig) -> TailorResult<Self> {
        Self::with_key_deriver(workload, config, Arc::new(ColumnKeyDeriver))
    }

    /// Build an engine with a workload-specific key deriver
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the config does not validate.
    pub fn with_key_deriver(
        workload: AnalyzedWorkload,
        config: EngineConfig,
        keys: Arc<dyn KeyDeriver>,
    ) -> TailorResult<Self> {
        config.validate()?;
        let protocol = config.protocol()?;
        let locks = LockTable::new(workload.relations(), config.lock_table())?;
        let switch = SwitchCoordinator::new(
            protocol,
            config.switch.poll_interval(),
            config.switch.stall_warn(),
        );

        info!(
            target: "tailor::txn",
            protocol = %protocol,
            templates = workload.templates().len(),
            relations = locks.relations().len(),
            "Engine started"
        );

        Ok(Engine {
            shared: Arc::new(EngineShared {
                workload: Arc::new(workload),
                locks,
                switch,
                keys,
                config,
                counters: TransactionCounters::new(),
                next_txn: AtomicU64::new(1),
            }),
        })
    }

    /// Open a worker for one client connection
    ///
    /// The worker clones the analyzed templates, registers with the switch
    /// coordinator and sets the connection's isolation level.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if `id` is already connected, or the store
    /// error raised while setting the isolation level.
    pub fn connect(&self, id: WorkerId, store: Box<dyn StoreConnection>) -> TailorResult<Worker> {
        Worker::open(Arc::clone(&self.shared), id, store)
    }

    /// Switch every worker to `target`, blocking until done
    pub fn request_switch(&self, target: IsolationProtocol) -> SwitchReport {
        self.shared.switch.request_switch(target)
    }

    /// Protocol currently in effect
    pub fn current_protocol(&self) -> IsolationProtocol {
        self.shared.switch.current_protocol()
    }

    /// Current switch phase
    pub fn switch_phase(&self) -> SwitchPhase {
        self.shared.switch.phase()
    }

    /// Switch phase with ready/finished counts
    pub fn switch_progress(&self) -> SwitchProgress {
        self.shared.switch.progress()
    }

    /// Cumulative switch statistics
    pub fn switch_stats(&self) -> SwitchStats {
        self.shared.switch.stats()
    }

    /// Transaction metrics snapshot
    pub fn metrics(&self) -> TransactionMetrics {
        self.shared.counters.snapshot()
    }

    /// Analyzed workload the engine runs
    pub fn workload(&self) -> &AnalyzedWorkload {
        &self.shared.workload
    }

    /// Shared lock table
    pub fn lock_table(&self) -> &LockTable {
        &self.shared.locks
    }

    /// Config the engine was built with
    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }
}
