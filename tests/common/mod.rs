//! Shared test utilities for all integration test suites.
//!
//! Import via `#[path = "../common/mod.rs"] mod common;` from a suite's main.rs.

#![allow(dead_code)]
#![allow(unused_imports)]

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Once;
use std::time::Duration;

pub use tailordb::analysis::{detect, find_cycles, DependencyGraph, EdgeKind};
pub use tailordb::concurrency::{
    HeldLocks, LockOutcome, LockTable, LockTableConfig, LockWaitConfig, ObligationSet,
    ValidationLock, ValidationObligation,
};
pub use tailordb::engine::{MemoryConnection, SwitchProgress, SwitchStats};
pub use tailordb::types::{
    ExecutionOutcome, IsolationLevel, StatementRef, StatementTemplate, StoreConnection, TailorResult,
    TemplateId, ValidationProtocol,
};
pub use tailordb::{
    AnalyzedWorkload, Engine, EngineConfig, IsolationProtocol, LockKind, MemoryStore,
    OperationKind, StatementSpec, SwitchPhase, TailorError, TemplateRegistry, Value, Worker,
    WorkerId, WorkerState,
};

// ============================================================================
// Logging
// ============================================================================

static INIT_TRACING: Once = Once::new();

/// Route `tracing` output to the test harness when `TAILOR_TEST_LOG` is set.
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        if std::env::var_os("TAILOR_TEST_LOG").is_some() {
            let _ = tracing_subscriber::fmt()
                .with_max_level(tracing_subscriber::filter::LevelFilter::DEBUG)
                .with_test_writer()
                .try_init();
        }
    });
}

// ============================================================================
// Workloads
// ============================================================================

/// One statement of a test template
#[derive(Debug, Clone, Copy)]
pub enum Op {
    Read(&'static str),
    Write(&'static str),
    Scan(&'static str),
}

impl Op {
    fn spec(self) -> StatementSpec {
        match self {
            Op::Read(rel) => StatementSpec::read(rel, format!("SELECT v FROM {} WHERE id = ?", rel)).bind(0, "id"),
            Op::Scan(rel) => StatementSpec::scan(rel, format!("SELECT v FROM {} WHERE id >= ?", rel)).bind(0, "id"),
            Op::Write(rel) => {
                StatementSpec::write(rel, format!("UPDATE {} SET v = ? WHERE id = ?", rel)).bind(1, "id")
            }
        }
    }
}

/// Register `templates` in order and analyze them
///
/// Every READ/SCAN binds placeholder 0 to `id`; every WRITE binds
/// placeholder 1 to `id` and writes placeholder 0.
pub fn analyze(templates: &[(&str, &[Op])]) -> AnalyzedWorkload {
    let mut registry = TemplateRegistry::new();
    for (name, ops) in templates {
        registry.register_transaction(name).unwrap();
        for op in ops.iter() {
            registry.register_statement(name, op.spec()).unwrap();
        }
    }
    registry.analyze().unwrap()
}

/// Classic write skew: `a` reads x and writes y, `b` reads y and writes x.
pub fn write_skew() -> AnalyzedWorkload {
    analyze(&[
        ("a", &[Op::Read("x"), Op::Write("y")]),
        ("b", &[Op::Read("y"), Op::Write("x")]),
    ])
}

/// True if statement `index` of template `name` is flagged under RC
pub fn rc_flag(workload: &AnalyzedWorkload, name: &str, index: usize) -> bool {
    workload.statement(name, index).unwrap().needs_validation_under_rc()
}

/// True if statement `index` of template `name` is flagged under SI
pub fn si_flag(workload: &AnalyzedWorkload, name: &str, index: usize) -> bool {
    workload.statement(name, index).unwrap().needs_validation_under_si()
}

// ============================================================================
// Engine helpers
// ============================================================================

/// Config with fast switch polling and short lock waits
pub fn fast_config(protocol: IsolationProtocol) -> EngineConfig {
    let mut config = EngineConfig::with_protocol(protocol);
    config.switch.poll_interval_ms = 1;
    config.switch.stall_warn_ms = 50;
    config.lock_wait.max_retries = 200;
    config.lock_wait.retry_interval_ms = 1;
    config
}

pub fn engine(workload: AnalyzedWorkload, protocol: IsolationProtocol) -> Engine {
    init_tracing();
    Engine::new(workload, fast_config(protocol)).unwrap()
}

pub fn connect(engine: &Engine, store: &MemoryStore, id: u64) -> Worker {
    engine.connect(WorkerId(id), Box::new(store.connect())).unwrap()
}

/// Poll `cond` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    cond()
}

// ============================================================================
// GatedConnection - store connection whose commit blocks until released
// ============================================================================

/// Wraps a [`MemoryConnection`]; every `commit` waits for one `()` on the gate.
///
/// Lets a test hold a worker inside its commit (after validation locks are
/// taken, before they are released) for as long as it needs.
pub struct GatedConnection {
    inner: MemoryConnection,
    gate: Receiver<()>,
}

/// Open a gated connection, returning it with its release handle and store connection id
pub fn gated(store: &MemoryStore) -> (GatedConnection, Sender<()>, u64) {
    let (release, gate) = mpsc::channel();
    let inner = store.connect();
    let id = inner.id();
    (GatedConnection { inner, gate }, release, id)
}

impl StoreConnection for GatedConnection {
    fn execute(&mut self, statement: &StatementTemplate, args: &[Value]) -> TailorResult<ExecutionOutcome> {
        self.inner.execute(statement, args)
    }

    fn commit(&mut self) -> TailorResult<()> {
        // a dropped sender opens the gate for good
        let _ = self.gate.recv();
        self.inner.commit()
    }

    fn rollback(&mut self) -> TailorResult<()> {
        self.inner.rollback()
    }

    fn set_isolation(&mut self, level: IsolationLevel) -> TailorResult<()> {
        self.inner.set_isolation(level)
    }

    fn fetch_version(&mut self, relation: &str, key: u64) -> TailorResult<Option<u64>> {
        self.inner.fetch_version(relation, key)
    }
}
