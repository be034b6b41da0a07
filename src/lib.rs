//! TailorDB - isolation-tailoring middleware with live protocol switching
//!
//! TailorDB sits between an application and a relational store. It lets
//! the store run a weaker isolation level (snapshot isolation or read
//! committed) while still guaranteeing serializable executions, by
//! validating at commit time only the statements that static analysis
//! found dangerous. The protocol can be switched while workers run.
//!
//! # Quick Start
//!
//! ```
//! use tailordb::{
//!     Engine, EngineConfig, IsolationProtocol, MemoryStore, StatementSpec, TemplateRegistry,
//!     Value, WorkerId,
//! };
//!
//! # fn main() -> tailordb::TailorResult<()> {
//! let mut registry = TemplateRegistry::new();
//! registry.register_transaction("transfer")?;
//! registry.register_statement(
//!     "transfer",
//!     StatementSpec::write("accounts", "UPDATE accounts SET bal = ? WHERE id = ?").bind(1, "id"),
//! )?;
//! let workload = registry.analyze()?;
//!
//! let engine = Engine::new(workload, EngineConfig::with_protocol(IsolationProtocol::SiTailor))?;
//! let store = MemoryStore::new();
//! let mut worker = engine.connect(WorkerId(1), Box::new(store.connect()))?;
//! worker.execute("transfer", 0, &[Value::Int(90), Value::Int(1)])?;
//! worker.commit()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`types`]: errors, templates, protocol identifiers and store seams
//! - [`analysis`]: offline template registration and dangerous-structure detection
//! - [`concurrency`]: validation locks, version cache and commit-time checks
//! - [`engine`]: workers, protocol switching and configuration
//!
//! The most used types are re-exported at the crate root.

pub use tailor_analysis as analysis;
pub use tailor_concurrency as concurrency;
pub use tailor_core as types;
pub use tailor_engine as engine;

pub use tailor_analysis::{AnalyzedWorkload, StatementSpec, TemplateRegistry};
pub use tailor_core::{
    ExecutionOutcome, IsolationLevel, IsolationProtocol, KeyDeriver, LockKind, OperationKind,
    SqlRewriter, StoreConnection, TailorError, TailorResult, Value, WorkerId,
};
pub use tailor_engine::{
    Engine, EngineConfig, MemoryStore, SwitchPhase, SwitchReport, TransactionMetrics, Worker,
    WorkerState,
};
