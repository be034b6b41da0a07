//! Online engine for Tailor
//!
//! This crate runs an analyzed workload against a backing store:
//! - Engine: process-wide handle owning the lock table and switch coordinator
//! - Worker: per-connection transaction coordinator
//! - SwitchCoordinator: live protocol switching with two worker barriers
//! - EngineConfig: `tailor.toml` configuration
//! - MemoryStore: in-memory reference store for tests and demos

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod engine;
pub mod key;
pub mod metrics;
pub mod switch;
pub mod testing;
pub mod worker;

pub use config::{EngineConfig, LockWaitSettings, SwitchSettings, CONFIG_FILE_NAME};
pub use engine::Engine;
pub use key::{relation_wide_key, ColumnKeyDeriver};
pub use metrics::{TransactionCounters, TransactionMetrics};
pub use switch::{SwitchCoordinator, SwitchPhase, SwitchProgress, SwitchReport, SwitchStats};
pub use testing::{MemoryConnection, MemoryStore};
pub use worker::{Worker, WorkerState};
