//! Online validation machinery for Tailor
//!
//! This crate provides the shared state every worker validates against:
//! - ValidationLock: per-key lock state machine and version cache entry
//! - LockTable: sharded per-relation tables with bounded, signalled waits
//! - ObligationSet: per-transaction validation duties and lock plans
//! - HeldLocks: RAII guard over the locks of one commit
//! - validate_versions: commit-time version re-validation

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod held;
pub mod lock;
pub mod obligation;
pub mod table;
pub mod validation;

pub use held::HeldLocks;
pub use lock::{HolderKind, LockOutcome, ValidationLock};
pub use obligation::{LockRequest, ObligationSet, ValidationObligation};
pub use table::{AcquireOutcome, LockTable, LockTableConfig, LockWaitConfig, RelationLockTable};
pub use validation::{validate_versions, ConflictType, ValidationResult};
