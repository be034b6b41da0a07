//! Core types and traits for Tailor
//!
//! This crate defines the foundational types used throughout the system:
//! - TailorError: Error type hierarchy
//! - OperationKind, LockKind: Statement and lock classification
//! - IsolationProtocol, ValidationProtocol, IsolationLevel: Protocol identifiers
//! - StatementTemplate, TransactionTemplate: Registered workload shapes
//! - Value: Runtime statement arguments
//! - Traits: Collaborator seams (StoreConnection, KeyDeriver, SqlRewriter)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod limits;
pub mod template;
pub mod traits;
pub mod types;
pub mod value;

pub use error::{TailorError, TailorResult};
pub use limits::{DEFAULT_BUCKET_COUNT, MAX_STATEMENTS_PER_TEMPLATE};
pub use template::{StatementTemplate, TransactionTemplate, WhereBinding};
pub use traits::{ExecutionOutcome, IdentityRewriter, KeyDeriver, Row, SqlRewriter, StoreConnection};
pub use types::{
    IsolationLevel, IsolationProtocol, LockKind, OperationKind, StatementRef, TemplateId,
    ValidationProtocol, WorkerId,
};
pub use value::Value;
