//! Collaborator traits
//!
//! The engine never talks to the network, parses SQL or manages a
//! connection pool. It consumes three narrow seams instead:
//!
//! - [`StoreConnection`]: one connection to the backing store per worker
//! - [`KeyDeriver`]: maps resolved WHERE columns to a validation key
//! - [`SqlRewriter`]: registration-time statement rewriting
//!
//! Swapping any of them does not affect the concurrency core.

use std::collections::BTreeMap;

use crate::error::TailorResult;
use crate::template::StatementTemplate;
use crate::types::{IsolationLevel, OperationKind};
use crate::value::Value;

/// One result row
pub type Row = Vec<Value>;

/// Result of executing one statement against the store
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionOutcome {
    /// Rows returned by the statement
    pub rows: Vec<Row>,
    /// Row version column, when the statement touched a versioned row
    ///
    /// For reads this is the version read. For writes it is the version
    /// after the statement's own increment.
    pub version: Option<u64>,
}

impl ExecutionOutcome {
    /// Outcome carrying only a version
    pub fn with_version(version: u64) -> Self {
        ExecutionOutcome {
            rows: Vec::new(),
            version: Some(version),
        }
    }
}

/// A connection to the backing transactional store
///
/// Each online worker owns exactly one connection. A transaction is
/// implicitly open from the first `execute` until `commit` or `rollback`.
///
/// Thread safety: a connection is only used by its owning worker, so the
/// trait requires `Send` but not `Sync`.
pub trait StoreConnection: Send {
    /// Run one parameterized statement
    ///
    /// # Errors
    ///
    /// Returns `TailorError::Store` if the store rejects the statement or
    /// cannot be reached.
    fn execute(&mut self, statement: &StatementTemplate, args: &[Value]) -> TailorResult<ExecutionOutcome>;

    /// Commit the open store transaction
    fn commit(&mut self) -> TailorResult<()>;

    /// Roll back the open store transaction
    fn rollback(&mut self) -> TailorResult<()>;

    /// Change the native isolation level for subsequent transactions
    fn set_isolation(&mut self, level: IsolationLevel) -> TailorResult<()>;

    /// Read the committed version of a row, bypassing any cache
    ///
    /// Returns `Ok(None)` if the row does not exist.
    fn fetch_version(&mut self, relation: &str, key: u64) -> TailorResult<Option<u64>>;
}

/// Maps resolved WHERE-clause columns to a single validation key
///
/// One deriver is supplied per workload. It must be deterministic: the same
/// relation and column values always produce the same key.
pub trait KeyDeriver: Send + Sync {
    /// Derive the validation key for a row of `relation`
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the columns cannot identify a row.
    fn derive(&self, relation: &str, columns: &BTreeMap<String, Value>) -> TailorResult<u64>;
}

/// Registration-time statement rewriting
///
/// Adds the version column to reads and turns writes into version-bumping
/// statements that return the new version. Invoked once per registered
/// statement, never on the execution path.
pub trait SqlRewriter: Send + Sync {
    /// Rewrite `sql` for a statement of `kind` on `relation`
    fn rewrite(&self, kind: OperationKind, relation: &str, sql: &str) -> TailorResult<String>;
}

/// Rewriter that leaves statements untouched
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityRewriter;

impl SqlRewriter for IdentityRewriter {
    fn rewrite(&self, _kind: OperationKind, _relation: &str, sql: &str) -> TailorResult<String> {
        Ok(sql.to_string())
    }
}
