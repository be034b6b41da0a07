//! In-memory reference store
//!
//! `MemoryStore` is a versioned key/value store that speaks the
//! [`StoreConnection`] seam. It is small enough to reason about in tests:
//!
//! - Rows are addressed by (relation, validation key), the key derived from
//!   the statement's WHERE arguments with the store's [`KeyDeriver`]
//! - A READ or SCAN returns the row's value and version, preferring the
//!   connection's own uncommitted write
//! - The first WRITE to a row in a transaction buffers the value at
//!   version `committed + 1`; later writes in the same transaction keep it
//! - Commit applies every buffered write, bumping each committed version
//!   by one; rollback discards the buffer
//!
//! The written value is the first argument not bound to a WHERE column,
//! or `Null` if every argument is a key.
//!
//! Isolation levels are recorded per connection but not enforced.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tailor_core::{
    ExecutionOutcome, IsolationLevel, KeyDeriver, OperationKind, StatementTemplate, StoreConnection,
    TailorError, TailorResult, Value,
};

use crate::key::ColumnKeyDeriver;

type RowId = (String, u64);

#[derive(Debug, Clone)]
struct StoredRow {
    value: Value,
    version: u64,
}

#[derive(Debug, Default)]
struct StoreInner {
    rows: FxHashMap<RowId, StoredRow>,
    isolation: FxHashMap<u64, IsolationLevel>,
    unavailable: bool,
    commits: u64,
}

/// Shared in-memory store
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<StoreInner>>,
    keys: Arc<dyn KeyDeriver>,
    next_connection: Arc<AtomicU64>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("MemoryStore")
            .field("rows", &inner.rows.len())
            .field("commits", &inner.commits)
            .finish()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Empty store keyed by [`ColumnKeyDeriver`]
    pub fn new() -> Self {
        Self::with_key_deriver(Arc::new(ColumnKeyDeriver))
    }

    /// Empty store keyed by `keys`
    pub fn with_key_deriver(keys: Arc<dyn KeyDeriver>) -> Self {
        MemoryStore {
            inner: Arc::new(Mutex::new(StoreInner::default())),
            keys,
            next_connection: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Open a new connection
    pub fn connect(&self) -> MemoryConnection {
        let id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        MemoryConnection {
            id,
            store: self.clone(),
            writes: BTreeMap::new(),
        }
    }

    /// Insert or overwrite a committed row, bumping its version
    pub fn seed(&self, relation: &str, key: u64, value: impl Into<Value>) -> u64 {
        let mut inner = self.inner.lock();
        let row = inner
            .rows
            .entry((relation.to_string(), key))
            .or_insert(StoredRow {
                value: Value::Null,
                version: 0,
            });
        row.value = value.into();
        row.version += 1;
        row.version
    }

    /// Committed version of a row
    pub fn version(&self, relation: &str, key: u64) -> Option<u64> {
        self.inner
            .lock()
            .rows
            .get(&(relation.to_string(), key))
            .map(|r| r.version)
    }

    /// Committed value of a row
    pub fn value(&self, relation: &str, key: u64) -> Option<Value> {
        self.inner
            .lock()
            .rows
            .get(&(relation.to_string(), key))
            .map(|r| r.value.clone())
    }

    /// Isolation level last set on connection `id`
    pub fn isolation_of(&self, id: u64) -> Option<IsolationLevel> {
        self.inner.lock().isolation.get(&id).copied()
    }

    /// Make every store call fail with a `Store` error
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.lock().unavailable = unavailable;
    }

    /// Number of store transactions committed
    pub fn commit_count(&self) -> u64 {
        self.inner.lock().commits
    }

    fn check_available(inner: &StoreInner) -> TailorResult<()> {
        if inner.unavailable {
            return Err(TailorError::store("store unavailable"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct BufferedWrite {
    value: Value,
    version: u64,
}

/// One connection to a [`MemoryStore`]
pub struct MemoryConnection {
    id: u64,
    store: MemoryStore,
    writes: BTreeMap<RowId, BufferedWrite>,
}

impl std::fmt::Debug for MemoryConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryConnection")
            .field("id", &self.id)
            .field("buffered", &self.writes.len())
            .finish()
    }
}

impl MemoryConnection {
    /// Connection id, as used by [`MemoryStore::isolation_of`]
    pub fn id(&self) -> u64 {
        self.id
    }

    fn row_id(&self, statement: &StatementTemplate, args: &[Value]) -> TailorResult<RowId> {
        let columns = statement.resolve_where(args)?;
        let key = self.store.keys.derive(statement.relation(), &columns)?;
        Ok((statement.relation().to_string(), key))
    }
}

fn written_value(statement: &StatementTemplate, args: &[Value]) -> Value {
    args.iter()
        .enumerate()
        .find(|(i, _)| !statement.bindings().iter().any(|b| b.placeholder == *i))
        .map(|(_, v)| v.clone())
        .unwrap_or(Value::Null)
}

impl StoreConnection for MemoryConnection {
    fn execute(&mut self, statement: &StatementTemplate, args: &[Value]) -> TailorResult<ExecutionOutcome> {
        let row_id = self.row_id(statement, args)?;
        let inner = self.store.inner.lock();
        MemoryStore::check_available(&inner)?;
        let committed = inner.rows.get(&row_id).cloned();
        drop(inner);

        match statement.kind() {
            OperationKind::Read | OperationKind::Scan => {
                let (value, version) = match (self.writes.get(&row_id), committed) {
                    (Some(w), _) => (w.value.clone(), Some(w.version)),
                    (None, Some(row)) => (row.value, Some(row.version)),
                    (None, None) => return Ok(ExecutionOutcome::default()),
                };
                Ok(ExecutionOutcome {
                    rows: vec![vec![value]],
                    version,
                })
            }
            OperationKind::Write => {
                let value = written_value(statement, args);
                let base = committed.map_or(0, |r| r.version);
                let write = self
                    .writes
                    .entry(row_id)
                    .or_insert(BufferedWrite {
                        value: Value::Null,
                        version: base + 1,
                    });
                write.value = value;
                Ok(ExecutionOutcome::with_version(write.version))
            }
        }
    }

    fn commit(&mut self) -> TailorResult<()> {
        let mut inner = self.store.inner.lock();
        MemoryStore::check_available(&inner)?;
        for (row_id, write) in std::mem::take(&mut self.writes) {
            let row = inner.rows.entry(row_id).or_insert(StoredRow {
                value: Value::Null,
                version: 0,
            });
            row.value = write.value;
            row.version += 1;
        }
        inner.commits += 1;
        Ok(())
    }

    fn rollback(&mut self) -> TailorResult<()> {
        self.writes.clear();
        Ok(())
    }

    fn set_isolation(&mut self, level: IsolationLevel) -> TailorResult<()> {
        let mut inner = self.store.inner.lock();
        MemoryStore::check_available(&inner)?;
        inner.isolation.insert(self.id, level);
        Ok(())
    }

    fn fetch_version(&mut self, relation: &str, key: u64) -> TailorResult<Option<u64>> {
        let inner = self.store.inner.lock();
        MemoryStore::check_available(&inner)?;
        Ok(inner.rows.get(&(relation.to_string(), key)).map(|r| r.version))
    }
}
