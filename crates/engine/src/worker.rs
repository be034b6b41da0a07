//! Online transaction coordinator
//!
//! One `Worker` per client connection. Per transaction:
//!
//! ```text
//! IDLE → ACTIVE → {COMMITTED, ROLLED_BACK} → IDLE
//! ```
//!
//! `execute` runs statements against the store and records a validation
//! obligation for every statement flagged under RC or SI (or every
//! statement of a sampled transaction). `commit` locks the obligations of
//! the required protocol, re-validates observed versions and only then
//! commits the store transaction. The switch boundary is passed after the
//! store transaction has ended, so a worker never waits on a switch while
//! holding store resources.
//!
//! Observed versions are never written to the version cache; a cold key is
//! fetched from the store at validation time.
//!
//! Obligations are cleared at the end of every commit or rollback.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tailor_concurrency::{validate_versions, HeldLocks, ObligationSet, ValidationObligation, ValidationResult};
use tailor_core::{
    ExecutionOutcome, IsolationProtocol, StatementRef, StoreConnection, TailorError, TailorResult,
    TemplateId, TransactionTemplate, ValidationProtocol, Value, WorkerId,
};
use tracing::{debug, warn};

use crate::engine::EngineShared;

/// Worker lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// No open transaction
    Idle,
    /// A transaction is open
    Active,
    /// Worker closed; every call fails
    Closed,
}

/// How far a commit got
enum CommitEnd {
    /// The store committed; carries any error from releasing locks or
    /// refreshing cached versions afterwards
    Committed(TailorResult<()>),
    /// Refused or failed before the store committed
    Aborted(TailorError),
}

/// Post-commit version of one written row
#[derive(Debug, Clone)]
struct WrittenRow {
    relation: String,
    key: u64,
    version: u64,
}

/// Per-connection transaction coordinator
pub struct Worker {
    id: WorkerId,
    shared: Arc<EngineShared>,
    templates: Vec<TransactionTemplate>,
    by_name: HashMap<String, TemplateId>,
    store: Box<dyn StoreConnection>,
    protocol: IsolationProtocol,
    state: WorkerState,
    bound: Option<TemplateId>,
    txn_id: u64,
    sampled: bool,
    obligations: ObligationSet,
    written: Vec<WrittenRow>,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("protocol", &self.protocol)
            .field("state", &self.state)
            .field("txn_id", &self.txn_id)
            .finish()
    }
}

impl Worker {
    pub(crate) fn open(
        shared: Arc<EngineShared>,
        id: WorkerId,
        mut store: Box<dyn StoreConnection>,
    ) -> TailorResult<Self> {
        let protocol = shared.switch.register(id)?;
        if let Err(e) = store.set_isolation(protocol.isolation_level()) {
            shared.switch.deregister(id);
            return Err(e);
        }
        debug!(target: "tailor::txn", worker = %id, protocol = %protocol, "Worker opened");

        Ok(Worker {
            id,
            templates: shared.workload.clone_templates(),
            by_name: shared.workload.name_index(),
            shared,
            store,
            protocol,
            state: WorkerState::Idle,
            bound: None,
            txn_id: 0,
            sampled: false,
            obligations: ObligationSet::new(),
            written: Vec::new(),
        })
    }

    /// Worker id
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Protocol tag the worker's connection runs under
    pub fn protocol(&self) -> IsolationProtocol {
        self.protocol
    }

    /// Lifecycle state
    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Id of the open (or last) transaction, 0 before the first one
    pub fn txn_id(&self) -> u64 {
        self.txn_id
    }

    /// True if the open transaction validates every statement
    pub fn is_sampled(&self) -> bool {
        self.sampled
    }

    /// Obligations recorded by the open transaction (RC and SI lists combined)
    pub fn obligation_count(&self) -> usize {
        self.obligations.len()
    }

    /// Run statement `index` of template `template` with `args`
    ///
    /// The first statement opens a transaction bound to its template.
    ///
    /// # Errors
    ///
    /// - `InvalidState` if the worker is closed or the statement belongs
    ///   to another template than the open transaction
    /// - `InvalidInput` for an unknown template, statement index or a
    ///   missing WHERE argument
    /// - `Store` if the store fails; the transaction is rolled back
    pub fn execute(&mut self, template: &str, index: usize, args: &[Value]) -> TailorResult<ExecutionOutcome> {
        self.ensure_open()?;
        let template_id = *self
            .by_name
            .get(template)
            .ok_or_else(|| TailorError::invalid_input(format!("unknown transaction '{}'", template)))?;
        let statement = self.templates[template_id.0 as usize]
            .statement(index)
            .ok_or_else(|| {
                TailorError::invalid_input(format!("transaction '{}' has no statement {}", template, index))
            })?
            .clone();

        match self.bound {
            Some(bound) if bound != template_id => {
                return Err(TailorError::invalid_state(format!(
                    "open transaction is bound to '{}', not '{}'",
                    self.templates[bound.0 as usize].name(),
                    template
                )));
            }
            _ => {}
        }

        // Derive the key before opening a transaction so bad arguments leave
        // the worker untouched.
        let columns = if statement.bindings().is_empty() {
            None
        } else {
            Some(statement.resolve_where(args)?)
        };
        let known_key = match &columns {
            Some(columns) if statement.needs_validation() || statement.kind().is_write() => {
                Some(self.shared.keys.derive(statement.relation(), columns)?)
            }
            None if statement.needs_validation() => {
                Some(self.shared.keys.derive(statement.relation(), &BTreeMap::new())?)
            }
            _ => None,
        };

        if self.state == WorkerState::Idle {
            self.begin(template_id);
        }
        let under_rc = statement.needs_validation_under_rc() || self.sampled;
        let under_si = statement.needs_validation_under_si() || self.sampled;
        let key = match (known_key, &columns) {
            (Some(key), _) => Some(key),
            (None, Some(columns)) if self.sampled => Some(self.shared.keys.derive(statement.relation(), columns)?),
            _ => None,
        };

        let outcome = match self.store.execute(&statement, args) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(target: "tailor::txn", worker = %self.id, txn = self.txn_id, error = %e, "Statement failed; rolling back");
                self.abort_store();
                self.finish(false);
                return Err(e);
            }
        };

        if let Some(key) = key {
            let observed = if statement.kind().is_write() {
                outcome.version.map(|v| v.saturating_sub(1))
            } else {
                outcome.version
            };
            if let (true, Some(version)) = (statement.kind().is_write(), outcome.version) {
                self.written.push(WrittenRow {
                    relation: statement.relation().to_string(),
                    key,
                    version,
                });
            }
            if under_rc || under_si {
                self.obligations.record(
                    ValidationObligation {
                        statement: StatementRef::new(template_id, index),
                        relation: statement.relation().to_string(),
                        key,
                        kind: statement.kind(),
                        observed_version: observed,
                    },
                    under_rc,
                    under_si,
                );
            }
        }

        Ok(outcome)
    }

    /// Commit the open transaction
    ///
    /// Validates under the protocol the switch coordinator currently
    /// requires (the transition-safe one while a switch is in progress).
    /// Under a validation protocol, every obligation is locked and its
    /// observed version re-checked before the store commits. Once the store
    /// transaction has ended the switch boundary is passed, which may block
    /// while a protocol switch waits for other workers. With no open
    /// transaction only the boundary is passed.
    ///
    /// # Errors
    ///
    /// - `ValidationConflict` if a lock is refused or a version changed;
    ///   the store transaction is rolled back
    /// - `Store` if the store fails before committing; the transaction is
    ///   rolled back
    /// - `Internal` if releasing locks fails after the store committed; the
    ///   transaction still counts as committed
    /// - `InvalidState` if the worker is closed
    pub fn commit(&mut self) -> TailorResult<()> {
        self.ensure_open()?;

        let result = if self.state == WorkerState::Active {
            let required = self.shared.switch.required_protocol();
            match self.commit_active(required) {
                CommitEnd::Committed(after) => {
                    match &after {
                        Ok(()) => debug!(target: "tailor::txn", worker = %self.id, txn = self.txn_id, protocol = %required, "Transaction committed"),
                        Err(e) => warn!(target: "tailor::txn", worker = %self.id, txn = self.txn_id, protocol = %required, error = %e, "Transaction committed; post-commit cleanup failed"),
                    }
                    self.finish(true);
                    after
                }
                CommitEnd::Aborted(e) => {
                    warn!(target: "tailor::txn", worker = %self.id, txn = self.txn_id, protocol = %required, error = %e, "Transaction aborted");
                    self.abort_store();
                    self.finish(false);
                    Err(e)
                }
            }
        } else {
            Ok(())
        };

        result.and(self.pass_boundary())
    }

    /// Roll back the open transaction
    ///
    /// Ends the store transaction, then passes the switch boundary like
    /// `commit`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the worker is closed, or the store's
    /// rollback error.
    pub fn rollback(&mut self) -> TailorResult<()> {
        self.ensure_open()?;

        let result = if self.state == WorkerState::Active {
            let result = self.store.rollback();
            debug!(target: "tailor::txn", worker = %self.id, txn = self.txn_id, "Transaction rolled back");
            self.finish(false);
            result
        } else {
            Ok(())
        };

        result.and(self.pass_boundary())
    }

    /// Roll back any open transaction and leave the switch coordinator
    pub fn close(mut self) -> TailorResult<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> TailorResult<()> {
        if self.state == WorkerState::Closed {
            return Ok(());
        }
        let result = if self.state == WorkerState::Active {
            let result = self.store.rollback();
            self.finish(false);
            result
        } else {
            Ok(())
        };
        self.state = WorkerState::Closed;
        self.shared.switch.deregister(self.id);
        debug!(target: "tailor::txn", worker = %self.id, "Worker closed");
        result
    }

    fn ensure_open(&self) -> TailorResult<()> {
        if self.state == WorkerState::Closed {
            return Err(TailorError::invalid_state(format!("{} is closed", self.id)));
        }
        Ok(())
    }

    fn sample_every(&self) -> u64 {
        self.shared.config.sample_every
    }

    fn begin(&mut self, template: TemplateId) {
        self.txn_id = self.shared.next_txn_id();
        let every = self.sample_every();
        self.sampled = every > 0 && self.txn_id % every == 0;
        self.bound = Some(template);
        self.state = WorkerState::Active;
        self.shared.counters.record_start();
        debug!(
            target: "tailor::txn",
            worker = %self.id,
            txn = self.txn_id,
            template = %self.templates[template.0 as usize].name(),
            sampled = self.sampled,
            "Transaction started"
        );
    }

    fn commit_active(&mut self, required: IsolationProtocol) -> CommitEnd {
        let shared = Arc::clone(&self.shared);

        let Some(protocol) = required.validation() else {
            if let Err(e) = self.store.commit() {
                return CommitEnd::Aborted(e);
            }
            return CommitEnd::Committed(self.refresh_written(&shared));
        };

        let held = match self.lock_and_validate(&shared, protocol) {
            Ok(held) => held,
            Err(e) => return CommitEnd::Aborted(e),
        };
        // a failed store commit drops `held`, releasing without advancing
        if let Err(e) = self.store.commit() {
            return CommitEnd::Aborted(e);
        }
        let released = held.release_committed();
        CommitEnd::Committed(released.and(self.refresh_written(&shared)))
    }

    /// Lock the obligations of `protocol` and re-check observed versions
    fn lock_and_validate<'a>(
        &mut self,
        shared: &'a EngineShared,
        protocol: ValidationProtocol,
    ) -> TailorResult<HeldLocks<'a>> {
        let plan = self.obligations.lock_plan(protocol);
        let (held, locked) = HeldLocks::acquire(&shared.locks, &plan, self.txn_id, protocol)?;
        if !locked.is_valid() {
            return Err(self.reject(locked));
        }

        let store = &mut self.store;
        let checked = validate_versions(&shared.locks, self.obligations.for_protocol(protocol), |relation, key| {
            store.fetch_version(relation, key)
        })?;
        if !checked.is_valid() {
            held.release_aborted()?;
            return Err(self.reject(checked));
        }
        Ok(held)
    }

    fn reject(&self, result: ValidationResult) -> TailorError {
        self.shared
            .counters
            .record_conflict(result.lock_conflicts(), result.version_mismatches());
        match result.into_result() {
            Err(e) => e,
            Ok(()) => TailorError::internal("rejected a transaction with no conflicts"),
        }
    }

    /// Raise cached versions to what this transaction committed
    fn refresh_written(&self, shared: &EngineShared) -> TailorResult<()> {
        for row in &self.written {
            shared.locks.relation(&row.relation)?.update_version(row.key, row.version);
        }
        Ok(())
    }

    fn abort_store(&mut self) {
        if let Err(e) = self.store.rollback() {
            warn!(target: "tailor::txn", worker = %self.id, error = %e, "Store rollback failed");
        }
    }

    fn finish(&mut self, committed: bool) {
        if committed {
            self.shared.counters.record_commit();
        } else {
            self.shared.counters.record_abort();
        }
        self.obligations.clear();
        self.written.clear();
        self.bound = None;
        self.sampled = false;
        self.state = WorkerState::Idle;
    }

    /// Mark ready (waiting out the ready barrier), then mark finished
    fn pass_boundary(&mut self) -> TailorResult<()> {
        self.shared.switch.enter_boundary(self.id)?;
        let Some(next) = self.shared.switch.leave_boundary(self.id)? else {
            return Ok(());
        };
        self.store.set_isolation(next.isolation_level())?;
        debug!(target: "tailor::txn", worker = %self.id, from = %self.protocol, to = %next, "Worker switched protocol");
        self.protocol = next;
        Ok(())
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(target: "tailor::txn", worker = %self.id, error = %e, "Rollback on drop failed");
        }
    }
}
