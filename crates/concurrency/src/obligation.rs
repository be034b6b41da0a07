//! Validation obligations
//!
//! Each executed statement whose template is flagged for the active
//! protocol (or every statement of a sampled transaction) leaves an
//! obligation: the (relation, key) it touched and the row version it
//! observed. At commit the obligations become a lock plan and are then
//! re-validated against the version cache.

use std::collections::BTreeMap;

use smallvec::SmallVec;
use tailor_core::{LockKind, OperationKind, StatementRef, ValidationProtocol};

/// One statement's commit-time validation duty
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationObligation {
    /// Statement that produced the obligation
    pub statement: StatementRef,
    /// Relation touched
    pub relation: String,
    /// Validation key derived from the WHERE arguments
    pub key: u64,
    /// Operation kind of the statement
    pub kind: OperationKind,
    /// Row version seen by the statement (`None` if the row did not exist)
    pub observed_version: Option<u64>,
}

impl ValidationObligation {
    /// Lock kind required at commit
    pub fn lock_kind(&self) -> LockKind {
        self.kind.lock_kind()
    }
}

/// One deduplicated lock to take at commit
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct LockRequest {
    /// Relation of the key
    pub relation: String,
    /// Validation key
    pub key: u64,
    /// Strongest kind requested for the key
    pub kind: LockKind,
}

type Obligations = SmallVec<[ValidationObligation; 8]>;

/// Obligations accumulated by one transaction, kept per protocol
#[derive(Debug, Clone, Default)]
pub struct ObligationSet {
    rc: Obligations,
    si: Obligations,
}

impl ObligationSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `obligation` for RC, SI or both
    ///
    /// The SI list receives its own copy when both apply. A read of a key
    /// the transaction already wrote is covered by the write and is not
    /// recorded again.
    pub fn record(&mut self, obligation: ValidationObligation, under_rc: bool, under_si: bool) {
        let rc = under_rc && !covered_by_write(&self.rc, &obligation);
        let si = under_si && !covered_by_write(&self.si, &obligation);
        match (rc, si) {
            (true, true) => {
                self.si.push(obligation.clone());
                self.rc.push(obligation);
            }
            (true, false) => self.rc.push(obligation),
            (false, true) => self.si.push(obligation),
            (false, false) => {}
        }
    }

    /// Obligations validated under `protocol`
    pub fn for_protocol(&self, protocol: ValidationProtocol) -> &[ValidationObligation] {
        match protocol {
            ValidationProtocol::RcTailor => &self.rc,
            ValidationProtocol::SiTailor => &self.si,
        }
    }

    /// Locks to take under `protocol`: one per (relation, key) with the
    /// strongest kind, in (relation, key) order
    pub fn lock_plan(&self, protocol: ValidationProtocol) -> Vec<LockRequest> {
        let mut plan: BTreeMap<(&str, u64), LockKind> = BTreeMap::new();
        for obligation in self.for_protocol(protocol) {
            plan.entry((obligation.relation.as_str(), obligation.key))
                .and_modify(|kind| *kind = LockKind::max(*kind, obligation.lock_kind()))
                .or_insert(obligation.lock_kind());
        }
        plan.into_iter()
            .map(|((relation, key), kind)| LockRequest {
                relation: relation.to_string(),
                key,
                kind,
            })
            .collect()
    }

    /// Total obligations across both protocols
    pub fn len(&self) -> usize {
        self.rc.len() + self.si.len()
    }

    /// True if nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.rc.is_empty() && self.si.is_empty()
    }

    /// Drop every obligation
    pub fn clear(&mut self) {
        self.rc.clear();
        self.si.clear();
    }
}

fn covered_by_write(list: &[ValidationObligation], obligation: &ValidationObligation) -> bool {
    obligation.kind.is_read()
        && list.iter().any(|o| {
            o.kind.is_write() && o.key == obligation.key && o.relation == obligation.relation
        })
}
