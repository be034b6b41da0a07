//! Commit-time validation
//!
//! Conflicts are accumulated into a [`ValidationResult`] rather than
//! surfaced one at a time, so the commit path can report every reason a
//! transaction failed. Rules:
//!
//! - A lock the state machine refuses is a conflict (`LockAborted`)
//! - A WAIT that outlives its retry budget is a conflict (`LockTimedOut`)
//! - An observed version that differs from the cached (or freshly fetched)
//!   committed version is a conflict (`VersionMismatch`)
//! - A row that did not exist when observed, or whose version is still
//!   unknown after a fetch, is not checked

use std::fmt;

use tailor_core::{LockKind, TailorError, TailorResult};

use crate::obligation::ValidationObligation;
use crate::table::LockTable;

/// Why a transaction failed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictType {
    /// The lock state machine returned ABORT
    LockAborted {
        /// Relation of the key
        relation: String,
        /// Contended key
        key: u64,
        /// Kind that was requested
        kind: LockKind,
    },

    /// WAIT retries were exhausted
    LockTimedOut {
        /// Relation of the key
        relation: String,
        /// Contended key
        key: u64,
        /// Kind that was requested
        kind: LockKind,
    },

    /// Row changed between execution and commit
    VersionMismatch {
        /// Relation of the key
        relation: String,
        /// Validated key
        key: u64,
        /// Version seen by the statement
        observed: u64,
        /// Committed version at validation time
        current: u64,
    },
}

impl ConflictType {
    /// True for lock-acquisition conflicts (abort or timeout)
    pub fn is_lock_conflict(&self) -> bool {
        matches!(self, ConflictType::LockAborted { .. } | ConflictType::LockTimedOut { .. })
    }
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictType::LockAborted { relation, key, kind } => {
                write!(f, "{:?} lock refused on {}/{}", kind, relation, key)
            }
            ConflictType::LockTimedOut { relation, key, kind } => {
                write!(f, "{:?} lock wait timed out on {}/{}", kind, relation, key)
            }
            ConflictType::VersionMismatch {
                relation,
                key,
                observed,
                current,
            } => write!(
                f,
                "version mismatch on {}/{}: observed {}, current {}",
                relation, key, observed, current
            ),
        }
    }
}

/// Result of transaction validation
///
/// A transaction commits only if `is_valid()` returns true.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    /// All conflicts detected during validation
    pub conflicts: Vec<ConflictType>,
}

impl ValidationResult {
    /// Create a successful validation result (no conflicts)
    pub fn ok() -> Self {
        ValidationResult {
            conflicts: Vec::new(),
        }
    }

    /// Create a validation result with a single conflict
    pub fn conflict(conflict: ConflictType) -> Self {
        ValidationResult {
            conflicts: vec![conflict],
        }
    }

    /// Check if validation passed (no conflicts)
    pub fn is_valid(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// Merge another validation result into this one
    pub fn merge(&mut self, other: ValidationResult) {
        self.conflicts.extend(other.conflicts);
    }

    /// Get the number of conflicts
    pub fn conflict_count(&self) -> usize {
        self.conflicts.len()
    }

    /// Number of lock-acquisition conflicts
    pub fn lock_conflicts(&self) -> usize {
        self.conflicts.iter().filter(|c| c.is_lock_conflict()).count()
    }

    /// Number of version mismatches
    pub fn version_mismatches(&self) -> usize {
        self.conflict_count() - self.lock_conflicts()
    }

    /// `Ok(())` when valid, otherwise a `ValidationConflict` listing every conflict
    pub fn into_result(self) -> TailorResult<()> {
        if self.is_valid() {
            return Ok(());
        }
        let reason = self
            .conflicts
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        Err(TailorError::conflict(reason))
    }
}

/// Re-validate observed versions against the version cache
///
/// A cold key is fetched through `fetch(relation, key)` and cached before
/// comparison.
///
/// # Errors
///
/// Returns `Internal` for an unknown relation, or whatever `fetch` returns.
pub fn validate_versions<F>(
    table: &LockTable,
    obligations: &[ValidationObligation],
    mut fetch: F,
) -> TailorResult<ValidationResult>
where
    F: FnMut(&str, u64) -> TailorResult<Option<u64>>,
{
    let mut result = ValidationResult::ok();
    for obligation in obligations {
        let Some(observed) = obligation.observed_version else {
            continue;
        };
        let relation = table.relation(&obligation.relation)?;
        let current = relation
            .fetch_and_cache_version(obligation.key, || fetch(&obligation.relation, obligation.key))?;
        if let Some(current) = current {
            if current != observed {
                result.merge(ValidationResult::conflict(ConflictType::VersionMismatch {
                    relation: obligation.relation.clone(),
                    key: obligation.key,
                    observed,
                    current,
                }));
            }
        }
    }
    Ok(result)
}
