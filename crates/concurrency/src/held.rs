//! Locks held by one committing transaction
//!
//! `HeldLocks` releases whatever it still holds when dropped, without
//! advancing versions, so every early return on the commit path leaves
//! the lock table clean.

use smallvec::SmallVec;
use tailor_core::{TailorResult, ValidationProtocol};
use tracing::warn;

use crate::obligation::LockRequest;
use crate::table::{AcquireOutcome, LockTable};
use crate::validation::{ConflictType, ValidationResult};

/// RAII guard over the locks acquired for one commit
pub struct HeldLocks<'a> {
    table: &'a LockTable,
    requester: u64,
    held: SmallVec<[LockRequest; 8]>,
}

impl std::fmt::Debug for HeldLocks<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeldLocks")
            .field("requester", &self.requester)
            .field("held", &self.held)
            .finish()
    }
}

impl<'a> HeldLocks<'a> {
    /// Acquire every lock in `plan` in order
    ///
    /// Stops at the first refusal; the returned result then carries the
    /// conflict and the guard holds nothing.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if a request names an unknown relation. Locks
    /// already taken are released.
    pub fn acquire(
        table: &'a LockTable,
        plan: &[LockRequest],
        requester: u64,
        protocol: ValidationProtocol,
    ) -> TailorResult<(Self, ValidationResult)> {
        let mut guard = HeldLocks {
            table,
            requester,
            held: SmallVec::new(),
        };

        for request in plan {
            let relation = table.relation(&request.relation)?;
            let conflict = match relation.acquire(request.key, requester, request.kind, protocol) {
                AcquireOutcome::Granted => {
                    guard.held.push(request.clone());
                    continue;
                }
                AcquireOutcome::Aborted => ConflictType::LockAborted {
                    relation: request.relation.clone(),
                    key: request.key,
                    kind: request.kind,
                },
                AcquireOutcome::TimedOut => ConflictType::LockTimedOut {
                    relation: request.relation.clone(),
                    key: request.key,
                    kind: request.kind,
                },
            };
            guard.release_all(false)?;
            return Ok((guard, ValidationResult::conflict(conflict)));
        }

        Ok((guard, ValidationResult::ok()))
    }

    /// Number of locks currently held
    pub fn len(&self) -> usize {
        self.held.len()
    }

    /// True if nothing is held
    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    /// Release after a successful store commit, advancing exclusive versions
    pub fn release_committed(mut self) -> TailorResult<()> {
        self.release_all(true)
    }

    /// Release after an abort; versions are left unchanged
    pub fn release_aborted(mut self) -> TailorResult<()> {
        self.release_all(false)
    }

    fn release_all(&mut self, advance: bool) -> TailorResult<()> {
        let mut first_error = None;
        for request in self.held.drain(..) {
            let released = self.table.relation(&request.relation).and_then(|relation| {
                if advance {
                    relation.release_and_advance(request.key, request.kind).map(|_| ())
                } else {
                    relation.release(request.key, request.kind)
                }
            });
            if let Err(e) = released {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for HeldLocks<'_> {
    fn drop(&mut self) {
        if self.held.is_empty() {
            return;
        }
        if let Err(e) = self.release_all(false) {
            warn!(target: "tailor::lock", requester = self.requester, error = %e, "Release on drop failed");
        }
    }
}
