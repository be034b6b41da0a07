//! Per-key validation lock state
//!
//! A `ValidationLock` is the lock and version state of one (relation, key).
//! Entries are created lazily on first access and never destroyed while
//! in use; when the holder count drops to zero the holder kind resets to
//! `None`.
//!
//! ## Transition table
//!
//! | current | requested | SI_TAILOR | RC_TAILOR |
//! |---|---|---|---|
//! | None | any | grant | grant |
//! | Shared | Shared | grant, unless an older writer is pending → abort | same |
//! | Shared | Exclusive | abort if a younger reader holds, else record pending writer and wait | same, relaxed watermark merge |
//! | Exclusive | Shared | abort | record pending reader, abort |
//! | Exclusive | Exclusive | abort | grant |
//!
//! Transaction ids order requests: a smaller id is an older transaction.
//!
//! ## Invariants
//!
//! - `holder == None` iff `count == 0`
//! - `version` never decreases

use std::fmt;

use tailor_core::{LockKind, TailorError, TailorResult, ValidationProtocol};

/// Kind of the current holders of a validation lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HolderKind {
    /// Nobody holds the lock
    #[default]
    None,
    /// Held by one or more readers
    Shared,
    /// Held by one writer (or several blind writers under RC)
    Exclusive,
}

impl From<LockKind> for HolderKind {
    fn from(kind: LockKind) -> Self {
        match kind {
            LockKind::Shared => HolderKind::Shared,
            LockKind::Exclusive => HolderKind::Exclusive,
        }
    }
}

/// Result of a single lock attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    /// Lock granted to the requester
    Granted,
    /// Requester may retry once current holders drain
    Wait,
    /// Requester must abort its transaction
    Abort,
}

impl fmt::Display for LockOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockOutcome::Granted => f.write_str("GRANTED"),
            LockOutcome::Wait => f.write_str("WAIT"),
            LockOutcome::Abort => f.write_str("ABORT"),
        }
    }
}

/// Lock and cached-version state of one (relation, key)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationLock {
    holder: HolderKind,
    count: u32,
    /// Highest transaction id currently holding the lock (0 when free)
    max_holder: u64,
    /// Oldest pending writer
    min_write_wait: Option<u64>,
    /// Youngest pending writer
    max_write_wait: Option<u64>,
    /// Oldest reader turned away by a writer (diagnostic)
    min_read_wait: Option<u64>,
    /// Latest committed row version, if known
    version: Option<u64>,
    /// Ever returned WAIT or ABORT
    contended: bool,
}

impl ValidationLock {
    /// Current holder kind
    pub fn holder(&self) -> HolderKind {
        self.holder
    }

    /// Number of current holders
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Highest transaction id holding the lock
    pub fn max_holder(&self) -> u64 {
        self.max_holder
    }

    /// Oldest pending writer, if any
    pub fn min_write_wait(&self) -> Option<u64> {
        self.min_write_wait
    }

    /// Youngest pending writer, if any
    pub fn max_write_wait(&self) -> Option<u64> {
        self.max_write_wait
    }

    /// Oldest reader turned away by a writer, if any
    pub fn min_read_wait(&self) -> Option<u64> {
        self.min_read_wait
    }

    /// Cached committed version
    pub fn version(&self) -> Option<u64> {
        self.version
    }

    /// Whether this entry ever turned a requester away
    pub fn is_contended(&self) -> bool {
        self.contended
    }

    /// Attempt to take the lock for `requester`
    pub fn try_lock(&mut self, requester: u64, kind: LockKind, protocol: ValidationProtocol) -> LockOutcome {
        let outcome = match (self.holder, kind) {
            (HolderKind::None, _) => {
                self.holder = kind.into();
                self.count = 1;
                self.max_holder = requester;
                if kind == LockKind::Exclusive {
                    self.withdraw(requester);
                }
                LockOutcome::Granted
            }
            (HolderKind::Shared, LockKind::Shared) => {
                if self.min_write_wait.is_some_and(|w| w < requester) {
                    LockOutcome::Abort
                } else {
                    self.grant(requester);
                    LockOutcome::Granted
                }
            }
            (HolderKind::Shared, LockKind::Exclusive) => {
                if self.max_holder > requester {
                    LockOutcome::Abort
                } else {
                    self.record_pending_writer(requester, protocol);
                    LockOutcome::Wait
                }
            }
            (HolderKind::Exclusive, LockKind::Shared) => {
                if protocol == ValidationProtocol::RcTailor {
                    self.min_read_wait = Some(self.min_read_wait.map_or(requester, |r| r.min(requester)));
                }
                LockOutcome::Abort
            }
            (HolderKind::Exclusive, LockKind::Exclusive) => match protocol {
                ValidationProtocol::SiTailor => LockOutcome::Abort,
                ValidationProtocol::RcTailor => {
                    self.grant(requester);
                    LockOutcome::Granted
                }
            },
        };

        if outcome != LockOutcome::Granted {
            self.contended = true;
        }
        outcome
    }

    /// Release one hold of `kind`
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the lock is not held with `kind`.
    pub fn release(&mut self, kind: LockKind) -> TailorResult<()> {
        if self.count == 0 || self.holder != HolderKind::from(kind) {
            return Err(TailorError::internal(format!(
                "release of {:?} lock held as {:?} with count {}",
                kind, self.holder, self.count
            )));
        }
        self.count -= 1;
        if self.count == 0 {
            self.holder = HolderKind::None;
            self.max_holder = 0;
        }
        Ok(())
    }

    /// Drop `requester` from the pending-writer watermarks
    ///
    /// Other pending writers re-record themselves on their next attempt.
    pub fn withdraw(&mut self, requester: u64) {
        if self.min_write_wait == Some(requester) {
            self.min_write_wait = None;
        }
        if self.max_write_wait == Some(requester) {
            self.max_write_wait = self.min_write_wait;
        }
        if self.min_write_wait.is_none() {
            self.max_write_wait = None;
        }
    }

    /// Set the cached version, never moving it backwards
    pub fn update_version(&mut self, version: u64) {
        self.version = Some(self.version.map_or(version, |v| v.max(version)));
    }

    /// Cache `version` only if nothing is cached yet
    pub fn observe_version(&mut self, version: u64) {
        if self.version.is_none() {
            self.version = Some(version);
        }
    }

    /// Advance a known cached version by one
    pub fn advance_version(&mut self) -> Option<u64> {
        if let Some(v) = self.version {
            self.version = Some(v + 1);
        }
        self.version
    }

    /// Free, never contended, no waiters and no cached version: safe to prune
    ///
    /// Entries with a cached version are kept, so the version can only move
    /// forward.
    pub fn is_stale(&self) -> bool {
        self.holder == HolderKind::None
            && !self.contended
            && self.min_write_wait.is_none()
            && self.max_write_wait.is_none()
            && self.version.is_none()
    }

    fn grant(&mut self, requester: u64) {
        self.count += 1;
        self.max_holder = self.max_holder.max(requester);
    }

    fn record_pending_writer(&mut self, requester: u64, protocol: ValidationProtocol) {
        match protocol {
            ValidationProtocol::SiTailor => {
                self.min_write_wait = Some(self.min_write_wait.map_or(requester, |w| w.min(requester)));
            }
            // RC keeps the first recorded minimum
            ValidationProtocol::RcTailor => {
                if self.min_write_wait.is_none() {
                    self.min_write_wait = Some(requester);
                }
            }
        }
        self.max_write_wait = Some(self.max_write_wait.map_or(requester, |w| w.max(requester)));
    }
}
