//! Sharded validation lock table
//!
//! One [`RelationLockTable`] per relation, each split into `bucket_count`
//! buckets addressed by `key % bucket_count`. A bucket owns:
//!
//! - an `RwLock` over its key map. The shared guard is enough to drive an
//!   existing entry's state machine (each entry has its own mutex); the
//!   exclusive guard is only taken to insert a fresh key.
//! - a release generation counter plus `Condvar`, used by waiting writers
//!   instead of sleeping in a loop.
//!
//! The hotspot version cache lives in the same entries, so it shares the
//! bucket latch with the lock state.

use std::collections::BTreeSet;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock};
use rustc_hash::FxHashMap;
use tailor_core::{LockKind, TailorError, TailorResult, ValidationProtocol, DEFAULT_BUCKET_COUNT};
use tracing::{debug, trace};

use crate::lock::{LockOutcome, ValidationLock};

/// Bounded wait applied to a WAIT outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockWaitConfig {
    /// Number of waits before giving up
    pub max_retries: u32,
    /// Longest single wait for a release signal
    pub retry_interval: Duration,
}

impl Default for LockWaitConfig {
    fn default() -> Self {
        LockWaitConfig {
            max_retries: 64,
            retry_interval: Duration::from_millis(1),
        }
    }
}

impl LockWaitConfig {
    /// Never wait: a WAIT outcome times out immediately
    pub fn no_wait() -> Self {
        LockWaitConfig {
            max_retries: 0,
            retry_interval: Duration::ZERO,
        }
    }
}

/// Lock table sizing and wait policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockTableConfig {
    /// Buckets per relation
    pub bucket_count: usize,
    /// Bucket size above which stale entries are pruned on insert
    pub prune_threshold: usize,
    /// WAIT retry policy
    pub wait: LockWaitConfig,
}

impl Default for LockTableConfig {
    fn default() -> Self {
        LockTableConfig {
            bucket_count: DEFAULT_BUCKET_COUNT,
            prune_threshold: 256,
            wait: LockWaitConfig::default(),
        }
    }
}

/// Final result of a possibly-waiting acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// Lock held by the requester
    Granted,
    /// State machine refused the request
    Aborted,
    /// WAIT retries exhausted
    TimedOut,
}

impl AcquireOutcome {
    /// True if the lock is now held
    pub fn is_granted(self) -> bool {
        self == AcquireOutcome::Granted
    }
}

struct Bucket {
    entries: RwLock<FxHashMap<u64, Mutex<ValidationLock>>>,
    generation: Mutex<u64>,
    released: Condvar,
}

impl Bucket {
    fn new() -> Self {
        Bucket {
            entries: RwLock::new(FxHashMap::default()),
            generation: Mutex::new(0),
            released: Condvar::new(),
        }
    }

    /// Run `f` on the entry for `key`, creating it if absent
    fn with_entry<R>(&self, key: u64, prune_threshold: usize, f: impl FnOnce(&mut ValidationLock) -> R) -> R {
        {
            let entries = self.entries.read();
            if let Some(entry) = entries.get(&key) {
                return f(&mut entry.lock());
            }
        }

        let mut entries = match self.entries.try_write() {
            Some(mut entries) => {
                if entries.len() > prune_threshold {
                    let before = entries.len();
                    entries.retain(|_, lock| !lock.get_mut().is_stale());
                    trace!(target: "tailor::lock", pruned = before - entries.len(), "Pruned stale entries");
                }
                entries
            }
            None => self.entries.write(),
        };
        let entry = entries.entry(key).or_default();
        f(entry.get_mut())
    }

    /// Run `f` on an existing entry
    fn with_existing<R>(&self, key: u64, f: impl FnOnce(&mut ValidationLock) -> R) -> Option<R> {
        let entries = self.entries.read();
        entries.get(&key).map(|entry| f(&mut entry.lock()))
    }

    fn generation(&self) -> u64 {
        *self.generation.lock()
    }

    fn signal_release(&self) {
        let mut generation = self.generation.lock();
        *generation = generation.wrapping_add(1);
        self.released.notify_all();
    }

    /// Wait for a release after `seen`, at most `timeout`
    fn wait_release(&self, seen: u64, timeout: Duration) {
        let mut generation = self.generation.lock();
        if *generation == seen && !timeout.is_zero() {
            let _ = self.released.wait_for(&mut generation, timeout);
        }
    }
}

/// Lock and version state for every key of one relation
pub struct RelationLockTable {
    relation: String,
    buckets: Vec<Bucket>,
    config: LockTableConfig,
}

impl std::fmt::Debug for RelationLockTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationLockTable")
            .field("relation", &self.relation)
            .field("buckets", &self.buckets.len())
            .finish()
    }
}

impl RelationLockTable {
    /// Create an empty table
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if `bucket_count` is zero.
    pub fn new(relation: impl Into<String>, config: LockTableConfig) -> TailorResult<Self> {
        if config.bucket_count == 0 {
            return Err(TailorError::invalid_input("bucket_count must be greater than zero"));
        }
        Ok(RelationLockTable {
            relation: relation.into(),
            buckets: (0..config.bucket_count).map(|_| Bucket::new()).collect(),
            config,
        })
    }

    /// Relation this table covers
    pub fn relation(&self) -> &str {
        &self.relation
    }

    fn bucket(&self, key: u64) -> &Bucket {
        &self.buckets[(key % self.buckets.len() as u64) as usize]
    }

    /// Single non-blocking lock attempt
    pub fn try_lock(&self, key: u64, requester: u64, kind: LockKind, protocol: ValidationProtocol) -> LockOutcome {
        self.bucket(key)
            .with_entry(key, self.config.prune_threshold, |lock| lock.try_lock(requester, kind, protocol))
    }

    /// Lock attempt that waits on release signals while the outcome is WAIT
    ///
    /// Gives up after `max_retries` waits, withdrawing the requester's
    /// pending-writer watermark.
    pub fn acquire(&self, key: u64, requester: u64, kind: LockKind, protocol: ValidationProtocol) -> AcquireOutcome {
        let bucket = self.bucket(key);
        let wait = self.config.wait;
        let mut attempt = 0;

        loop {
            let seen = bucket.generation();
            match self.try_lock(key, requester, kind, protocol) {
                LockOutcome::Granted => return AcquireOutcome::Granted,
                LockOutcome::Abort => {
                    self.withdraw(key, requester);
                    return AcquireOutcome::Aborted;
                }
                LockOutcome::Wait if attempt >= wait.max_retries => {
                    self.withdraw(key, requester);
                    debug!(
                        target: "tailor::lock",
                        relation = %self.relation,
                        key,
                        requester,
                        attempts = attempt,
                        "Lock wait exhausted"
                    );
                    return AcquireOutcome::TimedOut;
                }
                LockOutcome::Wait => {
                    attempt += 1;
                    bucket.wait_release(seen, wait.retry_interval);
                }
            }
        }
    }

    /// Release one hold of `kind` on `key`
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the key has no entry or is not held with `kind`.
    pub fn release(&self, key: u64, kind: LockKind) -> TailorResult<()> {
        self.release_inner(key, kind, false).map(|_| ())
    }

    /// Release one hold and, for EXCLUSIVE, advance a known cached version
    ///
    /// Returns the cached version after the release.
    pub fn release_and_advance(&self, key: u64, kind: LockKind) -> TailorResult<Option<u64>> {
        self.release_inner(key, kind, kind == LockKind::Exclusive)
    }

    fn release_inner(&self, key: u64, kind: LockKind, advance: bool) -> TailorResult<Option<u64>> {
        let bucket = self.bucket(key);
        let version = bucket
            .with_existing(key, |lock| {
                lock.release(kind)?;
                Ok(if advance { lock.advance_version() } else { lock.version() })
            })
            .unwrap_or_else(|| {
                Err(TailorError::internal(format!(
                    "release of unknown key {} in relation '{}'",
                    key, self.relation
                )))
            })?;
        bucket.signal_release();
        Ok(version)
    }

    /// Withdraw `requester` from the pending-writer watermarks of `key`
    pub fn withdraw(&self, key: u64, requester: u64) {
        self.bucket(key).with_existing(key, |lock| lock.withdraw(requester));
    }

    /// Cached committed version of `key`
    pub fn read_version(&self, key: u64) -> Option<u64> {
        self.bucket(key).with_existing(key, |lock| lock.version()).flatten()
    }

    /// Raise the cached version of `key` to `version`
    pub fn update_version(&self, key: u64, version: u64) {
        self.bucket(key)
            .with_entry(key, self.config.prune_threshold, |lock| lock.update_version(version));
    }

    /// Cache `version` for a key with nothing cached yet
    pub fn observe_version(&self, key: u64, version: u64) {
        self.bucket(key)
            .with_entry(key, self.config.prune_threshold, |lock| lock.observe_version(version));
    }

    /// Cached version of `key`, falling back to `fetch` on a miss
    ///
    /// A fetched version is cached before it is returned.
    pub fn fetch_and_cache_version<F>(&self, key: u64, fetch: F) -> TailorResult<Option<u64>>
    where
        F: FnOnce() -> TailorResult<Option<u64>>,
    {
        if let Some(version) = self.read_version(key) {
            return Ok(Some(version));
        }
        match fetch()? {
            Some(version) => {
                self.observe_version(key, version);
                Ok(self.read_version(key))
            }
            None => Ok(None),
        }
    }

    /// Copy of the entry for `key`, if one exists
    pub fn snapshot(&self, key: u64) -> Option<ValidationLock> {
        self.bucket(key).with_existing(key, |lock| lock.clone())
    }

    /// Number of live entries across all buckets
    pub fn entry_count(&self) -> usize {
        self.buckets.iter().map(|b| b.entries.read().len()).sum()
    }
}

/// Lock tables for every relation of a workload
#[derive(Debug)]
pub struct LockTable {
    relations: FxHashMap<String, RelationLockTable>,
    config: LockTableConfig,
}

impl LockTable {
    /// Create one table per relation
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if `bucket_count` is zero.
    pub fn new<I, S>(relations: I, config: LockTableConfig) -> TailorResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut tables = FxHashMap::default();
        for relation in relations {
            let relation = relation.into();
            let table = RelationLockTable::new(relation.clone(), config)?;
            tables.insert(relation, table);
        }
        debug!(
            target: "tailor::lock",
            relations = tables.len(),
            bucket_count = config.bucket_count,
            "Lock table created"
        );
        Ok(LockTable {
            relations: tables,
            config,
        })
    }

    /// Table for `relation`
    ///
    /// # Errors
    ///
    /// Returns `Internal` for a relation no template touches.
    pub fn relation(&self, relation: &str) -> TailorResult<&RelationLockTable> {
        self.relations
            .get(relation)
            .ok_or_else(|| TailorError::internal(format!("unknown relation '{}'", relation)))
    }

    /// Names of all covered relations
    pub fn relations(&self) -> BTreeSet<&str> {
        self.relations.keys().map(String::as_str).collect()
    }

    /// Sizing and wait policy in effect
    pub fn config(&self) -> &LockTableConfig {
        &self.config
    }
}
