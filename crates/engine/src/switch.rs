//! Protocol switch coordinator
//!
//! Moves every live worker from one isolation protocol to another without
//! stopping traffic:
//!
//! ```text
//! STABLE → AWAITING_WORKERS_READY → AWAITING_WORKERS_FINISHED → STABLE
//! ```
//!
//! Workers take part at their commit/rollback boundary, once their store
//! transaction has ended, so a blocked worker holds no store resources. In
//! `AWAITING_WORKERS_READY` a worker marks itself ready and blocks until
//! every registered worker is ready. In `AWAITING_WORKERS_FINISHED` a worker
//! switches its store isolation level and marks itself finished. While the
//! phase is not `STABLE`, commits validate under the transition-safe
//! protocol.
//!
//! All waits are `Condvar` waits sliced by `poll_interval`; the coordinator
//! never aborts a switch, but long waits are logged and counted as stalls.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use rustc_hash::FxHashMap;
use tailor_core::{IsolationProtocol, TailorError, TailorResult, WorkerId};
use tracing::{debug, info, warn};

/// Global switch phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchPhase {
    /// No switch in progress
    Stable,
    /// Waiting for every worker to reach its boundary
    AwaitingWorkersReady,
    /// Waiting for every worker to adopt the next protocol
    AwaitingWorkersFinished,
}

impl fmt::Display for SwitchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwitchPhase::Stable => f.write_str("STABLE"),
            SwitchPhase::AwaitingWorkersReady => f.write_str("AWAITING_WORKERS_READY"),
            SwitchPhase::AwaitingWorkersFinished => f.write_str("AWAITING_WORKERS_FINISHED"),
        }
    }
}

/// Outcome of one switch request
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchReport {
    /// Protocol before the request
    pub from: IsolationProtocol,
    /// Requested protocol
    pub to: IsolationProtocol,
    /// Protocol validated under while the switch was in progress
    pub transition_safe: IsolationProtocol,
    /// Time spent waiting for all workers to become ready
    pub ready_wait: Duration,
    /// Time spent waiting for all workers to finish
    pub finish_wait: Duration,
    /// Registered workers when the switch completed
    pub workers: usize,
    /// False when the engine was already running `to`
    pub switched: bool,
}

/// Cumulative switch statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwitchStats {
    /// Completed switches
    pub switches: u64,
    /// Requests for the protocol already in effect
    pub noop_requests: u64,
    /// Barrier waits that exceeded the stall threshold
    pub stall_warnings: u64,
    /// Total time all switches spent in barrier waits
    pub total_wait: Duration,
}

/// Snapshot of switch progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchProgress {
    /// Current phase
    pub phase: SwitchPhase,
    /// Registered workers
    pub workers: usize,
    /// Workers marked ready
    pub ready: usize,
    /// Workers marked finished
    pub finished: usize,
}

#[derive(Debug, Clone, Copy, Default)]
struct WorkerSlot {
    ready: bool,
    finished: bool,
}

#[derive(Debug)]
struct SwitchState {
    phase: SwitchPhase,
    current: IsolationProtocol,
    next: IsolationProtocol,
    workers: FxHashMap<WorkerId, WorkerSlot>,
}

impl SwitchState {
    fn required_protocol(&self) -> IsolationProtocol {
        match self.phase {
            SwitchPhase::Stable => self.current,
            _ => self.current.transition_safe(self.next),
        }
    }

    fn all_ready(&self) -> bool {
        self.workers.values().all(|w| w.ready)
    }

    fn all_finished(&self) -> bool {
        self.workers.values().all(|w| w.finished)
    }

    fn reset_flags(&mut self) {
        for slot in self.workers.values_mut() {
            *slot = WorkerSlot::default();
        }
    }
}

/// Coordinates protocol switches across all registered workers
///
/// # Memory Ordering
///
/// The statistics counters use Relaxed ordering; they are observational
/// only and synchronize nothing.
pub struct SwitchCoordinator {
    state: Mutex<SwitchState>,
    changed: Condvar,
    /// Serializes switch requests
    requests: Mutex<()>,
    poll_interval: Duration,
    stall_warn: Duration,
    switches: AtomicU64,
    noop_requests: AtomicU64,
    stall_warnings: AtomicU64,
    total_wait_us: AtomicU64,
}

impl fmt::Debug for SwitchCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwitchCoordinator")
            .field("progress", &self.progress())
            .field("current", &self.current_protocol())
            .finish()
    }
}

impl SwitchCoordinator {
    /// Create a coordinator running `initial`
    pub fn new(initial: IsolationProtocol, poll_interval: Duration, stall_warn: Duration) -> Self {
        SwitchCoordinator {
            state: Mutex::new(SwitchState {
                phase: SwitchPhase::Stable,
                current: initial,
                next: initial,
                workers: FxHashMap::default(),
            }),
            changed: Condvar::new(),
            requests: Mutex::new(()),
            poll_interval: poll_interval.max(Duration::from_micros(100)),
            stall_warn,
            switches: AtomicU64::new(0),
            noop_requests: AtomicU64::new(0),
            stall_warnings: AtomicU64::new(0),
            total_wait_us: AtomicU64::new(0),
        }
    }

    /// Add a worker to the barrier set
    ///
    /// Returns the protocol the worker must start with. A worker joining
    /// mid-switch starts ready and finished on the next protocol.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if `worker` is already registered.
    pub fn register(&self, worker: WorkerId) -> TailorResult<IsolationProtocol> {
        let mut state = self.state.lock();
        if state.workers.contains_key(&worker) {
            return Err(TailorError::invalid_state(format!("{} is already registered", worker)));
        }
        let (slot, protocol) = match state.phase {
            SwitchPhase::Stable => (WorkerSlot::default(), state.current),
            _ => (
                WorkerSlot {
                    ready: true,
                    finished: true,
                },
                state.next,
            ),
        };
        state.workers.insert(worker, slot);
        debug!(target: "tailor::switch", worker = %worker, protocol = %protocol, phase = %state.phase, "Worker registered");
        Ok(protocol)
    }

    /// Remove a worker from the barrier set
    ///
    /// Safe at any time; a switch waiting on this worker is woken.
    pub fn deregister(&self, worker: WorkerId) {
        let mut state = self.state.lock();
        if state.workers.remove(&worker).is_some() {
            debug!(target: "tailor::switch", worker = %worker, phase = %state.phase, "Worker deregistered");
            self.changed.notify_all();
        }
    }

    /// Worker reached its commit/rollback boundary
    ///
    /// During `AWAITING_WORKERS_READY` marks the worker ready and blocks
    /// until every worker is ready. Callers must not hold an open store
    /// transaction. Returns the protocol required after the barrier.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` for an unregistered worker.
    pub fn enter_boundary(&self, worker: WorkerId) -> TailorResult<IsolationProtocol> {
        let mut state = self.state.lock();
        let phase = state.phase;
        let slot = state
            .workers
            .get_mut(&worker)
            .ok_or_else(|| TailorError::invalid_state(format!("{} is not registered", worker)))?;

        if phase == SwitchPhase::AwaitingWorkersReady && !slot.ready {
            slot.ready = true;
            self.changed.notify_all();
            debug!(target: "tailor::switch", worker = %worker, "Worker ready");
            self.wait_while(&mut state, "ready barrier", |s| {
                s.phase == SwitchPhase::AwaitingWorkersReady
            });
        }
        Ok(state.required_protocol())
    }

    /// Worker left its commit/rollback boundary
    ///
    /// During `AWAITING_WORKERS_FINISHED` marks the worker finished and
    /// returns the protocol it must switch to; otherwise returns `None`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` for an unregistered worker.
    pub fn leave_boundary(&self, worker: WorkerId) -> TailorResult<Option<IsolationProtocol>> {
        let mut state = self.state.lock();
        let next = state.next;
        let phase = state.phase;
        let slot = state
            .workers
            .get_mut(&worker)
            .ok_or_else(|| TailorError::invalid_state(format!("{} is not registered", worker)))?;

        if phase == SwitchPhase::AwaitingWorkersFinished && !slot.finished {
            slot.finished = true;
            self.changed.notify_all();
            debug!(target: "tailor::switch", worker = %worker, protocol = %next, "Worker finished");
            return Ok(Some(next));
        }
        Ok(None)
    }

    /// Switch every worker to `target`, blocking until done
    ///
    /// Requests are serialized. Requesting the protocol already in effect
    /// returns immediately with `switched == false`.
    pub fn request_switch(&self, target: IsolationProtocol) -> SwitchReport {
        let _serial = self.requests.lock();
        let mut state = self.state.lock();
        let from = state.current;
        let transition_safe = from.transition_safe(target);

        if from == target {
            self.noop_requests.fetch_add(1, Ordering::Relaxed);
            return SwitchReport {
                from,
                to: target,
                transition_safe,
                ready_wait: Duration::ZERO,
                finish_wait: Duration::ZERO,
                workers: state.workers.len(),
                switched: false,
            };
        }

        state.next = target;
        state.reset_flags();
        state.phase = SwitchPhase::AwaitingWorkersReady;
        self.changed.notify_all();
        info!(
            target: "tailor::switch",
            from = %from,
            to = %target,
            transition_safe = %transition_safe,
            workers = state.workers.len(),
            "Protocol switch started"
        );

        let ready_wait = self.wait_while(&mut state, "workers ready", |s| !s.all_ready());
        state.phase = SwitchPhase::AwaitingWorkersFinished;
        self.changed.notify_all();
        info!(target: "tailor::switch", phase = %state.phase, waited_ms = ready_wait.as_millis() as u64, "All workers ready");

        let finish_wait = self.wait_while(&mut state, "workers finished", |s| !s.all_finished());
        state.current = target;
        state.reset_flags();
        state.phase = SwitchPhase::Stable;
        self.changed.notify_all();

        let workers = state.workers.len();
        drop(state);

        self.switches.fetch_add(1, Ordering::Relaxed);
        self.total_wait_us
            .fetch_add((ready_wait + finish_wait).as_micros() as u64, Ordering::Relaxed);
        info!(
            target: "tailor::switch",
            protocol = %target,
            finish_waited_ms = finish_wait.as_millis() as u64,
            "Protocol switch complete"
        );

        SwitchReport {
            from,
            to: target,
            transition_safe,
            ready_wait,
            finish_wait,
            workers,
            switched: true,
        }
    }

    /// Block on `changed` while `waiting` holds, returning the time waited
    fn wait_while<F>(&self, state: &mut MutexGuard<'_, SwitchState>, what: &str, waiting: F) -> Duration
    where
        F: Fn(&SwitchState) -> bool,
    {
        let start = Instant::now();
        let mut next_warn = self.stall_warn;
        while waiting(&**state) {
            let _ = self.changed.wait_for(state, self.poll_interval);
            let elapsed = start.elapsed();
            if !self.stall_warn.is_zero() && elapsed >= next_warn {
                self.stall_warnings.fetch_add(1, Ordering::Relaxed);
                warn!(
                    target: "tailor::switch",
                    barrier = what,
                    phase = %state.phase,
                    waited_ms = elapsed.as_millis() as u64,
                    workers = state.workers.len(),
                    ready = state.workers.values().filter(|w| w.ready).count(),
                    finished = state.workers.values().filter(|w| w.finished).count(),
                    "Switch barrier stalled"
                );
                next_warn += self.stall_warn;
            }
        }
        start.elapsed()
    }

    /// Current phase
    pub fn phase(&self) -> SwitchPhase {
        self.state.lock().phase
    }

    /// Protocol currently in effect
    pub fn current_protocol(&self) -> IsolationProtocol {
        self.state.lock().current
    }

    /// Protocol commits validate under right now
    pub fn required_protocol(&self) -> IsolationProtocol {
        self.state.lock().required_protocol()
    }

    /// Number of registered workers
    pub fn worker_count(&self) -> usize {
        self.state.lock().workers.len()
    }

    /// Phase plus ready/finished counts
    pub fn progress(&self) -> SwitchProgress {
        let state = self.state.lock();
        SwitchProgress {
            phase: state.phase,
            workers: state.workers.len(),
            ready: state.workers.values().filter(|w| w.ready).count(),
            finished: state.workers.values().filter(|w| w.finished).count(),
        }
    }

    /// Cumulative statistics
    pub fn stats(&self) -> SwitchStats {
        SwitchStats {
            switches: self.switches.load(Ordering::Relaxed),
            noop_requests: self.noop_requests.load(Ordering::Relaxed),
            stall_warnings: self.stall_warnings.load(Ordering::Relaxed),
            total_wait: Duration::from_micros(self.total_wait_us.load(Ordering::Relaxed)),
        }
    }
}
