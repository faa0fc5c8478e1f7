//! Coordinates a group of executives: starts them together, arbitrates
//! cross-executive rendezvous, detects global termination, and resolves
//! the two-party deadlocks that future-read rendezvous can create.

use std::cmp::Ordering as CmpOrdering;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::config::ChronosConfig;
use crate::error::ChronosError;
use crate::executive::{Executive, ExecutiveId, RunState};
use crate::time::SimTime;

pub enum RendezvousOutcome {
    Queued,
    ResolvedImmediately,
}

/// RAII handle returned by [`crate::executive::Executive::hold_current_timeslice`].
/// While held, the target executive's run loop will not advance its clock
/// past the instant it was at when the hold was taken (`spec` §4.3), which
/// gives a peer a window to inspect or atomically mutate shared state
/// without racing the owner's clock. Dropping it releases the hold.
#[must_use = "dropping a TimesliceHold immediately releases it"]
pub struct TimesliceHold {
    co: Option<Arc<CoExecutorInner>>,
    target: ExecutiveId,
}

impl TimesliceHold {
    pub(crate) fn acquire(co: Option<Arc<CoExecutorInner>>, target: ExecutiveId) -> Self {
        if let Some(co) = &co {
            co.hold_to_current_timeslice(target);
        }
        TimesliceHold { co, target }
    }
}

impl Drop for TimesliceHold {
    fn drop(&mut self) {
        if let Some(co) = &self.co {
            co.release_from_current_timeslice(self.target);
        }
    }
}

struct BlockedOn {
    owner: ExecutiveId,
    target: SimTime,
}

struct PendingRendezvous {
    caller: ExecutiveId,
    target: SimTime,
    on_ready: Box<dyn FnOnce() + Send>,
    on_unavailable: Box<dyn FnOnce(ChronosError) + Send>,
}

/// Shared coordination state, referenced weakly by every member executive
/// (see `spec` §9: cyclic references are broken by routing rendezvous
/// through this central table rather than executive-to-executive
/// pointers).
pub struct CoExecutorInner {
    members: DashMap<ExecutiveId, Executive>,
    rendezvous: DashMap<ExecutiveId, Mutex<Vec<PendingRendezvous>>>,
    blocked: DashMap<ExecutiveId, BlockedOn>,
    holds: DashMap<ExecutiveId, u32>,
    config: ChronosConfig,
    terminated: AtomicBool,
    barrier_lock: Mutex<()>,
    barrier_cond: Condvar,
    rng_seed: AtomicU32,
}

impl CoExecutorInner {
    pub(crate) fn fire_due_rendezvous(&self, owner: ExecutiveId, new_time: SimTime) {
        let Some(queue) = self.rendezvous.get(&owner) else {
            return;
        };
        let mut due = Vec::new();
        {
            let mut q = queue.lock();
            q.sort_by_key(|r| r.target);
            let mut i = 0;
            while i < q.len() {
                if q[i].target <= new_time {
                    due.push(q.remove(i));
                } else {
                    i += 1;
                }
            }
        }
        for rdv in due {
            self.blocked.remove(&rdv.caller);
            debug!(?owner, caller = ?rdv.caller, %new_time, "rendezvous fired");
            (rdv.on_ready)();
        }
        self.barrier_cond.notify_all();
    }

    /// Registers `caller` as waiting for `owner`'s clock to reach `target`.
    /// Detects the two-party cycle described in `spec` §4.3: if `owner` is
    /// already registered as blocked on `caller`, the side with the lower
    /// current time is resolved immediately (its continuation runs now,
    /// against whatever history already exists) instead of queuing, so at
    /// least one side keeps making progress.
    pub(crate) fn register_rendezvous(
        &self,
        owner: ExecutiveId,
        caller: ExecutiveId,
        target: SimTime,
        on_ready: Box<dyn FnOnce() + Send>,
        on_unavailable: Box<dyn FnOnce(ChronosError) + Send>,
    ) -> RendezvousOutcome {
        if let Some(peer_blocked) = self.blocked.get(&owner) {
            if peer_blocked.owner == caller {
                let peer_target = peer_blocked.target;
                drop(peer_blocked);
                let caller_is_lower = match target.cmp(&peer_target) {
                    CmpOrdering::Less => true,
                    CmpOrdering::Greater => false,
                    CmpOrdering::Equal => caller.0 < owner.0,
                };
                if caller_is_lower {
                    info!(?caller, ?owner, "deadlock avoidance: resolving lower-time side immediately");
                    on_ready();
                    return RendezvousOutcome::ResolvedImmediately;
                }
            }
        }

        self.blocked.insert(caller, BlockedOn { owner, target });
        self.rendezvous
            .entry(owner)
            .or_insert_with(|| Mutex::new(Vec::new()))
            .lock()
            .push(PendingRendezvous {
                caller,
                target,
                on_ready,
                on_unavailable,
            });
        self.barrier_cond.notify_all();
        RendezvousOutcome::Queued
    }

    pub(crate) fn mark_terminal(&self, id: ExecutiveId) {
        let _ = id;
        self.barrier_cond.notify_all();
    }

    pub fn hold_to_current_timeslice(&self, id: ExecutiveId) {
        *self.holds.entry(id).or_insert(0) += 1;
    }

    pub fn release_from_current_timeslice(&self, id: ExecutiveId) {
        if let Some(mut count) = self.holds.get_mut(&id) {
            if *count > 0 {
                *count -= 1;
            }
        }
        self.barrier_cond.notify_all();
    }

    pub fn is_held(&self, id: ExecutiveId) -> bool {
        self.holds.get(&id).map_or(false, |c| *c > 0)
    }

    /// Blocks the calling thread (the held executive's own worker) until
    /// no peer holds it to its current timeslice. Polled rather than
    /// edge-triggered off a single release, since a hold can be re-taken
    /// by another peer between the release that woke us and our recheck.
    pub(crate) fn wait_while_held(&self, id: ExecutiveId) {
        let mut guard = self.barrier_lock.lock();
        while self.is_held(id) {
            self.barrier_cond.wait_for(&mut guard, Duration::from_millis(20));
        }
    }

    fn is_blocked_on_done(&self, id: ExecutiveId) -> bool {
        let mut current = id;
        let mut seen = HashSet::new();
        loop {
            if !seen.insert(current) {
                return true; // cyclic wait with no terminal node: treat as stuck, not runnable
            }
            let Some(blocked) = self.blocked.get(&current) else {
                return false;
            };
            let owner = blocked.owner;
            drop(blocked);
            match self.members.get(&owner).map(|e| e.run_state()) {
                Some(s) if s.is_terminal() => return true,
                Some(_) => current = owner,
                None => return false,
            }
        }
    }

    fn is_globally_done(&self) -> bool {
        self.members.iter().all(|kv| {
            let id = *kv.key();
            let exec = kv.value();
            exec.run_state().is_terminal() || self.is_blocked_on_done(id)
        })
    }

    /// Resolves every rendezvous still pending once the group has gone
    /// globally quiet (`spec` §4.3). Three distinct outcomes, keyed off why
    /// the owner stopped advancing:
    ///
    /// - `Finished` (ran out of events naturally): the deadlock-avoidance
    ///   "no forward progress possible" clause applies — the owner's clock
    ///   will never reach the caller's target, so the read is resolved with
    ///   the owner's last known value held constant, exactly as `read_at`
    ///   would already return for any time at or beyond the owner's final
    ///   `Now` (`spec` §4.3, §8 scenario 3).
    /// - `Stopped` (explicit early `Stop`, i.e. shutdown while the call was
    ///   in flight): `OwnerTerminated`, matching `spec` §4.2's "blocked
    ///   during owner's shutdown" clause.
    /// - `Aborted`: `Aborted`.
    fn fail_all_pending(&self) {
        for entry in self.rendezvous.iter() {
            let owner = *entry.key();
            let owner_state = self.members.get(&owner).map(|e| e.run_state());
            let mut pending = entry.value().lock();
            for rdv in pending.drain(..) {
                self.blocked.remove(&rdv.caller);
                match owner_state {
                    Some(RunState::Finished) => (rdv.on_ready)(),
                    Some(RunState::Aborted) => (rdv.on_unavailable)(ChronosError::Aborted { executive: owner }),
                    _ => (rdv.on_unavailable)(ChronosError::OwnerTerminated { owner }),
                }
            }
        }
    }

    pub fn members(&self) -> Vec<ExecutiveId> {
        self.members.iter().map(|kv| *kv.key()).collect()
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(AtomicOrdering::Acquire)
    }

    fn slowest_member_now(&self, excluding: ExecutiveId) -> Option<SimTime> {
        self.members
            .iter()
            .filter(|kv| *kv.key() != excluding)
            .map(|kv| kv.value().now())
            .min()
    }

    /// Advisory pacing: returns a yield probability in `[0, 1]` for an
    /// executive currently at `self_now`, proportional to how far ahead
    /// it is of the slowest peer relative to the configured window.
    /// Never affects correctness (`spec` §4.3).
    pub(crate) fn backpressure_probability(&self, id: ExecutiveId, self_now: SimTime) -> f64 {
        if !self.config.co_executor.backpressure_enabled {
            return 0.0;
        }
        let Some(slowest) = self.slowest_member_now(id) else {
            return 0.0;
        };
        let lead = self_now - slowest;
        if lead <= 0.0 {
            return 0.0;
        }
        (lead / self.config.co_executor.backpressure_window).min(1.0)
    }

    pub(crate) fn maybe_yield(&self, id: ExecutiveId, self_now: SimTime) {
        let p = self.backpressure_probability(id, self_now);
        if p <= 0.0 {
            return;
        }
        let seed = self.rng_seed.fetch_add(0x9E37_79B9, AtomicOrdering::Relaxed);
        let mut rng = SmallRng::seed_from_u64(seed as u64 ^ (id.0 << 32) ^ 0xD1B5_4A32_D192_ED03);
        if rng.gen::<f64>() < p {
            std::thread::yield_now();
        }
    }
}

/// Launches and coordinates a group of executives.
pub struct CoExecutor {
    inner: Arc<CoExecutorInner>,
}

impl CoExecutor {
    pub fn new(config: ChronosConfig) -> Self {
        CoExecutor {
            inner: Arc::new(CoExecutorInner {
                members: DashMap::new(),
                rendezvous: DashMap::new(),
                blocked: DashMap::new(),
                holds: DashMap::new(),
                config,
                terminated: AtomicBool::new(false),
                barrier_lock: Mutex::new(()),
                barrier_cond: Condvar::new(),
                rng_seed: AtomicU32::new(0x2545_F491),
            }),
        }
    }

    pub fn members(&self) -> Vec<ExecutiveId> {
        self.inner.members()
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.is_terminated()
    }

    /// Starts every executive in `execs` on its own worker thread and
    /// blocks until the group has globally terminated: every member is
    /// `Finished`/`Stopped`/`Aborted`, or transitively blocked only on
    /// members that are.
    pub fn co_start(&self, execs: &[Executive], terminate_at: Option<SimTime>) -> Result<(), ChronosError> {
        let rollback_timeout = self.inner.config.rollback_safe_point_timeout();
        for exec in execs {
            self.inner.members.insert(exec.id(), exec.clone());
            exec.attach_co_executor(Arc::downgrade(&self.inner), rollback_timeout);
            exec.set_terminate_at(terminate_at);
        }
        for exec in execs {
            exec.start()?;
        }

        let poll_interval = self.inner.config.deadlock_check_interval();
        loop {
            if self.inner.is_globally_done() {
                break;
            }
            let mut guard = self.inner.barrier_lock.lock();
            self.inner.barrier_cond.wait_for(&mut guard, poll_interval);
        }
        self.inner.fail_all_pending();
        self.inner.terminated.store(true, AtomicOrdering::Release);

        for exec in execs {
            exec.join();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventKind, Priority};
    use std::sync::atomic::AtomicI64;

    #[test]
    fn co_termination_waits_for_every_member() {
        let a = Executive::new("a", SimTime::ZERO);
        let b = Executive::new("b", SimTime::ZERO);
        let c = Executive::new("c", SimTime::ZERO);
        let done = Arc::new(AtomicI64::new(0));
        for (exec, t) in [(&a, 60.0), (&b, 30.0), (&c, 10.0)] {
            let done = done.clone();
            exec.request_event(SimTime::new(t), Priority::DEFAULT, EventKind::Synchronous, move || {
                done.fetch_add(1, AtomicOrdering::SeqCst);
            })
            .unwrap();
        }
        let co = CoExecutor::new(ChronosConfig::default());
        co.co_start(&[a.clone(), b.clone(), c.clone()], None).unwrap();
        assert_eq!(done.load(AtomicOrdering::SeqCst), 3);
        assert_eq!(a.run_state(), RunState::Finished);
        assert_eq!(b.run_state(), RunState::Finished);
        assert_eq!(c.run_state(), RunState::Finished);
    }

    #[test]
    fn holding_an_executive_blocks_its_clock_until_released() {
        let co = Arc::new(CoExecutorInner {
            members: DashMap::new(),
            rendezvous: DashMap::new(),
            blocked: DashMap::new(),
            holds: DashMap::new(),
            config: ChronosConfig::default(),
            terminated: AtomicBool::new(false),
            barrier_lock: Mutex::new(()),
            barrier_cond: Condvar::new(),
            rng_seed: AtomicU32::new(1),
        });
        let exec = Executive::new("held", SimTime::ZERO);
        exec.attach_co_executor(Arc::downgrade(&co), Duration::from_millis(500));

        let ticks = Arc::new(AtomicI64::new(0));
        for t in [1.0, 2.0] {
            let ticks = ticks.clone();
            exec.request_event(SimTime::new(t), Priority::DEFAULT, EventKind::Synchronous, move || {
                ticks.fetch_add(1, AtomicOrdering::SeqCst);
            })
            .unwrap();
        }

        co.hold_to_current_timeslice(exec.id());
        exec.start().unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(ticks.load(AtomicOrdering::SeqCst), 0, "held executive must not advance its clock");
        assert_eq!(exec.now(), SimTime::ZERO);

        co.release_from_current_timeslice(exec.id());
        exec.join();
        assert_eq!(ticks.load(AtomicOrdering::SeqCst), 2);
    }

    #[test]
    fn backpressure_probability_zero_when_not_ahead() {
        let co = CoExecutorInner {
            members: DashMap::new(),
            rendezvous: DashMap::new(),
            blocked: DashMap::new(),
            holds: DashMap::new(),
            config: ChronosConfig::default(),
            terminated: AtomicBool::new(false),
            barrier_lock: Mutex::new(()),
            barrier_cond: Condvar::new(),
            rng_seed: AtomicU32::new(1),
        };
        let a = Executive::new("a", SimTime::ZERO);
        let b = Executive::new("b", SimTime::ZERO);
        co.members.insert(a.id(), a.clone());
        co.members.insert(b.id(), b.clone());
        assert_eq!(co.backpressure_probability(a.id(), SimTime::new(5.0)), 0.0);
    }

    #[test]
    fn deadlock_cycle_resolves_lower_time_side_immediately() {
        let co = CoExecutorInner {
            members: DashMap::new(),
            rendezvous: DashMap::new(),
            blocked: DashMap::new(),
            holds: DashMap::new(),
            config: ChronosConfig::default(),
            terminated: AtomicBool::new(false),
            barrier_lock: Mutex::new(()),
            barrier_cond: Condvar::new(),
            rng_seed: AtomicU32::new(1),
        };
        let a = ExecutiveId(100);
        let b = ExecutiveId(200);

        // A (now=100) registers a future read against B.
        let a_resolved = Arc::new(AtomicBool::new(false));
        let flag = a_resolved.clone();
        let outcome_a = co.register_rendezvous(
            b,
            a,
            SimTime::new(100.0),
            Box::new(move || flag.store(true, AtomicOrdering::SeqCst)),
            Box::new(|_| {}),
        );
        assert!(matches!(outcome_a, RendezvousOutcome::Queued));

        // B (now=60) registers a future read against A, completing the cycle.
        let b_resolved = Arc::new(AtomicBool::new(false));
        let flag = b_resolved.clone();
        let outcome_b = co.register_rendezvous(
            a,
            b,
            SimTime::new(60.0),
            Box::new(move || flag.store(true, AtomicOrdering::SeqCst)),
            Box::new(|_| {}),
        );
        assert!(matches!(outcome_b, RendezvousOutcome::ResolvedImmediately));
        assert!(b_resolved.load(AtomicOrdering::SeqCst));
        assert!(!a_resolved.load(AtomicOrdering::SeqCst));
    }
}
