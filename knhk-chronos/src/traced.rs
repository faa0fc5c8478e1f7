//! Time-traced values: state owned by one executive, readable and
//! writable from any executive in the same co-executor group.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::co_executor::RendezvousOutcome;
use crate::error::{ChronosError, ChronosResult};
use crate::event::{EventKind, Priority};
use crate::executive::{Executive, ExecutiveId};
use crate::signal::{Signal, SignalKind, Subscription};
use crate::time::SimTime;

/// One entry in a traced value's history log, exposed read-only via
/// [`TracedValue::history_audit`] for diagnostics.
#[derive(Debug, Clone)]
pub struct HistoryEntry<V> {
    pub when: SimTime,
    pub value: V,
    pub writer: ExecutiveId,
}

struct TracedState<V> {
    history: Vec<HistoryEntry<V>>,
}

impl<V: Clone + PartialEq> TracedState<V> {
    fn tail(&self) -> &HistoryEntry<V> {
        self.history.last().expect("history is never empty after construction")
    }

    /// Binary search (linear below ~15 entries, matching `spec` §4.2) for
    /// the last entry with `when <= at`.
    fn read_at(&self, at: SimTime) -> V {
        if self.history.len() < 15 {
            return self
                .history
                .iter()
                .rev()
                .find(|e| e.when <= at)
                .map(|e| e.value.clone())
                .unwrap_or_else(|| self.history[0].value.clone());
        }
        match self.history.binary_search_by(|e| e.when.cmp(&at)) {
            Ok(idx) => self.history[idx].value.clone(),
            Err(0) => self.history[0].value.clone(),
            Err(idx) => self.history[idx - 1].value.clone(),
        }
    }

    fn local_set(&mut self, value: V, at: SimTime, writer: ExecutiveId) {
        if self.tail().value == value {
            return; // idempotent
        }
        if self.tail().when == at {
            self.history.last_mut().unwrap().value = value;
        } else {
            self.history.push(HistoryEntry { when: at, value, writer });
        }
    }

    fn truncate_after(&mut self, target: SimTime) {
        self.history.retain(|e| e.when <= target);
        if self.history.is_empty() {
            // Construction guarantees at least the initial entry at or
            // before start time; this would only trip on a logic error.
            unreachable!("truncation must never remove the initial entry");
        }
    }
}

/// A time-indexed log of a single value, exclusively owned by one
/// executive. Cloning a `TracedValue` shares the same underlying log.
pub struct TracedValue<V> {
    owner: Executive,
    inner: Arc<Mutex<TracedState<V>>>,
    // Kept alive only so the owner's rollback signal keeps truncating this
    // value's history for as long as any handle to it exists.
    _rollback_subscription: Arc<Subscription>,
}

impl<V> Clone for TracedValue<V> {
    fn clone(&self) -> Self {
        TracedValue {
            owner: self.owner.clone(),
            inner: self.inner.clone(),
            _rollback_subscription: self._rollback_subscription.clone(),
        }
    }
}

impl<V: Clone + PartialEq + Send + Sync + 'static> TracedValue<V> {
    pub fn new(owner: Executive, initial: V) -> Self {
        let now = owner.now();
        let state = Arc::new(Mutex::new(TracedState {
            history: vec![HistoryEntry {
                when: now,
                value: initial,
                writer: owner.id(),
            }],
        }));
        let state_for_rollback = state.clone();
        let subscription = owner.signals().subscribe(Some(SignalKind::Rolledback), move |sig| {
            if let Signal::Rolledback(target) = sig {
                state_for_rollback.lock().truncate_after(*target);
            }
        });
        TracedValue {
            owner,
            inner: state,
            _rollback_subscription: Arc::new(subscription),
        }
    }

    pub fn owner_id(&self) -> ExecutiveId {
        self.owner.id()
    }

    pub fn history_len(&self) -> usize {
        self.inner.lock().history.len()
    }

    pub fn history_audit(&self) -> Vec<HistoryEntry<V>> {
        self.inner.lock().history.clone()
    }

    /// Reads this value as observed by `from_exec`.
    pub fn get(&self, from_exec: &Executive) -> ChronosResult<V> {
        if from_exec.id() == self.owner.id() {
            return Ok(self.inner.lock().tail().value.clone());
        }

        let caller_now = from_exec.now();
        let owner_now = self.owner.now();

        if caller_now <= owner_now {
            trace!(owner = ?self.owner.id(), caller = ?from_exec.id(), %caller_now, "historical read");
            return Ok(self.inner.lock().read_at(caller_now));
        }

        // Future read: rendezvous through the co-executor so the
        // continuation runs on the owner's thread once Now reaches
        // caller_now, per `spec` §4.2/§4.3.
        let co = self.owner.co_executor().ok_or(ChronosError::IllegalCrossExecCall {
            traced_owner: self.owner.id(),
            caller: from_exec.id(),
        })?;

        let (tx, rx) = crossbeam_channel::bounded::<ChronosResult<V>>(1);
        let inner = self.inner.clone();
        let tx_ready = tx.clone();
        let on_ready = Box::new(move || {
            let value = inner.lock().read_at(caller_now);
            let _ = tx_ready.send(Ok(value));
        });
        let on_unavailable = Box::new(move |err: ChronosError| {
            let _ = tx.send(Err(err));
        });

        let outcome = co.register_rendezvous(
            self.owner.id(),
            from_exec.id(),
            caller_now,
            on_ready,
            on_unavailable,
        );
        match outcome {
            RendezvousOutcome::Queued => rx
                .recv()
                .unwrap_or(Err(ChronosError::OwnerTerminated { owner: self.owner.id() })),
            RendezvousOutcome::ResolvedImmediately => rx
                .recv()
                .unwrap_or(Err(ChronosError::OwnerTerminated { owner: self.owner.id() })),
        }
    }

    /// Writes this value on behalf of `from_exec`.
    pub fn set(&self, value: V, from_exec: &Executive) -> ChronosResult<()> {
        if from_exec.id() == self.owner.id() {
            let at = self.owner.now();
            self.inner.lock().local_set(value, at, from_exec.id());
            return Ok(());
        }

        let caller_now = from_exec.now();
        let owner_now = self.owner.now();
        let owner = self.owner.clone();
        let inner = self.inner.clone();
        let writer = from_exec.id();

        if caller_now < owner_now {
            // Writing into the owner's past: roll the owner back, then
            // apply the write as the most recent entry at caller_now.
            owner.initiate_rollback(
                caller_now,
                Some(Box::new(move || {
                    inner.lock().local_set(value, caller_now, writer);
                })),
            )
        } else if caller_now == owner_now {
            // Same instant: delegate onto the owner's thread via an
            // immediate event. If another thread also writes at this
            // instant the result is intentionally undefined (`spec` §9).
            owner
                .request_immediate_event(move || {
                    inner.lock().local_set(value, caller_now, writer);
                })
                .map(|_| ())
        } else {
            owner
                .request_event(caller_now, Priority::DEFAULT, EventKind::Synchronous, move || {
                    inner.lock().local_set(value, caller_now, writer);
                })
                .map(|_| ())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::SimTime;

    #[test]
    fn owner_write_then_read_is_visible() {
        let exec = Executive::new("owner", SimTime::ZERO);
        let tv = TracedValue::new(exec.clone(), 0i32);
        tv.set(42, &exec).unwrap();
        assert_eq!(tv.get(&exec).unwrap(), 42);
        assert_eq!(tv.history_len(), 1); // overwrite at same time, no new entry
    }

    #[test]
    fn repeated_identical_set_is_idempotent() {
        let exec = Executive::new("owner", SimTime::ZERO);
        let tv = TracedValue::new(exec.clone(), 7i32);
        tv.set(7, &exec).unwrap();
        tv.set(7, &exec).unwrap();
        assert_eq!(tv.history_len(), 1);
    }

    #[test]
    fn historical_read_returns_value_at_time() {
        let owner = Executive::new("owner", SimTime::ZERO);
        let tv = TracedValue::new(owner.clone(), 0i32);
        // Simulate the owner's clock advancing by writing at increasing
        // times directly (owner.now() tracks state set via events in the
        // full run loop; here we drive it through local_set semantics by
        // issuing owner-side sets while pretending Now has advanced,
        // which the traced value accepts since from_exec == owner).
        {
            let mut st = tv.inner.lock();
            st.history.push(HistoryEntry { when: SimTime::new(10.0), value: 42, writer: owner.id() });
            st.history.push(HistoryEntry { when: SimTime::new(20.0), value: 99, writer: owner.id() });
        }
        assert_eq!(tv.inner.lock().read_at(SimTime::new(15.0)), 42);
        assert_eq!(tv.inner.lock().read_at(SimTime::new(25.0)), 99);
        assert_eq!(tv.inner.lock().read_at(SimTime::new(-5.0)), 0);
    }

    #[test]
    fn rollback_truncates_history_beyond_target() {
        let owner = Executive::new("owner", SimTime::ZERO);
        let tv = TracedValue::new(owner.clone(), 0i32);
        {
            let mut st = tv.inner.lock();
            st.history.push(HistoryEntry { when: SimTime::new(10.0), value: 1, writer: owner.id() });
            st.history.push(HistoryEntry { when: SimTime::new(20.0), value: 2, writer: owner.id() });
        }
        owner.initiate_rollback(SimTime::new(15.0), None).unwrap();
        let audit = tv.history_audit();
        assert_eq!(audit.len(), 2);
        assert_eq!(audit.last().unwrap().value, 1);
    }
}
