//! A single-threaded discrete-event simulation engine driving one
//! simulated-time axis on its own worker thread.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

use crate::co_executor::{CoExecutorInner, TimesliceHold};
use crate::error::{ChronosError, ChronosResult};
use crate::event::{EventCallback, EventId, EventKind, FutureEventList, Priority, ScheduledEvent};
use crate::signal::{Signal, SignalBus, SignalKind, Subscription};
use crate::time::{Sequencer, SimTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExecutiveId(pub u64);

static NEXT_EXECUTIVE_ID: AtomicU64 = AtomicU64::new(0);

impl ExecutiveId {
    /// Allocates a fresh, process-wide unique id.
    pub fn fresh() -> Self {
        ExecutiveId(NEXT_EXECUTIVE_ID.fetch_add(1, AtomicOrdering::Relaxed))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Paused,
    Stopped,
    Finished,
    Aborted,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Finished | RunState::Stopped | RunState::Aborted)
    }
}

struct State {
    run_state: RunState,
    now: SimTime,
    start_time: SimTime,
    terminate_at: Option<SimTime>,
    fel: FutureEventList,
    /// True while a user event callback is executing without the state
    /// lock held; a peer-initiated rollback must wait for this to clear
    /// before mutating `now`, so it never tears a callback's view of the
    /// clock.
    in_event: bool,
    worker: Option<JoinHandle<()>>,
    /// Set when an event callback panics; drained by
    /// [`Executive::take_last_event_error`] rather than surfaced through
    /// a `Result` return, since the run loop itself runs off-thread.
    last_event_error: Option<ChronosError>,
}

struct Inner {
    id: ExecutiveId,
    name: String,
    state: Mutex<State>,
    cond: Condvar,
    signals: Arc<SignalBus>,
    seq: Sequencer,
    run_number: AtomicU64,
    event_count: AtomicU64,
    immediate_floor: AtomicI64,
    co: parking_lot::RwLock<Option<Weak<CoExecutorInner>>>,
    rollback_timeout: Mutex<Duration>,
}

impl Inner {
    fn co(&self) -> Option<Arc<CoExecutorInner>> {
        self.co.read().as_ref().and_then(Weak::upgrade)
    }
}

/// A cheap, cloneable handle to one executive. Cloning shares the same
/// underlying engine; it does not create a second executive.
#[derive(Clone)]
pub struct Executive(Arc<Inner>);

impl Executive {
    pub fn new(name: impl Into<String>, start_time: SimTime) -> Self {
        let id = ExecutiveId::fresh();
        let inner = Inner {
            id,
            name: name.into(),
            state: Mutex::new(State {
                run_state: RunState::Idle,
                now: start_time,
                start_time,
                terminate_at: None,
                fel: FutureEventList::new(),
                in_event: false,
                worker: None,
                last_event_error: None,
            }),
            cond: Condvar::new(),
            signals: SignalBus::new(),
            seq: Sequencer::new(),
            run_number: AtomicU64::new(0),
            event_count: AtomicU64::new(0),
            immediate_floor: AtomicI64::new(-1),
            co: parking_lot::RwLock::new(None),
            rollback_timeout: Mutex::new(Duration::from_millis(2000)),
        };
        Executive(Arc::new(inner))
    }

    pub fn id(&self) -> ExecutiveId {
        self.0.id
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn now(&self) -> SimTime {
        self.0.state.lock().now
    }

    pub fn run_state(&self) -> RunState {
        self.0.state.lock().run_state
    }

    pub fn event_count(&self) -> u64 {
        self.0.event_count.load(AtomicOrdering::Relaxed)
    }

    pub fn run_number(&self) -> u64 {
        self.0.run_number.load(AtomicOrdering::Relaxed)
    }

    pub fn pending_event_count(&self) -> usize {
        self.0.state.lock().fel.len()
    }

    /// Drains the most recent event-callback panic, if one happened since
    /// the last call. The run loop itself never returns a `Result` (it
    /// runs off-thread), so this is the caller-visible path onto
    /// [`ChronosError::EventCallbackFailed`]; the same failure is also
    /// published as a [`Signal::ExecutiveErrored`] for subscribers that
    /// want it live rather than polled.
    pub fn take_last_event_error(&self) -> Option<ChronosError> {
        self.0.state.lock().last_event_error.take()
    }

    pub fn subscribe(
        &self,
        kind: Option<SignalKind>,
        callback: impl Fn(&Signal) + Send + 'static,
    ) -> Subscription {
        self.0.signals.subscribe(kind, callback)
    }

    /// Used internally by `TracedValue` to reach its owner's history
    /// truncation hook without holding a strong `Executive` -> `Executive`
    /// pointer anywhere.
    pub(crate) fn signals(&self) -> &Arc<SignalBus> {
        &self.0.signals
    }

    pub(crate) fn attach_co_executor(&self, co: Weak<CoExecutorInner>, rollback_timeout: Duration) {
        *self.0.co.write() = Some(co);
        *self.0.rollback_timeout.lock() = rollback_timeout;
    }

    pub(crate) fn co_executor(&self) -> Option<Arc<CoExecutorInner>> {
        self.0.co()
    }

    pub(crate) fn set_terminate_at(&self, t: Option<SimTime>) {
        self.0.state.lock().terminate_at = t;
    }

    /// Holds this executive to its current timeslice: its run loop will
    /// not advance `Now` past the instant it is at right now until the
    /// returned guard is dropped (`spec` §4.3). Outside a co-executor
    /// group the guard is a no-op, since there is no peer clock to race.
    pub fn hold_current_timeslice(&self) -> TimesliceHold {
        TimesliceHold::acquire(self.0.co(), self.id())
    }

    // ---- scheduling -----------------------------------------------------

    pub fn request_event(
        &self,
        when: SimTime,
        priority: Priority,
        kind: EventKind,
        callback: impl FnOnce() + Send + 'static,
    ) -> ChronosResult<EventId> {
        self.insert_event(when, priority, kind, Box::new(callback))
    }

    /// Enqueues a callback at `Now` ahead of everything else currently
    /// pending at `Now`. "Ahead" is implemented as a priority lower than
    /// any ordinary event's (the FEL fires lower priority numbers first),
    /// taken from a strictly descending private range so repeated
    /// immediate requests still fire in the order they were issued.
    pub fn request_immediate_event(
        &self,
        callback: impl FnOnce() + Send + 'static,
    ) -> ChronosResult<EventId> {
        let priority = self.0.immediate_floor.fetch_sub(1, AtomicOrdering::Relaxed);
        let now = self.now();
        self.insert_event(now, Priority(priority as i32), EventKind::Synchronous, Box::new(callback))
    }

    fn insert_event(
        &self,
        when: SimTime,
        priority: Priority,
        kind: EventKind,
        callback: EventCallback,
    ) -> ChronosResult<EventId> {
        let mut st = self.0.state.lock();
        if when < st.now {
            return Err(ChronosError::InvalidSchedule {
                requested: when,
                now: st.now,
            });
        }
        let id = EventId(self.0.seq.next());
        st.fel.insert(ScheduledEvent {
            id,
            when,
            priority,
            kind,
            callback,
        });
        drop(st);
        self.0.cond.notify_all();
        Ok(id)
    }

    pub fn unrequest_event(&self, id: EventId) -> bool {
        self.0.state.lock().fel.cancel(id)
    }

    pub fn unrequest_events(&self, selector: impl FnMut(&ScheduledEvent) -> bool) -> usize {
        self.0.state.lock().fel.cancel_where(selector)
    }

    // ---- lifecycle --------------------------------------------------

    pub fn start(&self) -> ChronosResult<()> {
        {
            let mut st = self.0.state.lock();
            if st.run_state != RunState::Idle {
                return Err(ChronosError::InvalidState {
                    expected: "Idle",
                    actual: st.run_state,
                });
            }
            st.run_state = RunState::Running;
        }
        self.0.signals.publish(Signal::ExecutiveStartedSingleShot);
        self.0.signals.publish(Signal::ExecutiveStarted);

        let handle = self.clone();
        let join = std::thread::Builder::new()
            .name(format!("chronos-{}", self.name()))
            .spawn(move || run_loop(handle))
            .expect("failed to spawn executive worker thread");
        self.0.state.lock().worker = Some(join);
        Ok(())
    }

    pub fn stop(&self) -> ChronosResult<()> {
        let mut st = self.0.state.lock();
        match st.run_state {
            RunState::Running | RunState::Paused => {
                st.run_state = RunState::Stopped;
                drop(st);
                self.0.cond.notify_all();
                Ok(())
            }
            other => Err(ChronosError::InvalidState {
                expected: "Running or Paused",
                actual: other,
            }),
        }
    }

    pub fn pause(&self) -> ChronosResult<()> {
        let mut st = self.0.state.lock();
        if st.run_state != RunState::Running {
            return Err(ChronosError::InvalidState {
                expected: "Running",
                actual: st.run_state,
            });
        }
        st.run_state = RunState::Paused;
        drop(st);
        self.0.signals.publish(Signal::ExecutivePaused);
        Ok(())
    }

    pub fn resume(&self) -> ChronosResult<()> {
        let mut st = self.0.state.lock();
        if st.run_state != RunState::Paused {
            return Err(ChronosError::InvalidState {
                expected: "Paused",
                actual: st.run_state,
            });
        }
        st.run_state = RunState::Running;
        drop(st);
        self.0.cond.notify_all();
        self.0.signals.publish(Signal::ExecutiveResumed);
        Ok(())
    }

    pub fn abort(&self) -> ChronosResult<()> {
        let mut st = self.0.state.lock();
        if st.run_state.is_terminal() {
            return Err(ChronosError::InvalidState {
                expected: "non-terminal",
                actual: st.run_state,
            });
        }
        st.run_state = RunState::Aborted;
        drop(st);
        self.0.cond.notify_all();
        Ok(())
    }

    pub fn reset(&self) -> ChronosResult<()> {
        let mut st = self.0.state.lock();
        if st.run_state == RunState::Running {
            return Err(ChronosError::InvalidState {
                expected: "Paused, Stopped, Finished, or Aborted",
                actual: st.run_state,
            });
        }
        st.fel = FutureEventList::new();
        st.now = st.start_time;
        st.run_state = RunState::Idle;
        st.worker = None;
        st.last_event_error = None;
        drop(st);
        self.0.run_number.fetch_add(1, AtomicOrdering::Relaxed);
        self.0.event_count.store(0, AtomicOrdering::Relaxed);
        self.0.signals.publish(Signal::ExecutiveReset);
        Ok(())
    }

    /// Blocks the calling thread until this executive reaches a terminal
    /// run state.
    pub fn join(&self) {
        let mut st = self.0.state.lock();
        while !st.run_state.is_terminal() {
            self.0.cond.wait(&mut st);
        }
    }

    // ---- rollback -----------------------------------------------------

    /// Rolls this executive's clock back to `target` (clamped to its
    /// start time), truncating every traced value it owns to that
    /// instant. Safe to call from the owner's own thread or from a peer's:
    /// the call blocks until the owner is between events (its "safe
    /// point"), bounded by the configured rollback timeout.
    pub fn initiate_rollback(
        &self,
        target: SimTime,
        on_rollback: Option<Box<dyn FnOnce() + Send>>,
    ) -> ChronosResult<()> {
        let clamped = {
            let st = self.0.state.lock();
            target.max(st.start_time)
        };

        let timeout = *self.0.rollback_timeout.lock();
        let deadline = Instant::now() + timeout;
        let mut st = self.0.state.lock();
        if clamped >= st.now {
            return Ok(()); // no-op: rolling forward or to Now is not a rollback
        }
        while st.in_event {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ChronosError::RollbackFailed {
                    executive: self.id(),
                    target: clamped,
                });
            }
            let timed_out = self.0.cond.wait_for(&mut st, remaining).timed_out();
            if timed_out && st.in_event {
                return Err(ChronosError::RollbackFailed {
                    executive: self.id(),
                    target: clamped,
                });
            }
        }
        debug!(executive = ?self.id(), %clamped, "rolling back");
        st.now = clamped;
        drop(st);

        self.0.signals.publish(Signal::Rolledback(clamped));
        if let Some(cb) = on_rollback {
            cb();
        }
        Ok(())
    }
}

fn run_loop(exec: Executive) {
    let inner = &exec.0;
    loop {
        let next = {
            let mut st = inner.state.lock();
            loop {
                match st.run_state {
                    RunState::Stopped | RunState::Aborted => break NextStep::Exit,
                    RunState::Paused => inner.cond.wait(&mut st),
                    RunState::Running => {
                        if let Some(co) = inner.co() {
                            if co.is_held(inner.id) {
                                drop(st);
                                co.wait_while_held(inner.id);
                                st = inner.state.lock();
                                continue;
                            }
                        }
                        if !st.fel.has_runnable(st.terminate_at) {
                            st.run_state = RunState::Finished;
                            break NextStep::Exit;
                        }
                        match st.fel.peek_time() {
                            Some(t) if st.terminate_at.map_or(true, |term| t <= term) => {
                                let event = st.fel.pop().expect("peeked Some");
                                break NextStep::Run(event);
                            }
                            _ => {
                                st.run_state = RunState::Finished;
                                break NextStep::Exit;
                            }
                        }
                    }
                    RunState::Idle | RunState::Finished => break NextStep::Exit,
                }
            }
        };

        let event = match next {
            NextStep::Exit => break,
            NextStep::Run(event) => event,
        };

        {
            let mut st = inner.state.lock();
            if event.when != st.now {
                drop(st);
                inner.signals.publish(Signal::ClockAboutToChange(event.when));
                st = inner.state.lock();
                st.now = event.when;
                let co = inner.co();
                drop(st);
                if let Some(co) = co {
                    co.fire_due_rendezvous(inner.id, event.when);
                }
            } else {
                drop(st);
            }
        }

        inner.signals.publish(Signal::EventAboutToFire(event.id));
        inner.state.lock().in_event = true;
        inner.event_count.fetch_add(1, AtomicOrdering::Relaxed);

        trace!(executive = ?inner.id, event = ?event.id, when = %event.when, "dispatching event");
        let outcome = panic::catch_unwind(AssertUnwindSafe(event.callback));

        {
            let mut st = inner.state.lock();
            st.in_event = false;
            drop(st);
        }
        inner.cond.notify_all();

        match outcome {
            Ok(()) => {
                inner.signals.publish(Signal::EventHasCompleted {
                    event: event.id,
                    error: None,
                });
            }
            Err(payload) => {
                let message = panic_message(&payload);
                warn!(executive = ?inner.id, event = ?event.id, %message, "event callback panicked");
                inner.state.lock().last_event_error = Some(ChronosError::EventCallbackFailed {
                    event: event.id,
                    message: message.clone(),
                });
                inner.signals.publish(Signal::EventHasCompleted {
                    event: event.id,
                    error: Some(message.clone()),
                });
                inner.signals.publish(Signal::ExecutiveErrored(message));
            }
        }

        if let Some(co) = inner.co() {
            co.maybe_yield(inner.id, exec.now());
        }
    }

    let final_state = inner.state.lock().run_state;
    match final_state {
        RunState::Finished => inner.signals.publish(Signal::ExecutiveFinished),
        RunState::Stopped => inner.signals.publish(Signal::ExecutiveStopped),
        RunState::Aborted => inner.signals.publish(Signal::ExecutiveAborted),
        _ => {}
    }
    inner.cond.notify_all();
    if let Some(co) = inner.co() {
        co.mark_terminal(inner.id);
    }
}

enum NextStep {
    Exit,
    Run(ScheduledEvent),
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "event callback panicked with a non-string payload".to_string()
    }
}
