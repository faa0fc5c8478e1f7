//! Lifecycle signal bus.
//!
//! Executives publish lifecycle signals synchronously on their own worker
//! thread (`spec` §6). This is a small in-process publish/subscribe
//! mechanism, not a `crossbeam::channel` fan-out, because subscribers are
//! expected to run inline with the publishing event and observe state
//! (e.g. a traced value truncating its history on `Rolledback`) before the
//! run loop proceeds.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::event::EventId;
use crate::time::SimTime;

#[derive(Debug, Clone)]
pub enum Signal {
    ExecutiveStartedSingleShot,
    ExecutiveStarted,
    ExecutiveStopped,
    ExecutiveFinished,
    ExecutiveReset,
    ExecutivePaused,
    ExecutiveResumed,
    ExecutiveAborted,
    ClockAboutToChange(SimTime),
    EventAboutToFire(EventId),
    EventHasCompleted { event: EventId, error: Option<String> },
    Rolledback(SimTime),
    ExecutiveErrored(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    ExecutiveStartedSingleShot,
    ExecutiveStarted,
    ExecutiveStopped,
    ExecutiveFinished,
    ExecutiveReset,
    ExecutivePaused,
    ExecutiveResumed,
    ExecutiveAborted,
    ClockAboutToChange,
    EventAboutToFire,
    EventHasCompleted,
    Rolledback,
    ExecutiveErrored,
}

impl Signal {
    pub fn kind(&self) -> SignalKind {
        match self {
            Signal::ExecutiveStartedSingleShot => SignalKind::ExecutiveStartedSingleShot,
            Signal::ExecutiveStarted => SignalKind::ExecutiveStarted,
            Signal::ExecutiveStopped => SignalKind::ExecutiveStopped,
            Signal::ExecutiveFinished => SignalKind::ExecutiveFinished,
            Signal::ExecutiveReset => SignalKind::ExecutiveReset,
            Signal::ExecutivePaused => SignalKind::ExecutivePaused,
            Signal::ExecutiveResumed => SignalKind::ExecutiveResumed,
            Signal::ExecutiveAborted => SignalKind::ExecutiveAborted,
            Signal::ClockAboutToChange(_) => SignalKind::ClockAboutToChange,
            Signal::EventAboutToFire(_) => SignalKind::EventAboutToFire,
            Signal::EventHasCompleted { .. } => SignalKind::EventHasCompleted,
            Signal::Rolledback(_) => SignalKind::Rolledback,
            Signal::ExecutiveErrored(_) => SignalKind::ExecutiveErrored,
        }
    }
}

type Callback = Box<dyn Fn(&Signal) + Send + 'static>;

struct Subscriber {
    id: u64,
    kind: Option<SignalKind>,
    callback: Callback,
}

/// Per-executive signal bus. Held behind an `Arc` so subscriptions can
/// outlive a single call and unregister themselves via a `Weak` back-edge
/// without keeping the bus alive on their own.
#[derive(Default)]
pub struct SignalBus {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl SignalBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Subscribe to one signal kind, or to every signal if `kind` is `None`.
    pub fn subscribe(
        self: &Arc<Self>,
        kind: Option<SignalKind>,
        callback: impl Fn(&Signal) + Send + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().push(Subscriber {
            id,
            kind,
            callback: Box::new(callback),
        });
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    pub fn publish(&self, signal: Signal) {
        let kind = signal.kind();
        for sub in self.subscribers.lock().iter() {
            if sub.kind.map_or(true, |k| k == kind) {
                (sub.callback)(&signal);
            }
        }
    }

    fn unsubscribe(&self, id: u64) {
        self.subscribers.lock().retain(|s| s.id != id);
    }
}

/// RAII handle: dropping it unregisters the callback.
#[must_use = "dropping a Subscription immediately unsubscribes it"]
pub struct Subscription {
    bus: Weak<SignalBus>,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}
