//! Event records and the future event list (FEL).

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};

use crate::time::SimTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Priority(pub i32);

impl Priority {
    pub const DEFAULT: Priority = Priority(0);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Synchronous,
    Daemon,
}

pub type EventCallback = Box<dyn FnOnce() + Send>;

pub struct ScheduledEvent {
    pub id: EventId,
    pub when: SimTime,
    pub priority: Priority,
    pub kind: EventKind,
    pub callback: EventCallback,
}

impl std::fmt::Debug for ScheduledEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledEvent")
            .field("id", &self.id)
            .field("when", &self.when)
            .field("priority", &self.priority)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Ordering key without the callback, used by the heap. Kept separate so
/// the heap never needs to move or inspect the (non-`Ord`) callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HeapKey {
    when: SimTime,
    priority: Priority,
    id: EventId,
}

impl Ord for HeapKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.when
            .cmp(&other.when)
            .then(self.priority.cmp(&other.priority))
            .then(self.id.cmp(&other.id))
    }
}

impl PartialOrd for HeapKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// An executive's future event list: events ordered ascending by
/// (time, priority, insertion-sequence). Cancellation is O(1) via
/// tombstoning in the backing map; stale heap entries are pruned lazily.
#[derive(Default)]
pub struct FutureEventList {
    heap: BinaryHeap<Reverse<HeapKey>>,
    events: HashMap<EventId, ScheduledEvent>,
}

impl FutureEventList {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            events: HashMap::new(),
        }
    }

    pub fn insert(&mut self, event: ScheduledEvent) {
        let key = HeapKey {
            when: event.when,
            priority: event.priority,
            id: event.id,
        };
        self.events.insert(event.id, event);
        self.heap.push(Reverse(key));
    }

    fn prune_tombstones(&mut self) {
        while let Some(Reverse(key)) = self.heap.peek() {
            if self.events.contains_key(&key.id) {
                break;
            }
            self.heap.pop();
        }
    }

    /// The time of the next due event, ignoring cancelled entries.
    pub fn peek_time(&mut self) -> Option<SimTime> {
        self.prune_tombstones();
        self.heap.peek().map(|Reverse(k)| k.when)
    }

    /// Removes and returns the next due event, skipping cancelled entries.
    pub fn pop(&mut self) -> Option<ScheduledEvent> {
        while let Some(Reverse(key)) = self.heap.pop() {
            if let Some(event) = self.events.remove(&key.id) {
                return Some(event);
            }
        }
        None
    }

    pub fn cancel(&mut self, id: EventId) -> bool {
        self.events.remove(&id).is_some()
    }

    pub fn cancel_where(&mut self, mut selector: impl FnMut(&ScheduledEvent) -> bool) -> usize {
        let before = self.events.len();
        self.events.retain(|_, ev| !selector(ev));
        before - self.events.len()
    }

    /// True if a non-daemon event is pending at or before `cutoff` (or
    /// anywhere, if `cutoff` is `None`). Daemon-only remainders do not
    /// count: they never hold an executive's run loop open.
    pub fn has_runnable(&self, cutoff: Option<SimTime>) -> bool {
        self.events
            .values()
            .any(|e| e.kind == EventKind::Synchronous && cutoff.map_or(true, |c| e.when <= c))
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
