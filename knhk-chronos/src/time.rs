//! Simulated time and monotonic sequence generation.
//!
//! `SimTime` is the continuous time axis each executive advances along.
//! `Sequencer` hands out the strictly increasing insertion-order numbers
//! used to break (time, priority) ties in the future event list.

use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

/// A point on one executive's simulated time axis.
///
/// Backed by `f64` because the domain layer this core supports (queues,
/// arrival processes, continuous integrators) needs a continuous time
/// domain, not a tick counter. `NaN` is never produced by a public
/// constructor, so `total_cmp` gives callers a real total order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimTime(f64);

impl SimTime {
    pub const ZERO: SimTime = SimTime(0.0);

    pub fn new(t: f64) -> Self {
        assert!(t.is_finite(), "simulated time must be finite, got {t}");
        SimTime(t)
    }

    pub fn as_f64(self) -> f64 {
        self.0
    }
}

impl Eq for SimTime {}

impl Ord for SimTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl PartialOrd for SimTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<f64> for SimTime {
    fn from(t: f64) -> Self {
        SimTime::new(t)
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::ops::Add<f64> for SimTime {
    type Output = SimTime;
    fn add(self, rhs: f64) -> SimTime {
        SimTime::new(self.0 + rhs)
    }
}

impl std::ops::Sub for SimTime {
    type Output = f64;
    fn sub(self, rhs: SimTime) -> f64 {
        self.0 - rhs.0
    }
}

/// Monotonically increasing generator for event ids / FEL insertion order.
#[derive(Debug, Default)]
pub struct Sequencer(AtomicU64);

impl Sequencer {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, AtomicOrdering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_matches_numeric_order() {
        assert!(SimTime::new(1.0) < SimTime::new(2.0));
        assert!(SimTime::new(-1.0) < SimTime::ZERO);
        assert_eq!(SimTime::new(5.0), SimTime::new(5.0));
    }

    #[test]
    fn sequencer_is_strictly_increasing() {
        let seq = Sequencer::new();
        let a = seq.next();
        let b = seq.next();
        let c = seq.next();
        assert!(a < b && b < c);
    }

    #[test]
    #[should_panic]
    fn rejects_non_finite_time() {
        SimTime::new(f64::NAN);
    }
}
