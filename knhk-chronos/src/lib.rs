//! # knhk-chronos
//!
//! The core of a parallel, in-process discrete-event simulation substrate:
//! executives, a co-executor, and time-traced values.
//!
//! ```text
//!                      ┌───────────────────────┐
//!                      │      CoExecutor        │
//!                      │ rendezvous · deadlock  │
//!                      │ avoidance · termination│
//!                      └───────────┬────────────┘
//!                 weak refs        │       weak refs
//!            ┌─────────────────────┼─────────────────────┐
//!            │                     │                     │
//!      ┌─────▼─────┐         ┌─────▼─────┐         ┌─────▼─────┐
//!      │ Executive  │         │ Executive  │         │ Executive  │
//!      │ FEL, clock │         │ FEL, clock │         │ FEL, clock │
//!      │ run loop   │         │ run loop   │         │ run loop   │
//!      └─────┬──────┘         └─────┬──────┘         └─────┬──────┘
//!            │  Get/Set (owner back-reference, no cycles)  │
//!            └───────────────► TracedValue<V> ◄────────────┘
//!                              history log
//! ```
//!
//! Each [`Executive`] runs its own future event list on a dedicated OS
//! thread. Domain code schedules events on one executive; during an event
//! it may call [`TracedValue::get`]/[`TracedValue::set`] on state owned by
//! another executive, which is arbitrated according to the relative
//! simulated times of caller and owner (historical read, blocking future
//! read, rollback-inducing past write, or a scheduled future write). A
//! [`CoExecutor`] starts a group of executives together and supplies the
//! central coordination table that rendezvous and rollback latch through,
//! so executives never hold pointers directly to one another.

pub mod co_executor;
pub mod config;
pub mod error;
pub mod event;
pub mod executive;
pub mod signal;
pub mod time;
pub mod traced;

pub use co_executor::{CoExecutor, TimesliceHold};
pub use config::ChronosConfig;
pub use error::{ChronosError, ChronosResult};
pub use event::{EventId, EventKind, Priority};
pub use executive::{Executive, ExecutiveId, RunState};
pub use signal::{Signal, SignalKind, Subscription};
pub use time::SimTime;
pub use traced::{HistoryEntry, TracedValue};
