//! Crate error type.
//!
//! One `thiserror`-derived enum covering every failure kind the core can
//! surface, matching the rest of the workspace's convention of a single
//! `Error` enum per crate with `#[from]` conversions at the seams that
//! naturally produce them.

use thiserror::Error;

use crate::event::EventId;
use crate::executive::{ExecutiveId, RunState};
use crate::time::SimTime;

#[derive(Debug, Error, Clone)]
pub enum ChronosError {
    #[error("event requested for {requested} which is before current time {now}")]
    InvalidSchedule { requested: SimTime, now: SimTime },

    #[error("operation requires state {expected}, executive is {actual:?}")]
    InvalidState {
        expected: &'static str,
        actual: RunState,
    },

    #[error(
        "traced value owned by executive {traced_owner:?} cannot be reached from {caller:?} outside a co-executor"
    )]
    IllegalCrossExecCall {
        traced_owner: ExecutiveId,
        caller: ExecutiveId,
    },

    #[error("owning executive {owner:?} terminated before the call could complete")]
    OwnerTerminated { owner: ExecutiveId },

    #[error("call released because executive {executive:?} was aborted")]
    Aborted { executive: ExecutiveId },

    #[error("event {event:?} callback failed: {message}")]
    EventCallbackFailed { event: EventId, message: String },

    #[error("executive {executive:?} could not reach a safe point before rolling back to {target}")]
    RollbackFailed {
        executive: ExecutiveId,
        target: SimTime,
    },

    #[error("configuration error: {message}")]
    Config { message: String },
}

pub type ChronosResult<T> = Result<T, ChronosError>;
