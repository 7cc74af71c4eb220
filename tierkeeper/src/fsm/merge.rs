//! The merge rule for deferred operations.
//!
//! | current                      | +WRITE             | +ARCHIVE           | +RESTORE       |
//! |------------------------------|--------------------|--------------------|----------------|
//! | none/PREPARE/ARCHIVE/RESTORE | WRITE              | ARCHIVE            | RESTORE        |
//! | WRITE                        | WRITE (delay reset)| WRITE_THEN_ARCHIVE | WRITE          |
//! | WRITE_THEN_ARCHIVE           | WTA (delay reset)  | WRITE_THEN_ARCHIVE | WRITE          |

use crate::model::{DeferredOp, RequestedState};

/// Result of merging an operation into an entity's queued state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Merge {
    pub state: RequestedState,
    /// Whether the write delay starts over.
    pub restart_delay: bool,
}

impl Merge {
    const fn keep(state: RequestedState) -> Self {
        Self {
            state,
            restart_delay: false,
        }
    }

    const fn delayed(state: RequestedState) -> Self {
        Self {
            state,
            restart_delay: true,
        }
    }
}

/// Combines the queued state of an entity with a newly submitted operation.
///
/// PREPARE is tracked separately by the queue and never merged; passing it
/// here yields PREPARE unchanged.
pub fn merge(current: Option<RequestedState>, op: DeferredOp) -> Merge {
    use crate::model::RequestedState::*;

    match (current, op) {
        (_, DeferredOp::Prepare) => Merge::keep(Prepare),

        (Some(Write), DeferredOp::Write) => Merge::delayed(Write),
        (Some(Write), DeferredOp::Archive) => Merge::keep(WriteThenArchive),
        (Some(Write), DeferredOp::Restore) => Merge::keep(Write),

        (Some(WriteThenArchive), DeferredOp::Write) => Merge::delayed(WriteThenArchive),
        (Some(WriteThenArchive), DeferredOp::Archive) => Merge::keep(WriteThenArchive),
        (Some(WriteThenArchive), DeferredOp::Restore) => Merge::keep(Write),

        (_, DeferredOp::Write) => Merge::delayed(Write),
        (_, DeferredOp::Archive) => Merge::keep(Archive),
        (_, DeferredOp::Restore) => Merge::keep(Restore),
    }
}
