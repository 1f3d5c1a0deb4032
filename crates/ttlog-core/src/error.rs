//! Core error types for ttlog-core.
//!
//! Uses `thiserror` for structured, matchable error variants covering the
//! identity-tag and event-clock failure modes shared by recording and replay.

use crate::id::{EventTime, IdentityTag};
use thiserror::Error;

/// Core errors produced by the ttlog-core crate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// A complex value was encoded before it was given an identity tag.
    #[error("complex value has not been tagged")]
    UntaggedValue,

    /// An identity tag was referenced but never registered in this session.
    #[error("unresolved identity tag: {tag}")]
    UnresolvedTag { tag: IdentityTag },

    /// A tag was bound twice within one session.
    #[error("identity tag {tag} is already bound")]
    TagAlreadyBound { tag: IdentityTag },

    /// A tag was bound out of assignment order.
    #[error("identity tag {tag} bound out of order (expected {expected})")]
    TagOutOfOrder {
        tag: IdentityTag,
        expected: IdentityTag,
    },

    /// No event time follows `time`.
    #[error("event clock exhausted at time {time}")]
    ClockExhausted { time: EventTime },
}
