//! Stable ID newtypes for log entities.
//!
//! All IDs are distinct newtype wrappers, providing type safety so that an
//! `IdentityTag` cannot be accidentally used where a `ContextTag` is expected.
//! Inner widths follow the on-wire representation of each field.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Logical clock value of one recorded event.
///
/// Strictly increasing across a whole log; the sole ordering key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventTime(pub i64);

/// Names the execution context an action applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContextTag(pub u64);

/// Stable cross-run label for a complex (reference) value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IdentityTag(pub u64);

/// Runtime property identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropertyId(pub u32);

/// Host callback correlation id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallbackId(pub i64);

/// Host document identifier of a loaded script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentId(pub u64);

/// Counter id the runtime assigned to a loaded top-level function body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BodyCounterId(pub u64);

impl EventTime {
    /// The time of the event immediately following this one.
    ///
    /// Fails at `i64::MAX`, which has no successor.
    pub fn next(self) -> Result<EventTime, CoreError> {
        self.0
            .checked_add(1)
            .map(EventTime)
            .ok_or(CoreError::ClockExhausted { time: self })
    }
}

impl CallbackId {
    /// Callback id used when no host callback is active.
    pub const NONE: CallbackId = CallbackId(-1);
}

// Display implementations -- just print the inner value.

impl fmt::Display for EventTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ContextTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for IdentityTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for BodyCounterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
