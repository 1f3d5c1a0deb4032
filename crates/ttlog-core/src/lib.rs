//! Core data model for the ttlog action-event log.
//!
//! # Modules
//!
//! - [`id`]: EventTime, ContextTag, IdentityTag and the other id newtypes
//! - [`kind`]: the closed [`ActionKind`] discriminator set
//! - [`value`]: [`Value`] and its compact [`ArgRetValue`] encoding
//! - [`tags`]: the run-scoped [`IdentityTagTable`]
//! - [`error`]: [`CoreError`]

pub mod error;
pub mod id;
pub mod kind;
pub mod tags;
pub mod value;

// Re-export commonly used types
pub use error::CoreError;
pub use id::{BodyCounterId, CallbackId, ContextTag, DocumentId, EventTime, IdentityTag, PropertyId};
pub use kind::ActionKind;
pub use tags::{IdentityTagTable, FIRST_TAG};
pub use value::{ArgRetValue, Value};
