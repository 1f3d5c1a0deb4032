//! Root-call checkpoints for fast-forward.
//!
//! After a root call-end executes, a session can capture a
//! [`SessionCheckpoint`]: the runtime's opaque snapshot plus the identity tag
//! table and callback registry at that point. The checkpoint is attached to
//! the matching root call-begin through a [`CheckpointCell`]. A later replay
//! over the same log may restore it instead of re-executing the call.
//!
//! The cell is type-erased so action payloads stay independent of the
//! runtime type; [`cached`] recovers the typed checkpoint.

use std::any::Any;
use std::rc::Rc;

use ttlog_core::{EventTime, IdentityTagTable};

use crate::cache::CacheCell;
use crate::callbacks::CallbackRegistry;
use crate::runtime::Thrown;

/// Set-once slot on a root call-begin holding a type-erased checkpoint.
pub type CheckpointCell = CacheCell<Rc<dyn Any>>;

/// Session state right after a root call-end.
#[derive(Debug, Clone)]
pub struct SessionCheckpoint<H, S> {
    pub snapshot: S,
    pub tags: IdentityTagTable<H>,
    pub callbacks: CallbackRegistry,
    pub pending_exception: Option<Thrown<H>>,
    /// Event time of the call-end the checkpoint was taken after.
    pub resume_after: EventTime,
}

/// Attaches `checkpoint` to `cell` unless one is already attached.
pub fn attach<H: 'static, S: 'static>(
    cell: &CheckpointCell,
    checkpoint: SessionCheckpoint<H, S>,
) -> bool {
    cell.set(Rc::new(checkpoint))
}

/// The checkpoint attached to `cell`, if it was captured by a session with
/// the same handle and snapshot types.
pub fn cached<H: 'static, S: 'static>(cell: &CheckpointCell) -> Option<&SessionCheckpoint<H, S>> {
    cell.get()
        .and_then(|rc| rc.downcast_ref::<SessionCheckpoint<H, S>>())
}
