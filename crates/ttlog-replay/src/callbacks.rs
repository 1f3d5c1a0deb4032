//! Pending host-callback registry.
//!
//! Callback actions schedule or cancel host callbacks (timers, promise jobs).
//! The registry tracks which callbacks are pending so that a later root call
//! driven by a callback can be correlated with the operation that scheduled
//! it. Cancelling voids a pending callback; it never counts as an invocation.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use ttlog_core::{CallbackId, EventTime, IdentityTag};

use crate::action::CallbackOp;

/// A scheduled callback that has not yet run (or is repeating).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingCallback {
    pub id: CallbackId,
    pub function: IdentityTag,
    pub repeating: bool,
    pub scheduled_at: EventTime,
    /// The callback that was running when this one was scheduled.
    pub scheduled_by: CallbackId,
}

/// Pending callbacks keyed by id, in scheduling order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallbackRegistry {
    pending: IndexMap<CallbackId, PendingCallback>,
    invocations: u64,
    cancellations: u64,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a replayed callback action.
    pub fn apply(&mut self, time: EventTime, op: &CallbackOp) {
        if op.is_cancel {
            self.cancel(time, op.callback_id);
        } else {
            self.schedule(PendingCallback {
                id: op.callback_id,
                function: op.function,
                repeating: op.is_repeating,
                scheduled_at: time,
                scheduled_by: op.current_callback,
            });
        }
    }

    pub fn schedule(&mut self, callback: PendingCallback) {
        tracing::trace!(id = %callback.id, at = %callback.scheduled_at, "callback scheduled");
        self.pending.insert(callback.id, callback);
    }

    /// Voids the pending callback `id`. Returns whether it was pending.
    ///
    /// Cancelling an unknown id is a no-op; hosts cancel callbacks that have
    /// already run.
    pub fn cancel(&mut self, time: EventTime, id: CallbackId) -> bool {
        match self.pending.shift_remove(&id) {
            Some(_) => {
                self.cancellations += 1;
                tracing::trace!(%id, %time, "callback cancelled");
                true
            }
            None => {
                tracing::warn!(%id, %time, "cancel of a callback that is not pending");
                false
            }
        }
    }

    /// Records that a root call was driven by callback `id`.
    ///
    /// A non-repeating callback is retired; a repeating one stays pending.
    pub fn on_root_call(&mut self, time: EventTime, id: CallbackId) -> Option<PendingCallback> {
        if id == CallbackId::NONE {
            return None;
        }
        let repeating = match self.pending.get(&id) {
            Some(callback) => callback.repeating,
            None => {
                tracing::debug!(%id, %time, "root call for an unscheduled callback");
                return None;
            }
        };
        self.invocations += 1;
        if repeating {
            self.pending.get(&id).cloned()
        } else {
            self.pending.shift_remove(&id)
        }
    }

    pub fn get(&self, id: CallbackId) -> Option<&PendingCallback> {
        self.pending.get(&id)
    }

    pub fn is_pending(&self, id: CallbackId) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn pending(&self) -> impl Iterator<Item = &PendingCallback> {
        self.pending.values()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Root calls correlated with a pending callback.
    pub fn invocations(&self) -> u64 {
        self.invocations
    }

    pub fn cancellations(&self) -> u64 {
        self.cancellations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(id: i64, repeating: bool) -> PendingCallback {
        PendingCallback {
            id: CallbackId(id),
            function: IdentityTag(1),
            repeating,
            scheduled_at: EventTime(1),
            scheduled_by: CallbackId::NONE,
        }
    }

    #[test]
    fn cancel_voids_without_invoking() {
        let mut reg = CallbackRegistry::new();
        reg.schedule(pending(4, false));
        assert!(reg.cancel(EventTime(2), CallbackId(4)));
        assert!(!reg.is_pending(CallbackId(4)));
        assert_eq!(reg.invocations(), 0);
        assert_eq!(reg.cancellations(), 1);
        // The cancelled id no longer correlates with root calls.
        assert!(reg.on_root_call(EventTime(3), CallbackId(4)).is_none());
        assert_eq!(reg.invocations(), 0);
    }

    #[test]
    fn cancel_unknown_is_noop() {
        let mut reg = CallbackRegistry::new();
        assert!(!reg.cancel(EventTime(1), CallbackId(9)));
        assert!(reg.is_empty());
    }

    #[test]
    fn root_call_retires_one_shot_but_keeps_repeating() {
        let mut reg = CallbackRegistry::new();
        reg.schedule(pending(1, false));
        reg.schedule(pending(2, true));
        assert!(reg.on_root_call(EventTime(5), CallbackId(1)).is_some());
        assert!(reg.on_root_call(EventTime(6), CallbackId(2)).is_some());
        assert!(!reg.is_pending(CallbackId(1)));
        assert!(reg.is_pending(CallbackId(2)));
        assert_eq!(reg.invocations(), 2);
    }
}
