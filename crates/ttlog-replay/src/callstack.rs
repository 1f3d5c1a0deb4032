//! Replay call-stack bookkeeping.
//!
//! Calls are modelled as synchronous nested invocations: a call-begin
//! resolves its callee and arguments and pushes a [`CallFrame`]; the actions
//! the call performed follow in the log and replay while the frame is open,
//! nested calls included; the matching call-end pops the frame and completes
//! the invocation. Begin/end pairs nest LIFO and are matched by the begin's
//! event time.

use std::collections::BTreeMap;

use ttlog_core::{CallbackId, EventTime, IdentityTag, Value};

use crate::error::ReplayError;

/// One in-flight call.
#[derive(Debug, Clone)]
pub struct CallFrame<H> {
    pub begin: EventTime,
    pub depth: u32,
    pub function: IdentityTag,
    pub host_callback_id: CallbackId,
    /// The resolved function, invoked when the frame is popped.
    pub callee: H,
    pub args: Vec<Value<H>>,
}

/// Nesting state of the current root call.
#[derive(Debug, Clone)]
pub struct CallStack<H> {
    frames: Vec<CallFrame<H>>,
    /// Call-begin time -> matching call-end time, for completed calls.
    matched: BTreeMap<EventTime, EventTime>,
    root: Option<EventTime>,
    root_callback: CallbackId,
}

impl<H> CallStack<H> {
    pub fn new() -> Self {
        CallStack {
            frames: Vec::new(),
            matched: BTreeMap::new(),
            root: None,
            root_callback: CallbackId::NONE,
        }
    }

    /// Number of open frames.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// The outermost open call, if any.
    pub fn outermost(&self) -> Option<&CallFrame<H>> {
        self.frames.first()
    }

    pub fn innermost(&self) -> Option<&CallFrame<H>> {
        self.frames.last()
    }

    /// Begin time of the most recent root call.
    pub fn current_root(&self) -> Option<EventTime> {
        self.root
    }

    /// Host callback driving the most recent root call.
    pub fn root_callback(&self) -> CallbackId {
        self.root_callback
    }

    /// Starts a new root call.
    pub fn reset_for_root(&mut self, begin: EventTime, host_callback_id: CallbackId) {
        self.frames.clear();
        self.root = Some(begin);
        self.root_callback = host_callback_id;
    }

    pub fn push(&mut self, frame: CallFrame<H>) {
        self.frames.push(frame);
    }

    /// Pops the innermost frame for the call-end at `time`.
    ///
    /// The frame must be the one begun at `matching` and have the call-end's
    /// `depth`.
    pub fn pop_matching(
        &mut self,
        time: EventTime,
        matching: EventTime,
        depth: u32,
    ) -> Result<CallFrame<H>, ReplayError> {
        let open = self.frames.last().map(|f| f.begin);
        if open != Some(matching) || matching >= time {
            return Err(ReplayError::CallMismatch {
                time,
                matching,
                open,
            });
        }
        let Some(frame) = self.frames.pop() else {
            return Err(ReplayError::CallMismatch {
                time,
                matching,
                open,
            });
        };
        if frame.depth != depth {
            return Err(ReplayError::DepthMismatch {
                time,
                recorded: depth,
                actual: frame.depth,
            });
        }
        self.matched.insert(matching, time);
        Ok(frame)
    }

    /// Records a begin/end pair completed without replaying it.
    pub fn record_match(&mut self, begin: EventTime, end: EventTime) {
        self.matched.insert(begin, end);
    }

    /// The call-end time matched to the call begun at `begin`.
    pub fn matching_end(&self, begin: EventTime) -> Option<EventTime> {
        self.matched.get(&begin).copied()
    }

    /// Drops all frames, e.g. after restoring a checkpoint.
    pub fn clear_frames(&mut self) {
        self.frames.clear();
    }
}

impl<H> Default for CallStack<H> {
    fn default() -> Self {
        Self::new()
    }
}
