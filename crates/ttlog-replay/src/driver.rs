//! The replay driver.
//!
//! [`ReplayDriver`] walks a parsed [`ActionArena`] in log order and executes
//! each action against a [`ReplaySession`]. It can single-step, run to the
//! end of the log, or run up to a target event time. When running, a root
//! call whose checkpoint is cached and whose matching call-end does not pass
//! the target is skipped by restoring the checkpoint instead of re-executing
//! the actions it covers.
//!
//! The driver is single-threaded. An [`AbortHandle`] may be signalled from
//! another thread; it is observed between actions only.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ttlog_core::{ActionKind, EventTime};

use crate::action::{ActionEvent, ActionPayload};
use crate::arena::ActionArena;
use crate::checkpoint;
use crate::error::ReplayError;
use crate::runtime::Runtime;
use crate::session::ReplaySession;

/// Where the driver is between calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// No call is open.
    Idle,
    /// An action is executing.
    RunningAction,
    /// A call-begin has executed and its call-end has not.
    AwaitingCallMatch,
    /// A terminal error occurred; every later request fails.
    Faulted,
}

/// Result of one driver step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Executed { time: EventTime, kind: ActionKind },
    /// A root call was skipped by restoring its checkpoint.
    FastForwarded { from: EventTime, to: EventTime },
}

/// Cross-thread abort signal, checked between actions.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clears the signal so replay can continue.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Executes a log against one session.
pub struct ReplayDriver<'a, R: Runtime> {
    log: &'a ActionArena,
    session: ReplaySession<R>,
    cursor: usize,
    state: DriverState,
    last_time: Option<EventTime>,
    abort: AbortHandle,
}

impl<'a, R: Runtime> ReplayDriver<'a, R> {
    pub fn new(log: &'a ActionArena, session: ReplaySession<R>) -> Self {
        ReplayDriver {
            log,
            session,
            cursor: 0,
            state: DriverState::Idle,
            last_time: None,
            abort: AbortHandle::new(),
        }
    }

    /// A handle that aborts this driver before its next action.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn session(&self) -> &ReplaySession<R> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut ReplaySession<R> {
        &mut self.session
    }

    pub fn into_session(self) -> ReplaySession<R> {
        self.session
    }

    /// Index of the next action to execute.
    pub fn position(&self) -> usize {
        self.cursor
    }

    pub fn next_action(&self) -> Option<&'a ActionEvent> {
        self.log.get(self.cursor)
    }

    /// Time of the last action executed or skipped.
    pub fn last_time(&self) -> Option<EventTime> {
        self.last_time
    }

    // -------------------------------------------------------------------
    // Entry points
    // -------------------------------------------------------------------

    /// Executes exactly one action. Never fast-forwards.
    ///
    /// Returns `None` at the end of the log.
    pub fn step(&mut self) -> Result<Option<Step>, ReplayError> {
        self.advance(None)
    }

    /// Advances by one action, or by one whole root call when its cached
    /// checkpoint ends at or before `target`.
    pub fn step_toward(&mut self, target: EventTime) -> Result<Option<Step>, ReplayError> {
        self.advance(Some(target))
    }

    /// Runs to the end of the log.
    ///
    /// Stops early on any error. After an uncaught exception the driver is
    /// still usable and `run` may be called again to continue.
    pub fn run(&mut self) -> Result<(), ReplayError> {
        let target = self.log.iter().last().map_or(EventTime(0), |e| e.time);
        while self.advance(Some(target))?.is_some() {}
        Ok(())
    }

    /// Runs every action with an event time at or before `target`.
    pub fn run_until(&mut self, target: EventTime) -> Result<(), ReplayError> {
        loop {
            if self.next_action().is_some_and(|e| e.time > target) {
                return Ok(());
            }
            if self.advance(Some(target))?.is_none() {
                return Ok(());
            }
        }
    }

    // -------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------

    fn fault(&mut self, err: ReplayError) -> ReplayError {
        tracing::error!(error = %err, "replay faulted");
        self.state = DriverState::Faulted;
        err
    }

    fn settle(&mut self) {
        self.state = if self.session.call_stack().is_empty() {
            DriverState::Idle
        } else {
            DriverState::AwaitingCallMatch
        };
    }

    fn advance(&mut self, fast_forward_to: Option<EventTime>) -> Result<Option<Step>, ReplayError> {
        if self.state == DriverState::Faulted {
            return Err(ReplayError::Faulted);
        }
        if self.abort.is_aborted() {
            let next = self.next_action().map(|e| e.time);
            tracing::info!(?next, "replay aborted");
            return Err(ReplayError::Aborted { next });
        }

        let log = self.log;
        let Some(event) = log.get(self.cursor) else {
            if let Some(frame) = self.session.call_stack().outermost() {
                let begin = frame.begin;
                return Err(self.fault(ReplayError::TruncatedLog { begin }));
            }
            return Ok(None);
        };

        if let Some(previous) = self.last_time {
            if event.time <= previous {
                return Err(self.fault(ReplayError::OutOfOrder {
                    previous,
                    time: event.time,
                }));
            }
        }

        if let Some(target) = fast_forward_to {
            if let Some(step) = self.try_fast_forward(event, target)? {
                return Ok(Some(step));
            }
        }

        self.state = DriverState::RunningAction;
        let result = event.execute(&mut self.session);
        self.cursor += 1;
        self.last_time = Some(event.time);

        if event.is_root_call_end() && self.session.config().capture_root_checkpoints {
            if let Ok(()) | Err(ReplayError::UncaughtException { .. }) = &result {
                self.capture_root_checkpoint(event);
            }
        }

        match result {
            Ok(()) => {
                self.settle();
                Ok(Some(Step::Executed {
                    time: event.time,
                    kind: event.kind(),
                }))
            }
            Err(err) if err.is_terminal() => Err(self.fault(err)),
            Err(err) => {
                self.settle();
                Err(err)
            }
        }
    }

    fn capture_root_checkpoint(&self, end_event: &ActionEvent) {
        let ActionPayload::CallEnd(end) = &end_event.payload else {
            return;
        };
        let Some(begin) = self
            .log
            .index_of(end.matching_begin)
            .and_then(|idx| self.log.get(idx))
            .and_then(ActionEvent::as_call_begin)
        else {
            return;
        };
        if begin.checkpoint.is_set() {
            return;
        }
        if let Some(cp) = self.session.capture_checkpoint(end_event.time) {
            checkpoint::attach(&begin.checkpoint, cp);
            tracing::debug!(begin = %end.matching_begin, end = %end_event.time, "captured root checkpoint");
        }
    }

    /// Restores the cached checkpoint of the root call starting at `event`
    /// if its call-end does not pass `target`.
    fn try_fast_forward(
        &mut self,
        event: &'a ActionEvent,
        target: EventTime,
    ) -> Result<Option<Step>, ReplayError> {
        if !self.session.config().fast_forward {
            return Ok(None);
        }
        let Some(begin) = event.as_call_begin().filter(|b| b.depth == 0) else {
            return Ok(None);
        };
        let Some((end_idx, end_event)) = self.log.matching_end(event.time) else {
            return Ok(None);
        };
        let Some(end) = end_event.as_call_end() else {
            return Ok(None);
        };
        if end_event.time > target {
            return Ok(None);
        }
        let Some(cp) = checkpoint::cached::<R::Handle, R::Snapshot>(&begin.checkpoint) else {
            return Ok(None);
        };
        if cp.resume_after != end_event.time {
            return Ok(None);
        }

        if let Err(fault) = self.session.restore_checkpoint(cp) {
            return Err(self.fault(ReplayError::ExecutionFailure {
                time: event.time,
                kind: ActionKind::CallBegin,
                fault,
            }));
        }
        self.session
            .record_fast_forward(event.time, begin, end_event.time);
        self.cursor = end_idx + 1;
        self.last_time = Some(end_event.time);
        self.state = DriverState::Idle;
        tracing::debug!(from = %event.time, to = %end_event.time, "fast-forwarded root call");

        if end.raised() {
            return Err(ReplayError::UncaughtException {
                root: event.time,
                end: end_event.time,
                terminating: end.has_terminating_exception,
            });
        }
        Ok(Some(Step::FastForwarded {
            from: event.time,
            to: end_event.time,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abort_handle_is_shared() {
        let handle = AbortHandle::new();
        let other = handle.clone();
        other.abort();
        assert!(handle.is_aborted());
        handle.reset();
        assert!(!other.is_aborted());
    }

    #[test]
    fn abort_is_visible_across_threads() {
        let handle = AbortHandle::new();
        let remote = handle.clone();
        std::thread::spawn(move || remote.abort()).join().unwrap();
        assert!(handle.is_aborted());
    }
}
