//! Replay session state.
//!
//! A [`ReplaySession`] owns everything one replay run mutates: the live
//! runtime, the run-scoped identity tag table, the call stack, the callback
//! registry and the exception most recently raised by a replayed call. It is
//! never shared between runs; independent replays need independent sessions.

use ttlog_core::{ActionKind, ArgRetValue, ContextTag, EventTime, IdentityTag, IdentityTagTable, Value};

use crate::action::{CallBegin, CallEnd};
use crate::callbacks::CallbackRegistry;
use crate::callstack::{CallFrame, CallStack};
use crate::checkpoint::SessionCheckpoint;
use crate::config::ReplayConfig;
use crate::error::ReplayError;
use crate::runtime::{Runtime, RuntimeFault, Thrown};

/// Typed checkpoint of a session over runtime `R`.
pub type Checkpoint<R> = SessionCheckpoint<<R as Runtime>::Handle, <R as Runtime>::Snapshot>;

/// State of one replay run against a live runtime.
pub struct ReplaySession<R: Runtime> {
    runtime: R,
    config: ReplayConfig,
    tags: IdentityTagTable<R::Handle>,
    call_stack: CallStack<R::Handle>,
    callbacks: CallbackRegistry,
    pending_exception: Option<Thrown<R::Handle>>,
    current_ctx: Option<ContextTag>,
}

impl<R: Runtime> ReplaySession<R> {
    pub fn new(runtime: R, config: ReplayConfig) -> Self {
        ReplaySession {
            runtime,
            config,
            tags: IdentityTagTable::new(),
            call_stack: CallStack::new(),
            callbacks: CallbackRegistry::new(),
            pending_exception: None,
            current_ctx: None,
        }
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn runtime_mut(&mut self) -> &mut R {
        &mut self.runtime
    }

    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    pub fn tags(&self) -> &IdentityTagTable<R::Handle> {
        &self.tags
    }

    pub fn call_stack(&self) -> &CallStack<R::Handle> {
        &self.call_stack
    }

    pub fn callbacks(&self) -> &CallbackRegistry {
        &self.callbacks
    }

    pub(crate) fn callbacks_mut(&mut self) -> &mut CallbackRegistry {
        &mut self.callbacks
    }

    /// The exception raised by the most recent replayed call, not yet
    /// retrieved by a get-and-clear-exception action.
    pub fn pending_exception(&self) -> Option<&Thrown<R::Handle>> {
        self.pending_exception.as_ref()
    }

    pub(crate) fn take_pending_exception(&mut self) -> Option<Thrown<R::Handle>> {
        self.pending_exception.take()
    }

    pub(crate) fn set_pending_exception(&mut self, thrown: Thrown<R::Handle>) {
        self.pending_exception = Some(thrown);
    }

    /// Tears the session down, clearing the tag table and returning the
    /// runtime.
    pub fn into_runtime(mut self) -> R {
        self.tags.clear();
        self.runtime
    }

    // -------------------------------------------------------------------
    // Value plumbing used by action execution
    // -------------------------------------------------------------------

    /// Switches the runtime to `ctx` if it is not already current.
    pub(crate) fn enter_context(&mut self, time: EventTime, ctx: ContextTag) -> Result<(), ReplayError> {
        if self.current_ctx == Some(ctx) {
            return Ok(());
        }
        self.runtime
            .enter_context(ctx)
            .map_err(|fault| ReplayError::UnknownContext { time, ctx, fault })?;
        self.current_ctx = Some(ctx);
        Ok(())
    }

    pub(crate) fn value(&self, time: EventTime, value: &ArgRetValue) -> Result<Value<R::Handle>, ReplayError> {
        value
            .decode(&self.tags)
            .map_err(|e| ReplayError::from_core(time, e))
    }

    /// Decodes an operation target, which must be an object.
    pub(crate) fn object(
        &self,
        time: EventTime,
        kind: ActionKind,
        value: &ArgRetValue,
    ) -> Result<R::Handle, ReplayError> {
        match self.value(time, value)? {
            Value::Object(handle) => Ok(handle),
            other => Err(ReplayError::ExecutionFailure {
                time,
                kind,
                fault: RuntimeFault::new(format!("expected an object, found {}", other.type_name())),
            }),
        }
    }

    pub(crate) fn resolve(&self, time: EventTime, tag: IdentityTag) -> Result<R::Handle, ReplayError> {
        self.tags
            .resolve(tag)
            .cloned()
            .map_err(|e| ReplayError::from_core(time, e))
    }

    /// Tags `value` if it is a complex value not seen before.
    pub(crate) fn track(&mut self, value: &Value<R::Handle>) -> Option<IdentityTag> {
        value.as_object().map(|h| self.track_handle(h.clone()))
    }

    pub(crate) fn track_handle(&mut self, handle: R::Handle) -> IdentityTag {
        let tag = self.tags.track(handle);
        tracing::trace!(%tag, "tagged value");
        tag
    }

    // -------------------------------------------------------------------
    // Calls
    // -------------------------------------------------------------------

    /// Resolves the call named by a call-begin and pushes its frame.
    ///
    /// The runtime is not invoked yet: the actions the call performed,
    /// nested calls included, replay first so their effects land in
    /// recorded order.
    pub(crate) fn begin_call(&mut self, time: EventTime, begin: &CallBegin) -> Result<(), ReplayError> {
        let actual = self.call_stack.depth();
        if begin.depth as usize != actual {
            return Err(ReplayError::DepthMismatch {
                time,
                recorded: begin.depth,
                actual: actual as u32,
            });
        }
        if actual >= self.config.max_call_depth {
            return Err(ReplayError::CallDepthExceeded {
                time,
                limit: self.config.max_call_depth,
            });
        }
        if begin.depth == 0 {
            self.call_stack.reset_for_root(time, begin.host_callback_id);
            self.callbacks.on_root_call(time, begin.host_callback_id);
        }

        let callee = self.resolve(time, begin.function)?;
        let args = begin
            .args
            .iter()
            .map(|a| self.value(time, a))
            .collect::<Result<Vec<Value<R::Handle>>, _>>()?;

        tracing::trace!(%time, depth = begin.depth, function = %begin.function, "entered call");
        self.call_stack.push(CallFrame {
            begin: time,
            depth: begin.depth,
            function: begin.function,
            host_callback_id: begin.host_callback_id,
            callee,
            args,
        });
        Ok(())
    }

    /// Pops the frame matched by a call-end, completes the invocation and
    /// applies its outcome.
    ///
    /// A root call-end whose recorded flags report an exception fails with
    /// [`ReplayError::UncaughtException`] once its bookkeeping is complete.
    pub(crate) fn end_call(&mut self, time: EventTime, end: &CallEnd) -> Result<(), ReplayError> {
        let frame = self.call_stack.pop_matching(time, end.matching_begin, end.depth)?;

        let outcome = self.runtime.call(&frame.callee, &frame.args);
        tracing::debug!(
            %time,
            begin = %frame.begin,
            depth = frame.depth,
            function = %frame.function,
            raised = outcome.is_err(),
            "replayed call"
        );
        let replayed = match outcome {
            Ok(value) => {
                self.track(&value);
                false
            }
            Err(thrown) => {
                self.pending_exception = Some(thrown);
                true
            }
        };

        if end.depth == 0 {
            if let Some(position) = self.runtime.last_executed_statement() {
                end.last_statement.set(position);
            }
        }

        let recorded = end.raised();
        if recorded != replayed {
            if self.config.verify_exception_flags {
                return Err(ReplayError::ExceptionDivergence {
                    time,
                    recorded,
                    replayed,
                });
            }
            tracing::warn!(%time, recorded, replayed, "replayed call outcome differs from recording");
        }

        if end.depth == 0 && recorded {
            return Err(ReplayError::UncaughtException {
                root: frame.begin,
                end: time,
                terminating: end.has_terminating_exception,
            });
        }
        Ok(())
    }

    // -------------------------------------------------------------------
    // Checkpoints
    // -------------------------------------------------------------------

    /// Captures the session state, or `None` if the runtime cannot snapshot.
    pub fn capture_checkpoint(&self, resume_after: EventTime) -> Option<Checkpoint<R>> {
        let snapshot = self.runtime.capture()?;
        Some(SessionCheckpoint {
            snapshot,
            tags: self.tags.clone(),
            callbacks: self.callbacks.clone(),
            pending_exception: self.pending_exception.clone(),
            resume_after,
        })
    }

    /// Restores a checkpoint captured by a session over the same log.
    pub fn restore_checkpoint(&mut self, checkpoint: &Checkpoint<R>) -> Result<(), RuntimeFault> {
        self.runtime.restore(&checkpoint.snapshot)?;
        self.tags = checkpoint.tags.clone();
        self.callbacks = checkpoint.callbacks.clone();
        self.pending_exception = checkpoint.pending_exception.clone();
        self.call_stack.clear_frames();
        self.current_ctx = None;
        Ok(())
    }

    /// Bookkeeping for a root call skipped by restoring a checkpoint.
    pub(crate) fn record_fast_forward(&mut self, begin: EventTime, call: &CallBegin, end: EventTime) {
        self.call_stack.reset_for_root(begin, call.host_callback_id);
        self.call_stack.record_match(begin, end);
    }
}
