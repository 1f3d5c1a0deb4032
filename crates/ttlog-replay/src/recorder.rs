//! Recording actions from a live runtime.
//!
//! The host calls one `record_*` method per embedding-API operation after
//! the operation has completed, passing the values it observed. The
//! recorder assigns event times, encodes inputs through its identity tag
//! table and then tags complex outputs. Inputs are always encoded before
//! outputs are tagged; replay follows the same order, which is what keeps
//! tags stable between the two runs.

use std::hash::Hash;

use ttlog_core::{
    ActionKind, ArgRetValue, CallbackId, ContextTag, CoreError, EventTime, IdentityTag,
    IdentityTagTable, PropertyId, Value,
};

use crate::action::{
    ActionEvent, ActionPayload, CallArgs, CallBegin, CallDiagnostics, CallEnd, CallbackOp,
    CodeLoad,
};
use crate::arena::ActionArena;
use crate::cache::CacheCell;
use crate::checkpoint::CheckpointCell;
use crate::config::RecorderConfig;
use crate::error::RecordError;
use crate::runtime::{CallOutcome, RuntimeFault};

/// Builds an action log for one recording session.
#[derive(Debug)]
pub struct Recorder<H> {
    config: RecorderConfig,
    /// `None` once the clock has reached `i64::MAX`.
    next_time: Option<EventTime>,
    last_time: Option<EventTime>,
    tags: IdentityTagTable<H>,
    /// Begin times of calls without a call-end yet, outermost first.
    open_calls: Vec<EventTime>,
    log: ActionArena,
}

impl<H: Clone + Eq + Hash> Recorder<H> {
    pub fn new(config: RecorderConfig) -> Self {
        Recorder {
            config,
            next_time: Some(EventTime(1)),
            last_time: None,
            tags: IdentityTagTable::new(),
            open_calls: Vec::new(),
            log: ActionArena::new(),
        }
    }

    pub fn tags(&self) -> &IdentityTagTable<H> {
        &self.tags
    }

    pub fn log(&self) -> &ActionArena {
        &self.log
    }

    /// Finishes recording, returning the log.
    pub fn into_log(self) -> ActionArena {
        if !self.open_calls.is_empty() {
            tracing::warn!(open = self.open_calls.len(), "recording finished with open calls");
        }
        self.log
    }

    /// The time the next recorded action will receive, or `None` when the
    /// clock is exhausted.
    pub fn next_time(&self) -> Option<EventTime> {
        self.next_time
    }

    /// Number of calls begun but not yet ended.
    pub fn call_depth(&self) -> usize {
        self.open_calls.len()
    }

    /// Appends an already-built action.
    ///
    /// Its time must be strictly greater than every time recorded so far;
    /// later recorded actions continue from it.
    pub fn append_action(&mut self, event: ActionEvent) -> Result<EventTime, RecordError> {
        if let Some(previous) = self.last_time {
            if event.time <= previous {
                return Err(RecordError::OutOfOrder {
                    previous,
                    time: event.time,
                });
            }
        }
        match &event.payload {
            ActionPayload::CallBegin(_) => self.open_calls.push(event.time),
            ActionPayload::CallEnd(end) => {
                if self.open_calls.last() != Some(&end.matching_begin) {
                    return Err(RecordError::CallMismatch {
                        matching: end.matching_begin,
                        open: self.open_calls.last().copied(),
                    });
                }
                self.open_calls.pop();
            }
            _ => {}
        }
        Ok(self.commit(event))
    }

    // -------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------

    fn commit(&mut self, event: ActionEvent) -> EventTime {
        let time = event.time;
        tracing::trace!(%time, kind = %event.kind(), "recorded action");
        self.log.push(event);
        self.last_time = Some(time);
        self.next_time = time.next().ok();
        time
    }

    fn push(&mut self, ctx: ContextTag, payload: ActionPayload) -> Result<EventTime, RecordError> {
        let time = self.next_time.ok_or(RecordError::ClockExhausted)?;
        Ok(self.commit(ActionEvent::new(time, ctx, payload)))
    }

    fn encode(&self, kind: ActionKind, value: &Value<H>) -> Result<ArgRetValue, RecordError> {
        ArgRetValue::encode(value, &self.tags).map_err(|e| match e {
            CoreError::UntaggedValue => RecordError::UntaggedValue { kind },
            other => RecordError::RecordingFailure {
                kind,
                fault: RuntimeFault::new(other.to_string()),
            },
        })
    }

    fn encode_handle(&self, kind: ActionKind, handle: &H) -> Result<ArgRetValue, RecordError> {
        self.tag_of(kind, handle).map(ArgRetValue::Tagged)
    }

    fn tag_of(&self, kind: ActionKind, handle: &H) -> Result<IdentityTag, RecordError> {
        self.tags
            .tag_of(handle)
            .ok_or(RecordError::UntaggedValue { kind })
    }

    fn encode_args(&self, kind: ActionKind, args: &[Value<H>]) -> Result<CallArgs, RecordError> {
        args.iter().map(|a| self.encode(kind, a)).collect()
    }

    fn track(&mut self, value: &Value<H>) {
        if let Some(handle) = value.as_object() {
            self.tags.track(handle.clone());
        }
    }

    // -------------------------------------------------------------------
    // Allocation
    // -------------------------------------------------------------------

    pub fn record_convert_to_object(
        &mut self,
        ctx: ContextTag,
        value: &Value<H>,
        result: &Value<H>,
    ) -> Result<EventTime, RecordError> {
        let value = self.encode(ActionKind::ConvertToObject, value)?;
        let time = self.push(ctx, ActionPayload::ConvertToObject { value })?;
        self.track(result);
        Ok(time)
    }

    /// Symbols are not tagged; replay recreates them on demand.
    pub fn record_create_symbol(
        &mut self,
        ctx: ContextTag,
        description: &Value<H>,
    ) -> Result<EventTime, RecordError> {
        let description = self.encode(ActionKind::CreateSymbol, description)?;
        self.push(ctx, ActionPayload::CreateSymbol { description })
    }

    pub fn record_allocate_object(
        &mut self,
        ctx: ContextTag,
        regular: bool,
        object: &H,
    ) -> Result<EventTime, RecordError> {
        let time = self.push(ctx, ActionPayload::AllocateObject { regular })?;
        self.tags.track(object.clone());
        Ok(time)
    }

    pub fn record_allocate_array(
        &mut self,
        ctx: ContextTag,
        length: u32,
        array: &H,
    ) -> Result<EventTime, RecordError> {
        let time = self.push(ctx, ActionPayload::AllocateArray { length })?;
        self.tags.track(array.clone());
        Ok(time)
    }

    pub fn record_allocate_array_buffer(
        &mut self,
        ctx: ContextTag,
        bytes: &[u8],
        buffer: &H,
    ) -> Result<EventTime, RecordError> {
        let time = self.push(
            ctx,
            ActionPayload::AllocateArrayBuffer {
                bytes: bytes.into(),
            },
        )?;
        self.tags.track(buffer.clone());
        Ok(time)
    }

    pub fn record_allocate_function(
        &mut self,
        ctx: ContextTag,
        name: Option<&Value<H>>,
        function: &H,
    ) -> Result<EventTime, RecordError> {
        let name = name
            .map(|n| self.encode(ActionKind::AllocateFunction, n))
            .transpose()?;
        let time = self.push(ctx, ActionPayload::AllocateFunction { name })?;
        self.tags.track(function.clone());
        Ok(time)
    }

    /// Records retrieval of the pending script exception.
    ///
    /// A failed retrieval is reported as [`RecordError::RecordingFailure`]
    /// and nothing is appended.
    pub fn record_get_and_clear_exception(
        &mut self,
        ctx: ContextTag,
        exception: Result<Option<Value<H>>, RuntimeFault>,
    ) -> Result<EventTime, RecordError> {
        let exception = exception.map_err(|fault| RecordError::RecordingFailure {
            kind: ActionKind::GetAndClearException,
            fault,
        })?;
        let time = self.push(ctx, ActionPayload::GetAndClearException)?;
        if let Some(value) = &exception {
            self.track(value);
        }
        Ok(time)
    }

    // -------------------------------------------------------------------
    // Property and index access
    // -------------------------------------------------------------------

    pub fn record_get_property(
        &mut self,
        ctx: ContextTag,
        object: &H,
        property: PropertyId,
        result: &Value<H>,
    ) -> Result<EventTime, RecordError> {
        let object = self.encode_handle(ActionKind::GetProperty, object)?;
        let time = self.push(ctx, ActionPayload::GetProperty { property, object })?;
        self.track(result);
        Ok(time)
    }

    pub fn record_get_index(
        &mut self,
        ctx: ContextTag,
        object: &H,
        index: &Value<H>,
        result: &Value<H>,
    ) -> Result<EventTime, RecordError> {
        let object = self.encode_handle(ActionKind::GetIndex, object)?;
        let index = self.encode(ActionKind::GetIndex, index)?;
        let time = self.push(ctx, ActionPayload::GetIndex { index, object })?;
        self.track(result);
        Ok(time)
    }

    pub fn record_get_own_property_info(
        &mut self,
        ctx: ContextTag,
        object: &H,
        property: PropertyId,
        descriptor: &Value<H>,
    ) -> Result<EventTime, RecordError> {
        let object = self.encode_handle(ActionKind::GetOwnPropertyInfo, object)?;
        let time = self.push(ctx, ActionPayload::GetOwnPropertyInfo { property, object })?;
        self.track(descriptor);
        Ok(time)
    }

    pub fn record_get_own_properties_info(
        &mut self,
        ctx: ContextTag,
        object: &H,
        names: bool,
        keys: &H,
    ) -> Result<EventTime, RecordError> {
        let object = self.encode_handle(ActionKind::GetOwnPropertiesInfo, object)?;
        let time = self.push(ctx, ActionPayload::GetOwnPropertiesInfo { names, object })?;
        self.tags.track(keys.clone());
        Ok(time)
    }

    pub fn record_define_property(
        &mut self,
        ctx: ContextTag,
        object: &H,
        property: PropertyId,
        descriptor: &Value<H>,
    ) -> Result<EventTime, RecordError> {
        let kind = ActionKind::DefineProperty;
        let object = self.encode_handle(kind, object)?;
        let descriptor = self.encode(kind, descriptor)?;
        self.push(
            ctx,
            ActionPayload::DefineProperty {
                object,
                property,
                descriptor,
            },
        )
    }

    pub fn record_delete_property(
        &mut self,
        ctx: ContextTag,
        object: &H,
        property: PropertyId,
        strict: bool,
        result: &Value<H>,
    ) -> Result<EventTime, RecordError> {
        let object = self.encode_handle(ActionKind::DeleteProperty, object)?;
        let time = self.push(
            ctx,
            ActionPayload::DeleteProperty {
                object,
                property,
                strict,
            },
        )?;
        self.track(result);
        Ok(time)
    }

    pub fn record_set_prototype(
        &mut self,
        ctx: ContextTag,
        object: &H,
        prototype: &Value<H>,
    ) -> Result<EventTime, RecordError> {
        let kind = ActionKind::SetPrototype;
        let object = self.encode_handle(kind, object)?;
        let prototype = self.encode(kind, prototype)?;
        self.push(ctx, ActionPayload::SetPrototype { object, prototype })
    }

    pub fn record_set_property(
        &mut self,
        ctx: ContextTag,
        object: &H,
        property: PropertyId,
        value: &Value<H>,
        strict: bool,
    ) -> Result<EventTime, RecordError> {
        let kind = ActionKind::SetProperty;
        let object = self.encode_handle(kind, object)?;
        let value = self.encode(kind, value)?;
        self.push(
            ctx,
            ActionPayload::SetProperty {
                object,
                property,
                value,
                strict,
            },
        )
    }

    pub fn record_set_index(
        &mut self,
        ctx: ContextTag,
        object: &H,
        index: &Value<H>,
        value: &Value<H>,
    ) -> Result<EventTime, RecordError> {
        let kind = ActionKind::SetIndex;
        let object = self.encode_handle(kind, object)?;
        let index = self.encode(kind, index)?;
        let value = self.encode(kind, value)?;
        self.push(
            ctx,
            ActionPayload::SetIndex {
                object,
                index,
                value,
            },
        )
    }

    /// `buffer` is the backing buffer when the host asked for it.
    pub fn record_get_typed_array_info(
        &mut self,
        ctx: ContextTag,
        object: &H,
        buffer: Option<&H>,
    ) -> Result<EventTime, RecordError> {
        let object = self.encode_handle(ActionKind::GetTypedArrayInfo, object)?;
        let time = self.push(
            ctx,
            ActionPayload::GetTypedArrayInfo {
                returns_buffer: buffer.is_some(),
                object,
            },
        )?;
        if let Some(buffer) = buffer {
            self.tags.track(buffer.clone());
        }
        Ok(time)
    }

    // -------------------------------------------------------------------
    // Invocation and scripts
    // -------------------------------------------------------------------

    /// A thrown construct leaves its exception to a following
    /// get-and-clear-exception action.
    pub fn record_construct_call(
        &mut self,
        ctx: ContextTag,
        function: &H,
        args: &[Value<H>],
        outcome: &CallOutcome<H>,
    ) -> Result<EventTime, RecordError> {
        let kind = ActionKind::ConstructCall;
        let function = self.tag_of(kind, function)?;
        let args = self.encode_args(kind, args)?;
        let time = self.push(ctx, ActionPayload::ConstructCall { function, args })?;
        if let Ok(result) = outcome {
            self.track(result);
        }
        Ok(time)
    }

    pub fn record_schedule_callback(
        &mut self,
        ctx: ContextTag,
        current_callback: CallbackId,
        function: &H,
        callback_id: CallbackId,
        repeating: bool,
    ) -> Result<EventTime, RecordError> {
        let function = self.tag_of(ActionKind::CallbackOp, function)?;
        self.push(
            ctx,
            ActionPayload::CallbackOp(CallbackOp {
                is_cancel: false,
                is_repeating: repeating,
                current_callback,
                function,
                callback_id,
                register_location: CacheCell::new(),
            }),
        )
    }

    pub fn record_cancel_callback(
        &mut self,
        ctx: ContextTag,
        current_callback: CallbackId,
        function: &H,
        callback_id: CallbackId,
    ) -> Result<EventTime, RecordError> {
        let function = self.tag_of(ActionKind::CallbackOp, function)?;
        self.push(
            ctx,
            ActionPayload::CallbackOp(CallbackOp {
                is_cancel: true,
                is_repeating: false,
                current_callback,
                function,
                callback_id,
                register_location: CacheCell::new(),
            }),
        )
    }

    /// Records a loaded script; `function` is its global function.
    pub fn record_code_parse(
        &mut self,
        ctx: ContextTag,
        script: CodeLoad,
        function: &H,
    ) -> Result<EventTime, RecordError> {
        let time = self.push(ctx, ActionPayload::CodeParse(script))?;
        self.tags.track(function.clone());
        Ok(time)
    }

    /// Records the start of a call. Its depth is the number of open calls.
    pub fn begin_call(
        &mut self,
        ctx: ContextTag,
        function: &H,
        args: &[Value<H>],
        host_callback_id: CallbackId,
        wall_time: f64,
        name: Option<&str>,
    ) -> Result<EventTime, RecordError> {
        let kind = ActionKind::CallBegin;
        let function = self.tag_of(kind, function)?;
        let args = self.encode_args(kind, args)?;
        let diagnostics = if self.config.capture_diagnostics {
            name.map(|n| CallDiagnostics { name: n.to_string() })
        } else {
            None
        };
        let depth = self.open_calls.len() as u32;
        let time = self.push(
            ctx,
            ActionPayload::CallBegin(CallBegin {
                depth,
                host_callback_id,
                function,
                begin_wall_time: wall_time,
                diagnostics,
                args,
                checkpoint: CheckpointCell::default(),
            }),
        )?;
        self.open_calls.push(time);
        Ok(time)
    }

    /// Records the end of the innermost open call, begun at `begin`.
    pub fn end_call(
        &mut self,
        ctx: ContextTag,
        begin: EventTime,
        outcome: &CallOutcome<H>,
        wall_time: f64,
    ) -> Result<EventTime, RecordError> {
        if self.open_calls.last() != Some(&begin) {
            return Err(RecordError::CallMismatch {
                matching: begin,
                open: self.open_calls.last().copied(),
            });
        }
        let depth = (self.open_calls.len() - 1) as u32;
        let (script, terminating) = match outcome {
            Ok(_) => (false, false),
            Err(thrown) => (!thrown.terminating, thrown.terminating),
        };
        let time = self.push(
            ctx,
            ActionPayload::CallEnd(CallEnd {
                matching_begin: begin,
                depth,
                has_script_exception: script,
                has_terminating_exception: terminating,
                end_wall_time: wall_time,
                last_statement: CacheCell::new(),
            }),
        )?;
        self.open_calls.pop();
        if let Ok(result) = outcome {
            self.track(result);
        }
        Ok(time)
    }
}

impl<H: Clone + Eq + Hash> Default for Recorder<H> {
    fn default() -> Self {
        Self::new(RecorderConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Thrown;
    use proptest::prelude::*;

    const CTX: ContextTag = ContextTag(1);

    #[test]
    fn times_start_at_one_and_increase() {
        let mut rec: Recorder<u32> = Recorder::default();
        let a = rec.record_allocate_object(CTX, true, &10).unwrap();
        let b = rec.record_allocate_array(CTX, 3, &11).unwrap();
        assert_eq!(a, EventTime(1));
        assert_eq!(b, EventTime(2));
        assert_eq!(rec.tags().tag_of(&11), Some(IdentityTag(2)));
    }

    #[test]
    fn untagged_input_is_rejected() {
        let mut rec: Recorder<u32> = Recorder::default();
        let err = rec
            .record_set_property(CTX, &99, PropertyId(1), &Value::I32(1), false)
            .unwrap_err();
        assert!(matches!(
            err,
            RecordError::UntaggedValue {
                kind: ActionKind::SetProperty
            }
        ));
        assert!(rec.log().is_empty());
    }

    #[test]
    fn failed_exception_retrieval_appends_nothing() {
        let mut rec: Recorder<u32> = Recorder::default();
        let err = rec
            .record_get_and_clear_exception(CTX, Err(RuntimeFault::new("engine gone")))
            .unwrap_err();
        assert!(matches!(err, RecordError::RecordingFailure { .. }));
        assert!(rec.log().is_empty());
        // Still usable afterwards.
        let time = rec
            .record_get_and_clear_exception(CTX, Ok(Some(Value::Object(7))))
            .unwrap();
        assert_eq!(time, EventTime(1));
        assert_eq!(rec.tags().tag_of(&7), Some(IdentityTag(1)));
    }

    #[test]
    fn call_depths_follow_nesting() {
        let mut rec: Recorder<u32> = Recorder::default();
        rec.record_allocate_function(CTX, None, &1).unwrap();
        let outer = rec
            .begin_call(CTX, &1, &[], CallbackId::NONE, 0.0, None)
            .unwrap();
        let inner = rec
            .begin_call(CTX, &1, &[Value::I32(2)], CallbackId::NONE, 1.0, None)
            .unwrap();

        let err = rec.end_call(CTX, outer, &Ok(Value::Null), 2.0).unwrap_err();
        assert!(matches!(err, RecordError::CallMismatch { open: Some(t), .. } if t == inner));

        rec.end_call(CTX, inner, &Ok(Value::Null), 2.0).unwrap();
        let thrown = Err(Thrown {
            value: Value::Str("boom".into()),
            terminating: false,
        });
        rec.end_call(CTX, outer, &thrown, 3.0).unwrap();

        let log = rec.into_log();
        let inner_begin = log.get(2).and_then(ActionEvent::as_call_begin).unwrap();
        assert_eq!(inner_begin.depth, 1);
        let root_end = log.get(4).and_then(ActionEvent::as_call_end).unwrap();
        assert_eq!(root_end.depth, 0);
        assert!(root_end.has_script_exception);
        assert!(!root_end.has_terminating_exception);
    }

    #[test]
    fn diagnostics_only_when_enabled() {
        let mut rec: Recorder<u32> = Recorder::new(RecorderConfig {
            capture_diagnostics: true,
        });
        rec.record_allocate_function(CTX, None, &1).unwrap();
        rec.begin_call(CTX, &1, &[], CallbackId::NONE, 0.0, Some("main"))
            .unwrap();
        let begin = rec.log().get(1).and_then(ActionEvent::as_call_begin).unwrap();
        assert_eq!(begin.diagnostics.as_ref().map(|d| d.name.as_str()), Some("main"));

        let mut plain: Recorder<u32> = Recorder::default();
        plain.record_allocate_function(CTX, None, &1).unwrap();
        plain
            .begin_call(CTX, &1, &[], CallbackId::NONE, 0.0, Some("main"))
            .unwrap();
        let begin = plain.log().get(1).and_then(ActionEvent::as_call_begin).unwrap();
        assert!(begin.diagnostics.is_none());
    }

    #[test]
    fn appended_actions_must_advance_time() {
        let mut rec: Recorder<u32> = Recorder::default();
        rec.append_action(ActionEvent::new(
            EventTime(5),
            CTX,
            ActionPayload::AllocateObject { regular: true },
        ))
        .unwrap();
        let err = rec
            .append_action(ActionEvent::new(
                EventTime(5),
                CTX,
                ActionPayload::GetAndClearException,
            ))
            .unwrap_err();
        assert!(matches!(
            err,
            RecordError::OutOfOrder {
                previous: EventTime(5),
                time: EventTime(5)
            }
        ));
        assert_eq!(rec.next_time(), Some(EventTime(6)));
    }

    #[test]
    fn exhausted_clock_rejects_further_actions() {
        let mut rec: Recorder<u32> = Recorder::default();
        rec.record_allocate_function(CTX, None, &1).unwrap();
        let begin = rec
            .begin_call(CTX, &1, &[], CallbackId::NONE, 0.0, None)
            .unwrap();
        rec.append_action(ActionEvent::new(
            EventTime(i64::MAX),
            CTX,
            ActionPayload::GetAndClearException,
        ))
        .unwrap();
        assert_eq!(rec.next_time(), None);

        let err = rec.record_allocate_object(CTX, true, &2).unwrap_err();
        assert!(matches!(err, RecordError::ClockExhausted));
        let err = rec.end_call(CTX, begin, &Ok(Value::Null), 1.0).unwrap_err();
        assert!(matches!(err, RecordError::ClockExhausted));

        // Nothing was appended or tagged, and the call is still open.
        assert_eq!(rec.log().len(), 3);
        assert_eq!(rec.tags().tag_of(&2), None);
        assert_eq!(rec.call_depth(), 1);
    }

    proptest! {
        #[test]
        fn recorded_times_strictly_increase(ops in prop::collection::vec((0u8..3, 1i64..5), 0..48)) {
            let mut rec: Recorder<u32> = Recorder::default();
            let mut next_handle = 0u32;
            for (op, gap) in ops {
                match op {
                    0 => {
                        next_handle += 1;
                        rec.record_allocate_object(CTX, true, &next_handle).unwrap();
                    }
                    1 => {
                        rec.record_get_and_clear_exception(CTX, Ok(None)).unwrap();
                    }
                    _ => {
                        let time = EventTime(rec.next_time().unwrap().0 + gap - 1);
                        rec.append_action(ActionEvent::new(
                            time,
                            CTX,
                            ActionPayload::GetAndClearException,
                        ))
                        .unwrap();
                    }
                }
            }
            let times: Vec<EventTime> = rec.log().iter().map(|e| e.time).collect();
            prop_assert!(times.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
