//! Executing actions against a replay session.
//!
//! Execution decodes the recorded inputs through the session's identity tag
//! table, performs the operation on the live runtime, and tags complex
//! results in the same order the recorder tagged them. The tagging rules
//! here and in [`Recorder`](crate::recorder::Recorder) must stay in step.

use smallvec::SmallVec;

use ttlog_core::{EventTime, Value};

use super::{ActionEvent, ActionPayload, CallbackOp, RegisterLocation};
use crate::error::ReplayError;
use crate::runtime::{Runtime, RuntimeFault};
use crate::session::ReplaySession;

impl ActionEvent {
    /// Replays this action against `session`.
    pub fn execute<R: Runtime>(&self, session: &mut ReplaySession<R>) -> Result<(), ReplayError> {
        let time = self.time;
        let kind = self.kind();
        session.enter_context(time, self.ctx)?;
        let fail = move |fault: RuntimeFault| ReplayError::ExecutionFailure { time, kind, fault };

        match &self.payload {
            ActionPayload::ConvertToObject { value } => {
                let value = session.value(time, value)?;
                let result = session.runtime_mut().to_object(&value).map_err(fail)?;
                session.track(&result);
            }
            ActionPayload::CreateSymbol { description } => {
                let description = session.value(time, description)?;
                session
                    .runtime_mut()
                    .create_symbol(&description)
                    .map_err(fail)?;
            }
            ActionPayload::AllocateObject { regular } => {
                let handle = session.runtime_mut().create_object(*regular).map_err(fail)?;
                session.track_handle(handle);
            }
            ActionPayload::AllocateArray { length } => {
                let handle = session.runtime_mut().create_array(*length).map_err(fail)?;
                session.track_handle(handle);
            }
            ActionPayload::AllocateArrayBuffer { bytes } => {
                let handle = session
                    .runtime_mut()
                    .create_array_buffer(bytes)
                    .map_err(fail)?;
                session.track_handle(handle);
            }
            ActionPayload::AllocateFunction { name } => {
                let name = name.as_ref().map(|n| session.value(time, n)).transpose()?;
                let handle = session
                    .runtime_mut()
                    .create_function(name.as_ref())
                    .map_err(fail)?;
                session.track_handle(handle);
            }
            ActionPayload::GetAndClearException => {
                if let Some(thrown) = session.take_pending_exception() {
                    session.track(&thrown.value);
                } else {
                    tracing::debug!(%time, "no pending exception to clear");
                }
            }
            ActionPayload::GetProperty { property, object } => {
                let object = session.object(time, kind, object)?;
                let result = session
                    .runtime_mut()
                    .get_property(&object, *property)
                    .map_err(fail)?;
                session.track(&result);
            }
            ActionPayload::GetIndex { index, object } => {
                let object = session.object(time, kind, object)?;
                let index = session.value(time, index)?;
                let result = session
                    .runtime_mut()
                    .get_index(&object, &index)
                    .map_err(fail)?;
                session.track(&result);
            }
            ActionPayload::GetOwnPropertyInfo { property, object } => {
                let object = session.object(time, kind, object)?;
                let result = session
                    .runtime_mut()
                    .get_own_property_descriptor(&object, *property)
                    .map_err(fail)?;
                session.track(&result);
            }
            ActionPayload::GetOwnPropertiesInfo { names, object } => {
                let object = session.object(time, kind, object)?;
                let keys = session
                    .runtime_mut()
                    .get_own_property_keys(&object, *names)
                    .map_err(fail)?;
                session.track_handle(keys);
            }
            ActionPayload::DefineProperty {
                object,
                property,
                descriptor,
            } => {
                let object = session.object(time, kind, object)?;
                let descriptor = session.value(time, descriptor)?;
                let defined = session
                    .runtime_mut()
                    .define_property(&object, *property, &descriptor)
                    .map_err(fail)?;
                if !defined {
                    tracing::debug!(%time, %property, "define property was rejected");
                }
            }
            ActionPayload::DeleteProperty {
                object,
                property,
                strict,
            } => {
                let object = session.object(time, kind, object)?;
                let result = session
                    .runtime_mut()
                    .delete_property(&object, *property, *strict)
                    .map_err(fail)?;
                session.track(&result);
            }
            ActionPayload::SetPrototype { object, prototype } => {
                let object = session.object(time, kind, object)?;
                let prototype = session.value(time, prototype)?;
                session
                    .runtime_mut()
                    .set_prototype(&object, &prototype)
                    .map_err(fail)?;
            }
            ActionPayload::SetProperty {
                object,
                property,
                value,
                strict,
            } => {
                let object = session.object(time, kind, object)?;
                let value = session.value(time, value)?;
                session
                    .runtime_mut()
                    .set_property(&object, *property, &value, *strict)
                    .map_err(fail)?;
            }
            ActionPayload::SetIndex {
                object,
                index,
                value,
            } => {
                let object = session.object(time, kind, object)?;
                let index = session.value(time, index)?;
                let value = session.value(time, value)?;
                session
                    .runtime_mut()
                    .set_index(&object, &index, &value)
                    .map_err(fail)?;
            }
            ActionPayload::GetTypedArrayInfo {
                returns_buffer,
                object,
            } => {
                let object = session.object(time, kind, object)?;
                let buffer = session
                    .runtime_mut()
                    .typed_array_buffer(&object)
                    .map_err(fail)?;
                if *returns_buffer {
                    session.track_handle(buffer);
                }
            }
            ActionPayload::ConstructCall { function, args } => {
                let function = session.resolve(time, *function)?;
                let args = args
                    .iter()
                    .map(|a| session.value(time, a))
                    .collect::<Result<SmallVec<[Value<R::Handle>; 4]>, _>>()?;
                match session.runtime_mut().construct(&function, &args) {
                    Ok(result) => {
                        session.track(&result);
                    }
                    Err(thrown) => session.set_pending_exception(thrown),
                }
            }
            ActionPayload::CallbackOp(op) => execute_callback_op(time, op, session),
            ActionPayload::CodeParse(load) => {
                let function = session.runtime_mut().load_script(load).map_err(fail)?;
                session.track_handle(function);
            }
            ActionPayload::CallBegin(begin) => session.begin_call(time, begin)?,
            ActionPayload::CallEnd(end) => session.end_call(time, end)?,
        }
        Ok(())
    }
}

fn execute_callback_op<R: Runtime>(
    time: EventTime,
    op: &CallbackOp,
    session: &mut ReplaySession<R>,
) {
    session.callbacks_mut().apply(time, op);
    op.register_location.set(RegisterLocation {
        root: session.call_stack().current_root(),
        time,
        position: session.runtime().last_executed_statement(),
    });
}
