//! Serializing actions to the tagged log format.
//!
//! Every record starts with the fixed header (event time, context tag,
//! action kind) followed by the kind's fields in a fixed order. Parsing in
//! `parse.rs` mirrors this file field for field.

use std::io::Write;

use ttlog_codec::{Key, LogWriter, Separator};

use super::{ActionEvent, ActionPayload, CallBegin, CallEnd, CallbackOp, CodeLoad, ARRAY_TYPE_ID};
use crate::error::LogError;
use crate::source::{document_key, SourceStore};

impl ActionEvent {
    /// Writes this action as one record.
    ///
    /// Code-parse actions hand their script text to `sources`; the record
    /// only carries its length.
    pub fn serialize<W: Write>(
        &self,
        writer: &mut LogWriter<W>,
        sources: &mut dyn SourceStore,
    ) -> Result<(), LogError> {
        writer.write_record_start()?;
        writer.write_record_header(self.time, self.ctx, self.kind())?;
        emit_payload(&self.payload, writer, sources)?;
        writer.write_record_end()?;
        Ok(())
    }
}

fn emit_payload<W: Write>(
    payload: &ActionPayload,
    w: &mut LogWriter<W>,
    sources: &mut dyn SourceStore,
) -> Result<(), LogError> {
    let c = Separator::Comma;
    match payload {
        ActionPayload::ConvertToObject { value } => w.write_keyed_value(Key::Entry, value, c)?,
        ActionPayload::CreateSymbol { description } => {
            w.write_keyed_value(Key::Entry, description, c)?
        }
        ActionPayload::AllocateObject { regular } => w.write_bool(Key::BoolVal, *regular, c)?,
        ActionPayload::AllocateArray { length } => {
            w.write_u32(Key::TypeId, ARRAY_TYPE_ID, c)?;
            w.write_u32(Key::U32Val, *length, c)?;
        }
        ActionPayload::AllocateArrayBuffer { bytes } => w.write_bytes(bytes, c)?,
        ActionPayload::AllocateFunction { name } => {
            w.write_bool(Key::BoolVal, name.is_some(), c)?;
            if let Some(name) = name {
                w.write_keyed_value(Key::Entry, name, c)?;
            }
        }
        ActionPayload::GetAndClearException => {}
        ActionPayload::GetProperty { property, object }
        | ActionPayload::GetOwnPropertyInfo { property, object } => {
            w.write_u32(Key::PropertyId, property.0, c)?;
            w.write_keyed_value(Key::Entry, object, c)?;
        }
        ActionPayload::GetIndex { index, object } => {
            w.write_keyed_value(Key::Index, index, c)?;
            w.write_keyed_value(Key::Entry, object, c)?;
        }
        ActionPayload::GetOwnPropertiesInfo { names, object } => {
            w.write_bool(Key::BoolVal, *names, c)?;
            w.write_keyed_value(Key::Entry, object, c)?;
        }
        ActionPayload::DefineProperty {
            object,
            property,
            descriptor,
        } => {
            w.write_keyed_value(Key::Entry, object, c)?;
            w.write_u32(Key::PropertyId, property.0, c)?;
            w.write_keyed_value(Key::Entry, descriptor, c)?;
        }
        ActionPayload::DeleteProperty {
            object,
            property,
            strict,
        } => {
            w.write_keyed_value(Key::Entry, object, c)?;
            w.write_u32(Key::PropertyId, property.0, c)?;
            w.write_bool(Key::BoolVal, *strict, c)?;
        }
        ActionPayload::SetPrototype { object, prototype } => {
            w.write_keyed_value(Key::Entry, object, c)?;
            w.write_keyed_value(Key::ArgRetVal, prototype, c)?;
        }
        ActionPayload::SetProperty {
            object,
            property,
            value,
            strict,
        } => {
            w.write_keyed_value(Key::Entry, object, c)?;
            w.write_u32(Key::PropertyId, property.0, c)?;
            w.write_keyed_value(Key::ArgRetVal, value, c)?;
            w.write_bool(Key::BoolVal, *strict, c)?;
        }
        ActionPayload::SetIndex {
            object,
            index,
            value,
        } => {
            w.write_keyed_value(Key::Entry, object, c)?;
            w.write_keyed_value(Key::Index, index, c)?;
            w.write_keyed_value(Key::ArgRetVal, value, c)?;
        }
        ActionPayload::GetTypedArrayInfo {
            returns_buffer,
            object,
        } => {
            w.write_bool(Key::BoolVal, *returns_buffer, c)?;
            w.write_keyed_value(Key::Entry, object, c)?;
        }
        ActionPayload::ConstructCall { function, args } => {
            w.write_tag(Key::LogTag, *function, c)?;
            w.write_values(args, c)?;
        }
        ActionPayload::CallbackOp(op) => emit_callback_op(op, w)?,
        ActionPayload::CodeParse(load) => emit_code_load(load, w, sources)?,
        ActionPayload::CallBegin(begin) => emit_call_begin(begin, w)?,
        ActionPayload::CallEnd(end) => emit_call_end(end, w)?,
    }
    Ok(())
}

fn emit_callback_op<W: Write>(op: &CallbackOp, w: &mut LogWriter<W>) -> Result<(), LogError> {
    let c = Separator::Comma;
    w.write_bool(Key::BoolVal, op.is_cancel, c)?;
    w.write_bool(Key::BoolVal, op.is_repeating, c)?;
    w.write_i64(Key::HostCallbackId, op.current_callback.0, c)?;
    w.write_tag(Key::LogTag, op.function, c)?;
    w.write_i64(Key::NewCallbackId, op.callback_id.0, c)?;
    Ok(())
}

fn emit_code_load<W: Write>(
    load: &CodeLoad,
    w: &mut LogWriter<W>,
    sources: &mut dyn SourceStore,
) -> Result<(), LogError> {
    let c = Separator::Comma;
    let length = u32::try_from(load.source.len()).map_err(|_| ttlog_codec::CodecError::InvalidField {
        field: "src",
        reason: format!("source of {} bytes exceeds u32 length", load.source.len()),
        offset: 0,
    })?;
    sources.store_source(
        &load.source_dir,
        &document_key(load.document_id),
        &load.uri,
        &load.source,
    )?;
    w.write_u64(Key::DocumentId, load.document_id.0, c)?;
    w.write_u32(Key::LoadFlag, load.load_flags, c)?;
    w.write_u64(Key::BodyCounterId, load.body_counter_id.0, c)?;
    w.write_string(Key::LogDir, &load.source_dir, c)?;
    w.write_string(Key::Src, &load.source_file, c)?;
    w.write_string(Key::Uri, &load.uri, c)?;
    w.write_length(length, c)?;
    Ok(())
}

fn emit_call_begin<W: Write>(begin: &CallBegin, w: &mut LogWriter<W>) -> Result<(), LogError> {
    let c = Separator::Comma;
    w.write_u32(Key::RootNestingDepth, begin.depth, c)?;
    w.write_i64(Key::HostCallbackId, begin.host_callback_id.0, c)?;
    w.write_tag(Key::LogTag, begin.function, c)?;
    w.write_f64(Key::BeginTime, begin.begin_wall_time, c)?;
    match &begin.diagnostics {
        None => w.write_null(Key::Diag, c)?,
        Some(diag) => {
            w.write_object_start(Key::Diag, c)?;
            w.write_string(Key::Name, &diag.name, Separator::None)?;
            w.write_object_end()?;
        }
    }
    w.write_values(&begin.args, c)?;
    Ok(())
}

fn emit_call_end<W: Write>(end: &CallEnd, w: &mut LogWriter<W>) -> Result<(), LogError> {
    let c = Separator::Comma;
    w.write_i64(Key::MatchingCallBegin, end.matching_begin.0, c)?;
    w.write_u32(Key::RootNestingDepth, end.depth, c)?;
    w.write_bool(Key::BoolVal, end.has_script_exception, c)?;
    w.write_bool(Key::BoolVal, end.has_terminating_exception, c)?;
    w.write_f64(Key::EndTime, end.end_wall_time, c)?;
    Ok(())
}
