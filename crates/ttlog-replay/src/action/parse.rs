//! Parsing actions from the tagged log format.
//!
//! Each kind's parser reads exactly the fields `emit.rs` writes, in the same
//! order. Unknown kinds are rejected by the record header reader; an
//! allocate-array record with a foreign type id is rejected here.

use std::io::BufRead;

use ttlog_codec::{CodecError, Key, LogReader, Separator};
use ttlog_core::{
    ActionKind, BodyCounterId, CallbackId, DocumentId, EventTime, IdentityTag, PropertyId,
};

use super::{
    ActionEvent, ActionPayload, CallArgs, CallBegin, CallDiagnostics, CallEnd, CallbackOp,
    CodeLoad, ARRAY_TYPE_ID,
};
use crate::cache::CacheCell;
use crate::checkpoint::CheckpointCell;
use crate::error::{LogError, SourceError};
use crate::source::{document_key, SourceStore};

impl ActionEvent {
    /// Reads the next record, or `None` once the end marker has been read.
    ///
    /// Code-parse actions load their script text back from `sources` and
    /// check it against the recorded length.
    pub fn deserialize<R: BufRead>(
        reader: &mut LogReader<R>,
        sources: &dyn SourceStore,
    ) -> Result<Option<ActionEvent>, LogError> {
        if !reader.read_record_start()? {
            return Ok(None);
        }
        let header = reader.read_record_header()?;
        let payload = parse_payload(header.kind, reader, sources)?;
        reader.read_record_end()?;
        Ok(Some(ActionEvent::new(header.time, header.ctx, payload)))
    }
}

fn parse_payload<R: BufRead>(
    kind: ActionKind,
    r: &mut LogReader<R>,
    sources: &dyn SourceStore,
) -> Result<ActionPayload, LogError> {
    let c = Separator::Comma;
    let payload = match kind {
        ActionKind::ConvertToObject => ActionPayload::ConvertToObject {
            value: r.read_keyed_value(Key::Entry, c)?,
        },
        ActionKind::CreateSymbol => ActionPayload::CreateSymbol {
            description: r.read_keyed_value(Key::Entry, c)?,
        },
        ActionKind::AllocateObject => ActionPayload::AllocateObject {
            regular: r.read_bool(Key::BoolVal, c)?,
        },
        ActionKind::AllocateArray => {
            let offset = r.offset();
            let type_id = r.read_u32(Key::TypeId, c)?;
            if type_id != ARRAY_TYPE_ID {
                return Err(CodecError::InvalidField {
                    field: "typeId",
                    reason: format!("unsupported array type id {type_id}"),
                    offset,
                }
                .into());
            }
            ActionPayload::AllocateArray {
                length: r.read_u32(Key::U32Val, c)?,
            }
        }
        ActionKind::AllocateArrayBuffer => ActionPayload::AllocateArrayBuffer {
            bytes: r.read_bytes(c)?.into_boxed_slice(),
        },
        ActionKind::AllocateFunction => {
            let named = r.read_bool(Key::BoolVal, c)?;
            let name = if named {
                Some(r.read_keyed_value(Key::Entry, c)?)
            } else {
                None
            };
            ActionPayload::AllocateFunction { name }
        }
        ActionKind::GetAndClearException => ActionPayload::GetAndClearException,
        ActionKind::GetProperty => ActionPayload::GetProperty {
            property: PropertyId(r.read_u32(Key::PropertyId, c)?),
            object: r.read_keyed_value(Key::Entry, c)?,
        },
        ActionKind::GetIndex => ActionPayload::GetIndex {
            index: r.read_keyed_value(Key::Index, c)?,
            object: r.read_keyed_value(Key::Entry, c)?,
        },
        ActionKind::GetOwnPropertyInfo => ActionPayload::GetOwnPropertyInfo {
            property: PropertyId(r.read_u32(Key::PropertyId, c)?),
            object: r.read_keyed_value(Key::Entry, c)?,
        },
        ActionKind::GetOwnPropertiesInfo => ActionPayload::GetOwnPropertiesInfo {
            names: r.read_bool(Key::BoolVal, c)?,
            object: r.read_keyed_value(Key::Entry, c)?,
        },
        ActionKind::DefineProperty => ActionPayload::DefineProperty {
            object: r.read_keyed_value(Key::Entry, c)?,
            property: PropertyId(r.read_u32(Key::PropertyId, c)?),
            descriptor: r.read_keyed_value(Key::Entry, c)?,
        },
        ActionKind::DeleteProperty => ActionPayload::DeleteProperty {
            object: r.read_keyed_value(Key::Entry, c)?,
            property: PropertyId(r.read_u32(Key::PropertyId, c)?),
            strict: r.read_bool(Key::BoolVal, c)?,
        },
        ActionKind::SetPrototype => ActionPayload::SetPrototype {
            object: r.read_keyed_value(Key::Entry, c)?,
            prototype: r.read_keyed_value(Key::ArgRetVal, c)?,
        },
        ActionKind::SetProperty => ActionPayload::SetProperty {
            object: r.read_keyed_value(Key::Entry, c)?,
            property: PropertyId(r.read_u32(Key::PropertyId, c)?),
            value: r.read_keyed_value(Key::ArgRetVal, c)?,
            strict: r.read_bool(Key::BoolVal, c)?,
        },
        ActionKind::SetIndex => ActionPayload::SetIndex {
            object: r.read_keyed_value(Key::Entry, c)?,
            index: r.read_keyed_value(Key::Index, c)?,
            value: r.read_keyed_value(Key::ArgRetVal, c)?,
        },
        ActionKind::GetTypedArrayInfo => ActionPayload::GetTypedArrayInfo {
            returns_buffer: r.read_bool(Key::BoolVal, c)?,
            object: r.read_keyed_value(Key::Entry, c)?,
        },
        ActionKind::ConstructCall => ActionPayload::ConstructCall {
            function: r.read_tag(Key::LogTag, c)?,
            args: CallArgs::from_vec(r.read_values(c)?),
        },
        ActionKind::CallbackOp => ActionPayload::CallbackOp(parse_callback_op(r)?),
        ActionKind::CodeParse => ActionPayload::CodeParse(parse_code_load(r, sources)?),
        ActionKind::CallBegin => ActionPayload::CallBegin(parse_call_begin(r)?),
        ActionKind::CallEnd => ActionPayload::CallEnd(parse_call_end(r)?),
    };
    Ok(payload)
}

fn parse_callback_op<R: BufRead>(r: &mut LogReader<R>) -> Result<CallbackOp, LogError> {
    let c = Separator::Comma;
    Ok(CallbackOp {
        is_cancel: r.read_bool(Key::BoolVal, c)?,
        is_repeating: r.read_bool(Key::BoolVal, c)?,
        current_callback: CallbackId(r.read_i64(Key::HostCallbackId, c)?),
        function: r.read_tag(Key::LogTag, c)?,
        callback_id: CallbackId(r.read_i64(Key::NewCallbackId, c)?),
        register_location: CacheCell::new(),
    })
}

fn parse_code_load<R: BufRead>(
    r: &mut LogReader<R>,
    sources: &dyn SourceStore,
) -> Result<CodeLoad, LogError> {
    let c = Separator::Comma;
    let document_id = DocumentId(r.read_u64(Key::DocumentId, c)?);
    let load_flags = r.read_u32(Key::LoadFlag, c)?;
    let body_counter_id = BodyCounterId(r.read_u64(Key::BodyCounterId, c)?);
    let source_dir = r.read_string(Key::LogDir, c)?;
    let source_file = r.read_string(Key::Src, c)?;
    let uri = r.read_string(Key::Uri, c)?;
    let declared = r.read_length(c)?;

    let source = sources.load_source(&source_dir, &document_key(document_id), &uri)?;
    if source.len() != declared as usize {
        return Err(SourceError::LengthMismatch {
            uri,
            declared,
            found: source.len(),
        }
        .into());
    }
    Ok(CodeLoad {
        document_id,
        load_flags,
        body_counter_id,
        source_dir,
        source_file,
        uri,
        source,
    })
}

fn parse_call_begin<R: BufRead>(r: &mut LogReader<R>) -> Result<CallBegin, LogError> {
    let c = Separator::Comma;
    let depth = r.read_u32(Key::RootNestingDepth, c)?;
    let host_callback_id = CallbackId(r.read_i64(Key::HostCallbackId, c)?);
    let function: IdentityTag = r.read_tag(Key::LogTag, c)?;
    let begin_wall_time = r.read_f64(Key::BeginTime, c)?;

    r.read_key(Key::Diag, c)?;
    let diagnostics = if r.read_null_or_object()? {
        None
    } else {
        let name = r.read_string(Key::Name, Separator::None)?;
        r.read_object_end()?;
        Some(CallDiagnostics { name })
    };

    Ok(CallBegin {
        depth,
        host_callback_id,
        function,
        begin_wall_time,
        diagnostics,
        args: CallArgs::from_vec(r.read_values(c)?),
        checkpoint: CheckpointCell::default(),
    })
}

fn parse_call_end<R: BufRead>(r: &mut LogReader<R>) -> Result<CallEnd, LogError> {
    let c = Separator::Comma;
    Ok(CallEnd {
        matching_begin: EventTime(r.read_i64(Key::MatchingCallBegin, c)?),
        depth: r.read_u32(Key::RootNestingDepth, c)?,
        has_script_exception: r.read_bool(Key::BoolVal, c)?,
        has_terminating_exception: r.read_bool(Key::BoolVal, c)?,
        end_wall_time: r.read_f64(Key::EndTime, c)?,
        last_statement: CacheCell::new(),
    })
}
