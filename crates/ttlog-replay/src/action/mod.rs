//! The closed action-event type.
//!
//! An [`ActionEvent`] is one recorded operation against the runtime's
//! embedding API: its [`EventTime`], the [`ContextTag`] it applies to, and a
//! kind-specific [`ActionPayload`]. The payload enum is closed; every
//! operation on actions matches on it exhaustively.
//!
//! # Operations
//!
//! - record: built by [`Recorder`](crate::recorder::Recorder) from values the
//!   runtime already produced
//! - serialize: [`ActionEvent::serialize`] (see `emit.rs`)
//! - deserialize: [`ActionEvent::deserialize`] (see `parse.rs`)
//! - execute: [`ActionEvent::execute`] (see `execute.rs`)
//! - release: payloads are dropped in bulk with their
//!   [`ActionArena`](crate::arena::ActionArena)

mod emit;
mod execute;
mod parse;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use ttlog_core::{
    ActionKind, ArgRetValue, BodyCounterId, CallbackId, ContextTag, DocumentId, EventTime,
    IdentityTag, PropertyId,
};

use crate::cache::CacheCell;
use crate::checkpoint::CheckpointCell;
use crate::runtime::StatementPosition;

/// The only array type id an allocate-array action may carry.
pub const ARRAY_TYPE_ID: u32 = 28;

/// Encoded call arguments. Most calls pass few arguments.
pub type CallArgs = SmallVec<[ArgRetValue; 4]>;

/// One recorded action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionEvent {
    pub time: EventTime,
    pub ctx: ContextTag,
    pub payload: ActionPayload,
}

/// Kind-specific action payloads.
///
/// Fields named `object` hold the encoded target of the operation; they are
/// written under the `entry` key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ActionPayload {
    ConvertToObject {
        value: ArgRetValue,
    },
    CreateSymbol {
        description: ArgRetValue,
    },
    AllocateObject {
        regular: bool,
    },
    AllocateArray {
        length: u32,
    },
    AllocateArrayBuffer {
        bytes: Box<[u8]>,
    },
    AllocateFunction {
        name: Option<ArgRetValue>,
    },
    GetAndClearException,
    GetProperty {
        property: PropertyId,
        object: ArgRetValue,
    },
    GetIndex {
        index: ArgRetValue,
        object: ArgRetValue,
    },
    GetOwnPropertyInfo {
        property: PropertyId,
        object: ArgRetValue,
    },
    GetOwnPropertiesInfo {
        names: bool,
        object: ArgRetValue,
    },
    DefineProperty {
        object: ArgRetValue,
        property: PropertyId,
        descriptor: ArgRetValue,
    },
    DeleteProperty {
        object: ArgRetValue,
        property: PropertyId,
        strict: bool,
    },
    SetPrototype {
        object: ArgRetValue,
        prototype: ArgRetValue,
    },
    SetProperty {
        object: ArgRetValue,
        property: PropertyId,
        value: ArgRetValue,
        strict: bool,
    },
    SetIndex {
        object: ArgRetValue,
        index: ArgRetValue,
        value: ArgRetValue,
    },
    GetTypedArrayInfo {
        returns_buffer: bool,
        object: ArgRetValue,
    },
    ConstructCall {
        function: IdentityTag,
        args: CallArgs,
    },
    CallbackOp(CallbackOp),
    CodeParse(CodeLoad),
    CallBegin(CallBegin),
    CallEnd(CallEnd),
}

/// Scheduling or cancelling a host callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackOp {
    pub is_cancel: bool,
    pub is_repeating: bool,
    /// The host callback active when the operation was requested.
    pub current_callback: CallbackId,
    /// The callback function.
    pub function: IdentityTag,
    /// The id assigned to the scheduled (or cancelled) callback.
    pub callback_id: CallbackId,
    /// Where replay first executed this operation.
    #[serde(skip)]
    pub register_location: CacheCell<RegisterLocation>,
}

/// Debugger location of a replayed callback operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegisterLocation {
    /// The root call executing when the operation ran, if any.
    pub root: Option<EventTime>,
    pub time: EventTime,
    pub position: Option<StatementPosition>,
}

/// A parsed and loaded script.
///
/// The text is serialized through the [`SourceStore`](crate::source::SourceStore);
/// the record only carries its length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeLoad {
    pub document_id: DocumentId,
    pub load_flags: u32,
    pub body_counter_id: BodyCounterId,
    pub source_dir: String,
    pub source_file: String,
    pub uri: String,
    pub source: Arc<str>,
}

/// Optional diagnostics attached to a call-begin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallDiagnostics {
    pub name: String,
}

/// Start of a call into an existing function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallBegin {
    /// Nesting depth; 0 is a host-driven root call.
    pub depth: u32,
    pub host_callback_id: CallbackId,
    pub function: IdentityTag,
    /// Host wall-clock time at the call, in milliseconds.
    pub begin_wall_time: f64,
    pub diagnostics: Option<CallDiagnostics>,
    pub args: CallArgs,
    /// State after the matching call-end, for fast-forward.
    #[serde(skip)]
    pub checkpoint: CheckpointCell,
}

/// End of a call; matched to its begin by event time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallEnd {
    pub matching_begin: EventTime,
    pub depth: u32,
    pub has_script_exception: bool,
    pub has_terminating_exception: bool,
    pub end_wall_time: f64,
    /// Last statement executed by a root call, filled in on replay.
    #[serde(skip)]
    pub last_statement: CacheCell<StatementPosition>,
}

impl CallEnd {
    /// Whether the recorded call raised.
    pub fn raised(&self) -> bool {
        self.has_script_exception || self.has_terminating_exception
    }
}

impl ActionPayload {
    pub fn kind(&self) -> ActionKind {
        match self {
            ActionPayload::ConvertToObject { .. } => ActionKind::ConvertToObject,
            ActionPayload::CreateSymbol { .. } => ActionKind::CreateSymbol,
            ActionPayload::AllocateObject { .. } => ActionKind::AllocateObject,
            ActionPayload::AllocateArray { .. } => ActionKind::AllocateArray,
            ActionPayload::AllocateArrayBuffer { .. } => ActionKind::AllocateArrayBuffer,
            ActionPayload::AllocateFunction { .. } => ActionKind::AllocateFunction,
            ActionPayload::GetAndClearException => ActionKind::GetAndClearException,
            ActionPayload::GetProperty { .. } => ActionKind::GetProperty,
            ActionPayload::GetIndex { .. } => ActionKind::GetIndex,
            ActionPayload::GetOwnPropertyInfo { .. } => ActionKind::GetOwnPropertyInfo,
            ActionPayload::GetOwnPropertiesInfo { .. } => ActionKind::GetOwnPropertiesInfo,
            ActionPayload::DefineProperty { .. } => ActionKind::DefineProperty,
            ActionPayload::DeleteProperty { .. } => ActionKind::DeleteProperty,
            ActionPayload::SetPrototype { .. } => ActionKind::SetPrototype,
            ActionPayload::SetProperty { .. } => ActionKind::SetProperty,
            ActionPayload::SetIndex { .. } => ActionKind::SetIndex,
            ActionPayload::GetTypedArrayInfo { .. } => ActionKind::GetTypedArrayInfo,
            ActionPayload::ConstructCall { .. } => ActionKind::ConstructCall,
            ActionPayload::CallbackOp(_) => ActionKind::CallbackOp,
            ActionPayload::CodeParse(_) => ActionKind::CodeParse,
            ActionPayload::CallBegin(_) => ActionKind::CallBegin,
            ActionPayload::CallEnd(_) => ActionKind::CallEnd,
        }
    }

    /// Heap bytes owned by the payload's buffers and strings.
    pub fn payload_bytes(&self) -> usize {
        fn values(args: &[ArgRetValue]) -> usize {
            args.iter().map(ArgRetValue::payload_bytes).sum()
        }
        match self {
            ActionPayload::ConvertToObject { value } => value.payload_bytes(),
            ActionPayload::CreateSymbol { description } => description.payload_bytes(),
            ActionPayload::AllocateObject { .. }
            | ActionPayload::AllocateArray { .. }
            | ActionPayload::GetAndClearException
            | ActionPayload::CallbackOp(_)
            | ActionPayload::CallEnd(_) => 0,
            ActionPayload::AllocateArrayBuffer { bytes } => bytes.len(),
            ActionPayload::AllocateFunction { name } => {
                name.as_ref().map_or(0, ArgRetValue::payload_bytes)
            }
            ActionPayload::GetProperty { object, .. }
            | ActionPayload::GetOwnPropertyInfo { object, .. }
            | ActionPayload::GetOwnPropertiesInfo { object, .. }
            | ActionPayload::DeleteProperty { object, .. }
            | ActionPayload::GetTypedArrayInfo { object, .. } => object.payload_bytes(),
            ActionPayload::GetIndex { index, object } => {
                index.payload_bytes() + object.payload_bytes()
            }
            ActionPayload::DefineProperty {
                object, descriptor, ..
            } => object.payload_bytes() + descriptor.payload_bytes(),
            ActionPayload::SetPrototype { object, prototype } => {
                object.payload_bytes() + prototype.payload_bytes()
            }
            ActionPayload::SetProperty { object, value, .. } => {
                object.payload_bytes() + value.payload_bytes()
            }
            ActionPayload::SetIndex {
                object,
                index,
                value,
            } => object.payload_bytes() + index.payload_bytes() + value.payload_bytes(),
            ActionPayload::ConstructCall { args, .. } => values(args),
            ActionPayload::CodeParse(load) => {
                load.source.len() + load.source_dir.len() + load.source_file.len() + load.uri.len()
            }
            ActionPayload::CallBegin(begin) => {
                values(&begin.args) + begin.diagnostics.as_ref().map_or(0, |d| d.name.len())
            }
        }
    }
}

impl ActionEvent {
    pub fn new(time: EventTime, ctx: ContextTag, payload: ActionPayload) -> Self {
        ActionEvent { time, ctx, payload }
    }

    pub fn kind(&self) -> ActionKind {
        self.payload.kind()
    }

    pub fn as_call_begin(&self) -> Option<&CallBegin> {
        match &self.payload {
            ActionPayload::CallBegin(begin) => Some(begin),
            _ => None,
        }
    }

    pub fn as_call_end(&self) -> Option<&CallEnd> {
        match &self.payload {
            ActionPayload::CallEnd(end) => Some(end),
            _ => None,
        }
    }

    /// A depth-zero call-begin.
    pub fn is_root_call_begin(&self) -> bool {
        self.as_call_begin().is_some_and(|b| b.depth == 0)
    }

    /// A depth-zero call-end.
    pub fn is_root_call_end(&self) -> bool {
        self.as_call_end().is_some_and(|e| e.depth == 0)
    }
}
