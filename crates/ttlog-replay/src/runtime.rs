//! The runtime session contract consumed by replay.
//!
//! [`Runtime`] is the narrow interface the replay core needs from a live
//! runtime: one method per embedding-API operation that can appear in a log,
//! plus optional checkpoint and debugger hooks. The core never inspects
//! runtime values beyond [`Value`]; reference-kind values are opaque
//! [`Runtime::Handle`]s that only the session's identity tag table relates
//! across runs.
//!
//! Implementations must not block and must report failures synchronously.
//! Non-call operations fail with [`RuntimeFault`]; calls and constructs
//! complete with either a value or a [`Thrown`] script exception.

use std::fmt;
use std::hash::Hash;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use ttlog_core::{ContextTag, PropertyId, Value};

use crate::action::CodeLoad;

/// A failure reported by the runtime for a non-call operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RuntimeFault {
    pub message: String,
}

impl RuntimeFault {
    pub fn new(message: impl Into<String>) -> Self {
        RuntimeFault {
            message: message.into(),
        }
    }
}

/// A script-level exception raised by a call or construct.
#[derive(Debug, Clone, PartialEq)]
pub struct Thrown<H> {
    /// The thrown value.
    pub value: Value<H>,
    /// Whether the runtime is terminating (script abort) rather than
    /// unwinding an ordinary exception.
    pub terminating: bool,
}

/// Completion of a call or construct.
pub type CallOutcome<H> = Result<Value<H>, Thrown<H>>;

/// Source coordinates of the last statement executed by a root call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementPosition {
    pub function_time: u64,
    pub loop_time: u64,
    pub line: u32,
    pub column: u32,
    pub source_id: u32,
}

impl fmt::Display for StatementPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "source {} line {} column {} (ftime {}, ltime {})",
            self.source_id, self.line, self.column, self.function_time, self.loop_time
        )
    }
}

/// A live runtime session that replayed actions are applied to.
pub trait Runtime {
    /// Handle of a reference-kind value, valid within this session only.
    type Handle: Clone + Eq + Hash + fmt::Debug + 'static;
    /// Opaque full-state snapshot used for checkpoints.
    type Snapshot: Clone + 'static;

    // -------------------------------------------------------------------
    // Contexts
    // -------------------------------------------------------------------

    /// Makes the context named by `ctx` current for the following operations.
    fn enter_context(&mut self, ctx: ContextTag) -> Result<(), RuntimeFault>;

    // -------------------------------------------------------------------
    // Allocation
    // -------------------------------------------------------------------

    fn to_object(
        &mut self,
        value: &Value<Self::Handle>,
    ) -> Result<Value<Self::Handle>, RuntimeFault>;

    fn create_symbol(
        &mut self,
        description: &Value<Self::Handle>,
    ) -> Result<Value<Self::Handle>, RuntimeFault>;

    /// Creates an ordinary object. Non-regular (host-external) objects are
    /// replaced by ordinary ones during replay.
    fn create_object(&mut self, regular: bool) -> Result<Self::Handle, RuntimeFault>;

    fn create_array(&mut self, length: u32) -> Result<Self::Handle, RuntimeFault>;

    fn create_array_buffer(&mut self, bytes: &[u8]) -> Result<Self::Handle, RuntimeFault>;

    fn create_function(
        &mut self,
        name: Option<&Value<Self::Handle>>,
    ) -> Result<Self::Handle, RuntimeFault>;

    // -------------------------------------------------------------------
    // Property and index access
    // -------------------------------------------------------------------

    fn get_property(
        &mut self,
        object: &Self::Handle,
        property: PropertyId,
    ) -> Result<Value<Self::Handle>, RuntimeFault>;

    fn get_index(
        &mut self,
        object: &Self::Handle,
        index: &Value<Self::Handle>,
    ) -> Result<Value<Self::Handle>, RuntimeFault>;

    /// Returns a descriptor object, or [`Value::Null`] when the property is
    /// not an own property.
    fn get_own_property_descriptor(
        &mut self,
        object: &Self::Handle,
        property: PropertyId,
    ) -> Result<Value<Self::Handle>, RuntimeFault>;

    /// Returns an array of own property names (`names`) or own symbols.
    fn get_own_property_keys(
        &mut self,
        object: &Self::Handle,
        names: bool,
    ) -> Result<Self::Handle, RuntimeFault>;

    fn define_property(
        &mut self,
        object: &Self::Handle,
        property: PropertyId,
        descriptor: &Value<Self::Handle>,
    ) -> Result<bool, RuntimeFault>;

    fn delete_property(
        &mut self,
        object: &Self::Handle,
        property: PropertyId,
        strict: bool,
    ) -> Result<Value<Self::Handle>, RuntimeFault>;

    fn set_prototype(
        &mut self,
        object: &Self::Handle,
        prototype: &Value<Self::Handle>,
    ) -> Result<(), RuntimeFault>;

    fn set_property(
        &mut self,
        object: &Self::Handle,
        property: PropertyId,
        value: &Value<Self::Handle>,
        strict: bool,
    ) -> Result<(), RuntimeFault>;

    fn set_index(
        &mut self,
        object: &Self::Handle,
        index: &Value<Self::Handle>,
        value: &Value<Self::Handle>,
    ) -> Result<(), RuntimeFault>;

    /// Returns the array buffer backing a typed array.
    fn typed_array_buffer(&mut self, object: &Self::Handle) -> Result<Self::Handle, RuntimeFault>;

    // -------------------------------------------------------------------
    // Invocation
    // -------------------------------------------------------------------

    fn construct(
        &mut self,
        function: &Self::Handle,
        args: &[Value<Self::Handle>],
    ) -> CallOutcome<Self::Handle>;

    fn call(
        &mut self,
        function: &Self::Handle,
        args: &[Value<Self::Handle>],
    ) -> CallOutcome<Self::Handle>;

    /// Parses and loads a script, returning its global function.
    fn load_script(&mut self, script: &CodeLoad) -> Result<Self::Handle, RuntimeFault>;

    // -------------------------------------------------------------------
    // Debugger and checkpoint hooks
    // -------------------------------------------------------------------

    /// Position of the last statement executed by the most recent call.
    fn last_executed_statement(&self) -> Option<StatementPosition> {
        None
    }

    /// Captures a full-state snapshot, or `None` when unsupported.
    fn capture(&self) -> Option<Self::Snapshot> {
        None
    }

    /// Restores a snapshot produced by [`capture`](Self::capture).
    fn restore(&mut self, _snapshot: &Self::Snapshot) -> Result<(), RuntimeFault> {
        Err(RuntimeFault::new("checkpoints are not supported"))
    }
}
