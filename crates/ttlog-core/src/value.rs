//! Value encoding for arguments and return values crossing the log boundary.
//!
//! [`Value`] is the runtime-facing representation, generic over the handle
//! type the runtime uses for reference-kind values. [`ArgRetValue`] is the
//! compact, serializable encoding: primitives are stored inline and complex
//! values are stored as an [`IdentityTag`] reference into the session's
//! [`IdentityTagTable`].

use std::hash::Hash;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::id::IdentityTag;
use crate::tags::IdentityTagTable;

/// A runtime value as observed at the embedding API boundary.
///
/// `H` is the runtime's handle type for reference-kind values. Handles are
/// only meaningful within the session that produced them.
#[derive(Debug, Clone, PartialEq)]
pub enum Value<H> {
    Null,
    Bool(bool),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F64(f64),
    Str(String),
    /// A reference-kind (complex) value.
    Object(H),
}

impl<H> Value<H> {
    /// Whether this value is a reference-kind value needing an identity tag.
    pub fn is_complex(&self) -> bool {
        matches!(self, Value::Object(_))
    }

    /// Returns the handle of a complex value.
    pub fn as_object(&self) -> Option<&H> {
        match self {
            Value::Object(h) => Some(h),
            _ => None,
        }
    }

    /// Returns a human-readable description of the value's type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Bool(_) => "Bool",
            Value::I32(_) => "I32",
            Value::U32(_) => "U32",
            Value::I64(_) => "I64",
            Value::U64(_) => "U64",
            Value::F64(_) => "F64",
            Value::Str(_) => "Str",
            Value::Object(_) => "Object",
        }
    }
}

/// Tagged encoding of an argument or return value.
///
/// Exactly one case is populated per instance. A [`ArgRetValue::Tagged`]
/// reference is only valid if the tag was registered by an earlier event in
/// log order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArgRetValue {
    Null,
    Bool(bool),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F64(f64),
    Str(String),
    Tagged(IdentityTag),
}

impl ArgRetValue {
    /// Encodes a runtime value.
    ///
    /// Primitives encode inline. A complex value must already be tagged in
    /// `tags`; otherwise this fails with [`CoreError::UntaggedValue`].
    pub fn encode<H: Clone + Eq + Hash>(
        value: &Value<H>,
        tags: &IdentityTagTable<H>,
    ) -> Result<ArgRetValue, CoreError> {
        Ok(match value {
            Value::Null => ArgRetValue::Null,
            Value::Bool(b) => ArgRetValue::Bool(*b),
            Value::I32(v) => ArgRetValue::I32(*v),
            Value::U32(v) => ArgRetValue::U32(*v),
            Value::I64(v) => ArgRetValue::I64(*v),
            Value::U64(v) => ArgRetValue::U64(*v),
            Value::F64(v) => ArgRetValue::F64(*v),
            Value::Str(s) => ArgRetValue::Str(s.clone()),
            Value::Object(h) => {
                ArgRetValue::Tagged(tags.tag_of(h).ok_or(CoreError::UntaggedValue)?)
            }
        })
    }

    /// Reconstructs a runtime value in the session owning `tags`.
    ///
    /// Identity-tag references fail with [`CoreError::UnresolvedTag`] when the
    /// tag was never registered, which indicates a corrupt or out-of-order log.
    pub fn decode<H: Clone + Eq + Hash>(
        &self,
        tags: &IdentityTagTable<H>,
    ) -> Result<Value<H>, CoreError> {
        Ok(match self {
            ArgRetValue::Null => Value::Null,
            ArgRetValue::Bool(b) => Value::Bool(*b),
            ArgRetValue::I32(v) => Value::I32(*v),
            ArgRetValue::U32(v) => Value::U32(*v),
            ArgRetValue::I64(v) => Value::I64(*v),
            ArgRetValue::U64(v) => Value::U64(*v),
            ArgRetValue::F64(v) => Value::F64(*v),
            ArgRetValue::Str(s) => Value::Str(s.clone()),
            ArgRetValue::Tagged(tag) => Value::Object(tags.resolve(*tag)?.clone()),
        })
    }

    /// The identity tag referenced by this encoding, if any.
    pub fn tag(&self) -> Option<IdentityTag> {
        match self {
            ArgRetValue::Tagged(tag) => Some(*tag),
            _ => None,
        }
    }

    /// Approximate heap bytes owned by this encoding.
    pub fn payload_bytes(&self) -> usize {
        match self {
            ArgRetValue::Str(s) => s.len(),
            _ => 0,
        }
    }
}
