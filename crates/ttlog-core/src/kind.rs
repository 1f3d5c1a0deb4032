//! The closed set of action kinds.
//!
//! [`ActionKind`] is the on-wire discriminator of every log record. Wire
//! values are stable: new kinds may only be appended, never renumbered, so
//! logs outlive the code version that wrote them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Discriminates the recorded action variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    ConvertToObject,
    CreateSymbol,
    AllocateObject,
    AllocateArray,
    AllocateArrayBuffer,
    AllocateFunction,
    GetAndClearException,
    GetProperty,
    GetIndex,
    GetOwnPropertyInfo,
    GetOwnPropertiesInfo,
    DefineProperty,
    DeleteProperty,
    SetPrototype,
    SetProperty,
    SetIndex,
    GetTypedArrayInfo,
    ConstructCall,
    CallbackOp,
    CodeParse,
    CallBegin,
    CallEnd,
}

impl ActionKind {
    /// Every kind, in wire order.
    pub const ALL: [ActionKind; 22] = [
        ActionKind::ConvertToObject,
        ActionKind::CreateSymbol,
        ActionKind::AllocateObject,
        ActionKind::AllocateArray,
        ActionKind::AllocateArrayBuffer,
        ActionKind::AllocateFunction,
        ActionKind::GetAndClearException,
        ActionKind::GetProperty,
        ActionKind::GetIndex,
        ActionKind::GetOwnPropertyInfo,
        ActionKind::GetOwnPropertiesInfo,
        ActionKind::DefineProperty,
        ActionKind::DeleteProperty,
        ActionKind::SetPrototype,
        ActionKind::SetProperty,
        ActionKind::SetIndex,
        ActionKind::GetTypedArrayInfo,
        ActionKind::ConstructCall,
        ActionKind::CallbackOp,
        ActionKind::CodeParse,
        ActionKind::CallBegin,
        ActionKind::CallEnd,
    ];

    /// The stable on-wire discriminator.
    pub fn wire_value(self) -> u32 {
        self as u32
    }

    /// Maps an on-wire discriminator back to a kind.
    ///
    /// Returns `None` for values outside the closed set.
    pub fn from_wire(value: u32) -> Option<ActionKind> {
        Self::ALL.get(value as usize).copied()
    }

    /// Human-readable name used by log dumps.
    pub fn name(self) -> &'static str {
        match self {
            ActionKind::ConvertToObject => "ConvertToObject",
            ActionKind::CreateSymbol => "CreateSymbol",
            ActionKind::AllocateObject => "AllocateObject",
            ActionKind::AllocateArray => "AllocateArray",
            ActionKind::AllocateArrayBuffer => "AllocateArrayBuffer",
            ActionKind::AllocateFunction => "AllocateFunction",
            ActionKind::GetAndClearException => "GetAndClearException",
            ActionKind::GetProperty => "GetProperty",
            ActionKind::GetIndex => "GetIndex",
            ActionKind::GetOwnPropertyInfo => "GetOwnPropertyInfo",
            ActionKind::GetOwnPropertiesInfo => "GetOwnPropertiesInfo",
            ActionKind::DefineProperty => "DefineProperty",
            ActionKind::DeleteProperty => "DeleteProperty",
            ActionKind::SetPrototype => "SetPrototype",
            ActionKind::SetProperty => "SetProperty",
            ActionKind::SetIndex => "SetIndex",
            ActionKind::GetTypedArrayInfo => "GetTypedArrayInfo",
            ActionKind::ConstructCall => "ConstructCall",
            ActionKind::CallbackOp => "CallbackOp",
            ActionKind::CodeParse => "CodeParse",
            ActionKind::CallBegin => "CallBegin",
            ActionKind::CallEnd => "CallEnd",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_values_are_dense_and_stable() {
        for (i, kind) in ActionKind::ALL.iter().enumerate() {
            assert_eq!(kind.wire_value(), i as u32);
            assert_eq!(ActionKind::from_wire(i as u32), Some(*kind));
        }
        assert_eq!(ActionKind::CallEnd.wire_value(), 21);
    }

    #[test]
    fn unknown_wire_value_is_rejected() {
        assert_eq!(ActionKind::from_wire(22), None);
        assert_eq!(ActionKind::from_wire(u32::MAX), None);
    }

    #[test]
    fn display_uses_name() {
        assert_eq!(ActionKind::CallBegin.to_string(), "CallBegin");
    }
}
