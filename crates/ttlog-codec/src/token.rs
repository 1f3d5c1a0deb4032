//! Field keys and separators of the tagged log format.
//!
//! Every field in a record is written as `"<key>":<value>`. Keys are a closed
//! set so that a reader can verify it is positioned at the expected field.

/// Current log format version, written in the log header.
pub const FORMAT_VERSION: u32 = 1;

macro_rules! define_keys {
    ($($variant:ident => $text:literal),* $(,)?) => {
        /// Field keys used by log records.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Key {
            $($variant),*
        }

        impl Key {
            /// The on-wire spelling of this key.
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Key::$variant => $text),*
                }
            }
        }
    };
}

define_keys! {
    // log framing
    Ttlog => "ttlog",
    Actions => "actions",
    EndOfLog => "endOfLog",

    // record header
    EventTime => "eventTime",
    CtxTag => "ctxTag",
    ActionKind => "actionKind",

    // payload fields
    Entry => "entry",
    Index => "index",
    ArgRetVal => "argRetVal",
    PropertyId => "propertyId",
    LogTag => "logTag",
    Length => "length",
    Values => "values",
    Bytes => "bytes",
    TypeId => "typeId",
    RootNestingDepth => "rootNestingDepth",
    HostCallbackId => "hostCallbackId",
    NewCallbackId => "newCallbackId",
    BeginTime => "beginTime",
    EndTime => "endTime",
    MatchingCallBegin => "matchingCallBegin",
    DocumentId => "documentId",
    LoadFlag => "loadFlag",
    BodyCounterId => "bodyCounterId",
    LogDir => "logDir",
    Src => "src",
    Uri => "uri",
    Diag => "diag",
    Name => "name",

    // value cases
    NullVal => "nullVal",
    BoolVal => "boolVal",
    I32Val => "i32Val",
    U32Val => "u32Val",
    I64Val => "i64Val",
    U64Val => "u64Val",
    DoubleVal => "doubleVal",
    StringVal => "stringVal",
    TagVal => "tagVal",
}

/// Separator written before a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Separator {
    /// First token of an enclosing object or sequence.
    None,
    /// `,` between fields of one record.
    Comma,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_spell_as_camel_case() {
        assert_eq!(Key::EventTime.as_str(), "eventTime");
        assert_eq!(Key::MatchingCallBegin.as_str(), "matchingCallBegin");
        assert_eq!(Key::TagVal.as_str(), "tagVal");
    }
}
