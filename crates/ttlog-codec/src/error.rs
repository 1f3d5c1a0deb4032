//! Codec error types for ttlog-codec.
//!
//! [`CodecError`] covers every way a log stream can fail to parse. All of
//! them are structural: the reader does not attempt partial recovery past
//! the failing record.

use thiserror::Error;

/// Errors produced while writing or reading a log stream.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Underlying transport failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream ended in the middle of a record or before the end marker.
    #[error("unexpected end of log at offset {offset}")]
    UnexpectedEof { offset: u64 },

    /// A structural byte did not match what the format requires.
    #[error("expected '{expected}' at offset {offset}, found '{found}'")]
    UnexpectedByte {
        expected: char,
        found: char,
        offset: u64,
    },

    /// A field key did not match the fixed field order of the record.
    #[error("expected key \"{expected}\" at offset {offset}, found \"{found}\"")]
    KeyMismatch {
        expected: &'static str,
        found: String,
        offset: u64,
    },

    /// A scalar token could not be parsed as the requested type.
    #[error("invalid {expected} value \"{text}\" at offset {offset}")]
    InvalidNumber {
        expected: &'static str,
        text: String,
        offset: u64,
    },

    /// A quoted string was malformed (bad escape or invalid UTF-8).
    #[error("malformed string at offset {offset}")]
    InvalidString { offset: u64 },

    /// The record discriminator is not in the closed action-kind set.
    #[error("unknown action kind {value} at offset {offset}")]
    UnknownActionKind { value: u32, offset: u64 },

    /// An encoded value carried an unrecognised case key.
    #[error("unknown value case \"{found}\" at offset {offset}")]
    UnknownValueCase { found: String, offset: u64 },

    /// The log header names a format version this reader cannot parse.
    #[error("unsupported log format version {found}")]
    UnsupportedVersion { found: u32 },

    /// The end marker disagrees with the number of records in the stream.
    #[error("end marker declares {declared} records but {read} were read")]
    RecordCountMismatch { declared: u64, read: u64 },

    /// A field decoded cleanly but violates a per-kind invariant.
    #[error("invalid field \"{field}\" at offset {offset}: {reason}")]
    InvalidField {
        field: &'static str,
        reason: String,
        offset: u64,
    },
}
