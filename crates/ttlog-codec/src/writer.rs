//! Streaming, forward-only log writer.
//!
//! [`LogWriter`] emits one self-delimited record per line:
//!
//! ```text
//! {"ttlog":1,"actions":[
//! {"eventTime":1,"ctxTag":1,"actionKind":2,"boolVal":true},
//! {"eventTime":2,"ctxTag":1,"actionKind":7,"propertyId":4,"entry":{"tagVal":1}}
//! ],"endOfLog":2}
//! ```
//!
//! Raw newlines only ever appear between records (strings escape them), so a
//! reader can resynchronise on line boundaries.

use std::io::Write;

use ttlog_core::{ActionKind, ArgRetValue, ContextTag, EventTime, IdentityTag};

use crate::error::CodecError;
use crate::token::{Key, Separator, FORMAT_VERSION};

/// Writes the tagged log format to any `Write` transport.
pub struct LogWriter<W: Write> {
    out: W,
    records: u64,
}

impl<W: Write> LogWriter<W> {
    /// Wraps a transport. Nothing is written until [`begin_log`](Self::begin_log).
    pub fn new(out: W) -> Self {
        LogWriter { out, records: 0 }
    }

    /// Number of records started so far.
    pub fn records_written(&self) -> u64 {
        self.records
    }

    /// Writes the log header.
    pub fn begin_log(&mut self) -> Result<(), CodecError> {
        write!(
            self.out,
            "{{\"{}\":{},\"{}\":[",
            Key::Ttlog.as_str(),
            FORMAT_VERSION,
            Key::Actions.as_str()
        )?;
        Ok(())
    }

    /// Writes the explicit end marker and flushes the transport.
    pub fn end_log(&mut self) -> Result<(), CodecError> {
        write!(
            self.out,
            "\n],\"{}\":{}}}\n",
            Key::EndOfLog.as_str(),
            self.records
        )?;
        self.out.flush()?;
        Ok(())
    }

    /// Consumes the writer, returning the transport.
    pub fn into_inner(self) -> W {
        self.out
    }

    // -------------------------------------------------------------------
    // Record framing
    // -------------------------------------------------------------------

    /// Starts a record on a new line.
    pub fn write_record_start(&mut self) -> Result<(), CodecError> {
        if self.records == 0 {
            self.out.write_all(b"\n{")?;
        } else {
            self.out.write_all(b",\n{")?;
        }
        self.records += 1;
        Ok(())
    }

    /// Closes the current record.
    pub fn write_record_end(&mut self) -> Result<(), CodecError> {
        self.out.write_all(b"}")?;
        Ok(())
    }

    /// Writes the fixed record header: event time, context tag, action kind.
    pub fn write_record_header(
        &mut self,
        time: EventTime,
        ctx: ContextTag,
        kind: ActionKind,
    ) -> Result<(), CodecError> {
        self.write_i64(Key::EventTime, time.0, Separator::None)?;
        self.write_u64(Key::CtxTag, ctx.0, Separator::Comma)?;
        self.write_u32(Key::ActionKind, kind.wire_value(), Separator::Comma)
    }

    // -------------------------------------------------------------------
    // Keyed scalars
    // -------------------------------------------------------------------

    fn write_separator(&mut self, sep: Separator) -> Result<(), CodecError> {
        if sep == Separator::Comma {
            self.out.write_all(b",")?;
        }
        Ok(())
    }

    /// Writes `"key":` preceded by `sep`.
    pub fn write_key(&mut self, key: Key, sep: Separator) -> Result<(), CodecError> {
        self.write_separator(sep)?;
        write!(self.out, "\"{}\":", key.as_str())?;
        Ok(())
    }

    pub fn write_bool(&mut self, key: Key, value: bool, sep: Separator) -> Result<(), CodecError> {
        self.write_key(key, sep)?;
        write!(self.out, "{value}")?;
        Ok(())
    }

    pub fn write_i32(&mut self, key: Key, value: i32, sep: Separator) -> Result<(), CodecError> {
        self.write_key(key, sep)?;
        write!(self.out, "{value}")?;
        Ok(())
    }

    pub fn write_u32(&mut self, key: Key, value: u32, sep: Separator) -> Result<(), CodecError> {
        self.write_key(key, sep)?;
        write!(self.out, "{value}")?;
        Ok(())
    }

    pub fn write_i64(&mut self, key: Key, value: i64, sep: Separator) -> Result<(), CodecError> {
        self.write_key(key, sep)?;
        write!(self.out, "{value}")?;
        Ok(())
    }

    pub fn write_u64(&mut self, key: Key, value: u64, sep: Separator) -> Result<(), CodecError> {
        self.write_key(key, sep)?;
        write!(self.out, "{value}")?;
        Ok(())
    }

    /// Writes a double using its shortest round-tripping representation.
    pub fn write_f64(&mut self, key: Key, value: f64, sep: Separator) -> Result<(), CodecError> {
        self.write_key(key, sep)?;
        write!(self.out, "{value:?}")?;
        Ok(())
    }

    pub fn write_null(&mut self, key: Key, sep: Separator) -> Result<(), CodecError> {
        self.write_key(key, sep)?;
        self.out.write_all(b"null")?;
        Ok(())
    }

    pub fn write_string(&mut self, key: Key, value: &str, sep: Separator) -> Result<(), CodecError> {
        self.write_key(key, sep)?;
        self.write_quoted(value)
    }

    pub fn write_tag(&mut self, key: Key, tag: IdentityTag, sep: Separator) -> Result<(), CodecError> {
        self.write_u64(key, tag.0, sep)
    }

    /// Writes the length prefix of a following sequence.
    pub fn write_length(&mut self, len: u32, sep: Separator) -> Result<(), CodecError> {
        self.write_u32(Key::Length, len, sep)
    }

    fn write_quoted(&mut self, value: &str) -> Result<(), CodecError> {
        self.out.write_all(b"\"")?;
        for c in value.chars() {
            match c {
                '"' => self.out.write_all(b"\\\"")?,
                '\\' => self.out.write_all(b"\\\\")?,
                '\n' => self.out.write_all(b"\\n")?,
                '\r' => self.out.write_all(b"\\r")?,
                '\t' => self.out.write_all(b"\\t")?,
                c if (c as u32) < 0x20 => write!(self.out, "\\u{:04x}", c as u32)?,
                c => {
                    let mut buf = [0u8; 4];
                    self.out.write_all(c.encode_utf8(&mut buf).as_bytes())?;
                }
            }
        }
        self.out.write_all(b"\"")?;
        Ok(())
    }

    // -------------------------------------------------------------------
    // Sequences and nested objects
    // -------------------------------------------------------------------

    /// Writes `"key":[`.
    pub fn write_sequence_start(&mut self, key: Key, sep: Separator) -> Result<(), CodecError> {
        self.write_key(key, sep)?;
        self.out.write_all(b"[")?;
        Ok(())
    }

    pub fn write_sequence_end(&mut self) -> Result<(), CodecError> {
        self.out.write_all(b"]")?;
        Ok(())
    }

    /// Writes a bare byte inside a sequence.
    pub fn write_naked_u8(&mut self, value: u8, sep: Separator) -> Result<(), CodecError> {
        self.write_separator(sep)?;
        write!(self.out, "{value}")?;
        Ok(())
    }

    /// Writes `"key":{`.
    pub fn write_object_start(&mut self, key: Key, sep: Separator) -> Result<(), CodecError> {
        self.write_key(key, sep)?;
        self.out.write_all(b"{")?;
        Ok(())
    }

    pub fn write_object_end(&mut self) -> Result<(), CodecError> {
        self.out.write_all(b"}")?;
        Ok(())
    }

    /// Writes a length-prefixed byte buffer: `"length":n,"bytes":[...]`.
    pub fn write_bytes(&mut self, bytes: &[u8], sep: Separator) -> Result<(), CodecError> {
        let len = u32::try_from(bytes.len()).map_err(|_| CodecError::InvalidField {
            field: "bytes",
            reason: format!("buffer of {} bytes exceeds u32 length", bytes.len()),
            offset: 0,
        })?;
        self.write_length(len, sep)?;
        self.write_sequence_start(Key::Bytes, Separator::Comma)?;
        for (i, b) in bytes.iter().enumerate() {
            let sep = if i == 0 { Separator::None } else { Separator::Comma };
            self.write_naked_u8(*b, sep)?;
        }
        self.write_sequence_end()
    }

    // -------------------------------------------------------------------
    // Encoded values
    // -------------------------------------------------------------------

    /// Writes an encoded value as a single-case object, e.g. `{"i32Val":3}`.
    pub fn write_arg_ret_value(&mut self, value: &ArgRetValue, sep: Separator) -> Result<(), CodecError> {
        self.write_separator(sep)?;
        self.out.write_all(b"{")?;
        match value {
            ArgRetValue::Null => self.write_null(Key::NullVal, Separator::None)?,
            ArgRetValue::Bool(b) => self.write_bool(Key::BoolVal, *b, Separator::None)?,
            ArgRetValue::I32(v) => self.write_i32(Key::I32Val, *v, Separator::None)?,
            ArgRetValue::U32(v) => self.write_u32(Key::U32Val, *v, Separator::None)?,
            ArgRetValue::I64(v) => self.write_i64(Key::I64Val, *v, Separator::None)?,
            ArgRetValue::U64(v) => self.write_u64(Key::U64Val, *v, Separator::None)?,
            ArgRetValue::F64(v) => self.write_f64(Key::DoubleVal, *v, Separator::None)?,
            ArgRetValue::Str(s) => self.write_string(Key::StringVal, s, Separator::None)?,
            ArgRetValue::Tagged(tag) => self.write_tag(Key::TagVal, *tag, Separator::None)?,
        }
        self.out.write_all(b"}")?;
        Ok(())
    }

    /// Writes `"key":` followed by an encoded value.
    pub fn write_keyed_value(&mut self, key: Key, value: &ArgRetValue, sep: Separator) -> Result<(), CodecError> {
        self.write_key(key, sep)?;
        self.write_arg_ret_value(value, Separator::None)
    }

    /// Writes a length-prefixed sequence of encoded values.
    pub fn write_values(&mut self, values: &[ArgRetValue], sep: Separator) -> Result<(), CodecError> {
        let len = u32::try_from(values.len()).map_err(|_| CodecError::InvalidField {
            field: "values",
            reason: format!("{} values exceed u32 length", values.len()),
            offset: 0,
        })?;
        self.write_length(len, sep)?;
        self.write_sequence_start(Key::Values, Separator::Comma)?;
        for (i, v) in values.iter().enumerate() {
            let sep = if i == 0 { Separator::None } else { Separator::Comma };
            self.write_arg_ret_value(v, sep)?;
        }
        self.write_sequence_end()
    }
}
