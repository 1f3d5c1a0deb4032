//! Pull-style log reader.
//!
//! [`LogReader`] mirrors [`LogWriter`](crate::writer::LogWriter) call for
//! call: a record parser reads exactly the keys, in exactly the order, that
//! the matching emitter wrote. Any deviation is a [`CodecError`]; the reader
//! never guesses. Insignificant whitespace between tokens is skipped.

use std::io::BufRead;
use std::str::FromStr;

use ttlog_core::{ActionKind, ArgRetValue, ContextTag, EventTime, IdentityTag};

use crate::error::CodecError;
use crate::token::{Key, Separator, FORMAT_VERSION};

/// Reads the tagged log format from any `BufRead` transport.
pub struct LogReader<R: BufRead> {
    input: R,
    offset: u64,
    records: u64,
    in_actions: bool,
    separator_consumed: bool,
}

/// Header fields shared by every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub time: EventTime,
    pub ctx: ContextTag,
    pub kind: ActionKind,
}

impl<R: BufRead> LogReader<R> {
    pub fn new(input: R) -> Self {
        LogReader {
            input,
            offset: 0,
            records: 0,
            in_actions: false,
            separator_consumed: false,
        }
    }

    /// Byte offset of the next unread byte.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Number of records started so far.
    pub fn records_read(&self) -> u64 {
        self.records
    }

    // -------------------------------------------------------------------
    // Byte-level helpers
    // -------------------------------------------------------------------

    fn peek(&mut self) -> Result<Option<u8>, CodecError> {
        let buf = self.input.fill_buf()?;
        Ok(buf.first().copied())
    }

    fn bump(&mut self) -> Result<Option<u8>, CodecError> {
        let b = self.peek()?;
        if b.is_some() {
            self.input.consume(1);
            self.offset += 1;
        }
        Ok(b)
    }

    fn bump_required(&mut self) -> Result<u8, CodecError> {
        self.bump()?
            .ok_or(CodecError::UnexpectedEof { offset: self.offset })
    }

    fn skip_whitespace(&mut self) -> Result<(), CodecError> {
        while let Some(b) = self.peek()? {
            if !b.is_ascii_whitespace() {
                break;
            }
            self.bump()?;
        }
        Ok(())
    }

    fn expect_byte(&mut self, expected: u8) -> Result<(), CodecError> {
        self.skip_whitespace()?;
        let offset = self.offset;
        let found = self.bump_required()?;
        if found != expected {
            return Err(CodecError::UnexpectedByte {
                expected: expected as char,
                found: found as char,
                offset,
            });
        }
        Ok(())
    }

    fn read_separator(&mut self, sep: Separator) -> Result<(), CodecError> {
        if sep == Separator::Comma {
            self.expect_byte(b',')?;
        }
        Ok(())
    }

    /// Reads an unquoted scalar token (number, bool, null, `inf`, `NaN`).
    fn read_raw_token(&mut self) -> Result<String, CodecError> {
        self.skip_whitespace()?;
        let mut token = String::new();
        while let Some(b) = self.peek()? {
            if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'+' | b'.') {
                token.push(b as char);
                self.bump()?;
            } else {
                break;
            }
        }
        if token.is_empty() {
            return match self.peek()? {
                Some(b) => Err(CodecError::UnexpectedByte {
                    expected: '0',
                    found: b as char,
                    offset: self.offset,
                }),
                None => Err(CodecError::UnexpectedEof { offset: self.offset }),
            };
        }
        Ok(token)
    }

    fn read_quoted(&mut self) -> Result<String, CodecError> {
        self.expect_byte(b'"')?;
        let start = self.offset;
        let mut bytes = Vec::new();
        loop {
            match self.bump_required()? {
                b'"' => break,
                b'\\' => match self.bump_required()? {
                    b'"' => bytes.push(b'"'),
                    b'\\' => bytes.push(b'\\'),
                    b'n' => bytes.push(b'\n'),
                    b'r' => bytes.push(b'\r'),
                    b't' => bytes.push(b'\t'),
                    b'u' => {
                        let mut hex = String::with_capacity(4);
                        for _ in 0..4 {
                            hex.push(self.bump_required()? as char);
                        }
                        let code = u32::from_str_radix(&hex, 16)
                            .map_err(|_| CodecError::InvalidString { offset: start })?;
                        let c = char::from_u32(code)
                            .ok_or(CodecError::InvalidString { offset: start })?;
                        let mut buf = [0u8; 4];
                        bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                    }
                    _ => return Err(CodecError::InvalidString { offset: start }),
                },
                b => bytes.push(b),
            }
        }
        String::from_utf8(bytes).map_err(|_| CodecError::InvalidString { offset: start })
    }

    fn parse_token<T: FromStr>(&mut self, expected: &'static str) -> Result<T, CodecError> {
        let offset = self.offset;
        let text = self.read_raw_token()?;
        text.parse::<T>().map_err(|_| CodecError::InvalidNumber {
            expected,
            text,
            offset,
        })
    }

    // -------------------------------------------------------------------
    // Log framing
    // -------------------------------------------------------------------

    /// Reads the log header and positions the reader before the first record.
    pub fn begin_log(&mut self) -> Result<u32, CodecError> {
        self.expect_byte(b'{')?;
        let version = self.read_u32(Key::Ttlog, Separator::None)?;
        if version != FORMAT_VERSION {
            return Err(CodecError::UnsupportedVersion { found: version });
        }
        self.read_key(Key::Actions, Separator::Comma)?;
        self.expect_byte(b'[')?;
        self.in_actions = true;
        Ok(version)
    }

    /// Positions the reader at the start of the next record.
    ///
    /// Returns `false` when the record sequence is exhausted, after verifying
    /// the explicit end marker.
    pub fn read_record_start(&mut self) -> Result<bool, CodecError> {
        if !self.in_actions {
            return Ok(false);
        }
        self.skip_whitespace()?;
        match self.peek()? {
            Some(b']') => {
                self.bump()?;
                self.finish_log()?;
                Ok(false)
            }
            None => Err(CodecError::UnexpectedEof { offset: self.offset }),
            Some(_) => {
                if self.records > 0 && !self.separator_consumed {
                    self.expect_byte(b',')?;
                }
                self.separator_consumed = false;
                self.expect_byte(b'{')?;
                self.records += 1;
                Ok(true)
            }
        }
    }

    fn finish_log(&mut self) -> Result<(), CodecError> {
        self.in_actions = false;
        let declared = self.read_u64(Key::EndOfLog, Separator::Comma)?;
        self.expect_byte(b'}')?;
        tracing::trace!(declared, read = self.records, "end of log");
        if declared != self.records {
            return Err(CodecError::RecordCountMismatch {
                declared,
                read: self.records,
            });
        }
        Ok(())
    }

    pub fn read_record_end(&mut self) -> Result<(), CodecError> {
        self.expect_byte(b'}')
    }

    /// Reads the fixed record header, failing on unknown discriminators.
    pub fn read_record_header(&mut self) -> Result<RecordHeader, CodecError> {
        let time = EventTime(self.read_i64(Key::EventTime, Separator::None)?);
        let ctx = ContextTag(self.read_u64(Key::CtxTag, Separator::Comma)?);
        let offset = self.offset;
        let value = self.read_u32(Key::ActionKind, Separator::Comma)?;
        let kind = ActionKind::from_wire(value)
            .ok_or(CodecError::UnknownActionKind { value, offset })?;
        Ok(RecordHeader { time, ctx, kind })
    }

    /// Abandons the current record, skipping to the next line boundary.
    ///
    /// The skipped record still counts towards the end-marker total.
    pub fn skip_record(&mut self) -> Result<(), CodecError> {
        tracing::debug!(record = self.records, offset = self.offset, "skipping record");
        let mut last = None;
        while let Some(b) = self.peek()? {
            if b == b'\n' {
                break;
            }
            if !b.is_ascii_whitespace() {
                last = Some(b);
            }
            self.bump()?;
        }
        // The separator before the next record may have been swallowed.
        self.separator_consumed = last == Some(b',');
        Ok(())
    }

    // -------------------------------------------------------------------
    // Keyed scalars
    // -------------------------------------------------------------------

    /// Reads `"key":`, verifying the key.
    pub fn read_key(&mut self, key: Key, sep: Separator) -> Result<(), CodecError> {
        self.read_separator(sep)?;
        self.skip_whitespace()?;
        let offset = self.offset;
        let found = self.read_quoted()?;
        if found != key.as_str() {
            return Err(CodecError::KeyMismatch {
                expected: key.as_str(),
                found,
                offset,
            });
        }
        self.expect_byte(b':')
    }

    pub fn read_bool(&mut self, key: Key, sep: Separator) -> Result<bool, CodecError> {
        self.read_key(key, sep)?;
        self.parse_token("bool")
    }

    pub fn read_i32(&mut self, key: Key, sep: Separator) -> Result<i32, CodecError> {
        self.read_key(key, sep)?;
        self.parse_token("i32")
    }

    pub fn read_u32(&mut self, key: Key, sep: Separator) -> Result<u32, CodecError> {
        self.read_key(key, sep)?;
        self.parse_token("u32")
    }

    pub fn read_i64(&mut self, key: Key, sep: Separator) -> Result<i64, CodecError> {
        self.read_key(key, sep)?;
        self.parse_token("i64")
    }

    pub fn read_u64(&mut self, key: Key, sep: Separator) -> Result<u64, CodecError> {
        self.read_key(key, sep)?;
        self.parse_token("u64")
    }

    pub fn read_f64(&mut self, key: Key, sep: Separator) -> Result<f64, CodecError> {
        self.read_key(key, sep)?;
        self.parse_token("f64")
    }

    pub fn read_string(&mut self, key: Key, sep: Separator) -> Result<String, CodecError> {
        self.read_key(key, sep)?;
        self.read_quoted()
    }

    pub fn read_tag(&mut self, key: Key, sep: Separator) -> Result<IdentityTag, CodecError> {
        Ok(IdentityTag(self.read_u64(key, sep)?))
    }

    /// Reads the length prefix of a following sequence.
    pub fn read_length(&mut self, sep: Separator) -> Result<u32, CodecError> {
        self.read_u32(Key::Length, sep)
    }

    /// Reads `null` if it is the next token; otherwise leaves the stream
    /// untouched and returns `false`.
    pub fn read_null_or_object(&mut self) -> Result<bool, CodecError> {
        self.skip_whitespace()?;
        match self.peek()? {
            Some(b'n') => {
                let offset = self.offset;
                let token = self.read_raw_token()?;
                if token != "null" {
                    return Err(CodecError::InvalidNumber {
                        expected: "null",
                        text: token,
                        offset,
                    });
                }
                Ok(true)
            }
            Some(b'{') => {
                self.bump()?;
                Ok(false)
            }
            Some(b) => Err(CodecError::UnexpectedByte {
                expected: '{',
                found: b as char,
                offset: self.offset,
            }),
            None => Err(CodecError::UnexpectedEof { offset: self.offset }),
        }
    }

    pub fn read_object_end(&mut self) -> Result<(), CodecError> {
        self.expect_byte(b'}')
    }

    // -------------------------------------------------------------------
    // Sequences
    // -------------------------------------------------------------------

    pub fn read_sequence_start(&mut self, key: Key, sep: Separator) -> Result<(), CodecError> {
        self.read_key(key, sep)?;
        self.expect_byte(b'[')
    }

    pub fn read_sequence_end(&mut self) -> Result<(), CodecError> {
        self.expect_byte(b']')
    }

    pub fn read_naked_u8(&mut self, sep: Separator) -> Result<u8, CodecError> {
        self.read_separator(sep)?;
        self.parse_token("u8")
    }

    /// Reads a length-prefixed byte buffer written by `write_bytes`.
    pub fn read_bytes(&mut self, sep: Separator) -> Result<Vec<u8>, CodecError> {
        let len = self.read_length(sep)?;
        let mut bytes = Vec::with_capacity(prealloc(len));
        self.read_sequence_start(Key::Bytes, Separator::Comma)?;
        for i in 0..len {
            let sep = if i == 0 { Separator::None } else { Separator::Comma };
            bytes.push(self.read_naked_u8(sep)?);
        }
        self.read_sequence_end()?;
        Ok(bytes)
    }

    // -------------------------------------------------------------------
    // Encoded values
    // -------------------------------------------------------------------

    /// Reads a single-case encoded value object.
    pub fn read_arg_ret_value(&mut self, sep: Separator) -> Result<ArgRetValue, CodecError> {
        self.read_separator(sep)?;
        self.expect_byte(b'{')?;
        self.skip_whitespace()?;
        let offset = self.offset;
        let case = self.read_quoted()?;
        self.expect_byte(b':')?;
        let value = match case.as_str() {
            "nullVal" => {
                let token = self.read_raw_token()?;
                if token != "null" {
                    return Err(CodecError::InvalidNumber {
                        expected: "null",
                        text: token,
                        offset,
                    });
                }
                ArgRetValue::Null
            }
            "boolVal" => ArgRetValue::Bool(self.parse_token("bool")?),
            "i32Val" => ArgRetValue::I32(self.parse_token("i32")?),
            "u32Val" => ArgRetValue::U32(self.parse_token("u32")?),
            "i64Val" => ArgRetValue::I64(self.parse_token("i64")?),
            "u64Val" => ArgRetValue::U64(self.parse_token("u64")?),
            "doubleVal" => ArgRetValue::F64(self.parse_token("f64")?),
            "stringVal" => ArgRetValue::Str(self.read_quoted()?),
            "tagVal" => ArgRetValue::Tagged(IdentityTag(self.parse_token("u64")?)),
            _ => return Err(CodecError::UnknownValueCase { found: case, offset }),
        };
        self.expect_byte(b'}')?;
        Ok(value)
    }

    /// Reads `"key":` followed by an encoded value.
    pub fn read_keyed_value(&mut self, key: Key, sep: Separator) -> Result<ArgRetValue, CodecError> {
        self.read_key(key, sep)?;
        self.read_arg_ret_value(Separator::None)
    }

    /// Reads a length-prefixed sequence of encoded values.
    pub fn read_values(&mut self, sep: Separator) -> Result<Vec<ArgRetValue>, CodecError> {
        let len = self.read_length(sep)?;
        let mut values = Vec::with_capacity(prealloc(len));
        self.read_sequence_start(Key::Values, Separator::Comma)?;
        for i in 0..len {
            let sep = if i == 0 { Separator::None } else { Separator::Comma };
            values.push(self.read_arg_ret_value(sep)?);
        }
        self.read_sequence_end()?;
        Ok(values)
    }
}

/// Capacity to reserve for a sequence whose length prefix came from the log.
/// Longer sequences grow as their elements are actually read.
fn prealloc(len: u32) -> usize {
    (len as usize).min(MAX_PREALLOC)
}

const MAX_PREALLOC: usize = 1024;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::LogWriter;
    use proptest::prelude::*;

    fn reader(text: &str) -> LogReader<&[u8]> {
        LogReader::new(text.as_bytes())
    }

    #[test]
    fn reads_written_record() {
        let mut w = LogWriter::new(Vec::new());
        w.begin_log().unwrap();
        w.write_record_start().unwrap();
        w.write_record_header(EventTime(1), ContextTag(2), ActionKind::AllocateObject)
            .unwrap();
        w.write_bool(Key::BoolVal, true, Separator::Comma).unwrap();
        w.write_record_end().unwrap();
        w.end_log().unwrap();
        let bytes = w.into_inner();

        let mut r = LogReader::new(bytes.as_slice());
        assert_eq!(r.begin_log().unwrap(), FORMAT_VERSION);
        assert!(r.read_record_start().unwrap());
        let header = r.read_record_header().unwrap();
        assert_eq!(
            header,
            RecordHeader {
                time: EventTime(1),
                ctx: ContextTag(2),
                kind: ActionKind::AllocateObject,
            }
        );
        assert!(r.read_bool(Key::BoolVal, Separator::Comma).unwrap());
        r.read_record_end().unwrap();
        assert!(!r.read_record_start().unwrap());
        // Exhausted readers stay exhausted.
        assert!(!r.read_record_start().unwrap());
    }

    #[test]
    fn unknown_action_kind_is_reported_with_offset() {
        let mut r = reader(r#"{"ttlog":1,"actions":[
{"eventTime":1,"ctxTag":1,"actionKind":99}
],"endOfLog":1}"#);
        r.begin_log().unwrap();
        assert!(r.read_record_start().unwrap());
        match r.read_record_header() {
            Err(CodecError::UnknownActionKind { value: 99, .. }) => {}
            other => panic!("expected UnknownActionKind, got {:?}", other),
        }
    }

    #[test]
    fn unsupported_version() {
        let mut r = reader(r#"{"ttlog":7,"actions":[],"endOfLog":0}"#);
        assert!(matches!(
            r.begin_log(),
            Err(CodecError::UnsupportedVersion { found: 7 })
        ));
    }

    #[test]
    fn key_mismatch() {
        let mut r = reader(r#""ctxTag":1"#);
        match r.read_u64(Key::EventTime, Separator::None) {
            Err(CodecError::KeyMismatch { expected, found, .. }) => {
                assert_eq!(expected, "eventTime");
                assert_eq!(found, "ctxTag");
            }
            other => panic!("expected KeyMismatch, got {:?}", other),
        }
    }

    #[test]
    fn end_marker_count_is_checked() {
        let mut r = reader("{\"ttlog\":1,\"actions\":[\n],\"endOfLog\":3}");
        r.begin_log().unwrap();
        assert!(matches!(
            r.read_record_start(),
            Err(CodecError::RecordCountMismatch { declared: 3, read: 0 })
        ));
    }

    #[test]
    fn truncated_stream() {
        let mut r = reader("{\"ttlog\":1,\"actions\":[\n{\"eventTime\":1");
        r.begin_log().unwrap();
        assert!(r.read_record_start().unwrap());
        r.read_i64(Key::EventTime, Separator::None).unwrap();
        assert!(matches!(
            r.read_u64(Key::CtxTag, Separator::Comma),
            Err(CodecError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn skip_record_resynchronises_on_the_next_line() {
        let mut r = reader(
            "{\"ttlog\":1,\"actions\":[\n{\"eventTime\":1,\"ctxTag\":1,\"actionKind\":50,\"junk\":[1,2]},\n{\"eventTime\":2,\"ctxTag\":1,\"actionKind\":6}\n],\"endOfLog\":2}",
        );
        r.begin_log().unwrap();
        assert!(r.read_record_start().unwrap());
        assert!(r.read_record_header().is_err());
        r.skip_record().unwrap();
        assert!(r.read_record_start().unwrap());
        let header = r.read_record_header().unwrap();
        assert_eq!(header.kind, ActionKind::GetAndClearException);
        r.read_record_end().unwrap();
        assert!(!r.read_record_start().unwrap());
    }

    #[test]
    fn unknown_value_case() {
        let mut r = reader(r#"{"floatVal":1}"#);
        assert!(matches!(
            r.read_arg_ret_value(Separator::None),
            Err(CodecError::UnknownValueCase { .. })
        ));
    }

    #[test]
    fn zero_length_bytes() {
        let mut r = reader(r#""length":0,"bytes":[]"#);
        assert_eq!(r.read_bytes(Separator::None).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn oversized_length_prefix_is_an_error() {
        let mut r = reader(r#""length":4294967295,"values":["#);
        assert!(matches!(
            r.read_values(Separator::None),
            Err(CodecError::UnexpectedEof { .. })
        ));

        let mut r = reader(r#""length":4294967295,"bytes":[1,2]}"#);
        assert!(r.read_bytes(Separator::None).is_err());
    }

    #[test]
    fn null_or_object() {
        let mut r = reader(r#"null,{"name":"f"}"#);
        assert!(r.read_null_or_object().unwrap());
        r.expect_byte(b',').unwrap();
        assert!(!r.read_null_or_object().unwrap());
        assert_eq!(r.read_string(Key::Name, Separator::None).unwrap(), "f");
        r.read_object_end().unwrap();
    }

    fn arg_ret_value() -> impl Strategy<Value = ArgRetValue> {
        prop_oneof![
            Just(ArgRetValue::Null),
            any::<bool>().prop_map(ArgRetValue::Bool),
            any::<i32>().prop_map(ArgRetValue::I32),
            any::<u32>().prop_map(ArgRetValue::U32),
            any::<i64>().prop_map(ArgRetValue::I64),
            any::<u64>().prop_map(ArgRetValue::U64),
            any::<f64>()
                .prop_filter("NaN never compares equal", |v| !v.is_nan())
                .prop_map(ArgRetValue::F64),
            ".*".prop_map(ArgRetValue::Str),
            any::<u64>().prop_map(|t| ArgRetValue::Tagged(IdentityTag(t))),
        ]
    }

    proptest! {
        #[test]
        fn value_sequences_survive_the_codec(values in proptest::collection::vec(arg_ret_value(), 0..8)) {
            let mut w = LogWriter::new(Vec::new());
            w.write_values(&values, Separator::None).unwrap();
            let bytes = w.into_inner();
            let mut r = LogReader::new(bytes.as_slice());
            prop_assert_eq!(r.read_values(Separator::None).unwrap(), values);
        }

        #[test]
        fn byte_buffers_survive_the_codec(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
            let mut w = LogWriter::new(Vec::new());
            w.write_bytes(&bytes, Separator::None).unwrap();
            let out = w.into_inner();
            let mut r = LogReader::new(out.as_slice());
            prop_assert_eq!(r.read_bytes(Separator::None).unwrap(), bytes);
        }
    }
}
