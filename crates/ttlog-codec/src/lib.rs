//! Streaming codec for the ttlog tagged log format.
//!
//! A log is a single JSON-compatible document:
//!
//! ```text
//! {"ttlog":1,"actions":[
//! {"eventTime":1,"ctxTag":1,"actionKind":2,"boolVal":true},
//! {"eventTime":2,"ctxTag":1,"actionKind":6}
//! ],"endOfLog":2}
//! ```
//!
//! Each record occupies one line, which lets a reader skip a record it
//! cannot parse. [`LogWriter`] and [`LogReader`] expose symmetric keyed
//! primitives; per-kind field layouts live with the action payloads.

pub mod error;
pub mod reader;
pub mod token;
pub mod writer;

pub use error::CodecError;
pub use reader::{LogReader, RecordHeader};
pub use token::{Key, Separator, FORMAT_VERSION};
pub use writer::LogWriter;
