//! Error types for recording, log I/O and replay.
//!
//! - [`SourceError`]: failures of the script-source store.
//! - [`LogError`]: serializing or parsing an action log (codec + sources).
//! - [`RecordError`]: appending actions while recording.
//! - [`ReplayError`]: executing a parsed log against a live runtime.
//!
//! Every replay error that concerns a specific action carries its
//! [`EventTime`] so a debugger can pinpoint it.

use std::path::PathBuf;

use thiserror::Error;

use ttlog_codec::CodecError;
use ttlog_core::{ActionKind, ContextTag, CoreError, EventTime, IdentityTag};

use crate::runtime::RuntimeFault;

/// Errors produced by a [`SourceStore`](crate::source::SourceStore).
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no source stored for {dir}/{doc}/{uri}")]
    NotFound {
        dir: String,
        doc: String,
        uri: String,
    },

    #[error("source for {uri} has length {found}, log declares {declared}")]
    LengthMismatch {
        uri: String,
        declared: u32,
        found: usize,
    },
}

/// Errors produced while writing or reading an action log.
#[derive(Debug, Error)]
pub enum LogError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Errors produced while recording.
#[derive(Debug, Error)]
pub enum RecordError {
    /// A complex value reached the log boundary before it was tagged.
    #[error("untagged {kind} value passed to the recorder")]
    UntaggedValue { kind: ActionKind },

    /// An explicitly appended action does not advance the clock.
    #[error("action at time {time} does not follow time {previous}")]
    OutOfOrder { previous: EventTime, time: EventTime },

    /// `end_call` named a call-begin that is not the innermost open call.
    #[error("call end names begin {matching}, innermost open call began at {open:?}")]
    CallMismatch {
        matching: EventTime,
        open: Option<EventTime>,
    },

    /// An action was recorded at `i64::MAX`; no later time exists.
    #[error("event clock exhausted")]
    ClockExhausted,

    /// The runtime failed while producing an observed value.
    ///
    /// The action is not appended and the recorder stays usable.
    #[error("recording {kind} failed: {fault}")]
    RecordingFailure { kind: ActionKind, fault: RuntimeFault },
}

/// Errors produced while replaying a log.
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error(transparent)]
    Log(#[from] LogError),

    /// An identity-tag reference was never registered in this session.
    #[error("unresolved identity tag {tag} at time {time}")]
    UnresolvedTag { time: EventTime, tag: IdentityTag },

    /// A complex value crossed the log boundary without a tag.
    #[error("untagged value at time {time}")]
    UntaggedValue { time: EventTime },

    /// The action names a context the runtime does not know.
    #[error("unknown execution context {ctx} at time {time}: {fault}")]
    UnknownContext {
        time: EventTime,
        ctx: ContextTag,
        fault: RuntimeFault,
    },

    /// The replayed operation itself failed.
    #[error("{kind} at time {time} failed: {fault}")]
    ExecutionFailure {
        time: EventTime,
        kind: ActionKind,
        fault: RuntimeFault,
    },

    /// The log ended while a call-begin was still open.
    #[error("log ended with call begun at {begin} still open")]
    TruncatedLog { begin: EventTime },

    /// A call-end does not match the innermost open call-begin.
    #[error("call end at {time} names begin {matching}, innermost open call began at {open:?}")]
    CallMismatch {
        time: EventTime,
        matching: EventTime,
        open: Option<EventTime>,
    },

    /// A call action's nesting depth disagrees with the replayed call stack.
    #[error("call action at {time} has depth {recorded}, replay is at depth {actual}")]
    DepthMismatch {
        time: EventTime,
        recorded: u32,
        actual: u32,
    },

    /// Nested calls exceed the configured limit.
    #[error("call depth limit ({limit}) exceeded at time {time}")]
    CallDepthExceeded { time: EventTime, limit: usize },

    /// Event times are not strictly increasing.
    #[error("action at time {time} does not follow time {previous}")]
    OutOfOrder { previous: EventTime, time: EventTime },

    /// A root call ended with a script or terminating exception.
    ///
    /// Raised once per root call after call-stack bookkeeping completes.
    #[error("uncaught exception in root call begun at {root} (ended at {end})")]
    UncaughtException {
        root: EventTime,
        end: EventTime,
        terminating: bool,
    },

    /// The replayed call outcome differs from the recorded exception flags.
    #[error("call ended at {time}: recorded exception={recorded}, replayed exception={replayed}")]
    ExceptionDivergence {
        time: EventTime,
        recorded: bool,
        replayed: bool,
    },

    /// The embedding host aborted the replay between actions.
    #[error("replay aborted before time {next:?}")]
    Aborted { next: Option<EventTime> },

    /// The driver already faulted; the session cannot continue.
    #[error("replay session has faulted")]
    Faulted,
}

impl ReplayError {
    /// Maps a value-encoding failure at `time` into a replay error.
    pub fn from_core(time: EventTime, err: CoreError) -> Self {
        match err {
            CoreError::UnresolvedTag { tag } => ReplayError::UnresolvedTag { time, tag },
            CoreError::UntaggedValue => ReplayError::UntaggedValue { time },
            CoreError::TagAlreadyBound { tag } | CoreError::TagOutOfOrder { tag, .. } => {
                ReplayError::UnresolvedTag { time, tag }
            }
            CoreError::ClockExhausted { time: previous } => ReplayError::OutOfOrder { previous, time },
        }
    }

    /// Whether this error ends the session for good.
    ///
    /// Uncaught exceptions and aborts leave the driver usable.
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            ReplayError::UncaughtException { .. } | ReplayError::Aborted { .. }
        )
    }
}
