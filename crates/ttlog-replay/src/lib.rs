//! Recording, log I/O and replay of action events.
//!
//! An action log captures every interaction between an embedding host and a
//! script runtime as a totally ordered sequence of [`ActionEvent`]s. This
//! crate records such logs from a live runtime, writes and reads them in the
//! tagged text format from `ttlog-codec`, and replays them against a fresh
//! runtime so that execution can be reproduced and stepped through.
//!
//! # Modules
//!
//! - [`action`]: the closed action type and its serialize/parse/execute operations
//! - [`arena`]: log-lifetime storage for parsed or recorded actions
//! - [`recorder`]: builds logs from observed runtime operations
//! - [`session`]: per-replay state (tags, call stack, callbacks)
//! - [`driver`]: steps or runs a log, with checkpoint fast-forward
//! - [`runtime`]: the [`Runtime`] contract replay drives
//! - [`sandbox`]: an in-memory [`Runtime`] for tests and offline replay
//! - [`source`]: storage for script text referenced by code-parse actions
//! - [`callstack`], [`callbacks`], [`checkpoint`], [`cache`]: replay bookkeeping
//! - [`config`], [`error`]

pub mod action;
pub mod arena;
pub mod cache;
pub mod callbacks;
pub mod callstack;
pub mod checkpoint;
pub mod config;
pub mod driver;
pub mod error;
pub mod recorder;
pub mod runtime;
pub mod sandbox;
pub mod session;
pub mod source;

pub use action::{ActionEvent, ActionPayload, CallArgs, CodeLoad};
pub use arena::ActionArena;
pub use config::{RecorderConfig, ReplayConfig};
pub use driver::{AbortHandle, DriverState, ReplayDriver, Step};
pub use error::{LogError, RecordError, ReplayError, SourceError};
pub use recorder::Recorder;
pub use runtime::{CallOutcome, Runtime, RuntimeFault, StatementPosition, Thrown};
pub use sandbox::{ObjRef, SandboxRuntime};
pub use session::ReplaySession;
pub use source::{DirSourceStore, InMemorySourceStore, SourceStore};
