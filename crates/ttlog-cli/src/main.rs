//! Action log tools.
//!
//! Provides the `ttlog` binary:
//!
//! - `dump` prints every record of a log, as text or JSON
//! - `verify` checks event ordering and call nesting without replaying
//! - `replay` executes a log against the in-memory sandbox runtime
//!
//! Script text referenced by code-parse records is read from a source
//! directory (`--sources` or `TTLOG_SOURCES`), defaulting to the directory
//! holding the log. Set `RUST_LOG` for diagnostic output on stderr.

use std::error::Error;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ttlog_codec::LogReader;
use ttlog_core::EventTime;
use ttlog_replay::action::ActionPayload;
use ttlog_replay::{
    ActionArena, ActionEvent, DirSourceStore, ReplayConfig, ReplayDriver, ReplayError,
    ReplaySession, SandboxRuntime,
};

/// Time-travel action log tools.
#[derive(Parser)]
#[command(name = "ttlog", about = "Inspect, verify and replay action logs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the records of a log.
    Dump {
        log: PathBuf,

        /// Directory holding script sources.
        #[arg(short, long, env = "TTLOG_SOURCES")]
        sources: Option<PathBuf>,

        /// Emit the parsed actions as a JSON array.
        #[arg(long)]
        json: bool,

        /// Skip records that fail to parse instead of stopping.
        #[arg(long)]
        skip_bad: bool,
    },

    /// Check event ordering and call nesting.
    Verify {
        log: PathBuf,

        #[arg(short, long, env = "TTLOG_SOURCES")]
        sources: Option<PathBuf>,
    },

    /// Replay a log against the sandbox runtime.
    Replay {
        log: PathBuf,

        #[arg(short, long, env = "TTLOG_SOURCES")]
        sources: Option<PathBuf>,

        /// Maximum nested call depth.
        #[arg(long, env = "TTLOG_MAX_DEPTH", default_value_t = 256)]
        max_depth: usize,

        /// Stop after the action at this event time.
        #[arg(long)]
        until: Option<i64>,

        /// Fail when a call's outcome differs from its recorded exception flags.
        #[arg(long)]
        verify_exceptions: bool,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Dump {
            log,
            sources,
            json,
            skip_bad,
        } => run_dump(&log, sources, json, skip_bad),
        Commands::Verify { log, sources } => run_verify(&log, sources),
        Commands::Replay {
            log,
            sources,
            max_depth,
            until,
            verify_exceptions,
        } => {
            let config = ReplayConfig {
                max_call_depth: max_depth,
                verify_exception_flags: verify_exceptions,
                ..ReplayConfig::default()
            };
            run_replay(&log, sources, config, until.map(EventTime))
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// The source store for `log`: the explicit directory, else the log's own.
fn source_store(log: &Path, sources: Option<PathBuf>) -> DirSourceStore {
    let root = sources.unwrap_or_else(|| {
        log.parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    });
    DirSourceStore::new(root)
}

fn open(log: &Path) -> Result<BufReader<File>, Box<dyn Error>> {
    let file = File::open(log)
        .map_err(|e| format!("failed to open log '{}': {}", log.display(), e))?;
    Ok(BufReader::new(file))
}

fn load(log: &Path, sources: Option<PathBuf>) -> Result<ActionArena, Box<dyn Error>> {
    let store = source_store(log, sources);
    let arena = ActionArena::read_log(open(log)?, &store)?;
    Ok(arena)
}

// ---------------------------------------------------------------------------
// dump
// ---------------------------------------------------------------------------

fn run_dump(
    log: &Path,
    sources: Option<PathBuf>,
    json: bool,
    skip_bad: bool,
) -> Result<(), Box<dyn Error>> {
    let store = source_store(log, sources);
    let mut reader = LogReader::new(open(log)?);
    reader.begin_log()?;

    let mut arena = ActionArena::new();
    let mut skipped = 0usize;
    loop {
        let offset = reader.offset();
        match ActionEvent::deserialize(&mut reader, &store) {
            Ok(Some(event)) => {
                arena.push(event);
            }
            Ok(None) => break,
            Err(e) if skip_bad => {
                eprintln!("skipping record {}: {}", reader.records_read(), e);
                reader.skip_record()?;
                // No progress means the damage is in the framing, not a record.
                if reader.offset() == offset {
                    return Err(e.into());
                }
                skipped += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(arena.events())?);
    } else {
        for event in &arena {
            println!("{}", describe(event));
        }
    }
    if skipped > 0 {
        eprintln!("{} record(s) skipped", skipped);
    }
    Ok(())
}

/// One-line summary of an action.
fn describe(event: &ActionEvent) -> String {
    let detail = match &event.payload {
        ActionPayload::CallBegin(begin) => format!(
            " depth={} function={} callback={} args={}",
            begin.depth,
            begin.function,
            begin.host_callback_id,
            begin.args.len()
        ),
        ActionPayload::CallEnd(end) => format!(
            " begin={} depth={} exception={} terminating={}",
            end.matching_begin, end.depth, end.has_script_exception, end.has_terminating_exception
        ),
        ActionPayload::CodeParse(load) => {
            format!(" doc={} uri={} length={}", load.document_id, load.uri, load.source.len())
        }
        ActionPayload::CallbackOp(op) => format!(
            " {} id={} function={}",
            if op.is_cancel { "cancel" } else { "schedule" },
            op.callback_id,
            op.function
        ),
        _ => String::new(),
    };
    format!(
        "{:>8} ctx={} {}{}",
        event.time.to_string(),
        event.ctx,
        event.kind(),
        detail
    )
}

// ---------------------------------------------------------------------------
// verify
// ---------------------------------------------------------------------------

fn run_verify(log: &Path, sources: Option<PathBuf>) -> Result<(), Box<dyn Error>> {
    let arena = load(log, sources)?;
    let problems = structural_problems(&arena);
    for problem in &problems {
        eprintln!("{}", problem);
    }
    if !problems.is_empty() {
        return Err(format!("{} problem(s) in {} action(s)", problems.len(), arena.len()).into());
    }
    println!("ok: {} action(s)", arena.len());
    Ok(())
}

/// Ordering and call-nesting violations, in log order.
fn structural_problems(arena: &ActionArena) -> Vec<String> {
    let mut problems = Vec::new();
    let mut previous: Option<EventTime> = None;
    let mut open: Vec<EventTime> = Vec::new();

    for event in arena {
        if let Some(prev) = previous {
            if event.time <= prev {
                problems.push(format!("time {} does not follow {}", event.time, prev));
            }
        }
        previous = Some(event.time);

        match &event.payload {
            ActionPayload::CallBegin(begin) => {
                if begin.depth as usize != open.len() {
                    problems.push(format!(
                        "call begin {} has depth {}, expected {}",
                        event.time,
                        begin.depth,
                        open.len()
                    ));
                }
                open.push(event.time);
            }
            ActionPayload::CallEnd(end) => match open.pop() {
                Some(begin) if begin == end.matching_begin => {
                    if end.depth as usize != open.len() {
                        problems.push(format!(
                            "call end {} has depth {}, expected {}",
                            event.time,
                            end.depth,
                            open.len()
                        ));
                    }
                }
                Some(begin) => problems.push(format!(
                    "call end {} names begin {}, innermost open call began at {}",
                    event.time, end.matching_begin, begin
                )),
                None => problems.push(format!(
                    "call end {} names begin {} with no call open",
                    event.time, end.matching_begin
                )),
            },
            _ => {}
        }
    }

    if let Some(begin) = open.first() {
        problems.push(format!("log ends with call begun at {} still open", begin));
    }
    problems
}

// ---------------------------------------------------------------------------
// replay
// ---------------------------------------------------------------------------

fn run_replay(
    log: &Path,
    sources: Option<PathBuf>,
    config: ReplayConfig,
    until: Option<EventTime>,
) -> Result<(), Box<dyn Error>> {
    let arena = load(log, sources)?;
    let session = ReplaySession::new(SandboxRuntime::new(), config);
    let mut driver = ReplayDriver::new(&arena, session);

    let mut uncaught = 0usize;
    loop {
        let result = match until {
            Some(target) => driver.run_until(target),
            None => driver.run(),
        };
        match result {
            Ok(()) => break,
            Err(ReplayError::UncaughtException {
                root,
                end,
                terminating,
            }) => {
                uncaught += 1;
                let what = if terminating { "terminating" } else { "uncaught" };
                eprintln!("{} exception in root call {} (ended at {})", what, root, end);
            }
            Err(e) => return Err(e.into()),
        }
    }

    let session = driver.session();
    println!(
        "replayed {} of {} action(s), last time {}",
        driver.position(),
        arena.len(),
        driver
            .last_time()
            .map_or_else(|| "-".to_string(), |t| t.to_string())
    );
    println!(
        "calls: {}, tagged objects: {}, pending callbacks: {}, uncaught exceptions: {}",
        session.runtime().calls(),
        session.tags().len(),
        session.callbacks().len(),
        uncaught
    );
    Ok(())
}
