//! End-to-end replay scenarios: record against one sandbox, replay against
//! a fresh one.

use std::io::Cursor;
use std::sync::Arc;

use ttlog_core::{
    ArgRetValue, BodyCounterId, CallbackId, ContextTag, DocumentId, EventTime, IdentityTag,
    PropertyId, Value,
};
use ttlog_replay::action::ActionPayload;
use ttlog_replay::sandbox::ObjectKind;
use ttlog_replay::{
    ActionArena, ActionEvent, CodeLoad, DriverState, InMemorySourceStore, ObjRef, Recorder,
    ReplayConfig, ReplayDriver, ReplayError, ReplaySession, Runtime, SandboxRuntime, Step,
};

const CTX: ContextTag = ContextTag(1);
const NAME: PropertyId = PropertyId(4);

fn script(doc: u64, text: &str) -> CodeLoad {
    CodeLoad {
        document_id: DocumentId(doc),
        load_flags: 0,
        body_counter_id: BodyCounterId(doc),
        source_dir: "logs".to_string(),
        source_file: format!("script{doc}.js"),
        uri: format!("file:///script{doc}.js"),
        source: Arc::from(text),
    }
}

/// A live sandbox and the recorder observing it.
struct Host {
    rt: SandboxRuntime,
    rec: Recorder<ObjRef>,
    clock: f64,
}

impl Host {
    fn new() -> Self {
        Host {
            rt: SandboxRuntime::new(),
            rec: Recorder::default(),
            clock: 0.0,
        }
    }

    fn load(&mut self, doc: u64, text: &str) -> ObjRef {
        let load = script(doc, text);
        let f = self.rt.load_script(&load).unwrap();
        self.rec.record_code_parse(CTX, load, &f).unwrap();
        f
    }

    fn object(&mut self) -> ObjRef {
        let obj = self.rt.create_object(true).unwrap();
        self.rec.record_allocate_object(CTX, true, &obj).unwrap();
        obj
    }

    fn root_call(
        &mut self,
        f: &ObjRef,
        args: &[Value<ObjRef>],
    ) -> Result<Value<ObjRef>, Value<ObjRef>> {
        self.clock += 1.0;
        let begin = self
            .rec
            .begin_call(CTX, f, args, CallbackId::NONE, self.clock, None)
            .unwrap();
        let outcome = self.rt.call(f, args);
        self.rec.end_call(CTX, begin, &outcome, self.clock).unwrap();
        outcome.map_err(|t| t.value)
    }

    fn finish(self) -> (ActionArena, Recorder<ObjRef>) {
        let log = self.rec.log().events().to_vec();
        let mut arena = ActionArena::new();
        for event in log {
            arena.push(event);
        }
        (arena, self.rec)
    }
}

fn session(config: ReplayConfig) -> ReplaySession<SandboxRuntime> {
    ReplaySession::new(SandboxRuntime::new(), config)
}

fn no_fast_forward() -> ReplayConfig {
    ReplayConfig {
        fast_forward: false,
        ..ReplayConfig::default()
    }
}

/// Writes and re-reads a log so replays run against parsed actions.
fn reparse(arena: &ActionArena) -> ActionArena {
    let mut sources = InMemorySourceStore::new();
    let bytes = arena.write_log(Vec::new(), &mut sources).unwrap();
    ActionArena::read_log(Cursor::new(bytes), &sources).unwrap()
}

// ---------------------------------------------------------------------------
// Tag resolution
// ---------------------------------------------------------------------------

#[test]
fn property_writes_land_on_the_replayed_object() {
    let mut host = Host::new();
    let obj = host.object();
    host.rt
        .set_property(&obj, NAME, &Value::Str("ada".into()), false)
        .unwrap();
    host.rec
        .record_set_property(CTX, &obj, NAME, &Value::Str("ada".into()), false)
        .unwrap();
    let (log, rec) = host.finish();
    let log = reparse(&log);

    let mut driver = ReplayDriver::new(&log, session(ReplayConfig::default()));
    driver.run().unwrap();
    assert_eq!(driver.state(), DriverState::Idle);

    let session = driver.into_session();
    assert!(rec.tags().is_isomorphic(session.tags()));
    let replayed = session.tags().resolve(IdentityTag(1)).unwrap();
    assert_eq!(
        session.runtime().property(replayed, NAME),
        Some(&Value::Str("ada".into()))
    );
}

#[test]
fn unresolved_tag_names_the_failing_action() {
    let mut log = ActionArena::new();
    log.push(ActionEvent::new(
        EventTime(1),
        CTX,
        ActionPayload::AllocateObject { regular: true },
    ));
    log.push(ActionEvent::new(
        EventTime(2),
        CTX,
        ActionPayload::SetProperty {
            object: ArgRetValue::Tagged(IdentityTag(5)),
            property: NAME,
            value: ArgRetValue::I32(1),
            strict: false,
        },
    ));

    let mut driver = ReplayDriver::new(&log, session(ReplayConfig::default()));
    let err = driver.run().unwrap_err();
    assert!(matches!(
        err,
        ReplayError::UnresolvedTag {
            time: EventTime(2),
            tag: IdentityTag(5)
        }
    ));
    assert_eq!(driver.state(), DriverState::Faulted);
    assert!(matches!(driver.step(), Err(ReplayError::Faulted)));
}

#[test]
fn nested_call_effects_replay_in_recorded_order() {
    // The outer call's body calls back into the host, which runs the inner
    // call to completion before the outer call allocates its own result.
    let mut host = Host::new();
    let make = host.load(1, "new object");
    let outer = host.rec.begin_call(CTX, &make, &[], CallbackId::NONE, 0.0, None).unwrap();
    let inner = host.rec.begin_call(CTX, &make, &[], CallbackId::NONE, 0.0, None).unwrap();
    let inner_result = host.rt.call(&make, &[]);
    host.rec.end_call(CTX, inner, &inner_result, 0.0).unwrap();
    let marker = host.object();
    let outer_result = host.rt.call(&make, &[]);
    host.rec.end_call(CTX, outer, &outer_result, 0.0).unwrap();
    let recorded_heap = host.rt.heap().to_vec();
    let (log, rec) = host.finish();
    let log = reparse(&log);

    let mut driver = ReplayDriver::new(&log, session(ReplayConfig::default()));

    // While the inner call is open the outer one has not produced anything.
    driver.run_until(EventTime(3)).unwrap();
    assert_eq!(driver.session().call_stack().depth(), 2);
    assert_eq!(driver.session().runtime().calls(), 0);

    driver.run().unwrap();
    let session = driver.into_session();

    assert!(rec.tags().is_isomorphic(session.tags()));
    assert_eq!(session.tags().len(), 4);
    for tag in 1..=4 {
        assert_eq!(
            rec.tags().resolve(IdentityTag(tag)).unwrap(),
            session.tags().resolve(IdentityTag(tag)).unwrap()
        );
    }
    assert_eq!(session.tags().resolve(IdentityTag(3)).unwrap(), &marker);
    assert_eq!(session.runtime().heap(), recorded_heap.as_slice());
    assert_eq!(session.runtime().calls(), 2);
}

#[test]
fn independent_sessions_assign_identical_tags() {
    let mut host = Host::new();
    let make = host.load(1, "new object");
    let obj = host.object();
    host.root_call(&make, &[Value::Object(obj)]).unwrap();
    let keys = host.rt.get_own_property_keys(&obj, true).unwrap();
    host.rec.record_get_own_properties_info(CTX, &obj, true, &keys).unwrap();
    let (log, _) = host.finish();
    let log = reparse(&log);

    let mut first = ReplayDriver::new(&log, session(no_fast_forward()));
    first.run().unwrap();
    let mut second = ReplayDriver::new(&log, session(no_fast_forward()));
    second.run().unwrap();

    let a = first.into_session();
    let b = second.into_session();
    assert!(a.tags().is_isomorphic(b.tags()));
    assert_eq!(a.tags().len(), 4);
    assert_eq!(a.runtime().heap(), b.runtime().heap());
}

// ---------------------------------------------------------------------------
// Calls and exceptions
// ---------------------------------------------------------------------------

#[test]
fn uncaught_root_exception_is_raised_once() {
    let mut host = Host::new();
    let boom = host.load(1, "throw boom");
    let echo = host.load(2, "echo");
    let thrown = host.root_call(&boom, &[]).unwrap_err();
    host.rec
        .record_get_and_clear_exception(CTX, Ok(Some(thrown)))
        .unwrap();
    host.root_call(&echo, &[Value::I32(1)]).unwrap();
    let (log, _) = host.finish();
    let log = reparse(&log);

    let mut driver = ReplayDriver::new(&log, session(ReplayConfig::default()));
    let err = driver.run().unwrap_err();
    assert!(matches!(
        err,
        ReplayError::UncaughtException {
            root: EventTime(3),
            end: EventTime(4),
            terminating: false
        }
    ));
    // The root call's bookkeeping completed before the error surfaced.
    assert_eq!(driver.state(), DriverState::Idle);
    assert!(driver.session().call_stack().is_empty());
    assert_eq!(
        driver.session().call_stack().matching_end(EventTime(3)),
        Some(EventTime(4))
    );
    assert!(driver.session().pending_exception().is_some());

    // Continuing replays the rest without raising again.
    driver.run().unwrap();
    assert!(driver.session().pending_exception().is_none());
    assert_eq!(driver.session().runtime().calls(), 2);
}

#[test]
fn terminating_exception_is_flagged() {
    let mut host = Host::new();
    let stop = host.load(1, "terminate");
    host.root_call(&stop, &[]).unwrap_err();
    let (log, _) = host.finish();

    let end = log.get(2).and_then(ActionEvent::as_call_end).unwrap();
    assert!(end.has_terminating_exception);
    assert!(!end.has_script_exception);

    let mut driver = ReplayDriver::new(&log, session(ReplayConfig::default()));
    let err = driver.run().unwrap_err();
    assert!(matches!(err, ReplayError::UncaughtException { terminating: true, .. }));
}

#[test]
fn diverging_exception_flags_fail_when_verified() {
    let mut host = Host::new();
    let echo = host.load(1, "echo");
    host.root_call(&echo, &[]).unwrap();
    let (mut log, _) = host.finish();

    // Rewrite the call-end so the recording claims an exception.
    let events: Vec<ActionEvent> = log
        .events()
        .iter()
        .cloned()
        .map(|mut e| {
            if let ActionPayload::CallEnd(end) = &mut e.payload {
                end.has_script_exception = true;
            }
            e
        })
        .collect();
    log.release();
    for e in events {
        log.push(e);
    }

    let strict = ReplayConfig {
        verify_exception_flags: true,
        ..ReplayConfig::default()
    };
    let mut driver = ReplayDriver::new(&log, session(strict));
    let err = driver.run().unwrap_err();
    assert!(matches!(
        err,
        ReplayError::ExceptionDivergence {
            recorded: true,
            replayed: false,
            ..
        }
    ));
    assert_eq!(driver.state(), DriverState::Faulted);

    // Without verification the divergence only warns and the recorded flags win.
    let mut lenient = ReplayDriver::new(&log, session(ReplayConfig::default()));
    let err = lenient.run().unwrap_err();
    assert!(matches!(err, ReplayError::UncaughtException { .. }));
}

#[test]
fn construct_failure_becomes_pending_exception() {
    let mut host = Host::new();
    let boom = host.load(1, "throw bad ctor");
    let outcome = host.rt.construct(&boom, &[]);
    host.rec
        .record_construct_call(CTX, &boom, &[], &outcome)
        .unwrap();
    let (log, _) = host.finish();

    let mut driver = ReplayDriver::new(&log, session(ReplayConfig::default()));
    driver.run().unwrap();
    let pending = driver.session().pending_exception().unwrap();
    assert_eq!(pending.value, Value::Str("bad ctor".into()));
}

#[test]
fn truncated_log_reports_open_root_call() {
    let mut host = Host::new();
    let echo = host.load(1, "echo");
    host.rec
        .begin_call(CTX, &echo, &[], CallbackId::NONE, 0.0, None)
        .unwrap();
    let (log, _) = host.finish();

    let mut driver = ReplayDriver::new(&log, session(ReplayConfig::default()));
    assert!(matches!(driver.step(), Ok(Some(Step::Executed { .. }))));
    assert!(matches!(driver.step(), Ok(Some(Step::Executed { .. }))));
    assert_eq!(driver.state(), DriverState::AwaitingCallMatch);
    let err = driver.step().unwrap_err();
    assert!(matches!(err, ReplayError::TruncatedLog { begin: EventTime(2) }));
    assert_eq!(driver.state(), DriverState::Faulted);
}

#[test]
fn out_of_order_times_fault_the_driver() {
    let mut log = ActionArena::new();
    log.push(ActionEvent::new(
        EventTime(2),
        CTX,
        ActionPayload::AllocateObject { regular: true },
    ));
    log.push(ActionEvent::new(
        EventTime(1),
        CTX,
        ActionPayload::AllocateObject { regular: true },
    ));

    let mut driver = ReplayDriver::new(&log, session(ReplayConfig::default()));
    let err = driver.run().unwrap_err();
    assert!(matches!(
        err,
        ReplayError::OutOfOrder {
            previous: EventTime(2),
            time: EventTime(1)
        }
    ));
    assert_eq!(driver.state(), DriverState::Faulted);
}

#[test]
fn nested_call_begins_record_one_more_depth_than_their_parent() {
    let mut host = Host::new();
    let echo = host.load(1, "echo");
    let mut open = Vec::new();
    for level in 0..3 {
        let arg = [Value::I32(level)];
        open.push(
            host.rec
                .begin_call(CTX, &echo, &arg, CallbackId::NONE, 0.0, None)
                .unwrap(),
        );
        assert_eq!(host.rec.call_depth(), open.len());
    }
    while let Some(begin) = open.pop() {
        let outcome = host.rt.call(&echo, &[]);
        host.rec.end_call(CTX, begin, &outcome, 0.0).unwrap();
    }
    let (log, _) = host.finish();

    // Each begin sits one level below the begin still open before it.
    let mut parents: Vec<u32> = Vec::new();
    let mut begin_depths = Vec::new();
    for event in &log {
        match &event.payload {
            ActionPayload::CallBegin(begin) => {
                let expected = parents.last().map_or(0, |d| d + 1);
                assert_eq!(begin.depth, expected, "call begin at {}", event.time);
                begin_depths.push(begin.depth);
                parents.push(begin.depth);
            }
            ActionPayload::CallEnd(end) => {
                assert_eq!(Some(end.depth), parents.pop(), "call end at {}", event.time);
            }
            _ => {}
        }
    }
    assert_eq!(begin_depths, vec![0, 1, 2]);
    assert!(parents.is_empty());

    let log = reparse(&log);
    let mut driver = ReplayDriver::new(&log, session(ReplayConfig::default()));
    driver.run().unwrap();
    assert_eq!(driver.state(), DriverState::Idle);
}

#[test]
fn call_depth_limit_is_enforced() {
    let mut host = Host::new();
    let echo = host.load(1, "echo");
    for _ in 0..3 {
        host.rec
            .begin_call(CTX, &echo, &[], CallbackId::NONE, 0.0, None)
            .unwrap();
    }
    let (log, _) = host.finish();

    let shallow = ReplayConfig {
        max_call_depth: 2,
        ..ReplayConfig::default()
    };
    let mut driver = ReplayDriver::new(&log, session(shallow));
    let err = driver.run().unwrap_err();
    assert!(matches!(
        err,
        ReplayError::CallDepthExceeded {
            time: EventTime(4),
            limit: 2
        }
    ));
}

#[test]
fn unknown_context_fails_the_action() {
    let mut log = ActionArena::new();
    log.push(ActionEvent::new(
        EventTime(1),
        ContextTag(9),
        ActionPayload::AllocateObject { regular: true },
    ));
    let rt = SandboxRuntime::with_contexts([CTX]);
    let mut driver = ReplayDriver::new(&log, ReplaySession::new(rt, ReplayConfig::default()));
    let err = driver.run().unwrap_err();
    assert!(matches!(
        err,
        ReplayError::UnknownContext {
            ctx: ContextTag(9),
            ..
        }
    ));
}

// ---------------------------------------------------------------------------
// Host callbacks
// ---------------------------------------------------------------------------

#[test]
fn cancelled_callback_is_never_invoked() {
    let mut host = Host::new();
    let tick = host.load(1, "echo");
    host.rec
        .record_schedule_callback(CTX, CallbackId::NONE, &tick, CallbackId(5), false)
        .unwrap();
    host.rec
        .record_schedule_callback(CTX, CallbackId::NONE, &tick, CallbackId(6), false)
        .unwrap();
    host.rec
        .record_cancel_callback(CTX, CallbackId::NONE, &tick, CallbackId(5))
        .unwrap();
    // Callback 6 fires as a root call.
    let begin = host
        .rec
        .begin_call(CTX, &tick, &[], CallbackId(6), 1.0, None)
        .unwrap();
    let outcome = host.rt.call(&tick, &[]);
    host.rec.end_call(CTX, begin, &outcome, 1.0).unwrap();
    let (log, _) = host.finish();
    let log = reparse(&log);

    let mut driver = ReplayDriver::new(&log, session(ReplayConfig::default()));
    driver.run().unwrap();
    let callbacks = driver.session().callbacks();
    assert!(!callbacks.is_pending(CallbackId(5)));
    assert!(!callbacks.is_pending(CallbackId(6)));
    assert_eq!(callbacks.cancellations(), 1);
    assert_eq!(callbacks.invocations(), 1);

    // Replay remembers where each callback operation ran.
    let ActionPayload::CallbackOp(op) = &log.get(3).unwrap().payload else {
        panic!("expected a callback action");
    };
    let location = op.register_location.get().unwrap();
    assert_eq!(location.time, EventTime(4));
    assert_eq!(location.root, None);
}

// ---------------------------------------------------------------------------
// Typed arrays and descriptors
// ---------------------------------------------------------------------------

#[test]
fn typed_array_buffer_is_tagged_only_when_requested() {
    let mut host = Host::new();
    let make = host.load(1, "typed array 4");
    let array = match host.root_call(&make, &[]).unwrap() {
        Value::Object(h) => h,
        other => panic!("unexpected {other:?}"),
    };
    host.rec.record_get_typed_array_info(CTX, &array, None).unwrap();
    let buffer = host.rt.typed_array_buffer(&array).unwrap();
    host.rec
        .record_get_typed_array_info(CTX, &array, Some(&buffer))
        .unwrap();
    host.rt.set_index(&buffer, &Value::U32(1), &Value::U32(200)).unwrap();
    host.rec
        .record_set_index(CTX, &buffer, &Value::U32(1), &Value::U32(200))
        .unwrap();
    let (log, rec) = host.finish();
    let log = reparse(&log);

    let mut driver = ReplayDriver::new(&log, session(ReplayConfig::default()));
    driver.run().unwrap();
    let session = driver.into_session();
    assert!(rec.tags().is_isomorphic(session.tags()));
    assert_eq!(session.tags().len(), 3);

    let buffer = session.tags().resolve(IdentityTag(3)).unwrap();
    let heap_buffer = session.runtime().object(buffer).unwrap();
    assert_eq!(heap_buffer.kind, ObjectKind::ArrayBuffer(vec![0, 200, 0, 0]));
}

#[test]
fn descriptors_copy_between_objects() {
    let mut host = Host::new();
    let a = host.object();
    let b = host.object();
    host.rt.set_property(&a, NAME, &Value::I32(3), false).unwrap();
    host.rec.record_set_property(CTX, &a, NAME, &Value::I32(3), false).unwrap();
    let desc = host.rt.get_own_property_descriptor(&a, NAME).unwrap();
    host.rec.record_get_own_property_info(CTX, &a, NAME, &desc).unwrap();
    host.rt.define_property(&b, PropertyId(9), &desc).unwrap();
    host.rec.record_define_property(CTX, &b, PropertyId(9), &desc).unwrap();
    let removed = host.rt.delete_property(&a, NAME, true).unwrap();
    host.rec.record_delete_property(CTX, &a, NAME, true, &removed).unwrap();
    let (log, _) = host.finish();
    let log = reparse(&log);

    let mut driver = ReplayDriver::new(&log, session(ReplayConfig::default()));
    driver.run().unwrap();
    let session = driver.into_session();
    let a = session.tags().resolve(IdentityTag(1)).unwrap();
    let b = session.tags().resolve(IdentityTag(2)).unwrap();
    assert_eq!(session.runtime().property(a, NAME), None);
    assert_eq!(session.runtime().property(b, PropertyId(9)), Some(&Value::I32(3)));
}

// ---------------------------------------------------------------------------
// Checkpoints and fast-forward
// ---------------------------------------------------------------------------

fn three_root_calls() -> ActionArena {
    let mut host = Host::new();
    let make = host.load(1, "new object");
    let boom = host.load(2, "throw late");
    let first = host.root_call(&make, &[]).unwrap();
    if let Value::Object(obj) = &first {
        host.rt.set_property(obj, NAME, &Value::I32(1), false).unwrap();
        host.rec.record_set_property(CTX, obj, NAME, &Value::I32(1), false).unwrap();
    }
    let thrown = host.root_call(&boom, &[]).unwrap_err();
    host.rec.record_get_and_clear_exception(CTX, Ok(Some(thrown))).unwrap();
    host.root_call(&make, &[first]).unwrap();
    let (log, _) = host.finish();
    reparse(&log)
}

#[test]
fn fast_forward_matches_full_replay() {
    let log = three_root_calls();

    // A first pass captures a checkpoint after every root call.
    let capture = ReplayConfig {
        capture_root_checkpoints: true,
        fast_forward: false,
        ..ReplayConfig::default()
    };
    let mut full = ReplayDriver::new(&log, session(capture));
    assert!(matches!(full.run(), Err(ReplayError::UncaughtException { .. })));
    full.run().unwrap();
    let full = full.into_session();
    assert!(log
        .iter()
        .filter_map(ActionEvent::as_call_begin)
        .all(|b| b.checkpoint.is_set()));

    // A second pass restores them instead of re-executing.
    let mut fast = ReplayDriver::new(&log, session(ReplayConfig::default()));
    let last = log.events().last().unwrap().time;
    let mut skipped = Vec::new();
    let mut uncaught = 0;
    loop {
        match fast.step_toward(last) {
            Ok(Some(Step::FastForwarded { from, to })) => skipped.push((from, to)),
            Ok(Some(Step::Executed { .. })) => {}
            Ok(None) => break,
            Err(ReplayError::UncaughtException { .. }) => uncaught += 1,
            Err(other) => panic!("unexpected error {other}"),
        }
    }
    assert_eq!(skipped.len(), 2);
    assert_eq!(uncaught, 1);

    let fast = fast.into_session();
    assert!(full.tags().is_isomorphic(fast.tags()));
    assert_eq!(full.runtime().heap(), fast.runtime().heap());
    assert_eq!(full.callbacks(), fast.callbacks());
}

#[test]
fn step_never_fast_forwards() {
    let log = three_root_calls();
    let capture = ReplayConfig {
        capture_root_checkpoints: true,
        ..ReplayConfig::default()
    };
    let mut first = ReplayDriver::new(&log, session(capture));
    let _ = first.run();
    first.run().unwrap();

    let mut stepping = ReplayDriver::new(&log, session(ReplayConfig::default()));
    let mut executed = 0;
    loop {
        match stepping.step() {
            Ok(Some(Step::Executed { .. })) => executed += 1,
            Ok(Some(Step::FastForwarded { .. })) => panic!("step fast-forwarded"),
            Ok(None) => break,
            Err(ReplayError::UncaughtException { .. }) => executed += 1,
            Err(other) => panic!("unexpected error {other}"),
        }
    }
    assert_eq!(executed, log.len());
}

#[test]
fn run_until_stops_at_target() {
    let log = three_root_calls();
    let mut driver = ReplayDriver::new(&log, session(ReplayConfig::default()));
    driver.run_until(EventTime(5)).unwrap();
    assert_eq!(driver.last_time(), Some(EventTime(5)));
    assert_eq!(driver.next_action().map(|e| e.time), Some(EventTime(6)));
}

#[test]
fn abort_stops_between_actions() {
    let log = three_root_calls();
    let mut driver = ReplayDriver::new(&log, session(ReplayConfig::default()));
    let handle = driver.abort_handle();
    driver.step().unwrap();
    handle.abort();
    let err = driver.run().unwrap_err();
    assert!(matches!(
        err,
        ReplayError::Aborted {
            next: Some(EventTime(2))
        }
    ));
    assert_ne!(driver.state(), DriverState::Faulted);

    handle.reset();
    let _ = driver.run();
    driver.run().unwrap();
    assert!(driver.next_action().is_none());
}
