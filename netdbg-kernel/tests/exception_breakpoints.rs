//! Exception-filter matching, negation, silencing, and exception-info
//! synthesis.

use netdbg_core::runtime::{FrameRef, RuntimeValue, ValueRef};
use netdbg_core::types::{ExceptionKind, ThreadId};
use netdbg_kernel::testing::{
    MethodSpec, MockFrame, MockModule, MockModuleBuilder, MockThread, MockValue, SessionFixture,
};
use netdbg_protocol::{ExceptionBreakMode, ExceptionFilter, StopReason};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

fn program_module() -> Arc<MockModule> {
    MockModuleBuilder::new(0x1000, "/bin/app.dll")
        .type_def("Program", |t| {
            t.method("Main", MethodSpec::with_lines("/src/Program.cs", &[8, 10, 12]));
        })
        .build()
}

fn exception(type_name: &str, message: &str) -> ValueRef {
    let value = MockValue::object(type_name, 0x9000);
    value.set_field("Message", MockValue::string_value(message));
    value.dereference().unwrap()
}

fn throw_filter(condition: &[&str], negate: bool) -> ExceptionFilter {
    ExceptionFilter {
        filter: ExceptionBreakMode::Throw,
        condition: condition.iter().map(ToString::to_string).collect(),
        negate,
    }
}

fn wait_until_consumed(fixture: &SessionFixture, resumes_before: usize) {
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while fixture.process.resume_count() <= resumes_before
        && std::time::Instant::now() < deadline
    {
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn throw_filter_stops_on_first_chance() {
    let fixture = SessionFixture::new();
    fixture.start(SessionFixture::launch_args());
    fixture.load_module(&program_module());

    let records = fixture
        .session
        .set_exception_breakpoints(&[throw_filter(&[], false)]);
    assert!(records[0].verified);

    let thread = Arc::new(MockThread::detached(ThreadId(1)));
    fixture.start_thread(&thread);
    thread.set_exception(Some(exception("System.InvalidOperationException", "boom")));
    fixture.raise_exception(&thread, ExceptionKind::FirstChance, "app.dll");

    let stopped = fixture.events.wait_for_stopped(1).expect("exception stop");
    assert_eq!(stopped.reason, StopReason::Exception);
    assert!(stopped
        .description
        .as_deref()
        .unwrap()
        .contains("System.InvalidOperationException"));
}

#[test]
fn negated_condition_suppresses_the_listed_type_and_stops_on_others() {
    let fixture = SessionFixture::new();
    fixture.start(SessionFixture::launch_args());
    fixture.load_module(&program_module());

    fixture.session.set_exception_breakpoints(&[throw_filter(
        &["System.InvalidOperationException"],
        true,
    )]);

    let thread = Arc::new(MockThread::detached(ThreadId(1)));
    fixture.start_thread(&thread);

    // The listed type is suppressed.
    thread.set_exception(Some(exception("System.InvalidOperationException", "no")));
    let resumes = fixture.process.resume_count();
    fixture.raise_exception(&thread, ExceptionKind::FirstChance, "app.dll");
    wait_until_consumed(&fixture, resumes);
    assert!(fixture.events.stopped_events().is_empty());

    // Any other first-chance exception stops.
    thread.set_exception(Some(exception("System.IO.FileNotFoundException", "yes")));
    fixture.raise_exception(&thread, ExceptionKind::FirstChance, "app.dll");
    let stopped = fixture.events.wait_for_stopped(1).expect("exception stop");
    assert!(stopped
        .description
        .as_deref()
        .unwrap()
        .contains("FileNotFoundException"));
}

#[test]
fn empty_filter_set_silences_everything_and_reenabling_restores() {
    let fixture = SessionFixture::new();
    fixture.start(SessionFixture::launch_args());
    fixture.load_module(&program_module());

    fixture
        .session
        .set_exception_breakpoints(&[throw_filter(&[], false)]);
    fixture.session.set_exception_breakpoints(&[]);

    let thread = Arc::new(MockThread::detached(ThreadId(1)));
    fixture.start_thread(&thread);
    thread.set_exception(Some(exception("System.Exception", "quiet")));
    let resumes = fixture.process.resume_count();
    fixture.raise_exception(&thread, ExceptionKind::FirstChance, "app.dll");
    wait_until_consumed(&fixture, resumes);
    assert!(fixture.events.stopped_events().is_empty());

    // Re-enabling restores prior behavior.
    fixture
        .session
        .set_exception_breakpoints(&[throw_filter(&[], false)]);
    fixture.raise_exception(&thread, ExceptionKind::FirstChance, "app.dll");
    assert!(fixture.events.wait_for_stopped(1).is_some());
}

#[test]
fn user_unhandled_requires_user_code_passage() {
    let fixture = SessionFixture::new();
    fixture.start(SessionFixture::launch_args());
    fixture.load_module(&program_module());

    fixture.session.set_exception_breakpoints(&[ExceptionFilter {
        filter: ExceptionBreakMode::UserUnhandled,
        condition: Vec::new(),
        negate: false,
    }]);

    let thread = Arc::new(MockThread::detached(ThreadId(1)));
    fixture.start_thread(&thread);
    thread.set_exception(Some(exception("System.Exception", "deep")));

    // Unhandled without ever crossing user code: no stop.
    let resumes = fixture.process.resume_count();
    fixture.raise_exception(&thread, ExceptionKind::Unhandled, "native.dll");
    wait_until_consumed(&fixture, resumes);
    assert!(fixture.events.stopped_events().is_empty());

    // First-chance in user code, then unhandled: stop.
    fixture.raise_exception(&thread, ExceptionKind::UserFirstChance, "app.dll");
    fixture.raise_exception(&thread, ExceptionKind::Unhandled, "app.dll");
    assert!(fixture.events.wait_for_stopped(1).is_some());
}

#[test]
fn exception_info_walks_the_inner_chain() {
    let fixture = SessionFixture::new();
    fixture.start(SessionFixture::launch_args());
    let module = program_module();
    fixture.load_module(&module);

    fixture
        .session
        .set_exception_breakpoints(&[throw_filter(&[], false)]);

    let inner = MockValue::object("System.IO.IOException", 0x9100);
    inner.set_field("Message", MockValue::string_value("disk gone"));
    let outer = MockValue::object("System.InvalidOperationException", 0x9000);
    outer.set_field("Message", MockValue::string_value("wrapper"));
    outer.set_field("InnerException", inner.dereference().unwrap());

    let thread = Arc::new(MockThread::detached(ThreadId(1)));
    fixture.start_thread(&thread);
    thread.set_exception(Some(outer.dereference().unwrap()));
    let main = module.method_token("Main").unwrap();
    thread.set_frames(vec![MockFrame::at(&module, main, 4) as FrameRef]);

    fixture.raise_exception(&thread, ExceptionKind::FirstChance, "app.dll");
    fixture.events.wait_for_stopped(1).expect("exception stop");

    let info = fixture
        .session
        .exception_info(ThreadId(1))
        .expect("exception info");
    assert_eq!(info.exception_id, "System.InvalidOperationException");
    assert_eq!(info.break_mode, ExceptionBreakMode::Throw);
    assert_eq!(info.details.type_name, "InvalidOperationException");
    assert_eq!(info.details.message.as_deref(), Some("wrapper"));
    assert!(info
        .details
        .stack_trace
        .as_deref()
        .unwrap()
        .contains("Program.Main"));

    let inner_details = info.details.inner_exception.expect("inner exception");
    assert_eq!(inner_details.full_type_name, "System.IO.IOException");
    assert_eq!(inner_details.message.as_deref(), Some("disk gone"));
    assert!(inner_details.inner_exception.is_none());
}
