//! Line-breakpoint lifecycle: set/diff semantics, deferred resolution,
//! sequence-point snapping, conditions, and removal.

use netdbg_core::runtime::{BreakpointRef, FrameRef};
use netdbg_core::types::{IlOffset, ThreadId};
use netdbg_kernel::testing::{
    MethodSpec, MockFrame, MockModule, MockModuleBuilder, MockThread, MockValue, SessionFixture,
};
use netdbg_protocol::{
    BreakpointEventReason, DebugEvent, Source, SourceBreakpoint, StopReason,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

fn program_module() -> Arc<MockModule> {
    MockModuleBuilder::new(0x1000, "/bin/app.dll")
        .type_def("Program", |t| {
            t.method("Main", MethodSpec::with_lines("/src/Program.cs", &[8, 10, 12, 14]));
        })
        .build()
}

fn bp(line: u32) -> SourceBreakpoint {
    SourceBreakpoint {
        line,
        condition: None,
    }
}

#[test]
fn breakpoint_set_before_launch_verifies_on_module_load() {
    let fixture = SessionFixture::new();
    fixture.session.initialize().unwrap();

    // No process yet: the breakpoint stays unverified.
    let records = fixture
        .session
        .set_line_breakpoints(&Source::from_path("/src/Program.cs"), &[bp(10)]);
    assert_eq!(records.len(), 1);
    assert!(!records[0].verified);
    let id = records[0].id.unwrap();

    fixture.session.launch(SessionFixture::launch_args()).unwrap();
    fixture.session.configuration_done().unwrap();

    // The module load resolves it and announces the change.
    let module = program_module();
    fixture.load_module(&module);

    let changed = fixture
        .events
        .wait_for(Duration::from_secs(2), |event| {
            matches!(
                event,
                DebugEvent::Breakpoint {
                    reason: BreakpointEventReason::Changed,
                    ..
                }
            )
        })
        .expect("breakpoint changed event");
    let DebugEvent::Breakpoint { breakpoint, .. } = changed else {
        unreachable!();
    };
    assert_eq!(breakpoint.id, Some(id));
    assert!(breakpoint.verified);
    assert_eq!(breakpoint.line, Some(10));

    let main = module.method_token("Main").unwrap();
    assert!(module.active_breakpoint_at(main, IlOffset(4)).is_some());
}

#[test]
fn requested_line_snaps_to_next_statement() {
    let fixture = SessionFixture::new();
    fixture.start(SessionFixture::launch_args());
    let module = program_module();
    fixture.load_module(&module);

    // Line 9 carries no statement; the nearest user code is line 10.
    let records = fixture
        .session
        .set_line_breakpoints(&Source::from_path("/src/Program.cs"), &[bp(9)]);
    assert!(records[0].verified);
    assert_eq!(records[0].line, Some(10));
}

#[test]
fn replacing_the_set_keeps_survivor_ids_and_silences_removed_lines() {
    let fixture = SessionFixture::new();
    fixture.start(SessionFixture::launch_args());
    let module = program_module();
    fixture.load_module(&module);
    let source = Source::from_path("/src/Program.cs");

    let first = fixture
        .session
        .set_line_breakpoints(&source, &[bp(10), bp(12)]);
    let id_10 = first[0].id.unwrap();
    let id_12 = first[1].id.unwrap();

    // Same set again: identical verified sites, identical ids.
    let again = fixture
        .session
        .set_line_breakpoints(&source, &[bp(10), bp(12)]);
    assert_eq!(again[0].id, Some(id_10));
    assert_eq!(again[1].id, Some(id_12));
    assert!(again.iter().all(|record| record.verified));

    // Dropping line 10 keeps 12's id, allocates fresh for 14.
    let replaced = fixture
        .session
        .set_line_breakpoints(&source, &[bp(12), bp(14)]);
    assert_eq!(replaced[0].id, Some(id_12));
    let id_14 = replaced[1].id.unwrap();
    assert!(id_14 > id_12, "ids are strictly monotonic");

    // The removed breakpoint's site is deactivated and never fires.
    let main = module.method_token("Main").unwrap();
    assert!(module.active_breakpoint_at(main, IlOffset(4)).is_none());
    assert!(module.active_breakpoint_at(main, IlOffset(8)).is_some());
}

#[test]
fn condition_false_suppresses_the_stop() {
    let fixture = SessionFixture::new();
    fixture.start(SessionFixture::launch_args());
    let module = program_module();
    fixture.load_module(&module);

    fixture.session.set_line_breakpoints(
        &Source::from_path("/src/Program.cs"),
        &[SourceBreakpoint {
            line: 10,
            condition: Some("x > 3".to_string()),
        }],
    );
    fixture
        .evaluator
        .script_result("x > 3", MockValue::bool_value(false));

    let main = module.method_token("Main").unwrap();
    let primitive = module.active_breakpoint_at(main, IlOffset(4)).unwrap();
    let thread = Arc::new(MockThread::detached(ThreadId(1)));
    fixture.start_thread(&thread);
    thread.set_frames(vec![MockFrame::at(&module, main, 4) as FrameRef]);

    let resumes = fixture.process.resume_count();
    fixture.hit_breakpoint(&thread, &(primitive as BreakpointRef));

    // The hit is consumed silently and execution continues.
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while fixture.process.resume_count() <= resumes && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(fixture.events.stopped_events().is_empty());
    assert!(fixture.process.resume_count() > resumes);
}

#[test]
fn failing_condition_fires_and_reports_a_message() {
    let fixture = SessionFixture::new();
    fixture.start(SessionFixture::launch_args());
    let module = program_module();
    fixture.load_module(&module);

    fixture.session.set_line_breakpoints(
        &Source::from_path("/src/Program.cs"),
        &[SourceBreakpoint {
            line: 10,
            condition: Some("boom()".to_string()),
        }],
    );
    // "boom()" is unscripted: evaluation fails.

    let main = module.method_token("Main").unwrap();
    let primitive = module.active_breakpoint_at(main, IlOffset(4)).unwrap();
    let thread = Arc::new(MockThread::detached(ThreadId(1)));
    fixture.start_thread(&thread);
    thread.set_frames(vec![MockFrame::at(&module, main, 4) as FrameRef]);

    fixture.hit_breakpoint(&thread, &(primitive as BreakpointRef));

    let stopped = fixture.events.wait_for_stopped(1).expect("stop event");
    assert_eq!(stopped.reason, StopReason::Breakpoint);

    let changed = fixture
        .events
        .wait_for(Duration::from_secs(2), |event| {
            matches!(
                event,
                DebugEvent::Breakpoint {
                    reason: BreakpointEventReason::Changed,
                    breakpoint,
                } if breakpoint.message.is_some()
            )
        })
        .expect("informational breakpoint change");
    let DebugEvent::Breakpoint { breakpoint, .. } = changed else {
        unreachable!();
    };
    assert!(breakpoint.message.unwrap().contains("failed to execute"));
}

#[test]
fn evaluation_timeout_fires_with_message_instead_of_losing_the_stop() {
    let fixture = SessionFixture::new();
    fixture.start(SessionFixture::launch_args());
    let module = program_module();
    fixture.load_module(&module);

    fixture.session.set_line_breakpoints(
        &Source::from_path("/src/Program.cs"),
        &[SourceBreakpoint {
            line: 10,
            condition: Some("slow()".to_string()),
        }],
    );
    fixture.evaluator.script_timeout("slow()");

    let main = module.method_token("Main").unwrap();
    let primitive = module.active_breakpoint_at(main, IlOffset(4)).unwrap();
    let thread = Arc::new(MockThread::detached(ThreadId(1)));
    fixture.start_thread(&thread);
    thread.set_frames(vec![MockFrame::at(&module, main, 4) as FrameRef]);

    fixture.hit_breakpoint(&thread, &(primitive as BreakpointRef));
    assert!(fixture.events.wait_for_stopped(1).is_some());
}

#[test]
fn breakpoints_in_non_user_code_are_skipped_at_install_time() {
    let fixture = SessionFixture::new();
    fixture.start(SessionFixture::launch_args());

    let module = MockModuleBuilder::new(0x2000, "/bin/lib.dll")
        .type_def("Vendored.Helper", |t| {
            t.method(
                "Run",
                MethodSpec::with_lines("/src/Helper.cs", &[3, 4]).non_user(),
            );
        })
        .build();
    fixture.load_module(&module);

    let records = fixture
        .session
        .set_line_breakpoints(&Source::from_path("/src/Helper.cs"), &[bp(3)]);
    assert!(!records[0].verified);
    let run = module.method_token("Run").unwrap();
    assert!(module.active_breakpoint_at(run, IlOffset(0)).is_none());
}

#[test]
fn module_without_symbols_leaves_breakpoints_unverified() {
    let fixture = SessionFixture::new();
    fixture.start(SessionFixture::launch_args());

    let module = MockModuleBuilder::new(0x3000, "/bin/naked.dll")
        .without_symbols()
        .type_def("Naked", |t| {
            t.method("Run", MethodSpec::with_lines("/src/Naked.cs", &[3]));
        })
        .build();
    fixture.load_module(&module);

    let records = fixture
        .session
        .set_line_breakpoints(&Source::from_path("/src/Naked.cs"), &[bp(3)]);
    assert!(!records[0].verified);
}
