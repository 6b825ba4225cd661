//! Session-controller lifecycle and request-surface behavior.

use netdbg_core::error::DebugError;
use netdbg_core::runtime::{BreakpointRef, FrameRef, RuntimeCallbackSink};
use netdbg_core::types::{DisconnectAction, IlOffset, StepKind, ThreadId};
use netdbg_kernel::testing::{
    MethodSpec, MockFrame, MockModule, MockModuleBuilder, MockThread, MockValue, SessionFixture,
};
use netdbg_protocol::{
    DebugEvent, DebugRequest, DebugResponse, Source, SourceBreakpoint, StopReason,
};
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

#[test]
fn second_initialize_is_refused() {
    let fixture = SessionFixture::new();
    fixture.session.initialize().expect("first initialize");
    let err = fixture.session.initialize().unwrap_err();
    assert!(matches!(err, DebugError::AlreadyInitialized));
}

#[test]
fn requests_without_a_process_fail_with_not_attached() {
    let fixture = SessionFixture::new();
    fixture.session.initialize().unwrap();

    assert!(matches!(
        fixture.session.resume(ThreadId(1)).unwrap_err(),
        DebugError::NotAttached
    ));
    assert!(matches!(
        fixture.session.list_threads().unwrap_err(),
        DebugError::NotAttached
    ));
}

#[test]
fn launch_breakpoint_continue_terminate_round_trip() {
    // Scenario: set the breakpoint before the process runs, stop on
    // it, continue, and watch the process end.
    let fixture = SessionFixture::new();
    fixture.session.initialize().unwrap();

    let records = fixture.session.set_line_breakpoints(
        &Source::from_path("/src/Program.cs"),
        &[SourceBreakpoint {
            line: 10,
            condition: None,
        }],
    );
    assert!(!records[0].verified);

    fixture.session.launch(SessionFixture::launch_args()).unwrap();
    fixture.session.configuration_done().unwrap();
    assert!(fixture
        .events
        .wait_for(Duration::from_secs(2), |event| {
            matches!(event, DebugEvent::Process { .. })
        })
        .is_some());

    let module = program_module();
    fixture.load_module(&module);

    let main = module.method_token("Main").unwrap();
    let primitive = module.active_breakpoint_at(main, IlOffset(4)).unwrap();
    let thread = Arc::new(MockThread::detached(ThreadId(7)));
    fixture.start_thread(&thread);
    thread.set_frames(vec![MockFrame::at(&module, main, 4) as FrameRef]);
    fixture.hit_breakpoint(&thread, &(primitive as BreakpointRef));

    let stopped = fixture.events.wait_for_stopped(1).expect("breakpoint stop");
    assert_eq!(stopped.reason, StopReason::Breakpoint);
    assert_eq!(stopped.thread_id, ThreadId(7));
    assert_eq!(stopped.frame.as_ref().unwrap().line, 10);

    fixture.session.resume(ThreadId(7)).unwrap();
    fixture
        .sink()
        .on_process_exited(Arc::clone(&fixture.process) as _, 0);
    assert!(fixture
        .events
        .wait_for(Duration::from_secs(2), |event| {
            matches!(event, DebugEvent::Terminated)
        })
        .is_some());
}

#[test]
fn continue_and_step_are_refused_during_evaluation() {
    // Scenario: a long evaluate blocks continue with eval-in-progress;
    // cancel aborts it and the session stays at the same stop.
    let fixture = SessionFixture::new();
    fixture.start(SessionFixture::launch_args());
    let module = program_module();
    fixture.load_module(&module);

    let thread = Arc::new(MockThread::detached(ThreadId(1)));
    fixture.start_thread(&thread);
    fixture
        .session
        .pause(netdbg_core::types::PauseSelection::Thread(ThreadId(1)))
        .unwrap();
    fixture.events.wait_for_stopped(1).unwrap();

    fixture.evaluator.set_eval_running(true);
    assert!(matches!(
        fixture.session.resume(ThreadId(1)).unwrap_err(),
        DebugError::EvalInProgress
    ));
    assert!(matches!(
        fixture.session.step(ThreadId(1), StepKind::Over).unwrap_err(),
        DebugError::EvalInProgress
    ));

    fixture.session.cancel();
    assert_eq!(fixture.evaluator.cancel_count(), 1);
    // Still stopped at the same place.
    assert_eq!(fixture.events.stopped_events().len(), 1);
    assert!(!fixture.process.is_running());
}

#[test]
fn step_requires_a_stopped_target() {
    let fixture = SessionFixture::new();
    fixture.start(SessionFixture::launch_args());
    let thread = Arc::new(MockThread::detached(ThreadId(1)));
    fixture.start_thread(&thread);

    assert!(matches!(
        fixture.session.step(ThreadId(1), StepKind::In).unwrap_err(),
        DebugError::ProcessRunning
    ));
}

#[test]
fn stack_trace_scopes_and_evaluate_flow_through() {
    let fixture = SessionFixture::new();
    fixture.start(SessionFixture::launch_args());
    let module = program_module();
    fixture.load_module(&module);

    let main = module.method_token("Main").unwrap();
    let thread = Arc::new(MockThread::detached(ThreadId(3)));
    fixture.start_thread(&thread);
    thread.set_frames(vec![
        MockFrame::at(&module, main, 8) as FrameRef,
        MockFrame::at(&module, main, 0) as FrameRef,
    ]);
    fixture
        .session
        .pause(netdbg_core::types::PauseSelection::Thread(ThreadId(3)))
        .unwrap();
    fixture.events.wait_for_stopped(1).unwrap();

    let (frames, total) = fixture.session.stack_trace(ThreadId(3), 0, 0).unwrap();
    assert_eq!(total, 2);
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].name, "Program.Main");
    assert_eq!(frames[0].line, 12);
    assert_eq!(frames[1].line, 8);

    let scopes = fixture.session.scopes(frames[0].id).unwrap();
    assert_eq!(scopes[0].name, "Locals");

    fixture
        .evaluator
        .script_result("x + 1", MockValue::string_value("4"));
    let response = fixture
        .session
        .evaluate(Some(frames[0].id), "x + 1")
        .unwrap();
    let DebugResponse::Evaluate { result, .. } = response else {
        panic!("expected evaluate response");
    };
    assert_eq!(result, "4");
}

#[test]
fn threads_request_lists_live_threads() {
    let fixture = SessionFixture::new();
    fixture.start(SessionFixture::launch_args());

    let one = Arc::new(MockThread::detached(ThreadId(1)));
    one.set_name("main");
    let two = Arc::new(MockThread::detached(ThreadId(2)));
    fixture.start_thread(&one);
    fixture.start_thread(&two);

    let threads = fixture.session.list_threads().unwrap();
    assert_eq!(threads.len(), 2);
    assert_eq!(threads[0].name, "main");
    assert_eq!(threads[1].name, "Thread #2");

    // Thread exit drops it from the registry.
    fixture
        .sink()
        .on_thread_exited(fixture.domain(), Arc::clone(&two) as _);
    let threads = fixture.session.list_threads().unwrap();
    assert_eq!(threads.len(), 1);
}

#[test]
fn disconnect_default_terminates_a_launched_debuggee() {
    let fixture = SessionFixture::new();
    fixture.start(SessionFixture::launch_args());

    fixture.session.disconnect(DisconnectAction::Default).unwrap();
    assert!(fixture.process.is_terminated());
    assert!(!fixture.process.is_detached());
    assert!(fixture
        .events
        .events()
        .iter()
        .any(|event| matches!(event, DebugEvent::Terminated)));
}

#[test]
fn disconnect_detach_leaves_the_debuggee_running() {
    let fixture = SessionFixture::new();
    fixture.start(SessionFixture::launch_args());

    fixture.session.disconnect(DisconnectAction::Detach).unwrap();
    assert!(fixture.process.is_detached());
    assert!(!fixture.process.is_terminated());
}

#[test]
fn handle_request_dispatches_semantic_requests() {
    let fixture = SessionFixture::new();

    let response = fixture
        .session
        .handle_request(DebugRequest::Initialize { adapter_id: None })
        .unwrap();
    assert!(matches!(response, DebugResponse::Capabilities(_)));

    let response = fixture
        .session
        .handle_request(DebugRequest::SetLineBreakpoints {
            source: Source::from_path("/src/Program.cs"),
            breakpoints: vec![SourceBreakpoint {
                line: 10,
                condition: None,
            }],
        })
        .unwrap();
    let DebugResponse::Breakpoints(records) = response else {
        panic!("expected breakpoints response");
    };
    assert_eq!(records.len(), 1);

    // Unknown-thread continue surfaces the state error.
    let err = fixture
        .session
        .handle_request(DebugRequest::Continue {
            thread_id: ThreadId(5),
        })
        .unwrap_err();
    assert!(matches!(err, DebugError::NotAttached));
}

#[test]
fn module_unload_emits_removed_after_new() {
    let fixture = SessionFixture::new();
    fixture.start(SessionFixture::launch_args());
    let module = program_module();
    fixture.load_module(&module);

    assert!(fixture
        .events
        .wait_for(Duration::from_secs(2), |event| {
            matches!(
                event,
                DebugEvent::Module {
                    reason: netdbg_protocol::ModuleEventReason::New,
                    ..
                }
            )
        })
        .is_some());

    fixture
        .sink()
        .on_module_unload(fixture.domain(), Arc::clone(&module) as _);
    assert!(fixture
        .events
        .wait_for(Duration::from_secs(2), |event| {
            matches!(
                event,
                DebugEvent::Module {
                    reason: netdbg_protocol::ModuleEventReason::Removed,
                    ..
                }
            )
        })
        .is_some());

    // A line in the unloaded module no longer resolves.
    let records = fixture.session.set_line_breakpoints(
        &Source::from_path("/src/Program.cs"),
        &[SourceBreakpoint {
            line: 10,
            condition: None,
        }],
    );
    assert!(!records[0].verified);
}
