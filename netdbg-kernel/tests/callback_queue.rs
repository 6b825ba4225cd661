//! Callback-queue semantics: FIFO dispatch, stop arbitration, the
//! evaluation short-circuit, and pause thread selection.

use netdbg_core::runtime::{BreakpointRef, FrameRef, ProcessRef, RuntimeCallbackSink};
use netdbg_core::types::{PauseSelection, ThreadId};
use netdbg_kernel::testing::{
    MethodSpec, MockFrame, MockModule, MockModuleBuilder, MockThread, SessionFixture,
};
use netdbg_protocol::{DebugEvent, Source, SourceBreakpoint, StopReason};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

fn program_module() -> Arc<MockModule> {
    MockModuleBuilder::new(0x1000, "/bin/app.dll")
        .type_def("Program", |t| {
            t.method("Main", MethodSpec::with_lines("/src/Program.cs", &[8, 10, 12, 14]));
            t.method("Worker", MethodSpec::with_lines("/src/Worker.cs", &[5, 6, 7]));
        })
        .build()
}

fn set_breakpoint(fixture: &SessionFixture, path: &str, line: u32) -> u32 {
    let records = fixture.session.set_line_breakpoints(
        &Source::from_path(path),
        &[SourceBreakpoint {
            line,
            condition: None,
        }],
    );
    records[0].id.expect("breakpoint id")
}

/// Prepare a started session with one module and one thread stopped at
/// nothing in particular.
fn started() -> (SessionFixture, Arc<MockModule>, Arc<MockThread>) {
    let fixture = SessionFixture::new();
    fixture.start(SessionFixture::launch_args());
    let module = program_module();
    fixture.load_module(&module);
    let thread = Arc::new(MockThread::detached(ThreadId(1)));
    fixture.start_thread(&thread);
    (fixture, module, thread)
}

#[test]
fn breakpoint_hit_emits_single_stop_and_holds_the_target() {
    let (fixture, module, thread) = started();
    let id = set_breakpoint(&fixture, "/src/Program.cs", 10);

    let main = module.method_token("Main").unwrap();
    let primitive = module
        .active_breakpoint_at(main, netdbg_core::types::IlOffset(4))
        .expect("installed site");
    thread.set_frames(vec![MockFrame::at(&module, main, 4) as FrameRef]);

    let resumes_before = fixture.process.resume_count();
    fixture.hit_breakpoint(&thread, &(primitive as BreakpointRef));

    let stopped = fixture.events.wait_for_stopped(1).expect("stop event");
    assert_eq!(stopped.reason, StopReason::Breakpoint);
    assert_eq!(stopped.thread_id, ThreadId(1));
    assert_eq!(stopped.hit_breakpoint_ids, vec![id]);
    let frame = stopped.frame.expect("top frame");
    assert_eq!(frame.line, 10);

    // Between the stop and the continue the core never resumes.
    assert_eq!(fixture.process.resume_count(), resumes_before);

    fixture.session.resume(ThreadId(1)).expect("continue");
    assert!(fixture.process.resume_count() > resumes_before);
    assert!(fixture
        .events
        .wait_for(Duration::from_secs(2), |event| {
            matches!(event, DebugEvent::Continued { .. })
        })
        .is_some());
}

#[test]
fn queued_entries_drain_in_fifo_order_after_continue() {
    let (fixture, module, thread) = started();
    set_breakpoint(&fixture, "/src/Program.cs", 10);
    set_breakpoint(&fixture, "/src/Worker.cs", 6);

    let main = module.method_token("Main").unwrap();
    let worker = module.method_token("Worker").unwrap();
    let first = module
        .active_breakpoint_at(main, netdbg_core::types::IlOffset(4))
        .unwrap();
    let second = module
        .active_breakpoint_at(worker, netdbg_core::types::IlOffset(4))
        .unwrap();

    thread.set_frames(vec![MockFrame::at(&module, main, 4) as FrameRef]);
    fixture.hit_breakpoint(&thread, &(first as BreakpointRef));

    let thread2 = Arc::new(MockThread::detached(ThreadId(2)));
    fixture.start_thread(&thread2);
    thread2.set_frames(vec![MockFrame::at(&module, worker, 4) as FrameRef]);
    fixture.hit_breakpoint(&thread2, &(second as BreakpointRef));

    // Only the first hit stops; the second waits in the queue.
    let stopped = fixture.events.wait_for_stopped(1).expect("first stop");
    assert_eq!(stopped.thread_id, ThreadId(1));
    assert_eq!(fixture.events.stopped_events().len(), 1);

    // Continue drains the queue instead of resuming the process.
    let resumes = fixture.process.resume_count();
    fixture.session.resume(ThreadId(1)).expect("continue");
    let stopped = fixture.events.wait_for_stopped(2).expect("second stop");
    assert_eq!(stopped.thread_id, ThreadId(2));
    assert_eq!(fixture.process.resume_count(), resumes);
}

#[test]
fn callbacks_during_evaluation_resume_immediately() {
    let (fixture, module, thread) = started();
    set_breakpoint(&fixture, "/src/Program.cs", 10);

    let main = module.method_token("Main").unwrap();
    let primitive = module
        .active_breakpoint_at(main, netdbg_core::types::IlOffset(4))
        .unwrap();
    thread.set_frames(vec![MockFrame::at(&module, main, 4) as FrameRef]);

    fixture.evaluator.set_eval_running(true);
    let resumes = fixture.process.resume_count();
    fixture.hit_breakpoint(&thread, &(primitive as BreakpointRef));

    // The producer resumed the domain without queueing anything.
    assert_eq!(fixture.process.resume_count(), resumes + 1);
    assert!(fixture.events.stopped_events().is_empty());
    fixture.evaluator.set_eval_running(false);
}

#[test]
fn pending_runtime_callbacks_defer_the_worker() {
    let (fixture, module, thread) = started();
    set_breakpoint(&fixture, "/src/Program.cs", 10);
    set_breakpoint(&fixture, "/src/Worker.cs", 6);

    let main = module.method_token("Main").unwrap();
    let worker = module.method_token("Worker").unwrap();
    let first = module
        .active_breakpoint_at(main, netdbg_core::types::IlOffset(4))
        .unwrap();
    let second = module
        .active_breakpoint_at(worker, netdbg_core::types::IlOffset(4))
        .unwrap();

    // The runtime reports more callbacks queued: the producer resumes
    // so they drain before the worker arbitrates.
    fixture.process.set_queued_callbacks(true);
    let resumes = fixture.process.resume_count();
    thread.set_frames(vec![MockFrame::at(&module, main, 4) as FrameRef]);
    fixture.hit_breakpoint(&thread, &(first as BreakpointRef));
    assert_eq!(fixture.process.resume_count(), resumes + 1);

    let thread2 = Arc::new(MockThread::detached(ThreadId(2)));
    fixture.start_thread(&thread2);
    thread2.set_frames(vec![MockFrame::at(&module, worker, 4) as FrameRef]);
    fixture.process.set_queued_callbacks(false);
    fixture.hit_breakpoint(&thread2, &(second as BreakpointRef));

    // Both entries dispatch now, in arrival order.
    let stopped = fixture.events.wait_for_stopped(1).expect("first stop");
    assert_eq!(stopped.thread_id, ThreadId(1));
    fixture.session.resume(ThreadId(1)).expect("continue");
    let stopped = fixture.events.wait_for_stopped(2).expect("second stop");
    assert_eq!(stopped.thread_id, ThreadId(2));
}

#[test]
fn pause_with_named_thread_reports_it() {
    let (fixture, _module, _thread) = started();

    fixture
        .session
        .pause(PauseSelection::Thread(ThreadId(1)))
        .expect("pause");

    let stopped = fixture.events.wait_for_stopped(1).expect("pause stop");
    assert_eq!(stopped.reason, StopReason::Pause);
    assert_eq!(stopped.thread_id, ThreadId(1));

    // Pause then continue returns the target to the running state.
    let running_before = fixture.process.is_running();
    assert!(!running_before);
    fixture.session.resume(ThreadId(1)).expect("continue");
    assert!(fixture.process.is_running());
}

#[test]
fn pause_source_frame_flavor_picks_a_thread_with_source() {
    let (fixture, module, thread) = started();

    // Thread 1 sits in symbol-less code; thread 2 has a source frame.
    thread.set_frames(vec![]);
    let thread2 = Arc::new(MockThread::detached(ThreadId(2)));
    fixture.start_thread(&thread2);
    let main = module.method_token("Main").unwrap();
    thread2.set_frames(vec![MockFrame::at(&module, main, 0) as FrameRef]);

    fixture
        .session
        .pause(PauseSelection::SourceFrame)
        .expect("pause");

    let stopped = fixture.events.wait_for_stopped(1).expect("pause stop");
    assert_eq!(stopped.thread_id, ThreadId(2));
    let frame = stopped.frame.expect("source frame");
    assert!(frame.source.is_some());
}

#[test]
fn pause_twice_is_idempotent() {
    let (fixture, _module, _thread) = started();

    fixture
        .session
        .pause(PauseSelection::Thread(ThreadId(1)))
        .expect("first pause");
    fixture.events.wait_for_stopped(1).expect("pause stop");

    // The second pause sees the outstanding stop and does nothing.
    fixture
        .session
        .pause(PauseSelection::Thread(ThreadId(1)))
        .expect("second pause");
    assert_eq!(fixture.events.stopped_events().len(), 1);
}

#[test]
fn process_exit_emits_exited_and_terminated() {
    let (fixture, _module, _thread) = started();

    fixture
        .sink()
        .on_process_exited(Arc::clone(&fixture.process) as ProcessRef, 7);

    assert!(fixture
        .events
        .wait_for(Duration::from_secs(2), |event| {
            matches!(event, DebugEvent::Exited { exit_code: 7 })
        })
        .is_some());
    assert!(fixture
        .events
        .wait_for(Duration::from_secs(2), |event| {
            matches!(event, DebugEvent::Terminated)
        })
        .is_some());
}
