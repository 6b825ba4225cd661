//! Async-stepper scenarios: the two-phase yield/resume routine,
//! cross-thread state-machine identity, promote-to-step-out at the
//! final await, and the wait-completion rendezvous.

use netdbg_core::runtime::{BreakpointRef, FrameRef, RuntimeModule, RuntimeValue, ValueRef};
use netdbg_core::symbols::{AsyncMethodInfo, AwaitInfo};
use netdbg_core::types::{IlOffset, MethodToken, PauseSelection, ThreadId};
use netdbg_kernel::testing::{
    MethodSpec, MockFrame, MockModule, MockModuleBuilder, MockThread, MockValue, SessionFixture,
    StepOp,
};
use netdbg_protocol::StopReason;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

const TASK_BUILDER: &str = "System.Runtime.CompilerServices.AsyncTaskMethodBuilder";
const VOID_BUILDER: &str = "System.Runtime.CompilerServices.AsyncVoidMethodBuilder";

/// `MoveNext` of an async method with one await: yield at IL 20,
/// resume at IL 28, last user statement at IL 40.
fn async_module() -> (Arc<MockModule>, MethodToken) {
    let mut move_next = None;
    let builder = MockModuleBuilder::new(0x1000, "/bin/app.dll").type_def("Program", |t| {
        t.method("M", MethodSpec::default());
    });
    let program_ty = builder.last_type();
    let builder = builder
        .type_def("Program.<M>d__0", |t| {
            let spec = MethodSpec::with_lines("/src/Program.cs", &[5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16])
                .static_method(false)
                .with_async_info(AsyncMethodInfo {
                    awaits: vec![AwaitInfo {
                        yield_offset: IlOffset(20),
                        resume_offset: IlOffset(28),
                    }],
                    last_user_il_offset: Some(IlOffset(40)),
                });
            move_next = Some(t.method("MoveNext", spec));
        })
        .nested_into(program_ty);
    (builder.build(), move_next.unwrap())
}

/// The corelib module carrying `Task.NotifyDebuggerOfWaitCompletion`.
fn corelib_module() -> (Arc<MockModule>, MethodToken) {
    let mut notify = None;
    let module = MockModuleBuilder::new(0x8000, "/shared/System.Private.CoreLib.dll")
        .type_def("System.Threading.Tasks.Task", |t| {
            notify = Some(t.method("NotifyDebuggerOfWaitCompletion", MethodSpec::default()));
        })
        .build();
    (module, notify.unwrap())
}

/// A state-machine frame whose `this.<>t__builder` is scripted.
fn frame_with_builder(
    module: &Arc<MockModule>,
    token: MethodToken,
    ip: u32,
    builder_type: &str,
) -> Arc<MockFrame> {
    let builder = MockValue::object(builder_type, 0x600);
    let this = MockValue::object("Program.<M>d__0", 0x500);
    this.set_field("<>t__builder", builder.dereference().unwrap());
    let frame = MockFrame::at(module, token, ip);
    frame.set_this(this.dereference().unwrap());
    frame
}

fn identity(address: u64) -> ValueRef {
    MockValue::object("System.Object", address).dereference().unwrap()
}

/// Start a session, load the async module, put `thread` at `ip` inside
/// `MoveNext`, and report a pause stop so stepping is legal.
fn stopped_inside_move_next(
    ip: u32,
) -> (SessionFixture, Arc<MockModule>, MethodToken, Arc<MockThread>) {
    let fixture = SessionFixture::new();
    fixture.start(SessionFixture::launch_args());
    let (module, move_next) = async_module();
    fixture.load_module(&module);

    let thread = Arc::new(MockThread::detached(ThreadId(1)));
    fixture.start_thread(&thread);
    thread.set_frames(vec![frame_with_builder(&module, move_next, ip, TASK_BUILDER) as FrameRef]);

    fixture
        .session
        .pause(PauseSelection::Thread(ThreadId(1)))
        .expect("pause");
    fixture.events.wait_for_stopped(1).expect("pause stop");

    (fixture, module, move_next, thread)
}

#[test]
fn step_over_before_await_arms_yield_breakpoint_and_simple_step() {
    let (fixture, module, move_next, _thread) = stopped_inside_move_next(8);

    fixture
        .session
        .step(ThreadId(1), netdbg_core::types::StepKind::Over)
        .expect("step");

    // The yield breakpoint is armed alongside a simple range step.
    assert!(module.active_breakpoint_at(move_next, IlOffset(20)).is_some());
    let steppers = fixture.process.steppers_created();
    assert_eq!(steppers.len(), 1);
    assert!(steppers[0]
        .ops()
        .iter()
        .any(|op| matches!(op, StepOp::StepRange { step_in: false, .. })));
}

#[test]
fn step_completing_before_the_await_drops_the_yield_breakpoint() {
    let (fixture, module, move_next, thread) = stopped_inside_move_next(8);

    fixture
        .session
        .step(ThreadId(1), netdbg_core::types::StepKind::Over)
        .expect("step");
    assert!(module.active_breakpoint_at(move_next, IlOffset(20)).is_some());

    // The range step finishes first: normal step stop, record dropped.
    fixture.complete_step(&thread);
    let stopped = fixture.events.wait_for_stopped(2).expect("step stop");
    assert_eq!(stopped.reason, StopReason::Step);
    assert!(module.active_breakpoint_at(move_next, IlOffset(20)).is_none());
}

#[test]
fn await_crossing_switches_to_resume_breakpoint_and_finishes_on_same_thread() {
    let (fixture, module, move_next, thread) = stopped_inside_move_next(8);
    fixture.helpers.set_object_id(ThreadId(1), identity(0xAAAA));

    fixture
        .session
        .step(ThreadId(1), netdbg_core::types::StepKind::Over)
        .expect("step");

    // The debuggee reaches the yield offset.
    let yield_bp = module.active_breakpoint_at(move_next, IlOffset(20)).unwrap();
    thread.set_frames(vec![
        frame_with_builder(&module, move_next, 20, TASK_BUILDER) as FrameRef,
    ]);
    let resumes = fixture.process.resume_count();
    fixture.hit_breakpoint(&thread, &(yield_bp as BreakpointRef));

    // No stop: the resume breakpoint replaces the yield breakpoint.
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while module.active_breakpoint_at(move_next, IlOffset(28)).is_none()
        && std::time::Instant::now() < deadline
    {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(module.active_breakpoint_at(move_next, IlOffset(20)).is_none());
    let resume_bp = module
        .active_breakpoint_at(move_next, IlOffset(28))
        .expect("resume breakpoint armed");
    assert!(fixture.process.resume_count() > resumes);
    assert_eq!(fixture.events.stopped_events().len(), 1);

    // The continuation resumes on the initiating thread.
    thread.set_frames(vec![
        frame_with_builder(&module, move_next, 28, TASK_BUILDER) as FrameRef,
    ]);
    fixture.hit_breakpoint(&thread, &(resume_bp as BreakpointRef));
    fixture.complete_step(&thread);

    let stopped = fixture.events.wait_for_stopped(2).expect("step stop");
    assert_eq!(stopped.reason, StopReason::Step);
    // All async artifacts are gone.
    assert!(module.active_breakpoint_at(move_next, IlOffset(28)).is_none());
}

#[test]
fn parallel_state_machine_instance_does_not_steal_the_step() {
    let (fixture, module, move_next, thread) = stopped_inside_move_next(8);
    fixture.helpers.set_object_id(ThreadId(1), identity(0xAAAA));

    fixture
        .session
        .step(ThreadId(1), netdbg_core::types::StepKind::Over)
        .expect("step");

    // Yield breakpoint on a different thread: parallel execution of the
    // same method body, ignored.
    let yield_bp = module.active_breakpoint_at(move_next, IlOffset(20)).unwrap();
    let intruder = Arc::new(MockThread::detached(ThreadId(9)));
    fixture.start_thread(&intruder);
    intruder.set_frames(vec![
        frame_with_builder(&module, move_next, 20, TASK_BUILDER) as FrameRef,
    ]);
    let resumes = fixture.process.resume_count();
    fixture.hit_breakpoint(&intruder, &(Arc::clone(&yield_bp) as BreakpointRef));
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while fixture.process.resume_count() <= resumes && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    // Still armed, still waiting for the initiating thread.
    assert!(yield_bp.active.load(std::sync::atomic::Ordering::SeqCst));
    assert_eq!(fixture.events.stopped_events().len(), 1);

    // Initiating thread crosses the yield; resume phase arms.
    thread.set_frames(vec![
        frame_with_builder(&module, move_next, 20, TASK_BUILDER) as FrameRef,
    ]);
    fixture.hit_breakpoint(&thread, &(yield_bp as BreakpointRef));
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while module.active_breakpoint_at(move_next, IlOffset(28)).is_none()
        && std::time::Instant::now() < deadline
    {
        std::thread::sleep(Duration::from_millis(5));
    }
    let resume_bp = module.active_breakpoint_at(move_next, IlOffset(28)).unwrap();

    // A different instance (different ObjectIdForDebugger) resumes
    // first on a new worker thread: the breakpoint stays armed.
    let worker = Arc::new(MockThread::detached(ThreadId(12)));
    fixture.start_thread(&worker);
    fixture.helpers.set_object_id(ThreadId(12), identity(0xBBBB));
    worker.set_frames(vec![
        frame_with_builder(&module, move_next, 28, TASK_BUILDER) as FrameRef,
    ]);
    let resumes = fixture.process.resume_count();
    fixture.hit_breakpoint(&worker, &(Arc::clone(&resume_bp) as BreakpointRef));
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while fixture.process.resume_count() <= resumes && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(resume_bp.active.load(std::sync::atomic::Ordering::SeqCst));
    assert_eq!(fixture.events.stopped_events().len(), 1);

    // The right instance resumes on another never-seen thread.
    let finisher = Arc::new(MockThread::detached(ThreadId(13)));
    fixture.start_thread(&finisher);
    fixture.helpers.set_object_id(ThreadId(13), identity(0xAAAA));
    finisher.set_frames(vec![
        frame_with_builder(&module, move_next, 28, TASK_BUILDER) as FrameRef,
    ]);
    fixture.hit_breakpoint(&finisher, &(resume_bp as BreakpointRef));
    fixture.complete_step(&finisher);

    let stopped = fixture.events.wait_for_stopped(2).expect("step stop");
    assert_eq!(stopped.reason, StopReason::Step);
    assert_eq!(stopped.thread_id, ThreadId(13));
}

#[test]
fn step_over_past_final_await_promotes_to_step_out() {
    let (fixture, _module, move_next, thread) = stopped_inside_move_next(44);
    let (corelib, notify) = corelib_module();
    fixture.load_module(&corelib);
    fixture.helpers.register_method(
        "System.Private.CoreLib.dll",
        "System.Threading.Tasks.Task",
        "NotifyDebuggerOfWaitCompletion",
        corelib.function(notify).unwrap(),
    );
    let _ = move_next;

    fixture
        .session
        .step(ThreadId(1), netdbg_core::types::StepKind::Over)
        .expect("step");

    // The builder was told to notify, and the rendezvous breakpoint
    // sits at IL 0 of NotifyDebuggerOfWaitCompletion.
    assert!(fixture
        .helpers
        .calls()
        .iter()
        .any(|call| call.ends_with("SetNotificationForWaitCompletion")));
    let notify_bp = corelib
        .active_breakpoint_at(notify, IlOffset(0))
        .expect("rendezvous breakpoint");

    // Completion happens on an arbitrary thread.
    let completer = Arc::new(MockThread::detached(ThreadId(30)));
    fixture.start_thread(&completer);
    completer.set_frames(vec![MockFrame::at(&corelib, notify, 0) as FrameRef]);
    fixture.hit_breakpoint(&completer, &(notify_bp as BreakpointRef));

    // The rendezvous converts into a plain step-out on that thread.
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while !fixture
        .process
        .steppers_created()
        .iter()
        .any(|stepper| stepper.ops().contains(&StepOp::StepOut))
        && std::time::Instant::now() < deadline
    {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(fixture
        .process
        .steppers_created()
        .iter()
        .any(|stepper| stepper.ops().contains(&StepOp::StepOut)));

    fixture.complete_step(&completer);
    let stopped = fixture.events.wait_for_stopped(2).expect("step stop");
    assert_eq!(stopped.reason, StopReason::Step);
    let _ = thread;
}

#[test]
fn async_void_method_falls_back_to_plain_step_out() {
    let fixture = SessionFixture::new();
    fixture.start(SessionFixture::launch_args());
    let (module, move_next) = async_module();
    fixture.load_module(&module);

    let thread = Arc::new(MockThread::detached(ThreadId(1)));
    fixture.start_thread(&thread);
    thread.set_frames(vec![
        frame_with_builder(&module, move_next, 44, VOID_BUILDER) as FrameRef,
    ]);
    fixture
        .session
        .pause(PauseSelection::Thread(ThreadId(1)))
        .expect("pause");
    fixture.events.wait_for_stopped(1).expect("pause stop");

    fixture
        .session
        .step(ThreadId(1), netdbg_core::types::StepKind::Out)
        .expect("step");

    let steppers = fixture.process.steppers_created();
    assert_eq!(steppers.len(), 1);
    assert!(steppers[0].ops().contains(&StepOp::StepOut));
    assert!(fixture.helpers.calls().is_empty());
}

#[test]
fn foreign_breakpoint_supersedes_the_async_step() {
    let (fixture, module, move_next, thread) = stopped_inside_move_next(8);

    fixture
        .session
        .step(ThreadId(1), netdbg_core::types::StepKind::Over)
        .expect("step");
    let yield_bp = module.active_breakpoint_at(move_next, IlOffset(20)).unwrap();

    // A line breakpoint in another method fires instead.
    let other = MockModuleBuilder::new(0x4000, "/bin/other.dll")
        .type_def("Other", |t| {
            t.method("Run", MethodSpec::with_lines("/src/Other.cs", &[3, 4]));
        })
        .build();
    fixture.load_module(&other);
    let records = fixture.session.set_line_breakpoints(
        &netdbg_protocol::Source::from_path("/src/Other.cs"),
        &[netdbg_protocol::SourceBreakpoint {
            line: 3,
            condition: None,
        }],
    );
    assert!(records[0].verified);

    let run = other.method_token("Run").unwrap();
    let line_bp = other.active_breakpoint_at(run, IlOffset(0)).unwrap();
    thread.set_frames(vec![MockFrame::at(&other, run, 0) as FrameRef]);
    fixture.hit_breakpoint(&thread, &(line_bp as BreakpointRef));

    let stopped = fixture.events.wait_for_stopped(2).expect("breakpoint stop");
    assert_eq!(stopped.reason, StopReason::Breakpoint);
    // The async-step record is gone; its breakpoint is disarmed.
    assert!(!yield_bp.active.load(std::sync::atomic::Ordering::SeqCst));
}
