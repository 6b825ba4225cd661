//! Simple-stepper behavior: range steps, the plain-step fallback,
//! step-out, the runtime-level JMC mask, and cancellation on pause.

use netdbg_core::runtime::{FrameRef, RuntimeStepper};
use netdbg_core::types::{IlRange, IlOffset, PauseSelection, StepKind, ThreadId};
use netdbg_kernel::testing::{
    MethodSpec, MockFrame, MockModule, MockModuleBuilder, MockThread, SessionFixture, StepOp,
};
use netdbg_protocol::StopReason;
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn program_module() -> Arc<MockModule> {
    MockModuleBuilder::new(0x1000, "/bin/app.dll")
        .type_def("Program", |t| {
            t.method("Main", MethodSpec::with_lines("/src/Program.cs", &[8, 10, 12, 14]));
        })
        .build()
}

fn stopped_at(
    ip: u32,
) -> (SessionFixture, Arc<MockModule>, Arc<MockThread>) {
    let fixture = SessionFixture::new();
    fixture.start(SessionFixture::launch_args());
    let module = program_module();
    fixture.load_module(&module);

    let main = module.method_token("Main").unwrap();
    let thread = Arc::new(MockThread::detached(ThreadId(1)));
    fixture.start_thread(&thread);
    thread.set_frames(vec![MockFrame::at(&module, main, ip) as FrameRef]);

    fixture
        .session
        .pause(PauseSelection::Thread(ThreadId(1)))
        .expect("pause");
    fixture.events.wait_for_stopped(1).expect("pause stop");
    (fixture, module, thread)
}

#[test]
fn step_over_arms_a_range_step_with_runtime_jmc() {
    let (fixture, _module, thread) = stopped_at(4);

    fixture.session.step(ThreadId(1), StepKind::Over).unwrap();

    let steppers = fixture.process.steppers_created();
    assert_eq!(steppers.len(), 1);
    let ops = steppers[0].ops();
    // Runtime-level JMC is always on, whatever the session setting.
    assert!(ops.contains(&StepOp::Configure { jmc: true }));
    assert!(ops.contains(&StepOp::StepRange {
        step_in: false,
        range: IlRange {
            start: IlOffset(4),
            end: IlOffset(8),
        },
    }));

    fixture.complete_step(&thread);
    let stopped = fixture.events.wait_for_stopped(2).unwrap();
    assert_eq!(stopped.reason, StopReason::Step);
}

#[test]
fn step_in_uses_the_step_in_flag() {
    let (fixture, _module, _thread) = stopped_at(4);

    fixture.session.step(ThreadId(1), StepKind::In).unwrap();

    let ops = fixture.process.steppers_created()[0].ops();
    assert!(ops
        .iter()
        .any(|op| matches!(op, StepOp::StepRange { step_in: true, .. })));
}

#[test]
fn step_out_uses_the_step_out_primitive() {
    let (fixture, _module, _thread) = stopped_at(4);

    fixture.session.step(ThreadId(1), StepKind::Out).unwrap();

    let ops = fixture.process.steppers_created()[0].ops();
    assert!(ops.contains(&StepOp::StepOut));
    assert!(!ops.iter().any(|op| matches!(op, StepOp::StepRange { .. })));
}

#[test]
fn missing_statement_range_falls_back_to_a_plain_step() {
    let fixture = SessionFixture::new();
    fixture.start(SessionFixture::launch_args());

    // Module without symbols: no statement ranges exist.
    let module = MockModuleBuilder::new(0x2000, "/bin/naked.dll")
        .without_symbols()
        .type_def("Naked", |t| {
            t.method("Run", MethodSpec::default());
        })
        .build();
    fixture.load_module(&module);

    let run = module.method_token("Run").unwrap();
    let thread = Arc::new(MockThread::detached(ThreadId(1)));
    fixture.start_thread(&thread);
    thread.set_frames(vec![MockFrame::at(&module, run, 0) as FrameRef]);
    fixture
        .session
        .pause(PauseSelection::Thread(ThreadId(1)))
        .unwrap();
    fixture.events.wait_for_stopped(1).unwrap();

    fixture.session.step(ThreadId(1), StepKind::Over).unwrap();

    let ops = fixture.process.steppers_created()[0].ops();
    assert!(ops.contains(&StepOp::Step { step_in: false }));
}

#[test]
fn pause_cancels_an_armed_step() {
    let (fixture, _module, _thread) = stopped_at(4);

    fixture.session.step(ThreadId(1), StepKind::Over).unwrap();
    let steppers = fixture.process.steppers_created();
    let stepper = &steppers[0];
    assert!(stepper.is_active());

    fixture
        .session
        .pause(PauseSelection::Thread(ThreadId(1)))
        .unwrap();
    fixture.events.wait_for_stopped(2).unwrap();

    // The stepper was deactivated before the pause stop surfaced.
    assert!(!stepper.is_active());
    assert!(stepper.ops().contains(&StepOp::Deactivate));
}
