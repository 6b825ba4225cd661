//! The async stepper: a two-phase breakpoint stepper for methods
//! compiled into async state machines.
//!
//! A plain step inside `MoveNext` would either walk out into the
//! scheduler or stop in compiler-generated yield code. Instead the
//! stepper coordinates primitive breakpoints around the await: one at
//! the yield offset, then one at the resume offset, tracking the state
//! machine's identity across threads through the builder's
//! `ObjectIdForDebugger` so a parallel invocation of the same method
//! body cannot steal the step. Step-out rendezvouses on the runtime's
//! `NotifyDebuggerOfWaitCompletion` method after arming the builder's
//! completion notification.

use crate::debuginfo::DebugInfoBridge;
use crate::evaluator::EvalHelpers;
use crate::steppers::simple::SimpleStepper;
use netdbg_core::error::{DebugError, Result};
use netdbg_core::runtime::{
    BreakpointRef, FrameRef, HandleRef, RuntimeBreakpoint, RuntimeCode, RuntimeFrame,
    RuntimeFunction, RuntimeHandle, RuntimeModule, RuntimeThread, RuntimeValue, ThreadRef,
    ValueRef,
};
use netdbg_core::types::{IlOffset, MethodToken, ModuleAddress, StepKind, ThreadId};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Builder type of `async void` methods, which have no task to notify;
/// step-out falls back to a plain step-out for them.
const ASYNC_VOID_BUILDER: &str = "System.Runtime.CompilerServices.AsyncVoidMethodBuilder";

/// Assembly and type carrying the step-out rendezvous method. It runs
/// exactly once per completion when notification is armed.
const CORELIB_ASSEMBLY: &str = "System.Private.CoreLib.dll";
const TASK_TYPE: &str = "System.Threading.Tasks.Task";
const NOTIFY_METHOD: &str = "NotifyDebuggerOfWaitCompletion";

/// Phase of an in-flight async step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AsyncPhase {
    /// Waiting for the yield-offset breakpoint on the initiating
    /// thread.
    YieldArmed,
    /// Waiting for the resume-offset breakpoint on whichever thread
    /// runs the continuation.
    ResumeArmed,
}

/// The async-step record. Exactly one primitive breakpoint is active
/// while the record exists.
struct AsyncStep {
    thread: ThreadId,
    kind: StepKind,
    phase: AsyncPhase,
    resume_offset: IlOffset,
    breakpoint: BreakpointRef,
    /// Strong handle to the builder's debugger object id, recorded at
    /// the yield breakpoint and compared at the resume breakpoint.
    async_id: Option<HandleRef>,
}

/// The reserved step-out rendezvous breakpoint.
struct NotifyBreakpoint {
    breakpoint: BreakpointRef,
    module: ModuleAddress,
    method: MethodToken,
}

#[derive(Default)]
struct AsyncState {
    step: Option<AsyncStep>,
    notify: Option<NotifyBreakpoint>,
}

/// What [`AsyncStepper::setup_step`] decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncSetup {
    /// The async stepper took over; no simple stepper is needed.
    Handled,
    /// Arm the simple stepper (possibly alongside a yield breakpoint).
    UseSimple,
}

/// The async stepper.
pub struct AsyncStepper {
    debuginfo: Arc<DebugInfoBridge>,
    simple: Arc<SimpleStepper>,
    helpers: Arc<dyn EvalHelpers>,
    state: Mutex<AsyncState>,
}

/// Read the `<>t__builder` field from the state machine instance of the
/// frame's `this` argument.
fn builder_value(frame: &FrameRef) -> Result<ValueRef> {
    let this = frame
        .this_argument()?
        .ok_or_else(|| DebugError::resolve_failed("state machine `this` argument"))?;
    let this = this.dereference()?;
    let builder = this
        .field("<>t__builder")?
        .ok_or_else(|| DebugError::resolve_failed("`<>t__builder` field"))?;
    builder.dereference()
}

impl AsyncStepper {
    /// Create the stepper.
    #[must_use]
    pub fn new(
        debuginfo: Arc<DebugInfoBridge>,
        simple: Arc<SimpleStepper>,
        helpers: Arc<dyn EvalHelpers>,
    ) -> Self {
        Self {
            debuginfo,
            simple,
            helpers,
            state: Mutex::new(AsyncState::default()),
        }
    }

    /// Set up a step on a thread stopped inside a method. Returns
    /// [`AsyncSetup::UseSimple`] for methods without awaits, and for
    /// step-in/step-over before an await, where the yield breakpoint is
    /// armed in parallel with the simple stepper: either the step
    /// finishes before the await, or the yield breakpoint converts it
    /// into the async routine.
    ///
    /// # Errors
    ///
    /// Runtime failures while reading the frame or installing
    /// breakpoints.
    pub fn setup_step(&self, thread: &ThreadRef, kind: StepKind) -> Result<AsyncSetup> {
        let frame = thread
            .active_frame()?
            .ok_or_else(|| DebugError::internal("step requested without an active frame"))?;
        let function = frame.function()?;
        let module = function.module();
        let address = module.base_address();
        let token = function.token();

        if !self.debuginfo.has_awaits(address, token) {
            return Ok(AsyncSetup::UseSimple);
        }

        let (ip, mapping) = frame.ip()?;
        if !mapping.is_usable() {
            return Err(DebugError::KindMismatch {
                capability: "mapped IL instruction pointer",
            });
        }

        // At or past the final await, step-in and step-over behave as
        // step-out. An empty last-offset value never promotes.
        let mut kind = kind;
        if kind != StepKind::Out {
            if let Some(last) = self.debuginfo.last_user_il_offset(address, token) {
                if ip >= last {
                    trace!(%ip, %last, "past final await; promoting to step-out");
                    kind = StepKind::Out;
                }
            }
        }

        if kind == StepKind::Out {
            let builder = builder_value(&frame)?;
            if builder.type_name()? == ASYNC_VOID_BUILDER {
                // No task to notify for async void; plain step-out.
                self.simple.setup_step(thread, StepKind::Out)?;
                return Ok(AsyncSetup::Handled);
            }

            let flag = self.helpers.create_bool(thread, true)?;
            self.helpers
                .call_method(thread, &builder, "SetNotificationForWaitCompletion", &[flag])?;
            self.arm_notify_breakpoint()?;
            // No stepper; the continue after setup is the whole step
            // until the rendezvous breakpoint fires.
            return Ok(AsyncSetup::Handled);
        }

        if let Some(await_block) = self.debuginfo.next_await(address, token, ip) {
            let breakpoint = function
                .il_code()?
                .create_breakpoint(await_block.yield_offset)?;
            breakpoint.activate(true)?;
            debug!(thread = %thread.id(), yield_offset = %await_block.yield_offset,
                   resume_offset = %await_block.resume_offset, "async step armed");
            self.state.lock().step = Some(AsyncStep {
                thread: thread.id(),
                kind,
                phase: AsyncPhase::YieldArmed,
                resume_offset: await_block.resume_offset,
                breakpoint,
                async_id: None,
            });
        }

        Ok(AsyncSetup::UseSimple)
    }

    /// Install the reserved breakpoint at IL offset 0 of
    /// `Task.NotifyDebuggerOfWaitCompletion`.
    fn arm_notify_breakpoint(&self) -> Result<()> {
        let function = self
            .helpers
            .find_method(CORELIB_ASSEMBLY, TASK_TYPE, NOTIFY_METHOD)?;
        let module = function.module();
        let breakpoint = function.il_code()?.create_breakpoint(IlOffset(0))?;
        breakpoint.activate(true)?;

        let mut state = self.state.lock();
        state.notify = Some(NotifyBreakpoint {
            breakpoint,
            module: module.base_address(),
            method: function.token(),
        });
        Ok(())
    }

    /// A step completed before any await was reached: the yield
    /// breakpoint is stale, drop the record.
    pub fn on_step_complete(&self) {
        let mut state = self.state.lock();
        if let Some(step) = state.step.take() {
            let _ = step.breakpoint.activate(false);
        }
    }

    /// Breakpoint-hit filter. Returns true when the hit belonged to the
    /// async stepping routine and was fully handled (the worker
    /// continues without a stop event).
    #[must_use]
    pub fn on_breakpoint(&self, thread: &ThreadRef) -> bool {
        let Some(frame) = thread.active_frame().ok().flatten() else {
            return false;
        };
        let Ok(function) = frame.function() else {
            warn!("no function for frame during async step check");
            return false;
        };
        let address = function.module().base_address();
        let token = function.token();

        let mut state = self.state.lock();

        if state.step.is_none() {
            // Step-out rendezvous: NotifyDebuggerOfWaitCompletion fired,
            // on whatever thread completion happened.
            let matches_notify = state
                .notify
                .as_ref()
                .is_some_and(|notify| notify.module == address && notify.method == token);
            if !matches_notify {
                return false;
            }
            let notify = state.notify.take().expect("notify checked above");
            let _ = notify.breakpoint.activate(false);
            drop(state);

            // The notification flag resets itself inside the method; a
            // plain step-out from here lands at the caller.
            if let Err(err) = self.simple.setup_step(thread, StepKind::Out) {
                warn!(%err, "could not arm step-out after wait-completion rendezvous");
            }
            return true;
        }
        let step = state.step.as_mut().expect("step checked above");

        if step.breakpoint.module_address() != address || step.breakpoint.method_token() != token {
            // Another breakpoint interrupted the async step; the step is
            // superseded and the hit is someone else's.
            let stale = state.step.take().expect("step checked above");
            let _ = stale.breakpoint.activate(false);
            return false;
        }

        let Ok((ip, mapping)) = frame.ip() else {
            warn!("no IL offset for frame during async step check");
            return false;
        };
        if !mapping.is_usable() || ip != step.breakpoint.il_offset() {
            let stale = state.step.take().expect("step checked above");
            let _ = stale.breakpoint.activate(false);
            return false;
        }

        match step.phase {
            AsyncPhase::YieldArmed => {
                if step.thread != thread.id() {
                    // A parallel invocation of the same state machine
                    // code on another thread; keep waiting.
                    return true;
                }

                let process = thread.process();
                let _ = self.simple.disable_all(&process);

                let resume = match function
                    .il_code()
                    .and_then(|code| code.create_breakpoint(step.resume_offset))
                {
                    Ok(resume) => resume,
                    Err(err) => {
                        warn!(%err, "could not arm resume breakpoint for await block");
                        return false;
                    }
                };
                if resume.activate(true).is_err() {
                    warn!("could not activate resume breakpoint for await block");
                    return false;
                }

                let _ = step.breakpoint.activate(false);
                step.breakpoint = resume;
                step.phase = AsyncPhase::ResumeArmed;

                // Pin the state machine identity for the cross-thread
                // comparison at resume time.
                step.async_id = self
                    .object_id(thread, &frame)
                    .and_then(|value| value.create_strong_handle().ok());
                if step.async_id.is_none() {
                    warn!("could not record async id for await block");
                }
                true
            }
            AsyncPhase::ResumeArmed => {
                if step.thread == thread.id() {
                    let kind = step.kind;
                    let finished = state.step.take().expect("step checked above");
                    let _ = finished.breakpoint.activate(false);
                    drop(state);
                    if let Err(err) = self.simple.setup_step(thread, kind) {
                        warn!(%err, "could not finish async step with a simple step");
                    }
                    return true;
                }

                // The continuation may resume on a thread the debugger
                // never saw; compare state-machine identity by the
                // builder object's address.
                let current = self
                    .object_id(thread, &frame)
                    .map(|value| value.address())
                    .unwrap_or(0);
                let recorded = step
                    .async_id
                    .as_ref()
                    .and_then(|handle| handle.dereference().ok())
                    .map(|value| value.address())
                    .unwrap_or(0);

                if current == recorded || current == 0 || recorded == 0 {
                    // Same logical continuation (or identity unknown):
                    // complete with a simple step of the original kind.
                    let kind = step.kind;
                    let finished = state.step.take().expect("step checked above");
                    let _ = finished.breakpoint.activate(false);
                    drop(state);
                    if let Err(err) = self.simple.setup_step(thread, kind) {
                        warn!(%err, "could not finish async step with a simple step");
                    }
                } // else: a different instance resumed first; stay armed.
                true
            }
        }
    }

    /// Read the builder's `ObjectIdForDebugger` for the state machine
    /// of `frame`, dereferenced to the identity object.
    fn object_id(&self, thread: &ThreadRef, frame: &FrameRef) -> Option<ValueRef> {
        let builder = builder_value(frame).ok()?;
        let id_ref = self
            .helpers
            .property_getter(thread, &builder, "ObjectIdForDebugger")
            .ok()?;
        let value = id_ref.dereference().ok()?;
        if value.is_null() {
            None
        } else {
            Some(value)
        }
    }

    /// Drop the async-step record and the rendezvous breakpoint.
    pub fn disable_all(&self) {
        let mut state = self.state.lock();
        if let Some(step) = state.step.take() {
            let _ = step.breakpoint.activate(false);
        }
        if let Some(notify) = state.notify.take() {
            let _ = notify.breakpoint.activate(false);
        }
    }

    /// True while an async step record exists (test observability).
    #[must_use]
    pub fn has_active_step(&self) -> bool {
        self.state.lock().step.is_some()
    }
}
