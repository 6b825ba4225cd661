//! The stepper subsystem: the simple range stepper plus the async
//! two-phase stepper behind one facade.

pub mod async_step;
pub mod simple;

use crate::debuginfo::DebugInfoBridge;
use crate::evaluator::EvalHelpers;
use async_step::{AsyncSetup, AsyncStepper};
use netdbg_core::error::Result;
use netdbg_core::runtime::{
    AppDomainRef, ProcessRef, RuntimeFrame, RuntimeFunction, RuntimeThread, ThreadRef,
};
use netdbg_core::types::{StepKind, StepReason, ThreadId};
use parking_lot::Mutex;
use simple::SimpleStepper;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::trace;

/// What the facade decided about a step-complete callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepHandling {
    /// Emit the step stop event.
    EmitStop,
    /// The completion landed in non-user code with the user's
    /// just-my-code off; a fresh step was armed and execution
    /// continues.
    Suppressed,
}

/// The stepper facade.
pub struct Steppers {
    simple: Arc<SimpleStepper>,
    async_stepper: AsyncStepper,
    just_my_code: AtomicBool,
    last_kind: Mutex<HashMap<ThreadId, StepKind>>,
}

impl Steppers {
    /// Create the facade.
    #[must_use]
    pub fn new(debuginfo: Arc<DebugInfoBridge>, helpers: Arc<dyn EvalHelpers>) -> Self {
        let simple = Arc::new(SimpleStepper::new(Arc::clone(&debuginfo)));
        Self {
            async_stepper: AsyncStepper::new(debuginfo, Arc::clone(&simple), helpers),
            simple,
            just_my_code: AtomicBool::new(true),
            last_kind: Mutex::new(HashMap::new()),
        }
    }

    /// Session-wide just-my-code flag; drives callback-time
    /// suppression, not the runtime-level stepper mask.
    pub fn set_just_my_code(&self, enable: bool) {
        self.just_my_code.store(enable, Ordering::SeqCst);
    }

    /// Arm a step on a stopped thread: the async stepper first, the
    /// simple stepper when it declines.
    ///
    /// # Errors
    ///
    /// Runtime failures while arming.
    pub fn setup_step(&self, thread: &ThreadRef, kind: StepKind) -> Result<()> {
        self.last_kind.lock().insert(thread.id(), kind);
        match self.async_stepper.setup_step(thread, kind)? {
            AsyncSetup::Handled => Ok(()),
            AsyncSetup::UseSimple => self.simple.setup_step(thread, kind),
        }
    }

    /// Breakpoint-hit filter. True when a stepper consumed the hit and
    /// no stop event must be emitted.
    #[must_use]
    pub fn on_breakpoint(&self, domain: &AppDomainRef, thread: &ThreadRef) -> bool {
        if self.async_stepper.on_breakpoint(thread) {
            return true;
        }
        self.simple.on_breakpoint(domain, thread)
    }

    /// Step-complete handling. With the user's just-my-code disabled, a
    /// completion inside symbol-less code re-arms the step instead of
    /// stopping.
    #[must_use]
    pub fn on_step_complete(&self, thread: &ThreadRef, reason: StepReason) -> StepHandling {
        let _ = reason;
        self.async_stepper.on_step_complete();
        self.simple.on_step_complete();

        if !self.just_my_code.load(Ordering::SeqCst) {
            let in_user_code = thread
                .active_frame()
                .ok()
                .flatten()
                .and_then(|frame| frame.function().ok())
                .and_then(|function| function.jmc_status().ok())
                .unwrap_or(true);
            if !in_user_code {
                let kind = self
                    .last_kind
                    .lock()
                    .get(&thread.id())
                    .copied()
                    .unwrap_or(StepKind::Over);
                trace!(thread = %thread.id(), ?kind,
                       "step completed in non-user code; re-arming");
                if self.setup_step(thread, kind).is_ok() {
                    return StepHandling::Suppressed;
                }
            }
        }

        StepHandling::EmitStop
    }

    /// Deactivate every primitive stepper and drop async-step state.
    /// Called before any non-step stop event so stale completions can
    /// never surface.
    ///
    /// # Errors
    ///
    /// Runtime failures while enumerating domains.
    pub fn disable_all(&self, process: &ProcessRef) -> Result<()> {
        self.async_stepper.disable_all();
        self.simple.disable_all(process)
    }

    /// True while an async step record exists (test observability).
    #[must_use]
    pub fn has_active_async_step(&self) -> bool {
        self.async_stepper.has_active_step()
    }
}
