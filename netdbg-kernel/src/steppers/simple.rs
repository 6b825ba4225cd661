//! The simple stepper: wraps the runtime's range/step primitives with
//! the just-my-code mask.

use crate::debuginfo::DebugInfoBridge;
use netdbg_core::error::Result;
use netdbg_core::runtime::{
    AppDomainRef, ProcessRef, RuntimeAppDomain, RuntimeProcess, RuntimeStepper, RuntimeThread,
    StepperConfig, ThreadRef,
};
use netdbg_core::types::{StepKind, ThreadId};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::trace;

/// The simple stepper. Tracks which thread has an armed step so stray
/// breakpoint hits during a step can be ignored once the runtime
/// stepper has already detached.
pub struct SimpleStepper {
    debuginfo: Arc<DebugInfoBridge>,
    armed_thread: Mutex<Option<ThreadId>>,
}

impl SimpleStepper {
    /// Create the stepper.
    #[must_use]
    pub fn new(debuginfo: Arc<DebugInfoBridge>) -> Self {
        Self {
            debuginfo,
            armed_thread: Mutex::new(None),
        }
    }

    /// Arm a primitive step on `thread`.
    ///
    /// The runtime-level just-my-code flag is always on, whatever the
    /// session setting; it is the only way stepping stays fast. With
    /// the user setting off, non-user stops are filtered at callback
    /// time instead.
    ///
    /// # Errors
    ///
    /// Runtime failures while creating or arming the stepper.
    pub fn setup_step(&self, thread: &ThreadRef, kind: StepKind) -> Result<()> {
        let stepper = thread.create_stepper()?;
        stepper.configure(&StepperConfig::default())?;

        if kind == StepKind::Out {
            stepper.step_out()?;
            *self.armed_thread.lock() = Some(thread.id());
            return Ok(());
        }

        let step_in = kind == StepKind::In;
        match self.debuginfo.step_range_from_ip(thread) {
            Ok(range) => stepper.step_range(step_in, range)?,
            Err(err) => {
                trace!(%err, "no statement range at IP; arming plain step");
                stepper.step(step_in)?;
            }
        }

        *self.armed_thread.lock() = Some(thread.id());
        Ok(())
    }

    /// Breakpoint callback filter: when a step was armed on this thread
    /// but every runtime stepper in the domain has already gone
    /// inactive, the hit belongs to the finished step and is ignored.
    #[must_use]
    pub fn on_breakpoint(&self, domain: &AppDomainRef, thread: &ThreadRef) -> bool {
        if *self.armed_thread.lock() != Some(thread.id()) {
            return false;
        }
        let any_active = domain
            .steppers()
            .iter()
            .any(|stepper| stepper.is_active());
        !any_active
    }

    /// Step-complete callback: clear the armed mark; the stop event is
    /// emitted by the worker.
    pub fn on_step_complete(&self) {
        *self.armed_thread.lock() = None;
    }

    /// Deactivate every primitive stepper of every app-domain.
    ///
    /// # Errors
    ///
    /// Runtime failures while enumerating domains.
    pub fn disable_all(&self, process: &ProcessRef) -> Result<()> {
        for domain in process.app_domains() {
            for stepper in domain.steppers() {
                let _ = stepper.deactivate();
            }
        }
        *self.armed_thread.lock() = None;
        Ok(())
    }
}
