//! The breakpoint subsystem: five variants behind one facade.
//!
//! The facade owns the session-global monotonic breakpoint-id
//! allocator and routes runtime callbacks to the variants. On a
//! breakpoint-hit callback arbitration runs in a fixed order: the entry
//! breakpoint first, then the just-my-code check on the active frame
//! (non-user hits are consumed silently), then line breakpoints, then
//! function breakpoints. The first to claim the hit wins.

pub mod condition;
pub mod entry;
pub mod exception;
pub mod function;
pub mod line;

use crate::debuginfo::DebugInfoBridge;
use crate::evaluator::Evaluator;
use crate::modules::Modules;
use crate::threads::Threads;
use entry::EntryBreakpoint;
use exception::{ExceptionBreakpoints, ExceptionStop};
use function::FunctionBreakpoints;
use line::LineBreakpoints;
use netdbg_core::error::Result;
use netdbg_core::runtime::{
    BreakpointRef, ModuleRef, ProcessRef, RuntimeAppDomain, RuntimeBreakpoint, RuntimeFrame,
    RuntimeFunction, RuntimeProcess, RuntimeThread, ThreadRef,
};
use netdbg_core::types::ExceptionKind;
use netdbg_protocol::{
    Breakpoint, ExceptionFilter, ExceptionInfoBody, FunctionBreakpoint as FunctionBreakpointRequest,
    Source, SourceBreakpoint,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::trace;

/// What a breakpoint-hit arbitration decided.
pub enum HitOutcome {
    /// A variant claimed the hit; emit a stop event.
    Stop {
        /// The claiming breakpoint's record, absent for the entry
        /// breakpoint.
        breakpoint: Option<Breakpoint>,
        /// True when the entry breakpoint claimed the hit.
        at_entry: bool,
        /// Condition-failure records to surface as
        /// `breakpoint(changed)` events plus console output.
        changes: Vec<Breakpoint>,
    },
    /// Nobody claimed the hit (stale site, non-user code, condition
    /// skip); resume silently.
    Consumed,
}

/// The breakpoint facade.
pub struct Breakpoints {
    modules: Arc<Modules>,
    debuginfo: Arc<DebugInfoBridge>,
    threads: Arc<Threads>,
    entry: EntryBreakpoint,
    line: LineBreakpoints,
    function: FunctionBreakpoints,
    exception: ExceptionBreakpoints,
    next_id: Mutex<u32>,
    just_my_code: AtomicBool,
}

impl Breakpoints {
    /// Create the facade over the shared module index.
    #[must_use]
    pub fn new(
        modules: Arc<Modules>,
        debuginfo: Arc<DebugInfoBridge>,
        threads: Arc<Threads>,
    ) -> Self {
        Self {
            modules,
            debuginfo,
            threads,
            entry: EntryBreakpoint::new(),
            line: LineBreakpoints::new(),
            function: FunctionBreakpoints::new(),
            exception: ExceptionBreakpoints::new(),
            next_id: Mutex::new(1),
            just_my_code: AtomicBool::new(true),
        }
    }

    /// Session-wide just-my-code flag; affects installation and the
    /// hit-time frame check.
    pub fn set_just_my_code(&self, enable: bool) {
        self.just_my_code.store(enable, Ordering::SeqCst);
    }

    fn jmc(&self) -> bool {
        self.just_my_code.load(Ordering::SeqCst)
    }

    /// Enable or disable stop-at-entry.
    pub fn set_stop_at_entry(&self, enable: bool) {
        self.entry.set_stop_at_entry(enable);
    }

    /// Allocate the next breakpoint id. Ids are strictly monotonic and
    /// never reused, across every variant.
    fn alloc_id(&self) -> u32 {
        let mut next = self.next_id.lock();
        let id = *next;
        *next += 1;
        id
    }

    /// Replace the line breakpoints of one source file.
    pub fn set_line_breakpoints(
        &self,
        have_process: bool,
        source: &Source,
        requested: &[SourceBreakpoint],
    ) -> Vec<Breakpoint> {
        let mut alloc = || self.alloc_id();
        self.line.set_breakpoints(
            have_process,
            self.jmc(),
            source,
            requested,
            &self.modules,
            &mut alloc,
        )
    }

    /// Replace the function-breakpoint set.
    pub fn set_function_breakpoints(
        &self,
        have_process: bool,
        requested: &[FunctionBreakpointRequest],
    ) -> Vec<Breakpoint> {
        let mut alloc = || self.alloc_id();
        self.function.set_breakpoints(
            have_process,
            self.jmc(),
            requested,
            &self.modules,
            &self.debuginfo,
            &mut alloc,
        )
    }

    /// Replace the exception-filter list.
    pub fn set_exception_breakpoints(&self, requested: &[ExceptionFilter]) -> Vec<Breakpoint> {
        let mut alloc = || self.alloc_id();
        self.exception.set_breakpoints(requested, &mut alloc)
    }

    /// Route a module-load callback to every variant. Returns records
    /// to emit as `breakpoint(changed)` events.
    pub fn on_module_load(&self, module: &ModuleRef) -> Vec<Breakpoint> {
        if let Err(err) = self.entry.on_module_load(module, &self.debuginfo) {
            trace!(%err, "entry breakpoint installation failed");
        }
        let mut changed = self
            .function
            .on_module_load(module, self.jmc(), &self.modules, &self.debuginfo);
        changed.extend(
            self.line
                .on_module_load(module, self.jmc(), &self.modules),
        );
        changed
    }

    /// Arbitrate a breakpoint-hit callback.
    #[must_use]
    pub fn check_hit(
        &self,
        thread: &ThreadRef,
        primitive: &BreakpointRef,
        evaluator: &dyn Evaluator,
    ) -> HitOutcome {
        // 1. Entry breakpoint.
        if self.entry.check_hit(primitive) {
            return HitOutcome::Stop {
                breakpoint: None,
                at_entry: true,
                changes: Vec::new(),
            };
        }

        // 2. Hits inside non-user code are consumed silently; the
        // protocol receives no event. Errors here are not fatal.
        let in_user_code = thread
            .active_frame()
            .ok()
            .flatten()
            .and_then(|frame| frame.function().ok())
            .and_then(|function| function.jmc_status().ok())
            .unwrap_or(true);
        if !in_user_code {
            trace!("breakpoint hit in non-user code; consuming");
            return HitOutcome::Consumed;
        }

        // 3. Line breakpoints.
        if let Some(hit) = self.line.check_hit(thread, primitive, evaluator) {
            return HitOutcome::Stop {
                breakpoint: Some(hit.record),
                at_entry: false,
                changes: hit.changes,
            };
        }

        // 4. Function breakpoints.
        if let Some(hit) = self.function.check_hit(thread, primitive, evaluator) {
            return HitOutcome::Stop {
                breakpoint: Some(hit.record),
                at_entry: false,
                changes: hit.changes,
            };
        }

        HitOutcome::Consumed
    }

    /// Route an exception callback.
    #[must_use]
    pub fn on_exception(
        &self,
        thread: &ThreadRef,
        kind: ExceptionKind,
        module_name: &str,
    ) -> Option<ExceptionStop> {
        self.exception.on_exception(thread, kind, module_name)
    }

    /// Handle a debugger-break callback: suppressed when it repeats the
    /// statement of the previous stop on the same thread.
    #[must_use]
    pub fn on_break(&self, thread: &ThreadRef) -> bool {
        let repeated = thread
            .active_frame()
            .ok()
            .flatten()
            .and_then(|frame| {
                let site = self.debuginfo.stop_site(&frame)?;
                Some(self.threads.repeats_last_stop(
                    thread.id(),
                    site.module,
                    site.method,
                    site.range.start,
                ))
            })
            .unwrap_or(false);
        !repeated
    }

    /// Drop exception lifecycle state for an exited thread.
    pub fn on_thread_exit(&self, thread: &ThreadRef) {
        self.exception.on_thread_exit(thread.id());
    }

    /// Assemble the `exceptionInfo` response.
    #[must_use]
    pub fn exception_info(&self, thread: &ThreadRef) -> Option<ExceptionInfoBody> {
        self.exception.exception_info(thread, &self.debuginfo)
    }

    /// Times the breakpoint with `id` has fired (observability for
    /// tests and the console).
    #[must_use]
    pub fn hit_count(&self, id: u32) -> Option<u32> {
        self.line
            .hit_count(id)
            .or_else(|| self.function.hit_count(id))
    }

    /// Deactivate and drop every breakpoint of every variant.
    pub fn delete_all(&self) {
        self.entry.delete();
        self.function.delete_all();
        self.line.delete_all();
        self.exception.delete_all();
    }

    /// Deactivate every primitive breakpoint the runtime knows,
    /// enumerated per app-domain (detach path).
    ///
    /// # Errors
    ///
    /// Runtime failures while enumerating domains.
    pub fn disable_all(&self, process: &ProcessRef) -> Result<()> {
        for domain in process.app_domains() {
            for breakpoint in domain.breakpoints() {
                let _ = breakpoint.activate(false);
            }
        }
        Ok(())
    }
}
