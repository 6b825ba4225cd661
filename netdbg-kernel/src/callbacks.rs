//! The callback queue: serializes runtime callbacks into a
//! single-consumer FIFO and arbitrates continue versus stop.
//!
//! Producers are the runtime's ephemeral callback threads; the single
//! worker drains the queue and is the only thread that resumes the
//! target in response to callbacks. One mutex guards the queue, the
//! stop-outstanding flag, and the condition variable; the worker
//! dispatches entries while holding it, so a resume cannot race a
//! producer between pop and the empty-queue check. During a managed
//! evaluation producers resume the app-domain immediately without
//! touching the lock, which keeps condition evaluation deadlock-free.

use crate::breakpoints::{Breakpoints, HitOutcome};
use crate::debuginfo::{frame_id, DebugInfoBridge};
use crate::evaluator::Evaluator;
use crate::steppers::{StepHandling, Steppers};
use crate::threads::Threads;
use netdbg_core::error::{DebugError, Result};
use netdbg_core::runtime::{
    AppDomainRef, BreakpointRef, ProcessRef, RuntimeAppDomain, RuntimeProcess, RuntimeThread,
    ThreadRef,
};
use netdbg_core::types::{ExceptionKind, PauseSelection, StepReason, ThreadId};
use netdbg_protocol::{
    Breakpoint, BreakpointEventReason, DebugEvent, EventSink, OutputCategory, StackFrame,
    StopReason, StoppedEvent,
};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, trace, warn};

/// Gate flipped when the create-process callback has been processed;
/// `configurationDone` waits on it before reporting success.
#[derive(Default)]
pub struct AttachGate {
    attached: Mutex<bool>,
    cv: Condvar,
}

impl AttachGate {
    /// Create an unset gate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the process attached and wake every waiter.
    pub fn notify(&self) {
        let mut attached = self.attached.lock();
        *attached = true;
        self.cv.notify_all();
    }

    /// Wait until the gate is set. Returns false on timeout.
    #[must_use]
    pub fn wait(&self, timeout: Duration) -> bool {
        let mut attached = self.attached.lock();
        if *attached {
            return true;
        }
        self.cv.wait_for(&mut attached, timeout);
        *attached
    }

    /// True once the process attached.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        *self.attached.lock()
    }
}

/// One queued callback. Entries own strong references to their
/// app-domain and thread for the duration of the entry.
#[derive(Clone)]
pub enum CallbackEntry {
    /// A primitive breakpoint was hit.
    Breakpoint {
        /// Domain to resume when no stop is emitted.
        domain: AppDomainRef,
        /// Thread that hit the breakpoint.
        thread: ThreadRef,
        /// The primitive that fired.
        breakpoint: BreakpointRef,
    },
    /// A primitive stepper completed.
    StepComplete {
        /// Domain to resume when no stop is emitted.
        domain: AppDomainRef,
        /// Thread the step completed on.
        thread: ThreadRef,
        /// Runtime-reported completion reason.
        reason: StepReason,
    },
    /// The debuggee executed its debugger-break primitive.
    Break {
        /// Domain to resume when no stop is emitted.
        domain: AppDomainRef,
        /// Thread that broke.
        thread: ThreadRef,
    },
    /// An exception lifecycle notification.
    Exception {
        /// Domain to resume when no stop is emitted.
        domain: AppDomainRef,
        /// Thread carrying the exception.
        thread: ThreadRef,
        /// Notification kind.
        kind: ExceptionKind,
        /// Name of the module that raised.
        module_name: String,
    },
    /// The process finished creating.
    CreateProcess {
        /// The new process.
        process: ProcessRef,
    },
    /// Sentinel that terminates the worker.
    FinishWorker,
}

impl CallbackEntry {
    fn domain(&self) -> Option<&AppDomainRef> {
        match self {
            Self::Breakpoint { domain, .. }
            | Self::StepComplete { domain, .. }
            | Self::Break { domain, .. }
            | Self::Exception { domain, .. } => Some(domain),
            Self::CreateProcess { .. } | Self::FinishWorker => None,
        }
    }
}

/// Everything the worker needs to dispatch entries.
pub struct CallbackContext {
    /// Breakpoint facade.
    pub breakpoints: Arc<Breakpoints>,
    /// Stepper facade.
    pub steppers: Arc<Steppers>,
    /// Thread registry.
    pub threads: Arc<Threads>,
    /// Frame-to-source mapping.
    pub debuginfo: Arc<DebugInfoBridge>,
    /// Evaluator collaborator (eval-in-progress checks, conditions).
    pub evaluator: Arc<dyn Evaluator>,
    /// Protocol adapter event sink.
    pub events: Arc<dyn EventSink>,
    /// Attach gate flipped by the create-process entry.
    pub attach_gate: Arc<AttachGate>,
    /// Invoked after each stop event; the I/O redirector hooks its
    /// read cancellation here.
    pub stop_hook: Option<Arc<dyn Fn() + Send + Sync>>,
}

struct QueueState {
    entries: VecDeque<CallbackEntry>,
    stop_outstanding: bool,
}

struct Shared {
    state: Mutex<QueueState>,
    cv: Condvar,
    ctx: CallbackContext,
}

/// The callback queue and its worker thread.
pub struct CallbackQueue {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CallbackQueue {
    /// Create the queue and start its worker thread.
    #[must_use]
    pub fn new(ctx: CallbackContext) -> Arc<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                entries: VecDeque::new(),
                stop_outstanding: false,
            }),
            cv: Condvar::new(),
            ctx,
        });

        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name("netdbg-callbacks".to_string())
            .spawn(move || Self::worker_loop(&worker_shared))
            .expect("callback worker thread");

        Arc::new(Self {
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Producer entry point. During an evaluation the callback is
    /// dropped and the domain resumed; evaluations must not be
    /// interrupted. Otherwise the entry is appended and either the
    /// domain resumes (more callbacks pending inside the runtime) or
    /// the worker wakes.
    pub fn enqueue(&self, entry: CallbackEntry) {
        if self.shared.ctx.evaluator.is_eval_running() {
            if let Some(domain) = entry.domain() {
                let _ = domain.resume();
            } else if let CallbackEntry::CreateProcess { process } = &entry {
                let _ = process.resume();
            }
            return;
        }

        let domain = entry.domain().cloned();
        let process = match (&domain, &entry) {
            (Some(domain), _) => Some(domain.process()),
            (None, CallbackEntry::CreateProcess { process }) => Some(Arc::clone(process)),
            _ => None,
        };

        let mut state = self.shared.state.lock();
        state.entries.push_back(entry);

        // More callbacks already wait inside the runtime for this
        // process: resume so they drain into the queue before the
        // worker runs.
        let more_pending = process.as_ref().is_some_and(|p| p.has_queued_callbacks());
        if more_pending {
            if let Some(domain) = &domain {
                let _ = domain.resume();
            } else if let Some(process) = &process {
                let _ = process.resume();
            }
        } else {
            self.shared.cv.notify_one();
        }
        trace!(more_pending, "callback enqueued");
    }

    /// Resume path for callbacks handled outside the queue (module
    /// loads, thread lifecycle): resume the domain unless queued
    /// entries are waiting for the worker.
    pub fn continue_domain(&self, domain: &AppDomainRef) {
        if self.shared.ctx.evaluator.is_eval_running() {
            let _ = domain.resume();
            return;
        }

        let state = self.shared.state.lock();
        if state.entries.is_empty() || domain.process().has_queued_callbacks() {
            let _ = domain.resume();
        } else {
            self.shared.cv.notify_one();
        }
    }

    /// The `continue` request: clears the outstanding stop and either
    /// resumes the process or lets the worker drain deferred entries.
    ///
    /// # Errors
    ///
    /// [`DebugError::ProcessRunning`] when no stop is outstanding.
    pub fn resume(&self, process: &ProcessRef) -> Result<()> {
        let mut state = self.shared.state.lock();
        if !state.stop_outstanding {
            return Err(DebugError::ProcessRunning);
        }
        state.stop_outstanding = false;

        if state.entries.is_empty() {
            process.resume()
        } else {
            self.shared.cv.notify_one();
            Ok(())
        }
    }

    /// True while no stop event is outstanding.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.shared.state.lock().stop_outstanding
    }

    /// Stop the process, honoring an already-outstanding stop. Returns
    /// true when this call performed the stop.
    ///
    /// # Errors
    ///
    /// Runtime failures from the stop call.
    pub fn stop(&self, process: &ProcessRef) -> Result<bool> {
        let mut state = self.shared.state.lock();
        Self::internal_stop(&mut state, process)
    }

    fn internal_stop(state: &mut QueueState, process: &ProcessRef) -> Result<bool> {
        if state.stop_outstanding {
            return Ok(false);
        }
        process.stop()?;
        state.stop_outstanding = true;
        Ok(true)
    }

    /// The `pause` request: stop the process, cancel in-flight steps,
    /// select the thread to report by the protocol flavor, and emit the
    /// pause stop event. On failure the process is resumed and the
    /// request fails.
    ///
    /// # Errors
    ///
    /// Runtime stop failures, or [`DebugError::Internal`] when no
    /// suitable thread exists.
    pub fn pause(&self, process: &ProcessRef, selection: PauseSelection) -> Result<()> {
        let ctx = &self.shared.ctx;
        let mut state = self.shared.state.lock();

        if !Self::internal_stop(&mut state, process)? {
            return Ok(()); // Already stopped.
        }

        // Cancel any in-flight step before a non-step stop event.
        let _ = ctx.steppers.disable_all(process);

        let threads = process.threads();

        match selection {
            PauseSelection::Thread(thread_id) => {
                if threads.iter().any(|thread| thread.id() == thread_id) {
                    // Richer protocols count on the named thread, even
                    // when it holds no user code.
                    ctx.threads.set_last_stopped(thread_id);
                    Self::emit_stop(
                        ctx,
                        StoppedEvent::new(StopReason::Pause, thread_id),
                    );
                    return Ok(());
                }
            }
            PauseSelection::FirstThread => {
                let (thread_id, frame) = match threads.first() {
                    Some(thread) => (thread.id(), Self::top_frame(ctx, thread)),
                    None => (ThreadId(u64::from(process.id().0)), None),
                };
                ctx.threads.set_last_stopped(thread_id);
                let mut event = StoppedEvent::new(StopReason::Pause, thread_id);
                event.frame = frame;
                Self::emit_stop(ctx, event);
                return Ok(());
            }
            PauseSelection::SourceFrame => {
                // Prefer the previously stopped thread, then search for
                // any frame with a known source file.
                let mut ordered: Vec<&ThreadRef> = threads.iter().collect();
                if let Some(last) = ctx.threads.last_stopped() {
                    ordered.sort_by_key(|thread| thread.id() != last);
                }

                for thread in ordered {
                    let Ok(frames) = thread.frames() else {
                        continue;
                    };
                    for (level, frame) in frames.iter().enumerate() {
                        let level = u32::try_from(level).unwrap_or(u32::MAX);
                        let located =
                            ctx.debuginfo
                                .frame_location(frame, frame_id(thread.id(), level));
                        if located.source.is_some() {
                            ctx.threads.set_last_stopped(thread.id());
                            let mut event = StoppedEvent::new(StopReason::Pause, thread.id());
                            event.frame = Some(located);
                            Self::emit_stop(ctx, event);
                            return Ok(());
                        }
                    }
                }
            }
        }

        // No stop event was emitted; fail the request and keep running.
        warn!("pause could not select a thread; resuming");
        state.stop_outstanding = false;
        process.resume()?;
        Err(DebugError::internal("no suitable thread for pause"))
    }

    /// Terminate the worker: clear the queue, force the stop flag off,
    /// enqueue the finish sentinel, and join.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            state.entries.clear();
            state.entries.push_back(CallbackEntry::FinishWorker);
            state.stop_outstanding = false;
            self.shared.cv.notify_one();
        }
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                error!("callback worker panicked");
            }
        }
    }

    fn worker_loop(shared: &Arc<Shared>) {
        let mut state = shared.state.lock();
        loop {
            while state.entries.is_empty() || state.stop_outstanding {
                shared.cv.wait(&mut state);
            }

            let entry = state
                .entries
                .front()
                .cloned()
                .expect("queue checked non-empty");
            if matches!(entry, CallbackEntry::FinishWorker) {
                debug!("callback worker finishing");
                return;
            }

            // Dispatch with the lock held: a racing producer parks on
            // the mutex and cannot observe a half-updated stop state.
            state.stop_outstanding = Self::dispatch(&shared.ctx, &entry);
            state.entries.pop_front();

            if state.entries.is_empty() && !state.stop_outstanding {
                if let Some(domain) = entry.domain() {
                    let _ = domain.resume();
                } else if let CallbackEntry::CreateProcess { process } = &entry {
                    let _ = process.resume();
                }
            }
        }
    }

    /// Dispatch one entry; returns true when a stop event was emitted.
    fn dispatch(ctx: &CallbackContext, entry: &CallbackEntry) -> bool {
        match entry {
            CallbackEntry::Breakpoint {
                domain,
                thread,
                breakpoint,
            } => Self::dispatch_breakpoint(ctx, domain, thread, breakpoint),
            CallbackEntry::StepComplete { thread, reason, .. } => {
                Self::dispatch_step_complete(ctx, thread, *reason)
            }
            CallbackEntry::Break { thread, .. } => Self::dispatch_break(ctx, thread),
            CallbackEntry::Exception {
                thread,
                kind,
                module_name,
                ..
            } => Self::dispatch_exception(ctx, thread, *kind, module_name),
            CallbackEntry::CreateProcess { .. } => {
                ctx.attach_gate.notify();
                false
            }
            CallbackEntry::FinishWorker => false,
        }
    }

    fn dispatch_breakpoint(
        ctx: &CallbackContext,
        domain: &AppDomainRef,
        thread: &ThreadRef,
        breakpoint: &BreakpointRef,
    ) -> bool {
        // Steppers first: async-step bookkeeping breakpoints and stale
        // step hits never reach the breakpoint facade.
        if ctx.steppers.on_breakpoint(domain, thread) {
            return false;
        }

        match ctx
            .breakpoints
            .check_hit(thread, breakpoint, ctx.evaluator.as_ref())
        {
            HitOutcome::Consumed => false,
            HitOutcome::Stop {
                breakpoint: record,
                at_entry,
                changes,
            } => {
                // A breakpoint stop cancels any step in flight.
                let _ = ctx.steppers.disable_all(&thread.process());

                let reason = if at_entry {
                    StopReason::Entry
                } else {
                    StopReason::Breakpoint
                };

                Self::emit_change_events(ctx, &changes);

                let mut event = StoppedEvent::new(reason, thread.id());
                event.frame = Self::top_frame(ctx, thread);
                event.hit_breakpoint_ids = record.and_then(|r| r.id).into_iter().collect();
                Self::record_stop(ctx, thread);
                Self::emit_stop(ctx, event);
                true
            }
        }
    }

    fn dispatch_step_complete(
        ctx: &CallbackContext,
        thread: &ThreadRef,
        reason: StepReason,
    ) -> bool {
        match ctx.steppers.on_step_complete(thread, reason) {
            StepHandling::Suppressed => false,
            StepHandling::EmitStop => {
                let mut event = StoppedEvent::new(StopReason::Step, thread.id());
                event.frame = Self::top_frame(ctx, thread);
                Self::record_stop(ctx, thread);
                Self::emit_stop(ctx, event);
                true
            }
        }
    }

    fn dispatch_break(ctx: &CallbackContext, thread: &ThreadRef) -> bool {
        if !ctx.breakpoints.on_break(thread) {
            trace!("debugger break repeats last stop; consuming");
            return false;
        }

        let _ = ctx.steppers.disable_all(&thread.process());

        let mut event = StoppedEvent::new(StopReason::Pause, thread.id());
        event.frame = Self::top_frame(ctx, thread);
        Self::record_stop(ctx, thread);
        Self::emit_stop(ctx, event);
        true
    }

    fn dispatch_exception(
        ctx: &CallbackContext,
        thread: &ThreadRef,
        kind: ExceptionKind,
        module_name: &str,
    ) -> bool {
        let Some(stop) = ctx.breakpoints.on_exception(thread, kind, module_name) else {
            return false;
        };

        let _ = ctx.steppers.disable_all(&thread.process());

        let mut event = StoppedEvent::new(StopReason::Exception, thread.id());
        event.frame = Self::top_frame(ctx, thread);
        event.description = Some(stop.description);
        event.hit_breakpoint_ids = vec![stop.filter_id];
        Self::record_stop(ctx, thread);
        Self::emit_stop(ctx, event);
        true
    }

    fn top_frame(ctx: &CallbackContext, thread: &ThreadRef) -> Option<StackFrame> {
        let frame = thread.active_frame().ok().flatten()?;
        Some(ctx.debuginfo.frame_location(&frame, frame_id(thread.id(), 0)))
    }

    fn record_stop(ctx: &CallbackContext, thread: &ThreadRef) {
        ctx.threads.set_last_stopped(thread.id());
        if let Ok(Some(frame)) = thread.active_frame() {
            if let Some(site) = ctx.debuginfo.stop_site(&frame) {
                ctx.threads.record_stop_site(thread.id(), site);
            }
        }
    }

    fn emit_change_events(ctx: &CallbackContext, changes: &[Breakpoint]) {
        for change in changes {
            if let Some(message) = &change.message {
                let location = match (&change.source, change.line, &change.func_name) {
                    (Some(source), Some(line), _) => {
                        format!("{}:{line}", source.path.clone().unwrap_or_default())
                    }
                    (_, _, Some(func)) => format!("{func}()"),
                    _ => String::new(),
                };
                ctx.events.emit(DebugEvent::Output {
                    category: OutputCategory::Stderr,
                    output: format!("Breakpoint error: {message} - {location}\n"),
                    source: change.source.clone(),
                });
            }
            ctx.events.emit(DebugEvent::Breakpoint {
                reason: BreakpointEventReason::Changed,
                breakpoint: change.clone(),
            });
        }
    }

    fn emit_stop(ctx: &CallbackContext, event: StoppedEvent) {
        ctx.events.emit(DebugEvent::Stopped(event));
        if let Some(hook) = &ctx.stop_hook {
            hook();
        }
    }
}

impl Drop for CallbackQueue {
    fn drop(&mut self) {
        let running = self.worker.lock().is_some();
        if running {
            self.shutdown();
        }
    }
}
