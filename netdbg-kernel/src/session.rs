//! The session controller: lifecycle, request dispatch, and the
//! callback router feeding the queue.
//!
//! Lifecycle changes (startup and teardown) take the process handle's
//! write lock; every other operation reads it. The debuggee starts
//! running only once both the launch/attach request and
//! `configurationDone` have arrived, so breakpoints configured in
//! between resolve on the module-load callbacks of the fresh process.

use crate::breakpoints::Breakpoints;
use crate::callbacks::{AttachGate, CallbackContext, CallbackEntry, CallbackQueue};
use crate::debuginfo::{frame_id, frame_id_parts, DebugInfoBridge};
use crate::evaluator::{EvalHelpers, Evaluator};
use crate::modules::Modules;
use crate::sources::SourceIndex;
use crate::steppers::Steppers;
use crate::threads::Threads;
use netdbg_config::SessionConfig;
use netdbg_core::error::{DebugError, Result};
use netdbg_core::runtime::{
    AppDomainRef, BreakpointRef, LaunchSpec, ModuleRef, ProcessRef, RuntimeCallbackSink,
    RuntimeDebug, RuntimeProcess, RuntimeThread, ThreadRef,
};
use netdbg_core::types::{
    DisconnectAction, ExceptionKind, PauseSelection, ProcessId, StepKind, StepReason, ThreadId,
};
use netdbg_protocol::{
    Breakpoint, Capabilities, DebugEvent, DebugRequest, DebugResponse, EventSink, ExceptionFilter,
    ExceptionInfoBody, FunctionBreakpoint, LaunchArguments, ModuleEventReason, OutputCategory,
    Scope, Source, SourceBreakpoint, StackFrame, Thread, ThreadEventReason, Variable,
    VariablesFilter,
};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// How long `configurationDone` waits for the create-process callback
/// to drain through the queue.
const ATTACH_WAIT: Duration = Duration::from_secs(30);

/// How the session was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum StartMethod {
    #[default]
    None,
    Launch,
    Attach(ProcessId),
}

#[derive(Default)]
struct StartState {
    initialized: bool,
    method: StartMethod,
    launch: Option<LaunchArguments>,
    configuration_done: bool,
    running: bool,
}

/// Routes runtime callbacks into the queue and handles the
/// bookkeeping-only callbacks (modules, threads) on the callback
/// thread itself.
struct CallbackRouter {
    queue: Arc<CallbackQueue>,
    modules: Arc<Modules>,
    breakpoints: Arc<Breakpoints>,
    threads: Arc<Threads>,
    events: Arc<dyn EventSink>,
    just_my_code: Arc<std::sync::atomic::AtomicBool>,
}

impl CallbackRouter {
    fn jmc(&self) -> bool {
        self.just_my_code.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl RuntimeCallbackSink for CallbackRouter {
    fn on_process_created(&self, process: ProcessRef) {
        self.queue.enqueue(CallbackEntry::CreateProcess { process });
    }

    fn on_process_exited(&self, _process: ProcessRef, exit_code: i32) {
        info!(exit_code, "debuggee exited");
        self.threads.clear();
        self.events.emit(DebugEvent::Exited { exit_code });
        self.events.emit(DebugEvent::Terminated);
    }

    fn on_module_load(&self, domain: AppDomainRef, module: ModuleRef) {
        let outcome = self.modules.on_module_load(&module, self.jmc());
        self.events.emit(DebugEvent::Module {
            reason: ModuleEventReason::New,
            module: outcome.record,
        });
        if let Some(advisory) = outcome.advisory {
            self.events.emit(DebugEvent::Output {
                category: OutputCategory::Console,
                output: format!("{advisory}\n"),
                source: None,
            });
        }

        for changed in self.breakpoints.on_module_load(&module) {
            self.events.emit(DebugEvent::Breakpoint {
                reason: netdbg_protocol::BreakpointEventReason::Changed,
                breakpoint: changed,
            });
        }

        self.queue.continue_domain(&domain);
    }

    fn on_module_unload(&self, domain: AppDomainRef, module: ModuleRef) {
        if let Some(record) = self.modules.on_module_unload(&module) {
            self.events.emit(DebugEvent::Module {
                reason: ModuleEventReason::Removed,
                module: record,
            });
        }
        self.queue.continue_domain(&domain);
    }

    fn on_thread_created(&self, domain: AppDomainRef, thread: ThreadRef) {
        let thread_id = thread.id();
        self.threads.register(thread);
        self.events.emit(DebugEvent::Thread {
            reason: ThreadEventReason::Started,
            thread_id,
        });
        self.queue.continue_domain(&domain);
    }

    fn on_thread_exited(&self, domain: AppDomainRef, thread: ThreadRef) {
        let thread_id = thread.id();
        self.breakpoints.on_thread_exit(&thread);
        self.threads.unregister(thread_id);
        self.events.emit(DebugEvent::Thread {
            reason: ThreadEventReason::Exited,
            thread_id,
        });
        self.queue.continue_domain(&domain);
    }

    fn on_breakpoint(&self, domain: AppDomainRef, thread: ThreadRef, breakpoint: BreakpointRef) {
        self.queue.enqueue(CallbackEntry::Breakpoint {
            domain,
            thread,
            breakpoint,
        });
    }

    fn on_step_complete(&self, domain: AppDomainRef, thread: ThreadRef, reason: StepReason) {
        self.queue.enqueue(CallbackEntry::StepComplete {
            domain,
            thread,
            reason,
        });
    }

    fn on_break(&self, domain: AppDomainRef, thread: ThreadRef) {
        self.queue.enqueue(CallbackEntry::Break { domain, thread });
    }

    fn on_exception(
        &self,
        domain: AppDomainRef,
        thread: ThreadRef,
        kind: ExceptionKind,
        module_name: String,
    ) {
        self.queue.enqueue(CallbackEntry::Exception {
            domain,
            thread,
            kind,
            module_name,
        });
    }
}

/// The debug session: owns every subsystem and serves protocol
/// requests.
pub struct DebugSession {
    runtime: Arc<dyn RuntimeDebug>,
    evaluator: Arc<dyn Evaluator>,
    events: Arc<dyn EventSink>,
    modules: Arc<Modules>,
    threads: Arc<Threads>,
    debuginfo: Arc<DebugInfoBridge>,
    breakpoints: Arc<Breakpoints>,
    steppers: Arc<Steppers>,
    queue: Arc<CallbackQueue>,
    router: Arc<CallbackRouter>,
    attach_gate: Arc<AttachGate>,
    just_my_code: Arc<std::sync::atomic::AtomicBool>,
    process: RwLock<Option<ProcessRef>>,
    start: Mutex<StartState>,
}

impl DebugSession {
    /// Wire the session together. `stop_hook` is invoked after every
    /// stop event (the I/O redirector cancels pending reads there).
    #[must_use]
    pub fn new(
        runtime: Arc<dyn RuntimeDebug>,
        evaluator: Arc<dyn Evaluator>,
        helpers: Arc<dyn EvalHelpers>,
        events: Arc<dyn EventSink>,
        config: &SessionConfig,
        stop_hook: Option<Arc<dyn Fn() + Send + Sync>>,
    ) -> Arc<Self> {
        let sources = Arc::new(SourceIndex::new());
        let modules = Arc::new(Modules::new(sources));
        let threads = Arc::new(Threads::new());
        let debuginfo = Arc::new(DebugInfoBridge::new(Arc::clone(&modules)));
        let breakpoints = Arc::new(Breakpoints::new(
            Arc::clone(&modules),
            Arc::clone(&debuginfo),
            Arc::clone(&threads),
        ));
        let steppers = Arc::new(Steppers::new(Arc::clone(&debuginfo), helpers));
        let attach_gate = Arc::new(AttachGate::new());

        breakpoints.set_just_my_code(config.just_my_code);
        breakpoints.set_stop_at_entry(config.stop_at_entry);
        steppers.set_just_my_code(config.just_my_code);

        let queue = CallbackQueue::new(CallbackContext {
            breakpoints: Arc::clone(&breakpoints),
            steppers: Arc::clone(&steppers),
            threads: Arc::clone(&threads),
            debuginfo: Arc::clone(&debuginfo),
            evaluator: Arc::clone(&evaluator),
            events: Arc::clone(&events),
            attach_gate: Arc::clone(&attach_gate),
            stop_hook,
        });

        let just_my_code = Arc::new(std::sync::atomic::AtomicBool::new(config.just_my_code));
        let router = Arc::new(CallbackRouter {
            queue: Arc::clone(&queue),
            modules: Arc::clone(&modules),
            breakpoints: Arc::clone(&breakpoints),
            threads: Arc::clone(&threads),
            events: Arc::clone(&events),
            just_my_code: Arc::clone(&just_my_code),
        });

        Arc::new(Self {
            runtime,
            evaluator,
            events,
            modules,
            threads,
            debuginfo,
            breakpoints,
            steppers,
            queue,
            router,
            attach_gate,
            just_my_code,
            process: RwLock::new(None),
            start: Mutex::new(StartState::default()),
        })
    }

    /// The `initialize` handshake. Initializes the runtime-debug layer
    /// (which refuses a second init) and reports capabilities.
    ///
    /// # Errors
    ///
    /// [`DebugError::AlreadyInitialized`] on repeated initialization.
    #[instrument(level = "debug", skip(self))]
    pub fn initialize(&self) -> Result<Capabilities> {
        self.runtime.initialize()?;
        self.start.lock().initialized = true;
        let capabilities = Capabilities::default();
        self.events.emit(DebugEvent::Initialized);
        self.events
            .emit(DebugEvent::Capabilities(capabilities.clone()));
        Ok(capabilities)
    }

    /// The `launch` request: record what to run and apply the session
    /// flags. The debuggee starts at `configurationDone`.
    ///
    /// # Errors
    ///
    /// [`DebugError::InvalidArgument`] when a session is already
    /// started.
    #[instrument(level = "info", skip(self, args), fields(program = %args.program))]
    pub fn launch(&self, args: LaunchArguments) -> Result<()> {
        let mut start = self.start.lock();
        if !start.initialized {
            return Err(DebugError::invalid_argument("initialize first"));
        }
        if start.method != StartMethod::None {
            return Err(DebugError::invalid_argument("session already started"));
        }

        self.just_my_code
            .store(args.just_my_code, std::sync::atomic::Ordering::SeqCst);
        self.breakpoints.set_just_my_code(args.just_my_code);
        self.breakpoints.set_stop_at_entry(args.stop_at_entry);
        self.steppers.set_just_my_code(args.just_my_code);

        start.method = StartMethod::Launch;
        start.launch = Some(args);
        let ready = start.configuration_done;
        drop(start);

        if ready {
            self.run_if_ready()?;
        }
        Ok(())
    }

    /// The `attach` request. The attach happens at
    /// `configurationDone`.
    ///
    /// # Errors
    ///
    /// [`DebugError::InvalidArgument`] when a session is already
    /// started.
    #[instrument(level = "info", skip(self))]
    pub fn attach(&self, pid: ProcessId) -> Result<()> {
        let mut start = self.start.lock();
        if !start.initialized {
            return Err(DebugError::invalid_argument("initialize first"));
        }
        if start.method != StartMethod::None {
            return Err(DebugError::invalid_argument("session already started"));
        }
        start.method = StartMethod::Attach(pid);
        let ready = start.configuration_done;
        drop(start);

        if ready {
            self.run_if_ready()?;
        }
        Ok(())
    }

    /// The `configurationDone` request: breakpoints are configured, the
    /// debuggee may run.
    ///
    /// # Errors
    ///
    /// Launch or attach failures from the runtime-debug layer.
    #[instrument(level = "debug", skip(self))]
    pub fn configuration_done(&self) -> Result<()> {
        self.start.lock().configuration_done = true;
        self.run_if_ready()
    }

    fn run_if_ready(&self) -> Result<()> {
        let mut start = self.start.lock();
        if !start.configuration_done || start.running {
            return Ok(());
        }

        let sink: Arc<dyn RuntimeCallbackSink> = Arc::clone(&self.router) as _;
        let process = match start.method {
            StartMethod::None => return Ok(()),
            StartMethod::Launch => {
                let args = start
                    .launch
                    .clone()
                    .ok_or_else(|| DebugError::internal("launch arguments missing"))?;
                let spec = LaunchSpec {
                    program: args.program.clone(),
                    args: args.args,
                    env: args.env,
                    cwd: args.cwd,
                };
                let process = self.runtime.launch(&spec, sink)?;
                self.events.emit(DebugEvent::Process {
                    pid: process.id().0,
                    name: args.program,
                });
                process
            }
            StartMethod::Attach(pid) => {
                let process = self.runtime.attach(pid, sink)?;
                self.events.emit(DebugEvent::Process {
                    pid: process.id().0,
                    name: String::new(),
                });
                process
            }
        };
        start.running = true;
        drop(start);

        *self.process.write() = Some(process);

        if !self.attach_gate.wait(ATTACH_WAIT) {
            warn!("create-process callback did not arrive in time");
            return Err(DebugError::Timeout);
        }
        debug!("debuggee running");
        Ok(())
    }

    fn require_process(&self) -> Result<ProcessRef> {
        self.process
            .read()
            .clone()
            .ok_or(DebugError::NotAttached)
    }

    fn require_stopped(&self) -> Result<ProcessRef> {
        let process = self.require_process()?;
        if self.queue.is_running() {
            return Err(DebugError::ProcessRunning);
        }
        Ok(process)
    }

    fn thread(&self, thread_id: ThreadId) -> Result<ThreadRef> {
        self.threads
            .get(thread_id)
            .ok_or_else(|| DebugError::invalid_argument(format!("unknown thread {thread_id}")))
    }

    /// The `continue` request.
    ///
    /// # Errors
    ///
    /// [`DebugError::EvalInProgress`] during an evaluation;
    /// [`DebugError::ProcessRunning`] when no stop is outstanding.
    #[instrument(level = "debug", skip(self))]
    pub fn resume(&self, thread_id: ThreadId) -> Result<()> {
        let process = self.require_process()?;
        if self.evaluator.is_eval_running() {
            return Err(DebugError::EvalInProgress);
        }

        self.queue.resume(&process)?;
        self.threads.invalidate_last_stopped();
        self.events.emit(DebugEvent::Continued {
            thread_id,
            all_threads_continued: true,
        });
        Ok(())
    }

    /// The step family: arm a stepper and resume.
    ///
    /// # Errors
    ///
    /// [`DebugError::EvalInProgress`] during an evaluation;
    /// [`DebugError::ProcessRunning`] while the target runs.
    #[instrument(level = "debug", skip(self))]
    pub fn step(&self, thread_id: ThreadId, kind: StepKind) -> Result<()> {
        let process = self.require_stopped()?;
        if self.evaluator.is_eval_running() {
            return Err(DebugError::EvalInProgress);
        }

        let thread = self.thread(thread_id)?;
        self.steppers.setup_step(&thread, kind)?;
        self.queue.resume(&process)?;
        self.threads.invalidate_last_stopped();
        self.events.emit(DebugEvent::Continued {
            thread_id,
            all_threads_continued: true,
        });
        Ok(())
    }

    /// The `pause` request.
    ///
    /// # Errors
    ///
    /// Stop failures or [`DebugError::Internal`] when no thread can be
    /// reported.
    #[instrument(level = "debug", skip(self))]
    pub fn pause(&self, selection: PauseSelection) -> Result<()> {
        let process = self.require_process()?;
        self.queue.pause(&process, selection)
    }

    /// The `threads` request.
    ///
    /// # Errors
    ///
    /// [`DebugError::NotAttached`] without a process.
    pub fn list_threads(&self) -> Result<Vec<Thread>> {
        let _process = self.require_process()?;
        Ok(self
            .threads
            .list()
            .into_iter()
            .map(|thread| {
                let id = thread.id();
                let name = thread.name();
                Thread {
                    id,
                    name: if name.is_empty() {
                        format!("Thread #{id}")
                    } else {
                        name
                    },
                }
            })
            .collect())
    }

    /// The `stackTrace` request.
    ///
    /// # Errors
    ///
    /// [`DebugError::ProcessRunning`] while the target runs.
    pub fn stack_trace(
        &self,
        thread_id: ThreadId,
        start_frame: u32,
        levels: u32,
    ) -> Result<(Vec<StackFrame>, usize)> {
        let _process = self.require_stopped()?;
        let thread = self.thread(thread_id)?;
        let frames = thread.frames()?;
        let total = frames.len();

        let start = start_frame as usize;
        let count = if levels == 0 {
            total.saturating_sub(start)
        } else {
            levels as usize
        };

        let reported = frames
            .iter()
            .enumerate()
            .skip(start)
            .take(count)
            .map(|(level, frame)| {
                let level = u32::try_from(level).unwrap_or(u32::MAX);
                self.debuginfo
                    .frame_location(frame, frame_id(thread_id, level))
            })
            .collect();
        Ok((reported, total))
    }

    /// The `scopes` request.
    ///
    /// # Errors
    ///
    /// [`DebugError::ProcessRunning`] while the target runs.
    pub fn scopes(&self, frame: u64) -> Result<Vec<Scope>> {
        let _process = self.require_stopped()?;
        let (thread_id, level) = frame_id_parts(frame);
        let thread = self.thread(thread_id)?;
        self.evaluator.scopes(&thread, level)
    }

    /// The `variables` request.
    ///
    /// # Errors
    ///
    /// Stale-reference failures from the evaluator.
    pub fn variables(
        &self,
        reference: u64,
        filter: VariablesFilter,
        start: usize,
        count: usize,
    ) -> Result<Vec<Variable>> {
        let _process = self.require_stopped()?;
        self.evaluator.variables(reference, filter, start, count)
    }

    /// The `evaluate` request.
    ///
    /// # Errors
    ///
    /// Evaluation failures from the evaluator collaborator.
    pub fn evaluate(&self, frame: Option<u64>, expression: &str) -> Result<DebugResponse> {
        let _process = self.require_stopped()?;
        let thread = match frame {
            Some(frame) => {
                let (thread_id, _) = frame_id_parts(frame);
                self.thread(thread_id)?
            }
            None => {
                let last = self
                    .threads
                    .last_stopped()
                    .ok_or(DebugError::NotAttached)?;
                self.thread(last)?
            }
        };
        let level = frame.map_or(netdbg_core::types::FrameLevel(0), |f| frame_id_parts(f).1);
        let result = self.evaluator.evaluate(&thread, level, expression)?;
        Ok(DebugResponse::Evaluate {
            result: result.display,
            type_name: result.type_name,
            variables_reference: result.variables_reference,
        })
    }

    /// The `setVariable` request.
    ///
    /// # Errors
    ///
    /// Assignment failures from the evaluator.
    pub fn set_variable(&self, reference: u64, name: &str, value: &str) -> Result<String> {
        let _process = self.require_stopped()?;
        self.evaluator.set_variable(reference, name, value)
    }

    /// The `setExpression` request.
    ///
    /// # Errors
    ///
    /// Assignment failures from the evaluator.
    pub fn set_expression(
        &self,
        frame: Option<u64>,
        expression: &str,
        value: &str,
    ) -> Result<String> {
        let _process = self.require_stopped()?;
        let (thread_id, level) = frame
            .map(frame_id_parts)
            .ok_or_else(|| DebugError::invalid_argument("setExpression needs a frame"))?;
        let thread = self.thread(thread_id)?;
        self.evaluator
            .set_expression(&thread, level, expression, value)
    }

    /// The `exceptionInfo` request.
    ///
    /// # Errors
    ///
    /// [`DebugError::InvalidArgument`] when the thread carries no
    /// exception.
    pub fn exception_info(&self, thread_id: ThreadId) -> Result<ExceptionInfoBody> {
        let _process = self.require_stopped()?;
        let thread = self.thread(thread_id)?;
        self.breakpoints
            .exception_info(&thread)
            .ok_or_else(|| DebugError::invalid_argument("no exception on thread"))
    }

    /// The `cancel` request: aborts the evaluation in flight; the
    /// session stays at the same stop.
    pub fn cancel(&self) {
        self.evaluator.cancel();
    }

    /// Replace the line breakpoints of one source.
    pub fn set_line_breakpoints(
        &self,
        source: &Source,
        requested: &[SourceBreakpoint],
    ) -> Vec<Breakpoint> {
        let have_process = self.process.read().is_some();
        self.breakpoints
            .set_line_breakpoints(have_process, source, requested)
    }

    /// Replace the function-breakpoint set.
    pub fn set_function_breakpoints(&self, requested: &[FunctionBreakpoint]) -> Vec<Breakpoint> {
        let have_process = self.process.read().is_some();
        self.breakpoints
            .set_function_breakpoints(have_process, requested)
    }

    /// Replace the exception-filter list.
    pub fn set_exception_breakpoints(&self, requested: &[ExceptionFilter]) -> Vec<Breakpoint> {
        self.breakpoints.set_exception_breakpoints(requested)
    }

    /// End the session. The default action terminates launched
    /// debuggees and detaches from attached ones.
    ///
    /// # Errors
    ///
    /// Teardown failures from the runtime; the session is torn down
    /// regardless.
    #[instrument(level = "info", skip(self))]
    pub fn disconnect(&self, action: DisconnectAction) -> Result<()> {
        let process = self.process.write().take();

        if let Some(process) = process {
            let terminate = match action {
                DisconnectAction::Default => {
                    matches!(self.start.lock().method, StartMethod::Launch)
                }
                DisconnectAction::Terminate => true,
                DisconnectAction::Detach => false,
            };

            let _ = process.stop();
            self.breakpoints.delete_all();
            let _ = self.breakpoints.disable_all(&process);
            let _ = self.steppers.disable_all(&process);

            let result = if terminate {
                process.terminate(0)
            } else {
                process.detach()
            };
            if let Err(err) = result {
                warn!(%err, "debuggee teardown failed");
            }
        }

        self.queue.shutdown();
        self.modules.clear();
        self.threads.clear();
        let _ = self.runtime.shutdown();
        self.events.emit(DebugEvent::Terminated);
        Ok(())
    }

    /// Dispatch one semantic request. The protocol adapter calls this
    /// for everything it cannot answer itself.
    ///
    /// # Errors
    ///
    /// The per-request errors documented on the individual methods.
    pub fn handle_request(&self, request: DebugRequest) -> Result<DebugResponse> {
        match request {
            DebugRequest::Initialize { .. } => {
                self.initialize().map(DebugResponse::Capabilities)
            }
            DebugRequest::Launch(args) => self.launch(args).map(|()| DebugResponse::Ack),
            DebugRequest::Attach { pid } => {
                self.attach(ProcessId(pid)).map(|()| DebugResponse::Ack)
            }
            DebugRequest::ConfigurationDone => {
                self.configuration_done().map(|()| DebugResponse::Ack)
            }
            DebugRequest::SetLineBreakpoints {
                source,
                breakpoints,
            } => Ok(DebugResponse::Breakpoints(
                self.set_line_breakpoints(&source, &breakpoints),
            )),
            DebugRequest::SetFunctionBreakpoints { breakpoints } => Ok(
                DebugResponse::Breakpoints(self.set_function_breakpoints(&breakpoints)),
            ),
            DebugRequest::SetExceptionBreakpoints { filters } => Ok(DebugResponse::Breakpoints(
                self.set_exception_breakpoints(&filters),
            )),
            DebugRequest::Threads => self.list_threads().map(DebugResponse::Threads),
            DebugRequest::StackTrace {
                thread_id,
                start_frame,
                levels,
            } => self
                .stack_trace(thread_id, start_frame, levels)
                .map(|(frames, total)| DebugResponse::StackTrace { frames, total }),
            DebugRequest::Scopes { frame_id } => self.scopes(frame_id).map(DebugResponse::Scopes),
            DebugRequest::Variables {
                variables_reference,
                filter,
                start,
                count,
            } => self
                .variables(variables_reference, filter, start, count)
                .map(DebugResponse::Variables),
            DebugRequest::Evaluate {
                frame_id,
                expression,
            } => self.evaluate(frame_id, &expression),
            DebugRequest::SetVariable {
                variables_reference,
                name,
                value,
            } => self
                .set_variable(variables_reference, &name, &value)
                .map(|value| DebugResponse::SetVariable { value }),
            DebugRequest::SetExpression {
                frame_id,
                expression,
                value,
            } => self
                .set_expression(frame_id, &expression, &value)
                .map(|value| DebugResponse::SetVariable { value }),
            DebugRequest::Continue { thread_id } => {
                self.resume(thread_id).map(|()| DebugResponse::Ack)
            }
            DebugRequest::Pause { thread_id } => self
                .pause(PauseSelection::Thread(thread_id))
                .map(|()| DebugResponse::Ack),
            DebugRequest::Next { thread_id } => self
                .step(thread_id, StepKind::Over)
                .map(|()| DebugResponse::Ack),
            DebugRequest::StepIn { thread_id } => self
                .step(thread_id, StepKind::In)
                .map(|()| DebugResponse::Ack),
            DebugRequest::StepOut { thread_id } => self
                .step(thread_id, StepKind::Out)
                .map(|()| DebugResponse::Ack),
            DebugRequest::ExceptionInfo { thread_id } => {
                self.exception_info(thread_id).map(DebugResponse::ExceptionInfo)
            }
            DebugRequest::Disconnect { terminate_debuggee } => {
                let action = match terminate_debuggee {
                    Some(true) => DisconnectAction::Terminate,
                    Some(false) => DisconnectAction::Detach,
                    None => DisconnectAction::Default,
                };
                self.disconnect(action).map(|()| DebugResponse::Ack)
            }
            DebugRequest::Terminate => self
                .disconnect(DisconnectAction::Terminate)
                .map(|()| DebugResponse::Ack),
            DebugRequest::Cancel { .. } => {
                self.cancel();
                Ok(DebugResponse::Ack)
            }
        }
    }
}
