//! Test support: a scriptable mock runtime, a recording event sink, a
//! mock evaluator, and a session fixture wiring them to a real
//! [`DebugSession`]. Enabled through the `test-utils` feature (always
//! on for this crate's own tests).

mod runtime;

pub use runtime::{
    MethodSpec, MockFrame, MockModule, MockModuleBuilder, MockPrimitiveBreakpoint, MockProcess,
    MockRuntime, MockStepper, MockThread, MockValue, StepOp, TypeSpec,
};

use crate::evaluator::{EvalHelpers, EvalResult, Evaluator};
use crate::session::DebugSession;
use netdbg_config::SessionConfig;
use netdbg_core::error::{DebugError, Result};
use netdbg_core::runtime::{
    AppDomainRef, BreakpointRef, FunctionRef, RuntimeCallbackSink, RuntimeThread, RuntimeValue,
    ThreadRef, ValueRef,
};
use netdbg_core::types::{ExceptionKind, FrameLevel, StepReason, ThreadId};
use netdbg_protocol::{
    DebugEvent, EventSink, LaunchArguments, Scope, StoppedEvent, Variable, VariablesFilter,
};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default wait for asynchronous worker activity in tests.
pub const EVENT_WAIT: Duration = Duration::from_secs(5);

// ── recording sink ───────────────────────────────────────────────────

/// An [`EventSink`] that records every event and lets tests block until
/// one matching a predicate arrives.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<DebugEvent>>,
    cv: Condvar,
}

impl RecordingSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Snapshot of everything recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<DebugEvent> {
        self.events.lock().clone()
    }

    /// Block until an event matching `pred` exists, scanning events
    /// recorded before the call too.
    pub fn wait_for(
        &self,
        timeout: Duration,
        mut pred: impl FnMut(&DebugEvent) -> bool,
    ) -> Option<DebugEvent> {
        let deadline = Instant::now() + timeout;
        let mut events = self.events.lock();
        let mut scanned = 0;
        loop {
            if let Some(event) = events[scanned..].iter().find(|event| pred(event)) {
                return Some(event.clone());
            }
            scanned = events.len();
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            if self.cv.wait_until(&mut events, deadline).timed_out() {
                return events[scanned..].iter().find(|event| pred(event)).cloned();
            }
        }
    }

    /// Block until the `n`-th stopped event (1-based) arrives.
    #[must_use]
    pub fn wait_for_stopped(&self, n: usize) -> Option<StoppedEvent> {
        let mut seen = 0;
        self.wait_for(EVENT_WAIT, |event| {
            if matches!(event, DebugEvent::Stopped(_)) {
                seen += 1;
                seen == n
            } else {
                false
            }
        })
        .and_then(|event| match event {
            DebugEvent::Stopped(stopped) => Some(stopped),
            _ => None,
        })
    }

    /// All stopped events recorded so far.
    #[must_use]
    pub fn stopped_events(&self) -> Vec<StoppedEvent> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                DebugEvent::Stopped(stopped) => Some(stopped.clone()),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: DebugEvent) {
        self.events.lock().push(event);
        self.cv.notify_all();
    }
}

// ── mock evaluator ───────────────────────────────────────────────────

/// A scriptable [`Evaluator`]: expressions must be scripted with a
/// result or an error; everything unscripted fails.
#[derive(Default)]
pub struct MockEvaluator {
    results: Mutex<std::collections::HashMap<String, ValueRef>>,
    errors: Mutex<std::collections::HashMap<String, String>>,
    timeouts: Mutex<std::collections::HashSet<String>>,
    eval_running: AtomicBool,
    cancel_count: AtomicUsize,
}

impl MockEvaluator {
    /// Create an empty evaluator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty evaluator behind an `Arc`.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Script `expression` to evaluate to `value`.
    pub fn script_result(&self, expression: &str, value: ValueRef) {
        self.results.lock().insert(expression.to_string(), value);
    }

    /// Script `expression` to fail with an internal error message.
    pub fn script_error(&self, expression: &str, message: &str) {
        self.errors
            .lock()
            .insert(expression.to_string(), message.to_string());
    }

    /// Script `expression` to time out under the evaluation watchdog.
    pub fn script_timeout(&self, expression: &str) {
        self.timeouts.lock().insert(expression.to_string());
    }

    /// Simulate an evaluation in flight.
    pub fn set_eval_running(&self, running: bool) {
        self.eval_running.store(running, Ordering::SeqCst);
    }

    /// Times `cancel` was called.
    #[must_use]
    pub fn cancel_count(&self) -> usize {
        self.cancel_count.load(Ordering::SeqCst)
    }
}

impl Evaluator for MockEvaluator {
    fn is_eval_running(&self) -> bool {
        self.eval_running.load(Ordering::SeqCst)
    }

    fn cancel(&self) {
        self.cancel_count.fetch_add(1, Ordering::SeqCst);
        self.eval_running.store(false, Ordering::SeqCst);
    }

    fn evaluate(
        &self,
        _thread: &ThreadRef,
        _frame: FrameLevel,
        expression: &str,
    ) -> Result<EvalResult> {
        if self.timeouts.lock().contains(expression) {
            return Err(DebugError::Timeout);
        }
        if let Some(message) = self.errors.lock().get(expression) {
            return Err(DebugError::internal(message.clone()));
        }
        let value = self
            .results
            .lock()
            .get(expression)
            .cloned()
            .ok_or_else(|| DebugError::internal(format!("unscripted expression '{expression}'")))?;
        let display = value
            .as_string()
            .ok()
            .flatten()
            .or_else(|| value.as_bool().ok().flatten().map(|b| b.to_string()))
            .unwrap_or_else(|| "<object>".to_string());
        let type_name = value.type_name().ok();
        Ok(EvalResult {
            value: Some(value),
            display,
            type_name,
            variables_reference: 0,
        })
    }

    fn scopes(&self, _thread: &ThreadRef, _frame: FrameLevel) -> Result<Vec<Scope>> {
        Ok(vec![Scope {
            name: "Locals".to_string(),
            variables_reference: 1,
            named_variables: None,
            indexed_variables: None,
            expensive: false,
        }])
    }

    fn variables(
        &self,
        _reference: u64,
        _filter: VariablesFilter,
        _start: usize,
        _count: usize,
    ) -> Result<Vec<Variable>> {
        Ok(Vec::new())
    }

    fn set_variable(&self, _reference: u64, _name: &str, value: &str) -> Result<String> {
        Ok(value.to_string())
    }

    fn set_expression(
        &self,
        _thread: &ThreadRef,
        _frame: FrameLevel,
        _expression: &str,
        value: &str,
    ) -> Result<String> {
        Ok(value.to_string())
    }
}

// ── mock eval helpers ────────────────────────────────────────────────

/// Scriptable [`EvalHelpers`] for the async stepper: method lookups,
/// per-thread state-machine identities, and a log of managed calls.
#[derive(Default)]
pub struct MockEvalHelpers {
    methods: Mutex<std::collections::HashMap<(String, String, String), FunctionRef>>,
    object_ids: Mutex<std::collections::HashMap<ThreadId, ValueRef>>,
    calls: Mutex<Vec<String>>,
}

impl MockEvalHelpers {
    /// Create empty helpers behind an `Arc`.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a method for [`EvalHelpers::find_method`].
    pub fn register_method(
        &self,
        assembly: &str,
        type_name: &str,
        method: &str,
        function: FunctionRef,
    ) {
        self.methods.lock().insert(
            (
                assembly.to_string(),
                type_name.to_string(),
                method.to_string(),
            ),
            function,
        );
    }

    /// Script which state-machine identity `ObjectIdForDebugger`
    /// reports on a thread.
    pub fn set_object_id(&self, thread: ThreadId, value: ValueRef) {
        self.object_ids.lock().insert(thread, value);
    }

    /// Managed calls observed, as `Type.Method`-ish strings.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

impl EvalHelpers for MockEvalHelpers {
    fn find_method(&self, assembly: &str, type_name: &str, method: &str) -> Result<FunctionRef> {
        self.methods
            .lock()
            .get(&(
                assembly.to_string(),
                type_name.to_string(),
                method.to_string(),
            ))
            .cloned()
            .ok_or_else(|| DebugError::resolve_failed(format!("{type_name}.{method}")))
    }

    fn call_function(
        &self,
        _thread: &ThreadRef,
        _function: &FunctionRef,
        _args: &[ValueRef],
    ) -> Result<Option<ValueRef>> {
        self.calls.lock().push("<function>".to_string());
        Ok(None)
    }

    fn call_method(
        &self,
        _thread: &ThreadRef,
        receiver: &ValueRef,
        method: &str,
        _args: &[ValueRef],
    ) -> Result<Option<ValueRef>> {
        let receiver_type = receiver.type_name().unwrap_or_default();
        self.calls.lock().push(format!("{receiver_type}.{method}"));
        Ok(None)
    }

    fn property_getter(
        &self,
        thread: &ThreadRef,
        _receiver: &ValueRef,
        property: &str,
    ) -> Result<ValueRef> {
        if property == "ObjectIdForDebugger" {
            return self
                .object_ids
                .lock()
                .get(&thread.id())
                .cloned()
                .ok_or_else(|| DebugError::resolve_failed("ObjectIdForDebugger"));
        }
        Err(DebugError::resolve_failed(format!("property {property}")))
    }

    fn create_bool(&self, _thread: &ThreadRef, value: bool) -> Result<ValueRef> {
        Ok(MockValue::bool_value(value))
    }
}

// ── session fixture ──────────────────────────────────────────────────

/// A fully wired session over the mock runtime.
pub struct SessionFixture {
    /// The scripted debuggee process.
    pub process: Arc<MockProcess>,
    /// The scripted runtime.
    pub runtime: Arc<MockRuntime>,
    /// The scriptable evaluator.
    pub evaluator: Arc<MockEvaluator>,
    /// The scriptable eval helpers.
    pub helpers: Arc<MockEvalHelpers>,
    /// The recording event sink.
    pub events: Arc<RecordingSink>,
    /// The session under test.
    pub session: Arc<DebugSession>,
}

impl SessionFixture {
    /// Build a session with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(&SessionConfig::default())
    }

    /// Build a session with the given configuration.
    #[must_use]
    pub fn with_config(config: &SessionConfig) -> Self {
        let process = MockProcess::new(4242);
        let runtime = MockRuntime::new(Arc::clone(&process));
        let evaluator = MockEvaluator::shared();
        let helpers = MockEvalHelpers::shared();
        let events = RecordingSink::new();

        let session = DebugSession::new(
            Arc::clone(&runtime) as _,
            Arc::clone(&evaluator) as _,
            Arc::clone(&helpers) as _,
            Arc::clone(&events) as _,
            config,
            None,
        );

        Self {
            process,
            runtime,
            evaluator,
            helpers,
            events,
            session,
        }
    }

    /// Initialize, launch `app.dll`, and finish configuration.
    ///
    /// # Panics
    ///
    /// Panics when any lifecycle step fails.
    pub fn start(&self, args: LaunchArguments) {
        self.session.initialize().expect("initialize");
        self.session.launch(args).expect("launch");
        self.session
            .configuration_done()
            .expect("configuration done");
    }

    /// Default launch arguments for `app.dll`.
    #[must_use]
    pub fn launch_args() -> LaunchArguments {
        LaunchArguments {
            program: "app.dll".to_string(),
            ..LaunchArguments::default()
        }
    }

    /// The callback sink registered by the session.
    #[must_use]
    pub fn sink(&self) -> Arc<dyn RuntimeCallbackSink> {
        self.runtime.sink()
    }

    /// The process's app-domain.
    #[must_use]
    pub fn domain(&self) -> AppDomainRef {
        self.process.domain()
    }

    /// Fire a module-load callback and register the module with the
    /// process.
    pub fn load_module(&self, module: &Arc<MockModule>) {
        self.process.add_module(module);
        self.sink()
            .on_module_load(self.domain(), Arc::clone(module) as _);
    }

    /// Fire a thread-create callback.
    pub fn start_thread(&self, thread: &Arc<MockThread>) {
        self.process.add_thread(thread);
        self.sink()
            .on_thread_created(self.domain(), Arc::clone(thread) as _);
    }

    /// Fire a breakpoint-hit callback.
    pub fn hit_breakpoint(&self, thread: &Arc<MockThread>, primitive: &BreakpointRef) {
        self.sink().on_breakpoint(
            self.domain(),
            Arc::clone(thread) as _,
            Arc::clone(primitive),
        );
    }

    /// Fire a step-complete callback.
    pub fn complete_step(&self, thread: &Arc<MockThread>) {
        self.sink()
            .on_step_complete(self.domain(), Arc::clone(thread) as _, StepReason::Normal);
    }

    /// Fire an exception callback.
    pub fn raise_exception(
        &self,
        thread: &Arc<MockThread>,
        kind: ExceptionKind,
        module_name: &str,
    ) {
        self.sink().on_exception(
            self.domain(),
            Arc::clone(thread) as _,
            kind,
            module_name.to_string(),
        );
    }
}

impl Default for SessionFixture {
    fn default() -> Self {
        Self::new()
    }
}
