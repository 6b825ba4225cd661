//! Evaluator collaborator interface.
//!
//! Expression evaluation, variable walks, and property-setter dispatch
//! execute managed code inside the debuggee; the core never does that
//! itself. It talks to the evaluator through these traits: the session
//! controller for protocol pass-throughs, the breakpoint subsystem for
//! conditions, and the async stepper for the builder helpers.
//!
//! While an evaluation runs, incidental runtime callbacks must not turn
//! into stop events; the callback queue consults
//! [`Evaluator::is_eval_running`] and resumes the app-domain instead of
//! enqueuing. An implementation is expected to impose its own watchdog
//! on condition evaluations and surface expiry as
//! [`DebugError::Timeout`](netdbg_core::DebugError::Timeout), which the
//! breakpoint subsystem reports as an informational message, never as a
//! lost stop.

use netdbg_core::error::Result;
use netdbg_core::runtime::{FunctionRef, ThreadRef, ValueRef};
use netdbg_core::types::FrameLevel;
use netdbg_protocol::{Scope, Variable, VariablesFilter};

/// Outcome of one expression evaluation.
pub struct EvalResult {
    /// The typed result value, absent for void results.
    pub value: Option<ValueRef>,
    /// Rendered result text.
    pub display: String,
    /// Type name of the result when known.
    pub type_name: Option<String>,
    /// Reference for expanding the result, 0 for scalar results.
    pub variables_reference: u64,
}

/// The evaluator surface the session core depends on.
pub trait Evaluator: Send + Sync {
    /// True while any thread executes managed code on the core's
    /// behalf.
    fn is_eval_running(&self) -> bool;

    /// Abort the evaluation in flight, if any. The session stays at
    /// the same stop.
    fn cancel(&self);

    /// Evaluate an expression against a frame of a stopped thread.
    ///
    /// # Errors
    ///
    /// Evaluation failures, including the evaluator's own watchdog
    /// timeout.
    fn evaluate(&self, thread: &ThreadRef, frame: FrameLevel, expression: &str)
        -> Result<EvalResult>;

    /// The variable scopes of a frame.
    ///
    /// # Errors
    ///
    /// Fails when the frame cannot be inspected.
    fn scopes(&self, thread: &ThreadRef, frame: FrameLevel) -> Result<Vec<Scope>>;

    /// Expand a variables reference.
    ///
    /// # Errors
    ///
    /// Fails when the reference is stale.
    fn variables(
        &self,
        reference: u64,
        filter: VariablesFilter,
        start: usize,
        count: usize,
    ) -> Result<Vec<Variable>>;

    /// Assign a scoped variable; returns the rendered new value.
    ///
    /// # Errors
    ///
    /// Fails when the variable cannot be written.
    fn set_variable(&self, reference: u64, name: &str, value: &str) -> Result<String>;

    /// Assign through an expression; returns the rendered new value.
    ///
    /// # Errors
    ///
    /// Fails when the expression is not assignable.
    fn set_expression(
        &self,
        thread: &ThreadRef,
        frame: FrameLevel,
        expression: &str,
        value: &str,
    ) -> Result<String>;
}

/// Managed-call helpers the async stepper needs. Each call runs managed
/// code on the given thread and must only be used while that thread is
/// stopped at a callback.
pub trait EvalHelpers: Send + Sync {
    /// Locate a method by assembly file name, declaring type, and
    /// method name.
    ///
    /// # Errors
    ///
    /// `DebugError::ResolveFailed` when no loaded module matches.
    fn find_method(&self, assembly: &str, type_name: &str, method: &str) -> Result<FunctionRef>;

    /// Invoke a function with explicit arguments.
    ///
    /// # Errors
    ///
    /// Evaluation failures from the runtime.
    fn call_function(
        &self,
        thread: &ThreadRef,
        function: &FunctionRef,
        args: &[ValueRef],
    ) -> Result<Option<ValueRef>>;

    /// Invoke an instance method by name on a receiver value.
    ///
    /// # Errors
    ///
    /// `DebugError::ResolveFailed` when the receiver's type has no such
    /// method; evaluation failures otherwise.
    fn call_method(
        &self,
        thread: &ThreadRef,
        receiver: &ValueRef,
        method: &str,
        args: &[ValueRef],
    ) -> Result<Option<ValueRef>>;

    /// Invoke a property getter by name on a receiver value.
    ///
    /// # Errors
    ///
    /// `DebugError::ResolveFailed` when the receiver's type has no such
    /// property; evaluation failures otherwise.
    fn property_getter(&self, thread: &ThreadRef, receiver: &ValueRef, property: &str)
        -> Result<ValueRef>;

    /// Materialize a boolean value in the debuggee.
    ///
    /// # Errors
    ///
    /// Evaluation failures from the runtime.
    fn create_bool(&self, thread: &ThreadRef, value: bool) -> Result<ValueRef>;
}
