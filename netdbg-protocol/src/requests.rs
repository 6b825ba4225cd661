//! Request and response messages accepted by the debug-session core.

use crate::types::{
    Breakpoint, Capabilities, ExceptionFilter, ExceptionInfoBody, FunctionBreakpoint, Scope,
    Source, SourceBreakpoint, StackFrame, Thread, Variable, VariablesFilter,
};
use netdbg_core::types::ThreadId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Arguments of the `launch` request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchArguments {
    /// Program to run.
    pub program: String,
    /// Arguments passed to the debuggee.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Environment for the debuggee.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    /// Working directory for the debuggee.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    /// Stop at the program entry method.
    #[serde(default)]
    pub stop_at_entry: bool,
    /// Enable just-my-code.
    #[serde(default = "default_true")]
    pub just_my_code: bool,
    /// Enable step filtering over properties and operators.
    #[serde(default)]
    pub enable_step_filtering: bool,
}

fn default_true() -> bool {
    true
}

/// Requests the core accepts from the protocol adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "command",
    content = "arguments",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum DebugRequest {
    /// Handshake; returns capabilities.
    Initialize {
        /// Identifier of the connecting adapter.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        adapter_id: Option<String>,
    },
    /// Launch a new debuggee.
    Launch(LaunchArguments),
    /// Attach to a running process.
    Attach {
        /// Target process id.
        pid: u32,
    },
    /// Breakpoint configuration finished; the debuggee may run.
    ConfigurationDone,
    /// Replace all line breakpoints of one source.
    SetLineBreakpoints {
        /// The source file.
        source: Source,
        /// Requested breakpoints.
        breakpoints: Vec<SourceBreakpoint>,
    },
    /// Replace all function breakpoints.
    SetFunctionBreakpoints {
        /// Requested breakpoints.
        breakpoints: Vec<FunctionBreakpoint>,
    },
    /// Replace all exception breakpoints.
    SetExceptionBreakpoints {
        /// Requested filters.
        filters: Vec<ExceptionFilter>,
    },
    /// List managed threads.
    Threads,
    /// Walk a thread's stack.
    StackTrace {
        /// Thread to walk.
        thread_id: ThreadId,
        /// First frame to report.
        #[serde(default)]
        start_frame: u32,
        /// Number of frames to report, 0 for all.
        #[serde(default)]
        levels: u32,
    },
    /// List the scopes of one frame.
    Scopes {
        /// Frame id from a `stackTrace` response.
        frame_id: u64,
    },
    /// List variables behind a reference.
    Variables {
        /// Variables reference from a scope or variable.
        variables_reference: u64,
        /// Child-kind filter.
        #[serde(default)]
        filter: VariablesFilter,
        /// First child to report.
        #[serde(default)]
        start: usize,
        /// Number of children to report, 0 for all.
        #[serde(default)]
        count: usize,
    },
    /// Evaluate an expression.
    Evaluate {
        /// Frame context, absent for global evaluation.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        frame_id: Option<u64>,
        /// Expression text.
        expression: String,
    },
    /// Assign a scoped variable.
    SetVariable {
        /// Variables reference owning the variable.
        variables_reference: u64,
        /// Variable name.
        name: String,
        /// New value text.
        value: String,
    },
    /// Assign through an expression.
    SetExpression {
        /// Frame context, absent for global evaluation.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        frame_id: Option<u64>,
        /// Assignable expression.
        expression: String,
        /// New value text.
        value: String,
    },
    /// Resume the whole process.
    Continue {
        /// Thread the front-end acted on.
        thread_id: ThreadId,
    },
    /// Stop the running process.
    Pause {
        /// Thread the front-end wants reported.
        thread_id: ThreadId,
    },
    /// Step over.
    Next {
        /// Thread to step.
        thread_id: ThreadId,
    },
    /// Step into.
    StepIn {
        /// Thread to step.
        thread_id: ThreadId,
    },
    /// Step out.
    StepOut {
        /// Thread to step.
        thread_id: ThreadId,
    },
    /// Details of the current exception on a thread.
    ExceptionInfo {
        /// Thread stopped on the exception.
        thread_id: ThreadId,
    },
    /// End the session.
    Disconnect {
        /// Force terminating or keeping the debuggee.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        terminate_debuggee: Option<bool>,
    },
    /// Terminate the debuggee.
    Terminate,
    /// Cancel an in-flight request (evaluations).
    Cancel {
        /// Sequence number of the request to cancel.
        request_id: u64,
    },
}

/// Response bodies returned by the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "kind",
    content = "body",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum DebugResponse {
    /// Success with no body.
    Ack,
    /// Capabilities for `initialize`.
    Capabilities(Capabilities),
    /// Breakpoint records for the set-breakpoint family.
    Breakpoints(Vec<Breakpoint>),
    /// Thread list.
    Threads(Vec<Thread>),
    /// Stack frames plus the full frame count.
    StackTrace {
        /// Reported frames.
        frames: Vec<StackFrame>,
        /// Total frames on the thread.
        total: usize,
    },
    /// Scope list.
    Scopes(Vec<Scope>),
    /// Variable list.
    Variables(Vec<Variable>),
    /// Evaluation result.
    Evaluate {
        /// Rendered result value.
        result: String,
        /// Type name when known.
        #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
        type_name: Option<String>,
        /// Reference for expanding the result.
        variables_reference: u64,
    },
    /// New value after an assignment.
    SetVariable {
        /// Rendered new value.
        value: String,
    },
    /// Exception details.
    ExceptionInfo(ExceptionInfoBody),
}
