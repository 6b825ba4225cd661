//! Events the core emits toward the protocol adapter, and the sink
//! contract it emits them through.

use crate::types::{Breakpoint, Capabilities, Module, Source, StackFrame};
use netdbg_core::types::ThreadId;
use serde::{Deserialize, Serialize};

/// Why the target stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StopReason {
    /// A step completed.
    Step,
    /// A breakpoint was hit.
    Breakpoint,
    /// An exception matched an exception filter.
    Exception,
    /// A pause request or debugger-break primitive.
    Pause,
    /// The entry breakpoint was hit.
    Entry,
}

/// Body of the `stopped` event. Exactly one of these is outstanding to
/// the IDE at any time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoppedEvent {
    /// Why the target stopped.
    pub reason: StopReason,
    /// The thread the stop is attributed to.
    pub thread_id: ThreadId,
    /// The core always stops the whole process.
    pub all_threads_stopped: bool,
    /// Snapshot of the stopping thread's top frame when available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame: Option<StackFrame>,
    /// Ids of the breakpoints that claimed the hit.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hit_breakpoint_ids: Vec<u32>,
    /// Additional description (exception text).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl StoppedEvent {
    /// Build a minimal stopped event for `reason` on `thread_id`.
    #[must_use]
    pub fn new(reason: StopReason, thread_id: ThreadId) -> Self {
        Self {
            reason,
            thread_id,
            all_threads_stopped: true,
            frame: None,
            hit_breakpoint_ids: Vec::new(),
            description: None,
        }
    }
}

/// Reason of a `thread` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ThreadEventReason {
    /// The thread started.
    Started,
    /// The thread exited.
    Exited,
}

/// Reason of a `module` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ModuleEventReason {
    /// The module loaded.
    New,
    /// The module record changed.
    Changed,
    /// The module unloaded.
    Removed,
}

/// Reason of a `breakpoint` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BreakpointEventReason {
    /// A breakpoint came into existence outside a set request.
    New,
    /// A breakpoint's state changed (verified, message).
    Changed,
    /// A breakpoint disappeared.
    Removed,
}

/// Output stream categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OutputCategory {
    /// Debugger console messages.
    Console,
    /// Debuggee standard output.
    Stdout,
    /// Debuggee standard error.
    Stderr,
}

/// Events the core emits to the protocol adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "body",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum DebugEvent {
    /// The session is ready for breakpoint configuration.
    Initialized,
    /// The capability set changed (emitted once after `initialize`).
    Capabilities(Capabilities),
    /// The debuggee process exists.
    Process {
        /// Debuggee process id.
        pid: u32,
        /// Program name the process was started from.
        name: String,
    },
    /// The target stopped; totally ordered, never overlapping.
    Stopped(StoppedEvent),
    /// The target resumed.
    Continued {
        /// Thread the resume is attributed to.
        thread_id: ThreadId,
        /// The core always resumes the whole process.
        all_threads_continued: bool,
    },
    /// A managed thread started or exited.
    Thread {
        /// What happened.
        reason: ThreadEventReason,
        /// The thread.
        thread_id: ThreadId,
    },
    /// A module loaded, changed, or unloaded.
    Module {
        /// What happened.
        reason: ModuleEventReason,
        /// The module record.
        module: Module,
    },
    /// A breakpoint's reported state changed.
    Breakpoint {
        /// What happened.
        reason: BreakpointEventReason,
        /// The breakpoint record.
        breakpoint: Breakpoint,
    },
    /// Console or debuggee output.
    Output {
        /// Stream category.
        category: OutputCategory,
        /// Text, newline included when meaningful.
        output: String,
        /// Source attribution when known.
        #[serde(skip_serializing_if = "Option::is_none")]
        source: Option<Source>,
    },
    /// The debuggee exited.
    Exited {
        /// Debuggee exit code.
        exit_code: i32,
    },
    /// The session ended.
    Terminated,
}

/// The contract the core emits events through. Implemented by the
/// protocol adapter; implemented by a recording sink in tests.
pub trait EventSink: Send + Sync {
    /// Deliver one event to the front-end. Must not block on debugger
    /// state; the callback worker calls this while holding the queue
    /// lock.
    fn emit(&self, event: DebugEvent);
}
