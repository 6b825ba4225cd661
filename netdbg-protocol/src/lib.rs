//! # NetDbg Protocol
//!
//! Semantic request, response, and event types exchanged between the
//! debug-session core and a protocol adapter, plus the [`EventSink`]
//! contract the core emits through. Wire framing is the adapter's
//! concern; everything here serializes to plain camelCase JSON.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod events;
pub mod message;
pub mod requests;
pub mod types;

pub use events::{
    BreakpointEventReason, DebugEvent, EventSink, ModuleEventReason, OutputCategory, StopReason,
    StoppedEvent, ThreadEventReason,
};
pub use message::{MessageType, ProtocolMessage};
pub use requests::{DebugRequest, DebugResponse, LaunchArguments};
pub use types::{
    Breakpoint, Capabilities, ExceptionBreakMode, ExceptionDetails, ExceptionFilter,
    ExceptionInfoBody, FunctionBreakpoint, Module, Scope, Source, SourceBreakpoint, StackFrame,
    SymbolStatus, Thread, Variable, VariablesFilter,
};
