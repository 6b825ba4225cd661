//! ABOUTME: Shared id newtypes and small value types for netdbg
//! ABOUTME: Thread/process ids, module addresses, method tokens, IL offsets

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a managed thread, as reported by the runtime-debug API.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct ThreadId(pub u64);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// OS process id of the debuggee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(pub u32);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Base address of a loaded module. Unique and stable for the module's
/// lifetime; the key of the module index.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct ModuleAddress(pub u64);

impl fmt::Display for ModuleAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Token identifying a method within its declaring module.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct MethodToken(pub u32);

impl fmt::Display for MethodToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Token identifying a type definition within its module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeToken(pub u32);

/// Byte offset into a method's compiled IL body. The unit of all
/// breakpoint placements.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct IlOffset(pub u32);

impl fmt::Display for IlOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IL_{:04x}", self.0)
    }
}

/// Half-open IL offset range `[start, end)` of one source statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IlRange {
    /// First offset of the range.
    pub start: IlOffset,
    /// One past the last offset of the range.
    pub end: IlOffset,
}

impl IlRange {
    /// True when `offset` falls inside the range.
    #[must_use]
    pub fn contains(&self, offset: IlOffset) -> bool {
        offset >= self.start && offset < self.end
    }
}

/// Zero-based stack depth, top frame first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct FrameLevel(pub u32);

/// Step granularity requested by the front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StepKind {
    /// Step into calls.
    In,
    /// Step over calls.
    Over,
    /// Step out of the current method.
    Out,
}

/// Why a step-complete callback fired, as reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepReason {
    /// The step finished inside the same frame.
    Normal,
    /// The step returned to the caller.
    Return,
    /// The step entered a callee.
    Call,
    /// Stopped in an exception filter.
    ExceptionFilter,
    /// Stopped in an exception handler.
    ExceptionHandler,
    /// Stopped in intercepted (non-user) code.
    Intercept,
    /// The thread exited before the step finished.
    Exit,
}

/// Exception lifecycle notifications arriving from the runtime; the
/// debugger never raises these itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionKind {
    /// An exception was thrown; handlers not yet searched.
    FirstChance,
    /// A first-chance notification scoped to user code.
    UserFirstChance,
    /// A catch handler was located for the exception.
    CaughtHandler,
    /// No handler exists; the process is about to die.
    Unhandled,
}

/// How the IDE asked the session to end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisconnectAction {
    /// Attach becomes detach, launch becomes terminate.
    #[default]
    Default,
    /// Always terminate the debuggee.
    Terminate,
    /// Always detach, leaving the debuggee running.
    Detach,
}

/// Thread-selection policy for `pause`. Richer protocols name the thread;
/// minimal ones take the first; mid-tier ones need a frame with a known
/// source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseSelection {
    /// The caller names the thread to report.
    Thread(ThreadId),
    /// Report the process's first thread, no source requirement.
    FirstThread,
    /// Search every thread's stack for a frame with a known source file,
    /// preferring the previously stopped thread.
    SourceFrame,
}

/// Quality of the IP-to-IL mapping a frame reports. `Unmapped` and
/// `NoInfo` positions are unusable for stepping or breakpoint math.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpMapping {
    /// The IP maps exactly to the reported IL offset.
    Exact,
    /// The IP maps approximately (optimized code).
    Approximate,
    /// The IP is in code with no IL mapping.
    Unmapped,
    /// The runtime has no mapping information at all.
    NoInfo,
    /// The IP is inside the method prolog.
    Prolog,
    /// The IP is inside the method epilog.
    Epilog,
}

impl IpMapping {
    /// True when the reported IL offset can be trusted.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Exact | Self::Approximate | Self::Prolog | Self::Epilog)
    }
}
