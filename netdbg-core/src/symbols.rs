//! The symbol-reader surface: synchronous queries over a module's debug
//! info (PDB). One reader exists per module that shipped symbols; the
//! module index owns it and drops it with the module record.
//!
//! Hidden sequence points (the compiler's `0xFEEFEE` start-line
//! sentinel) are filtered by implementations; no query defined here
//! ever returns one.

use crate::error::Result;
use crate::types::{IlOffset, IlRange, MethodToken};

/// The start-line sentinel compilers emit for sequence points that must
/// never surface in the debugger.
pub const HIDDEN_SEQUENCE_LINE: u32 = 0x00FE_EFEE;

/// A (method, IL-offset) to (file, line, column) mapping emitted by the
/// compiler for source-level stepping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequencePoint {
    /// IL offset of the point.
    pub offset: IlOffset,
    /// Source document path as recorded in the debug info.
    pub document: String,
    /// First source line covered.
    pub start_line: u32,
    /// First source column covered.
    pub start_column: u32,
    /// Last source line covered.
    pub end_line: u32,
    /// Last source column covered.
    pub end_column: u32,
}

impl SequencePoint {
    /// True for the compiler's hidden sentinel points.
    #[must_use]
    pub fn is_hidden(&self) -> bool {
        self.start_line == HIDDEN_SEQUENCE_LINE
    }
}

/// One await block of an async method: the offset right before the
/// state machine suspends and the first offset of the continuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AwaitInfo {
    /// Last instruction before the state machine yields.
    pub yield_offset: IlOffset,
    /// First instruction of the resumed continuation.
    pub resume_offset: IlOffset,
}

/// Async stepping info of one compiled async method.
#[derive(Debug, Clone, Default)]
pub struct AsyncMethodInfo {
    /// Await blocks in IL order.
    pub awaits: Vec<AwaitInfo>,
    /// IL offset of the last user-code statement, when the debug info
    /// records one. Empty means step promotion must not happen.
    pub last_user_il_offset: Option<IlOffset>,
}

/// An IL range in which a hoisted local of a state machine is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HoistedLocalScope {
    /// First IL offset of the scope.
    pub start_offset: IlOffset,
    /// Length of the scope in bytes.
    pub length: u32,
}

/// A named local variable with its live IL range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedLocal {
    /// Variable name as written in source.
    pub name: String,
    /// First IL offset where the local is live.
    pub il_start: IlOffset,
    /// One past the last IL offset where the local is live.
    pub il_end: IlOffset,
}

/// Synchronous query surface over one module's debug info.
pub trait SymbolReader: Send + Sync {
    /// All user-visible sequence points of a method, in IL order.
    ///
    /// # Errors
    ///
    /// `DebugError::ResolveFailed` when the method has no debug info.
    fn sequence_points(&self, method: MethodToken) -> Result<Vec<SequencePoint>>;

    /// The first user-code IL offset at or after `from`, skipping
    /// compiler-generated prologue points. `None` when no user code
    /// exists at or after `from`.
    ///
    /// # Errors
    ///
    /// `DebugError::ResolveFailed` when the method has no debug info.
    fn next_user_code_offset(&self, method: MethodToken, from: IlOffset) -> Result<Option<IlOffset>>;

    /// The IL range of the source statement containing `ip`, used to
    /// arm range steps.
    ///
    /// # Errors
    ///
    /// `DebugError::ResolveFailed` when `ip` maps to no statement.
    fn step_range(&self, method: MethodToken, ip: IlOffset) -> Result<IlRange>;

    /// Async stepping info for a method. `None` for methods that are
    /// not compiled async state machines.
    ///
    /// # Errors
    ///
    /// `DebugError::ResolveFailed` when the method has no debug info.
    fn async_stepping_info(&self, method: MethodToken) -> Result<Option<AsyncMethodInfo>>;

    /// IL scopes of locals hoisted onto an async or iterator state
    /// machine.
    ///
    /// # Errors
    ///
    /// `DebugError::ResolveFailed` when the method has no debug info.
    fn hoisted_local_scopes(&self, method: MethodToken) -> Result<Vec<HoistedLocalScope>>;

    /// Name and live range of the local at `index` in a method's local
    /// signature, `None` for compiler-generated slots.
    ///
    /// # Errors
    ///
    /// `DebugError::ResolveFailed` when the method has no debug info.
    fn named_local(&self, method: MethodToken, index: u32) -> Result<Option<NamedLocal>>;
}
