//! ABOUTME: Error types and handling for netdbg
//! ABOUTME: Provides the DebugError enum and Result type alias

use thiserror::Error;

/// Comprehensive error enum for all debugger operations.
///
/// Library crates return [`Result`]; the CLI binary maps these into
/// `anyhow` at its edge. Resolve failures are the only non-fatal kind:
/// a breakpoint that fails to resolve stays unverified and is retried
/// on every subsequent module load.
#[derive(Debug, Error)]
pub enum DebugError {
    /// Malformed request from the protocol adapter.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// What was wrong with the request.
        message: String,
    },

    /// The operation needs a live debuggee process.
    #[error("no process attached")]
    NotAttached,

    /// Step/continue refused while a managed evaluation is in flight.
    #[error("an evaluation is in progress")]
    EvalInProgress,

    /// The operation needs a running process but the target is stopped.
    #[error("process is stopped")]
    ProcessStopped,

    /// The operation needs a stopped process but the target is running.
    #[error("process is running")]
    ProcessRunning,

    /// Failure reported by the runtime-debug API, carrying its opaque code.
    #[error("runtime-debug error: {code:#010x}")]
    Runtime {
        /// Opaque error code as reported by the runtime.
        code: u32,
    },

    /// The operation needed debug info but the module has no symbols.
    #[error("no symbols loaded for module {module}")]
    SymbolsMissing {
        /// Module display name or path.
        module: String,
    },

    /// A name or line did not match any loaded module. Non-fatal: the
    /// breakpoint remains unverified and resolution is retried later.
    #[error("could not resolve {what}")]
    ResolveFailed {
        /// What failed to resolve (a function name, a file:line pair).
        what: String,
    },

    /// A capability query on a runtime object failed (for example a
    /// native frame asked for its IL instruction pointer).
    #[error("runtime object does not support {capability}")]
    KindMismatch {
        /// The capability that was requested.
        capability: &'static str,
    },

    /// The runtime-debug API was already initialized for this process.
    #[error("debugger already initialized")]
    AlreadyInitialized,

    /// The operation was cancelled by the front-end.
    #[error("operation cancelled")]
    Cancelled,

    /// Imposed only at the protocol edge; the core never times runtime
    /// calls out itself.
    #[error("operation timed out")]
    Timeout,

    /// Catch-all for internal invariant violations.
    #[error("{message}")]
    Internal {
        /// Description of the failure.
        message: String,
    },
}

impl DebugError {
    /// Build an [`DebugError::InvalidArgument`] from anything stringy.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Build a [`DebugError::ResolveFailed`] from anything stringy.
    pub fn resolve_failed(what: impl Into<String>) -> Self {
        Self::ResolveFailed { what: what.into() }
    }

    /// Build an [`DebugError::Internal`] from anything stringy.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// True for the non-fatal resolution failures that leave a
    /// breakpoint unverified instead of failing the request.
    #[must_use]
    pub fn is_resolve_failure(&self) -> bool {
        matches!(
            self,
            Self::ResolveFailed { .. } | Self::SymbolsMissing { .. }
        )
    }
}

/// Convenience Result type alias used across all netdbg crates.
pub type Result<T> = std::result::Result<T, DebugError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_context() {
        let err = DebugError::invalid_argument("line must be positive");
        assert_eq!(err.to_string(), "invalid argument: line must be positive");

        let err = DebugError::Runtime { code: 0x8013_1C08 };
        assert_eq!(err.to_string(), "runtime-debug error: 0x80131c08");
    }

    #[test]
    fn resolve_failures_are_non_fatal() {
        assert!(DebugError::resolve_failed("Foo.Bar").is_resolve_failure());
        assert!(DebugError::SymbolsMissing {
            module: "app.dll".into()
        }
        .is_resolve_failure());
        assert!(!DebugError::NotAttached.is_resolve_failure());
    }
}
