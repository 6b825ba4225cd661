//! Record types crossing the protocol-adapter boundary.
//!
//! All fields are named semantically and serialized camelCase; the
//! protocol adapter maps them onto its wire format.

use netdbg_core::types::ThreadId;
use serde::{Deserialize, Serialize};

/// A source file reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    /// Display name of the source.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Full path of the source.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Source {
    /// Build a source reference from a path, deriving the display name
    /// from the final path component.
    #[must_use]
    pub fn from_path(path: impl Into<String>) -> Self {
        let path = path.into();
        let name = path
            .rsplit(['/', '\\'])
            .next()
            .map(std::string::ToString::to_string);
        Self {
            name,
            path: Some(path),
        }
    }
}

/// One requested line breakpoint inside a `setLineBreakpoints` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceBreakpoint {
    /// Requested source line (1-based).
    pub line: u32,
    /// Optional textual condition evaluated on each hit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

/// One requested function breakpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionBreakpoint {
    /// Restrict resolution to the module with this file name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    /// Function name, matched as a right-anchored dotted suffix.
    pub name: String,
    /// Optional parameter-signature filter, for example `(int,string)`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<String>,
    /// Optional textual condition evaluated on each hit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

/// Exception filter category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExceptionBreakMode {
    /// Stop whenever an exception is thrown.
    Throw,
    /// Stop when an exception escapes user code without a user-code
    /// handler.
    UserUnhandled,
}

/// One requested exception breakpoint filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionFilter {
    /// Filter category.
    pub filter: ExceptionBreakMode,
    /// Exception type names the filter is conditioned on; empty means
    /// match everything.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub condition: Vec<String>,
    /// Invert the condition set.
    #[serde(default)]
    pub negate: bool,
}

/// A breakpoint record reported back to the front-end.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Breakpoint {
    /// Session-global breakpoint id, absent when creation failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,
    /// True once at least one runtime site is installed.
    pub verified: bool,
    /// Informational message (condition errors, resolve failures).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Source of a line breakpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    /// Resolved line, which may differ from the requested one after a
    /// sequence-point snap.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    /// Last line of the resolved statement.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_line: Option<u32>,
    /// Function name of a function breakpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub func_name: Option<String>,
}

/// A managed thread, as listed by the `threads` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    /// Runtime thread id.
    pub id: ThreadId,
    /// Display name.
    pub name: String,
}

/// A stack frame reported to the front-end.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackFrame {
    /// Session-unique frame id used by `scopes` and `evaluate`.
    pub id: u64,
    /// Qualified method name.
    pub name: String,
    /// Source of the frame, absent for frames without symbols.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    /// Current source line, 0 when unknown.
    pub line: u32,
    /// Current source column, 0 when unknown.
    pub column: u32,
    /// End line of the current statement.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_line: Option<u32>,
    /// End column of the current statement.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_column: Option<u32>,
    /// Id of the module owning the method.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_id: Option<String>,
}

/// A variable scope of one frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    /// Scope name, for example `Locals`.
    pub name: String,
    /// Reference for fetching the scope's variables.
    pub variables_reference: u64,
    /// Count of named children when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub named_variables: Option<usize>,
    /// Count of indexed children when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indexed_variables: Option<usize>,
    /// True when fetching the scope is expensive.
    pub expensive: bool,
}

/// Child-kind filter for the `variables` request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VariablesFilter {
    /// Only named children.
    Named,
    /// Only indexed children.
    Indexed,
    /// Both kinds.
    #[default]
    Both,
}

/// A variable reported to the front-end.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    /// Variable name.
    pub name: String,
    /// Rendered value.
    pub value: String,
    /// Type name when known.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    /// Non-zero when the variable has children.
    pub variables_reference: u64,
    /// Count of named children when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub named_variables: Option<usize>,
    /// Count of indexed children when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indexed_variables: Option<usize>,
    /// Expression that re-evaluates to this variable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluate_name: Option<String>,
}

/// Exception details, nested for the inner-exception chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionDetails {
    /// Short type name without namespace.
    pub type_name: String,
    /// Fully qualified type name.
    pub full_type_name: String,
    /// The exception's `Message` field.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Reconstructed textual stack trace.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    /// Best-effort source attribution.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// The inner exception, when one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inner_exception: Option<Box<ExceptionDetails>>,
}

/// Body of the `exceptionInfo` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionInfoBody {
    /// Fully qualified type name of the exception.
    pub exception_id: String,
    /// Human-readable one-line description.
    pub description: String,
    /// Which filter category caused the stop.
    pub break_mode: ExceptionBreakMode,
    /// Structured details with the inner-exception chain.
    pub details: ExceptionDetails,
}

/// Whether symbols loaded for a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SymbolStatus {
    /// A symbol reader is attached to the module.
    Loaded,
    /// No debug info was found for the module.
    NotFound,
}

/// A module record carried by `module` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Module {
    /// Stable GUID-derived module id.
    pub id: String,
    /// File name of the module.
    pub name: String,
    /// Full path of the module.
    pub path: String,
    /// Whether symbols loaded.
    pub symbol_status: SymbolStatus,
}

/// Capabilities reported by `initialize`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(clippy::struct_excessive_bools)]
pub struct Capabilities {
    /// Supports the configuration-done handshake.
    pub supports_configuration_done_request: bool,
    /// Supports function breakpoints.
    pub supports_function_breakpoints: bool,
    /// Supports conditional breakpoints.
    pub supports_conditional_breakpoints: bool,
    /// Supports the exception-info request.
    pub supports_exception_info_request: bool,
    /// Supports exception filter conditions.
    pub supports_exception_filter_options: bool,
    /// Supports set-variable.
    pub supports_set_variable: bool,
    /// Supports set-expression.
    pub supports_set_expression: bool,
    /// Supports the terminate request.
    pub supports_terminate_request: bool,
    /// Supports cancelling an in-flight evaluation.
    pub supports_cancel_request: bool,
    /// Supports evaluate for hovers.
    pub supports_evaluate_for_hovers: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            supports_configuration_done_request: true,
            supports_function_breakpoints: true,
            supports_conditional_breakpoints: true,
            supports_exception_info_request: true,
            supports_exception_filter_options: true,
            supports_set_variable: true,
            supports_set_expression: true,
            supports_terminate_request: true,
            supports_cancel_request: true,
            supports_evaluate_for_hovers: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn source_from_path_derives_name() {
        let source = Source::from_path("/work/app/Program.cs");
        assert_eq!(source.name.as_deref(), Some("Program.cs"));
        assert_eq!(source.path.as_deref(), Some("/work/app/Program.cs"));
    }

    #[test]
    fn breakpoint_serializes_camel_case() {
        let bp = Breakpoint {
            id: Some(3),
            verified: true,
            line: Some(10),
            end_line: Some(10),
            source: Some(Source::from_path("Program.cs")),
            ..Breakpoint::default()
        };
        let json = serde_json::to_value(&bp).unwrap();
        assert_eq!(json["id"], 3);
        assert_eq!(json["verified"], true);
        assert_eq!(json["endLine"], 10);
        assert!(json.get("message").is_none());
    }

    #[test]
    fn exception_filter_defaults() {
        let json = r#"{"filter":"userUnhandled"}"#;
        let filter: ExceptionFilter = serde_json::from_str(json).unwrap();
        assert_eq!(filter.filter, ExceptionBreakMode::UserUnhandled);
        assert!(filter.condition.is_empty());
        assert!(!filter.negate);
    }

    #[test]
    fn variable_type_field_name() {
        let var = Variable {
            name: "x".into(),
            value: "42".into(),
            type_name: Some("int".into()),
            ..Variable::default()
        };
        let json = serde_json::to_value(&var).unwrap();
        assert_eq!(json["type"], "int");
    }
}
