//! Exception breakpoints: the filter list, per-thread exception
//! lifecycle tracking, and exception-info synthesis.

use crate::debuginfo::DebugInfoBridge;
use netdbg_core::runtime::{RuntimeThread, RuntimeValue, ThreadRef, ValueRef};
use netdbg_core::types::{ExceptionKind, ThreadId};
use netdbg_protocol::{
    Breakpoint, ExceptionBreakMode, ExceptionDetails, ExceptionFilter, ExceptionInfoBody,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{debug, trace};

/// Upper bound on the inner-exception chain walk; a cyclic chain in a
/// corrupted heap must not hang the debugger.
const MAX_INNER_DEPTH: usize = 16;

/// One configured filter with its session-global breakpoint id.
struct FilterEntry {
    id: u32,
    filter: ExceptionFilter,
}

/// Per-thread exception lifecycle, driven by the runtime's exception
/// callbacks.
#[derive(Default)]
struct ThreadExceptionState {
    /// The exception crossed user code since it was thrown.
    passed_user_code: bool,
    /// Break mode of the filter that produced the last stop.
    stop_mode: Option<ExceptionBreakMode>,
}

#[derive(Default)]
struct ExceptionInner {
    filters: Vec<FilterEntry>,
    threads: HashMap<ThreadId, ThreadExceptionState>,
}

/// Details of an exception stop handed to the callback worker.
pub struct ExceptionStop {
    /// One-line description for the stop event.
    pub description: String,
    /// Id of the filter that matched.
    pub filter_id: u32,
}

/// The exception-breakpoint subsystem.
#[derive(Default)]
pub struct ExceptionBreakpoints {
    inner: Mutex<ExceptionInner>,
}

fn short_type_name(full: &str) -> &str {
    full.rsplit('.').next().unwrap_or(full)
}

/// Condition-set matching: (type-name in set) XOR negation, or an empty
/// set matches everything.
fn condition_matches(filter: &ExceptionFilter, type_name: &str) -> bool {
    if filter.condition.is_empty() {
        return true;
    }
    let contained = filter
        .condition
        .iter()
        .any(|candidate| candidate == type_name);
    contained != filter.negate
}

impl ExceptionBreakpoints {
    /// Create the subsystem with no filters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the filter list. An empty list silences all exception
    /// stops.
    pub fn set_breakpoints(
        &self,
        requested: &[ExceptionFilter],
        alloc_id: &mut dyn FnMut() -> u32,
    ) -> Vec<Breakpoint> {
        let mut inner = self.inner.lock();
        inner.filters.clear();

        let mut records = Vec::with_capacity(requested.len());
        for filter in requested {
            let id = alloc_id();
            records.push(Breakpoint {
                id: Some(id),
                verified: true,
                ..Breakpoint::default()
            });
            inner.filters.push(FilterEntry {
                id,
                filter: filter.clone(),
            });
        }
        debug!(filters = inner.filters.len(), "exception filters replaced");
        records
    }

    /// Feed one exception callback through the filters. `Some` means a
    /// stop event must be emitted.
    #[must_use]
    pub fn on_exception(
        &self,
        thread: &ThreadRef,
        kind: ExceptionKind,
        module_name: &str,
    ) -> Option<ExceptionStop> {
        let type_name = thread
            .current_exception()
            .and_then(|value| value.type_name().ok())
            .unwrap_or_else(|| "unknown".to_string());

        let mut inner = self.inner.lock();
        let state = inner.threads.entry(thread.id()).or_default();
        match kind {
            ExceptionKind::FirstChance => {}
            ExceptionKind::UserFirstChance => state.passed_user_code = true,
            // A located catch handler ends the current flight.
            ExceptionKind::CaughtHandler => state.passed_user_code = false,
            ExceptionKind::Unhandled => {}
        }
        let passed_user_code = state.passed_user_code;

        // Multiple filters of the same category apply in order; the
        // first to match wins.
        let mut matched: Option<(u32, ExceptionBreakMode)> = None;
        for entry in &inner.filters {
            let category_matches = match entry.filter.filter {
                ExceptionBreakMode::Throw => matches!(
                    kind,
                    ExceptionKind::FirstChance | ExceptionKind::UserFirstChance
                ),
                ExceptionBreakMode::UserUnhandled => {
                    kind == ExceptionKind::Unhandled && passed_user_code
                }
            };
            if category_matches && condition_matches(&entry.filter, &type_name) {
                matched = Some((entry.id, entry.filter.filter));
                break;
            }
        }

        let (filter_id, mode) = matched?;
        trace!(%type_name, ?kind, filter = filter_id, module = module_name,
               "exception filter matched");
        let state = inner.threads.entry(thread.id()).or_default();
        state.stop_mode = Some(mode);
        Some(ExceptionStop {
            description: format!("Exception thrown: '{type_name}' in {module_name}"),
            filter_id,
        })
    }

    /// Drop lifecycle state when a thread exits.
    pub fn on_thread_exit(&self, id: ThreadId) {
        self.inner.lock().threads.remove(&id);
    }

    /// Drop every filter (session teardown).
    pub fn delete_all(&self) {
        let mut inner = self.inner.lock();
        inner.filters.clear();
        inner.threads.clear();
    }

    /// Assemble the `exceptionInfo` response for a thread stopped on an
    /// exception.
    #[must_use]
    pub fn exception_info(
        &self,
        thread: &ThreadRef,
        debuginfo: &DebugInfoBridge,
    ) -> Option<ExceptionInfoBody> {
        let exception = thread.current_exception()?;
        let details = Self::details_for(&exception, 0)?;
        let stack_trace = Self::render_stack_trace(thread, debuginfo);

        let break_mode = {
            let inner = self.inner.lock();
            inner
                .threads
                .get(&thread.id())
                .and_then(|state| state.stop_mode)
                .unwrap_or(ExceptionBreakMode::Throw)
        };

        let full_type_name = details.full_type_name.clone();
        let description = match &details.message {
            Some(message) => format!("{full_type_name}: {message}"),
            None => full_type_name.clone(),
        };

        Some(ExceptionInfoBody {
            exception_id: full_type_name,
            description,
            break_mode,
            details: ExceptionDetails {
                stack_trace,
                ..details
            },
        })
    }

    /// Walk one managed exception value into protocol details,
    /// recursing over the `InnerException` field.
    fn details_for(value: &ValueRef, depth: usize) -> Option<ExceptionDetails> {
        if depth >= MAX_INNER_DEPTH || value.is_null() {
            return None;
        }

        let full_type_name = value.type_name().ok()?;
        let message = value
            .field("Message")
            .ok()
            .flatten()
            .and_then(|message| message.as_string().ok().flatten());
        let source = value
            .field("Source")
            .ok()
            .flatten()
            .and_then(|source| source.as_string().ok().flatten());
        let inner_exception = value
            .field("InnerException")
            .ok()
            .flatten()
            .filter(|inner| !inner.is_null())
            .and_then(|inner| Self::details_for(&inner, depth + 1))
            .map(Box::new);

        Some(ExceptionDetails {
            type_name: short_type_name(&full_type_name).to_string(),
            full_type_name,
            message,
            stack_trace: None,
            source,
            inner_exception,
        })
    }

    /// Reconstruct a textual stack trace from the thread's managed
    /// frames.
    fn render_stack_trace(thread: &ThreadRef, debuginfo: &DebugInfoBridge) -> Option<String> {
        let frames = thread.frames().ok()?;
        if frames.is_empty() {
            return None;
        }

        let mut text = String::new();
        for frame in &frames {
            let location = debuginfo.frame_location(frame, 0);
            text.push_str("   at ");
            text.push_str(&location.name);
            if let Some(source) = location.source.as_ref().and_then(|s| s.path.clone()) {
                text.push_str(&format!(" in {source}:line {}", location.line));
            }
            text.push('\n');
        }
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn filter(
        mode: ExceptionBreakMode,
        condition: &[&str],
        negate: bool,
    ) -> ExceptionFilter {
        ExceptionFilter {
            filter: mode,
            condition: condition.iter().map(ToString::to_string).collect(),
            negate,
        }
    }

    #[test]
    fn empty_condition_set_matches_all() {
        let f = filter(ExceptionBreakMode::Throw, &[], false);
        assert!(condition_matches(&f, "System.Exception"));
        assert!(condition_matches(&f, "Anything"));
    }

    #[test]
    fn condition_set_xor_negation() {
        let listed = filter(
            ExceptionBreakMode::Throw,
            &["System.InvalidOperationException"],
            false,
        );
        assert!(condition_matches(&listed, "System.InvalidOperationException"));
        assert!(!condition_matches(&listed, "System.Exception"));

        let negated = filter(
            ExceptionBreakMode::Throw,
            &["System.InvalidOperationException"],
            true,
        );
        assert!(!condition_matches(&negated, "System.InvalidOperationException"));
        assert!(condition_matches(&negated, "System.Exception"));
    }

    #[test]
    fn short_names() {
        assert_eq!(short_type_name("System.InvalidOperationException"),
                   "InvalidOperationException");
        assert_eq!(short_type_name("Flat"), "Flat");
    }
}
