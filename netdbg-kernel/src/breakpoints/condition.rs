//! Shared condition-evaluation contract for line and function
//! breakpoints.
//!
//! A condition is a textual expression evaluated against the stopping
//! thread's top frame. A successful boolean result gates the
//! breakpoint. Anything else fires the breakpoint and attaches an
//! informational message, surfaced as a `breakpoint(changed)` event so
//! the IDE can show it.

use crate::evaluator::Evaluator;
use netdbg_core::runtime::{RuntimeValue, ThreadRef};
use netdbg_core::types::FrameLevel;
use tracing::debug;

/// What a condition check decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionVerdict {
    /// No condition, or the condition evaluated to true.
    Fire,
    /// The condition evaluated to false.
    Skip,
    /// Evaluation failed or produced a non-boolean; the breakpoint
    /// fires and the message is surfaced to the IDE.
    FireWithMessage(String),
}

/// Evaluate an optional condition against the top frame of `thread`.
pub fn check_condition(
    evaluator: &dyn Evaluator,
    thread: &ThreadRef,
    condition: Option<&str>,
) -> ConditionVerdict {
    let Some(condition) = condition.filter(|c| !c.trim().is_empty()) else {
        return ConditionVerdict::Fire;
    };

    match evaluator.evaluate(thread, FrameLevel(0), condition) {
        Ok(result) => match result.value.as_ref().and_then(|v| v.as_bool().ok().flatten()) {
            Some(true) => ConditionVerdict::Fire,
            Some(false) => ConditionVerdict::Skip,
            None => ConditionVerdict::FireWithMessage(format!(
                "The condition '{condition}' did not evaluate to a boolean; \
                 the breakpoint fires unconditionally."
            )),
        },
        Err(err) => {
            debug!(%condition, %err, "breakpoint condition failed to execute");
            ConditionVerdict::FireWithMessage(format!(
                "The condition for a breakpoint failed to execute. The condition was \
                 '{condition}'. The error returned was '{err}'."
            ))
        }
    }
}
