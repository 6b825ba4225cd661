//! # NetDbg Kernel
//!
//! The debug-session core of netdbg: the machinery that turns the
//! runtime-debug API's asynchronous callback stream into the coherent
//! stopped/running session a protocol adapter expects.
//!
//! - [`callbacks`]: the callback queue, its single worker, and the
//!   continue/stop arbitration.
//! - [`breakpoints`]: entry, line, function, and exception breakpoints
//!   behind one facade with a session-global id allocator.
//! - [`steppers`]: the simple range stepper and the two-phase async
//!   stepper.
//! - [`modules`] and [`sources`]: the module index and the nested
//!   source index backing line resolution.
//! - [`debuginfo`]: synchronous queries over per-module symbol readers.
//! - [`evaluator`]: the collaborator interface for expression
//!   evaluation and variable walks.
//! - [`session`]: the controller owning all of the above.
//!
//! Concurrency model: runtime callback threads produce into the queue;
//! one worker thread consumes it and is the only thread resuming the
//! target in response to callbacks; the controller thread serves
//! protocol requests. Lock order, outermost first: process handle,
//! modules, source index, breakpoints, callback queue.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod breakpoints;
pub mod callbacks;
pub mod debuginfo;
pub mod evaluator;
pub mod modules;
pub mod session;
pub mod sources;
pub mod steppers;
pub mod threads;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use session::DebugSession;
