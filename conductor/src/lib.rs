//! Multi-agent orchestration engine.
//!
//! One user message is routed to an entry agent. Agents that can delegate run
//! a bounded planner loop: each step the planner picks one action (delegate,
//! read or write a workspace file, install a skill, respond or finish) until it
//! finishes or a safety limit is hit. Every run leaves a JSON trace behind.
//!
//! - **[`core`]**: Pure, deterministic logic (routing, decision parsing, task
//!   threads, sandboxing). No I/O, fully testable in isolation.
//! - **[`io`]**: Ports and their filesystem/process adapters.
//!
//! [`orchestrate`] drives the planner loop; [`run`] is the public entry point.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod orchestrate;
pub mod run;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
