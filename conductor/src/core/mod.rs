//! Deterministic, pure logic shared by the orchestration engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod decision;
pub mod routing;
pub mod sandbox;
pub mod session_graph;
pub mod text;
pub mod threads;
pub mod types;
