//! Deterministic, pure logic shared by the runner.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod actions;
pub mod classifier;
pub mod pattern;
pub mod schedule;
pub mod status;
pub mod trigger;
pub mod types;
