//! Event-triggered CI workflow runner.
//!
//! A workflow (`.cirun/workflow.toml`) declares triggers, process-wide
//! environment variables and jobs made of steps. Given a version-control
//! event, cirun decides whether a run starts, executes every job in its own
//! ephemeral environment and aggregates a pass/fail status.
//!
//! - **[`core`]**: Pure, deterministic logic (trigger matching, scheduling,
//!   status transitions, failure classification). No I/O.
//! - **[`io`]**: Side-effecting operations (filesystem, git, process execution,
//!   run records). Isolated behind traits where tests need to substitute them.
//!
//! Orchestration modules ([`run`], [`job`], [`validate`]) coordinate core logic
//! with I/O to implement CLI commands.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod job;
pub mod logging;
pub mod run;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod validate;
pub mod workflow;
