//! I/O helpers: configuration, files, git and child processes.

pub mod config;
pub mod environment;
pub mod git;
pub mod init;
pub mod process;
pub mod run_log;
pub mod step_runner;
pub mod workflow_store;
