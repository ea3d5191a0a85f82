//! Step execution backends.
//!
//! The [`StepRunner`] trait decouples job orchestration from how a step is
//! actually executed. [`HostStepRunner`] spawns real processes; tests use
//! scripted runners that return predetermined results.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::actions::StepAction;
use crate::io::git::Git;
use crate::io::process::{ProcessLimits, ProcessOutput, run_process};

/// Parameters for executing one step.
#[derive(Debug, Clone)]
pub struct StepRequest<'a> {
    pub job: &'a str,
    /// Zero-based position of the step within its job.
    pub index: usize,
    pub name: &'a str,
    pub action: &'a StepAction,
    /// Working directory (the job's ephemeral workspace).
    pub workspace: &'a Path,
    /// Repository the checkout action clones from.
    pub source: &'a Path,
    pub vars: &'a BTreeMap<String, String>,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
    /// File receiving the step's combined output.
    pub log_path: &'a Path,
}

/// Result of a step that was started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepExecution {
    /// Exit code; `None` when killed by a signal (including timeouts).
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    /// Bounded captured output used for failure classification.
    pub output: String,
    pub duration: Duration,
}

impl StepExecution {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    fn from_process(output: &ProcessOutput) -> Self {
        Self {
            exit_code: output.status.code(),
            timed_out: output.timed_out,
            output: output.combined_text(),
            duration: output.duration,
        }
    }
}

/// Abstraction over step execution backends.
///
/// Jobs run on separate threads, so runners must be shareable.
pub trait StepRunner: Sync {
    /// Execute a step. `Err` means the step could not be started at all.
    fn run(&self, request: &StepRequest<'_>) -> Result<StepExecution>;
}

/// Runs steps as child processes on the host.
#[derive(Debug, Clone)]
pub struct HostStepRunner {
    shell: Vec<String>,
}

impl HostStepRunner {
    pub fn new(shell: Vec<String>) -> Result<Self> {
        if shell.is_empty() {
            return Err(anyhow!("shell must be a non-empty array"));
        }
        Ok(Self { shell })
    }

    fn command(&self, request: &StepRequest<'_>) -> Command {
        let mut cmd = match request.action {
            StepAction::Checkout { git_ref } => {
                Git::clone_command(request.source, request.workspace, git_ref.as_deref())
            }
            StepAction::Script { script } => {
                let mut cmd = Command::new(&self.shell[0]);
                cmd.args(&self.shell[1..]).arg(script);
                cmd
            }
        };
        cmd.current_dir(request.workspace).envs(request.vars);
        cmd
    }
}

impl StepRunner for HostStepRunner {
    #[instrument(skip_all, fields(job = request.job, step = request.index, name = request.name))]
    fn run(&self, request: &StepRequest<'_>) -> Result<StepExecution> {
        info!("starting step");
        let output = run_process(
            self.command(request),
            ProcessLimits {
                timeout: request.timeout,
                output_limit_bytes: request.output_limit_bytes,
            },
            Some(request.log_path),
        )
        .with_context(|| format!("run step '{}' of job {}", request.name, request.job))?;

        let execution = StepExecution::from_process(&output);
        if execution.success() {
            debug!(duration_ms = execution.duration.as_millis() as u64, "step succeeded");
        } else {
            warn!(exit_code = ?execution.exit_code, timed_out = execution.timed_out, "step failed");
        }
        Ok(execution)
    }
}
