//! Shared deterministic types for the runner core.
//!
//! These types define stable contracts between the trigger listener, the
//! scheduler and the job runner. They carry no I/O and serialize into the run
//! records under `.cirun/runs/`.

use std::fmt;

use serde::{Deserialize, Serialize};

const HEADS_PREFIX: &str = "refs/heads/";

/// Kind of version-control event that may start a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Push,
    PullRequest,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Push => f.write_str("push"),
            Self::PullRequest => f.write_str("pull_request"),
        }
    }
}

/// Event descriptor handed to the trigger listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    /// Branch name or full ref (`refs/heads/main`). Pull requests may omit it.
    pub git_ref: Option<String>,
}

impl Event {
    pub fn push(git_ref: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Push,
            git_ref: Some(git_ref.into()),
        }
    }

    pub fn pull_request(git_ref: Option<String>) -> Self {
        Self {
            kind: EventKind::PullRequest,
            git_ref,
        }
    }

    pub fn is_pull_request(&self) -> bool {
        self.kind == EventKind::PullRequest
    }

    /// Branch name with any `refs/heads/` prefix removed.
    pub fn branch(&self) -> Option<&str> {
        self.git_ref
            .as_deref()
            .map(|r| r.strip_prefix(HEADS_PREFIX).unwrap_or(r))
    }
}

/// Lifecycle of a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Lifecycle of a single job within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    /// Not executed because a job listed in `needs` did not succeed.
    Skipped,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(label)
    }
}

/// Outcome of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Succeeded,
    Failed,
    /// Not executed because an earlier step in the same job failed.
    Skipped,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(label)
    }
}

/// Classification of a failed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ToolchainAcquisition,
    FormatViolation,
    BuildOrTest,
    WarningAsError,
    Checkout,
    Timeout,
    Spawn,
    Command,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::ToolchainAcquisition => "toolchain acquisition failure",
            Self::FormatViolation => "format violation",
            Self::BuildOrTest => "build or test failure",
            Self::WarningAsError => "warning treated as error",
            Self::Checkout => "checkout failure",
            Self::Timeout => "timed out",
            Self::Spawn => "failed to start",
            Self::Command => "command failed",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_strips_heads_prefix() {
        assert_eq!(Event::push("refs/heads/pr/7").branch(), Some("pr/7"));
        assert_eq!(Event::push("main").branch(), Some("main"));
        assert_eq!(Event::pull_request(None).branch(), None);
    }

    #[test]
    fn statuses_serialize_lowercase() {
        let json = serde_json::to_string(&JobStatus::Skipped).expect("serialize");
        assert_eq!(json, "\"skipped\"");
        let json = serde_json::to_string(&EventKind::PullRequest).expect("serialize");
        assert_eq!(json, "\"pull_request\"");
    }
}
