//! Run status state machine and aggregation.

use anyhow::{Result, anyhow};

use crate::core::types::{JobStatus, RunStatus};

/// Advance a run: `Pending -> Running -> {Succeeded | Failed}`.
pub fn transition(from: RunStatus, to: RunStatus) -> Result<RunStatus> {
    let legal = matches!(
        (from, to),
        (RunStatus::Pending, RunStatus::Running)
            | (RunStatus::Running, RunStatus::Succeeded)
            | (RunStatus::Running, RunStatus::Failed)
    );
    if !legal {
        return Err(anyhow!("illegal run transition {from:?} -> {to:?}"));
    }
    Ok(to)
}

/// Logical AND over job results. Skipped and unfinished jobs count as failures.
pub fn aggregate<I>(jobs: I) -> RunStatus
where
    I: IntoIterator<Item = JobStatus>,
{
    if jobs.into_iter().all(|status| status == JobStatus::Succeeded) {
        RunStatus::Succeeded
    } else {
        RunStatus::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_forward_transitions_are_legal() {
        assert_eq!(
            transition(RunStatus::Pending, RunStatus::Running).expect("start"),
            RunStatus::Running
        );
        assert!(transition(RunStatus::Running, RunStatus::Failed).is_ok());
        assert!(transition(RunStatus::Pending, RunStatus::Succeeded).is_err());
        assert!(transition(RunStatus::Succeeded, RunStatus::Running).is_err());
        assert!(transition(RunStatus::Failed, RunStatus::Succeeded).is_err());
    }

    #[test]
    fn aggregate_is_logical_and() {
        assert_eq!(
            aggregate([JobStatus::Succeeded, JobStatus::Succeeded]),
            RunStatus::Succeeded
        );
        assert_eq!(
            aggregate([JobStatus::Succeeded, JobStatus::Failed]),
            RunStatus::Failed
        );
        assert_eq!(
            aggregate([JobStatus::Succeeded, JobStatus::Skipped]),
            RunStatus::Failed
        );
    }
}
