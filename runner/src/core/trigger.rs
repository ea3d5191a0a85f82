//! Trigger matching: decides whether an event starts a run.

use anyhow::Result;
use serde::Serialize;

use crate::core::pattern::BranchPattern;
use crate::core::types::Event;
use crate::workflow::{BranchFilter, Workflow};

/// Result of evaluating an event against the workflow triggers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "lowercase")]
pub enum TriggerDecision {
    /// Start a run with these jobs (all jobs of the workflow).
    Run { jobs: Vec<String> },
    /// No run; not an error.
    Skip { reason: String },
}

impl TriggerDecision {
    pub fn should_run(&self) -> bool {
        matches!(self, Self::Run { .. })
    }
}

/// Evaluate `event` against the workflow's `[on]` table.
pub fn evaluate(workflow: &Workflow, event: &Event) -> Result<TriggerDecision> {
    let (filter, kind) = if event.is_pull_request() {
        (&workflow.on.pull_request, "pull_request")
    } else {
        (&workflow.on.push, "push")
    };
    let Some(filter) = filter else {
        return Ok(TriggerDecision::Skip {
            reason: format!("workflow has no {kind} trigger"),
        });
    };
    if !filter_matches(filter, event)? {
        let branch = event.branch().unwrap_or("<none>");
        return Ok(TriggerDecision::Skip {
            reason: format!("{kind} to '{branch}' matches no branch filter"),
        });
    }
    Ok(TriggerDecision::Run {
        jobs: workflow.jobs.keys().cloned().collect(),
    })
}

fn filter_matches(filter: &BranchFilter, event: &Event) -> Result<bool> {
    let Some(patterns) = &filter.branches else {
        return Ok(true);
    };
    let Some(branch) = event.branch() else {
        // A branch filter can only be satisfied by an event that names a branch.
        return Ok(false);
    };
    for raw in patterns {
        if BranchPattern::parse(raw)?.matches(branch) {
            return Ok(true);
        }
    }
    Ok(false)
}
