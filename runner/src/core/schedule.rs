//! Dependency ordering for jobs (`needs`).

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Result, anyhow};

use crate::core::types::JobStatus;
use crate::workflow::Workflow;

/// Group jobs into waves: every job's `needs` lie in earlier waves.
///
/// Jobs inside a wave are independent and ordered by name.
pub fn plan_waves(workflow: &Workflow) -> Result<Vec<Vec<String>>> {
    let mut pending: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for (name, job) in &workflow.jobs {
        let mut deps = BTreeSet::new();
        for dep in &job.needs {
            if !workflow.jobs.contains_key(dep) {
                return Err(anyhow!("jobs.{name}.needs: unknown job '{dep}'"));
            }
            deps.insert(dep.as_str());
        }
        pending.insert(name.as_str(), deps);
    }

    let mut waves = Vec::new();
    let mut done: BTreeSet<&str> = BTreeSet::new();
    while !pending.is_empty() {
        let ready: Vec<&str> = pending
            .iter()
            .filter(|(_, deps)| deps.iter().all(|dep| done.contains(dep)))
            .map(|(name, _)| *name)
            .collect();
        if ready.is_empty() {
            let stuck: Vec<&str> = pending.keys().copied().collect();
            return Err(anyhow!(
                "dependency cycle among jobs: {}",
                stuck.join(", ")
            ));
        }
        for name in &ready {
            pending.remove(name);
            done.insert(*name);
        }
        waves.push(ready.into_iter().map(str::to_string).collect());
    }
    Ok(waves)
}

/// True when any dependency finished without succeeding.
pub fn blocked_by_needs(needs: &[String], finished: &BTreeMap<String, JobStatus>) -> bool {
    needs
        .iter()
        .any(|dep| finished.get(dep) != Some(&JobStatus::Succeeded))
}
