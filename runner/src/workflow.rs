//! Declarative workflow definition (`.cirun/workflow.toml`).
//!
//! A workflow names the events that start a run (`[on]`), the process-wide
//! environment every step sees (`[env]`) and the jobs to execute. Each job is
//! an ordered list of steps; a step is either a built-in action (`uses`) or an
//! inline shell script (`run`).

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::actions::BuiltinAction;
use crate::core::pattern::BranchPattern;
use crate::core::schedule::plan_waves;

/// Largest `timeout-minutes` a job or step may declare (seven days).
pub const MAX_TIMEOUT_MINUTES: u64 = 7 * 24 * 60;

/// Source of the workflow written by `cirun init`.
pub const DEFAULT_WORKFLOW_TOML: &str = include_str!("../templates/workflow.toml");

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Workflow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub on: Triggers,
    /// Process-wide variables exported to every step of every job.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    pub jobs: BTreeMap<String, Job>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Triggers {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push: Option<BranchFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_request: Option<BranchFilter>,
}

/// Optional branch filter; `None` matches every branch.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BranchFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branches: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct Job {
    pub runs_on: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub needs: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_minutes: Option<u64>,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct Step {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uses: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<String>,
    /// Action inputs (e.g. `ref` for checkout).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub with: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_minutes: Option<u64>,
}

impl Step {
    pub fn run(name: &str, script: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            run: Some(script.to_string()),
            ..Self::default()
        }
    }

    pub fn uses(action: &str) -> Self {
        Self {
            uses: Some(action.to_string()),
            ..Self::default()
        }
    }

    /// Human-readable label: explicit name, else the action or first script line.
    pub fn display_name(&self) -> String {
        if let Some(name) = self.name.as_deref().filter(|n| !n.trim().is_empty()) {
            return name.trim().to_string();
        }
        if let Some(uses) = &self.uses {
            return uses.clone();
        }
        self.run
            .as_deref()
            .and_then(|script| script.lines().map(str::trim).find(|l| !l.is_empty()))
            .unwrap_or("step")
            .to_string()
    }
}

/// The workflow `cirun init` writes: format check and release-mode tests.
pub fn default_workflow() -> Workflow {
    let toolchain = Step::run("toolchain update", "rustup update stable");
    let mut jobs = BTreeMap::new();
    jobs.insert(
        "cargo-fmt".to_string(),
        Job {
            runs_on: "ubuntu-latest".to_string(),
            needs: Vec::new(),
            env: BTreeMap::new(),
            timeout_minutes: None,
            steps: vec![
                Step::uses("actions/checkout@v2"),
                toolchain.clone(),
                Step::run("format check", "cargo fmt -- --check"),
            ],
        },
    );
    jobs.insert(
        "test".to_string(),
        Job {
            runs_on: "ubuntu-latest".to_string(),
            needs: Vec::new(),
            env: BTreeMap::new(),
            timeout_minutes: None,
            steps: vec![
                Step::uses("actions/checkout@v2"),
                toolchain,
                Step::run("test", "cargo test --release"),
            ],
        },
    );

    Workflow {
        name: Some("ci".to_string()),
        on: Triggers {
            push: Some(BranchFilter {
                branches: Some(vec!["main".to_string(), "pr/*".to_string()]),
            }),
            pull_request: Some(BranchFilter::default()),
        },
        env: BTreeMap::from([("RUSTFLAGS".to_string(), "-D warnings".to_string())]),
        jobs,
    }
}

impl Workflow {
    /// Check the workflow for structural errors, reporting all of them at once.
    ///
    /// `labels` are the `runs-on` values this runner accepts.
    pub fn validate(&self, labels: &[String]) -> Result<()> {
        let errors = self.violations(labels);
        if errors.is_empty() {
            return Ok(());
        }
        Err(anyhow!(
            "workflow validation failed:\n- {}",
            errors.join("\n- ")
        ))
    }

    fn violations(&self, labels: &[String]) -> Vec<String> {
        let mut errors = Vec::new();

        if self.on.push.is_none() && self.on.pull_request.is_none() {
            errors.push("on: at least one trigger (push, pull_request) is required".to_string());
        }
        for (kind, filter) in [("push", &self.on.push), ("pull_request", &self.on.pull_request)] {
            let Some(branches) = filter.as_ref().and_then(|f| f.branches.as_ref()) else {
                continue;
            };
            if branches.is_empty() {
                errors.push(format!("on.{kind}.branches: must not be empty when present"));
            }
            for raw in branches {
                if let Err(err) = BranchPattern::parse(raw) {
                    errors.push(format!("on.{kind}.branches: {err}"));
                }
            }
        }
        check_env("env", &self.env, &mut errors);

        if self.jobs.is_empty() {
            errors.push("jobs: at least one job is required".to_string());
        }
        for (name, job) in &self.jobs {
            check_job(name, job, &self.jobs, labels, &mut errors);
        }

        if errors.is_empty()
            && let Err(err) = plan_waves(self)
        {
            errors.push(err.to_string());
        }
        errors
    }
}

fn check_job(
    name: &str,
    job: &Job,
    jobs: &BTreeMap<String, Job>,
    labels: &[String],
    errors: &mut Vec<String>,
) {
    if name.is_empty()
        || !name
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_'))
    {
        errors.push(format!(
            "jobs.{name}: name must be non-empty and use only [A-Za-z0-9_-]"
        ));
    }
    if !labels.iter().any(|label| label == &job.runs_on) {
        errors.push(format!(
            "jobs.{name}.runs-on: unsupported label '{}' (accepted: {})",
            job.runs_on,
            labels.join(", ")
        ));
    }
    check_timeout(&format!("jobs.{name}"), job.timeout_minutes, errors);
    let mut seen = BTreeSet::new();
    for dep in &job.needs {
        if dep == name {
            errors.push(format!("jobs.{name}.needs: job cannot depend on itself"));
        } else if !jobs.contains_key(dep) {
            errors.push(format!("jobs.{name}.needs: unknown job '{dep}'"));
        }
        if !seen.insert(dep) {
            errors.push(format!("jobs.{name}.needs: duplicate entry '{dep}'"));
        }
    }
    check_env(&format!("jobs.{name}.env"), &job.env, errors);

    if job.steps.is_empty() {
        errors.push(format!("jobs.{name}.steps: at least one step is required"));
    }
    for (idx, step) in job.steps.iter().enumerate() {
        let at = format!("jobs.{name}.steps[{idx}]");
        match (&step.uses, &step.run) {
            (Some(_), Some(_)) => errors.push(format!("{at}: set either 'uses' or 'run', not both")),
            (None, None) => errors.push(format!("{at}: one of 'uses' or 'run' is required")),
            (Some(uses), None) => match BuiltinAction::parse(uses) {
                Ok(action) => {
                    for key in step.with.keys() {
                        if !action.inputs().contains(&key.as_str()) {
                            errors.push(format!(
                                "{at}.with: unknown input '{key}' for '{uses}' (accepted: {})",
                                action.inputs().join(", ")
                            ));
                        }
                    }
                }
                Err(err) => errors.push(format!("{at}.uses: {err}")),
            },
            (None, Some(run)) => {
                if run.trim().is_empty() {
                    errors.push(format!("{at}.run: script must not be empty"));
                }
                if !step.with.is_empty() {
                    errors.push(format!("{at}.with: only valid together with 'uses'"));
                }
            }
        }
        check_timeout(&at, step.timeout_minutes, errors);
        check_env(&format!("{at}.env"), &step.env, errors);
    }
}

fn check_timeout(at: &str, minutes: Option<u64>, errors: &mut Vec<String>) {
    match minutes {
        Some(0) => errors.push(format!("{at}.timeout-minutes: must be > 0")),
        Some(m) if m > MAX_TIMEOUT_MINUTES => errors.push(format!(
            "{at}.timeout-minutes: {m} exceeds the maximum of {MAX_TIMEOUT_MINUTES}"
        )),
        _ => {}
    }
}

fn check_env(at: &str, env: &BTreeMap<String, String>, errors: &mut Vec<String>) {
    for key in env.keys() {
        if key.is_empty() || key.contains('=') || key.contains('\0') {
            errors.push(format!("{at}: invalid variable name '{key}'"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> Vec<String> {
        vec!["ubuntu-latest".to_string()]
    }

    #[test]
    fn template_parses_to_default_workflow() {
        let parsed: Workflow = toml::from_str(DEFAULT_WORKFLOW_TOML).expect("parse template");
        assert_eq!(parsed, default_workflow());
        parsed.validate(&labels()).expect("template is valid");
    }

    #[test]
    fn default_workflow_exports_warnings_as_errors() {
        let wf = default_workflow();
        assert_eq!(wf.env.get("RUSTFLAGS").map(String::as_str), Some("-D warnings"));
        let names: Vec<&str> = wf.jobs.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["cargo-fmt", "test"]);
    }

    #[test]
    fn display_name_prefers_explicit_name() {
        assert_eq!(Step::run("fmt", "cargo fmt").display_name(), "fmt");
        assert_eq!(
            Step::uses("actions/checkout@v2").display_name(),
            "actions/checkout@v2"
        );
        let step = Step {
            run: Some("\n  echo one\necho two".to_string()),
            ..Step::default()
        };
        assert_eq!(step.display_name(), "echo one");
    }

    #[test]
    fn validate_reports_every_violation() {
        let mut wf = default_workflow();
        wf.on = Triggers::default();
        let job = wf.jobs.get_mut("test").expect("test job");
        job.runs_on = "macos-14".to_string();
        job.needs = vec!["missing".to_string()];
        job.steps.push(Step {
            uses: Some("actions/checkout@v2".to_string()),
            run: Some("echo".to_string()),
            ..Step::default()
        });
        job.steps.push(Step::uses("docker/login@v3"));

        let err = wf.validate(&labels()).unwrap_err().to_string();
        assert!(err.contains("at least one trigger"));
        assert!(err.contains("unsupported label 'macos-14'"));
        assert!(err.contains("unknown job 'missing'"));
        assert!(err.contains("not both"));
        assert!(err.contains("unknown action"));
    }

    #[test]
    fn validate_rejects_dependency_cycle() {
        let mut wf = default_workflow();
        wf.jobs.get_mut("test").expect("test").needs = vec!["cargo-fmt".to_string()];
        wf.jobs.get_mut("cargo-fmt").expect("fmt").needs = vec!["test".to_string()];
        let err = wf.validate(&labels()).unwrap_err().to_string();
        assert!(err.contains("cycle"), "{err}");
    }

    #[test]
    fn validate_rejects_bad_patterns_and_env() {
        let mut wf = default_workflow();
        wf.on.push = Some(BranchFilter {
            branches: Some(vec!["a/***".to_string()]),
        });
        wf.env.insert("BAD=KEY".to_string(), "x".to_string());
        let err = wf.validate(&labels()).unwrap_err().to_string();
        assert!(err.contains("on.push.branches"));
        assert!(err.contains("invalid variable name 'BAD=KEY'"));
    }

    #[test]
    fn validate_bounds_timeouts() {
        let mut wf = default_workflow();
        let job = wf.jobs.get_mut("test").expect("test job");
        job.timeout_minutes = Some(200_000_000_000_000_000);
        job.steps[2].timeout_minutes = Some(0);
        let err = wf.validate(&labels()).unwrap_err().to_string();
        assert!(err.contains("jobs.test.timeout-minutes: 200000000000000000 exceeds"), "{err}");
        assert!(err.contains("jobs.test.steps[2].timeout-minutes: must be > 0"), "{err}");

        let job = wf.jobs.get_mut("test").expect("test job");
        job.timeout_minutes = Some(MAX_TIMEOUT_MINUTES);
        job.steps[2].timeout_minutes = Some(1);
        wf.validate(&labels()).expect("maximum is accepted");
    }

    #[test]
    fn validate_rejects_unknown_action_inputs() {
        let mut wf = default_workflow();
        let job = wf.jobs.get_mut("test").expect("test job");
        job.steps[0]
            .with
            .insert("fetch-depth".to_string(), "0".to_string());
        let err = wf.validate(&labels()).unwrap_err().to_string();
        assert!(err.contains("unknown input 'fetch-depth'"), "{err}");

        let job = wf.jobs.get_mut("test").expect("test job");
        job.steps[0].with.clear();
        job.steps[0].with.insert("ref".to_string(), "main".to_string());
        job.steps[1] = Step::uses("dtolnay/rust-toolchain@stable");
        job.steps[1]
            .with
            .insert("toolchain".to_string(), "nightly".to_string());
        wf.validate(&labels()).expect("known inputs are accepted");
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let raw = r#"
[on.push]
branches = ["main"]
tags = ["v*"]

[jobs.a]
runs-on = "ubuntu-latest"
steps = [{ run = "true" }]
"#;
        assert!(toml::from_str::<Workflow>(raw).is_err());
    }
}
