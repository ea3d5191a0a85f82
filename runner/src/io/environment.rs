//! Ephemeral per-job execution environments.
//!
//! Each job gets a fresh temporary directory and its own copy of the
//! environment variables. Dropping the environment removes the directory.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::TempDir;
use tracing::{debug, warn};

/// Variables and identity shared by every environment of one run.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: String,
    /// Event name as exported in `CIRUN_EVENT`.
    pub event: String,
    /// Branch of the triggering event, if any.
    pub git_ref: Option<String>,
    /// Repository the checkout action clones from.
    pub source: PathBuf,
    /// Process-wide variables fixed at run start.
    pub env: BTreeMap<String, String>,
}

/// A provisioned, isolated environment for one job.
#[derive(Debug)]
pub struct EphemeralEnv {
    dir: TempDir,
    workspace: PathBuf,
    vars: BTreeMap<String, String>,
}

impl EphemeralEnv {
    /// Create a fresh directory under `parent` (system temp dir when `None`) and
    /// compute the job's variables: run env, then `job_env`, then built-ins.
    pub fn provision(
        parent: Option<&Path>,
        ctx: &RunContext,
        job: &str,
        job_env: &BTreeMap<String, String>,
    ) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        let prefix = format!("cirun-{job}-");
        builder.prefix(&prefix);
        let dir = match parent {
            Some(parent) => {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create workspace parent {}", parent.display()))?;
                builder.tempdir_in(parent)
            }
            None => builder.tempdir(),
        }
        .with_context(|| format!("provision environment for job {job}"))?;

        let workspace = dir.path().join("workspace");
        fs::create_dir(&workspace)
            .with_context(|| format!("create workspace {}", workspace.display()))?;

        let mut vars = ctx.env.clone();
        vars.extend(job_env.iter().map(|(k, v)| (k.clone(), v.clone())));
        vars.insert("CI".to_string(), "true".to_string());
        vars.insert("CIRUN".to_string(), "true".to_string());
        vars.insert("CIRUN_RUN_ID".to_string(), ctx.run_id.clone());
        vars.insert("CIRUN_JOB".to_string(), job.to_string());
        vars.insert("CIRUN_EVENT".to_string(), ctx.event.clone());
        vars.insert(
            "CIRUN_REF".to_string(),
            ctx.git_ref.clone().unwrap_or_default(),
        );
        vars.insert(
            "CIRUN_WORKSPACE".to_string(),
            workspace.display().to_string(),
        );

        debug!(job, dir = %dir.path().display(), "provisioned environment");
        Ok(Self {
            dir,
            workspace,
            vars,
        })
    }

    /// Working directory for every step of the job.
    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Variables for one step: the job's variables overlaid with `step_env`.
    /// Built-in `CIRUN_*`/`CI` values cannot be overridden.
    pub fn step_vars(&self, step_env: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut vars = self.vars.clone();
        for (key, value) in step_env {
            if key == "CI" || key.starts_with("CIRUN") {
                continue;
            }
            vars.insert(key.clone(), value.clone());
        }
        vars
    }

    /// Remove the environment from disk.
    pub fn teardown(self) {
        let path = self.dir.path().to_path_buf();
        if let Err(err) = self.dir.close() {
            warn!(dir = %path.display(), err = %err, "failed to remove environment");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> RunContext {
        RunContext {
            run_id: "run-1".to_string(),
            event: "push".to_string(),
            git_ref: Some("main".to_string()),
            source: PathBuf::from("."),
            env: BTreeMap::from([
                ("RUSTFLAGS".to_string(), "-D warnings".to_string()),
                ("LEVEL".to_string(), "run".to_string()),
            ]),
        }
    }

    #[test]
    fn environments_are_isolated_and_removed() {
        let parent = tempfile::tempdir().expect("tempdir");
        let a = EphemeralEnv::provision(Some(parent.path()), &ctx(), "a", &BTreeMap::new())
            .expect("a");
        let b = EphemeralEnv::provision(Some(parent.path()), &ctx(), "b", &BTreeMap::new())
            .expect("b");
        assert_ne!(a.workspace(), b.workspace());
        assert!(a.workspace().is_dir());

        fs::write(a.workspace().join("marker"), "a").expect("write");
        assert!(!b.workspace().join("marker").exists());

        let a_dir = a.workspace().to_path_buf();
        a.teardown();
        assert!(!a_dir.exists());
        assert!(b.workspace().is_dir());
    }

    #[test]
    fn variables_overlay_run_job_step_then_builtins() {
        let parent = tempfile::tempdir().expect("tempdir");
        let job_env = BTreeMap::from([("LEVEL".to_string(), "job".to_string())]);
        let env = EphemeralEnv::provision(Some(parent.path()), &ctx(), "test", &job_env)
            .expect("env");

        let base = env.step_vars(&BTreeMap::new());
        assert_eq!(base["RUSTFLAGS"], "-D warnings");
        assert_eq!(base["LEVEL"], "job");
        assert_eq!(base["CIRUN_JOB"], "test");
        assert_eq!(base["CIRUN_REF"], "main");
        assert_eq!(base["CI"], "true");

        let step_env = BTreeMap::from([
            ("LEVEL".to_string(), "step".to_string()),
            ("CIRUN_JOB".to_string(), "spoofed".to_string()),
        ]);
        let vars = env.step_vars(&step_env);
        assert_eq!(vars["LEVEL"], "step");
        assert_eq!(vars["CIRUN_JOB"], "test");
    }
}
