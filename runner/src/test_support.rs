//! Test-only helpers: workflow builders, a scripted step runner and a
//! throwaway git repository.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tempfile::TempDir;

use crate::core::actions::StepAction;
use crate::io::environment::RunContext;
use crate::io::step_runner::{StepExecution, StepRequest, StepRunner};
use crate::workflow::{Job, Step};

/// Job on `local` with one `run` step per script, named after the script.
pub fn script_job(scripts: &[&str]) -> Job {
    Job {
        runs_on: "local".to_string(),
        needs: Vec::new(),
        env: BTreeMap::new(),
        timeout_minutes: None,
        steps: scripts.iter().map(|s| Step::run(s, s)).collect(),
    }
}

/// Same as [`script_job`] with `needs` set.
pub fn script_job_needing(scripts: &[&str], needs: &[&str]) -> Job {
    Job {
        needs: needs.iter().map(|n| n.to_string()).collect(),
        ..script_job(scripts)
    }
}

/// Push-to-main context cloning from `source`.
pub fn run_context(source: &Path) -> RunContext {
    RunContext {
        run_id: "run-test".to_string(),
        event: "push".to_string(),
        git_ref: Some("main".to_string()),
        source: source.to_path_buf(),
        env: BTreeMap::from([("RUSTFLAGS".to_string(), "-D warnings".to_string())]),
    }
}

#[derive(Debug, Clone)]
enum Scripted {
    Exit { code: i32, output: String },
    TimedOut,
    Unstartable,
}

/// Step runner returning predetermined results keyed by script text.
///
/// Checkout steps are keyed as `checkout`. Unscripted steps succeed with no
/// output. Every started step is recorded as `<job>#<index>`.
#[derive(Debug, Default)]
pub struct ScriptedStepRunner {
    scripted: BTreeMap<String, Scripted>,
    calls: Mutex<Vec<String>>,
    vars: Mutex<BTreeMap<String, BTreeMap<String, String>>>,
}

impl ScriptedStepRunner {
    pub fn fail(mut self, key: &str, code: i32, output: &str) -> Self {
        self.scripted.insert(
            key.to_string(),
            Scripted::Exit {
                code,
                output: output.to_string(),
            },
        );
        self
    }

    pub fn time_out(mut self, key: &str) -> Self {
        self.scripted.insert(key.to_string(), Scripted::TimedOut);
        self
    }

    pub fn unstartable(mut self, key: &str) -> Self {
        self.scripted.insert(key.to_string(), Scripted::Unstartable);
        self
    }

    /// Started steps in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Variables seen by the last started step of `job`.
    pub fn vars_of(&self, job: &str) -> BTreeMap<String, String> {
        self.vars
            .lock()
            .ok()
            .and_then(|v| v.get(job).cloned())
            .unwrap_or_default()
    }

    fn key(action: &StepAction) -> &str {
        match action {
            StepAction::Checkout { .. } => "checkout",
            StepAction::Script { script } => script.as_str(),
        }
    }
}

impl StepRunner for ScriptedStepRunner {
    fn run(&self, request: &StepRequest<'_>) -> Result<StepExecution> {
        let key = Self::key(request.action);
        if let Some(Scripted::Unstartable) = self.scripted.get(key) {
            return Err(anyhow!("cannot start '{key}'"));
        }
        self.calls
            .lock()
            .map_err(|_| anyhow!("calls lock poisoned"))?
            .push(format!("{}#{}", request.job, request.index));
        self.vars
            .lock()
            .map_err(|_| anyhow!("vars lock poisoned"))?
            .insert(request.job.to_string(), request.vars.clone());

        let execution = match self.scripted.get(key) {
            Some(Scripted::Exit { code, output }) => StepExecution {
                exit_code: Some(*code),
                timed_out: false,
                output: output.clone(),
                duration: Duration::from_millis(1),
            },
            Some(Scripted::TimedOut) => StepExecution {
                exit_code: None,
                timed_out: true,
                output: String::new(),
                duration: request.timeout,
            },
            Some(Scripted::Unstartable) | None => StepExecution {
                exit_code: Some(0),
                timed_out: false,
                output: String::new(),
                duration: Duration::from_millis(1),
            },
        };
        Ok(execution)
    }
}

/// Temporary git repository on branch `main` with one committed `README.md`.
#[derive(Debug)]
pub struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("create repo dir")?;
        let repo = Self { dir };
        repo.git(&["init", "--quiet"])?;
        repo.git(&["symbolic-ref", "HEAD", "refs/heads/main"])?;
        repo.git(&["config", "user.email", "cirun@example.com"])?;
        repo.git(&["config", "user.name", "cirun"])?;
        repo.git(&["config", "commit.gpgsign", "false"])?;
        repo.commit_file("README.md", "# fixture\n", "initial commit")?;
        Ok(repo)
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn file(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    /// Write `rel` and commit it on the current branch.
    pub fn commit_file(&self, rel: &str, contents: &str, message: &str) -> Result<()> {
        let path = self.file(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        self.git(&["add", rel])?;
        self.git(&["commit", "--quiet", "-m", message])
    }

    /// Create `name` from `main` with one extra committed file, then return to `main`.
    pub fn create_branch(&self, name: &str, rel: &str, contents: &str) -> Result<()> {
        self.git(&["checkout", "--quiet", "-b", name])?;
        self.commit_file(rel, contents, &format!("add {rel}"))?;
        self.git(&["checkout", "--quiet", "main"])
    }

    fn git(&self, args: &[&str]) -> Result<()> {
        let output = Command::new("git")
            .args(args)
            .current_dir(self.dir.path())
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))?;
        if !output.status.success() {
            bail!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}
