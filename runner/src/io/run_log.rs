//! Run records under `.cirun/runs/<run-id>/`.
//!
//! Records are observability output: written once per run and never read
//! back by later runs.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::core::types::{Event, FailureKind, JobStatus, RunStatus, StepStatus};
use crate::io::config::write_atomic;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub workflow: Option<String>,
    pub event: Event,
    /// Short SHA of the source repository at run start, when it is a git repository.
    pub source_sha: Option<String>,
    pub status: RunStatus,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub duration_ms: Option<u64>,
    pub jobs: Vec<JobSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub name: String,
    pub status: JobStatus,
    pub failure: Option<FailureKind>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub name: String,
    pub runs_on: String,
    pub status: JobStatus,
    /// Classification of the failing step, if any.
    pub failure: Option<FailureKind>,
    /// Runner-side error text (provisioning or spawn problems).
    pub error: Option<String>,
    pub duration_ms: u64,
    pub steps: Vec<StepRecord>,
}

impl JobRecord {
    pub fn summary(&self) -> JobSummary {
        JobSummary {
            name: self.name.clone(),
            status: self.status,
            failure: self.failure,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub index: usize,
    pub name: String,
    pub status: StepStatus,
    pub exit_code: Option<i32>,
    pub failure: Option<FailureKind>,
    pub duration_ms: Option<u64>,
    /// Log file relative to the run directory.
    pub log: Option<String>,
}

/// Paths of one run's record directory.
#[derive(Debug, Clone)]
pub struct RunLog {
    pub dir: PathBuf,
    pub run_path: PathBuf,
}

impl RunLog {
    pub fn new(runs_dir: &Path, run_id: &str) -> Self {
        let dir = runs_dir.join(run_id);
        Self {
            run_path: dir.join("run.json"),
            dir,
        }
    }

    pub fn job_dir(&self, job: &str) -> PathBuf {
        self.dir.join(job)
    }

    pub fn job_path(&self, job: &str) -> PathBuf {
        self.job_dir(job).join("job.json")
    }

    /// Log file name for a step relative to the run directory, e.g. `test/03-cargo-test.log`.
    pub fn step_log_relative(job: &str, index: usize, name: &str) -> String {
        format!("{job}/{:02}-{}.log", index + 1, slug(name))
    }

    pub fn write_run(&self, record: &RunRecord) -> Result<()> {
        write_json(&self.run_path, record)
    }

    pub fn write_job(&self, record: &JobRecord) -> Result<()> {
        write_json(&self.job_path(&record.name), record)
    }

    pub fn load_run(&self) -> Result<RunRecord> {
        read_json(&self.run_path)
    }

    pub fn load_job(&self, job: &str) -> Result<JobRecord> {
        read_json(&self.job_path(job))
    }
}

fn slug(name: &str) -> String {
    let mut out = String::new();
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
        } else if !out.ends_with('-') && !out.is_empty() {
            out.push('-');
        }
        if out.len() >= 40 {
            break;
        }
    }
    let trimmed = out.trim_end_matches('-');
    if trimmed.is_empty() {
        "step".to_string()
    } else {
        trimmed.to_string()
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}
