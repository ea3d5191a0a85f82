//! Runner configuration stored under `.cirun/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::workflow::MAX_TIMEOUT_MINUTES;

/// Runner configuration (TOML).
///
/// Edited by humans; every field is optional and falls back to the default.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunnerConfig {
    /// Jobs executed concurrently within a wave. `0` means unbounded.
    pub max_parallel_jobs: usize,

    /// Wall-clock budget for a job without `timeout-minutes`.
    pub job_timeout_secs: u64,

    /// In-memory bound per stdout/stderr stream of a step. Logs on disk are complete.
    pub output_limit_bytes: usize,

    /// Interpreter for `run` steps; the script is appended as the last argument.
    pub shell: Vec<String>,

    /// Accepted `runs-on` labels.
    pub labels: Vec<String>,

    /// Parent directory for ephemeral job environments (system temp dir if unset).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_dir: Option<PathBuf>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_parallel_jobs: 0,
            job_timeout_secs: 60 * 60,
            output_limit_bytes: 100_000,
            shell: vec!["sh".to_string(), "-e".to_string(), "-c".to_string()],
            labels: vec!["ubuntu-latest".to_string(), "local".to_string()],
            workspace_dir: None,
        }
    }
}

impl RunnerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.job_timeout_secs == 0 {
            return Err(anyhow!("job_timeout_secs must be > 0"));
        }
        if self.job_timeout_secs > MAX_TIMEOUT_MINUTES * 60 {
            return Err(anyhow!(
                "job_timeout_secs must be at most {}",
                MAX_TIMEOUT_MINUTES * 60
            ));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.shell.is_empty() || self.shell[0].trim().is_empty() {
            return Err(anyhow!("shell must be a non-empty array"));
        }
        if self.labels.iter().all(|label| label.trim().is_empty()) {
            return Err(anyhow!("labels must contain at least one label"));
        }
        Ok(())
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RunnerConfig::default()`.
pub fn load_config(path: &Path) -> Result<RunnerConfig> {
    if !path.exists() {
        let cfg = RunnerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RunnerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &RunnerConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, RunnerConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let cfg = RunnerConfig {
            max_parallel_jobs: 2,
            workspace_dir: Some(temp.path().join("envs")),
            ..RunnerConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_uses_defaults_for_missing_fields() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "max_parallel_jobs = 1\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.max_parallel_jobs, 1);
        assert_eq!(cfg.shell, RunnerConfig::default().shell);
    }

    #[test]
    fn rejects_zero_timeout_and_empty_shell() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "job_timeout_secs = 0\n").expect("write");
        assert!(load_config(&path).is_err());

        let cfg = RunnerConfig {
            shell: Vec::new(),
            ..RunnerConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_timeout_beyond_maximum() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "job_timeout_secs = 18446744073709551615\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("at most"), "{err:#}");
    }
}
