//! Project scaffolding for `.cirun/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use crate::io::config::{RunnerConfig, write_config};
use crate::workflow::DEFAULT_WORKFLOW_TOML;

/// All canonical paths within `.cirun/` for a project root.
#[derive(Debug, Clone)]
pub struct CirunPaths {
    pub root: PathBuf,
    pub cirun_dir: PathBuf,
    pub runs_dir: PathBuf,
    pub gitignore_path: PathBuf,
    pub workflow_path: PathBuf,
    pub config_path: PathBuf,
}

impl CirunPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let cirun_dir = root.join(".cirun");
        Self {
            root: root.clone(),
            runs_dir: cirun_dir.join("runs"),
            gitignore_path: cirun_dir.join(".gitignore"),
            workflow_path: cirun_dir.join("workflow.toml"),
            config_path: cirun_dir.join("config.toml"),
            cirun_dir,
        }
    }

    /// Directory holding the record of one run.
    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.runs_dir.join(run_id)
    }
}

/// Options for `init_project`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite existing cirun-owned files.
    pub force: bool,
}

/// Create `.cirun/` scaffolding in `root`.
///
/// Fails if `.cirun/workflow.toml` already exists unless `options.force` is set.
pub fn init_project(root: &Path, options: &InitOptions) -> Result<CirunPaths> {
    let paths = CirunPaths::new(root);
    if paths.cirun_dir.exists() && !paths.cirun_dir.is_dir() {
        return Err(anyhow!("cirun init: .cirun exists but is not a directory"));
    }
    if paths.workflow_path.exists() && !options.force {
        return Err(anyhow!(
            "cirun init: {} already exists (use --force to overwrite)",
            paths.workflow_path.display()
        ));
    }

    fs::create_dir_all(&paths.runs_dir)
        .with_context(|| format!("create directory {}", paths.runs_dir.display()))?;
    write_file(&paths.gitignore_path, CIRUN_GITIGNORE)?;
    write_file(&paths.workflow_path, DEFAULT_WORKFLOW_TOML)?;
    write_config(&paths.config_path, &RunnerConfig::default())?;

    Ok(paths)
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write file {}", path.display()))
}

const CIRUN_GITIGNORE: &str = "runs/\n";
