//! Workflow load/save helpers with validation.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::io::config::write_atomic;
use crate::workflow::Workflow;

/// Load a workflow from disk and validate it against the accepted `runs-on` labels.
pub fn load_workflow(path: &Path, labels: &[String]) -> Result<Workflow> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("read workflow {}", path.display()))?;
    let workflow: Workflow = toml::from_str(&contents)
        .with_context(|| format!("parse workflow {}", path.display()))?;
    workflow
        .validate(labels)
        .with_context(|| format!("invalid workflow {}", path.display()))?;
    Ok(workflow)
}

/// Atomically write a workflow to disk (temp file + rename).
pub fn write_workflow(path: &Path, workflow: &Workflow) -> Result<()> {
    let mut buf = toml::to_string_pretty(workflow).context("serialize workflow toml")?;
    if !buf.ends_with('\n') {
        buf.push('\n');
    }
    write_atomic(path, &buf)
}
