//! Validation of the `.cirun/` layout, config and workflow.

use std::path::Path;

use anyhow::{Context, Result, anyhow};

use crate::core::schedule::plan_waves;
use crate::io::config::{RunnerConfig, load_config};
use crate::io::init::CirunPaths;
use crate::io::workflow_store::load_workflow;
use crate::workflow::Workflow;

/// Loaded project state; everything `cirun run` needs before touching an event.
#[derive(Debug, Clone)]
pub struct Project {
    pub paths: CirunPaths,
    pub config: RunnerConfig,
    pub workflow: Workflow,
}

/// High-level validation outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidateOutcome {
    pub jobs: usize,
    pub waves: Vec<Vec<String>>,
}

/// Load config and workflow from `root`, failing on the first invalid file.
pub fn load_project(root: &Path) -> Result<Project> {
    let paths = CirunPaths::new(root);
    if !paths.cirun_dir.is_dir() {
        return Err(anyhow!(
            "missing directory {} (run `cirun init` first)",
            paths.cirun_dir.display()
        ));
    }
    let config = load_config(&paths.config_path).with_context(|| "load config.toml")?;
    let workflow =
        load_workflow(&paths.workflow_path, &config.labels).with_context(|| "load workflow.toml")?;
    Ok(Project {
        paths,
        config,
        workflow,
    })
}

/// Validate `.cirun/` and report the job schedule.
pub fn validate_project(root: &Path) -> Result<ValidateOutcome> {
    let project = load_project(root)?;
    let waves = plan_waves(&project.workflow)?;
    Ok(ValidateOutcome {
        jobs: project.workflow.jobs.len(),
        waves,
    })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::io::init::{InitOptions, init_project};

    #[test]
    fn default_project_validates() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_project(temp.path(), &InitOptions { force: false }).expect("init");

        let outcome = validate_project(temp.path()).expect("validate");
        assert_eq!(outcome.jobs, 2);
        assert_eq!(
            outcome.waves,
            vec![vec!["cargo-fmt".to_string(), "test".to_string()]]
        );
    }

    #[test]
    fn missing_layout_is_reported() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = validate_project(temp.path()).expect_err("should fail");
        assert!(format!("{err:#}").contains("cirun init"));
    }

    #[test]
    fn unknown_label_fails_validation() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_project(temp.path(), &InitOptions { force: false }).expect("init");
        fs::write(&paths.config_path, "labels = [\"self-hosted\"]\n").expect("write config");

        let err = validate_project(temp.path()).expect_err("should fail");
        assert!(format!("{err:#}").contains("ubuntu-latest"));
    }

    #[test]
    fn invalid_config_fails_validation() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_project(temp.path(), &InitOptions { force: false }).expect("init");
        fs::write(&paths.config_path, "job_timeout_secs = 0\n").expect("write config");

        let err = validate_project(temp.path()).expect_err("should fail");
        assert!(format!("{err:#}").contains("job_timeout_secs"));
    }
}
