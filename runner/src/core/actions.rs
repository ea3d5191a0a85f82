//! Built-in reusable actions referenced by `uses`.

use anyhow::{Result, anyhow};

use crate::workflow::Step;

const DEFAULT_TOOLCHAIN: &str = "stable";

/// Action resolved from a `uses = "<name>@<version>"` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuiltinAction {
    /// Clone the source repository into the job workspace.
    Checkout,
    /// Update (installing if needed) the named Rust toolchain.
    Toolchain { toolchain: String },
}

impl BuiltinAction {
    pub fn parse(uses: &str) -> Result<Self> {
        let uses = uses.trim();
        let (name, version) = match uses.split_once('@') {
            Some((name, version)) => (name, Some(version)),
            None => (uses, None),
        };
        if version.is_some_and(|v| v.trim().is_empty()) {
            return Err(anyhow!("action '{uses}' has an empty version"));
        }
        match name {
            "actions/checkout" | "checkout" => Ok(Self::Checkout),
            "rust-toolchain" | "dtolnay/rust-toolchain" => Ok(Self::Toolchain {
                toolchain: version.unwrap_or(DEFAULT_TOOLCHAIN).to_string(),
            }),
            _ => Err(anyhow!("unknown action '{uses}'")),
        }
    }

    /// Keys accepted in the step's `with` table.
    pub fn inputs(&self) -> &'static [&'static str] {
        match self {
            Self::Checkout => &["ref"],
            Self::Toolchain { .. } => &["toolchain"],
        }
    }

    /// Shell script equivalent for actions that are plain commands.
    pub fn script(&self) -> Option<String> {
        match self {
            Self::Checkout => None,
            Self::Toolchain { toolchain } => Some(format!("rustup update {toolchain}")),
        }
    }
}

/// What a step actually does once `uses` has been resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepAction {
    /// Clone the source repository at `git_ref` (source `HEAD` when `None`).
    Checkout { git_ref: Option<String> },
    /// Run a script with the configured shell.
    Script { script: String },
}

/// Resolve a workflow step. `event_ref` is the ref checkout uses unless the
/// step overrides it with `with.ref`. `with.toolchain` overrides the version
/// in a toolchain reference.
pub fn resolve_step(step: &Step, event_ref: Option<&str>) -> Result<StepAction> {
    match (&step.uses, &step.run) {
        (Some(uses), None) => match BuiltinAction::parse(uses)? {
            BuiltinAction::Checkout => Ok(StepAction::Checkout {
                git_ref: step
                    .with
                    .get("ref")
                    .map(String::as_str)
                    .or(event_ref)
                    .map(str::to_string),
            }),
            BuiltinAction::Toolchain { toolchain } => {
                let toolchain = step.with.get("toolchain").cloned().unwrap_or(toolchain);
                Ok(StepAction::Script {
                    script: BuiltinAction::Toolchain { toolchain }
                        .script()
                        .unwrap_or_default(),
                })
            }
        },
        (None, Some(run)) => Ok(StepAction::Script {
            script: run.clone(),
        }),
        _ => Err(anyhow!(
            "step '{}' must set exactly one of 'uses' or 'run'",
            step.display_name()
        )),
    }
}
