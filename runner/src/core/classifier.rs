//! Deterministic classification of failed steps.

use crate::core::actions::StepAction;
use crate::core::types::FailureKind;

/// Output markers rustc prints when a lint was escalated by `-D warnings`.
const WARNING_AS_ERROR_MARKERS: [&str; 3] = [
    "implied by `-D warnings`",
    "#[deny(warnings)]",
    "warnings being treated as errors",
];

const FORMAT_COMMANDS: [&str; 2] = ["cargo fmt", "rustfmt"];

const BUILD_COMMANDS: [&str; 5] = [
    "cargo build",
    "cargo test",
    "cargo check",
    "cargo clippy",
    "cargo nextest",
];

/// Classify a step that exited unsuccessfully.
///
/// Precedence: timeout, checkout, toolchain, escalated warning, format, build.
/// The warning check runs before format/build so a `cargo test` that only
/// failed on a warning is reported as such.
pub fn classify_failure(action: &StepAction, output: &str, timed_out: bool) -> FailureKind {
    if timed_out {
        return FailureKind::Timeout;
    }
    let script = match action {
        StepAction::Checkout { .. } => return FailureKind::Checkout,
        StepAction::Script { script } => script.as_str(),
    };
    if invokes(script, &["rustup"]) {
        return FailureKind::ToolchainAcquisition;
    }
    if WARNING_AS_ERROR_MARKERS
        .iter()
        .any(|marker| output.contains(marker))
    {
        return FailureKind::WarningAsError;
    }
    if invokes(script, &FORMAT_COMMANDS) {
        return FailureKind::FormatViolation;
    }
    if invokes(script, &BUILD_COMMANDS) {
        return FailureKind::BuildOrTest;
    }
    FailureKind::Command
}

fn invokes(script: &str, commands: &[&str]) -> bool {
    script.lines().any(|line| {
        let line = line.trim_start();
        commands.iter().any(|cmd| {
            line.match_indices(cmd).any(|(idx, _)| {
                let before_ok = line[..idx]
                    .chars()
                    .next_back()
                    .is_none_or(|ch| ch.is_whitespace() || matches!(ch, ';' | '&' | '|' | '('));
                let after = &line[idx + cmd.len()..];
                let after_ok = after
                    .chars()
                    .next()
                    .is_none_or(|ch| ch.is_whitespace() || ch == ';');
                before_ok && after_ok
            })
        })
    })
}
