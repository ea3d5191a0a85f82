//! Stable exit codes for cirun CLI commands.

/// Command succeeded, the run succeeded, or the trigger did not fire.
pub const OK: i32 = 0;
/// Invalid layout/config/workflow, I/O failure, or any other error.
pub const INVALID: i32 = 1;
/// A run executed and at least one job did not succeed.
pub const RUN_FAILED: i32 = 2;
