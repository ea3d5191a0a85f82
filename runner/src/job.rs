//! Orchestration for a single job: provision, run steps fail-fast, tear down.

use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::core::actions::resolve_step;
use crate::core::classifier::classify_failure;
use crate::core::types::{FailureKind, JobStatus, StepStatus};
use crate::io::config::RunnerConfig;
use crate::io::environment::{EphemeralEnv, RunContext};
use crate::io::run_log::{JobRecord, RunLog, StepRecord};
use crate::io::step_runner::{StepRequest, StepRunner};
use crate::workflow::{Job, MAX_TIMEOUT_MINUTES, Step};

/// Inputs for executing one job.
#[derive(Debug, Clone, Copy)]
pub struct JobRequest<'a> {
    pub name: &'a str,
    pub job: &'a Job,
    pub ctx: &'a RunContext,
    pub config: &'a RunnerConfig,
    pub log: &'a RunLog,
}

/// Record for a job that never ran because a dependency did not succeed.
pub fn skipped_job(name: &str, job: &Job) -> JobRecord {
    JobRecord {
        name: name.to_string(),
        runs_on: job.runs_on.clone(),
        status: JobStatus::Skipped,
        failure: None,
        error: None,
        duration_ms: 0,
        steps: skipped_steps(&job.steps, 0),
    }
}

/// Execute every step of a job in a fresh environment.
///
/// Step failures are recorded in the returned record, not returned as errors.
/// `Err` is reserved for failures writing the job record itself.
#[instrument(skip_all, fields(job = request.name))]
pub fn run_job<R: StepRunner + ?Sized>(runner: &R, request: &JobRequest<'_>) -> Result<JobRecord> {
    let start = Instant::now();
    let JobRequest {
        name,
        job,
        ctx,
        config,
        log,
    } = *request;

    let mut record = JobRecord {
        name: name.to_string(),
        runs_on: job.runs_on.clone(),
        status: JobStatus::Running,
        failure: None,
        error: None,
        duration_ms: 0,
        steps: Vec::new(),
    };
    log.write_job(&record)?;
    info!(steps = job.steps.len(), "job started");

    let env = match EphemeralEnv::provision(config.workspace_dir.as_deref(), ctx, name, &job.env) {
        Ok(env) => env,
        Err(err) => {
            warn!(err = %format!("{err:#}"), "failed to provision environment");
            record.status = JobStatus::Failed;
            record.error = Some(format!("{err:#}"));
            record.steps = skipped_steps(&job.steps, 0);
            record.duration_ms = start.elapsed().as_millis() as u64;
            log.write_job(&record)?;
            return Ok(record);
        }
    };

    let budget = job
        .timeout_minutes
        .map(minutes)
        .unwrap_or_else(|| config.job_timeout())
        .min(minutes(MAX_TIMEOUT_MINUTES));
    let deadline = start + budget;

    for (index, step) in job.steps.iter().enumerate() {
        let step_record = run_step(runner, request, &env, index, step, deadline);
        let failed = step_record.status == StepStatus::Failed;
        if failed {
            record.failure = step_record.failure;
            if step_record.failure == Some(FailureKind::Spawn) {
                record.error = Some(format!("step '{}' could not be started", step_record.name));
            }
        }
        record.steps.push(step_record);
        if failed {
            record.steps.extend(skipped_steps(&job.steps, index + 1));
            break;
        }
    }

    env.teardown();

    record.status = if record.failure.is_some() {
        JobStatus::Failed
    } else {
        JobStatus::Succeeded
    };
    record.duration_ms = start.elapsed().as_millis() as u64;
    log.write_job(&record)?;
    info!(status = ?record.status, failure = ?record.failure, "job finished");
    Ok(record)
}

fn run_step<R: StepRunner + ?Sized>(
    runner: &R,
    request: &JobRequest<'_>,
    env: &EphemeralEnv,
    index: usize,
    step: &Step,
    deadline: Instant,
) -> StepRecord {
    let name = step.display_name();
    let log_rel = RunLog::step_log_relative(request.name, index, &name);
    let mut record = StepRecord {
        index,
        name: name.clone(),
        status: StepStatus::Failed,
        exit_code: None,
        failure: None,
        duration_ms: None,
        log: None,
    };

    let action = match resolve_step(step, request.ctx.git_ref.as_deref()) {
        Ok(action) => action,
        Err(err) => {
            warn!(step = %name, err = %err, "cannot resolve step");
            record.failure = Some(FailureKind::Spawn);
            return record;
        }
    };

    let Some(timeout) = step_timeout(step, deadline) else {
        warn!(step = %name, "job budget exhausted before step");
        record.failure = Some(FailureKind::Timeout);
        return record;
    };

    let vars = env.step_vars(&step.env);
    let log_path = request.log.dir.join(&log_rel);
    let step_request = StepRequest {
        job: request.name,
        index,
        name: &name,
        action: &action,
        workspace: env.workspace(),
        source: &request.ctx.source,
        vars: &vars,
        timeout,
        output_limit_bytes: request.config.output_limit_bytes,
        log_path: &log_path,
    };
    record.log = Some(log_rel);

    match runner.run(&step_request) {
        Ok(exec) => {
            record.exit_code = exec.exit_code;
            record.duration_ms = Some(exec.duration.as_millis() as u64);
            if exec.success() {
                record.status = StepStatus::Succeeded;
            } else {
                record.failure = Some(classify_failure(&action, &exec.output, exec.timed_out));
            }
        }
        Err(err) => {
            warn!(step = %name, err = %format!("{err:#}"), "step failed to start");
            record.failure = Some(FailureKind::Spawn);
        }
    }
    record
}

/// Step budget: its own `timeout-minutes` capped by what is left of the job budget.
fn step_timeout(step: &Step, deadline: Instant) -> Option<Duration> {
    let remaining = deadline.checked_duration_since(Instant::now())?;
    if remaining.is_zero() {
        return None;
    }
    Some(match step.timeout_minutes {
        Some(m) => remaining.min(minutes(m)),
        None => remaining,
    })
}

/// `timeout-minutes` as a duration, capped at [`MAX_TIMEOUT_MINUTES`].
fn minutes(m: u64) -> Duration {
    Duration::from_secs(m.min(MAX_TIMEOUT_MINUTES) * 60)
}

fn skipped_steps(steps: &[Step], from: usize) -> Vec<StepRecord> {
    steps
        .iter()
        .enumerate()
        .skip(from)
        .map(|(index, step)| StepRecord {
            index,
            name: step.display_name(),
            status: StepStatus::Skipped,
            exit_code: None,
            failure: None,
            duration_ms: None,
            log: None,
        })
        .collect()
}
