//! Run orchestration: trigger, schedule, fan out jobs, aggregate.

use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread;
use std::time::Instant;

use anyhow::{Context, Result, anyhow, bail};
use chrono::Utc;
use rand::{Rng, distributions::Alphanumeric};
use tracing::{debug, info, instrument, warn};

use crate::core::schedule::{blocked_by_needs, plan_waves};
use crate::core::status::{aggregate, transition};
use crate::core::trigger::{TriggerDecision, evaluate};
use crate::core::types::{Event, JobStatus, RunStatus};
use crate::io::config::RunnerConfig;
use crate::io::environment::RunContext;
use crate::io::git::Git;
use crate::io::run_log::{JobRecord, RunLog, RunRecord};
use crate::io::step_runner::StepRunner;
use crate::job::{JobRequest, run_job, skipped_job};
use crate::workflow::{Job, Workflow};

/// Everything needed to start a run.
#[derive(Debug, Clone, Copy)]
pub struct RunRequest<'a> {
    pub workflow: &'a Workflow,
    pub config: &'a RunnerConfig,
    pub event: &'a Event,
    /// Repository the checkout action clones from.
    pub source: &'a Path,
    /// Parent of the per-run record directories.
    pub runs_dir: &'a Path,
}

/// Result of handing an event to the runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The trigger did not fire; no run was created.
    Skipped { reason: String },
    /// A run executed to completion.
    Finished {
        record: RunRecord,
        jobs: Vec<JobRecord>,
        dir: PathBuf,
    },
}

impl RunOutcome {
    pub fn status(&self) -> Option<RunStatus> {
        match self {
            Self::Skipped { .. } => None,
            Self::Finished { record, .. } => Some(record.status),
        }
    }
}

/// Evaluate the trigger and, if it fires, execute every job of the workflow.
///
/// `on_job` is called from worker threads as each job finishes.
#[instrument(skip_all, fields(event = %request.event.kind, git_ref = ?request.event.git_ref))]
pub fn execute_run<R, F>(runner: &R, request: &RunRequest<'_>, on_job: F) -> Result<RunOutcome>
where
    R: StepRunner + ?Sized,
    F: Fn(&JobRecord) + Sync,
{
    let RunRequest {
        workflow,
        config,
        event,
        source,
        runs_dir,
    } = *request;

    if let TriggerDecision::Skip { reason } = evaluate(workflow, event)? {
        info!(%reason, "trigger did not fire");
        return Ok(RunOutcome::Skipped { reason });
    }
    let waves = plan_waves(workflow)?;

    // Steps run inside their workspace, so the checkout source must not be relative.
    let source = fs::canonicalize(source)
        .with_context(|| format!("resolve source {}", source.display()))?;

    let start = Instant::now();
    let run_id = generate_run_id();
    let log = RunLog::new(runs_dir, &run_id);
    let git = Git::new(&source);
    let source_sha = if git.is_repository() {
        git.head_short_sha(12).ok()
    } else {
        None
    };

    let mut record = RunRecord {
        run_id: run_id.clone(),
        workflow: workflow.name.clone(),
        event: event.clone(),
        source_sha,
        status: RunStatus::Pending,
        started_at: Utc::now().to_rfc3339(),
        ended_at: None,
        duration_ms: None,
        jobs: Vec::new(),
    };
    record.status = transition(record.status, RunStatus::Running)?;
    log.write_run(&record)
        .with_context(|| format!("write run record {}", log.run_path.display()))?;
    info!(run_id = %run_id, waves = waves.len(), "run started");

    let ctx = RunContext {
        run_id: run_id.clone(),
        event: event.kind.to_string(),
        git_ref: event.branch().map(str::to_string),
        source,
        env: workflow.env.clone(),
    };

    let wave_ctx = WaveContext {
        ctx: &ctx,
        config,
        log: &log,
    };
    let results = match run_waves(runner, workflow, &waves, &wave_ctx, &on_job) {
        Ok(results) => results,
        Err(err) => {
            record.status = transition(record.status, RunStatus::Failed)?;
            record.ended_at = Some(Utc::now().to_rfc3339());
            record.duration_ms = Some(start.elapsed().as_millis() as u64);
            if let Err(write_err) = log.write_run(&record) {
                warn!(run_id = %run_id, err = %format!("{write_err:#}"), "could not record aborted run");
            }
            return Err(err.context(format!("run {run_id} aborted")));
        }
    };

    record.status = transition(record.status, aggregate(results.values().map(|j| j.status)))?;
    record.ended_at = Some(Utc::now().to_rfc3339());
    record.duration_ms = Some(start.elapsed().as_millis() as u64);
    record.jobs = results.values().map(JobRecord::summary).collect();
    log.write_run(&record)
        .with_context(|| format!("write run record {}", log.run_path.display()))?;
    info!(run_id = %run_id, status = ?record.status, "run finished");

    Ok(RunOutcome::Finished {
        record,
        jobs: results.into_values().collect(),
        dir: log.dir,
    })
}

/// Run every wave in order, skipping jobs whose `needs` did not succeed.
fn run_waves<R, F>(
    runner: &R,
    workflow: &Workflow,
    waves: &[Vec<String>],
    wave_ctx: &WaveContext<'_>,
    on_job: &F,
) -> Result<BTreeMap<String, JobRecord>>
where
    R: StepRunner + ?Sized,
    F: Fn(&JobRecord) + Sync,
{
    let mut finished: BTreeMap<String, JobStatus> = BTreeMap::new();
    let mut results: BTreeMap<String, JobRecord> = BTreeMap::new();
    for (index, wave) in waves.iter().enumerate() {
        let mut runnable = Vec::new();
        for name in wave {
            let job = workflow
                .jobs
                .get(name)
                .ok_or_else(|| anyhow!("scheduled unknown job {name}"))?;
            if blocked_by_needs(&job.needs, &finished) {
                debug!(job = %name, "dependency did not succeed; skipping");
                let skipped = skipped_job(name, job);
                wave_ctx.log.write_job(&skipped)?;
                on_job(&skipped);
                finished.insert(name.clone(), skipped.status);
                results.insert(name.clone(), skipped);
            } else {
                runnable.push((name.as_str(), job));
            }
        }
        debug!(wave = index, jobs = runnable.len(), "starting wave");

        for job in run_wave(runner, wave_ctx, runnable, on_job)? {
            finished.insert(job.name.clone(), job.status);
            results.insert(job.name.clone(), job);
        }
    }
    Ok(results)
}

struct WaveContext<'a> {
    ctx: &'a RunContext,
    config: &'a RunnerConfig,
    log: &'a RunLog,
}

/// Run independent jobs on a pool of scoped threads bounded by `max_parallel_jobs`.
fn run_wave<R, F>(
    runner: &R,
    wave: &WaveContext<'_>,
    jobs: Vec<(&str, &Job)>,
    on_job: &F,
) -> Result<Vec<JobRecord>>
where
    R: StepRunner + ?Sized,
    F: Fn(&JobRecord) + Sync,
{
    if jobs.is_empty() {
        return Ok(Vec::new());
    }
    let workers = match wave.config.max_parallel_jobs {
        0 => jobs.len(),
        limit => limit.min(jobs.len()),
    };
    let queue = Mutex::new(jobs.into_iter().collect::<VecDeque<_>>());
    let results = Mutex::new(Vec::new());

    let panicked = thread::scope(|scope| {
        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            handles.push(scope.spawn(|| {
                loop {
                    let next = queue.lock().ok().and_then(|mut q| q.pop_front());
                    let Some((name, job)) = next else {
                        break;
                    };
                    let result = run_job(
                        runner,
                        &JobRequest {
                            name,
                            job,
                            ctx: wave.ctx,
                            config: wave.config,
                            log: wave.log,
                        },
                    );
                    if let Ok(record) = &result {
                        on_job(record);
                    }
                    if let Ok(mut done) = results.lock() {
                        done.push(result);
                    }
                }
            }));
        }
        handles
            .into_iter()
            .map(|handle| handle.join())
            .filter(Result::is_err)
            .count()
    });
    if panicked > 0 {
        bail!("{panicked} job worker thread(s) panicked");
    }

    let results = results
        .into_inner()
        .map_err(|_| anyhow!("job results lock poisoned"))?;
    let mut records = results.into_iter().collect::<Result<Vec<_>>>()?;
    records.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(records)
}

/// New run id: `run-<UTC yyyymmdd_HHMMSS>-<6 lowercase alnum>`.
pub fn generate_run_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix = std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(6)
        .collect::<String>()
        .to_lowercase();
    format!("run-{}-{suffix}", Utc::now().format("%Y%m%d_%H%M%S"))
}

/// Load a stored run and its job records for display.
pub fn load_run_report(runs_dir: &Path, run_id: &str) -> Result<(RunRecord, Vec<JobRecord>)> {
    if run_id.is_empty() || run_id.contains(['/', '\\']) || run_id.starts_with('.') {
        bail!("invalid run id '{run_id}'");
    }
    let log = RunLog::new(runs_dir, run_id);
    if !log.run_path.is_file() {
        bail!("no run named {run_id} under {}", runs_dir.display());
    }
    let record = log.load_run()?;
    let jobs = record
        .jobs
        .iter()
        .map(|job| log.load_job(&job.name))
        .collect::<Result<Vec<_>>>()?;
    Ok((record, jobs))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::core::types::FailureKind;
    use crate::io::step_runner::{StepExecution, StepRequest};
    use crate::test_support::{ScriptedStepRunner, script_job, script_job_needing};
    use crate::workflow::{BranchFilter, Triggers, default_workflow};

    struct Fixture {
        temp: tempfile::TempDir,
        config: RunnerConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = tempfile::tempdir().expect("tempdir");
            let config = RunnerConfig {
                workspace_dir: Some(temp.path().join("envs")),
                ..RunnerConfig::default()
            };
            Self { temp, config }
        }

        fn runs_dir(&self) -> PathBuf {
            self.temp.path().join("runs")
        }

        fn run(
            &self,
            runner: &ScriptedStepRunner,
            workflow: &Workflow,
            event: &Event,
        ) -> RunOutcome {
            let runs_dir = self.runs_dir();
            execute_run(
                runner,
                &RunRequest {
                    workflow,
                    config: &self.config,
                    event,
                    source: self.temp.path(),
                    runs_dir: &runs_dir,
                },
                |_| {},
            )
            .expect("execute run")
        }
    }

    fn chain_workflow() -> Workflow {
        Workflow {
            name: Some("chain".to_string()),
            on: Triggers {
                push: Some(BranchFilter::default()),
                pull_request: None,
            },
            env: BTreeMap::new(),
            jobs: BTreeMap::from([
                ("build".to_string(), script_job(&["make build"])),
                (
                    "deploy".to_string(),
                    script_job_needing(&["make deploy"], &["build"]),
                ),
                ("lint".to_string(), script_job(&["make lint"])),
            ]),
        }
    }

    #[test]
    fn run_id_has_timestamp_and_suffix() {
        let id = generate_run_id();
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "run");
        assert_eq!(parts[1].len(), "20260101_000000".len());
        assert_eq!(parts[2].len(), 6);
        assert!(
            parts[2]
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        );
    }

    #[test]
    fn skipped_trigger_creates_no_run() {
        let fixture = Fixture::new();
        let runner = ScriptedStepRunner::default();
        let outcome = fixture.run(&runner, &default_workflow(), &Event::push("feature/x"));

        assert!(matches!(outcome, RunOutcome::Skipped { .. }));
        assert_eq!(outcome.status(), None);
        assert!(runner.calls().is_empty());
        assert!(!fixture.runs_dir().exists());
    }

    #[test]
    fn failed_dependency_skips_dependent_job() {
        let fixture = Fixture::new();
        let runner = ScriptedStepRunner::default().fail("make build", 2, "boom");
        let outcome = fixture.run(&runner, &chain_workflow(), &Event::push("main"));

        let RunOutcome::Finished { record, jobs, .. } = outcome else {
            panic!("expected a run");
        };
        assert_eq!(record.status, RunStatus::Failed);
        let statuses: BTreeMap<&str, JobStatus> =
            jobs.iter().map(|j| (j.name.as_str(), j.status)).collect();
        assert_eq!(statuses["build"], JobStatus::Failed);
        assert_eq!(statuses["deploy"], JobStatus::Skipped);
        assert_eq!(statuses["lint"], JobStatus::Succeeded);
        assert!(!runner.calls().iter().any(|c| c.starts_with("deploy")));
    }

    #[test]
    fn dependent_job_runs_after_success() {
        let fixture = Fixture::new();
        let runner = ScriptedStepRunner::default();
        let outcome = fixture.run(&runner, &chain_workflow(), &Event::push("main"));

        assert_eq!(outcome.status(), Some(RunStatus::Succeeded));
        let calls = runner.calls();
        let build = calls.iter().position(|c| c == "build#0").expect("build ran");
        let deploy = calls.iter().position(|c| c == "deploy#0").expect("deploy ran");
        assert!(build < deploy);
    }

    #[test]
    fn records_are_written_and_reloadable() {
        let fixture = Fixture::new();
        let runner = ScriptedStepRunner::default().fail("cargo fmt -- --check", 1, "Diff in");
        let outcome = fixture.run(&runner, &default_workflow(), &Event::push("main"));

        let RunOutcome::Finished { record, jobs, dir } = outcome else {
            panic!("expected a run");
        };
        assert!(dir.join("run.json").is_file());
        let (loaded, loaded_jobs) =
            load_run_report(&fixture.runs_dir(), &record.run_id).expect("load");
        assert_eq!(loaded, record);
        assert_eq!(loaded_jobs, jobs);
        assert_eq!(loaded.jobs[0].failure, Some(FailureKind::FormatViolation));
        assert!(loaded.ended_at.is_some());
    }

    #[test]
    fn rejects_unknown_or_unsafe_run_ids() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(load_run_report(temp.path(), "run-missing").is_err());
        assert!(load_run_report(temp.path(), "../etc").is_err());
        assert!(load_run_report(temp.path(), "").is_err());
    }

    #[test]
    fn parallelism_limit_serializes_jobs() {
        struct Counting {
            active: AtomicUsize,
            peak: AtomicUsize,
        }
        impl StepRunner for Counting {
            fn run(&self, _request: &StepRequest<'_>) -> Result<StepExecution> {
                let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(std::time::Duration::from_millis(20));
                self.active.fetch_sub(1, Ordering::SeqCst);
                Ok(StepExecution {
                    exit_code: Some(0),
                    timed_out: false,
                    output: String::new(),
                    duration: std::time::Duration::from_millis(20),
                })
            }
        }

        let mut fixture = Fixture::new();
        fixture.config.max_parallel_jobs = 1;
        let runner = Counting {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        };
        let runs_dir = fixture.runs_dir();
        let workflow = default_workflow();
        let event = Event::push("main");
        let outcome = execute_run(
            &runner,
            &RunRequest {
                workflow: &workflow,
                config: &fixture.config,
                event: &event,
                source: fixture.temp.path(),
                runs_dir: &runs_dir,
            },
            |_| {},
        )
        .expect("run");

        assert_eq!(outcome.status(), Some(RunStatus::Succeeded));
        assert_eq!(runner.peak.load(Ordering::SeqCst), 1);
    }

    fn only_run_record(runs_dir: &Path) -> RunRecord {
        let dirs: Vec<PathBuf> = fs::read_dir(runs_dir)
            .expect("runs dir")
            .map(|entry| entry.expect("entry").path())
            .collect();
        assert_eq!(dirs.len(), 1, "{dirs:?}");
        let id = dirs[0].file_name().expect("name").to_string_lossy().to_string();
        RunLog::new(runs_dir, &id).load_run().expect("run record")
    }

    fn aborting_run<R: StepRunner>(runner: &R) -> (Fixture, anyhow::Error) {
        let fixture = Fixture::new();
        let runs_dir = fixture.runs_dir();
        let workflow = default_workflow();
        let event = Event::push("main");
        let err = execute_run(
            runner,
            &RunRequest {
                workflow: &workflow,
                config: &fixture.config,
                event: &event,
                source: fixture.temp.path(),
                runs_dir: &runs_dir,
            },
            |_| {},
        )
        .unwrap_err();
        (fixture, err)
    }

    #[test]
    fn unwritable_job_record_still_finalizes_run_as_failed() {
        // Occupies the temp path `write_job` renames from, so the final job record fails.
        struct BlockJobRecord;
        impl StepRunner for BlockJobRecord {
            fn run(&self, request: &StepRequest<'_>) -> Result<StepExecution> {
                let job_dir = request.log_path.parent().expect("job dir");
                fs::create_dir_all(job_dir.join("job.json.tmp")).expect("block");
                Ok(StepExecution {
                    exit_code: Some(0),
                    timed_out: false,
                    output: String::new(),
                    duration: std::time::Duration::from_millis(1),
                })
            }
        }

        let (fixture, err) = aborting_run(&BlockJobRecord);
        assert!(format!("{err:#}").contains("aborted"), "{err:#}");

        let record = only_run_record(&fixture.runs_dir());
        assert_eq!(record.status, RunStatus::Failed);
        assert!(record.ended_at.is_some());
        assert!(record.duration_ms.is_some());
    }

    #[test]
    fn panicking_step_runner_fails_the_run_instead_of_aborting() {
        struct Panics;
        impl StepRunner for Panics {
            fn run(&self, _request: &StepRequest<'_>) -> Result<StepExecution> {
                panic!("runner bug");
            }
        }

        let (fixture, err) = aborting_run(&Panics);
        assert!(format!("{err:#}").contains("panicked"), "{err:#}");
        assert_eq!(only_run_record(&fixture.runs_dir()).status, RunStatus::Failed);
    }
}
