//! `cirun` command-line entry point.
//!
//! Product output (decisions, job lines, run summaries) goes to stdout;
//! diagnostics go to stderr through `tracing`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};

use cirun::core::trigger::{TriggerDecision, evaluate};
use cirun::core::types::{Event, RunStatus};
use cirun::exit_codes;
use cirun::io::git::Git;
use cirun::io::init::{CirunPaths, InitOptions, init_project};
use cirun::io::run_log::JobRecord;
use cirun::io::step_runner::HostStepRunner;
use cirun::logging;
use cirun::run::{RunOutcome, RunRequest, execute_run, load_run_report};
use cirun::validate::{load_project, validate_project};

#[derive(Parser, Debug)]
#[command(
    name = "cirun",
    version,
    about = "Event-triggered CI workflow runner"
)]
struct Cli {
    /// Project root containing `.cirun/`.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create `.cirun/` with the default workflow and config.
    Init {
        /// Overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },
    /// Check config and workflow; print the job schedule.
    Validate,
    /// Print whether an event would start a run, without executing anything.
    Trigger(EventArgs),
    /// Evaluate an event and execute the run if the trigger fires.
    Run {
        #[command(flatten)]
        event: EventArgs,

        /// Repository the checkout action clones from (defaults to `--root`).
        #[arg(long)]
        source: Option<PathBuf>,
    },
    /// Print a stored run record.
    Show {
        /// Run id, e.g. `run-20260101_120000-abc123`.
        run_id: String,
    },
}

#[derive(Args, Debug)]
struct EventArgs {
    /// Event kind.
    #[arg(long, value_enum)]
    event: EventArg,

    /// Branch or ref of the event (defaults to the current branch for push).
    #[arg(long = "ref")]
    git_ref: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum EventArg {
    Push,
    PullRequest,
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force } => cmd_init(&cli.root, force),
        Command::Validate => cmd_validate(&cli.root),
        Command::Trigger(args) => cmd_trigger(&cli.root, &args),
        Command::Run { event, source } => cmd_run(&cli.root, &event, source.as_deref()),
        Command::Show { run_id } => cmd_show(&cli.root, &run_id),
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = init_project(root, &InitOptions { force })?;
    println!("initialized {}", paths.cirun_dir.display());
    Ok(exit_codes::OK)
}

fn cmd_validate(root: &Path) -> Result<i32> {
    let outcome = validate_project(root)?;
    println!("ok: {} job(s)", outcome.jobs);
    for (index, wave) in outcome.waves.iter().enumerate() {
        println!("wave {index}: {}", wave.join(", "));
    }
    Ok(exit_codes::OK)
}

fn cmd_trigger(root: &Path, args: &EventArgs) -> Result<i32> {
    let project = load_project(root)?;
    let event = resolve_event(root, args)?;
    match evaluate(&project.workflow, &event)? {
        TriggerDecision::Run { jobs } => println!("run: {}", jobs.join(", ")),
        TriggerDecision::Skip { reason } => println!("skip: {reason}"),
    }
    Ok(exit_codes::OK)
}

fn cmd_run(root: &Path, args: &EventArgs, source: Option<&Path>) -> Result<i32> {
    let project = load_project(root)?;
    let event = resolve_event(root, args)?;
    let runner = HostStepRunner::new(project.config.shell.clone())?;
    let outcome = execute_run(
        &runner,
        &RunRequest {
            workflow: &project.workflow,
            config: &project.config,
            event: &event,
            source: source.unwrap_or(root),
            runs_dir: &project.paths.runs_dir,
        },
        |job| println!("{}", job_line(job)),
    )?;

    match outcome {
        RunOutcome::Skipped { reason } => {
            println!("skip: {reason}");
            Ok(exit_codes::OK)
        }
        RunOutcome::Finished { record, dir, .. } => {
            println!("run {}: {}", record.run_id, record.status);
            println!("records: {}", dir.display());
            if record.status == RunStatus::Succeeded {
                Ok(exit_codes::OK)
            } else {
                Ok(exit_codes::RUN_FAILED)
            }
        }
    }
}

fn cmd_show(root: &Path, run_id: &str) -> Result<i32> {
    let paths = CirunPaths::new(root);
    let (record, jobs) = load_run_report(&paths.runs_dir, run_id)?;
    let git_ref = record.event.git_ref.as_deref().unwrap_or("-");
    println!(
        "run {}: {} ({} {git_ref})",
        record.run_id, record.status, record.event.kind
    );
    println!("started: {}", record.started_at);
    if let Some(ended) = &record.ended_at {
        println!("ended: {ended}");
    }
    for job in &jobs {
        println!("{}", job_line(job));
        for step in &job.steps {
            match &step.log {
                Some(log) => println!(
                    "  {:>2}. {} [{}] {}",
                    step.index + 1,
                    step.name,
                    step.status,
                    paths.run_dir(run_id).join(log).display()
                ),
                None => println!("  {:>2}. {} [{}]", step.index + 1, step.name, step.status),
            }
        }
    }
    Ok(exit_codes::OK)
}

fn resolve_event(root: &Path, args: &EventArgs) -> Result<Event> {
    match args.event {
        EventArg::Push => {
            let git_ref = match &args.git_ref {
                Some(git_ref) => git_ref.clone(),
                None => Git::new(root)
                    .current_branch()
                    .context("determine branch for push event")?,
            };
            Ok(Event::push(git_ref))
        }
        EventArg::PullRequest => Ok(Event::pull_request(args.git_ref.clone())),
    }
}

fn job_line(job: &JobRecord) -> String {
    let mut line = format!("{}: {}", job.name, job.status);
    if let Some(failure) = job.failure {
        line.push_str(&format!(" ({failure})"));
    }
    if let Some(err) = &job.error {
        line.push_str(&format!(": {err}"));
    }
    line
}
