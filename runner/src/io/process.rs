//! Helpers for running child processes with timeouts and bounded output.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

type SharedLog = Arc<Option<Mutex<BufWriter<File>>>>;

/// Captured child process output.
#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
    pub duration: Duration,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.success()
    }

    /// Captured stdout followed by stderr, lossily decoded.
    pub fn combined_text(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&self.stderr));
        text
    }
}

/// Limits applied to a single child process.
#[derive(Debug, Clone, Copy)]
pub struct ProcessLimits {
    pub timeout: Duration,
    /// Bytes of stdout (and separately stderr) kept in memory.
    pub output_limit_bytes: usize,
}

/// Run `cmd` with a timeout, draining stdout/stderr concurrently.
///
/// When `log_path` is set, every output line of both streams is appended to
/// that file as it arrives; the in-memory copy is bounded by
/// `limits.output_limit_bytes` while the log keeps everything.
#[instrument(skip_all, fields(timeout_secs = limits.timeout.as_secs(), logging = log_path.is_some()))]
pub fn run_process(
    mut cmd: Command,
    limits: ProcessLimits,
    log_path: Option<&Path>,
) -> Result<ProcessOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // Own process group so a timeout also reaches grandchildren holding the pipes.
        cmd.process_group(0);
    }

    let log: SharedLog = Arc::new(match log_path {
        Some(path) => Some(Mutex::new(BufWriter::new(open_log(path)?))),
        None => None,
    });

    let started = Instant::now();
    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let limit = limits.output_limit_bytes;
    let stdout_log = Arc::clone(&log);
    let stderr_log = Arc::clone(&log);
    let stdout_handle = thread::spawn(move || read_stream_limited(stdout, limit, &stdout_log));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, limit, &stderr_log));

    let mut timed_out = false;
    let status = match child
        .wait_timeout(limits.timeout)
        .context("wait for command")?
    {
        Some(status) => {
            // Background processes left behind would hold the pipes open.
            kill_group(child.id());
            status
        }
        None => {
            warn!(
                timeout_secs = limits.timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
            kill_tree(&mut child);
            child.wait().context("wait command after kill")?
        }
    };

    let (stdout, stdout_truncated) = join_output(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;

    if let Some(mutex) = log.as_ref() {
        let mut writer = mutex
            .lock()
            .map_err(|_| anyhow!("log writer lock poisoned"))?;
        if timed_out {
            writeln!(writer, "[timed out after {}s]", limits.timeout.as_secs())
                .context("write timeout notice")?;
        }
        writer.flush().context("flush step log")?;
    }

    if stdout_truncated > 0 || stderr_truncated > 0 {
        debug!(stdout_truncated, stderr_truncated, "in-memory output truncated");
    }

    let duration = started.elapsed();
    debug!(exit_code = ?status.code(), timed_out, duration_ms = duration.as_millis() as u64, "command finished");
    Ok(ProcessOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
        duration,
    })
}

fn kill_tree(child: &mut Child) {
    kill_group(child.id());
    if let Err(err) = child.kill() {
        debug!(err = %err, "kill after group signal");
    }
}

/// SIGKILL every process left in the group led by `pid`.
fn kill_group(pid: u32) {
    #[cfg(unix)]
    {
        let group = format!("-{pid}");
        match Command::new("kill")
            .args(["-KILL", "--", &group])
            .stderr(Stdio::null())
            .status()
        {
            Ok(status) if status.success() => debug!(pid, "killed leftover process group"),
            Ok(_) => {}
            Err(err) => debug!(err = %err, "could not signal process group"),
        }
    }
    #[cfg(not(unix))]
    let _ = pid;
}

fn open_log(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create log dir {}", parent.display()))?;
    }
    File::options()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open step log {}", path.display()))
}

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

/// Read a stream line by line, keeping at most `limit` bytes and tee-ing to the log.
fn read_stream_limited<R: Read>(
    reader: R,
    limit: usize,
    log: &SharedLog,
) -> Result<(Vec<u8>, usize)> {
    let mut buf_reader = BufReader::new(reader);
    let mut collected = Vec::new();
    let mut truncated = 0usize;

    loop {
        let mut line = Vec::new();
        let n = buf_reader
            .read_until(b'\n', &mut line)
            .context("read output")?;
        if n == 0 {
            break;
        }

        if let Some(mutex) = log.as_ref()
            && let Ok(mut writer) = mutex.lock()
            && let Err(e) = writer.write_all(&line).and_then(|()| writer.flush())
        {
            warn!(err = %e, "failed to write step log");
        }

        let remaining = limit.saturating_sub(collected.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            collected.extend_from_slice(&line[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((collected, truncated))
}
