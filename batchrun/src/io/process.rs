//! Child process execution with an optional runtime limit and bounded output.

use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    /// Stdout split into lines (line terminators removed).
    pub stdout_lines: Vec<String>,
    pub stderr: Vec<u8>,
    /// Bytes dropped from stdout and stderr beyond the output limit.
    pub truncated: usize,
    pub timed_out: bool,
    pub elapsed: Duration,
}

/// Run `cmd`, killing it once `max_runtime` elapses.
///
/// Stdout and stderr are drained on reader threads while the child runs, so
/// a chatty child cannot block on a full pipe. Each stream keeps at most
/// `output_limit_bytes`; the rest is counted and discarded.
#[instrument(skip_all, fields(max_runtime = ?max_runtime, output_limit_bytes = output_limit_bytes))]
pub fn run_command(
    mut cmd: Command,
    max_runtime: Option<Duration>,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!(command = ?cmd, "spawning child process");
    let started = Instant::now();
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).with_context(|| format!("spawn {:?}", cmd.get_program()));
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

    let stdout_handle = thread::spawn(move || read_lines_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_bytes_limited(stderr, output_limit_bytes));

    let (status, timed_out) = wait_with_limit(&mut child, max_runtime)?;

    let (stdout_lines, stdout_truncated) = join_reader(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_reader(stderr_handle).context("join stderr")?;
    let truncated = stdout_truncated + stderr_truncated;
    if truncated > 0 {
        warn!(truncated, "command output truncated");
    }

    let elapsed = started.elapsed();
    debug!(exit_code = ?status.code(), timed_out, elapsed_ms = elapsed.as_millis() as u64, "command finished");
    Ok(CommandOutput {
        status,
        stdout_lines,
        stderr,
        truncated,
        timed_out,
        elapsed,
    })
}

fn wait_with_limit(child: &mut Child, max_runtime: Option<Duration>) -> Result<(ExitStatus, bool)> {
    let Some(limit) = max_runtime else {
        return Ok((child.wait().context("wait for command")?, false));
    };
    match child.wait_timeout(limit).context("wait for command")? {
        Some(status) => Ok((status, false)),
        None => {
            warn!(max_runtime_secs = limit.as_secs(), "command exceeded maximum runtime, killing");
            child.kill().context("kill command")?;
            let status = child.wait().context("wait command after kill")?;
            Ok((status, true))
        }
    }
}

fn join_reader<T>(handle: thread::JoinHandle<Result<(T, usize)>>) -> Result<(T, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_lines_limited<R: Read>(reader: R, limit: usize) -> Result<(Vec<String>, usize)> {
    let mut reader = BufReader::new(reader);
    let mut lines = Vec::new();
    let mut kept = 0usize;
    let mut truncated = 0usize;
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let n = reader.read_until(b'\n', &mut buf).context("read stdout line")?;
        if n == 0 {
            break;
        }
        if kept + n > limit {
            truncated += n;
            continue;
        }
        kept += n;
        let line = String::from_utf8_lossy(&buf);
        lines.push(line.trim_end_matches(['\r', '\n']).to_string());
    }

    Ok((lines, truncated))
}

fn read_bytes_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read stderr")?;
        if n == 0 {
            break;
        }
        let keep = n.min(limit.saturating_sub(buf.len()));
        buf.extend_from_slice(&chunk[..keep]);
        truncated += n - keep;
    }

    Ok((buf, truncated))
}
