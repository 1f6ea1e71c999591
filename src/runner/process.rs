//! Local process runner
//!
//! Runs a command line through a shell in a fresh process group. The whole
//! group is killed when the wall-clock limit fires, and swept again after a
//! normal exit so that background descendants never outlive the job.

use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::resource::{getrlimit, setrlimit, Resource};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{CommandSpec, RunLimits, RunOutcome, RunStatus, Runner};

/// How long to keep draining output after the process group is gone
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Runner that spawns commands as local child processes
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    shell: String,
}

impl ProcessRunner {
    /// Runner using bash when it is on PATH, plain sh otherwise
    pub fn new() -> Self {
        let shell = if which::which("bash").is_ok() { "bash" } else { "sh" };
        Self::with_shell(shell)
    }

    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Runner for ProcessRunner {
    async fn run(
        &self,
        cmd: &CommandSpec,
        limits: &RunLimits,
        stdin: Option<&str>,
    ) -> Result<RunOutcome> {
        let mut command = Command::new(&self.shell);
        command
            .arg("-c")
            .arg(&cmd.script)
            .current_dir(&cmd.work_dir)
            .envs(cmd.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .process_group(0);
        apply_rlimits(&mut command, limits)?;

        let started = Instant::now();
        let mut child = command
            .spawn()
            .with_context(|| format!("Failed to spawn {}", self.shell))?;
        let pgid = child.id().map(|id| Pid::from_raw(id as i32));
        debug!(pid = ?child.id(), "Spawned command: {}", cmd.script);

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            let input = input.to_owned();
            tokio::spawn(async move {
                // The child may exit without reading everything
                let _ = pipe.write_all(input.as_bytes()).await;
            });
        }

        let (stdout_buf, stdout_task) =
            spawn_reader(child.stdout.take(), limits.output_limit_bytes);
        let (stderr_buf, stderr_task) =
            spawn_reader(child.stderr.take(), limits.output_limit_bytes);

        let waited = tokio::time::timeout(limits.timeout, child.wait()).await;
        let elapsed = started.elapsed();

        if let Some(pgid) = pgid {
            kill_group(pgid);
        }

        let status = match waited {
            Ok(Ok(status)) => status_of(status),
            Ok(Err(e)) => return Err(e).context("Failed to wait for command"),
            Err(_) => {
                debug!(pid = ?pgid, "Command timed out after {:?}", limits.timeout);
                if let Err(e) = child.wait().await {
                    warn!("Failed to reap timed out command: {}", e);
                }
                RunStatus::TimedOut
            }
        };

        let stdout = finish_reader(stdout_buf, stdout_task).await;
        let stderr = finish_reader(stderr_buf, stderr_task).await;

        Ok(RunOutcome {
            status,
            elapsed,
            stdout: String::from_utf8_lossy(&stdout.bytes).into_owned(),
            stderr: String::from_utf8_lossy(&stderr.bytes).into_owned(),
            truncated: stdout.truncated || stderr.truncated,
        })
    }
}

fn status_of(status: ExitStatus) -> RunStatus {
    match (status.code(), status.signal()) {
        (Some(code), _) => RunStatus::Exited(code),
        (None, Some(signal)) => RunStatus::Signaled(signal),
        (None, None) => RunStatus::Exited(-1),
    }
}

/// SIGKILL every process in the group. A group that is already gone is fine.
fn kill_group(pgid: Pid) {
    match killpg(pgid, Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!("Failed to kill process group {}: {}", pgid, e),
    }
}

/// Install rlimits to be applied in the child between fork and exec.
///
/// Requested ceilings are capped at the current hard limit, since an
/// unprivileged process cannot raise it.
fn apply_rlimits(command: &mut Command, limits: &RunLimits) -> Result<()> {
    let open_files = limits
        .open_files
        .map(|n| capped(Resource::RLIMIT_NOFILE, n))
        .transpose()?;
    let memory = limits
        .memory_bytes
        .map(|bytes| capped(Resource::RLIMIT_AS, bytes))
        .transpose()?;

    // SAFETY: the closure only calls setrlimit, which is async-signal-safe.
    unsafe {
        command.pre_exec(move || {
            setrlimit(Resource::RLIMIT_CORE, 0, 0)?;
            if let Some(n) = open_files {
                setrlimit(Resource::RLIMIT_NOFILE, n, n)?;
            }
            if let Some(bytes) = memory {
                setrlimit(Resource::RLIMIT_AS, bytes, bytes)?;
            }
            Ok(())
        });
    }

    Ok(())
}

fn capped(resource: Resource, wanted: u64) -> Result<u64> {
    let (_, hard) = getrlimit(resource).with_context(|| format!("getrlimit {:?}", resource))?;
    Ok(wanted.min(hard))
}

#[derive(Debug, Default)]
struct Capture {
    bytes: Vec<u8>,
    truncated: bool,
}

type SharedCapture = Arc<Mutex<Capture>>;

/// Drain a pipe to EOF, keeping at most `limit` bytes
fn spawn_reader<R>(reader: Option<R>, limit: usize) -> (SharedCapture, Option<JoinHandle<()>>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let capture = SharedCapture::default();
    let handle = reader.map(|mut reader| {
        let capture = capture.clone();
        tokio::spawn(async move {
            let mut buf = [0u8; 8192];
            loop {
                let n = match reader.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                let mut guard = capture.lock().unwrap_or_else(PoisonError::into_inner);
                let room = limit.saturating_sub(guard.bytes.len());
                if n > room {
                    guard.truncated = true;
                }
                guard.bytes.extend_from_slice(&buf[..n.min(room)]);
            }
        })
    });
    (capture, handle)
}

async fn finish_reader(capture: SharedCapture, handle: Option<JoinHandle<()>>) -> Capture {
    if let Some(mut handle) = handle {
        if tokio::time::timeout(DRAIN_GRACE, &mut handle).await.is_err() {
            warn!("Output pipe still open after the process group exited, abandoning it");
            handle.abort();
        }
    }
    let mut capture = capture.lock().unwrap_or_else(PoisonError::into_inner);
    std::mem::take(&mut *capture)
}
