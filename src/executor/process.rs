//! Child-process supervision.
//!
//! Spawns the interpreter, drains stdout/stderr concurrently under the
//! timeout, and kills the whole process group when time runs out.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::platform::Platform;

/// How often peak memory is sampled while the child runs.
const MEMORY_SAMPLE_INTERVAL: Duration = Duration::from_millis(25);

/// Failures while supervising a child. Timeouts are not errors; see
/// [`RunOutcome::TimedOut`].
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("child {0} pipe was not captured")]
    MissingPipe(&'static str),

    #[error("failed while waiting for the child: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything needed to launch one child.
#[derive(Debug)]
pub struct Invocation<'a> {
    pub program: &'a Path,
    pub args: Vec<OsString>,
    pub env: &'a [(OsString, OsString)],
    pub work_dir: &'a Path,
    pub timeout: Duration,
    pub address_space_limit: Option<u64>,
}

/// Output of a child that exited on its own.
#[derive(Debug)]
pub struct CompletedProcess {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub peak_memory: Option<u64>,
}

/// How a supervised child ended.
#[derive(Debug)]
pub enum RunOutcome {
    Completed(CompletedProcess),
    /// Killed at the deadline. Carries whatever stdout arrived before that.
    TimedOut {
        partial_stdout: String,
        peak_memory: Option<u64>,
    },
}

/// Run a child to completion or until `invocation.timeout` expires.
pub async fn run(invocation: &Invocation<'_>, platform: &Platform) -> Result<RunOutcome, ProcessError> {
    let mut cmd = Command::new(invocation.program);
    cmd.args(&invocation.args)
        .env_clear()
        .envs(invocation.env.iter().map(|(k, v)| (k, v)))
        .current_dir(invocation.work_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    platform.configure_command(&mut cmd, invocation.address_space_limit);

    let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
        program: invocation.program.display().to_string(),
        source,
    })?;
    let pid = child.id();
    debug!(?pid, "Spawned child");

    let sampler = MemorySampler::start(pid, platform.memory_sampling);

    // Take pipe handles out so `child` stays usable for kill-on-timeout
    let mut child_stdout = child.stdout.take().ok_or(ProcessError::MissingPipe("stdout"))?;
    let mut child_stderr = child.stderr.take().ok_or(ProcessError::MissingPipe("stderr"))?;

    // Buffers live outside the timed future so a timeout keeps partial output.
    let mut stdout_buf = Vec::new();
    let mut stderr_buf = Vec::new();
    let finished = {
        let drain_and_wait = async {
            let (r1, r2) = tokio::join!(
                child_stdout.read_to_end(&mut stdout_buf),
                child_stderr.read_to_end(&mut stderr_buf),
            );
            r1?;
            r2?;
            child.wait().await
        };
        tokio::time::timeout(invocation.timeout, drain_and_wait).await
    };

    match finished {
        Ok(Ok(status)) => {
            let peak_memory = sampler.finish();
            debug!(exit_code = ?status.code(), "Child exited");
            Ok(RunOutcome::Completed(CompletedProcess {
                status,
                stdout: String::from_utf8_lossy(&stdout_buf).into_owned(),
                stderr: String::from_utf8_lossy(&stderr_buf).into_owned(),
                peak_memory,
            }))
        }
        Ok(Err(e)) => {
            terminate(&mut child, pid, platform).await;
            sampler.finish();
            Err(ProcessError::Io(e))
        }
        Err(_) => {
            warn!(?pid, timeout = ?invocation.timeout, "Child timed out, killing process group");
            terminate(&mut child, pid, platform).await;
            Ok(RunOutcome::TimedOut {
                partial_stdout: String::from_utf8_lossy(&stdout_buf).into_owned(),
                peak_memory: sampler.finish(),
            })
        }
    }
}

/// Kill the child's process group, then the child itself, and reap it.
async fn terminate(child: &mut tokio::process::Child, pid: Option<u32>, platform: &Platform) {
    platform.kill_process_group(pid);
    let _ = child.kill().await;
}

/// Check that `program` starts and exits cleanly within `timeout`.
pub async fn probe(program: &Path, args: &[&str], timeout: Duration) -> bool {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            debug!(program = %program.display(), error = %e, "Probe failed to spawn");
            return false;
        }
    };

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => status.success(),
        Ok(Err(e)) => {
            debug!(program = %program.display(), error = %e, "Probe wait failed");
            false
        }
        Err(_) => {
            let _ = child.kill().await;
            debug!(program = %program.display(), "Probe timed out");
            false
        }
    }
}

/// Polls `/proc/<pid>/status` for the child's high-water resident set.
struct MemorySampler {
    peak: Arc<AtomicU64>,
    task: Option<JoinHandle<()>>,
}

impl MemorySampler {
    fn start(pid: Option<u32>, enabled: bool) -> Self {
        let peak = Arc::new(AtomicU64::new(0));
        let task = pid.filter(|_| enabled).map(|pid| {
            let peak = Arc::clone(&peak);
            let status_path = PathBuf::from(format!("/proc/{pid}/status"));
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(MEMORY_SAMPLE_INTERVAL);
                loop {
                    ticker.tick().await;
                    match tokio::fs::read_to_string(&status_path).await {
                        Ok(status) => {
                            if let Some(bytes) = parse_vm_hwm(&status) {
                                peak.fetch_max(bytes, Ordering::Relaxed);
                            }
                        }
                        Err(_) => break,
                    }
                }
            })
        });
        Self { peak, task }
    }

    /// Stop sampling and return the peak, if any sample succeeded.
    fn finish(self) -> Option<u64> {
        if let Some(task) = self.task {
            task.abort();
        }
        match self.peak.load(Ordering::Relaxed) {
            0 => None,
            bytes => Some(bytes),
        }
    }
}

/// Extract `VmHWM` (reported in kB) from a procfs status file, in bytes.
fn parse_vm_hwm(status: &str) -> Option<u64> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("VmHWM:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb * 1024)
}
