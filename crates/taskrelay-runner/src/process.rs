use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use crate::CommandSpec;
use crate::error::RunnerError;

/// Maximum number of stderr bytes kept for diagnostics
pub const STDERR_TAIL_BYTES: usize = 2048;

/// Output from a process execution.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Exit code from the process (None if terminated by signal)
    pub exit_code: Option<i32>,
}

impl ProcessOutput {
    #[must_use]
    pub fn new(stdout: Vec<u8>, stderr: Vec<u8>, exit_code: Option<i32>) -> Self {
        Self {
            stdout,
            stderr,
            exit_code,
        }
    }

    /// Get stdout as a UTF-8 string, lossy conversion.
    #[must_use]
    pub fn stdout_string(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    /// Last [`STDERR_TAIL_BYTES`] of stderr, lossy and trimmed.
    #[must_use]
    pub fn stderr_tail(&self) -> String {
        let start = self.stderr.len().saturating_sub(STDERR_TAIL_BYTES);
        String::from_utf8_lossy(&self.stderr[start..])
            .trim()
            .to_string()
    }

    /// Check if the process exited successfully (exit code 0).
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Async process execution.
///
/// A non-zero exit is not an error at this layer: callers inspect
/// [`ProcessOutput::exit_code`]. Dropping the returned future kills the child
/// and, on unix, every process in its group.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, cmd: &CommandSpec, timeout: Duration) -> Result<ProcessOutput, RunnerError>;
}

/// [`ProcessRunner`] backed by `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioProcessRunner;

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, cmd: &CommandSpec, timeout: Duration) -> Result<ProcessOutput, RunnerError> {
        let program = cmd.program.to_string_lossy().to_string();
        debug!(%program, args = cmd.args.len(), timeout_secs = timeout.as_secs(), "Spawning process");

        let child = cmd
            .to_tokio_command()
            .spawn()
            .map_err(|e| RunnerError::SpawnFailed {
                program: program.clone(),
                reason: e.to_string(),
            })?;

        // Armed until the child exits on its own. Timeout, wait failure or
        // dropping this future (cancellation) kills the whole group.
        let mut group = GroupKill::new(child.id());

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                group.disarm();
                Ok(ProcessOutput::new(
                    output.stdout,
                    output.stderr,
                    output.status.code(),
                ))
            }
            Ok(Err(e)) => Err(RunnerError::WaitFailed {
                program,
                reason: e.to_string(),
            }),
            Err(_) => Err(RunnerError::Timeout {
                timeout_seconds: timeout.as_secs(),
            }),
        }
    }
}

/// Kills the process group led by `pid` on drop.
///
/// Children are spawned as group leaders, so this also reaches anything a
/// shell template forked (pipelines, subshells, `cd dir && tool`).
struct GroupKill {
    pid: Option<u32>,
}

impl GroupKill {
    fn new(pid: Option<u32>) -> Self {
        Self { pid }
    }

    fn disarm(&mut self) {
        self.pid = None;
    }
}

impl Drop for GroupKill {
    fn drop(&mut self) {
        if let Some(pid) = self.pid.take() {
            kill_process_group(pid);
        }
    }
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) => debug!(pgid = raw, "Killed process group"),
        Err(Errno::ESRCH) => {}
        Err(e) => tracing::warn!(pgid = raw, error = %e, "Failed to kill process group"),
    }
}

// The direct child is still killed through `kill_on_drop`.
#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}
