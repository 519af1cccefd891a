//! Child process execution.
//!
//! Programs are always started directly with an argument vector; no shell is
//! involved, so argument text is never interpreted.

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::errors::ProcessError;

/// Captured result of a finished (or timed-out) child.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Standard output, lossily decoded.
    pub stdout: String,
    /// Standard error, lossily decoded.
    pub stderr: String,
    /// Exit code, `-1` when killed by a signal or timed out.
    pub exit_code: i32,
    /// Wall-clock time spent.
    pub duration_ms: u64,
    /// Whether the deadline elapsed before exit.
    pub timed_out: bool,
}

impl ProcessOutput {
    /// Exited with code 0 before the deadline.
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}

/// Runs host programs. Faked in tests.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run `program` to completion and capture its output.
    async fn run(&self, program: &str, args: &[&str]) -> Result<ProcessOutput, ProcessError>;

    /// Start `program` without waiting for it.
    fn spawn_detached(&self, program: &str, args: &[&str]) -> Result<(), ProcessError>;
}

/// Real subprocess execution backed by `tokio::process::Command`.
pub struct TokioProcessRunner {
    timeout: Duration,
}

impl TokioProcessRunner {
    /// Runner whose [`run`](ProcessRunner::run) calls give up after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for TokioProcessRunner {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<ProcessOutput, ProcessError> {
        let start = Instant::now();

        let mut cmd = tokio::process::Command::new(program);
        let _ = cmd
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| ProcessError::Spawn {
            program: program.to_owned(),
            message: e.to_string(),
        })?;

        let output = tokio::select! {
            result = child.wait_with_output() => {
                result.map_err(|e| ProcessError::Wait {
                    program: program.to_owned(),
                    message: e.to_string(),
                })?
            }
            () = tokio::time::sleep(self.timeout) => {
                let timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(program, timeout_ms, "process timed out");
                return Ok(ProcessOutput {
                    stdout: String::new(),
                    stderr: "process timed out".into(),
                    exit_code: -1,
                    duration_ms: elapsed_ms(start),
                    timed_out: true,
                });
            }
        };

        let duration_ms = elapsed_ms(start);
        let exit_code = output.status.code().unwrap_or(-1);
        debug!(program, exit_code, duration_ms, "process completed");

        Ok(ProcessOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code,
            duration_ms,
            timed_out: false,
        })
    }

    fn spawn_detached(&self, program: &str, args: &[&str]) -> Result<(), ProcessError> {
        let child = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| ProcessError::Spawn {
                program: program.to_owned(),
                message: e.to_string(),
            })?;
        debug!(program, pid = child.id(), "process detached");
        // Dropping the handle leaves the child running; tokio reaps it.
        drop(child);
        Ok(())
    }
}
