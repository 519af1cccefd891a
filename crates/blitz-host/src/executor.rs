//! [`CommandExecutor`] backed by a [`ProcessRunner`].

use std::sync::Arc;

use async_trait::async_trait;
use blitz_core::{CommandExecutor, ExecutionError, Invocation, LaunchMode};
use tracing::{debug, info};

use crate::process::ProcessRunner;

/// Runs allowlisted invocations as child processes.
pub struct ProcessExecutor {
    runner: Arc<dyn ProcessRunner>,
}

impl ProcessExecutor {
    /// Create an executor over `runner`.
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl CommandExecutor for ProcessExecutor {
    async fn execute(&self, invocation: &Invocation) -> Result<(), ExecutionError> {
        let program = invocation.program.as_str();
        let args: Vec<&str> = invocation.args.iter().map(String::as_str).collect();

        match invocation.mode {
            LaunchMode::Detach => {
                self.runner.spawn_detached(program, &args)?;
                info!(program, "application launched");
                Ok(())
            }
            LaunchMode::Wait => {
                let output = self.runner.run(program, &args).await?;
                if output.timed_out {
                    return Err(ExecutionError::Timeout {
                        program: program.to_owned(),
                        timeout_ms: output.duration_ms,
                    });
                }
                if output.exit_code != 0 {
                    return Err(ExecutionError::Failed {
                        program: program.to_owned(),
                        exit_code: output.exit_code,
                        stderr: output.stderr.trim().to_owned(),
                    });
                }
                debug!(program, duration_ms = output.duration_ms, "command executed");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRunner;

    #[tokio::test]
    async fn wait_mode_success() {
        let runner = Arc::new(ScriptedRunner::new().reply("playerctl play", ""));
        let executor = ProcessExecutor::new(runner.clone());
        executor
            .execute(&Invocation::wait("playerctl", ["play"]))
            .await
            .unwrap();
        assert_eq!(runner.calls.lock().as_slice(), ["playerctl play"]);
    }

    #[tokio::test]
    async fn wait_mode_nonzero_exit() {
        let runner = Arc::new(ScriptedRunner::new().fail(
            "playerctl next",
            1,
            "No players found\n",
        ));
        let executor = ProcessExecutor::new(runner);
        let err = executor
            .execute(&Invocation::wait("playerctl", ["next"]))
            .await
            .unwrap_err();
        match err {
            ExecutionError::Failed {
                exit_code, stderr, ..
            } => {
                assert_eq!(exit_code, 1);
                assert_eq!(stderr, "No players found");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn wait_mode_spawn_failure() {
        let executor = ProcessExecutor::new(Arc::new(ScriptedRunner::new()));
        let err = executor
            .execute(&Invocation::wait("playerctl", ["stop"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Spawn { .. }));
    }

    #[tokio::test]
    async fn detach_mode_does_not_wait() {
        let runner = Arc::new(ScriptedRunner::new());
        let executor = ProcessExecutor::new(runner.clone());
        executor
            .execute(&Invocation::detach("firefox", ["--new-window"]))
            .await
            .unwrap();
        assert_eq!(runner.call_count(), 0);
        assert_eq!(runner.detached.lock().as_slice(), ["firefox --new-window"]);
    }
}
