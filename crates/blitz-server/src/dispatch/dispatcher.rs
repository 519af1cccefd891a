//! Command execution with a deadline and per-command metrics.

use std::sync::Arc;
use std::time::{Duration, Instant};

use blitz_core::{ClientCommand, CommandExecutor, Invocation, ServerMessage, SnapshotSource};
use metrics::{counter, histogram};
use serde_json::json;
use tracing::{debug, instrument, warn};

use super::table::{Action, CommandTable};
use super::DispatchError;
use crate::metrics::{COMMAND_DURATION_SECONDS, COMMAND_ERRORS_TOTAL, COMMANDS_TOTAL};

/// Name reported in `ping` replies.
const SERVER_NAME: &str = "Blitz WebSocket";

/// Resolves client commands through the allowlist and runs them.
pub struct CommandDispatcher {
    table: CommandTable,
    executor: Arc<dyn CommandExecutor>,
    media: Option<Arc<dyn SnapshotSource>>,
    timeout: Duration,
}

impl CommandDispatcher {
    /// Create a dispatcher. `timeout` bounds every executor call.
    pub fn new(
        table: CommandTable,
        executor: Arc<dyn CommandExecutor>,
        timeout: Duration,
    ) -> Self {
        Self {
            table,
            executor,
            media: None,
            timeout,
        }
    }

    /// Source polled on demand by `player_info`.
    #[must_use]
    pub fn with_media_source(mut self, source: Arc<dyn SnapshotSource>) -> Self {
        self.media = Some(source);
        self
    }

    /// The allowlist in use.
    pub fn table(&self) -> &CommandTable {
        &self.table
    }

    /// Handle one inbound text frame and build the reply for its sender.
    ///
    /// Every failure becomes an `error` response.
    #[instrument(skip_all, fields(command))]
    pub async fn handle_message(&self, text: &str) -> ServerMessage {
        counter!(COMMANDS_TOTAL).increment(1);
        let start = Instant::now();

        let result = match ClientCommand::parse(text) {
            Ok(command) => {
                let _ = tracing::Span::current().record("command", command.name.as_str());
                self.dispatch(&command).await
            }
            Err(e) => Err(DispatchError::from(e)),
        };

        histogram!(COMMAND_DURATION_SECONDS).record(start.elapsed().as_secs_f64());
        result.unwrap_or_else(|err| {
            counter!(COMMAND_ERRORS_TOTAL, "kind" => err.kind()).increment(1);
            warn!(error = %err, kind = err.kind(), "command rejected");
            ServerMessage::error(err.to_string())
        })
    }

    /// Resolve and run an already parsed command.
    pub async fn dispatch(&self, command: &ClientCommand) -> Result<ServerMessage, DispatchError> {
        let action = self.table.resolve(command)?;
        debug!(command = %command.name, ?action, "dispatching");

        match action {
            Action::Ping => Ok(ServerMessage::success(&command.name)
                .with_message("pong")
                .with_data(json!({
                    "timestamp": chrono::Utc::now().timestamp(),
                    "server": SERVER_NAME,
                }))),
            Action::PlayerInfo => {
                let Some(source) = &self.media else {
                    return Err(DispatchError::UnknownCommand(command.name.clone()));
                };
                let snapshot = source.poll().await?;
                Ok(snapshot.to_message())
            }
            Action::Player(player) => {
                self.run(&command.name, &player.invocation()).await?;
                Ok(ServerMessage::success(&command.name))
            }
            Action::Launch { app, invocation } => {
                self.run(&command.name, &invocation).await?;
                debug!(app, program = %invocation.program, "app launched");
                Ok(ServerMessage::success(&command.name).with_message(format!("launched {app}")))
            }
        }
    }

    async fn run(&self, command: &str, invocation: &Invocation) -> Result<(), DispatchError> {
        match tokio::time::timeout(self.timeout, self.executor.execute(invocation)).await {
            Ok(result) => result.map_err(DispatchError::from),
            Err(_elapsed) => {
                tracing::error!(command, timeout = ?self.timeout, "command timed out");
                Err(DispatchError::Timeout {
                    command: command.to_owned(),
                    timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                })
            }
        }
    }
}
