//! Client command dispatch.
//!
//! Inbound frames are parsed into a [`ClientCommand`](blitz_core::ClientCommand),
//! resolved through the [`CommandTable`] allowlist into a typed [`Action`], and
//! executed by the [`CommandDispatcher`]. Nothing a client sends ever reaches a
//! process argument vector unless the table produced it.

pub mod dispatcher;
pub mod table;

use blitz_core::{CommandParseError, ExecutionError, SourceError};
use thiserror::Error;

pub use dispatcher::CommandDispatcher;
pub use table::{Action, CommandTable, PlayerAction};

/// Why a client command produced an error response.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Frame could not be read as a command.
    #[error("invalid command: {0}")]
    Parse(#[from] CommandParseError),

    /// Name is not in the allowlist.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// Name is allowlisted but its parameters are missing or malformed.
    #[error("invalid params for {command}: {message}")]
    InvalidParams {
        /// Command name.
        command: String,
        /// What was wrong.
        message: String,
    },

    /// `launch` named an app that is not configured.
    #[error("unknown app: {0}")]
    UnknownApp(String),

    /// The executor reported a failure.
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// Execution exceeded the dispatcher deadline.
    #[error("{command} timed out after {timeout_ms}ms")]
    Timeout {
        /// Command name.
        command: String,
        /// Deadline that elapsed.
        timeout_ms: u64,
    },

    /// A snapshot source failed while serving `player_info`.
    #[error(transparent)]
    Source(#[from] SourceError),
}

impl DispatchError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Parse(_) => "parse",
            Self::UnknownCommand(_) => "unknown_command",
            Self::InvalidParams { .. } => "invalid_params",
            Self::UnknownApp(_) => "unknown_app",
            Self::Execution(_) => "execution",
            Self::Timeout { .. } => "timeout",
            Self::Source(_) => "source",
        }
    }

    pub(crate) fn invalid_params(command: &str, message: impl Into<String>) -> Self {
        Self::InvalidParams {
            command: command.to_owned(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_command_message() {
        let err = DispatchError::UnknownCommand("rm -rf /".into());
        assert_eq!(err.to_string(), "unknown command: rm -rf /");
        assert_eq!(err.kind(), "unknown_command");
    }

    #[test]
    fn execution_error_is_transparent() {
        let err: DispatchError = ExecutionError::Failed {
            program: "playerctl".into(),
            exit_code: 1,
            stderr: "No players found".into(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "playerctl exited with code 1: No players found"
        );
        assert_eq!(err.kind(), "execution");
    }

    #[test]
    fn invalid_params_message() {
        let err = DispatchError::invalid_params("volume", "percent must be 0-100");
        assert_eq!(
            err.to_string(),
            "invalid params for volume: percent must be 0-100"
        );
    }
}
