//! Process-level errors and their mapping into domain errors.

use blitz_core::{ExecutionError, SourceError};
use thiserror::Error;

/// A child process could not be run at all.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// `spawn` failed (missing binary, permissions).
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Program that was invoked.
        program: String,
        /// OS-level reason.
        message: String,
    },
    /// Waiting for the child failed.
    #[error("failed waiting for {program}: {message}")]
    Wait {
        /// Program that was invoked.
        program: String,
        /// OS-level reason.
        message: String,
    },
}

impl ProcessError {
    /// Program the error refers to.
    pub fn program(&self) -> &str {
        match self {
            Self::Spawn { program, .. } | Self::Wait { program, .. } => program,
        }
    }
}

impl From<ProcessError> for SourceError {
    fn from(err: ProcessError) -> Self {
        Self::CommandFailed {
            program: err.program().to_owned(),
            message: err.to_string(),
        }
    }
}

impl From<ProcessError> for ExecutionError {
    fn from(err: ProcessError) -> Self {
        let program = err.program().to_owned();
        Self::Spawn {
            program,
            message: err.to_string(),
        }
    }
}
