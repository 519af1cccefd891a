//! Command execution capability.
//!
//! The dispatcher only ever hands an executor an [`Invocation`] built from the
//! allowlist table, never text received from a client.

use async_trait::async_trait;

use crate::errors::ExecutionError;

/// How the executor should treat the child process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LaunchMode {
    /// Run to completion and fail on a non-zero exit.
    Wait,
    /// Spawn and return immediately (desktop applications).
    Detach,
}

/// A program plus its argument vector. No shell is involved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invocation {
    /// Executable name or path.
    pub program: String,
    /// Arguments passed verbatim.
    pub args: Vec<String>,
    /// Wait or detach.
    pub mode: LaunchMode,
}

impl Invocation {
    /// Invocation that waits for the program to exit.
    pub fn wait<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            mode: LaunchMode::Wait,
        }
    }

    /// Invocation that spawns the program and returns.
    pub fn detach<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            mode: LaunchMode::Detach,
            ..Self::wait(program, args)
        }
    }
}

/// Performs side effects for allowlisted commands.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run the invocation.
    async fn execute(&self, invocation: &Invocation) -> Result<(), ExecutionError>;
}
