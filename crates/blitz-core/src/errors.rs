//! Error types shared across the host and server layers.

use thiserror::Error;

// ─────────────────────────────────────────────────────────────────────────────
// SourceError: snapshot polling failures
// ─────────────────────────────────────────────────────────────────────────────

/// Failure while reading host state for a snapshot.
///
/// Pollers log these and skip the tick; they never reach a client except
/// through the `player_info` command.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The helper program could not be started or did not finish.
    #[error("{program} failed: {message}")]
    CommandFailed {
        /// Program that was invoked.
        program: String,
        /// Underlying failure.
        message: String,
    },

    /// The helper ran but its output did not have the expected shape.
    #[error("unexpected output from {program}: {message}")]
    UnexpectedOutput {
        /// Program whose output was rejected.
        program: String,
        /// What was wrong with it.
        message: String,
    },

    /// No media player is currently running.
    #[error("no active media player")]
    NoPlayer,

    /// Reading a local file (sysfs counters, artwork) failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

// ─────────────────────────────────────────────────────────────────────────────
// ExecutionError: command side effects
// ─────────────────────────────────────────────────────────────────────────────

/// Failure while running an allowlisted command.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The program could not be spawned.
    #[error("failed to start {program}: {message}")]
    Spawn {
        /// Program that was invoked.
        program: String,
        /// OS-level reason.
        message: String,
    },

    /// The program ran and exited unsuccessfully.
    #[error("{program} exited with code {exit_code}: {stderr}")]
    Failed {
        /// Program that was invoked.
        program: String,
        /// Exit code, `-1` when terminated by a signal.
        exit_code: i32,
        /// Trimmed standard error.
        stderr: String,
    },

    /// The program did not finish within its deadline.
    #[error("{program} timed out after {timeout_ms}ms")]
    Timeout {
        /// Program that was invoked.
        program: String,
        /// Deadline that elapsed.
        timeout_ms: u64,
    },
}
