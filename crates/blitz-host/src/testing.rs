//! Scripted process runner for parser and source tests.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::errors::ProcessError;
use crate::process::{ProcessOutput, ProcessRunner};

/// Replies to known command lines with canned output and records every call.
#[derive(Default)]
pub(crate) struct ScriptedRunner {
    replies: HashMap<String, ProcessOutput>,
    pub(crate) calls: Mutex<Vec<String>>,
    pub(crate) detached: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Successful reply for `line` (program and args joined by spaces).
    pub(crate) fn reply(mut self, line: &str, stdout: &str) -> Self {
        let _ = self.replies.insert(
            line.to_owned(),
            ProcessOutput {
                stdout: stdout.to_owned(),
                ..ProcessOutput::default()
            },
        );
        self
    }

    /// Failed reply for `line`.
    pub(crate) fn fail(mut self, line: &str, exit_code: i32, stderr: &str) -> Self {
        let _ = self.replies.insert(
            line.to_owned(),
            ProcessOutput {
                stderr: stderr.to_owned(),
                exit_code,
                ..ProcessOutput::default()
            },
        );
        self
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

fn command_line(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}

#[async_trait]
impl ProcessRunner for ScriptedRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<ProcessOutput, ProcessError> {
        let line = command_line(program, args);
        self.calls.lock().push(line.clone());
        self.replies
            .get(&line)
            .cloned()
            .ok_or_else(|| ProcessError::Spawn {
                program: program.to_owned(),
                message: format!("no scripted reply for `{line}`"),
            })
    }

    fn spawn_detached(&self, program: &str, args: &[&str]) -> Result<(), ProcessError> {
        self.detached.lock().push(command_line(program, args));
        Ok(())
    }
}
