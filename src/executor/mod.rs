//! Command execution abstraction for rsprovision.
//!
//! This module provides:
//! - [`CommandSpec`]: Specification for commands to execute
//! - [`ExecutionResult`]: Result of command execution
//! - [`CommandExecutor`]: Trait for command execution strategies
//! - [`RealCommandExecutor`]: Production implementation using `std::process::Command`
//!
//! Commands are either *mutating* (package installs, key downloads, service
//! changes), which are skipped in dry-run mode, or *queries* (package database
//! lookups, version checks), which always run and capture their output.

mod pipe;
mod real;

use std::process::ExitStatus;

use anyhow::Result;

use crate::error::ProvisionError;

pub use real::RealCommandExecutor;

/// Formats string arguments into a space-separated, debug-quoted string.
///
/// Used by error messages and dry-run output to consistently format
/// command arguments (e.g., `"install" "-y" "docker-ce"`).
pub(crate) fn format_command_args(args: &[String]) -> String {
    args.iter()
        .map(|a| format!("{:?}", a))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Specification for a command to be executed
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// The command to execute (e.g., "apt-get")
    pub command: String,
    /// Command arguments
    pub args: Vec<String>,
    /// Environment variables to set (in addition to inherited environment)
    pub env: Vec<(String, String)>,
    /// Capture stdout/stderr into the result instead of streaming to the log
    pub capture: bool,
    /// Whether the command changes host state (skipped in dry-run mode)
    pub mutating: bool,
}

impl CommandSpec {
    /// Creates a new mutating CommandSpec with command and args
    #[must_use]
    pub fn new<I, S>(command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: Vec::new(),
            capture: false,
            mutating: true,
        }
    }

    /// Creates a read-only query whose output is captured.
    #[must_use]
    pub fn query<I, S>(command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut spec = Self::new(command, args);
        spec.capture = true;
        spec.mutating = false;
        spec
    }

    /// Adds an environment variable
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Returns the command line as a single display string.
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.command.clone()
        } else {
            format!("{} {}", self.command, format_command_args(&self.args))
        }
    }
}

/// Result of command execution
#[derive(Debug, Default)]
pub struct ExecutionResult {
    /// Exit status of the command (None in dry-run mode)
    pub status: Option<ExitStatus>,
    /// Captured stdout (empty unless the spec requested capture)
    pub stdout: String,
    /// Captured stderr (empty unless the spec requested capture)
    pub stderr: String,
}

impl ExecutionResult {
    /// Result of a command that was skipped in dry-run mode.
    pub fn skipped() -> Self {
        Self::default()
    }

    /// Builds a result from a raw exit code and captured output.
    pub fn exited(code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        use std::os::unix::process::ExitStatusExt;
        Self {
            status: Some(ExitStatus::from_raw((code & 0xff) << 8)),
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// Returns true if the command executed successfully.
    ///
    /// In dry-run mode (status is None), this always returns true.
    pub fn success(&self) -> bool {
        self.status.is_none_or(|s| s.success())
    }

    /// Returns the exit code if available
    pub fn code(&self) -> Option<i32> {
        self.status.and_then(|s| s.code())
    }

    /// Converts a non-successful result into an `Execution` error.
    pub fn check(self, spec: &CommandSpec) -> Result<Self, ProvisionError> {
        if self.success() {
            return Ok(self);
        }
        let mut status = match self.status {
            Some(s) => s.to_string(),
            None => "unknown status".to_string(),
        };
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            status = format!("{}: {}", status, last_line(stderr));
        }
        Err(ProvisionError::Execution {
            command: spec.display(),
            status,
        })
    }

    /// Returns stdout followed by stderr; some tools (e.g. `java -version`)
    /// report on stderr.
    pub fn combined_output(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

fn last_line(text: &str) -> &str {
    text.lines().last().unwrap_or(text)
}

/// Trait for command execution.
///
/// Implementations must be `Send + Sync` so the executor can be shared behind
/// an `Arc<dyn CommandExecutor>`.
pub trait CommandExecutor: Send + Sync {
    /// Executes a command with the given specification.
    fn execute(&self, spec: &CommandSpec) -> Result<ExecutionResult>;
}
