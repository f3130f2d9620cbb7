//! Base command execution abstraction
//!
//! Provides the foundational trait for executing external commands, enabling
//! dependency injection for testing.

use std::ffi::{OsStr, OsString};
use std::fs::File;
use std::process::{Command, Stdio};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status_code == 0
    }

    /// Combined diagnostic text, stderr first.
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        let stdout = self.stdout.trim();
        match (stderr.is_empty(), stdout.is_empty()) {
            (false, false) => format!("{stderr}\n{stdout}"),
            (false, true) => stderr.to_string(),
            (true, _) => stdout.to_string(),
        }
    }
}

#[derive(Debug, Error, Clone)]
pub enum CommandError {
    #[error("Command execution failed: {message}")]
    ExecutionFailed { message: String },
    #[error("Command not found: {command}")]
    CommandNotFound { command: String },
    #[error("IO error: {message}")]
    Io { message: String },
}

/// Trait for executing external commands
///
/// This abstraction allows the rest of the codebase to execute commands
/// without directly depending on std::process::Command, enabling testing
/// with mock implementations. Calls block until the child exits.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait CommandExecutor: Send + Sync {
    /// Run `program` with `args`, optionally feeding `stdin` from an open file.
    ///
    /// The file is handed to the child as-is, so its current seek position is
    /// where the child starts reading.
    fn execute(
        &self,
        program: &str,
        args: &[OsString],
        stdin: Option<File>,
    ) -> Result<CommandOutput, CommandError>;
}

/// Real implementation using std::process::Command
#[derive(Debug, Clone, Default)]
pub struct ProcessCommandExecutor {
    envs: Vec<(String, String)>,
}

impl ProcessCommandExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an environment variable to every spawned child.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }
}

impl CommandExecutor for ProcessCommandExecutor {
    fn execute(
        &self,
        program: &str,
        args: &[OsString],
        stdin: Option<File>,
    ) -> Result<CommandOutput, CommandError> {
        let mut cmd = Command::new(program);
        cmd.args(args);
        for (k, v) in &self.envs {
            cmd.env(k, v);
        }
        cmd.stdin(match stdin {
            Some(file) => Stdio::from(file),
            None => Stdio::null(),
        });
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        debug!(program, args = %render_args(args), "spawning external command");

        let output = cmd.output().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CommandError::CommandNotFound {
                    command: program.to_string(),
                }
            } else {
                CommandError::Io {
                    message: e.to_string(),
                }
            }
        })?;

        let status_code = match output.status.code() {
            Some(code) => code,
            None => {
                return Err(CommandError::ExecutionFailed {
                    message: format!("{program} terminated by signal ({})", output.status),
                })
            }
        };

        debug!(program, status_code, "external command finished");

        Ok(CommandOutput {
            status_code,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// Render an argument list for logs and mock keys.
pub fn render_args(args: &[OsString]) -> String {
    args.iter()
        .map(|a| a.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Convenience for building argument vectors from mixed `&str`/`&Path` parts.
pub fn os_args<I, S>(parts: I) -> Vec<OsString>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    parts.into_iter().map(|p| p.as_ref().to_os_string()).collect()
}
