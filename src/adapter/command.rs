//! Subprocess execution for CLI-backed adapters.
//!
//! Adapters hold an `Arc<dyn CommandRunner>` so the real [`HostRunner`] can be
//! swapped for a scripted runner in tests.

use super::AdapterError;
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::debug;

/// Command to execute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Maximum execution time (None = no timeout)
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Shell-escaped rendering for logs.
    pub fn display_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(|part| shell_escape::escape(part.into()).into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Result of command execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code (0 = success, -1 when killed by a signal)
    pub exit_code: i32,
    pub duration: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, cmd: CommandSpec) -> Result<CommandOutput, AdapterError>;

    /// Whether `program` can be launched at all.
    fn is_available(&self, program: &str) -> bool;
}

/// Runs commands directly on the host.
#[derive(Debug, Clone, Default)]
pub struct HostRunner;

impl HostRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for HostRunner {
    async fn run(&self, cmd: CommandSpec) -> Result<CommandOutput, AdapterError> {
        debug!("Executing: {}", cmd.display_line());

        if !self.is_available(&cmd.program) {
            return Err(AdapterError::CliMissing(cmd.program));
        }

        let start = Instant::now();
        let mut command = Command::new(&cmd.program);
        command.args(&cmd.args).kill_on_drop(true);

        let output = if let Some(timeout) = cmd.timeout {
            match tokio::time::timeout(timeout, command.output()).await {
                Ok(result) => result?,
                Err(_) => return Err(AdapterError::Timeout(timeout)),
            }
        } else {
            command.output().await?
        };

        let result = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
            duration: start.elapsed(),
        };
        debug!(
            "Command completed in {:.2}s | Exit code: {} | Stdout: {} bytes",
            result.duration.as_secs_f64(),
            result.exit_code,
            result.stdout.len()
        );
        Ok(result)
    }

    fn is_available(&self, program: &str) -> bool {
        which::which(program).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_line_escapes_arguments() {
        let cmd = CommandSpec::new("gh", ["issue", "create", "--title", "Fix the thing"]);
        assert_eq!(cmd.display_line(), "gh issue create --title 'Fix the thing'");
    }

    #[tokio::test]
    async fn test_missing_program() {
        let runner = HostRunner::new();
        let err = runner
            .run(CommandSpec::new("definitely-not-a-real-binary-xyz", Vec::<String>::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::CliMissing(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_host_runner_captures_output() {
        let runner = HostRunner::new();
        let output = runner
            .run(CommandSpec::new("sh", ["-c", "echo hello; exit 3"]))
            .await
            .unwrap();
        assert_eq!(output.stdout.trim(), "hello");
        assert_eq!(output.exit_code, 3);
        assert!(!output.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_host_runner_timeout() {
        let runner = HostRunner::new();
        let err = runner
            .run(CommandSpec::new("sleep", ["2"]).with_timeout(Duration::from_millis(100)))
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::Timeout(_)));
    }
}
