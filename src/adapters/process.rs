//! Subprocess execution shared by the CLI-driven backends.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use super::BackendError;

/// Captured result of a successful command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs a CLI binary with a fixed set of leading arguments
#[derive(Debug, Clone)]
pub struct CommandRunner {
    binary: String,
    global_args: Vec<String>,
}

impl CommandRunner {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            global_args: Vec::new(),
        }
    }

    /// Append arguments passed on every invocation (e.g. `--kube-context`)
    pub fn with_global_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.global_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Run the binary and fail on a non-zero exit.
    ///
    /// The child is killed if the returned future is dropped, so a
    /// cancelled caller does not leave the process running.
    pub async fn run(&self, args: &[String], limit: Duration) -> Result<CommandOutput, BackendError> {
        let command_line = self.describe(args);
        debug!(command = %command_line, "Running command");

        let child = Command::new(&self.binary)
            .args(args)
            .args(&self.global_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = timeout(limit, child.wait_with_output())
            .await
            .map_err(|_| BackendError::Timeout {
                operation: command_line.clone(),
                after: limit,
            })??;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !output.status.success() {
            return Err(BackendError::CommandFailed {
                command: command_line,
                code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        Ok(CommandOutput { stdout, stderr })
    }

    fn describe(&self, args: &[String]) -> String {
        let mut parts = vec![self.binary.clone()];
        parts.extend(args.iter().cloned());
        parts.join(" ")
    }
}

/// Stderr of a failed command, if the error came from one
pub fn failure_stderr(err: &BackendError) -> Option<&str> {
    match err {
        BackendError::CommandFailed { stderr, .. } => Some(stderr.as_str()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_command() {
        let runner = CommandRunner::new("helm").with_global_args(["--kube-context", "dev"]);
        let line = runner.describe(&["status".to_string(), "app1".to_string()]);
        assert_eq!(line, "helm status app1");
        assert_eq!(runner.global_args, vec!["--kube-context", "dev"]);
    }

    #[tokio::test]
    async fn test_missing_binary_is_io_error() {
        let runner = CommandRunner::new("/nonexistent/berth-test-binary");
        let result = runner.run(&[], Duration::from_secs(1)).await;
        assert!(matches!(result, Err(BackendError::Io(_))));
    }

    #[test]
    fn test_failure_stderr() {
        let err = BackendError::CommandFailed {
            command: "kubectl get namespace x".to_string(),
            code: 1,
            stderr: "NotFound".to_string(),
        };
        assert_eq!(failure_stderr(&err), Some("NotFound"));
        assert_eq!(failure_stderr(&BackendError::NotFound("x".to_string())), None);
    }
}
