//! kubectl-driven namespace backend.

use std::time::Duration;

use async_trait::async_trait;

use super::process::{failure_stderr, CommandRunner};
use super::{BackendError, NamespaceBackend};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Namespace backend that shells out to `kubectl`
#[derive(Debug, Clone)]
pub struct KubectlCli {
    runner: CommandRunner,
    request_timeout: Duration,
}

impl Default for KubectlCli {
    fn default() -> Self {
        Self::new("kubectl")
    }
}

impl KubectlCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            runner: CommandRunner::new(binary),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Target a specific kubeconfig context
    pub fn with_context(mut self, context: Option<&str>) -> Self {
        if let Some(ctx) = context {
            self.runner = self.runner.with_global_args(["--context", ctx]);
        }
        self
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    async fn kubectl(&self, args: &[&str]) -> Result<String, BackendError> {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        let output = self.runner.run(&args, self.request_timeout).await?;
        Ok(output.stdout)
    }
}

/// Map kubectl's stderr conventions onto backend error kinds
fn classify(err: BackendError, id: &str) -> BackendError {
    let Some(stderr) = failure_stderr(&err) else {
        return err;
    };

    if stderr.contains("AlreadyExists") || stderr.contains("already exists") {
        BackendError::AlreadyExists(format!("namespace {}", id))
    } else if stderr.contains("NotFound") || stderr.contains("not found") {
        BackendError::NotFound(format!("namespace {}", id))
    } else if stderr.contains("exceeded quota")
        || stderr.contains("Forbidden")
        || stderr.contains("forbidden")
        || stderr.contains("Invalid value")
    {
        BackendError::Rejected(stderr.to_string())
    } else {
        err
    }
}

#[async_trait]
impl NamespaceBackend for KubectlCli {
    fn name(&self) -> &str {
        "kubectl"
    }

    async fn exists(&self, id: &str) -> Result<bool, BackendError> {
        match self.kubectl(&["get", "namespace", id, "-o", "name"]).await {
            Ok(_) => Ok(true),
            Err(e) => match classify(e, id) {
                BackendError::NotFound(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn create(&self, id: &str) -> Result<(), BackendError> {
        self.kubectl(&["create", "namespace", id])
            .await
            .map(|_| ())
            .map_err(|e| classify(e, id))
    }

    async fn delete(&self, id: &str) -> Result<(), BackendError> {
        let timeout_arg = format!("--timeout={}s", self.request_timeout.as_secs());
        self.kubectl(&["delete", "namespace", id, "--wait=true", &timeout_arg])
            .await
            .map(|_| ())
            .map_err(|e| classify(e, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(stderr: &str) -> BackendError {
        BackendError::CommandFailed {
            command: "kubectl".to_string(),
            code: 1,
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn test_classify_already_exists() {
        let err = classify(
            failed(r#"Error from server (AlreadyExists): namespaces "tools" already exists"#),
            "tools",
        );
        assert!(err.is_already_exists());
    }

    #[test]
    fn test_classify_not_found() {
        let err = classify(
            failed(r#"Error from server (NotFound): namespaces "tools" not found"#),
            "tools",
        );
        assert!(err.is_not_found());
    }

    #[test]
    fn test_classify_quota() {
        let err = classify(
            failed("Error from server (Forbidden): exceeded quota: namespace-count"),
            "tools",
        );
        assert!(matches!(err, BackendError::Rejected(_)));
    }

    #[test]
    fn test_classify_passthrough() {
        let err = classify(failed("Unable to connect to the server"), "tools");
        assert!(matches!(err, BackendError::CommandFailed { .. }));
    }

    #[test]
    fn test_backend_name() {
        assert_eq!(KubectlCli::default().name(), "kubectl");
    }
}
