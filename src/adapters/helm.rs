//! Helm-driven release backend and chart repository hook.
//!
//! Both shell out to the `helm` CLI. Values overrides are written to a
//! temporary YAML file that lives for the duration of the command.

use std::io::Write;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::domain::{CreatedResource, Parameter, ReleaseSnapshot, ResourceLedger};

use super::process::{failure_stderr, CommandRunner};
use super::{BackendError, PreCreateHook, ReleaseBackend};

/// Extra time granted to the helm process beyond its own `--timeout`
const PROCESS_GRACE: Duration = Duration::from_secs(30);

/// Bound on a release command: helm's own timeout plus a grace period
fn process_timeout(param: &Parameter) -> Duration {
    param.timeout().saturating_add(PROCESS_GRACE)
}

/// Timeout for quick read-only helm calls
const QUERY_TIMEOUT: Duration = Duration::from_secs(60);

/// Release backend that shells out to `helm`
#[derive(Debug, Clone)]
pub struct HelmCli {
    runner: CommandRunner,
}

impl Default for HelmCli {
    fn default() -> Self {
        Self::new("helm")
    }
}

/// Subset of `helm status -o json`
#[derive(Debug, Deserialize)]
struct HelmStatus {
    name: String,
    namespace: String,
    version: u64,
    info: HelmInfo,
    chart: Option<HelmChart>,
}

#[derive(Debug, Deserialize)]
struct HelmInfo {
    status: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    last_deployed: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HelmChart {
    metadata: HelmChartMetadata,
}

#[derive(Debug, Deserialize)]
struct HelmChartMetadata {
    name: String,
    version: String,
    #[serde(rename = "appVersion", default)]
    app_version: Option<String>,
}

/// Entry of `helm repo list -o json`
#[derive(Debug, Deserialize)]
struct HelmRepoEntry {
    name: String,
}

impl HelmCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            runner: CommandRunner::new(binary),
        }
    }

    /// Target a specific kubeconfig context
    pub fn with_context(mut self, context: Option<&str>) -> Self {
        if let Some(ctx) = context {
            self.runner = self.runner.with_global_args(["--kube-context", ctx]);
        }
        self
    }

    async fn helm(&self, args: Vec<String>, limit: Duration) -> Result<String, BackendError> {
        Ok(self.runner.run(&args, limit).await?.stdout)
    }

    /// Shared argument list for `helm install` / `helm upgrade`
    fn release_args(&self, verb: &str, param: &Parameter, values_file: Option<&NamedTempFile>) -> Vec<String> {
        let mut args = vec![
            verb.to_string(),
            param.name.clone(),
            param.chart.clone(),
            "--namespace".to_string(),
            param.namespace.clone(),
            "--timeout".to_string(),
            format!("{}s", param.timeout_seconds),
        ];

        if let Some(ref version) = param.version {
            args.push("--version".to_string());
            args.push(version.clone());
        }
        if param.wait {
            args.push("--wait".to_string());
        }
        if let Some(file) = values_file {
            args.push("--values".to_string());
            args.push(file.path().to_string_lossy().into_owned());
        }

        args
    }

    async fn apply(&self, verb: &str, param: &Parameter) -> Result<(), BackendError> {
        let values_file = write_values_file(param)?;
        let args = self.release_args(verb, param, values_file.as_ref());

        self.helm(args, process_timeout(param))
            .await
            .map(|_| ())
            .map_err(|e| classify(e, &param.name))
    }

    async fn repo_names(&self) -> Result<Vec<String>, BackendError> {
        let args = vec!["repo".to_string(), "list".to_string(), "-o".to_string(), "json".to_string()];
        match self.helm(args, QUERY_TIMEOUT).await {
            Ok(stdout) => {
                let entries: Vec<HelmRepoEntry> =
                    serde_json::from_str(&stdout).map_err(|e| BackendError::Parse {
                        what: "helm repo list".to_string(),
                        reason: e.to_string(),
                    })?;
                Ok(entries.into_iter().map(|e| e.name).collect())
            }
            // helm exits non-zero when no repositories are configured
            Err(e) if failure_stderr(&e).is_some_and(|s| s.contains("no repositories")) => {
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }
}

/// Serialize value overrides to a temporary YAML file
fn write_values_file(param: &Parameter) -> Result<Option<NamedTempFile>, BackendError> {
    if param.values.is_empty() {
        return Ok(None);
    }

    let yaml = serde_yaml::to_string(&param.values).map_err(|e| BackendError::Parse {
        what: "values overrides".to_string(),
        reason: e.to_string(),
    })?;

    let mut file = tempfile::Builder::new()
        .prefix("berth-values-")
        .suffix(".yaml")
        .tempfile()?;
    file.write_all(yaml.as_bytes())?;
    file.flush()?;

    Ok(Some(file))
}

/// Map helm's stderr conventions onto backend error kinds
fn classify(err: BackendError, release: &str) -> BackendError {
    let Some(stderr) = failure_stderr(&err) else {
        return err;
    };

    if stderr.contains("cannot re-use a name that is still in use") {
        BackendError::AlreadyExists(format!("release {}", release))
    } else if stderr.contains("release: not found") || stderr.contains("Release not loaded") {
        BackendError::NotFound(format!("release {}", release))
    } else {
        err
    }
}

fn snapshot_from_status(status: HelmStatus) -> ReleaseSnapshot {
    let mut snapshot = ReleaseSnapshot::new(&status.name, &status.namespace, &status.info.status)
        .with("revision", status.version)
        .with("description", status.info.description);

    if let Some(last_deployed) = status.info.last_deployed {
        snapshot = snapshot.with("last_deployed", last_deployed);
    }
    if let Some(chart) = status.chart {
        snapshot = snapshot.with(
            "chart",
            format!("{}-{}", chart.metadata.name, chart.metadata.version),
        );
        if let Some(app_version) = chart.metadata.app_version {
            snapshot = snapshot.with("app_version", app_version);
        }
    }

    snapshot
}

#[async_trait]
impl ReleaseBackend for HelmCli {
    fn name(&self) -> &str {
        "helm"
    }

    async fn query(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<ReleaseSnapshot>, BackendError> {
        let args = vec![
            "status".to_string(),
            name.to_string(),
            "--namespace".to_string(),
            namespace.to_string(),
            "-o".to_string(),
            "json".to_string(),
        ];

        let stdout = match self.helm(args, QUERY_TIMEOUT).await.map_err(|e| classify(e, name)) {
            Ok(stdout) => stdout,
            Err(BackendError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        let status: HelmStatus = serde_json::from_str(&stdout).map_err(|e| BackendError::Parse {
            what: format!("helm status for release {}", name),
            reason: e.to_string(),
        })?;

        Ok(Some(snapshot_from_status(status)))
    }

    async fn install(&self, param: &Parameter) -> Result<(), BackendError> {
        info!(release = %param.name, chart = %param.chart, "helm install");
        self.apply("install", param).await
    }

    async fn upgrade(&self, param: &Parameter) -> Result<(), BackendError> {
        info!(release = %param.name, chart = %param.chart, "helm upgrade");
        self.apply("upgrade", param).await
    }

    async fn uninstall(&self, name: &str, namespace: &str) -> Result<(), BackendError> {
        let args = vec![
            "uninstall".to_string(),
            name.to_string(),
            "--namespace".to_string(),
            namespace.to_string(),
        ];
        self.helm(args, QUERY_TIMEOUT)
            .await
            .map(|_| ())
            .map_err(|e| classify(e, name))
    }
}

/// Pre-create hook that registers the parameter's chart repository
#[derive(Debug, Clone)]
pub struct ChartRepoHook {
    helm: HelmCli,
}

impl ChartRepoHook {
    pub fn new(helm: HelmCli) -> Self {
        Self { helm }
    }
}

#[async_trait]
impl PreCreateHook for ChartRepoHook {
    async fn prepare(
        &self,
        param: &Parameter,
        ledger: &mut ResourceLedger,
    ) -> Result<(), BackendError> {
        let Some(ref repo) = param.repo else {
            return Ok(());
        };

        if self.helm.repo_names().await?.contains(&repo.name) {
            debug!(repo = %repo.name, "Chart repository already registered");
        } else {
            ledger.record(CreatedResource::ChartRepo {
                name: repo.name.clone(),
            });
            let args = vec![
                "repo".to_string(),
                "add".to_string(),
                repo.name.clone(),
                repo.url.clone(),
            ];
            self.helm.helm(args, QUERY_TIMEOUT).await?;
            info!(repo = %repo.name, url = %repo.url, "Chart repository added");
        }

        let args = vec!["repo".to_string(), "update".to_string(), repo.name.clone()];
        self.helm.helm(args, QUERY_TIMEOUT).await?;
        Ok(())
    }

    async fn remove(&self, resource: &CreatedResource) -> Result<(), BackendError> {
        match resource {
            CreatedResource::ChartRepo { name } => {
                let args = vec!["repo".to_string(), "remove".to_string(), name.clone()];
                match self.helm.helm(args, QUERY_TIMEOUT).await {
                    Ok(_) => Ok(()),
                    Err(e) if failure_stderr(&e).is_some_and(|s| s.contains("no repo named")) => {
                        Err(BackendError::NotFound(format!("chart repository {}", name)))
                    }
                    Err(e) => Err(e),
                }
            }
            CreatedResource::Release { .. } => Ok(()),
        }
    }
}
