//! Provisioning orchestrator.
//!
//! Sequences validation, namespace setup, the pre-create hook, install and
//! state resolution as an explicit state machine:
//!
//! ```text
//! Start → Validated → NamespaceReady → PreCreated → Installed → Done
//!                          └──────────────┴─────────────┴──→ CompensatingCleanup → Failed
//! ```
//!
//! Validation and namespace failures end the attempt without compensation.
//! Every failure after the namespace is ready runs compensation, and the
//! caller always gets the error that triggered it.
//!
//! Chart repositories are shared by every attempt that names them, so an
//! attempt holds its repository's lock from pre-create until compensation
//! is over. Locks are always taken namespace first, then repository.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, info, instrument, warn, Span};
use uuid::Uuid;

use crate::adapters::{BackendError, NamespaceBackend, NoopHook, PreCreateHook, ReleaseBackend};
use crate::domain::{
    Attempt, CreatedResource, EventType, Parameter, ProvisionEvent, RawConfig, ReleaseSnapshot,
    ResourceLedger, Stage,
};

use super::cancel::Cancellation;
use super::installer::{InstallError, ReleaseInstaller};
use super::journal::AttemptJournal;
use super::locks::KeyedLocks;
use super::namespace::{NamespaceError, NamespaceLease, NamespaceManager};
use super::validator::{self, ValidationError};

/// A compensating action that failed. Recorded and logged, never returned
/// as the result of a provisioning call.
#[derive(Debug, Error)]
pub enum CompensationError {
    #[error("namespace compensation failed: {0}")]
    Namespace(#[source] NamespaceError),

    #[error("failed to delete {resource}: {source}")]
    Resource {
        resource: CreatedResource,
        #[source]
        source: BackendError,
    },
}

/// Error returned by a provisioning call
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Namespace(#[from] NamespaceError),

    /// A post-namespace failure; compensation has already run
    #[error("{cause}")]
    Install {
        cause: InstallError,
        compensation: Vec<CompensationError>,
    },
}

impl ProvisionError {
    /// Compensating actions that failed while handling this error
    pub fn compensation_failures(&self) -> &[CompensationError] {
        match self {
            Self::Install { compensation, .. } => compensation,
            _ => &[],
        }
    }

    pub fn install_error(&self) -> Option<&InstallError> {
        match self {
            Self::Install { cause, .. } => Some(cause),
            _ => None,
        }
    }
}

/// Result of one attempt together with its recorded transitions
#[derive(Debug)]
pub struct ProvisionOutcome {
    pub attempt: Attempt,
    pub result: Result<ReleaseSnapshot, ProvisionError>,
}

/// Tracks the attempt's stage and mirrors transitions into the journal
struct Recorder {
    attempt: Attempt,
    journal: Option<AttemptJournal>,
    stage_started: Instant,
}

impl Recorder {
    fn new(attempt_id: Uuid, journal: Option<AttemptJournal>) -> Self {
        Self {
            attempt: Attempt::new(attempt_id),
            journal,
            stage_started: Instant::now(),
        }
    }

    fn event(&self, event_type: EventType, summary: impl Into<String>) -> ProvisionEvent {
        let event = ProvisionEvent::new(self.attempt.id, event_type, summary);
        if self.attempt.release.is_empty() {
            event
        } else {
            event.with_target(&self.attempt.release, &self.attempt.namespace)
        }
    }

    /// Enter a new stage and journal it
    async fn transition(&mut self, stage: Stage, event: ProvisionEvent) {
        let elapsed = self.stage_started.elapsed().as_millis() as u64;
        self.stage_started = Instant::now();
        self.attempt.enter(stage);
        self.journal(event.with_duration(elapsed)).await;
    }

    /// Journal an event without changing stage
    async fn journal(&self, event: ProvisionEvent) {
        if let Some(ref journal) = self.journal {
            if let Err(e) = journal.append(&event).await {
                warn!(error = %e, path = %journal.path().display(), "Failed to journal event");
            }
        }
    }

    async fn fail(mut self, error: &ProvisionError) -> Attempt {
        self.attempt.error = Some(error.to_string());
        for failure in error.compensation_failures() {
            self.attempt.compensation_failures.push(failure.to_string());
        }
        let event = self
            .event(EventType::AttemptFailed, "Attempt failed")
            .with_error(error.to_string());
        self.transition(Stage::Failed, event).await;
        self.attempt
    }
}

/// Main provisioning orchestrator
pub struct Orchestrator {
    namespaces: NamespaceManager,
    installer: ReleaseInstaller,
    hook: Arc<dyn PreCreateHook>,
    repo_locks: KeyedLocks,
    journal_dir: Option<PathBuf>,
}

impl Orchestrator {
    /// Create an orchestrator over the given backends
    pub fn new(namespaces: Arc<dyn NamespaceBackend>, releases: Arc<dyn ReleaseBackend>) -> Self {
        Self {
            namespaces: NamespaceManager::new(namespaces),
            installer: ReleaseInstaller::new(releases),
            hook: Arc::new(NoopHook),
            repo_locks: KeyedLocks::new(),
            journal_dir: None,
        }
    }

    /// Prepare installer dependencies with `hook` before each install
    pub fn with_pre_create_hook(mut self, hook: Arc<dyn PreCreateHook>) -> Self {
        self.hook = hook;
        self
    }

    /// Journal every attempt under `dir`
    pub fn with_journal_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.journal_dir = Some(dir.into());
        self
    }

    /// Provision a release from a raw configuration bag
    pub async fn provision(&self, raw: &RawConfig) -> Result<ReleaseSnapshot, ProvisionError> {
        self.provision_with(raw, &Cancellation::new()).await
    }

    /// Provision, aborting in-flight work when `cancel` fires
    pub async fn provision_with(
        &self,
        raw: &RawConfig,
        cancel: &Cancellation,
    ) -> Result<ReleaseSnapshot, ProvisionError> {
        self.provision_attempt(raw, cancel).await.result
    }

    /// Provision and return the recorded attempt alongside the result
    #[instrument(skip_all, fields(attempt_id = tracing::field::Empty))]
    pub async fn provision_attempt(&self, raw: &RawConfig, cancel: &Cancellation) -> ProvisionOutcome {
        let attempt_id = Uuid::new_v4();
        Span::current().record("attempt_id", tracing::field::display(attempt_id));
        info!(
            namespaces = self.namespaces.backend_name(),
            releases = self.installer.backend_name(),
            "Starting provisioning attempt"
        );

        let mut recorder = Recorder::new(attempt_id, self.open_journal(attempt_id).await);
        recorder
            .journal(recorder.event(EventType::AttemptStarted, "Attempt started"))
            .await;

        // Start → Validated
        let param = match validator::validate(raw) {
            Ok(param) => param,
            Err(e) => {
                error!(error = %e, "Parameter validation failed");
                for violation in e.violations() {
                    error!(%violation, "Invalid parameter");
                }
                return self.finish_failed(recorder, e.into()).await;
            }
        };

        let fingerprint = param.fingerprint();
        recorder.attempt.release = param.name.clone();
        recorder.attempt.namespace = param.namespace.clone();
        recorder.attempt.fingerprint = Some(fingerprint.clone());
        let event = recorder.event(EventType::Validated, fingerprint);
        recorder.transition(Stage::Validated, event).await;
        info!(release = %param.name, namespace = %param.namespace, "Parameters validated");

        // Validated → NamespaceReady
        if let Some(interrupt) = cancel.interrupted() {
            let err = NamespaceError::Interrupted {
                namespace: param.namespace.clone(),
                interrupt,
            };
            return self.finish_failed(recorder, err.into()).await;
        }

        let mut lease = match self.namespaces.ensure_present_with(&param, cancel).await {
            Ok(lease) => lease,
            Err(e) => {
                error!(error = %e, "Namespace setup failed");
                return self.finish_failed(recorder, e.into()).await;
            }
        };

        let summary = if lease.created_by_attempt() {
            format!("Namespace '{}' created", lease.id())
        } else {
            format!("Namespace '{}' already present", lease.id())
        };
        let event = recorder.event(EventType::NamespaceReady, summary);
        recorder.transition(Stage::NamespaceReady, event).await;

        // NamespaceReady → PreCreated → Installed → Done
        let mut ledger = ResourceLedger::new();
        let mut repo_guard = None;
        let forward = self
            .forward(&param, &lease, &mut ledger, &mut repo_guard, cancel, &mut recorder)
            .await;

        match forward {
            Ok(snapshot) => {
                let event = recorder.event(EventType::Completed, "Release state resolved");
                recorder.transition(Stage::Done, event).await;
                info!(status = ?snapshot.status(), "Provisioning completed");
                ProvisionOutcome {
                    attempt: recorder.attempt,
                    result: Ok(snapshot),
                }
            }
            Err(cause) => {
                error!(error = %cause, "Provisioning failed, compensating");
                let event = recorder
                    .event(EventType::CompensationStarted, "Compensating")
                    .with_error(cause.to_string());
                recorder.transition(Stage::CompensatingCleanup, event).await;

                let compensation = self.compensate(&mut lease, &mut ledger).await;
                for failure in &compensation {
                    let event = recorder
                        .event(EventType::CompensationFailed, "Compensating action failed")
                        .with_error(failure.to_string());
                    recorder.journal(event).await;
                }
                drop(repo_guard);
                drop(lease);

                let err = ProvisionError::Install {
                    cause,
                    compensation,
                };
                self.finish_failed(recorder, err).await
            }
        }
    }

    /// Steps after the namespace is ready; any error here is compensated
    async fn forward(
        &self,
        param: &Parameter,
        lease: &NamespaceLease,
        ledger: &mut ResourceLedger,
        repo_guard: &mut Option<OwnedMutexGuard<()>>,
        cancel: &Cancellation,
        recorder: &mut Recorder,
    ) -> Result<ReleaseSnapshot, InstallError> {
        if let Some(interrupt) = cancel.interrupted() {
            return Err(InstallError::interrupted(&param.name, interrupt));
        }

        if let Some(ref repo) = param.repo {
            let guard = self
                .repo_locks
                .acquire_or_interrupt(&repo.name, cancel)
                .await
                .map_err(|interrupt| {
                    warn!(?interrupt, repo = %repo.name, "Gave up waiting for repository lock");
                    InstallError::interrupted(&param.name, interrupt)
                })?;
            *repo_guard = Some(guard);
        }

        // Pre-create
        let prepared = tokio::select! {
            biased;
            result = self.hook.prepare(param, ledger) => result,
            interrupt = cancel.fired() => {
                return Err(InstallError::interrupted(&param.name, interrupt));
            }
        };
        prepared.map_err(|source| {
            error!(error = %source, "Pre-create step failed");
            InstallError::PreCreate {
                release: param.name.clone(),
                source,
            }
        })?;

        debug!(resources = ?ledger.entries(), "Pre-create finished");
        let summary = format!("{} resource(s) prepared", ledger.len());
        let event = recorder.event(EventType::PreCreated, summary);
        recorder.transition(Stage::PreCreated, event).await;

        // Install or upgrade
        let action = tokio::select! {
            biased;
            result = self.installer.install_or_upgrade(param, lease, ledger) => result?,
            interrupt = cancel.fired() => {
                warn!(?interrupt, "Install interrupted");
                return Err(InstallError::interrupted(&param.name, interrupt));
            }
        };

        let event = recorder.event(EventType::Installed, format!("Release {}", action));
        recorder.transition(Stage::Installed, event).await;

        // Resolve state
        let snapshot = tokio::select! {
            biased;
            result = self.installer.resolve_state(param) => result?,
            interrupt = cancel.fired() => {
                return Err(InstallError::interrupted(&param.name, interrupt));
            }
        };
        debug!(?snapshot, "Resolved release state");

        Ok(snapshot)
    }

    /// Run every compensating action, collecting failures
    async fn compensate(
        &self,
        lease: &mut NamespaceLease,
        ledger: &mut ResourceLedger,
    ) -> Vec<CompensationError> {
        let mut failures = Vec::new();

        if let Err(e) = self.namespaces.compensate_on_failure(lease).await {
            error!(error = %e, "Namespace compensation failed");
            failures.push(CompensationError::Namespace(e));
        } else {
            debug!("Namespace compensation finished");
        }

        // Resources are removed even if namespace compensation failed
        for resource in ledger.drain_for_cleanup() {
            let removed = match resource {
                CreatedResource::Release {
                    ref name,
                    ref namespace,
                } => self.installer.uninstall(name, namespace).await,
                CreatedResource::ChartRepo { .. } => match self.hook.remove(&resource).await {
                    Err(e) if e.is_not_found() => Ok(()),
                    other => other,
                },
            };

            match removed {
                Ok(()) => info!(%resource, "Removed resource created by this attempt"),
                Err(source) => {
                    error!(%resource, error = %source, "Failed to remove resource created by this attempt");
                    failures.push(CompensationError::Resource { resource, source });
                }
            }
        }

        failures
    }

    async fn open_journal(&self, attempt_id: Uuid) -> Option<AttemptJournal> {
        let dir = self.journal_dir.as_ref()?;
        match AttemptJournal::open_in(dir, attempt_id).await {
            Ok(journal) => Some(journal),
            Err(e) => {
                warn!(error = %e, "Attempt journal unavailable, continuing without it");
                None
            }
        }
    }

    async fn finish_failed(&self, recorder: Recorder, error: ProvisionError) -> ProvisionOutcome {
        let attempt = recorder.fail(&error).await;
        ProvisionOutcome {
            attempt,
            result: Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{Fault, InMemoryPlatform};
    use serde_json::json;

    fn raw(value: serde_json::Value) -> RawConfig {
        value.as_object().cloned().unwrap()
    }

    fn orchestrator(platform: &Arc<InMemoryPlatform>) -> Orchestrator {
        Orchestrator::new(platform.clone(), platform.clone()).with_pre_create_hook(platform.clone())
    }

    #[tokio::test]
    async fn test_success_stages() {
        let platform = Arc::new(InMemoryPlatform::new());
        let outcome = orchestrator(&platform)
            .provision_attempt(&raw(json!({"name": "app1", "chart": "x/y"})), &Cancellation::new())
            .await;

        assert!(outcome.result.is_ok());
        assert_eq!(
            outcome.attempt.stages(),
            vec![
                Stage::Start,
                Stage::Validated,
                Stage::NamespaceReady,
                Stage::PreCreated,
                Stage::Installed,
                Stage::Done,
            ]
        );
        assert!(outcome.attempt.fingerprint.is_some());
    }

    #[tokio::test]
    async fn test_validation_failure_skips_compensation() {
        let platform = Arc::new(InMemoryPlatform::new());
        let outcome = orchestrator(&platform)
            .provision_attempt(&raw(json!({"name": "", "chart": "x/y"})), &Cancellation::new())
            .await;

        assert!(matches!(outcome.result, Err(ProvisionError::Validation(_))));
        assert_eq!(outcome.attempt.stages(), vec![Stage::Start, Stage::Failed]);
        assert_eq!(platform.operation_counts(), Default::default());
    }

    #[tokio::test]
    async fn test_pre_create_failure_compensates() {
        let platform = Arc::new(InMemoryPlatform::new().with_fault(Fault::PreCreate, "repo index"));
        let config = json!({
            "name": "app1",
            "chart": "x/y",
            "repo": {"name": "x", "url": "https://charts.example.com"}
        });

        let outcome = orchestrator(&platform)
            .provision_attempt(&raw(config), &Cancellation::new())
            .await;

        let err = outcome.result.unwrap_err();
        assert!(matches!(err.install_error(), Some(InstallError::PreCreate { .. })));
        assert!(outcome.attempt.compensated());
        // The repository registered before the failure is removed again
        assert!(!platform.has_repo("x"));
        assert!(!platform.has_namespace("app1"));
        assert_eq!(platform.operation_counts().release_install, 0);
    }

    #[tokio::test]
    async fn test_release_lookup_failure_compensates() {
        let platform = Arc::new(InMemoryPlatform::new());
        let orchestrator = orchestrator(&platform);

        platform.inject(Fault::Query, "api unavailable");
        let outcome = orchestrator
            .provision_attempt(&raw(json!({"name": "app1", "chart": "x/y"})), &Cancellation::new())
            .await;

        let err = outcome.result.unwrap_err();
        assert!(matches!(err.install_error(), Some(InstallError::Lookup { .. })));
        assert!(!platform.has_namespace("app1"));
    }
}
