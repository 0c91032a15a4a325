//! In-memory platform implementing every backend capability.
//!
//! Used by `berth provision --dry-run` and by the test suite. Faults can be
//! injected per operation and every call is counted.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{CreatedResource, Parameter, ReleaseSnapshot, ResourceLedger};

use super::{BackendError, NamespaceBackend, PreCreateHook, ReleaseBackend};

/// Operation that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    NamespaceExists,
    NamespaceCreate,
    NamespaceDelete,
    /// `create` finds the namespace already created by another caller
    ConcurrentCreate,
    Query,
    Install,
    Upgrade,
    Uninstall,
    PreCreate,
    HookRemove,
}

/// Number of calls per backend operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationCounts {
    pub namespace_exists: usize,
    pub namespace_create: usize,
    pub namespace_delete: usize,
    pub release_query: usize,
    pub release_install: usize,
    pub release_upgrade: usize,
    pub release_uninstall: usize,
    pub pre_create: usize,
    pub hook_remove: usize,
}

impl OperationCounts {
    /// Calls made by compensation (namespace deletes, uninstalls, hook removals)
    pub fn cleanup_calls(&self) -> usize {
        self.namespace_delete + self.release_uninstall + self.hook_remove
    }
}

#[derive(Debug, Clone)]
struct ReleaseRecord {
    chart: String,
    version: Option<String>,
    revision: u64,
    status: String,
}

#[derive(Debug, Default)]
struct PlatformState {
    namespaces: HashSet<String>,
    releases: HashMap<(String, String), ReleaseRecord>,
    repos: HashSet<String>,
    faults: HashMap<Fault, String>,
    counts: OperationCounts,
}

impl PlatformState {
    fn fault(&self, fault: Fault) -> Result<(), BackendError> {
        match self.faults.get(&fault) {
            Some(message) => Err(BackendError::Rejected(message.clone())),
            None => Ok(()),
        }
    }
}

/// Platform whose namespaces, releases and repositories live in memory
#[derive(Debug, Default)]
pub struct InMemoryPlatform {
    state: Mutex<PlatformState>,
    install_delay: Option<Duration>,
}

impl InMemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a pre-existing namespace
    pub fn with_namespace(self, id: &str) -> Self {
        self.state().namespaces.insert(id.to_string());
        self
    }

    /// Seed a pre-existing deployed release (its namespace is seeded too)
    pub fn with_release(self, name: &str, namespace: &str, chart: &str) -> Self {
        {
            let mut state = self.state();
            state.namespaces.insert(namespace.to_string());
            state.releases.insert(
                (namespace.to_string(), name.to_string()),
                ReleaseRecord {
                    chart: chart.to_string(),
                    version: None,
                    revision: 1,
                    status: "deployed".to_string(),
                },
            );
        }
        self
    }

    /// Seed a registered chart repository
    pub fn with_repo(self, name: &str) -> Self {
        self.state().repos.insert(name.to_string());
        self
    }

    /// Fail every call of `fault` with a rejection carrying `message`
    pub fn with_fault(self, fault: Fault, message: &str) -> Self {
        self.inject(fault, message);
        self
    }

    /// Make installs and upgrades take `delay` before they apply
    pub fn with_install_delay(mut self, delay: Duration) -> Self {
        self.install_delay = Some(delay);
        self
    }

    pub fn inject(&self, fault: Fault, message: &str) {
        self.state().faults.insert(fault, message.to_string());
    }

    pub fn clear(&self, fault: Fault) {
        self.state().faults.remove(&fault);
    }

    pub fn has_namespace(&self, id: &str) -> bool {
        self.state().namespaces.contains(id)
    }

    pub fn has_repo(&self, name: &str) -> bool {
        self.state().repos.contains(name)
    }

    /// Status of a release, `None` if it does not exist
    pub fn release_status(&self, name: &str, namespace: &str) -> Option<String> {
        self.state()
            .releases
            .get(&(namespace.to_string(), name.to_string()))
            .map(|r| r.status.clone())
    }

    /// Revision of a release, `None` if it does not exist
    pub fn release_revision(&self, name: &str, namespace: &str) -> Option<u64> {
        self.state()
            .releases
            .get(&(namespace.to_string(), name.to_string()))
            .map(|r| r.revision)
    }

    pub fn operation_counts(&self) -> OperationCounts {
        self.state().counts.clone()
    }

    fn state(&self) -> MutexGuard<'_, PlatformState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn delay(&self) {
        if let Some(delay) = self.install_delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl NamespaceBackend for InMemoryPlatform {
    fn name(&self) -> &str {
        "memory"
    }

    async fn exists(&self, id: &str) -> Result<bool, BackendError> {
        let mut state = self.state();
        state.counts.namespace_exists += 1;
        state.fault(Fault::NamespaceExists)?;
        Ok(state.namespaces.contains(id))
    }

    async fn create(&self, id: &str) -> Result<(), BackendError> {
        let mut state = self.state();
        state.counts.namespace_create += 1;
        state.fault(Fault::NamespaceCreate)?;

        if state.faults.contains_key(&Fault::ConcurrentCreate) {
            state.namespaces.insert(id.to_string());
        }
        if !state.namespaces.insert(id.to_string()) {
            return Err(BackendError::AlreadyExists(format!("namespace {}", id)));
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), BackendError> {
        let mut state = self.state();
        state.counts.namespace_delete += 1;
        state.fault(Fault::NamespaceDelete)?;

        if !state.namespaces.remove(id) {
            return Err(BackendError::NotFound(format!("namespace {}", id)));
        }
        // Deleting a namespace takes its releases with it
        state.releases.retain(|(ns, _), _| ns != id);
        Ok(())
    }
}

#[async_trait]
impl ReleaseBackend for InMemoryPlatform {
    fn name(&self) -> &str {
        "memory"
    }

    async fn query(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<ReleaseSnapshot>, BackendError> {
        let mut state = self.state();
        state.counts.release_query += 1;
        state.fault(Fault::Query)?;

        let snapshot = state
            .releases
            .get(&(namespace.to_string(), name.to_string()))
            .map(|r| {
                let mut snapshot = ReleaseSnapshot::new(name, namespace, &r.status)
                    .with("revision", r.revision)
                    .with("chart", r.chart.clone());
                if let Some(ref version) = r.version {
                    snapshot = snapshot.with("version", version.clone());
                }
                snapshot
            });

        Ok(snapshot)
    }

    async fn install(&self, param: &Parameter) -> Result<(), BackendError> {
        self.state().counts.release_install += 1;
        self.delay().await;

        let mut state = self.state();
        if !state.namespaces.contains(&param.namespace) {
            return Err(BackendError::NotFound(format!("namespace {}", param.namespace)));
        }

        let key = (param.namespace.clone(), param.name.clone());
        if state.releases.contains_key(&key) {
            return Err(BackendError::AlreadyExists(format!("release {}", param.name)));
        }

        // A failed install still leaves a release record behind, as helm does
        let failure = state.fault(Fault::Install).err();
        let status = if failure.is_some() { "failed" } else { "deployed" };
        state.releases.insert(
            key,
            ReleaseRecord {
                chart: param.chart.clone(),
                version: param.version.clone(),
                revision: 1,
                status: status.to_string(),
            },
        );

        failure.map_or(Ok(()), Err)
    }

    async fn upgrade(&self, param: &Parameter) -> Result<(), BackendError> {
        self.state().counts.release_upgrade += 1;
        self.delay().await;

        let mut state = self.state();
        state.fault(Fault::Upgrade)?;

        let record = state
            .releases
            .get_mut(&(param.namespace.clone(), param.name.clone()))
            .ok_or_else(|| BackendError::NotFound(format!("release {}", param.name)))?;
        record.chart = param.chart.clone();
        record.version = param.version.clone();
        record.revision += 1;
        record.status = "deployed".to_string();
        Ok(())
    }

    async fn uninstall(&self, name: &str, namespace: &str) -> Result<(), BackendError> {
        let mut state = self.state();
        state.counts.release_uninstall += 1;
        state.fault(Fault::Uninstall)?;

        state
            .releases
            .remove(&(namespace.to_string(), name.to_string()))
            .map(|_| ())
            .ok_or_else(|| BackendError::NotFound(format!("release {}", name)))
    }
}

#[async_trait]
impl PreCreateHook for InMemoryPlatform {
    async fn prepare(
        &self,
        param: &Parameter,
        ledger: &mut ResourceLedger,
    ) -> Result<(), BackendError> {
        let mut state = self.state();
        state.counts.pre_create += 1;

        if let Some(ref repo) = param.repo {
            if !state.repos.contains(&repo.name) {
                ledger.record(CreatedResource::ChartRepo {
                    name: repo.name.clone(),
                });
                state.repos.insert(repo.name.clone());
            }
        }

        // Faults fire after registration to model a hook failing halfway
        state.fault(Fault::PreCreate)
    }

    async fn remove(&self, resource: &CreatedResource) -> Result<(), BackendError> {
        let mut state = self.state();
        state.counts.hook_remove += 1;
        state.fault(Fault::HookRemove)?;

        match resource {
            CreatedResource::ChartRepo { name } => {
                if state.repos.remove(name) {
                    Ok(())
                } else {
                    Err(BackendError::NotFound(format!("chart repository {}", name)))
                }
            }
            CreatedResource::Release { .. } => Ok(()),
        }
    }
}
