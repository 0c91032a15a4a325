//! Release installation.
//!
//! `install_or_upgrade` hides the install/upgrade distinction from the
//! caller: a release that does not exist yet is installed (and recorded in
//! the attempt's ledger), an existing one is upgraded in place.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::adapters::{BackendError, ReleaseBackend};
use crate::domain::{CreatedResource, NamespaceState, Parameter, ReleaseSnapshot, ResourceLedger};

use super::cancel::Interrupt;
use super::namespace::NamespaceLease;

/// Errors raised after the namespace is ready. All of them trigger
/// compensation.
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("pre-create step for release '{release}' failed: {source}")]
    PreCreate {
        release: String,
        #[source]
        source: BackendError,
    },

    #[error("namespace '{namespace}' is {state}, refusing to install release '{release}'")]
    NamespaceNotReady {
        release: String,
        namespace: String,
        state: NamespaceState,
    },

    #[error("failed to look up release '{release}': {source}")]
    Lookup {
        release: String,
        #[source]
        source: BackendError,
    },

    #[error("failed to install release '{release}': {source}")]
    Install {
        release: String,
        #[source]
        source: BackendError,
    },

    #[error("failed to upgrade release '{release}': {source}")]
    Upgrade {
        release: String,
        #[source]
        source: BackendError,
    },

    #[error("release '{release}' not found after a successful install")]
    Missing { release: String },

    #[error("provisioning of release '{release}' was cancelled")]
    Cancelled { release: String },

    #[error("provisioning of release '{release}' exceeded its deadline")]
    DeadlineExceeded { release: String },
}

impl InstallError {
    pub fn interrupted(release: &str, interrupt: Interrupt) -> Self {
        let release = release.to_string();
        match interrupt {
            Interrupt::Cancelled => Self::Cancelled { release },
            Interrupt::DeadlineExceeded => Self::DeadlineExceeded { release },
        }
    }
}

/// Which operation `install_or_upgrade` performed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallAction {
    Installed,
    Upgraded,
}

impl std::fmt::Display for InstallAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Installed => f.write_str("installed"),
            Self::Upgraded => f.write_str("upgraded"),
        }
    }
}

/// Installs, upgrades and queries releases through a backend
pub struct ReleaseInstaller {
    backend: Arc<dyn ReleaseBackend>,
}

impl ReleaseInstaller {
    pub fn new(backend: Arc<dyn ReleaseBackend>) -> Self {
        Self { backend }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Install the release, or upgrade it if it already exists
    #[instrument(skip_all, fields(release = %param.name, namespace = %param.namespace))]
    pub async fn install_or_upgrade(
        &self,
        param: &Parameter,
        namespace: &NamespaceLease,
        ledger: &mut ResourceLedger,
    ) -> Result<InstallAction, InstallError> {
        if !namespace.state().accepts_installs() {
            return Err(InstallError::NamespaceNotReady {
                release: param.name.clone(),
                namespace: namespace.id().to_string(),
                state: namespace.state(),
            });
        }

        let existing = self
            .backend
            .query(&param.name, &param.namespace)
            .await
            .map_err(|source| InstallError::Lookup {
                release: param.name.clone(),
                source,
            })?;

        match existing {
            None => {
                ledger.record(CreatedResource::Release {
                    name: param.name.clone(),
                    namespace: param.namespace.clone(),
                });
                self.backend
                    .install(param)
                    .await
                    .map_err(|source| InstallError::Install {
                        release: param.name.clone(),
                        source,
                    })?;
                info!(chart = %param.chart, "Release installed");
                Ok(InstallAction::Installed)
            }
            Some(previous) => {
                debug!(status = ?previous.status(), "Release exists, upgrading");
                self.backend
                    .upgrade(param)
                    .await
                    .map_err(|source| InstallError::Upgrade {
                        release: param.name.clone(),
                        source,
                    })?;
                info!(chart = %param.chart, "Release upgraded");
                Ok(InstallAction::Upgraded)
            }
        }
    }

    /// Current observable state of the release
    pub async fn resolve_state(&self, param: &Parameter) -> Result<ReleaseSnapshot, InstallError> {
        self.backend
            .query(&param.name, &param.namespace)
            .await
            .map_err(|source| InstallError::Lookup {
                release: param.name.clone(),
                source,
            })?
            .ok_or_else(|| InstallError::Missing {
                release: param.name.clone(),
            })
    }

    /// Remove a release; one that is already gone counts as removed
    pub async fn uninstall(&self, name: &str, namespace: &str) -> Result<(), BackendError> {
        match self.backend.uninstall(name, namespace).await {
            Err(e) if e.is_not_found() => {
                debug!(release = %name, "Release already gone");
                Ok(())
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{Fault, InMemoryPlatform};
    use crate::core::namespace::NamespaceManager;

    fn param() -> Parameter {
        Parameter {
            name: "app1".to_string(),
            chart: "x/y".to_string(),
            namespace: "tools".to_string(),
            version: None,
            create_namespace: true,
            wait: true,
            timeout_seconds: 300,
            repo: None,
            values: serde_json::Map::new(),
        }
    }

    #[tokio::test]
    async fn test_fresh_install_recorded() {
        let platform = Arc::new(InMemoryPlatform::new());
        let namespaces = NamespaceManager::new(platform.clone());
        let installer = ReleaseInstaller::new(platform.clone());
        let mut ledger = ResourceLedger::new();

        let lease = namespaces.ensure_present(&param()).await.unwrap();
        let action = installer
            .install_or_upgrade(&param(), &lease, &mut ledger)
            .await
            .unwrap();

        assert_eq!(action, InstallAction::Installed);
        assert_eq!(ledger.len(), 1);

        let snapshot = installer.resolve_state(&param()).await.unwrap();
        assert_eq!(snapshot.status(), Some("deployed"));
    }

    #[tokio::test]
    async fn test_existing_release_upgraded_not_recorded() {
        let platform = Arc::new(InMemoryPlatform::new().with_release("app1", "tools", "x/y"));
        let namespaces = NamespaceManager::new(platform.clone());
        let installer = ReleaseInstaller::new(platform.clone());
        let mut ledger = ResourceLedger::new();

        let lease = namespaces.ensure_present(&param()).await.unwrap();
        let action = installer
            .install_or_upgrade(&param(), &lease, &mut ledger)
            .await
            .unwrap();

        assert_eq!(action, InstallAction::Upgraded);
        assert!(ledger.is_empty());
        assert_eq!(platform.release_revision("app1", "tools"), Some(2));
    }

    #[tokio::test]
    async fn test_failed_install_still_recorded() {
        let platform = Arc::new(InMemoryPlatform::new().with_fault(Fault::Install, "bad chart"));
        let namespaces = NamespaceManager::new(platform.clone());
        let installer = ReleaseInstaller::new(platform.clone());
        let mut ledger = ResourceLedger::new();

        let lease = namespaces.ensure_present(&param()).await.unwrap();
        let err = installer
            .install_or_upgrade(&param(), &lease, &mut ledger)
            .await
            .unwrap_err();

        assert!(matches!(err, InstallError::Install { .. }));
        assert_eq!(ledger.len(), 1);
    }

    #[tokio::test]
    async fn test_uninstall_tolerates_missing() {
        let platform = Arc::new(InMemoryPlatform::new());
        let installer = ReleaseInstaller::new(platform);
        assert!(installer.uninstall("ghost", "tools").await.is_ok());
    }

    #[tokio::test]
    async fn test_resolve_missing_release() {
        let platform = Arc::new(InMemoryPlatform::new());
        let installer = ReleaseInstaller::new(platform);
        let err = installer.resolve_state(&param()).await.unwrap_err();
        assert!(matches!(err, InstallError::Missing { .. }));
    }

    #[test]
    fn test_interrupt_mapping() {
        assert!(matches!(
            InstallError::interrupted("app1", Interrupt::Cancelled),
            InstallError::Cancelled { .. }
        ));
        assert!(matches!(
            InstallError::interrupted("app1", Interrupt::DeadlineExceeded),
            InstallError::DeadlineExceeded { .. }
        ));
    }
}
