//! Namespace lifecycle management.
//!
//! `ensure_present` makes sure the target namespace exists and hands back a
//! lease. The lease holds a per-namespace lock for the rest of the attempt,
//! so two attempts on the same namespace never interleave, and remembers
//! whether this attempt created the namespace. Compensation only ever
//! deletes namespaces the attempt created.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, instrument, warn};

use crate::adapters::{BackendError, NamespaceBackend};
use crate::domain::{NamespaceState, Parameter};

use super::cancel::{Cancellation, Interrupt};
use super::locks::KeyedLocks;

/// Namespace setup and cleanup errors
#[derive(Debug, Error)]
pub enum NamespaceError {
    #[error("namespace '{namespace}' does not exist and create_namespace is disabled")]
    Missing { namespace: String },

    #[error("failed to look up namespace '{namespace}': {source}")]
    Lookup {
        namespace: String,
        #[source]
        source: BackendError,
    },

    #[error("platform rejected creation of namespace '{namespace}': {source}")]
    Create {
        namespace: String,
        #[source]
        source: BackendError,
    },

    #[error("failed to delete namespace '{namespace}': {source}")]
    Delete {
        namespace: String,
        #[source]
        source: BackendError,
    },

    #[error("setup of namespace '{namespace}' interrupted: {interrupt:?}")]
    Interrupted {
        namespace: String,
        interrupt: Interrupt,
    },
}

/// Exclusive hold on a namespace for the duration of one attempt.
///
/// Dropping the lease releases the namespace lock. A task must drop its
/// lease before ensuring the same namespace again.
#[derive(Debug)]
pub struct NamespaceLease {
    id: String,
    state: NamespaceState,
    created: bool,
    _guard: OwnedMutexGuard<()>,
}

impl NamespaceLease {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> NamespaceState {
        self.state
    }

    /// Whether this attempt created the namespace
    pub fn created_by_attempt(&self) -> bool {
        self.created
    }
}

/// Ensures namespaces exist and cleans up the ones an attempt created
pub struct NamespaceManager {
    backend: Arc<dyn NamespaceBackend>,
    locks: KeyedLocks,
}

impl NamespaceManager {
    pub fn new(backend: Arc<dyn NamespaceBackend>) -> Self {
        Self {
            backend,
            locks: KeyedLocks::new(),
        }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Make sure the namespace exists; idempotent
    pub async fn ensure_present(&self, param: &Parameter) -> Result<NamespaceLease, NamespaceError> {
        self.ensure_present_with(param, &Cancellation::new()).await
    }

    /// `ensure_present`, giving up while still waiting for the namespace
    /// lock if `cancel` fires. Once the lock is held, setup runs to the end.
    #[instrument(skip(self, param, cancel), fields(namespace = %param.namespace, backend = %self.backend.name()))]
    pub async fn ensure_present_with(
        &self,
        param: &Parameter,
        cancel: &Cancellation,
    ) -> Result<NamespaceLease, NamespaceError> {
        let guard = self
            .locks
            .acquire_or_interrupt(&param.namespace, cancel)
            .await
            .map_err(|interrupt| {
                warn!(?interrupt, "Gave up waiting for namespace lock");
                NamespaceError::Interrupted {
                    namespace: param.namespace.clone(),
                    interrupt,
                }
            })?;
        let mut lease = NamespaceLease {
            id: param.namespace.clone(),
            state: NamespaceState::Absent,
            created: false,
            _guard: guard,
        };

        let exists = self
            .backend
            .exists(&lease.id)
            .await
            .map_err(|source| NamespaceError::Lookup {
                namespace: lease.id.clone(),
                source,
            })?;

        if exists {
            debug!("Namespace already present");
            lease.state = NamespaceState::Present;
            return Ok(lease);
        }

        if !param.create_namespace {
            return Err(NamespaceError::Missing {
                namespace: lease.id.clone(),
            });
        }

        lease.state = NamespaceState::Creating;
        match self.backend.create(&lease.id).await {
            Ok(()) => {
                info!("Namespace created");
                lease.created = true;
            }
            Err(e) if e.is_already_exists() => {
                info!("Namespace was created concurrently, using it");
            }
            Err(source) => {
                warn!(error = %source, "Namespace creation rejected");
                return Err(NamespaceError::Create {
                    namespace: lease.id.clone(),
                    source,
                });
            }
        }

        lease.state = NamespaceState::Present;
        Ok(lease)
    }

    /// Return the namespace to a safe state after a failed attempt.
    ///
    /// Deletes it only if the attempt created it; a pre-existing namespace
    /// is left untouched.
    #[instrument(skip(self, lease), fields(namespace = %lease.id, created = lease.created))]
    pub async fn compensate_on_failure(&self, lease: &mut NamespaceLease) -> Result<(), NamespaceError> {
        lease.state = NamespaceState::Failed;

        if !lease.created {
            info!("Namespace pre-existed, leaving it untouched");
            lease.state = NamespaceState::Present;
            return Ok(());
        }

        lease.state = NamespaceState::Terminating;
        match self.backend.delete(&lease.id).await {
            Ok(()) => {
                info!("Namespace deleted");
                lease.state = NamespaceState::Absent;
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!("Namespace already gone");
                lease.state = NamespaceState::Absent;
                Ok(())
            }
            Err(source) => {
                lease.state = NamespaceState::Failed;
                Err(NamespaceError::Delete {
                    namespace: lease.id.clone(),
                    source,
                })
            }
        }
    }
}
