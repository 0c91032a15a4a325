//! Backend interfaces for the platform berth provisions onto.
//!
//! The orchestrator only sees these traits. Concrete backends drive the
//! `helm` and `kubectl` CLIs, or keep everything in memory.

pub mod helm;
pub mod kubectl;
pub mod memory;
pub mod process;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{CreatedResource, Parameter, ReleaseSnapshot, ResourceLedger};

pub use helm::{ChartRepoHook, HelmCli};
pub use kubectl::KubectlCli;
pub use memory::{Fault, InMemoryPlatform, OperationCounts};
pub use process::CommandRunner;

/// Errors reported by a backend call
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("rejected by platform: {0}")]
    Rejected(String),

    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    #[error("`{command}` failed with exit code {code}: {stderr}")]
    CommandFailed {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("failed to parse {what}: {reason}")]
    Parse { what: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BackendError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }
}

/// Namespace capability: exists / create / delete
#[async_trait]
pub trait NamespaceBackend: Send + Sync {
    /// Human-readable backend name
    fn name(&self) -> &str;

    async fn exists(&self, id: &str) -> Result<bool, BackendError>;

    /// Create a namespace; `AlreadyExists` if another caller got there first
    async fn create(&self, id: &str) -> Result<(), BackendError>;

    async fn delete(&self, id: &str) -> Result<(), BackendError>;
}

/// Release capability: query / install / upgrade / uninstall
#[async_trait]
pub trait ReleaseBackend: Send + Sync {
    /// Human-readable backend name
    fn name(&self) -> &str;

    /// Current state of a release, `None` if it does not exist
    async fn query(&self, name: &str, namespace: &str)
        -> Result<Option<ReleaseSnapshot>, BackendError>;

    async fn install(&self, param: &Parameter) -> Result<(), BackendError>;

    async fn upgrade(&self, param: &Parameter) -> Result<(), BackendError>;

    async fn uninstall(&self, name: &str, namespace: &str) -> Result<(), BackendError>;
}

/// Prepares resources the installer depends on.
///
/// Implementations must be idempotent and record every resource they
/// create in the ledger before creating it.
#[async_trait]
pub trait PreCreateHook: Send + Sync {
    async fn prepare(
        &self,
        param: &Parameter,
        ledger: &mut ResourceLedger,
    ) -> Result<(), BackendError>;

    /// Remove a resource this hook recorded
    async fn remove(&self, resource: &CreatedResource) -> Result<(), BackendError>;
}

/// Hook that prepares nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHook;

#[async_trait]
impl PreCreateHook for NoopHook {
    async fn prepare(
        &self,
        _param: &Parameter,
        _ledger: &mut ResourceLedger,
    ) -> Result<(), BackendError> {
        Ok(())
    }

    async fn remove(&self, _resource: &CreatedResource) -> Result<(), BackendError> {
        Ok(())
    }
}
