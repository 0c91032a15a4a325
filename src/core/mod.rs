//! Core provisioning logic.
//!
//! This module contains:
//! - Validator: raw configuration → Parameter
//! - NamespaceManager: namespace setup and compensation
//! - ReleaseInstaller: install-or-upgrade and state resolution
//! - Orchestrator: the transactional provisioning workflow
//! - Cancellation: caller-supplied cancel/deadline signal
//! - KeyedLocks: per-namespace and per-repository locks
//! - AttemptJournal: append-only attempt log

pub mod cancel;
pub mod installer;
pub mod journal;
pub mod locks;
pub mod namespace;
pub mod orchestrator;
pub mod validator;

// Re-export commonly used types
pub use cancel::{Cancellation, Interrupt};
pub use installer::{InstallAction, InstallError, ReleaseInstaller};
pub use journal::AttemptJournal;
pub use locks::KeyedLocks;
pub use namespace::{NamespaceError, NamespaceLease, NamespaceManager};
pub use orchestrator::{CompensationError, Orchestrator, ProvisionError, ProvisionOutcome};
pub use validator::{validate, ValidationError, Violation, Violations};
