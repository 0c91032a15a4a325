//! berth - Transactional chart release provisioning
//!
//! Provisions a packaged chart release into a target namespace as a single
//! all-or-nothing attempt. Either the release ends up installed (or
//! upgraded) and its observable state is returned, or every resource the
//! attempt created is rolled back before the original error is surfaced.
//!
//! # Architecture
//!
//! Provisioning is an explicit state machine:
//! - Raw configuration is validated into a `Parameter`
//! - The namespace is made present (and locked for the attempt)
//! - A pre-create hook prepares dependencies, recording what it creates
//! - The release is installed or upgraded, then its state resolved
//! - Any failure after the namespace is ready runs compensation
//!
//! # Modules
//!
//! - `adapters`: Platform integrations (helm, kubectl, in-memory)
//! - `core`: Orchestration logic (Validator, NamespaceManager, Orchestrator)
//! - `domain`: Data structures (Parameter, ReleaseSnapshot, Attempt)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Provision a release
//! berth provision -f release.yaml
//!
//! # Check release status
//! berth status my-release
//!
//! # Inspect past attempts
//! berth history
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use core::{Cancellation, Orchestrator, ProvisionError, ProvisionOutcome};
pub use domain::{Attempt, Parameter, RawConfig, ReleaseSnapshot, Stage};
