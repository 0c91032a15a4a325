//! Domain types for the berth provisioner.
//!
//! This module contains the core data structures:
//! - Parameter: the validated provisioning request
//! - NamespaceState: namespace lifecycle within one attempt
//! - ReleaseSnapshot: observable release status
//! - ResourceLedger: resources created by an attempt
//! - Events/Attempt: journaled stage transitions

pub mod attempt;
pub mod events;
pub mod ledger;
pub mod namespace;
pub mod param;
pub mod snapshot;

// Re-export commonly used types
pub use attempt::{Attempt, Stage, Transition};
pub use events::{EventType, ProvisionEvent};
pub use ledger::{CreatedResource, ResourceLedger};
pub use namespace::NamespaceState;
pub use param::{ChartRepo, Parameter, RawConfig};
pub use snapshot::ReleaseSnapshot;
