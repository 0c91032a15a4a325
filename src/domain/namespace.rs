//! Namespace lifecycle state for a single provisioning attempt.

use serde::{Deserialize, Serialize};

/// Existence state of a namespace as seen by one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamespaceState {
    /// Not present on the platform
    Absent,

    /// Creation requested, not yet confirmed
    Creating,

    /// Present and usable for installs
    Present,

    /// A forward step failed; awaiting compensation
    Failed,

    /// Deletion requested by compensation
    Terminating,
}

impl NamespaceState {
    /// Whether a release may be installed into the namespace
    pub fn accepts_installs(self) -> bool {
        matches!(self, Self::Present)
    }
}

impl Default for NamespaceState {
    fn default() -> Self {
        Self::Absent
    }
}

impl std::fmt::Display for NamespaceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Absent => "absent",
            Self::Creating => "creating",
            Self::Present => "present",
            Self::Failed => "failed",
            Self::Terminating => "terminating",
        };
        f.write_str(s)
    }
}
