//! Provisioning parameters.
//!
//! A `Parameter` is the validated form of the raw key-value bag a caller
//! hands to the orchestrator. It is only ever built by the validator and is
//! borrowed immutably for the rest of the attempt.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Raw, undecoded configuration bag supplied by the caller
pub type RawConfig = serde_json::Map<String, serde_json::Value>;

/// A validated provisioning request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    /// Release name (unique within the namespace)
    pub name: String,

    /// Chart reference, e.g. `bitnami/nginx`
    pub chart: String,

    /// Target namespace (explicit, or derived from the release name)
    pub namespace: String,

    /// Pinned chart version
    pub version: Option<String>,

    /// Whether a missing namespace may be created
    pub create_namespace: bool,

    /// Wait for release resources to become ready
    pub wait: bool,

    /// Per-operation timeout in seconds
    pub timeout_seconds: u64,

    /// Chart repository the chart is fetched from
    pub repo: Option<ChartRepo>,

    /// Value overrides passed through to the release backend
    pub values: serde_json::Map<String, serde_json::Value>,
}

impl Parameter {
    /// Per-operation timeout as a `Duration`
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Hex SHA-256 of the canonical JSON form
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        hex::encode(hasher.finalize())
    }
}

/// A named chart repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartRepo {
    pub name: String,
    pub url: String,
}
