//! Release state snapshots.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Read-only view of a release's observable status.
///
/// Only produced from a backend query after the installer reported success,
/// so a snapshot is never partially populated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReleaseSnapshot(BTreeMap<String, Value>);

impl ReleaseSnapshot {
    /// Create a snapshot carrying the mandatory fields
    pub fn new(name: &str, namespace: &str, status: &str) -> Self {
        Self::default()
            .with("name", name)
            .with("namespace", namespace)
            .with("status", status)
    }

    /// Add or replace a field
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Release name
    pub fn name(&self) -> Option<&str> {
        self.get("name").and_then(Value::as_str)
    }

    /// Release status, e.g. `deployed`
    pub fn status(&self) -> Option<&str> {
        self.get("status").and_then(Value::as_str)
    }
}
