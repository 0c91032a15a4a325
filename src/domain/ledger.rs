//! Ledger of resources created during one provisioning attempt.

use serde::{Deserialize, Serialize};

/// A resource this attempt created and is responsible for cleaning up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum CreatedResource {
    /// A release installed into a namespace
    Release { name: String, namespace: String },

    /// A chart repository registered by the pre-create step
    ChartRepo { name: String },
}

impl std::fmt::Display for CreatedResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Release { name, namespace } => write!(f, "release {}/{}", namespace, name),
            Self::ChartRepo { name } => write!(f, "chart repository {}", name),
        }
    }
}

/// Ordered record of created resources.
///
/// Entries are recorded before the call that creates them, so a call that
/// fails halfway still gets cleaned up.
#[derive(Debug, Clone, Default)]
pub struct ResourceLedger {
    entries: Vec<CreatedResource>,
}

impl ResourceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a resource (duplicates are ignored)
    pub fn record(&mut self, resource: CreatedResource) {
        if !self.entries.contains(&resource) {
            self.entries.push(resource);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[CreatedResource] {
        &self.entries
    }

    /// Drain entries newest first, the order they must be torn down in
    pub fn drain_for_cleanup(&mut self) -> Vec<CreatedResource> {
        let mut drained: Vec<_> = self.entries.drain(..).collect();
        drained.reverse();
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cleanup_order_is_reversed() {
        let mut ledger = ResourceLedger::new();
        ledger.record(CreatedResource::ChartRepo {
            name: "x".to_string(),
        });
        ledger.record(CreatedResource::Release {
            name: "app1".to_string(),
            namespace: "app1".to_string(),
        });

        let drained = ledger.drain_for_cleanup();
        assert!(matches!(drained[0], CreatedResource::Release { .. }));
        assert!(matches!(drained[1], CreatedResource::ChartRepo { .. }));
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_duplicate_records_ignored() {
        let mut ledger = ResourceLedger::new();
        let repo = CreatedResource::ChartRepo {
            name: "x".to_string(),
        };
        ledger.record(repo.clone());
        ledger.record(repo);
        assert_eq!(ledger.len(), 1);
    }
}
