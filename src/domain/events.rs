//! Journal events for provisioning attempts.
//!
//! Every stage transition of an attempt is recorded as an immutable event in
//! an append-only log. The attempt can be reconstructed by replaying them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single event in an attempt journal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionEvent {
    /// Unique identifier for this event
    pub id: Uuid,

    /// When this event occurred (ISO 8601)
    pub timestamp: DateTime<Utc>,

    /// The attempt this event belongs to
    pub attempt_id: Uuid,

    /// Type of event
    pub event_type: EventType,

    /// Human-readable summary (NO secrets, never the values mapping)
    pub summary: String,

    /// Release name, once known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,

    /// Namespace, once known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Time spent in the stage that just finished
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    /// Error message if something failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProvisionEvent {
    /// Create a new event with the current timestamp
    pub fn new(attempt_id: Uuid, event_type: EventType, summary: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            attempt_id,
            event_type,
            summary: summary.into(),
            release: None,
            namespace: None,
            duration_ms: None,
            error: None,
        }
    }

    /// Attach the release coordinates
    pub fn with_target(mut self, release: &str, namespace: &str) -> Self {
        self.release = Some(release.to_string());
        self.namespace = Some(namespace.to_string());
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Types of events emitted during an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// The attempt has started
    AttemptStarted,

    /// Raw configuration decoded and validated
    Validated,

    /// Namespace exists and accepts installs
    NamespaceReady,

    /// Pre-create hook finished
    PreCreated,

    /// Release installed or upgraded
    Installed,

    /// Snapshot resolved, attempt succeeded
    Completed,

    /// A post-namespace step failed, compensation is running
    CompensationStarted,

    /// A single compensating action failed
    CompensationFailed,

    /// The attempt ended in failure
    AttemptFailed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = ProvisionEvent::new(Uuid::new_v4(), EventType::NamespaceReady, "ready")
            .with_target("app1", "tools");

        let json = serde_json::to_string(&event).unwrap();
        let parsed: ProvisionEvent = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.event_type, EventType::NamespaceReady);
        assert_eq!(parsed.release.as_deref(), Some("app1"));
        assert_eq!(parsed.namespace.as_deref(), Some("tools"));
    }

    #[test]
    fn test_optional_fields_skipped() {
        let event = ProvisionEvent::new(Uuid::new_v4(), EventType::AttemptStarted, "start");
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("duration_ms"));
        assert!(!json.contains("\"error\""));
    }

    #[test]
    fn test_event_with_error() {
        let event = ProvisionEvent::new(Uuid::new_v4(), EventType::AttemptFailed, "failed")
            .with_error("quota exceeded")
            .with_duration(12);

        assert_eq!(event.error.as_deref(), Some("quota exceeded"));
        assert_eq!(event.duration_ms, Some(12));
    }
}
