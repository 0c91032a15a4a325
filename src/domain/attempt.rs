//! Provisioning attempts and reconstruction from journal events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::events::{EventType, ProvisionEvent};

/// Stage of the provisioning state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Start,
    Validated,
    NamespaceReady,
    PreCreated,
    Installed,
    Done,
    CompensatingCleanup,
    Failed,
}

impl Stage {
    /// Whether a failure in this stage must be compensated
    pub fn requires_compensation(self) -> bool {
        matches!(self, Self::NamespaceReady | Self::PreCreated | Self::Installed)
    }

    pub fn is_finished(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl Default for Stage {
    fn default() -> Self {
        Self::Start
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Start => "start",
            Self::Validated => "validated",
            Self::NamespaceReady => "namespace-ready",
            Self::PreCreated => "pre-created",
            Self::Installed => "installed",
            Self::Done => "done",
            Self::CompensatingCleanup => "compensating",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A recorded stage change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub stage: Stage,
    pub at: DateTime<Utc>,
}

/// One invocation of the provisioning workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    /// Unique identifier for this attempt
    pub id: Uuid,

    /// Release name (empty until validated)
    pub release: String,

    /// Target namespace (empty until validated)
    pub namespace: String,

    /// Fingerprint of the validated parameters
    pub fingerprint: Option<String>,

    /// Current stage
    pub stage: Stage,

    /// When the attempt started
    pub started_at: DateTime<Utc>,

    /// When the attempt reached `Done` or `Failed`
    pub completed_at: Option<DateTime<Utc>>,

    /// Every stage entered, in order
    pub transitions: Vec<Transition>,

    /// Error that failed the attempt
    pub error: Option<String>,

    /// Compensating actions that failed
    pub compensation_failures: Vec<String>,
}

impl Attempt {
    /// Start a new attempt
    pub fn new(id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id,
            release: String::new(),
            namespace: String::new(),
            fingerprint: None,
            stage: Stage::Start,
            started_at: now,
            completed_at: None,
            transitions: vec![Transition {
                stage: Stage::Start,
                at: now,
            }],
            error: None,
            compensation_failures: Vec::new(),
        }
    }

    /// Move to a new stage
    pub fn enter(&mut self, stage: Stage) {
        self.enter_at(stage, Utc::now());
    }

    fn enter_at(&mut self, stage: Stage, at: DateTime<Utc>) {
        self.stage = stage;
        self.transitions.push(Transition { stage, at });
        if stage.is_finished() {
            self.completed_at = Some(at);
        }
    }

    /// Stages entered, in order
    pub fn stages(&self) -> Vec<Stage> {
        self.transitions.iter().map(|t| t.stage).collect()
    }

    /// Whether compensation ran during this attempt
    pub fn compensated(&self) -> bool {
        self.transitions
            .iter()
            .any(|t| t.stage == Stage::CompensatingCleanup)
    }

    /// Reconstruct an attempt from its journal
    pub fn from_events(events: &[ProvisionEvent]) -> Option<Self> {
        let first = events.first()?;

        let mut attempt = Self {
            id: first.attempt_id,
            release: String::new(),
            namespace: String::new(),
            fingerprint: None,
            stage: Stage::Start,
            started_at: first.timestamp,
            completed_at: None,
            transitions: Vec::new(),
            error: None,
            compensation_failures: Vec::new(),
        };

        for event in events {
            attempt.apply_event(event);
        }

        Some(attempt)
    }

    /// Apply a single journal event
    pub fn apply_event(&mut self, event: &ProvisionEvent) {
        if let Some(ref release) = event.release {
            self.release = release.clone();
        }
        if let Some(ref namespace) = event.namespace {
            self.namespace = namespace.clone();
        }

        match event.event_type {
            EventType::AttemptStarted => {
                self.started_at = event.timestamp;
                self.enter_at(Stage::Start, event.timestamp);
            }
            EventType::Validated => {
                // Validated events carry the parameter fingerprint as summary
                self.fingerprint = Some(event.summary.clone());
                self.enter_at(Stage::Validated, event.timestamp);
            }
            EventType::NamespaceReady => self.enter_at(Stage::NamespaceReady, event.timestamp),
            EventType::PreCreated => self.enter_at(Stage::PreCreated, event.timestamp),
            EventType::Installed => self.enter_at(Stage::Installed, event.timestamp),
            EventType::Completed => self.enter_at(Stage::Done, event.timestamp),
            EventType::CompensationStarted => {
                self.enter_at(Stage::CompensatingCleanup, event.timestamp)
            }
            EventType::CompensationFailed => {
                if let Some(ref error) = event.error {
                    self.compensation_failures.push(error.clone());
                }
            }
            EventType::AttemptFailed => {
                self.error = event.error.clone();
                self.enter_at(Stage::Failed, event.timestamp);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempt_creation() {
        let id = Uuid::new_v4();
        let attempt = Attempt::new(id);

        assert_eq!(attempt.id, id);
        assert_eq!(attempt.stage, Stage::Start);
        assert_eq!(attempt.stages(), vec![Stage::Start]);
    }

    #[test]
    fn test_enter_finishes_attempt() {
        let mut attempt = Attempt::new(Uuid::new_v4());
        attempt.enter(Stage::Validated);
        assert!(attempt.completed_at.is_none());

        attempt.enter(Stage::Failed);
        assert!(attempt.completed_at.is_some());
        assert!(!attempt.compensated());
    }

    #[test]
    fn test_compensation_required_only_after_namespace() {
        assert!(!Stage::Start.requires_compensation());
        assert!(!Stage::Validated.requires_compensation());
        assert!(Stage::NamespaceReady.requires_compensation());
        assert!(Stage::PreCreated.requires_compensation());
        assert!(Stage::Installed.requires_compensation());
    }

    #[test]
    fn test_attempt_from_events() {
        let id = Uuid::new_v4();

        let events = vec![
            ProvisionEvent::new(id, EventType::AttemptStarted, "started"),
            ProvisionEvent::new(id, EventType::Validated, "abc123").with_target("app1", "app1"),
            ProvisionEvent::new(id, EventType::NamespaceReady, "created"),
            ProvisionEvent::new(id, EventType::PreCreated, "nothing to prepare"),
            ProvisionEvent::new(id, EventType::CompensationStarted, "install failed"),
            ProvisionEvent::new(id, EventType::CompensationFailed, "delete failed")
                .with_error("namespace app1: forbidden"),
            ProvisionEvent::new(id, EventType::AttemptFailed, "failed").with_error("bad chart"),
        ];

        let attempt = Attempt::from_events(&events).unwrap();

        assert_eq!(attempt.id, id);
        assert_eq!(attempt.release, "app1");
        assert_eq!(attempt.fingerprint.as_deref(), Some("abc123"));
        assert_eq!(attempt.stage, Stage::Failed);
        assert!(attempt.compensated());
        assert_eq!(attempt.compensation_failures.len(), 1);
        assert_eq!(attempt.error.as_deref(), Some("bad chart"));
        assert_eq!(
            attempt.stages(),
            vec![
                Stage::Start,
                Stage::Validated,
                Stage::NamespaceReady,
                Stage::PreCreated,
                Stage::CompensatingCleanup,
                Stage::Failed,
            ]
        );
    }
}
