//! Cancellation Integration Tests
//!
//! Tests that a cancel signal or deadline firing mid-install aborts the
//! attempt and still runs compensation, and that a deadline also bounds the
//! time spent queued behind another attempt.

use std::sync::Arc;
use std::time::{Duration, Instant};

use berth::adapters::InMemoryPlatform;
use berth::core::{
    Cancellation, InstallError, Interrupt, NamespaceError, Orchestrator, ProvisionError,
};
use berth::domain::{RawConfig, Stage};
use serde_json::json;
use tokio_test::{assert_err, assert_ok};

fn raw(value: serde_json::Value) -> RawConfig {
    value.as_object().cloned().unwrap()
}

fn slow_platform() -> Arc<InMemoryPlatform> {
    Arc::new(InMemoryPlatform::new().with_install_delay(Duration::from_secs(30)))
}

fn orchestrator(platform: &Arc<InMemoryPlatform>) -> Orchestrator {
    Orchestrator::new(platform.clone(), platform.clone()).with_pre_create_hook(platform.clone())
}

#[tokio::test]
async fn test_cancel_during_install_compensates() {
    let platform = slow_platform();
    let orchestrator = orchestrator(&platform);
    let cancel = Cancellation::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let outcome = orchestrator
        .provision_attempt(&raw(json!({"name": "app1", "chart": "x/y"})), &cancel)
        .await;

    let err = assert_err!(outcome.result);
    assert!(matches!(err.install_error(), Some(InstallError::Cancelled { .. })));
    assert!(outcome.attempt.compensated());
    assert!(!platform.has_namespace("app1"));
    assert_eq!(platform.release_status("app1", "app1"), None);
}

#[tokio::test]
async fn test_deadline_during_install_compensates() {
    let platform = slow_platform();
    let cancel = Cancellation::new().with_timeout(Duration::from_millis(50));

    let outcome = orchestrator(&platform)
        .provision_attempt(&raw(json!({"name": "app1", "chart": "x/y"})), &cancel)
        .await;

    let err = assert_err!(outcome.result);
    assert!(matches!(err.install_error(), Some(InstallError::DeadlineExceeded { .. })));
    assert!(!platform.has_namespace("app1"));
    assert_eq!(platform.operation_counts().namespace_delete, 1);
}

#[tokio::test]
async fn test_cancel_before_start_touches_nothing() {
    let platform = slow_platform();
    let cancel = Cancellation::new();
    cancel.cancel();

    let outcome = orchestrator(&platform)
        .provision_attempt(&raw(json!({"name": "app1", "chart": "x/y"})), &cancel)
        .await;

    let err = assert_err!(outcome.result);
    assert!(matches!(
        err,
        ProvisionError::Namespace(NamespaceError::Interrupted { .. })
    ));
    assert_eq!(
        outcome.attempt.stages(),
        vec![Stage::Start, Stage::Validated, Stage::Failed]
    );
    assert_eq!(platform.operation_counts(), Default::default());
}

#[tokio::test]
async fn test_deadline_not_reached_succeeds() {
    let platform = Arc::new(InMemoryPlatform::new().with_install_delay(Duration::from_millis(10)));
    let cancel = Cancellation::new().with_timeout(Duration::from_secs(30));

    let result = orchestrator(&platform)
        .provision_with(&raw(json!({"name": "app1", "chart": "x/y"})), &cancel)
        .await;

    assert!(result.is_ok());
    assert!(platform.has_namespace("app1"));
}

#[tokio::test]
async fn test_deadline_bounds_wait_for_busy_namespace() {
    let platform = slow_platform();
    let orchestrator = orchestrator(&platform);
    let first_cancel = Cancellation::new();

    let first_raw = raw(json!({"name": "app1", "chart": "x/y", "namespace": "shared"}));
    let first = orchestrator.provision_attempt(
        &first_raw,
        &first_cancel,
    );
    let second = async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let started = Instant::now();
        let deadline = Cancellation::new().with_timeout(Duration::from_millis(100));
        let outcome = orchestrator
            .provision_attempt(
                &raw(json!({"name": "app2", "chart": "x/y", "namespace": "shared"})),
                &deadline,
            )
            .await;
        let waited = started.elapsed();
        first_cancel.cancel();
        (outcome, waited)
    };

    let (first, (second, waited)) = tokio::join!(first, second);

    assert!(waited < Duration::from_secs(1), "waited {:?}", waited);
    let err = assert_err!(second.result);
    assert!(matches!(
        err,
        ProvisionError::Namespace(NamespaceError::Interrupted {
            interrupt: Interrupt::DeadlineExceeded,
            ..
        })
    ));
    assert!(!second.attempt.compensated());
    assert_eq!(
        second.attempt.stages(),
        vec![Stage::Start, Stage::Validated, Stage::Failed]
    );

    // The attempt holding the namespace is unaffected until cancelled itself
    let err = assert_err!(first.result);
    assert!(matches!(err.install_error(), Some(InstallError::Cancelled { .. })));
    assert_eq!(platform.operation_counts().release_install, 1);
}

#[tokio::test]
async fn test_failed_attempt_keeps_repo_another_attempt_uses() {
    let platform = Arc::new(InMemoryPlatform::new().with_install_delay(Duration::from_millis(300)));
    let orchestrator = orchestrator(&platform);
    let repo = json!({"name": "x", "url": "https://charts.example.com"});

    let doomed = async {
        let deadline = Cancellation::new().with_timeout(Duration::from_millis(100));
        let config = json!({"name": "app-a", "chart": "x/a", "namespace": "team-a", "repo": repo});
        orchestrator.provision_attempt(&raw(config), &deadline).await
    };
    let healthy = async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let config = json!({"name": "app-b", "chart": "x/b", "namespace": "team-b", "repo": repo});
        orchestrator.provision(&raw(config)).await
    };

    let (doomed, healthy) = tokio::join!(doomed, healthy);

    let err = assert_err!(doomed.result);
    assert!(matches!(err.install_error(), Some(InstallError::DeadlineExceeded { .. })));
    assert!(!platform.has_namespace("team-a"));

    let snapshot = assert_ok!(healthy);
    assert_eq!(snapshot.status(), Some("deployed"));
    assert!(platform.has_repo("x"));
    assert_eq!(platform.release_status("app-b", "team-b").as_deref(), Some("deployed"));
}
