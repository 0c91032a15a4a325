//! Validation Integration Tests
//!
//! Tests that raw requests are normalized into parameters and that every
//! violated rule is reported, not just the first one.

use berth::core::{validate, ValidationError};
use berth::domain::RawConfig;
use serde_json::json;
use tokio_test::{assert_err, assert_ok};

fn raw(value: serde_json::Value) -> RawConfig {
    value.as_object().cloned().unwrap()
}

#[test]
fn test_minimal_request_gets_defaults() {
    let param = assert_ok!(validate(&raw(json!({"name": "app1", "chart": "x/y"}))));

    assert_eq!(param.namespace, "app1");
    assert!(param.create_namespace);
    assert!(param.wait);
    assert_eq!(param.timeout_seconds, 300);
    assert!(param.version.is_none());
    assert!(param.repo.is_none());
    assert!(param.values.is_empty());
}

#[test]
fn test_unknown_keys_ignored() {
    let param = assert_ok!(validate(&raw(json!({
        "name": "app1",
        "chart": "x/y",
        "board": "ops",
        "labels": ["a", "b"]
    }))));
    assert_eq!(param.name, "app1");
}

#[test]
fn test_values_preserved_verbatim() {
    let param = assert_ok!(validate(&raw(json!({
        "name": "app1",
        "chart": "x/y",
        "values": {"replicas": 3, "image": {"tag": "1.2.3"}}
    }))));
    assert_eq!(param.values["replicas"], json!(3));
    assert_eq!(param.values["image"]["tag"], json!("1.2.3"));
}

#[test]
fn test_every_violation_reported() {
    let err = assert_err!(validate(&raw(json!({
        "name": "",
        "chart": "x/ y",
        "timeout_seconds": 0,
        "repo": {"name": "x", "url": "ftp://charts"}
    }))));

    let fields: Vec<&str> = err.violations().iter().map(|v| v.field.as_str()).collect();
    assert_eq!(fields, vec!["name", "chart", "timeout_seconds", "repo.url"]);
}

#[test]
fn test_single_violation_message() {
    let err = assert_err!(validate(&raw(json!({"name": "", "chart": "x/y"}))));
    assert_eq!(err.violations().len(), 1);
    assert_eq!(err.violations()[0].to_string(), "name must not be empty");
}

#[test]
fn test_chart_must_reference_repo() {
    let err = assert_err!(validate(&raw(json!({
        "name": "app1",
        "chart": "other/y",
        "repo": {"name": "x", "url": "https://charts.example.com"}
    }))));
    assert_eq!(err.violations().len(), 1);
    assert_eq!(err.violations()[0].field, "chart");
}

#[test]
fn test_wrong_type_is_decode_error() {
    let err = assert_err!(validate(&raw(json!({"name": 5, "chart": "x/y"}))));
    assert!(matches!(err, ValidationError::Decode(_)));
    assert!(err.violations().is_empty());
}

#[test]
fn test_uppercase_names_rejected() {
    let err = assert_err!(validate(&raw(json!({
        "name": "App1",
        "chart": "x/y",
        "namespace": "Tools"
    }))));
    let fields: Vec<&str> = err.violations().iter().map(|v| v.field.as_str()).collect();
    assert_eq!(fields, vec!["name", "namespace"]);
}

#[test]
fn test_timeout_upper_bound() {
    let err = assert_err!(validate(&raw(json!({
        "name": "app1",
        "chart": "x/y",
        "timeout_seconds": u64::MAX
    }))));
    assert_eq!(err.violations().len(), 1);
    assert_eq!(err.violations()[0].to_string(), "timeout_seconds must be at most 86400");

    let param = assert_ok!(validate(&raw(json!({
        "name": "app1",
        "chart": "x/y",
        "timeout_seconds": 86400
    }))));
    assert_eq!(param.timeout_seconds, 86400);
}
