//! Decoding and validation of raw provisioning parameters.
//!
//! Decoding is fail-fast: a value of the wrong type aborts immediately.
//! Semantic rules are all evaluated and every violation is reported, so a
//! caller can fix a request in one pass.

use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::domain::{ChartRepo, Parameter, RawConfig};

/// Longest release name the platform accepts
const MAX_RELEASE_NAME: usize = 53;

/// Longest namespace identifier the platform accepts
const MAX_NAMESPACE: usize = 63;

/// Longest per-operation timeout accepted (one day)
const MAX_TIMEOUT_SECONDS: u64 = 86_400;

fn default_timeout_seconds() -> u64 {
    300
}

/// Decoding target for the raw bag. Missing keys take defaults so that
/// absent required fields surface as violations, not decode errors.
#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawParameter {
    name: String,
    chart: String,
    namespace: Option<String>,
    version: Option<String>,
    create_namespace: bool,
    wait: bool,
    timeout_seconds: u64,
    repo: Option<RawRepo>,
    values: serde_json::Map<String, serde_json::Value>,
}

impl Default for RawParameter {
    fn default() -> Self {
        Self {
            name: String::new(),
            chart: String::new(),
            namespace: None,
            version: None,
            create_namespace: true,
            wait: true,
            timeout_seconds: default_timeout_seconds(),
            repo: None,
            values: serde_json::Map::new(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawRepo {
    name: String,
    url: String,
}

/// A single violated rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub field: String,
    pub rule: String,
}

impl Violation {
    fn new(field: &str, rule: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            rule: rule.into(),
        }
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.field, self.rule)
    }
}

/// Every violation found in one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violations(pub Vec<Violation>);

impl std::fmt::Display for Violations {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let joined: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        f.write_str(&joined.join("; "))
    }
}

/// Validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("failed to decode parameters: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("parameters are illegal: {0}")]
    Invalid(Violations),
}

impl ValidationError {
    /// Violated rules (empty for decode failures)
    pub fn violations(&self) -> &[Violation] {
        match self {
            Self::Invalid(violations) => &violations.0,
            Self::Decode(_) => &[],
        }
    }
}

/// Decode and validate a raw configuration bag
pub fn validate(raw: &RawConfig) -> Result<Parameter, ValidationError> {
    let decoded: RawParameter = serde_json::from_value(serde_json::Value::Object(raw.clone()))
        .map_err(ValidationError::Decode)?;

    let violations = check(&decoded);
    if !violations.is_empty() {
        return Err(ValidationError::Invalid(Violations(violations)));
    }

    let namespace = decoded.namespace.unwrap_or_else(|| decoded.name.clone());
    Ok(Parameter {
        name: decoded.name,
        chart: decoded.chart,
        namespace,
        version: decoded.version,
        create_namespace: decoded.create_namespace,
        wait: decoded.wait,
        timeout_seconds: decoded.timeout_seconds,
        repo: decoded.repo.map(|r| ChartRepo {
            name: r.name,
            url: r.url,
        }),
        values: decoded.values,
    })
}

fn check(raw: &RawParameter) -> Vec<Violation> {
    let mut violations = Vec::new();

    if raw.name.is_empty() {
        violations.push(Violation::new("name", "must not be empty"));
    } else if !is_dns_label(&raw.name, MAX_RELEASE_NAME) {
        violations.push(Violation::new(
            "name",
            format!(
                "must be a lowercase DNS-1123 label of at most {} characters",
                MAX_RELEASE_NAME
            ),
        ));
    }

    if raw.chart.is_empty() {
        violations.push(Violation::new("chart", "must not be empty"));
    } else if raw.chart.chars().any(char::is_whitespace) {
        violations.push(Violation::new("chart", "must not contain whitespace"));
    }

    if let Some(ref namespace) = raw.namespace {
        if namespace.is_empty() {
            violations.push(Violation::new("namespace", "must not be empty when set"));
        } else if !is_dns_label(namespace, MAX_NAMESPACE) {
            violations.push(Violation::new(
                "namespace",
                format!(
                    "must be a lowercase DNS-1123 label of at most {} characters",
                    MAX_NAMESPACE
                ),
            ));
        }
    }

    if raw.version.as_deref() == Some("") {
        violations.push(Violation::new("version", "must not be empty when set"));
    }

    if raw.timeout_seconds == 0 {
        violations.push(Violation::new("timeout_seconds", "must be greater than zero"));
    } else if raw.timeout_seconds > MAX_TIMEOUT_SECONDS {
        violations.push(Violation::new(
            "timeout_seconds",
            format!("must be at most {}", MAX_TIMEOUT_SECONDS),
        ));
    }

    if let Some(ref repo) = raw.repo {
        if repo.name.is_empty() {
            violations.push(Violation::new("repo.name", "must not be empty"));
        } else if !raw.chart.is_empty() && !raw.chart.starts_with(&format!("{}/", repo.name)) {
            violations.push(Violation::new(
                "chart",
                format!("must reference repository '{}'", repo.name),
            ));
        }

        if !is_http_url(&repo.url) {
            violations.push(Violation::new("repo.url", "must be an absolute http(s) URL"));
        }
    }

    violations
}

/// `[a-z0-9]([-a-z0-9]*[a-z0-9])?` of at most `max` characters
fn is_dns_label(s: &str, max: usize) -> bool {
    let bytes = s.as_bytes();
    if bytes.is_empty() || bytes.len() > max {
        return false;
    }

    let alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    alnum(bytes[0])
        && alnum(bytes[bytes.len() - 1])
        && bytes.iter().all(|&b| alnum(b) || b == b'-')
}

fn is_http_url(s: &str) -> bool {
    match Url::parse(s) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.host().is_some(),
        Err(_) => false,
    }
}
