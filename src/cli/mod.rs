//! Command-line interface for berth.
//!
//! Provides commands for provisioning releases, validating requests,
//! querying release status and inspecting journaled attempts.

use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use uuid::Uuid;

use crate::adapters::{ChartRepoHook, HelmCli, InMemoryPlatform, KubectlCli, ReleaseBackend};
use crate::config::{self, ResolvedConfig};
use crate::core::{validate, AttemptJournal, Cancellation, Orchestrator, ProvisionError};
use crate::domain::{Attempt, RawConfig, Stage};

/// berth - Transactional chart release provisioning
#[derive(Parser, Debug)]
#[command(name = "berth")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Provision a release (install or upgrade) from a YAML request
    Provision {
        /// Request file (reads from stdin if not provided)
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Abort and compensate if provisioning takes longer than this
        #[arg(long, value_name = "SECS", env = "BERTH_DEADLINE")]
        deadline: Option<u64>,

        /// Run against an in-memory platform instead of the cluster
        #[arg(long)]
        dry_run: bool,
    },

    /// Validate a request without touching the cluster
    Validate {
        /// Request file (reads from stdin if not provided)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Show the current state of a release
    Status {
        /// Release name
        release: String,

        /// Namespace (defaults to the release name)
        #[arg(short, long)]
        namespace: Option<String>,
    },

    /// List journaled attempts, or show one in detail
    History {
        /// Attempt ID (UUID)
        attempt_id: Option<String>,

        /// Maximum number of attempts to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Provision {
                file,
                deadline,
                dry_run,
            } => provision(file, deadline, dry_run).await,
            Commands::Validate { file } => validate_request(file),
            Commands::Status { release, namespace } => show_status(&release, namespace).await,
            Commands::History { attempt_id, limit } => match attempt_id {
                Some(id) => show_attempt(&id).await,
                None => list_attempts(limit).await,
            },
            Commands::Config => show_config(),
        }
    }
}

/// Read a request from a file or piped stdin
fn read_request(file: Option<PathBuf>) -> Result<String> {
    if let Some(path) = file {
        return std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read request file: {}", path.display()));
    }

    if io::stdin().is_terminal() {
        anyhow::bail!("No request provided. Use --file <path> or pipe YAML to stdin");
    }

    let mut buffer = String::new();
    io::stdin()
        .read_to_string(&mut buffer)
        .context("Failed to read from stdin")?;
    Ok(buffer)
}

/// Parse a YAML request into a raw configuration bag
fn parse_request(text: &str, default_timeout: u64) -> Result<RawConfig> {
    if text.trim().is_empty() {
        anyhow::bail!("Request is empty");
    }

    let value: Value = serde_yaml::from_str(text).context("Failed to parse request YAML")?;
    let Value::Object(mut raw) = value else {
        anyhow::bail!("Request must be a YAML mapping");
    };

    raw.entry("timeout_seconds")
        .or_insert_with(|| Value::from(default_timeout));
    Ok(raw)
}

fn build_orchestrator(cfg: &ResolvedConfig, dry_run: bool) -> Orchestrator {
    let orchestrator = if dry_run {
        let platform = Arc::new(InMemoryPlatform::new());
        Orchestrator::new(platform.clone(), platform.clone()).with_pre_create_hook(platform)
    } else {
        let context = cfg.kube_context.as_deref();
        let helm = HelmCli::new(&cfg.helm_binary).with_context(context);
        let kubectl = KubectlCli::new(&cfg.kubectl_binary)
            .with_context(context)
            .with_request_timeout(Duration::from_secs(cfg.default_timeout_seconds));
        Orchestrator::new(Arc::new(kubectl), Arc::new(helm.clone()))
            .with_pre_create_hook(Arc::new(ChartRepoHook::new(helm)))
    };

    if cfg.journal_enabled && !dry_run {
        orchestrator.with_journal_dir(cfg.attempts_dir())
    } else {
        orchestrator
    }
}

/// Provision a release
async fn provision(file: Option<PathBuf>, deadline: Option<u64>, dry_run: bool) -> Result<()> {
    let cfg = config::config()?;
    let raw = parse_request(&read_request(file)?, cfg.default_timeout_seconds)?;
    let orchestrator = build_orchestrator(cfg, dry_run);

    let mut cancel = Cancellation::new();
    if let Some(secs) = deadline {
        cancel = cancel.with_timeout(Duration::from_secs(secs));
    }

    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n[Interrupted, cleaning up]");
            on_interrupt.cancel();
        }
    });

    let outcome = orchestrator.provision_attempt(&raw, &cancel).await;

    match outcome.result {
        Ok(snapshot) => {
            print!("{}", serde_yaml::to_string(&snapshot)?);
            eprintln!("\n[Attempt {} completed successfully]", outcome.attempt.id);
            Ok(())
        }
        Err(e) => {
            report_failure(&outcome.attempt, &e);
            std::process::exit(1);
        }
    }
}

fn report_failure(attempt: &Attempt, error: &ProvisionError) {
    eprintln!("Error: {}", error);

    if let ProvisionError::Validation(v) = error {
        for violation in v.violations() {
            eprintln!("  - {}", violation);
        }
    }

    if last_active_stage(attempt).requires_compensation() {
        let failures = error.compensation_failures();
        if failures.is_empty() {
            eprintln!("Cleanup: all resources created by this attempt were removed");
        } else {
            eprintln!("Cleanup: {} action(s) failed, manual cleanup may be needed:", failures.len());
            for failure in failures {
                eprintln!("  - {}", failure);
            }
        }
    }

    eprintln!("\n[Attempt {} failed at stage {}]", attempt.id, last_active_stage(attempt));
}

/// Stage the attempt was in before it started failing
fn last_active_stage(attempt: &Attempt) -> Stage {
    attempt
        .stages()
        .into_iter()
        .rev()
        .find(|s| !matches!(s, Stage::Failed | Stage::CompensatingCleanup))
        .unwrap_or_default()
}

/// Validate a request and print the normalized parameters
fn validate_request(file: Option<PathBuf>) -> Result<()> {
    let cfg = config::config()?;
    let raw = parse_request(&read_request(file)?, cfg.default_timeout_seconds)?;

    match validate(&raw) {
        Ok(param) => {
            print!("{}", serde_yaml::to_string(&param)?);
            eprintln!("\n[Valid, fingerprint {}]", param.fingerprint());
            Ok(())
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            for violation in e.violations() {
                eprintln!("  - {}", violation);
            }
            std::process::exit(1);
        }
    }
}

/// Show the live state of a release
async fn show_status(release: &str, namespace: Option<String>) -> Result<()> {
    let cfg = config::config()?;
    let namespace = namespace.unwrap_or_else(|| release.to_string());
    let helm = HelmCli::new(&cfg.helm_binary).with_context(cfg.kube_context.as_deref());

    match helm.query(release, &namespace).await? {
        Some(snapshot) => print!("{}", serde_yaml::to_string(&snapshot)?),
        None => {
            eprintln!("Release '{}' not found in namespace '{}'", release, namespace);
            std::process::exit(1);
        }
    }

    Ok(())
}

/// List recent attempts, newest first
async fn list_attempts(limit: usize) -> Result<()> {
    let dir = AttemptJournal::base_directory()?;
    let mut attempts = Vec::new();

    for id in AttemptJournal::list_attempts(&dir).await? {
        let journal = AttemptJournal::at(&dir, id);
        if let Some(attempt) = journal.load_attempt().await? {
            attempts.push(attempt);
        }
    }

    if attempts.is_empty() {
        println!("No attempts found");
        return Ok(());
    }

    attempts.sort_by(|a, b| b.started_at.cmp(&a.started_at));

    println!(
        "{:<38} {:<20} {:<20} {:<22} {:<20}",
        "ATTEMPT ID", "RELEASE", "NAMESPACE", "STAGE", "STARTED"
    );
    println!("{}", "-".repeat(120));

    for attempt in attempts.into_iter().take(limit) {
        println!(
            "{:<38} {:<20} {:<20} {:<22} {:<20}",
            attempt.id,
            attempt.release,
            attempt.namespace,
            attempt.stage.to_string(),
            attempt.started_at.format("%Y-%m-%d %H:%M:%S")
        );
    }

    Ok(())
}

/// Show one attempt in detail
async fn show_attempt(id_str: &str) -> Result<()> {
    let id = Uuid::parse_str(id_str).with_context(|| format!("Invalid attempt ID: {}", id_str))?;
    let journal = AttemptJournal::locate(id)?;
    let attempt = journal
        .load_attempt()
        .await?
        .with_context(|| format!("Attempt not found: {}", id))?;

    println!("Attempt ID: {}", attempt.id);
    println!("Release: {}", attempt.release);
    println!("Namespace: {}", attempt.namespace);
    if let Some(ref fingerprint) = attempt.fingerprint {
        println!("Fingerprint: {}", fingerprint);
    }
    println!("Stage: {}", attempt.stage);
    println!("Started: {}", attempt.started_at);
    if let Some(completed) = attempt.completed_at {
        println!("Completed: {}", completed);
    }
    if let Some(ref error) = attempt.error {
        println!("Error: {}", error);
    }

    println!("\nTransitions:");
    for transition in &attempt.transitions {
        println!("  {}  {}", transition.at.format("%H:%M:%S%.3f"), transition.stage);
    }

    if !attempt.compensation_failures.is_empty() {
        println!("\nCompensation failures:");
        for failure in &attempt.compensation_failures {
            println!("  - {}", failure);
        }
    }

    Ok(())
}

/// Print the resolved configuration
fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("berth configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:     {}", cfg.home.display());
    println!("  Attempts: {}", cfg.attempts_dir().display());
    println!();
    println!("Platform:");
    println!("  helm:         {}", cfg.helm_binary);
    println!("  kubectl:      {}", cfg.kubectl_binary);
    println!(
        "  kube context: {}",
        cfg.kube_context.as_deref().unwrap_or("(current)")
    );
    println!();
    println!("Provisioning:");
    println!("  Default timeout: {}s", cfg.default_timeout_seconds);
    println!("  Journal:         {}", if cfg.journal_enabled { "on" } else { "off" });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request_injects_timeout() {
        let raw = parse_request("name: app1\nchart: x/y\n", 120).unwrap();
        assert_eq!(raw["name"], "app1");
        assert_eq!(raw["timeout_seconds"], 120);
    }

    #[test]
    fn test_parse_request_keeps_explicit_timeout() {
        let raw = parse_request("name: app1\nchart: x/y\ntimeout_seconds: 30\n", 120).unwrap();
        assert_eq!(raw["timeout_seconds"], 30);
    }

    #[test]
    fn test_parse_request_rejects_non_mapping() {
        assert!(parse_request("- a\n- b\n", 300).is_err());
        assert!(parse_request("   \n", 300).is_err());
    }

    #[test]
    fn test_last_active_stage() {
        let mut attempt = Attempt::new(Uuid::new_v4());
        attempt.enter(Stage::Validated);
        attempt.enter(Stage::NamespaceReady);
        attempt.enter(Stage::CompensatingCleanup);
        attempt.enter(Stage::Failed);
        assert_eq!(last_active_stage(&attempt), Stage::NamespaceReady);
        assert!(last_active_stage(&attempt).requires_compensation());

        let mut rejected = Attempt::new(Uuid::new_v4());
        rejected.enter(Stage::Failed);
        assert!(!last_active_stage(&rejected).requires_compensation());
    }
}
