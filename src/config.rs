//! Configuration for berth.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (BERTH_HOME, BERTH_HELM, BERTH_KUBECTL, BERTH_KUBE_CONTEXT)
//! 2. Config file (.berth/config.yaml)
//! 3. Defaults (~/.berth, `helm` and `kubectl` from PATH)
//!
//! Config file discovery:
//! - Searches current directory and parents for .berth/config.yaml
//! - Relative paths in the config file are resolved against the .berth/ directory

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

const DEFAULT_TIMEOUT_SECONDS: u64 = 300;

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub platform: PlatformConfig,
    #[serde(default)]
    pub provisioning: ProvisioningConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory (relative to .berth/)
    pub home: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlatformConfig {
    /// Path to the helm binary
    pub helm: Option<String>,
    /// Path to the kubectl binary
    pub kubectl: Option<String>,
    /// Kubeconfig context to target
    pub kube_context: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProvisioningConfig {
    /// Timeout applied when a request does not set `timeout_seconds`
    pub timeout_seconds: Option<u64>,
    /// Write attempt journals (default: true)
    pub journal: Option<bool>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to berth home (journals and state)
    pub home: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    /// helm binary
    pub helm_binary: String,
    /// kubectl binary
    pub kubectl_binary: String,
    /// Kubeconfig context, if pinned
    pub kube_context: Option<String>,
    /// Default per-operation timeout
    pub default_timeout_seconds: u64,
    /// Whether attempts are journaled
    pub journal_enabled: bool,
}

impl ResolvedConfig {
    /// Directory holding attempt journals
    pub fn attempts_dir(&self) -> PathBuf {
        self.home.join("attempts")
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".berth").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to `base`
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Environment override, ignoring empty values
fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Merge a parsed config file (if any) with environment and defaults
fn resolve(config_path: Option<PathBuf>, file: Option<ConfigFile>, default_home: PathBuf) -> ResolvedConfig {
    let file_dir = config_path
        .as_deref()
        .and_then(Path::parent)
        .unwrap_or(Path::new("."))
        .to_path_buf();
    let (paths, platform, provisioning) = match file {
        Some(f) => (f.paths, f.platform, f.provisioning),
        None => Default::default(),
    };

    let home = if let Some(env_home) = env_var("BERTH_HOME") {
        PathBuf::from(env_home)
    } else if let Some(ref home_path) = paths.home {
        resolve_path(&file_dir, home_path)
    } else {
        default_home
    };

    ResolvedConfig {
        home,
        config_file: config_path,
        helm_binary: env_var("BERTH_HELM")
            .or(platform.helm)
            .unwrap_or_else(|| "helm".to_string()),
        kubectl_binary: env_var("BERTH_KUBECTL")
            .or(platform.kubectl)
            .unwrap_or_else(|| "kubectl".to_string()),
        kube_context: env_var("BERTH_KUBE_CONTEXT").or(platform.kube_context),
        default_timeout_seconds: provisioning
            .timeout_seconds
            .unwrap_or(DEFAULT_TIMEOUT_SECONDS),
        journal_enabled: provisioning.journal.unwrap_or(true),
    }
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".berth");

    let config_path = find_config_file();
    let file = match config_path {
        Some(ref path) => Some(load_config_file(path)?),
        None => None,
    };

    Ok(resolve(config_path, file, default_home))
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Get the attempts journal directory ($BERTH_HOME/attempts)
pub fn attempts_dir() -> Result<PathBuf> {
    Ok(config()?.attempts_dir())
}
