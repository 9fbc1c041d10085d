// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Supervisor Configuration Types
//
// Kubernetes-style manifest (apiVersion/kind/metadata/spec) describing one
// jobvisor supervisor node:
// - Supervisor identity (host/port advertised to callers)
// - Monitoring mode (pull vs push) and report URLs
// - Port range and lease duration for executor control ports
// - Local-process backend settings
// - Optional container-platform backend settings
// - Logging

use crate::domain::supervisor::MonitorMode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobvisorConfigManifest {
    /// API version (must be "jobvisor.io/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "SupervisorConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    #[serde(default)]
    pub spec: JobvisorConfigSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobvisorConfigSpec {
    #[serde(default)]
    pub supervisor: SupervisorConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,

    #[serde(default)]
    pub ports: PortRangeConfig,

    #[serde(default)]
    pub local: LocalBackendConfig,

    /// Container-platform backend; absent means local processes only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub k8s: Option<K8sConfig>,

    /// User identifier handed to every executor
    #[serde(default = "default_executor_user")]
    pub executor_user: String,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Host advertised in supervisor and process executor endpoints
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_supervisor_port")]
    pub port: u16,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_supervisor_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub mode: MonitorMode,

    /// Push mode: URLs executors post their `TaskReport` to
    #[serde(default)]
    pub report_urls: Vec<String>,

    /// Push mode: interval between periodic reports
    #[serde(with = "humantime_serde", default = "default_report_interval")]
    pub report_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            mode: MonitorMode::default(),
            report_urls: Vec::new(),
            report_interval: default_report_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortRangeConfig {
    #[serde(default = "default_min_port")]
    pub min_port: u16,

    #[serde(default = "default_max_port")]
    pub max_port: u16,

    /// How long an issued port stays reserved before it may be handed out again
    #[serde(with = "humantime_serde", default = "default_lease_duration")]
    pub lease_duration: Duration,
}

impl Default for PortRangeConfig {
    fn default() -> Self {
        Self {
            min_port: default_min_port(),
            max_port: default_max_port(),
            lease_duration: default_lease_duration(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextTransfer {
    /// Serialized job context passed in an environment variable
    Inline,
    /// Serialized job context written to a file whose path is passed instead
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalBackendConfig {
    /// Bounded size of the local resource registry (LRU beyond this)
    #[serde(default = "default_registry_capacity")]
    pub registry_capacity: usize,

    /// Program started for every local executor
    #[serde(default = "default_executor_program")]
    pub executor_program: String,

    #[serde(default)]
    pub executor_args: Vec<String>,

    #[serde(default = "default_log_directory")]
    pub log_directory: PathBuf,

    #[serde(default = "default_context_transfer")]
    pub context_transfer: ContextTransfer,

    /// Where job context files are written when `context_transfer: file`
    #[serde(default = "default_context_directory")]
    pub context_directory: PathBuf,
}

impl Default for LocalBackendConfig {
    fn default() -> Self {
        Self {
            registry_capacity: default_registry_capacity(),
            executor_program: default_executor_program(),
            executor_args: Vec::new(),
            log_directory: default_log_directory(),
            context_transfer: default_context_transfer(),
            context_directory: default_context_directory(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct K8sConfig {
    /// Base URL of the platform API server (e.g. "https://10.0.0.1:6443")
    pub api_url: String,

    /// Bearer token (supports "env:VAR_NAME")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default = "default_region")]
    pub region: String,

    #[serde(default = "default_group")]
    pub group: String,

    /// Executor image for pods started by the supervisor
    pub image: String,

    /// Port executors listen on inside pods
    #[serde(default = "default_executor_listen_port")]
    pub executor_listen_port: u16,

    /// Container resources idle longer than this may be reclaimed
    #[serde(with = "humantime_serde", default = "default_idle_timeout")]
    pub idle_timeout: Duration,

    #[serde(with = "humantime_serde", default = "default_request_timeout")]
    pub request_timeout: Duration,
}

impl K8sConfig {
    /// Resolves `env:VAR_NAME` token references.
    pub fn resolved_token(&self) -> Option<String> {
        let token = self.token.as_ref()?;
        match token.strip_prefix("env:") {
            Some(var) => std::env::var(var).ok(),
            None => Some(token.clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format ("json" or "text")
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_supervisor_port() -> u16 {
    8990
}

fn default_report_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_min_port() -> u16 {
    40000
}

fn default_max_port() -> u16 {
    41000
}

fn default_lease_duration() -> Duration {
    Duration::from_secs(30)
}

fn default_registry_capacity() -> usize {
    1024
}

fn default_executor_program() -> String {
    "jobvisor-executor".to_string()
}

fn default_log_directory() -> PathBuf {
    std::env::temp_dir().join("jobvisor").join("logs")
}

fn default_context_transfer() -> ContextTransfer {
    ContextTransfer::Inline
}

fn default_context_directory() -> PathBuf {
    std::env::temp_dir().join("jobvisor").join("contexts")
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_region() -> String {
    "default".to_string()
}

fn default_group() -> String {
    "default".to_string()
}

fn default_executor_listen_port() -> u16 {
    8989
}

fn default_idle_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_executor_user() -> String {
    "jobvisor".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Default for JobvisorConfigManifest {
    fn default() -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "jobvisor-node".to_string());

        Self {
            api_version: "jobvisor.io/v1".to_string(),
            kind: "SupervisorConfig".to_string(),
            metadata: ManifestMetadata {
                name: hostname,
                labels: None,
            },
            spec: JobvisorConfigSpec {
                executor_user: default_executor_user(),
                ..JobvisorConfigSpec::default()
            },
        }
    }
}

impl JobvisorConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. JOBVISOR_CONFIG_PATH environment variable
    /// 2. ./jobvisor-config.yaml (working directory)
    /// 3. ~/.jobvisor/config.yaml (user home)
    /// 4. /etc/jobvisor/config.yaml (Unix)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("JOBVISOR_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./jobvisor-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".jobvisor").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        #[cfg(unix)]
        {
            let system_config = PathBuf::from("/etc/jobvisor/config.yaml");
            if system_config.exists() {
                return Some(system_config);
            }
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(explicit_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit path must exist and parse
        if let Some(path) = explicit_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        let mut config = match Self::discover_config() {
            Some(config_path) => {
                tracing::info!("Loading configuration from discovered path: {:?}", config_path);
                Self::from_yaml_file(config_path)?
            }
            None => {
                tracing::warn!("No configuration file found in standard locations. Using defaults.");
                Self::default()
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Environment variables win over file values
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("JOBVISOR_SUPERVISOR_HOST") {
            self.spec.supervisor.host = host;
        }
        if let Some(port) = std::env::var("JOBVISOR_SUPERVISOR_PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
        {
            self.spec.supervisor.port = port;
        }
        match std::env::var("JOBVISOR_MONITOR_MODE").ok().as_deref() {
            Some("pull") => self.spec.monitor.mode = MonitorMode::Pull,
            Some("push") => self.spec.monitor.mode = MonitorMode::Push,
            Some(other) => tracing::warn!("Ignoring unknown JOBVISOR_MONITOR_MODE '{}'", other),
            None => {}
        }
        if let (Ok(token), Some(k8s)) = (std::env::var("JOBVISOR_K8S_TOKEN"), self.spec.k8s.as_mut()) {
            k8s.token = Some(token);
        }
    }

    /// Validate manifest header and value ranges
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != "jobvisor.io/v1" {
            anyhow::bail!("Unsupported apiVersion '{}', expected 'jobvisor.io/v1'", self.api_version);
        }
        if self.kind != "SupervisorConfig" {
            anyhow::bail!("Unsupported kind '{}', expected 'SupervisorConfig'", self.kind);
        }
        if self.spec.ports.min_port == 0 {
            anyhow::bail!("ports.min_port must be greater than zero");
        }
        if self.spec.ports.min_port > self.spec.ports.max_port {
            anyhow::bail!(
                "ports.min_port ({}) must not exceed ports.max_port ({})",
                self.spec.ports.min_port,
                self.spec.ports.max_port
            );
        }
        if self.spec.local.registry_capacity == 0 {
            anyhow::bail!("local.registry_capacity must be greater than zero");
        }
        if self.spec.monitor.mode == MonitorMode::Push && self.spec.monitor.report_urls.is_empty() {
            anyhow::bail!("monitor.report_urls is required in push mode");
        }
        if self.spec.monitor.report_interval.is_zero() {
            anyhow::bail!("monitor.report_interval must be greater than zero");
        }
        Ok(())
    }
}
