// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Job Domain Types
//!
//! Describes *what* to run (`JobContext`), *how big* the hosting resource is
//! (`ProcessConfig`) and *where* the pieces live once started
//! (`SupervisorEndpoint`, `ExecutorEndpoint`, `ExecutorIdentifier`).
//!
//! A `JobContext` is built once at submission and never mutated afterwards;
//! it travels to the executor through the environment contract in [`env`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Environment variable names injected into every spawned executor.
pub mod env {
    /// `process` or `k8s`
    pub const RUN_MODE: &str = "JOBVISOR_RUN_MODE";
    /// Inline JSON-serialized `JobContext`
    pub const JOB_CONTEXT: &str = "JOBVISOR_JOB_CONTEXT";
    /// Path to a file holding the JSON-serialized `JobContext`
    pub const JOB_CONTEXT_FILE: &str = "JOBVISOR_JOB_CONTEXT_FILE";
    pub const EXECUTOR_USER: &str = "JOBVISOR_EXECUTOR_USER";
    pub const LOG_DIRECTORY: &str = "JOBVISOR_LOG_DIRECTORY";
    /// Listening port, present only in pull monitoring mode
    pub const EXECUTOR_PORT: &str = "JOBVISOR_EXECUTOR_PORT";
    /// Comma-separated report URLs, present only in push monitoring mode
    pub const REPORT_URLS: &str = "JOBVISOR_REPORT_URLS";
    /// Push report period in milliseconds, present only in push monitoring mode
    pub const REPORT_INTERVAL_MS: &str = "JOBVISOR_REPORT_INTERVAL_MS";
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobIdentity(pub String);

impl JobIdentity {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobIdentity {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable description of a submitted job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobContext {
    pub job_identity: JobIdentity,

    /// Fully-qualified executor name, resolved by the executor registry at start
    pub job_class: String,

    #[serde(default)]
    pub job_parameters: HashMap<String, String>,

    /// Properties and environment overrides forwarded to the executor
    #[serde(default)]
    pub job_properties: HashMap<String, String>,
}

impl JobContext {
    pub fn new(job_identity: JobIdentity, job_class: impl Into<String>) -> Self {
        Self {
            job_identity,
            job_class: job_class.into(),
            job_parameters: HashMap::new(),
            job_properties: HashMap::new(),
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.job_parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.job_properties.insert(key.into(), value.into());
        self
    }

    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.job_parameters.get(key).map(String::as_str)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Sizing and environment for the resource that hosts an executor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_memory_mb: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_memory_mb: Option<u64>,

    #[serde(default)]
    pub environments: HashMap<String, String>,
}

impl ProcessConfig {
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environments.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SupervisorEndpoint {
    pub host: String,
    pub port: u16,
}

impl SupervisorEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for SupervisorEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid executor identifier '{0}'")]
pub struct IdentifierParseError(pub String);

/// Handle naming one running executor instance.
///
/// Textual form: `<protocol>://<host>:<port>/<namespace>/<name>`, with an
/// empty namespace segment for the local-process backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutorIdentifier {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
}

impl ExecutorIdentifier {
    pub fn process(host: impl Into<String>, port: u16, name: impl Into<String>) -> Self {
        Self {
            protocol: "http".to_string(),
            host: host.into(),
            port,
            namespace: None,
            name: name.into(),
        }
    }

    pub fn container(
        host: impl Into<String>,
        port: u16,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            protocol: "http".to_string(),
            host: host.into(),
            port,
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    /// Base URL of the executor's status server.
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }
}

impl fmt::Display for ExecutorIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}:{}/{}/{}",
            self.protocol,
            self.host,
            self.port,
            self.namespace.as_deref().unwrap_or(""),
            self.name
        )
    }
}

impl FromStr for ExecutorIdentifier {
    type Err = IdentifierParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || IdentifierParseError(s.to_string());
        let (protocol, rest) = s.split_once("://").ok_or_else(err)?;
        let mut parts = rest.splitn(3, '/');
        let authority = parts.next().ok_or_else(err)?;
        let namespace = parts.next().ok_or_else(err)?;
        let name = parts.next().ok_or_else(err)?;
        let (host, port) = authority.rsplit_once(':').ok_or_else(err)?;
        let port = port.parse::<u16>().map_err(|_| err())?;
        if protocol.is_empty() || host.is_empty() || name.is_empty() {
            return Err(err());
        }
        Ok(Self {
            protocol: protocol.to_string(),
            host: host.to_string(),
            port,
            namespace: (!namespace.is_empty()).then(|| namespace.to_string()),
            name: name.to_string(),
        })
    }
}

/// Returned by `start_task`; the caller keeps it for liveness checks and teardown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorEndpoint {
    pub job_identity: JobIdentity,
    pub identifier: ExecutorIdentifier,
}

impl ExecutorEndpoint {
    pub fn host(&self) -> &str {
        &self.identifier.host
    }

    pub fn port(&self) -> u16 {
        self.identifier.port
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Preparing,
    Running,
    Done,
    Failed,
    Canceled,
}

impl JobStatus {
    pub fn is_terminated(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed | JobStatus::Canceled)
    }
}

/// Status snapshot served in pull mode and posted in push mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskReport {
    pub job_identity: JobIdentity,
    pub status: JobStatus,
    pub progress: f64,
    #[serde(default)]
    pub result: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor_endpoint: Option<String>,
}
