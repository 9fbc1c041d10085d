// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Task Supervision Contracts
//!
//! Turns a `JobContext` + `ProcessConfig` into a running, addressable
//! executor and reclaims it later.
//!
//! ## Layers
//! | Contract | Responsibility |
//! |----------|----------------|
//! | [`TaskSupervisor`] | start / check / destroy tasks (pluggable transport boundary) |
//! | [`JobCaller`] | backend-specific launch of the process or pod hosting an executor |
//!
//! The wire protocol between a caller and a remote `SupervisorEndpoint` is
//! not defined here; remote transports implement [`TaskSupervisor`].

use crate::domain::job::{
    ExecutorEndpoint, ExecutorIdentifier, JobContext, ProcessConfig, SupervisorEndpoint,
};
use crate::domain::resource::ResourceError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Whether the supervisor polls the executor (pull) or the executor reports
/// to a known host URL (push).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorMode {
    #[default]
    Pull,
    Push,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Process,
    K8s,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Process => "process",
            RunMode::K8s => "k8s",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PortError {
    #[error("No free port available in range [{min_port}, {max_port}]")]
    Exhausted { min_port: u16, max_port: u16 },
    #[error("Invalid port range [{min_port}, {max_port}]")]
    InvalidRange { min_port: u16, max_port: u16 },
}

#[derive(Debug, Error)]
pub enum JobCallerError {
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error("Failed to launch executor for job {job_id}: {message}")]
    Launch { job_id: String, message: String },
    #[error("Failed to terminate executor {identifier}: {message}")]
    Terminate { identifier: String, message: String },
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Port(#[from] PortError),
    #[error(transparent)]
    JobCaller(#[from] JobCallerError),
    #[error("Failed to hand job context to executor: {0}")]
    ContextTransfer(String),
}

/// Everything a job caller needs to boot one executor.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub job_context: JobContext,
    pub process_config: ProcessConfig,
    /// Fully assembled executor environment (contract variables + overrides)
    pub environment: HashMap<String, String>,
    /// Port the executor will listen on in pull mode
    pub listen_port: Option<u16>,
}

#[async_trait]
pub trait JobCaller: Send + Sync {
    fn run_mode(&self) -> RunMode;

    async fn start(&self, request: LaunchRequest) -> Result<ExecutorIdentifier, JobCallerError>;

    async fn is_alive(&self, identifier: &ExecutorIdentifier) -> Result<bool, JobCallerError>;

    /// Current address of the executor. Backends that only learn the final
    /// address after launch (pods get their IP once scheduled) override this.
    async fn resolve(
        &self,
        identifier: &ExecutorIdentifier,
    ) -> Result<ExecutorIdentifier, JobCallerError> {
        Ok(identifier.clone())
    }

    /// Must succeed for an executor that is already gone.
    async fn destroy(&self, identifier: &ExecutorIdentifier) -> Result<(), JobCallerError>;
}

#[async_trait]
pub trait TaskSupervisor: Send + Sync {
    fn supervisor_endpoint(&self) -> SupervisorEndpoint;

    async fn start_task(
        &self,
        job_context: &JobContext,
        process_config: &ProcessConfig,
    ) -> Result<ExecutorEndpoint, SupervisorError>;

    async fn is_task_alive(&self, identifier: &ExecutorIdentifier) -> Result<bool, SupervisorError>;

    /// Refreshes the executor address, e.g. once a pod has been assigned an IP.
    async fn resolve_endpoint(
        &self,
        endpoint: &ExecutorEndpoint,
    ) -> Result<ExecutorEndpoint, SupervisorError> {
        Ok(endpoint.clone())
    }

    /// Returns whether a tracked task was removed. Safe on terminated executors.
    async fn destroy_task(
        &self,
        endpoint: &ExecutorEndpoint,
        job_context: &JobContext,
    ) -> Result<bool, SupervisorError>;
}
