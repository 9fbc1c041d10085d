// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Job Executor Contract
//!
//! Capability set every unit of work running inside a provisioned resource
//! implements, so the supervisor and callers can manage it generically.
//!
//! Lifecycle: `init` → `start` (runs to completion or until `stop`) → `close`.
//! `stop` is cooperative and may be invoked from any task while `start` runs.

use crate::domain::job::JobContext;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Unknown executor implementation: {0}")]
    UnknownExecutor(String),
    #[error("Executor not initialized")]
    NotInitialized,
    #[error("Invalid job parameter '{key}': {message}")]
    InvalidParameter { key: String, message: String },
    #[error("Executor failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// One-time setup before `start`.
    async fn init(&self, context: &JobContext) -> Result<(), ExecutorError>;

    /// Runs the work; `Ok(true)` when it completed normally, `Ok(false)` when stopped.
    async fn start(&self) -> Result<bool, ExecutorError>;

    fn stop(&self);

    /// Releases held resources. Idempotent.
    async fn close(&self);

    /// Percentage in `[0, 100]`.
    fn progress(&self) -> f64;

    /// Valid once `start` has returned.
    fn result(&self) -> serde_json::Value;
}
