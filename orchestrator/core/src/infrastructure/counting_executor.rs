// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Reference executor: counts up to `maxCount`, one tick every
// `intervalMillis`, until done or stopped.

use crate::domain::executor::{ExecutorError, JobExecutor};
use crate::domain::job::JobContext;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub const COUNTING_EXECUTOR: &str = "jobvisor.executor.CountingExecutor";

const MAX_COUNT_PARAM: &str = "maxCount";
const INTERVAL_PARAM: &str = "intervalMillis";
const DEFAULT_MAX_COUNT: u64 = 10;
const DEFAULT_INTERVAL_MS: u64 = 1000;

#[derive(Debug, Clone, Copy)]
struct CountingSettings {
    max_count: u64,
    interval: Duration,
}

#[derive(Default)]
pub struct CountingExecutor {
    settings: Mutex<Option<CountingSettings>>,
    count: AtomicU64,
    cancel: CancellationToken,
}

impl CountingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }
}

fn numeric_parameter(context: &JobContext, key: &str, default: u64) -> Result<u64, ExecutorError> {
    match context.parameter(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<u64>().map_err(|e| ExecutorError::InvalidParameter {
            key: key.to_string(),
            message: e.to_string(),
        }),
    }
}

#[async_trait]
impl JobExecutor for CountingExecutor {
    async fn init(&self, context: &JobContext) -> Result<(), ExecutorError> {
        let settings = CountingSettings {
            max_count: numeric_parameter(context, MAX_COUNT_PARAM, DEFAULT_MAX_COUNT)?,
            interval: Duration::from_millis(numeric_parameter(context, INTERVAL_PARAM, DEFAULT_INTERVAL_MS)?),
        };
        debug!(job_id = %context.job_identity, ?settings, "Counting executor initialized");
        *self.settings.lock() = Some(settings);
        Ok(())
    }

    async fn start(&self) -> Result<bool, ExecutorError> {
        let settings = (*self.settings.lock()).ok_or(ExecutorError::NotInitialized)?;

        while self.count() < settings.max_count {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!(count = self.count(), "Counting executor stopped");
                    return Ok(false);
                }
                _ = tokio::time::sleep(settings.interval) => {
                    self.count.fetch_add(1, Ordering::SeqCst);
                }
            }
        }
        Ok(true)
    }

    fn stop(&self) {
        self.cancel.cancel();
    }

    async fn close(&self) {
        self.cancel.cancel();
    }

    fn progress(&self) -> f64 {
        match *self.settings.lock() {
            Some(s) if s.max_count > 0 => (self.count() as f64 / s.max_count as f64 * 100.0).min(100.0),
            Some(_) => 100.0,
            None => 0.0,
        }
    }

    fn result(&self) -> serde_json::Value {
        let max_count = (*self.settings.lock()).map(|s| s.max_count);
        json!({ "count": self.count(), "maxCount": max_count })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::JobIdentity;
    use std::sync::Arc;

    fn context(max_count: &str, interval_ms: &str) -> JobContext {
        JobContext::new(JobIdentity::new(), COUNTING_EXECUTOR)
            .with_parameter(MAX_COUNT_PARAM, max_count)
            .with_parameter(INTERVAL_PARAM, interval_ms)
    }

    #[tokio::test]
    async fn test_counts_to_cap() {
        let executor = CountingExecutor::new();
        executor.init(&context("3", "1")).await.unwrap();

        assert!(executor.start().await.unwrap());
        assert_eq!(executor.count(), 3);
        assert_eq!(executor.progress(), 100.0);
        assert_eq!(executor.result()["count"], 3);
    }

    #[tokio::test]
    async fn test_stop_from_another_task() {
        let executor = Arc::new(CountingExecutor::new());
        executor.init(&context("1000", "10000")).await.unwrap();

        let running = executor.clone();
        let handle = tokio::spawn(async move { running.start().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        executor.stop();

        assert!(!handle.await.unwrap().unwrap());
        assert!(executor.progress() < 100.0);
        executor.close().await;
        executor.close().await;
    }

    #[tokio::test]
    async fn test_start_before_init_fails() {
        let executor = CountingExecutor::new();
        assert!(matches!(executor.start().await, Err(ExecutorError::NotInitialized)));
        assert_eq!(executor.progress(), 0.0);
    }

    #[tokio::test]
    async fn test_invalid_parameter_is_rejected() {
        let executor = CountingExecutor::new();
        let err = executor.init(&context("lots", "1")).await.unwrap_err();
        assert!(matches!(err, ExecutorError::InvalidParameter { ref key, .. } if key == MAX_COUNT_PARAM));
    }

    #[tokio::test]
    async fn test_defaults_apply_without_parameters() {
        let executor = CountingExecutor::new();
        executor
            .init(&JobContext::new(JobIdentity::new(), COUNTING_EXECUTOR))
            .await
            .unwrap();
        assert_eq!(executor.result()["maxCount"], DEFAULT_MAX_COUNT);
    }
}
