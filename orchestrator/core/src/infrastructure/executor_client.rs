// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// HTTP clients for executor status.
//
// - `ExecutorStatusClient`: pull mode, the supervisor side asks the executor.
// - `ReportPublisher`: push mode, the executor posts to known report URLs.

use crate::domain::job::{ExecutorIdentifier, TaskReport};
use futures::future::join_all;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum StatusClientError {
    #[error("Failed to reach executor: {0}")]
    Transport(String),
    #[error("Executor answered with HTTP {0}")]
    Status(u16),
    #[error("Failed to decode task report: {0}")]
    Decode(String),
}

fn build_client(timeout: Duration) -> Result<Client, StatusClientError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| StatusClientError::Transport(e.to_string()))
}

#[derive(Clone)]
pub struct ExecutorStatusClient {
    client: Client,
}

impl ExecutorStatusClient {
    pub fn new(timeout: Duration) -> Result<Self, StatusClientError> {
        Ok(Self {
            client: build_client(timeout)?,
        })
    }

    /// `false` on any transport failure or non-success answer.
    pub async fn heartbeat(&self, identifier: &ExecutorIdentifier) -> bool {
        let url = format!("{}/heartbeat", identifier.base_url());
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(executor = %identifier, error = %e, "Heartbeat failed");
                false
            }
        }
    }

    pub async fn status(&self, identifier: &ExecutorIdentifier) -> Result<TaskReport, StatusClientError> {
        let url = format!("{}/status", identifier.base_url());
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| StatusClientError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(StatusClientError::Status(response.status().as_u16()));
        }
        response
            .json::<TaskReport>()
            .await
            .map_err(|e| StatusClientError::Decode(e.to_string()))
    }
}

/// Posts task reports to every configured URL.
#[derive(Clone)]
pub struct ReportPublisher {
    client: Client,
    urls: Vec<String>,
}

impl ReportPublisher {
    pub fn new(urls: Vec<String>, timeout: Duration) -> Result<Self, StatusClientError> {
        Ok(Self {
            client: build_client(timeout)?,
            urls,
        })
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    /// Number of URLs that accepted the report. Failures are logged only.
    pub async fn publish(&self, report: &TaskReport) -> usize {
        let deliveries = self.urls.iter().map(|url| async move {
            match self.client.post(url).json(report).send().await {
                Ok(response) if response.status().is_success() => true,
                Ok(response) => {
                    warn!(%url, status = response.status().as_u16(), "Report rejected");
                    false
                }
                Err(e) => {
                    warn!(%url, error = %e, "Failed to post report");
                    false
                }
            }
        });
        join_all(deliveries).await.into_iter().filter(|delivered| *delivered).count()
    }
}
