// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// REST client for the container platform API.
//
// Plain JSON over HTTP with bearer-token auth. Only namespace-scoped
// create/list/delete is needed by the operators.

use super::{K8sApi, K8sApiError, K8sObjectKind};
use crate::domain::config::K8sConfig;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

pub struct RestK8sApi {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl RestK8sApi {
    pub fn new(base_url: impl Into<String>, token: Option<String>, request_timeout: Duration) -> Result<Self, K8sApiError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| K8sApiError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn from_config(config: &K8sConfig) -> Result<Self, K8sApiError> {
        Self::new(config.api_url.clone(), config.resolved_token(), config.request_timeout)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn api_error(response: Response) -> K8sApiError {
        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        K8sApiError::Api { status, message }
    }
}

#[async_trait]
impl K8sApi for RestK8sApi {
    async fn create(&self, kind: K8sObjectKind, namespace: &str, manifest: &Value) -> Result<Value, K8sApiError> {
        let url = self.url(&kind.collection_path(namespace));
        debug!(%url, "POST platform object");
        let response = self
            .authorized(self.client.post(&url).json(manifest))
            .send()
            .await
            .map_err(|e| K8sApiError::Transport(e.to_string()))?;

        match response.status() {
            status if status.is_success() => response
                .json::<Value>()
                .await
                .map_err(|e| K8sApiError::Decode(e.to_string())),
            StatusCode::CONFLICT => Err(K8sApiError::AlreadyExists {
                kind,
                namespace: namespace.to_string(),
                name: super::manifest::object_name(manifest).unwrap_or_default().to_string(),
            }),
            _ => Err(Self::api_error(response).await),
        }
    }

    async fn list(&self, kind: K8sObjectKind, namespace: &str) -> Result<Vec<Value>, K8sApiError> {
        let url = self.url(&kind.collection_path(namespace));
        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(|e| K8sApiError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }

        let mut body = response
            .json::<Value>()
            .await
            .map_err(|e| K8sApiError::Decode(e.to_string()))?;
        match body.get_mut("items").map(Value::take) {
            Some(Value::Array(items)) => Ok(items),
            Some(Value::Null) | None => Ok(Vec::new()),
            Some(other) => Err(K8sApiError::Decode(format!("'items' is not an array: {}", other))),
        }
    }

    async fn delete(&self, kind: K8sObjectKind, namespace: &str, name: &str) -> Result<bool, K8sApiError> {
        let url = self.url(&format!("{}/{}", kind.collection_path(namespace), name));
        debug!(%url, "DELETE platform object");
        let response = self
            .authorized(self.client.delete(&url))
            .send()
            .await
            .map_err(|e| K8sApiError::Transport(e.to_string()))?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(Self::api_error(response).await),
        }
    }
}
