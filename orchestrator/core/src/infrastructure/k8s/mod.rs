// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Container Platform Backend
//!
//! Resource operators for pods, deployments and services, plus the
//! [`K8sJobCaller`](job_caller::K8sJobCaller) that runs executors in pods.
//!
//! All platform access goes through the namespace-scoped [`K8sApi`] trait.
//! [`RestK8sApi`](client::RestK8sApi) implements it over the platform REST
//! API; tests substitute an in-memory fake.

pub mod client;
pub mod deployment;
pub mod job_caller;
pub mod manifest;
pub mod pod;
pub mod service;

use crate::domain::resource::{LastActiveFn, ResourceError, ResourceId, ResourceKind};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

pub use client::RestK8sApi;
pub use deployment::{K8sDeployment, K8sDeploymentOperator};
pub use job_caller::K8sJobCaller;
pub use pod::{K8sPod, K8sPodOperator};
pub use service::{K8sService, K8sServiceOperator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum K8sObjectKind {
    Pod,
    Deployment,
    Service,
}

impl K8sObjectKind {
    /// REST collection path for this kind in `namespace`.
    pub fn collection_path(&self, namespace: &str) -> String {
        match self {
            K8sObjectKind::Pod => format!("/api/v1/namespaces/{}/pods", namespace),
            K8sObjectKind::Deployment => format!("/apis/apps/v1/namespaces/{}/deployments", namespace),
            K8sObjectKind::Service => format!("/api/v1/namespaces/{}/services", namespace),
        }
    }

    pub fn resource_kind(&self) -> ResourceKind {
        match self {
            K8sObjectKind::Pod => ResourceKind::K8sPod,
            K8sObjectKind::Deployment => ResourceKind::K8sDeployment,
            K8sObjectKind::Service => ResourceKind::K8sService,
        }
    }
}

impl fmt::Display for K8sObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            K8sObjectKind::Pod => "pod",
            K8sObjectKind::Deployment => "deployment",
            K8sObjectKind::Service => "service",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum K8sApiError {
    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists {
        kind: K8sObjectKind,
        namespace: String,
        name: String,
    },
    #[error("Platform API returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("Platform API request failed: {0}")]
    Transport(String),
    #[error("Failed to decode platform API response: {0}")]
    Decode(String),
}

/// Namespace-scoped object access on the container platform.
#[async_trait]
pub trait K8sApi: Send + Sync {
    /// Returns the created object as reported by the platform.
    async fn create(&self, kind: K8sObjectKind, namespace: &str, manifest: &Value) -> Result<Value, K8sApiError>;

    async fn list(&self, kind: K8sObjectKind, namespace: &str) -> Result<Vec<Value>, K8sApiError>;

    /// `Ok(false)` when the object did not exist.
    async fn delete(&self, kind: K8sObjectKind, namespace: &str, name: &str) -> Result<bool, K8sApiError>;
}

/// Create/list/delete of one object kind inside one namespace, with platform
/// errors mapped to `ResourceError`.
#[derive(Clone)]
pub(crate) struct NamespacedObjects {
    api: Arc<dyn K8sApi>,
    kind: K8sObjectKind,
    namespace: String,
}

impl NamespacedObjects {
    pub(crate) fn new(api: Arc<dyn K8sApi>, kind: K8sObjectKind, namespace: impl Into<String>) -> Self {
        Self {
            api,
            kind,
            namespace: namespace.into(),
        }
    }

    pub(crate) fn namespace(&self) -> &str {
        &self.namespace
    }

    fn provisioning(&self, e: impl fmt::Display) -> ResourceError {
        ResourceError::provisioning(self.kind.resource_kind(), e.to_string())
    }

    /// Posts `manifest`; on a name conflict returns the object already there.
    pub(crate) async fn create_or_existing(&self, name: &str, manifest: &Value) -> Result<Value, ResourceError> {
        match self.api.create(self.kind, &self.namespace, manifest).await {
            Ok(object) => {
                info!(kind = %self.kind, namespace = %self.namespace, object = name, "Created platform object");
                metrics::counter!("jobvisor_resources_created_total", "kind" => self.kind.resource_kind().as_str())
                    .increment(1);
                Ok(object)
            }
            Err(K8sApiError::AlreadyExists { .. }) => {
                debug!(kind = %self.kind, namespace = %self.namespace, object = name, "Object already exists, reusing it");
                self.list()
                    .await?
                    .into_iter()
                    .find(|object| manifest::object_name(object) == Some(name))
                    .ok_or_else(|| self.provisioning(format!("{} {} reported as existing but not listed", self.kind, name)))
            }
            Err(e) => Err(self.provisioning(e)),
        }
    }

    pub(crate) async fn list(&self) -> Result<Vec<Value>, ResourceError> {
        self.api
            .list(self.kind, &self.namespace)
            .await
            .map_err(|e| self.provisioning(e))
    }

    pub(crate) async fn delete(&self, id: &ResourceId) -> Result<String, ResourceError> {
        let deleted = self
            .api
            .delete(self.kind, &id.namespace, &id.name)
            .await
            .map_err(|e| self.provisioning(e))?;
        if deleted {
            info!(kind = %self.kind, resource_id = %id, "Deleted platform object");
            Ok(format!("{} {} deleted", self.kind, id))
        } else {
            Ok(format!("{} {} not found", self.kind, id))
        }
    }
}

/// Container resources are reclaimable once idle past `idle_timeout`, or when
/// nothing is known about their activity.
pub(crate) fn idle_past(id: &ResourceId, last_active: LastActiveFn<'_>, idle_timeout: Duration) -> bool {
    match last_active(id) {
        None => true,
        Some(at) => Utc::now()
            .signed_duration_since(at)
            .to_std()
            .map(|idle| idle > idle_timeout)
            .unwrap_or(false),
    }
}
