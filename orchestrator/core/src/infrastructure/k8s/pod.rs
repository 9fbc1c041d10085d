// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use super::manifest::{self, PodView};
use super::{idle_past, K8sApi, K8sObjectKind, NamespacedObjects};
use crate::domain::resource::{
    LastActiveFn, Resource, ResourceContext, ResourceError, ResourceId, ResourceKind, ResourceLocation,
    ResourceOperator, ResourceState,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct K8sPod {
    pub id: ResourceId,
    pub state: ResourceState,
    pub create_time: DateTime<Utc>,
    pub pod_ip: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

impl K8sPod {
    pub(crate) fn from_object(
        object: Value,
        location: &ResourceLocation,
        namespace: &str,
    ) -> Result<Self, ResourceError> {
        let view: PodView = serde_json::from_value(object)
            .map_err(|e| ResourceError::Serialization(e.to_string()))?;
        let status = view.status.unwrap_or_default();
        let terminating = view.metadata.deletion_timestamp.is_some();
        Ok(Self {
            id: ResourceId::new(
                location.clone(),
                ResourceKind::K8sPod,
                view.metadata.namespace.as_deref().unwrap_or(namespace),
                view.metadata.name,
            ),
            state: manifest::pod_state(status.phase.as_deref(), terminating),
            create_time: view.metadata.creation_timestamp.unwrap_or_else(Utc::now),
            pod_ip: status.pod_ip,
            labels: view.metadata.labels,
            annotations: view.metadata.annotations,
        })
    }
}

impl Resource for K8sPod {
    fn resource_id(&self) -> ResourceId {
        self.id.clone()
    }

    fn resource_state(&self) -> ResourceState {
        self.state
    }

    fn create_time(&self) -> DateTime<Utc> {
        self.create_time
    }
}

pub struct K8sPodOperator {
    objects: NamespacedObjects,
    location: ResourceLocation,
    idle_timeout: Duration,
}

impl K8sPodOperator {
    pub fn new(
        api: Arc<dyn K8sApi>,
        location: ResourceLocation,
        namespace: impl Into<String>,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            objects: NamespacedObjects::new(api, K8sObjectKind::Pod, namespace),
            location,
            idle_timeout,
        }
    }

    pub fn namespace(&self) -> &str {
        self.objects.namespace()
    }

    /// Linear scan of the namespace for an exact name match.
    pub async fn find(&self, namespace: &str, name: &str) -> Result<Option<K8sPod>, ResourceError> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .find(|pod| pod.id.namespace == namespace && pod.id.name == name))
    }
}

#[async_trait]
impl ResourceOperator<ResourceContext, K8sPod> for K8sPodOperator {
    async fn create(&self, context: &ResourceContext) -> Result<K8sPod, ResourceError> {
        let body = manifest::pod_manifest(context, self.namespace());
        let object = self.objects.create_or_existing(&context.name, &body).await?;
        K8sPod::from_object(object, &self.location, self.namespace())
    }

    async fn query(&self, id: &ResourceId) -> Result<Option<K8sPod>, ResourceError> {
        self.find(&id.namespace, &id.name).await
    }

    async fn list(&self) -> Result<Vec<K8sPod>, ResourceError> {
        let mut pods = Vec::new();
        for object in self.objects.list().await? {
            match K8sPod::from_object(object, &self.location, self.namespace()) {
                Ok(pod) => pods.push(pod),
                Err(e) => warn!(namespace = %self.namespace(), error = %e, "Skipping unreadable pod"),
            }
        }
        Ok(pods)
    }

    async fn destroy(&self, id: &ResourceId) -> Result<String, ResourceError> {
        self.objects.delete(id).await
    }

    fn can_be_destroyed(&self, id: &ResourceId, last_active: LastActiveFn<'_>) -> bool {
        idle_past(id, last_active, self.idle_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::super::fake::FakeK8sApi;
    use super::*;
    use serde_json::json;

    fn operator(api: Arc<FakeK8sApi>) -> K8sPodOperator {
        K8sPodOperator::new(api, ResourceLocation::new("eu", "g1"), "jobs", Duration::from_secs(60))
    }

    fn context(name: &str) -> ResourceContext {
        ResourceContext::new(ResourceLocation::new("eu", "g1"), "jobs", name).with_image("executor:1")
    }

    #[tokio::test]
    async fn test_create_then_find() {
        let api = FakeK8sApi::new();
        let pods = operator(api.clone());

        let created = pods.create(&context("exec-1")).await.unwrap();
        assert_eq!(created.id.name, "exec-1");
        assert_eq!(created.id.namespace, "jobs");
        assert_eq!(created.id.kind, ResourceKind::K8sPod);

        let found = pods.query(&created.id).await.unwrap().unwrap();
        assert_eq!(found.id, created.id);
        assert!(pods.find("other", "exec-1").await.unwrap().is_none());
        assert!(pods.find("jobs", "exec").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_on_existing_returns_existing_object() {
        let api = FakeK8sApi::new();
        api.put(
            K8sObjectKind::Pod,
            "jobs",
            json!({
                "metadata": { "name": "exec-1", "namespace": "jobs" },
                "status": { "phase": "Running", "podIP": "10.1.0.9" }
            }),
        );
        let pods = operator(api.clone());

        let pod = pods.create(&context("exec-1")).await.unwrap();
        assert_eq!(pod.state, ResourceState::Running);
        assert_eq!(pod.pod_ip.as_deref(), Some("10.1.0.9"));
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent() {
        let api = FakeK8sApi::new();
        let pods = operator(api.clone());
        let pod = pods.create(&context("exec-1")).await.unwrap();

        pods.destroy(&pod.id).await.unwrap();
        pods.destroy(&pod.id).await.unwrap();

        assert_eq!(api.delete_calls(), 2);
        assert!(!api.contains(K8sObjectKind::Pod, "jobs", "exec-1"));
        assert!(pods.query(&pod.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_can_be_destroyed_follows_idle_timeout() {
        let pods = operator(FakeK8sApi::new());
        let id = ResourceId::new(ResourceLocation::new("eu", "g1"), ResourceKind::K8sPod, "jobs", "exec-1");

        let active = |_: &ResourceId| -> Option<DateTime<Utc>> { Some(Utc::now()) };
        let unknown = |_: &ResourceId| -> Option<DateTime<Utc>> { None };
        assert!(!pods.can_be_destroyed(&id, &active));
        assert!(pods.can_be_destroyed(&id, &unknown));
    }
}
