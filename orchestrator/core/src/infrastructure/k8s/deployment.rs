// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use super::manifest::{self, DeploymentView, DEPLOYMENT_LABEL};
use super::pod::{K8sPod, K8sPodOperator};
use super::{idle_past, K8sApi, K8sObjectKind, NamespacedObjects};
use crate::domain::resource::{
    LastActiveFn, Resource, ResourceContext, ResourceError, ResourceId, ResourceKind, ResourceLocation,
    ResourceOperator, ResourceState,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::warn;

/// A deployment plus a lazily computed view of the pods it owns.
///
/// Clones share the pod cache.
#[derive(Clone)]
pub struct K8sDeployment {
    pub id: ResourceId,
    pub state: ResourceState,
    pub create_time: DateTime<Utc>,
    pub replicas: u32,
    pub ready_replicas: u32,
    pod_operator: Arc<K8sPodOperator>,
    pods: Arc<OnceCell<Vec<K8sPod>>>,
}

impl K8sDeployment {
    fn from_object(
        object: Value,
        location: &ResourceLocation,
        namespace: &str,
        pod_operator: Arc<K8sPodOperator>,
    ) -> Result<Self, ResourceError> {
        let view: DeploymentView =
            serde_json::from_value(object).map_err(|e| ResourceError::Serialization(e.to_string()))?;
        let replicas = view.spec.and_then(|s| s.replicas).unwrap_or(1);
        let ready_replicas = view.status.and_then(|s| s.ready_replicas).unwrap_or(0);
        let state = if view.metadata.deletion_timestamp.is_some() {
            ResourceState::Destroyed
        } else {
            manifest::deployment_state(replicas, ready_replicas)
        };

        Ok(Self {
            id: ResourceId::new(
                location.clone(),
                ResourceKind::K8sDeployment,
                view.metadata.namespace.as_deref().unwrap_or(namespace),
                view.metadata.name,
            ),
            state,
            create_time: view.metadata.creation_timestamp.unwrap_or_else(Utc::now),
            replicas,
            ready_replicas,
            pod_operator,
            pods: Arc::new(OnceCell::new()),
        })
    }

    /// Pods named `<deployment>-*` carrying this deployment's identity label.
    /// Listed once; later calls reuse the first result.
    pub async fn pods(&self) -> Result<&[K8sPod], ResourceError> {
        let name = &self.id.name;
        let pods = self
            .pods
            .get_or_try_init(|| async move {
                let prefix = format!("{}-", name);
                let owned = self
                    .pod_operator
                    .list()
                    .await?
                    .into_iter()
                    .filter(|pod| pod.id.name.starts_with(&prefix) && pod.labels.get(DEPLOYMENT_LABEL) == Some(name))
                    .collect::<Vec<_>>();
                Ok::<_, ResourceError>(owned)
            })
            .await?;
        Ok(pods.as_slice())
    }
}

impl fmt::Debug for K8sDeployment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("K8sDeployment")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("replicas", &self.replicas)
            .field("ready_replicas", &self.ready_replicas)
            .finish()
    }
}

impl Resource for K8sDeployment {
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

pub struct K8sDeploymentOperator {
    objects: NamespacedObjects,
    location: ResourceLocation,
    idle_timeout: Duration,
    pod_operator: Arc<K8sPodOperator>,
}

impl K8sDeploymentOperator {
    pub fn new(
        api: Arc<dyn K8sApi>,
        location: ResourceLocation,
        namespace: impl Into<String>,
        idle_timeout: Duration,
        pod_operator: Arc<K8sPodOperator>,
    ) -> Self {
        Self {
            objects: NamespacedObjects::new(api, K8sObjectKind::Deployment, namespace),
            location,
            idle_timeout,
            pod_operator,
        }
    }

    fn decode(&self, object: Value) -> Result<K8sDeployment, ResourceError> {
        K8sDeployment::from_object(object, &self.location, self.objects.namespace(), self.pod_operator.clone())
    }
}

#[async_trait]
impl ResourceOperator<ResourceContext, K8sDeployment> for K8sDeploymentOperator {
    async fn create(&self, context: &ResourceContext) -> Result<K8sDeployment, ResourceError> {
        let body = manifest::deployment_manifest(context, self.objects.namespace());
        let object = self.objects.create_or_existing(&context.name, &body).await?;
        self.decode(object)
    }

    async fn query(&self, id: &ResourceId) -> Result<Option<K8sDeployment>, ResourceError> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .find(|d| d.id.namespace == id.namespace && d.id.name == id.name))
    }

    async fn list(&self) -> Result<Vec<K8sDeployment>, ResourceError> {
        let mut deployments = Vec::new();
        for object in self.objects.list().await? {
            match self.decode(object) {
                Ok(deployment) => deployments.push(deployment),
                Err(e) => warn!(namespace = %self.objects.namespace(), error = %e, "Skipping unreadable deployment"),
            }
        }
        Ok(deployments)
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

    fn operators(api: Arc<FakeK8sApi>) -> K8sDeploymentOperator {
        let location = ResourceLocation::new("eu", "g1");
        let pods = Arc::new(K8sPodOperator::new(api.clone(), location.clone(), "jobs", Duration::from_secs(60)));
        K8sDeploymentOperator::new(api, location, "jobs", Duration::from_secs(60), pods)
    }

    fn pod(name: &str, owner: Option<&str>) -> Value {
        let labels = match owner {
            Some(owner) => json!({ DEPLOYMENT_LABEL: owner }),
            None => json!({}),
        };
        json!({
            "metadata": { "name": name, "namespace": "jobs", "labels": labels },
            "status": { "phase": "Running" }
        })
    }

    #[tokio::test]
    async fn test_pods_filters_by_prefix_and_label() {
        let api = FakeK8sApi::new();
        api.put(K8sObjectKind::Pod, "jobs", pod("web-abc", Some("web")));
        api.put(K8sObjectKind::Pod, "jobs", pod("web-def", Some("web")));
        api.put(K8sObjectKind::Pod, "jobs", pod("web-unlabelled", None));
        api.put(K8sObjectKind::Pod, "jobs", pod("webber-x", Some("webber")));
        api.put(K8sObjectKind::Pod, "jobs", pod("web-foreign", Some("api")));

        let deployments = operators(api.clone());
        let context = ResourceContext::new(ResourceLocation::new("eu", "g1"), "jobs", "web").with_replicas(2);
        let deployment = deployments.create(&context).await.unwrap();

        let mut names: Vec<_> = deployment.pods().await.unwrap().iter().map(|p| p.id.name.clone()).collect();
        names.sort();
        assert_eq!(names, vec!["web-abc".to_string(), "web-def".to_string()]);
    }

    #[tokio::test]
    async fn test_pods_computed_once_under_concurrent_access() {
        let api = FakeK8sApi::new();
        api.put(K8sObjectKind::Pod, "jobs", pod("web-abc", Some("web")));

        let deployments = operators(api.clone());
        let context = ResourceContext::new(ResourceLocation::new("eu", "g1"), "jobs", "web");
        let deployment = deployments.create(&context).await.unwrap();
        let shared = deployment.clone();

        let (first, second) = tokio::join!(deployment.pods(), shared.pods());
        assert_eq!(first.unwrap().len(), 1);
        assert_eq!(second.unwrap().len(), 1);
        assert_eq!(api.list_calls(K8sObjectKind::Pod), 1);

        deployment.pods().await.unwrap();
        assert_eq!(api.list_calls(K8sObjectKind::Pod), 1);
    }

    #[tokio::test]
    async fn test_state_follows_ready_replicas() {
        let api = FakeK8sApi::new();
        api.put(
            K8sObjectKind::Deployment,
            "jobs",
            json!({
                "metadata": { "name": "web", "namespace": "jobs" },
                "spec": { "replicas": 3 },
                "status": { "readyReplicas": 1 }
            }),
        );
        let deployments = operators(api.clone());
        let id = ResourceId::new(ResourceLocation::new("eu", "g1"), ResourceKind::K8sDeployment, "jobs", "web");

        let deployment = deployments.query(&id).await.unwrap().unwrap();
        assert_eq!(deployment.state, ResourceState::Creating);

        api.put(
            K8sObjectKind::Deployment,
            "jobs",
            json!({
                "metadata": { "name": "web", "namespace": "jobs" },
                "spec": { "replicas": 3 },
                "status": { "readyReplicas": 3 }
            }),
        );
        let deployment = deployments.query(&id).await.unwrap().unwrap();
        assert_eq!(deployment.resource_state(), ResourceState::Running);

        deployments.destroy(&id).await.unwrap();
        assert!(deployments.query(&id).await.unwrap().is_none());
        deployments.destroy(&id).await.unwrap();
    }
}
