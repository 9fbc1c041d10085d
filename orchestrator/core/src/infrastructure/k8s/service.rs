// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use super::manifest::{self, ServiceView};
use super::{idle_past, K8sApi, K8sObjectKind, NamespacedObjects};
use crate::domain::resource::{
    LastActiveFn, Resource, ResourceContext, ResourceError, ResourceId, ResourceKind, ResourceLocation,
    ResourceOperator, ResourceState,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct K8sService {
    pub id: ResourceId,
    pub state: ResourceState,
    pub create_time: DateTime<Utc>,
    pub cluster_ip: Option<String>,
    pub ports: Vec<u16>,
}

impl K8sService {
    fn from_object(object: Value, location: &ResourceLocation, namespace: &str) -> Result<Self, ResourceError> {
        let view: ServiceView = serde_json::from_value(object).map_err(|e| ResourceError::Serialization(e.to_string()))?;
        let spec = view.spec.unwrap_or_default();
        let state = if view.metadata.deletion_timestamp.is_some() {
            ResourceState::Destroyed
        } else {
            manifest::service_state(spec.cluster_ip.as_deref())
        };
        Ok(Self {
            id: ResourceId::new(
                location.clone(),
                ResourceKind::K8sService,
                view.metadata.namespace.as_deref().unwrap_or(namespace),
                view.metadata.name,
            ),
            state,
            create_time: view.metadata.creation_timestamp.unwrap_or_else(Utc::now),
            cluster_ip: spec.cluster_ip,
            ports: spec.ports.into_iter().map(|p| p.port).collect(),
        })
    }
}

impl Resource for K8sService {
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

pub struct K8sServiceOperator {
    objects: NamespacedObjects,
    location: ResourceLocation,
    idle_timeout: Duration,
}

impl K8sServiceOperator {
    pub fn new(
        api: Arc<dyn K8sApi>,
        location: ResourceLocation,
        namespace: impl Into<String>,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            objects: NamespacedObjects::new(api, K8sObjectKind::Service, namespace),
            location,
            idle_timeout,
        }
    }
}

#[async_trait]
impl ResourceOperator<ResourceContext, K8sService> for K8sServiceOperator {
    async fn create(&self, context: &ResourceContext) -> Result<K8sService, ResourceError> {
        let body = manifest::service_manifest(context, self.objects.namespace());
        let object = self.objects.create_or_existing(&context.name, &body).await?;
        K8sService::from_object(object, &self.location, self.objects.namespace())
    }

    async fn query(&self, id: &ResourceId) -> Result<Option<K8sService>, ResourceError> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .find(|s| s.id.namespace == id.namespace && s.id.name == id.name))
    }

    async fn list(&self) -> Result<Vec<K8sService>, ResourceError> {
        let mut services = Vec::new();
        for object in self.objects.list().await? {
            match K8sService::from_object(object, &self.location, self.objects.namespace()) {
                Ok(service) => services.push(service),
                Err(e) => warn!(namespace = %self.objects.namespace(), error = %e, "Skipping unreadable service"),
            }
        }
        Ok(services)
    }

    async fn destroy(&self, id: &ResourceId) -> Result<String, ResourceError> {
        self.objects.delete(id).await
    }

    fn can_be_destroyed(&self, id: &ResourceId, last_active: LastActiveFn<'_>) -> bool {
        idle_past(id, last_active, self.idle_timeout)
    }
}
