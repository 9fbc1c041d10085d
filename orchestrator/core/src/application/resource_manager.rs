// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Resource Manager Application Service
//!
//! Registry of resource operators keyed by [`ResourceKind`] and
//! [`ResourceLocation`], so two groups of the same backend stay apart. Every
//! call is dispatched to the operator registered for the kind and location in
//! question; an unregistered kind is reported as [`ResourceError::UnknownKind`]
//! and a known kind at an unregistered location as
//! [`ResourceError::UnknownLocation`].
//!
//! Per-backend resources are unified as the tagged [`AnyResource`] so callers
//! can handle results from any backend uniformly.

use crate::domain::events::ResourceEvent;
use crate::domain::resource::{
    LastActiveFn, Resource, ResourceContext, ResourceError, ResourceId, ResourceKind,
    ResourceLocation, ResourceOperator, ResourceState,
};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::k8s::{K8sDeployment, K8sPod, K8sService};
use crate::infrastructure::local_process::LocalResource;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub enum AnyResource {
    Process(LocalResource),
    Pod(K8sPod),
    Deployment(K8sDeployment),
    Service(K8sService),
}

impl AnyResource {
    fn inner(&self) -> &dyn Resource {
        match self {
            AnyResource::Process(r) => r,
            AnyResource::Pod(r) => r,
            AnyResource::Deployment(r) => r,
            AnyResource::Service(r) => r,
        }
    }
}

impl Resource for AnyResource {
    fn resource_id(&self) -> ResourceId {
        self.inner().resource_id()
    }

    fn resource_state(&self) -> ResourceState {
        self.inner().resource_state()
    }

    fn create_time(&self) -> DateTime<Utc> {
        self.inner().create_time()
    }
}

impl From<LocalResource> for AnyResource {
    fn from(r: LocalResource) -> Self {
        AnyResource::Process(r)
    }
}

impl From<K8sPod> for AnyResource {
    fn from(r: K8sPod) -> Self {
        AnyResource::Pod(r)
    }
}

impl From<K8sDeployment> for AnyResource {
    fn from(r: K8sDeployment) -> Self {
        AnyResource::Deployment(r)
    }
}

impl From<K8sService> for AnyResource {
    fn from(r: K8sService) -> Self {
        AnyResource::Service(r)
    }
}

/// Presents a backend operator as one producing [`AnyResource`].
struct ErasedOperator<O, R> {
    inner: Arc<O>,
    _resource: PhantomData<fn() -> R>,
}

#[async_trait]
impl<O, R> ResourceOperator<ResourceContext, AnyResource> for ErasedOperator<O, R>
where
    O: ResourceOperator<ResourceContext, R> + 'static,
    R: Into<AnyResource> + Send + Sync + 'static,
{
    async fn create(&self, context: &ResourceContext) -> Result<AnyResource, ResourceError> {
        Ok(self.inner.create(context).await?.into())
    }

    async fn query(&self, id: &ResourceId) -> Result<Option<AnyResource>, ResourceError> {
        Ok(self.inner.query(id).await?.map(Into::into))
    }

    async fn list(&self) -> Result<Vec<AnyResource>, ResourceError> {
        Ok(self.inner.list().await?.into_iter().map(Into::into).collect())
    }

    async fn destroy(&self, id: &ResourceId) -> Result<String, ResourceError> {
        self.inner.destroy(id).await
    }

    fn can_be_destroyed(&self, id: &ResourceId, last_active: LastActiveFn<'_>) -> bool {
        self.inner.can_be_destroyed(id, last_active)
    }
}

type DynOperator = Arc<dyn ResourceOperator<ResourceContext, AnyResource>>;

#[derive(Default)]
pub struct ResourceManager {
    operators: HashMap<(ResourceKind, ResourceLocation), DynOperator>,
    event_bus: Option<EventBus>,
}

impl ResourceManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Registers `operator` for `kind` at `location`, replacing any previous one.
    pub fn register<O, R>(
        &mut self,
        kind: ResourceKind,
        location: ResourceLocation,
        operator: Arc<O>,
    ) -> &mut Self
    where
        O: ResourceOperator<ResourceContext, R> + 'static,
        R: Into<AnyResource> + Send + Sync + 'static,
    {
        let erased = ErasedOperator {
            inner: operator,
            _resource: PhantomData,
        };
        self.operators.insert((kind, location), Arc::new(erased));
        self
    }

    pub fn kinds(&self) -> BTreeSet<ResourceKind> {
        self.operators.keys().map(|(kind, _)| *kind).collect()
    }

    pub fn locations(&self, kind: ResourceKind) -> BTreeSet<ResourceLocation> {
        self.operators
            .keys()
            .filter(|(k, _)| *k == kind)
            .map(|(_, location)| location.clone())
            .collect()
    }

    fn operator(
        &self,
        kind: ResourceKind,
        location: &ResourceLocation,
    ) -> Result<&DynOperator, ResourceError> {
        if let Some(operator) = self.operators.get(&(kind, location.clone())) {
            return Ok(operator);
        }
        if self.operators.keys().any(|(k, _)| *k == kind) {
            Err(ResourceError::UnknownLocation {
                kind,
                location: location.clone(),
            })
        } else {
            Err(ResourceError::UnknownKind(kind))
        }
    }

    fn operators_of(
        &self,
        kind: ResourceKind,
    ) -> Result<Vec<(&ResourceLocation, &DynOperator)>, ResourceError> {
        let mut found: Vec<_> = self
            .operators
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|((_, location), operator)| (location, operator))
            .collect();
        if found.is_empty() {
            return Err(ResourceError::UnknownKind(kind));
        }
        found.sort_by(|a, b| a.0.cmp(b.0));
        Ok(found)
    }

    /// Provisions through the operator registered for `context.location`.
    pub async fn create(
        &self,
        kind: ResourceKind,
        context: &ResourceContext,
    ) -> Result<AnyResource, ResourceError> {
        let resource = self.operator(kind, &context.location)?.create(context).await?;
        info!(
            resource_id = %resource.resource_id(),
            state = ?resource.resource_state(),
            "Resource created"
        );
        if let Some(bus) = &self.event_bus {
            bus.publish_resource_event(ResourceEvent::Created {
                resource_id: resource.resource_id(),
                state: resource.resource_state(),
                created_at: resource.create_time(),
            });
        }
        Ok(resource)
    }

    pub async fn query(&self, id: &ResourceId) -> Result<Option<AnyResource>, ResourceError> {
        self.operator(id.kind, &id.location)?.query(id).await
    }

    /// Resources of `kind` across every registered location.
    pub async fn list(&self, kind: ResourceKind) -> Result<Vec<AnyResource>, ResourceError> {
        let mut resources = Vec::new();
        for (_, operator) in self.operators_of(kind)? {
            resources.extend(operator.list().await?);
        }
        Ok(resources)
    }

    pub async fn list_at(
        &self,
        kind: ResourceKind,
        location: &ResourceLocation,
    ) -> Result<Vec<AnyResource>, ResourceError> {
        self.operator(kind, location)?.list().await
    }

    pub async fn destroy(&self, id: &ResourceId) -> Result<String, ResourceError> {
        let message = self.operator(id.kind, &id.location)?.destroy(id).await?;
        info!(resource_id = %id, "{}", message);
        if let Some(bus) = &self.event_bus {
            bus.publish_resource_event(ResourceEvent::Destroyed {
                resource_id: id.clone(),
                destroyed_at: Utc::now(),
            });
        }
        Ok(message)
    }

    pub fn can_be_destroyed(
        &self,
        id: &ResourceId,
        last_active: LastActiveFn<'_>,
    ) -> Result<bool, ResourceError> {
        Ok(self.operator(id.kind, &id.location)?.can_be_destroyed(id, last_active))
    }

    /// Destroys every listed resource of `kind`, in every location, its
    /// operator considers reclaimable. Individual failures are logged and
    /// skipped.
    pub async fn reap_idle(
        &self,
        kind: ResourceKind,
        last_active: LastActiveFn<'_>,
    ) -> Result<Vec<ResourceId>, ResourceError> {
        let mut reaped = Vec::new();

        for (location, operator) in self.operators_of(kind)? {
            let resources = match operator.list().await {
                Ok(resources) => resources,
                Err(e) => {
                    warn!(kind = %kind, %location, error = %e, "Failed to list resources");
                    continue;
                }
            };
            for resource in resources {
                let id = resource.resource_id();
                if resource.resource_state() == ResourceState::Destroyed {
                    continue;
                }
                if !operator.can_be_destroyed(&id, last_active) {
                    continue;
                }
                match self.destroy(&id).await {
                    Ok(_) => reaped.push(id),
                    Err(e) => warn!(resource_id = %id, error = %e, "Failed to reap idle resource"),
                }
            }
        }

        if !reaped.is_empty() {
            info!(kind = %kind, count = reaped.len(), "Reaped idle resources");
        }
        Ok(reaped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::k8s::fake::FakeK8sApi;
    use crate::infrastructure::k8s::{K8sObjectKind, K8sPodOperator};
    use crate::infrastructure::local_process::LocalResourceOperator;
    use crate::infrastructure::event_bus::DomainEvent;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::Mutex;

    fn process_context(name: &str) -> ResourceContext {
        ResourceContext::new(ResourceLocation::local(), "", name)
    }

    // Operator whose destroy fails for one resource name
    struct FlakyOperator {
        inner: LocalResourceOperator,
        fail_on: String,
        destroyed: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl ResourceOperator<ResourceContext, LocalResource> for FlakyOperator {
        async fn create(&self, context: &ResourceContext) -> Result<LocalResource, ResourceError> {
            self.inner.create(context).await
        }

        async fn query(&self, id: &ResourceId) -> Result<Option<LocalResource>, ResourceError> {
            self.inner.query(id).await
        }

        async fn list(&self) -> Result<Vec<LocalResource>, ResourceError> {
            self.inner.list().await
        }

        async fn destroy(&self, id: &ResourceId) -> Result<String, ResourceError> {
            if id.name == self.fail_on {
                return Err(ResourceError::provisioning(ResourceKind::Process, "kill refused"));
            }
            self.destroyed.lock().await.push(id.name.clone());
            self.inner.destroy(id).await
        }

        fn can_be_destroyed(&self, _id: &ResourceId, _last_active: LastActiveFn<'_>) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_unknown_kind_is_rejected() {
        let manager = ResourceManager::new();
        let err = manager
            .create(ResourceKind::K8sService, &process_context("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, ResourceError::UnknownKind(ResourceKind::K8sService)));

        let id = ResourceId::new(ResourceLocation::local(), ResourceKind::K8sPod, "jobs", "p");
        let unknown = |_: &ResourceId| -> Option<DateTime<Utc>> { None };
        assert!(manager.can_be_destroyed(&id, &unknown).is_err());
    }

    fn pod(name: &str) -> serde_json::Value {
        json!({
            "metadata": { "name": name, "namespace": "jobs" },
            "status": { "phase": "Running" }
        })
    }

    fn pods_at(api: Arc<FakeK8sApi>, location: &ResourceLocation) -> Arc<K8sPodOperator> {
        Arc::new(K8sPodOperator::new(api, location.clone(), "jobs", Duration::from_secs(60)))
    }

    #[tokio::test]
    async fn test_operators_are_kept_per_location() {
        let (g1, g2) = (ResourceLocation::new("eu", "g1"), ResourceLocation::new("eu", "g2"));
        let first = FakeK8sApi::new();
        let second = FakeK8sApi::new();
        first.put(K8sObjectKind::Pod, "jobs", pod("exec-1"));
        second.put(K8sObjectKind::Pod, "jobs", pod("exec-2"));
        second.put(K8sObjectKind::Pod, "jobs", pod("exec-3"));

        let mut manager = ResourceManager::new();
        manager
            .register::<_, K8sPod>(ResourceKind::K8sPod, g1.clone(), pods_at(first.clone(), &g1))
            .register::<_, K8sPod>(ResourceKind::K8sPod, g2.clone(), pods_at(second.clone(), &g2));

        assert_eq!(manager.kinds().len(), 1);
        assert_eq!(manager.locations(ResourceKind::K8sPod).len(), 2);
        assert_eq!(manager.list_at(ResourceKind::K8sPod, &g1).await.unwrap().len(), 1);
        assert_eq!(manager.list_at(ResourceKind::K8sPod, &g2).await.unwrap().len(), 2);
        assert_eq!(manager.list(ResourceKind::K8sPod).await.unwrap().len(), 3);

        // Created in g2 only
        let context = ResourceContext::new(g2.clone(), "jobs", "exec-4").with_image("executor:1");
        let created = manager.create(ResourceKind::K8sPod, &context).await.unwrap();
        assert_eq!(created.resource_id().location, g2);
        assert!(second.contains(K8sObjectKind::Pod, "jobs", "exec-4"));
        assert!(!first.contains(K8sObjectKind::Pod, "jobs", "exec-4"));

        // Same name, different group: only the addressed one is destroyed
        first.put(K8sObjectKind::Pod, "jobs", pod("exec-4"));
        manager.destroy(&created.resource_id()).await.unwrap();
        assert!(!second.contains(K8sObjectKind::Pod, "jobs", "exec-4"));
        assert!(first.contains(K8sObjectKind::Pod, "jobs", "exec-4"));

        let elsewhere = ResourceLocation::new("us", "g1");
        let id = ResourceId::new(elsewhere.clone(), ResourceKind::K8sPod, "jobs", "exec-1");
        let err = manager.query(&id).await.unwrap_err();
        assert!(matches!(
            err,
            ResourceError::UnknownLocation { kind: ResourceKind::K8sPod, ref location }
                if *location == elsewhere
        ));
    }

    #[tokio::test]
    async fn test_dispatches_to_registered_operator() {
        let event_bus = EventBus::new(16);
        let mut receiver = event_bus.subscribe();
        let mut manager = ResourceManager::new().with_event_bus(event_bus);
        let operator = Arc::new(LocalResourceOperator::new(8));
        let location = ResourceLocation::local();
        manager.register::<_, LocalResource>(ResourceKind::Process, location, operator);

        let context = process_context("job-1");
        let created = manager.create(ResourceKind::Process, &context).await.unwrap();
        assert!(matches!(created, AnyResource::Process(_)));
        assert_eq!(created.resource_state(), ResourceState::Running);

        let id = created.resource_id();
        assert!(manager.query(&id).await.unwrap().is_some());
        assert_eq!(manager.list(ResourceKind::Process).await.unwrap().len(), 1);

        manager.destroy(&id).await.unwrap();
        assert!(manager.query(&id).await.unwrap().is_none());
        manager.destroy(&id).await.unwrap();

        assert!(matches!(
            receiver.recv().await.unwrap(),
            DomainEvent::Resource(ResourceEvent::Created { .. })
        ));
        assert!(matches!(
            receiver.recv().await.unwrap(),
            DomainEvent::Resource(ResourceEvent::Destroyed { .. })
        ));
    }

    #[tokio::test]
    async fn test_reap_idle_skips_active_pods() {
        let api = FakeK8sApi::new();
        for name in ["busy", "idle", "finished"] {
            let phase = if name == "finished" { "Succeeded" } else { "Running" };
            api.put(
                K8sObjectKind::Pod,
                "jobs",
                json!({
                    "metadata": { "name": name, "namespace": "jobs" },
                    "status": { "phase": phase }
                }),
            );
        }
        let pods = Arc::new(K8sPodOperator::new(
            api.clone(),
            ResourceLocation::new("eu", "g1"),
            "jobs",
            Duration::from_secs(60),
        ));
        let mut manager = ResourceManager::new();
        let location = ResourceLocation::new("eu", "g1");
        manager.register::<_, K8sPod>(ResourceKind::K8sPod, location, pods);

        let last_active = |id: &ResourceId| -> Option<DateTime<Utc>> {
            (id.name == "busy").then(Utc::now)
        };
        let reaped = manager.reap_idle(ResourceKind::K8sPod, &last_active).await.unwrap();

        assert_eq!(reaped.len(), 1);
        assert_eq!(reaped[0].name, "idle");
        assert!(api.contains(K8sObjectKind::Pod, "jobs", "busy"));
        assert!(!api.contains(K8sObjectKind::Pod, "jobs", "idle"));
    }

    #[tokio::test]
    async fn test_reap_idle_continues_past_failures() {
        let destroyed = Arc::new(Mutex::new(Vec::new()));
        let flaky = Arc::new(FlakyOperator {
            inner: LocalResourceOperator::new(8),
            fail_on: "stuck".to_string(),
            destroyed: destroyed.clone(),
        });
        let mut manager = ResourceManager::new();
        let location = ResourceLocation::local();
        manager.register::<_, LocalResource>(ResourceKind::Process, location, flaky);

        for name in ["a", "stuck", "b"] {
            manager.create(ResourceKind::Process, &process_context(name)).await.unwrap();
        }

        let unknown = |_: &ResourceId| -> Option<DateTime<Utc>> { None };
        let reaped = manager.reap_idle(ResourceKind::Process, &unknown).await.unwrap();

        assert_eq!(reaped.len(), 2);
        let mut names = destroyed.lock().await.clone();
        names.sort();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(manager.list(ResourceKind::Process).await.unwrap().len(), 1);
    }
}
