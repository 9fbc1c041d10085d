// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Resource Domain
//!
//! Backend-agnostic model of a provisioned compute unit and the
//! [`ResourceOperator`] contract every backend implements.
//!
//! Backends are modelled as a tagged variant (see [`ResourceKind`]) with one
//! operator per variant and [`ResourceLocation`]; callers select the operator
//! through the `ResourceManager`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceLocation {
    pub region: String,
    pub group: String,
}

impl ResourceLocation {
    pub fn new(region: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            group: group.into(),
        }
    }

    pub fn local() -> Self {
        Self::new("local", "local")
    }
}

impl fmt::Display for ResourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.region, self.group)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    Process,
    K8sPod,
    K8sDeployment,
    K8sService,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Process => "process",
            ResourceKind::K8sPod => "k8s-pod",
            ResourceKind::K8sDeployment => "k8s-deployment",
            ResourceKind::K8sService => "k8s-service",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one provisioned resource. Structural equality: two resources
/// with the same id are the same logical resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId {
    pub location: ResourceLocation,
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
}

impl ResourceId {
    pub fn new(
        location: ResourceLocation,
        kind: ResourceKind,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            location,
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.location, self.kind, self.namespace, self.name
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceState {
    Creating,
    Running,
    Destroyed,
    Error,
}

impl ResourceState {
    pub fn is_live(&self) -> bool {
        matches!(self, ResourceState::Creating | ResourceState::Running)
    }
}

/// Capacity request and placement hints supplied at creation time.
///
/// Container backends additionally read the image/command/env/ports payload;
/// the local-process backend only uses location and name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceContext {
    pub location: ResourceLocation,
    pub namespace: String,
    pub name: String,
    pub cpu_cores: f64,
    pub memory_mb: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub ports: Vec<u16>,
    #[serde(default = "default_replicas")]
    pub replicas: u32,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

fn default_replicas() -> u32 {
    1
}

impl ResourceContext {
    pub fn new(location: ResourceLocation, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            location,
            namespace: namespace.into(),
            name: name.into(),
            cpu_cores: 1.0,
            memory_mb: 1024,
            image: None,
            command: Vec::new(),
            env: HashMap::new(),
            ports: Vec::new(),
            replicas: default_replicas(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
        }
    }

    pub fn with_capacity(mut self, cpu_cores: f64, memory_mb: u64) -> Self {
        self.cpu_cores = cpu_cores;
        self.memory_mb = memory_mb;
        self
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_ports(mut self, ports: Vec<u16>) -> Self {
        self.ports = ports;
        self
    }

    pub fn with_replicas(mut self, replicas: u32) -> Self {
        self.replicas = replicas;
        self
    }

    pub fn resource_id(&self, kind: ResourceKind) -> ResourceId {
        ResourceId::new(self.location.clone(), kind, self.namespace.clone(), self.name.clone())
    }
}

/// Common view over every backend's resource type.
pub trait Resource: Send + Sync {
    fn resource_id(&self) -> ResourceId;
    fn resource_state(&self) -> ResourceState;
    fn create_time(&self) -> DateTime<Utc>;
}

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("Failed to provision {kind} resource: {message}")]
    Provisioning { kind: ResourceKind, message: String },
    #[error("No resource operator registered for kind {0}")]
    UnknownKind(ResourceKind),
    #[error("No {kind} operator registered for location {location}")]
    UnknownLocation {
        kind: ResourceKind,
        location: ResourceLocation,
    },
    #[error("Failed to serialize resource payload: {0}")]
    Serialization(String),
}

impl ResourceError {
    pub fn provisioning(kind: ResourceKind, message: impl Into<String>) -> Self {
        ResourceError::Provisioning {
            kind,
            message: message.into(),
        }
    }
}

/// Last time a resource was known to be doing useful work; `None` when unknown.
pub type LastActiveFn<'a> = &'a (dyn Fn(&ResourceId) -> Option<DateTime<Utc>> + Send + Sync);

/// Uniform provisioning contract implemented once per backend.
#[async_trait]
pub trait ResourceOperator<C, R>: Send + Sync
where
    C: Send + Sync,
    R: Send + Sync,
{
    /// Provision one resource. Backend failures surface as `ResourceError::Provisioning`.
    async fn create(&self, context: &C) -> Result<R, ResourceError>;

    /// `Ok(None)` when the operator no longer knows the resource.
    async fn query(&self, id: &ResourceId) -> Result<Option<R>, ResourceError>;

    async fn list(&self) -> Result<Vec<R>, ResourceError>;

    /// Idempotent: destroying an absent resource succeeds.
    async fn destroy(&self, id: &ResourceId) -> Result<String, ResourceError>;

    fn can_be_destroyed(&self, id: &ResourceId, last_active: LastActiveFn<'_>) -> bool;
}
