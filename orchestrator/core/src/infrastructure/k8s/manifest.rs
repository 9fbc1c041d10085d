// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Manifest builders and typed read views for platform objects.
//
// Only the fields the operators need are modelled; everything else in the
// platform's JSON is ignored on read.

use crate::domain::resource::{ResourceContext, ResourceState};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Label tying pods back to the deployment that owns them.
pub const DEPLOYMENT_LABEL: &str = "jobvisor.io/deployment";
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub creation_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodStatus {
    #[serde(default)]
    pub phase: Option<String>,
    #[serde(default, rename = "podIP")]
    pub pod_ip: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PodView {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub status: Option<PodStatus>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeploymentSpec {
    #[serde(default)]
    pub replicas: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentStatus {
    #[serde(default)]
    pub ready_replicas: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentView {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: Option<DeploymentSpec>,
    #[serde(default)]
    pub status: Option<DeploymentStatus>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePort {
    pub port: u16,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    #[serde(default, rename = "clusterIP")]
    pub cluster_ip: Option<String>,
    #[serde(default)]
    pub ports: Vec<ServicePort>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceView {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: Option<ServiceSpec>,
}

pub fn object_name(object: &Value) -> Option<&str> {
    object.get("metadata")?.get("name")?.as_str()
}

pub fn pod_state(phase: Option<&str>, terminating: bool) -> ResourceState {
    if terminating {
        return ResourceState::Destroyed;
    }
    match phase {
        Some("Pending") => ResourceState::Creating,
        Some("Running") => ResourceState::Running,
        Some("Succeeded") => ResourceState::Destroyed,
        Some("Failed") => ResourceState::Error,
        _ => ResourceState::Error,
    }
}

pub fn deployment_state(desired: u32, ready: u32) -> ResourceState {
    if ready >= desired {
        ResourceState::Running
    } else {
        ResourceState::Creating
    }
}

pub fn service_state(cluster_ip: Option<&str>) -> ResourceState {
    match cluster_ip {
        Some(ip) if !ip.is_empty() => ResourceState::Running,
        _ => ResourceState::Creating,
    }
}

fn labels(context: &ResourceContext) -> BTreeMap<String, String> {
    let mut labels = context.labels.clone();
    labels.insert(MANAGED_BY_LABEL.to_string(), "jobvisor".to_string());
    labels
}

fn container(context: &ResourceContext) -> Value {
    let mut env: Vec<Value> = context
        .env
        .iter()
        .map(|(name, value)| json!({ "name": name, "value": value }))
        .collect();
    env.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));

    let ports: Vec<Value> = context.ports.iter().map(|p| json!({ "containerPort": p })).collect();
    let quantity = json!({
        "cpu": context.cpu_cores.to_string(),
        "memory": format!("{}Mi", context.memory_mb),
    });

    let mut container = json!({
        "name": "executor",
        "image": context.image.clone().unwrap_or_default(),
        "env": env,
        "ports": ports,
        "resources": { "requests": quantity.clone(), "limits": quantity },
    });
    if !context.command.is_empty() {
        container["command"] = json!(context.command);
    }
    container
}

pub fn pod_manifest(context: &ResourceContext, namespace: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "name": context.name,
            "namespace": namespace,
            "labels": labels(context),
            "annotations": context.annotations,
        },
        "spec": {
            "restartPolicy": "Never",
            "containers": [container(context)],
        },
    })
}

pub fn deployment_manifest(context: &ResourceContext, namespace: &str) -> Value {
    let mut template_labels = labels(context);
    template_labels.insert(DEPLOYMENT_LABEL.to_string(), context.name.clone());

    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {
            "name": context.name,
            "namespace": namespace,
            "labels": labels(context),
        },
        "spec": {
            "replicas": context.replicas,
            "selector": { "matchLabels": { DEPLOYMENT_LABEL: context.name } },
            "template": {
                "metadata": { "labels": template_labels },
                "spec": { "containers": [container(context)] },
            },
        },
    })
}

/// Service selecting the pods of the deployment with the same name.
pub fn service_manifest(context: &ResourceContext, namespace: &str) -> Value {
    let ports: Vec<Value> = context
        .ports
        .iter()
        .map(|p| json!({ "name": format!("port-{}", p), "port": p, "targetPort": p }))
        .collect();

    json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": {
            "name": context.name,
            "namespace": namespace,
            "labels": labels(context),
        },
        "spec": {
            "selector": { DEPLOYMENT_LABEL: context.name },
            "ports": ports,
        },
    })
}
