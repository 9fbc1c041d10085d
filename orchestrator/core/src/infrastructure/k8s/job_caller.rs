// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use super::pod::K8sPodOperator;
use crate::domain::job::{ExecutorIdentifier, JobIdentity};
use crate::domain::resource::{
    ResourceContext, ResourceId, ResourceKind, ResourceLocation, ResourceOperator,
};
use crate::domain::supervisor::{JobCaller, JobCallerError, LaunchRequest, RunMode};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info, warn};

const JOB_LABEL: &str = "jobvisor.io/job";
/// Raw job identity, used to tell apart jobs whose sanitized names collide
const JOB_ID_ANNOTATION: &str = "jobvisor.io/job-id";
const DEFAULT_MEMORY_MB: u64 = 1024;

const NAME_PREFIX: &str = "jobvisor-";
const NAME_MAX_LEN: usize = 63;
const NAME_HASH_LEN: usize = 8;

/// Runs each executor in its own pod.
pub struct K8sJobCaller {
    pods: Arc<K8sPodOperator>,
    location: ResourceLocation,
    image: String,
    listen_port: u16,
}

impl K8sJobCaller {
    pub fn new(
        pods: Arc<K8sPodOperator>,
        location: ResourceLocation,
        image: impl Into<String>,
        listen_port: u16,
    ) -> Self {
        Self {
            pods,
            location,
            image: image.into(),
            listen_port,
        }
    }

    /// DNS-1123 label derived from the job identity: a readable sanitized
    /// prefix followed by a short hash of the raw identity.
    pub fn pod_name(job_identity: &JobIdentity) -> String {
        let raw = job_identity.as_str();
        let digest = hex::encode(Sha256::digest(raw.as_bytes()));
        let hash = &digest[..NAME_HASH_LEN];

        let readable: String = raw
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
            .take(NAME_MAX_LEN - NAME_PREFIX.len() - NAME_HASH_LEN - 1)
            .collect();
        let readable = readable.trim_matches('-');

        if readable.is_empty() {
            format!("{}{}", NAME_PREFIX, hash)
        } else {
            format!("{}{}-{}", NAME_PREFIX, readable, hash)
        }
    }

    fn resource_id(&self, identifier: &ExecutorIdentifier) -> ResourceId {
        let namespace = identifier
            .namespace
            .clone()
            .unwrap_or_else(|| self.pods.namespace().to_string());
        ResourceId::new(
            self.location.clone(),
            ResourceKind::K8sPod,
            namespace,
            identifier.name.clone(),
        )
    }
}

#[async_trait]
impl JobCaller for K8sJobCaller {
    fn run_mode(&self) -> RunMode {
        RunMode::K8s
    }

    async fn start(&self, request: LaunchRequest) -> Result<ExecutorIdentifier, JobCallerError> {
        let job_identity = &request.job_context.job_identity;
        let pod_name = Self::pod_name(job_identity);
        let memory_mb = request
            .process_config
            .max_memory_mb
            .or(request.process_config.min_memory_mb)
            .unwrap_or(DEFAULT_MEMORY_MB);

        let mut context =
            ResourceContext::new(self.location.clone(), self.pods.namespace(), pod_name.clone())
                .with_image(self.image.clone())
                .with_capacity(1.0, memory_mb)
                .with_env(request.environment.clone())
                .with_ports(vec![self.listen_port]);
        context.labels.insert(JOB_LABEL.to_string(), pod_name);
        context
            .annotations
            .insert(JOB_ID_ANNOTATION.to_string(), job_identity.to_string());

        // An existing pod is only reused when it was launched for this very job
        let pod = self.pods.create(&context).await?;
        let owner = pod.annotations.get(JOB_ID_ANNOTATION).map(String::as_str);
        if owner != Some(job_identity.as_str()) {
            warn!(job_id = %job_identity, pod = %pod.id.name, ?owner, "Pod name already taken");
            return Err(JobCallerError::Launch {
                job_id: job_identity.to_string(),
                message: format!(
                    "pod {} already exists for job {}",
                    pod.id.name,
                    owner.unwrap_or("<unknown>")
                ),
            });
        }

        // Not scheduled yet: address by name until resolve() learns the IP
        let host = pod.pod_ip.clone().unwrap_or_else(|| pod.id.name.clone());
        let identifier = ExecutorIdentifier::container(
            host,
            self.listen_port,
            pod.id.namespace.clone(),
            pod.id.name.clone(),
        );

        info!(
            job_id = %job_identity,
            executor = %identifier,
            state = ?pod.state,
            "Started executor pod"
        );
        Ok(identifier)
    }

    async fn is_alive(&self, identifier: &ExecutorIdentifier) -> Result<bool, JobCallerError> {
        let pod = self.pods.query(&self.resource_id(identifier)).await?;
        Ok(pod.map(|p| p.state.is_live()).unwrap_or(false))
    }

    async fn resolve(
        &self,
        identifier: &ExecutorIdentifier,
    ) -> Result<ExecutorIdentifier, JobCallerError> {
        let pod = self.pods.query(&self.resource_id(identifier)).await?;
        match pod.and_then(|p| p.pod_ip) {
            Some(ip) if ip != identifier.host => {
                debug!(executor = %identifier, pod_ip = %ip, "Pod address assigned");
                let mut resolved = identifier.clone();
                resolved.host = ip;
                Ok(resolved)
            }
            _ => Ok(identifier.clone()),
        }
    }

    async fn destroy(&self, identifier: &ExecutorIdentifier) -> Result<(), JobCallerError> {
        let message = self.pods.destroy(&self.resource_id(identifier)).await?;
        info!(executor = %identifier, "{}", message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::fake::FakeK8sApi;
    use super::super::{K8sApi, K8sObjectKind};
    use super::*;
    use crate::domain::job::{JobContext, ProcessConfig};
    use serde_json::json;
    use std::collections::HashMap;
    use std::time::Duration;

    fn caller(api: Arc<FakeK8sApi>) -> K8sJobCaller {
        let location = ResourceLocation::new("eu", "g1");
        let pods = K8sPodOperator::new(api, location.clone(), "jobs", Duration::from_secs(60));
        K8sJobCaller::new(Arc::new(pods), location, "registry.local/executor:1", 8989)
    }

    fn request(job: &str) -> LaunchRequest {
        let mut environment = HashMap::new();
        environment.insert("JOBVISOR_RUN_MODE".to_string(), "k8s".to_string());
        LaunchRequest {
            job_context: JobContext::new(JobIdentity::from_string(job), "jobvisor.Counting"),
            process_config: ProcessConfig {
                max_memory_mb: Some(2048),
                ..ProcessConfig::default()
            },
            environment,
            listen_port: None,
        }
    }

    fn pod_name(job: &str) -> String {
        K8sJobCaller::pod_name(&JobIdentity::from_string(job))
    }

    #[test]
    fn test_pod_name_is_dns_safe() {
        let name = pod_name("Job_42");
        assert!(name.starts_with("jobvisor-job-42-"));
        assert_eq!(name.len(), "jobvisor-job-42-".len() + NAME_HASH_LEN);
        assert!(name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
        assert_eq!(name, pod_name("Job_42"));

        let long = pod_name(&"x".repeat(100));
        assert!(long.len() <= NAME_MAX_LEN);
        assert!(!long.ends_with('-'));

        assert!(pod_name("___").starts_with("jobvisor-"));
        assert_eq!(pod_name("___").len(), NAME_PREFIX.len() + NAME_HASH_LEN);
    }

    #[test]
    fn test_similar_job_ids_get_distinct_pod_names() {
        assert_ne!(pod_name("Job_1"), pod_name("job.1"));
        assert_ne!(pod_name("job-1"), pod_name("JOB-1"));
        let a = format!("{}a", "x".repeat(80));
        let b = format!("{}b", "x".repeat(80));
        assert_ne!(pod_name(&a), pod_name(&b));
    }

    #[tokio::test]
    async fn test_start_check_destroy() {
        let api = FakeK8sApi::new();
        let caller = caller(api.clone());

        let identifier = caller.start(request("job-1")).await.unwrap();
        assert_eq!(identifier.namespace.as_deref(), Some("jobs"));
        assert_eq!(identifier.name, pod_name("job-1"));
        assert_eq!(identifier.port, 8989);
        assert!(caller.is_alive(&identifier).await.unwrap());

        caller.destroy(&identifier).await.unwrap();
        assert!(!caller.is_alive(&identifier).await.unwrap());
        caller.destroy(&identifier).await.unwrap();
    }

    #[tokio::test]
    async fn test_restart_of_same_job_reuses_pod() {
        let api = FakeK8sApi::new();
        let caller = caller(api.clone());

        let first = caller.start(request("job-1")).await.unwrap();
        let second = caller.start(request("job-1")).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(api.list(K8sObjectKind::Pod, "jobs").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_pod_owned_by_other_job_is_rejected() {
        let api = FakeK8sApi::new();
        let caller = caller(api.clone());
        api.put(
            K8sObjectKind::Pod,
            "jobs",
            json!({
                "metadata": {
                    "name": pod_name("job-5"),
                    "namespace": "jobs",
                    "annotations": { JOB_ID_ANNOTATION: "someone-else" }
                },
                "status": { "phase": "Running", "podIP": "10.1.0.9" }
            }),
        );

        let err = caller.start(request("job-5")).await.unwrap_err();
        match err {
            JobCallerError::Launch { job_id, message } => {
                assert_eq!(job_id, "job-5");
                assert!(message.contains("someone-else"));
            }
            other => panic!("Expected launch error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_resolve_picks_up_assigned_pod_ip() {
        let api = FakeK8sApi::new();
        let caller = caller(api.clone());

        let identifier = caller.start(request("job-4")).await.unwrap();
        assert_eq!(identifier.host, pod_name("job-4"));
        assert_eq!(caller.resolve(&identifier).await.unwrap(), identifier);

        api.put(
            K8sObjectKind::Pod,
            "jobs",
            json!({
                "metadata": {
                    "name": pod_name("job-4"),
                    "namespace": "jobs",
                    "annotations": { JOB_ID_ANNOTATION: "job-4" }
                },
                "status": { "phase": "Running", "podIP": "10.1.0.12" }
            }),
        );

        let resolved = caller.resolve(&identifier).await.unwrap();
        assert_eq!(resolved.host, "10.1.0.12");
        assert_eq!(resolved.port, 8989);
        assert_eq!(resolved.name, identifier.name);
        assert_eq!(resolved.namespace, identifier.namespace);
    }

    #[tokio::test]
    async fn test_finished_pod_is_not_alive() {
        let api = FakeK8sApi::new();
        let caller = caller(api.clone());
        let identifier = caller.start(request("job-2")).await.unwrap();

        api.put(
            K8sObjectKind::Pod,
            "jobs",
            json!({
                "metadata": { "name": pod_name("job-2"), "namespace": "jobs" },
                "status": { "phase": "Succeeded" }
            }),
        );
        assert!(!caller.is_alive(&identifier).await.unwrap());
    }

    #[tokio::test]
    async fn test_pod_manifest_receives_environment_and_memory() {
        let api = FakeK8sApi::new();
        let caller = caller(api.clone());
        caller.start(request("job-3")).await.unwrap();

        let pods = api.list(K8sObjectKind::Pod, "jobs").await.unwrap();
        assert_eq!(pods[0]["metadata"]["annotations"][JOB_ID_ANNOTATION], "job-3");
        let container = &pods[0]["spec"]["containers"][0];
        assert_eq!(container["env"][0]["name"], "JOBVISOR_RUN_MODE");
        assert_eq!(container["resources"]["limits"]["memory"], "2048Mi");
    }
}
