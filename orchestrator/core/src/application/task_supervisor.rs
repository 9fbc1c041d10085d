// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Local Task Supervisor
//!
//! In-process [`TaskSupervisor`]: assembles the executor environment and
//! delegates the launch to the configured [`JobCaller`].
//!
//! ## Environment Contract
//! | Variable | When |
//! |----------|------|
//! | `JOBVISOR_RUN_MODE` | always |
//! | `JOBVISOR_JOB_CONTEXT` / `JOBVISOR_JOB_CONTEXT_FILE` | always, per context transfer mode |
//! | `JOBVISOR_EXECUTOR_USER`, `JOBVISOR_LOG_DIRECTORY` | always |
//! | `JOBVISOR_EXECUTOR_PORT` | pull monitoring |
//! | `JOBVISOR_REPORT_URLS`, `JOBVISOR_REPORT_INTERVAL_MS` | push monitoring |
//!
//! Local processes get a leased port from the [`PortDetector`]; pods listen
//! on the fixed container port. A task only ever releases the lease it was
//! issued, so tearing down a finished task cannot free a port that has since
//! been leased to another one.

use crate::domain::config::{ContextTransfer, JobvisorConfigManifest};
use crate::domain::events::TaskEvent;
use crate::domain::job::{
    env, ExecutorEndpoint, ExecutorIdentifier, JobContext, JobIdentity, ProcessConfig,
    SupervisorEndpoint,
};
use crate::domain::resource::ResourceLocation;
use crate::domain::supervisor::{
    JobCaller, LaunchRequest, MonitorMode, RunMode, SupervisorError, TaskSupervisor,
};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::k8s::{K8sJobCaller, K8sPodOperator, RestK8sApi};
use crate::infrastructure::local_process::{LocalResourceOperator, ProcessJobCaller};
use crate::infrastructure::port_detector::{PortDetector, PortLease};
use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub endpoint: SupervisorEndpoint,
    pub monitor_mode: MonitorMode,
    pub report_urls: Vec<String>,
    pub report_interval: Duration,
    pub context_transfer: ContextTransfer,
    pub context_directory: PathBuf,
    pub executor_user: String,
    pub log_directory: PathBuf,
    /// Port executors listen on inside pods
    pub container_listen_port: u16,
}

impl SupervisorSettings {
    pub fn from_config(config: &JobvisorConfigManifest) -> Self {
        let spec = &config.spec;
        Self {
            endpoint: SupervisorEndpoint::new(spec.supervisor.host.clone(), spec.supervisor.port),
            monitor_mode: spec.monitor.mode,
            report_urls: spec.monitor.report_urls.clone(),
            report_interval: spec.monitor.report_interval,
            context_transfer: spec.local.context_transfer,
            context_directory: spec.local.context_directory.clone(),
            executor_user: spec.executor_user.clone(),
            log_directory: spec.local.log_directory.clone(),
            container_listen_port: spec
                .k8s
                .as_ref()
                .map(|k| k.executor_listen_port)
                .unwrap_or(8989),
        }
    }
}

/// A started task and the port lease issued for it, if any.
#[derive(Debug, Clone)]
struct TrackedTask {
    endpoint: ExecutorEndpoint,
    lease: Option<PortLease>,
}

pub struct LocalTaskSupervisor {
    settings: SupervisorSettings,
    job_caller: Arc<dyn JobCaller>,
    port_detector: Arc<PortDetector>,
    tasks: DashMap<JobIdentity, TrackedTask>,
    event_bus: EventBus,
}

impl LocalTaskSupervisor {
    pub fn new(
        settings: SupervisorSettings,
        job_caller: Arc<dyn JobCaller>,
        port_detector: Arc<PortDetector>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            settings,
            job_caller,
            port_detector,
            tasks: DashMap::new(),
            event_bus,
        }
    }

    /// Wires the job caller for `run_mode` from configuration.
    pub fn from_config(
        config: &JobvisorConfigManifest,
        run_mode: RunMode,
        event_bus: EventBus,
    ) -> anyhow::Result<Self> {
        let spec = &config.spec;
        let port_detector = PortDetector::from_config(&spec.ports)
            .context("Invalid executor port range")?;

        let job_caller: Arc<dyn JobCaller> = match run_mode {
            RunMode::Process => {
                let operator = Arc::new(LocalResourceOperator::new(spec.local.registry_capacity));
                Arc::new(ProcessJobCaller::new(
                    operator,
                    spec.supervisor.host.clone(),
                    spec.local.executor_program.clone(),
                    spec.local.executor_args.clone(),
                    spec.local.log_directory.clone(),
                ))
            }
            RunMode::K8s => {
                let k8s = spec
                    .k8s
                    .as_ref()
                    .context("spec.k8s must be configured to run executors in pods")?;
                let api = RestK8sApi::from_config(k8s)
                    .context("Failed to build platform API client")?;
                let location = ResourceLocation::new(k8s.region.clone(), k8s.group.clone());
                let pods = Arc::new(K8sPodOperator::new(
                    Arc::new(api),
                    location.clone(),
                    k8s.namespace.clone(),
                    k8s.idle_timeout,
                ));
                Arc::new(K8sJobCaller::new(
                    pods,
                    location,
                    k8s.image.clone(),
                    k8s.executor_listen_port,
                ))
            }
        };

        Ok(Self::new(
            SupervisorSettings::from_config(config),
            job_caller,
            Arc::new(port_detector),
            event_bus,
        ))
    }

    pub fn run_mode(&self) -> RunMode {
        self.job_caller.run_mode()
    }

    pub fn task(&self, job_identity: &JobIdentity) -> Option<ExecutorEndpoint> {
        self.tasks.get(job_identity).map(|t| t.endpoint.clone())
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    fn context_file(&self, job_identity: &JobIdentity) -> PathBuf {
        self.settings.context_directory.join(format!("{}.json", job_identity))
    }

    async fn build_environment(
        &self,
        job_context: &JobContext,
        process_config: &ProcessConfig,
        listen_port: Option<u16>,
    ) -> Result<HashMap<String, String>, SupervisorError> {
        let run_mode = self.run_mode();
        let mut environment = process_config.environments.clone();

        environment.insert(env::RUN_MODE.to_string(), run_mode.to_string());
        environment.insert(env::EXECUTOR_USER.to_string(), self.settings.executor_user.clone());
        environment.insert(
            env::LOG_DIRECTORY.to_string(),
            self.settings.log_directory.display().to_string(),
        );

        let json = job_context
            .to_json()
            .map_err(|e| SupervisorError::ContextTransfer(e.to_string()))?;
        // Pods cannot see the supervisor's filesystem
        let to_file = self.settings.context_transfer == ContextTransfer::File
            && run_mode == RunMode::Process;
        if to_file {
            let path = self.context_file(&job_context.job_identity);
            tokio::fs::create_dir_all(&self.settings.context_directory)
                .await
                .map_err(|e| SupervisorError::ContextTransfer(e.to_string()))?;
            tokio::fs::write(&path, json).await.map_err(|e| {
                SupervisorError::ContextTransfer(format!("{}: {}", path.display(), e))
            })?;
            environment.insert(env::JOB_CONTEXT_FILE.to_string(), path.display().to_string());
        } else {
            environment.insert(env::JOB_CONTEXT.to_string(), json);
        }

        match self.settings.monitor_mode {
            MonitorMode::Pull => {
                if let Some(port) = listen_port {
                    environment.insert(env::EXECUTOR_PORT.to_string(), port.to_string());
                }
            }
            MonitorMode::Push => {
                environment.insert(
                    env::REPORT_URLS.to_string(),
                    self.settings.report_urls.join(","),
                );
                environment.insert(
                    env::REPORT_INTERVAL_MS.to_string(),
                    self.settings.report_interval.as_millis().to_string(),
                );
            }
        }

        Ok(environment)
    }

    async fn remove_context_file(&self, job_identity: &JobIdentity) {
        if self.settings.context_transfer != ContextTransfer::File {
            return;
        }
        let path = self.context_file(job_identity);
        if let Err(e) = tokio::fs::remove_file(&path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(job_id = %job_identity, error = %e, "Failed to remove job context file");
            }
        }
    }
}

#[async_trait]
impl TaskSupervisor for LocalTaskSupervisor {
    fn supervisor_endpoint(&self) -> SupervisorEndpoint {
        self.settings.endpoint.clone()
    }

    async fn start_task(
        &self,
        job_context: &JobContext,
        process_config: &ProcessConfig,
    ) -> Result<ExecutorEndpoint, SupervisorError> {
        let job_id = &job_context.job_identity;
        let run_mode = self.run_mode();

        let (listen_port, lease) = match (self.settings.monitor_mode, run_mode) {
            (MonitorMode::Pull, RunMode::Process) => {
                let lease = self.port_detector.lease_port()?;
                (Some(lease.port), Some(lease))
            }
            (MonitorMode::Pull, RunMode::K8s) => (Some(self.settings.container_listen_port), None),
            (MonitorMode::Push, _) => (None, None),
        };
        debug!(job_id = %job_id, ?listen_port, "Preparing executor launch");

        let launched = async {
            let environment = self
                .build_environment(job_context, process_config, listen_port)
                .await?;
            let request = LaunchRequest {
                job_context: job_context.clone(),
                process_config: process_config.clone(),
                environment,
                listen_port,
            };
            Ok::<_, SupervisorError>(self.job_caller.start(request).await?)
        }
        .await;

        let identifier = match launched {
            Ok(identifier) => identifier,
            Err(e) => {
                if let Some(lease) = &lease {
                    self.port_detector.release_lease(lease);
                }
                self.remove_context_file(job_id).await;
                warn!(job_id = %job_id, error = %e, "Failed to start task");
                return Err(e);
            }
        };

        let endpoint = ExecutorEndpoint {
            job_identity: job_id.clone(),
            identifier,
        };
        self.tasks.insert(
            job_id.clone(),
            TrackedTask {
                endpoint: endpoint.clone(),
                lease,
            },
        );

        metrics::counter!("jobvisor_tasks_started_total").increment(1);
        info!(
            job_id = %job_id,
            executor = %endpoint.identifier,
            run_mode = %run_mode,
            supervisor = %self.settings.endpoint,
            "Task started"
        );
        self.event_bus.publish_task_event(TaskEvent::Started {
            job_identity: job_id.clone(),
            endpoint: endpoint.clone(),
            run_mode,
            started_at: Utc::now(),
        });

        Ok(endpoint)
    }

    async fn is_task_alive(
        &self,
        identifier: &ExecutorIdentifier,
    ) -> Result<bool, SupervisorError> {
        Ok(self.job_caller.is_alive(identifier).await?)
    }

    async fn resolve_endpoint(
        &self,
        endpoint: &ExecutorEndpoint,
    ) -> Result<ExecutorEndpoint, SupervisorError> {
        let identifier = self.job_caller.resolve(&endpoint.identifier).await?;
        if identifier == endpoint.identifier {
            return Ok(endpoint.clone());
        }

        let resolved = ExecutorEndpoint {
            job_identity: endpoint.job_identity.clone(),
            identifier,
        };
        if let Some(mut tracked) = self.tasks.get_mut(&endpoint.job_identity) {
            tracked.endpoint = resolved.clone();
        }
        debug!(
            job_id = %endpoint.job_identity,
            executor = %resolved.identifier,
            "Executor address resolved"
        );
        Ok(resolved)
    }

    async fn destroy_task(
        &self,
        endpoint: &ExecutorEndpoint,
        job_context: &JobContext,
    ) -> Result<bool, SupervisorError> {
        let job_id = &job_context.job_identity;
        self.job_caller.destroy(&endpoint.identifier).await?;

        let removed = self.tasks.remove(job_id).map(|(_, tracked)| tracked);
        if let Some(lease) = removed.as_ref().and_then(|t| t.lease.as_ref()) {
            if !self.port_detector.release_lease(lease) {
                debug!(job_id = %job_id, port = lease.port, "Port lease already expired");
            }
        }
        self.remove_context_file(job_id).await;

        if removed.is_some() {
            metrics::counter!("jobvisor_tasks_destroyed_total").increment(1);
            info!(job_id = %job_id, executor = %endpoint.identifier, "Task destroyed");
            self.event_bus.publish_task_event(TaskEvent::Destroyed {
                job_identity: job_id.clone(),
                endpoint: endpoint.clone(),
                destroyed_at: Utc::now(),
            });
        } else {
            debug!(job_id = %job_id, "Destroy requested for untracked task");
        }
        Ok(removed.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::supervisor::{JobCallerError, PortError};
    use crate::infrastructure::event_bus::DomainEvent;
    use crate::infrastructure::port_detector::PortCheck;
    use tokio::sync::Mutex;

    struct AlwaysFree;

    impl PortCheck for AlwaysFree {
        fn is_in_use(&self, _port: u16) -> bool {
            false
        }
    }

    // Mock job caller recording every launch and teardown
    struct MockJobCaller {
        run_mode: RunMode,
        launches: Arc<Mutex<Vec<LaunchRequest>>>,
        destroyed: Arc<Mutex<Vec<ExecutorIdentifier>>>,
        alive: Arc<Mutex<Vec<String>>>,
        resolved_host: Option<String>,
        fail_launch: bool,
    }

    impl MockJobCaller {
        fn new(run_mode: RunMode) -> Self {
            Self {
                run_mode,
                launches: Arc::new(Mutex::new(Vec::new())),
                destroyed: Arc::new(Mutex::new(Vec::new())),
                alive: Arc::new(Mutex::new(Vec::new())),
                resolved_host: None,
                fail_launch: false,
            }
        }

        fn failing(self) -> Self {
            Self {
                fail_launch: true,
                ..self
            }
        }

        fn resolving_to(self, host: &str) -> Self {
            Self {
                resolved_host: Some(host.to_string()),
                ..self
            }
        }
    }

    #[async_trait]
    impl JobCaller for MockJobCaller {
        fn run_mode(&self) -> RunMode {
            self.run_mode
        }

        async fn start(
            &self,
            request: LaunchRequest,
        ) -> Result<ExecutorIdentifier, JobCallerError> {
            let job_id = request.job_context.job_identity.to_string();
            if self.fail_launch {
                return Err(JobCallerError::Launch {
                    job_id,
                    message: "executor binary missing".to_string(),
                });
            }
            let port = request.listen_port.unwrap_or(0);
            self.launches.lock().await.push(request);
            self.alive.lock().await.push(job_id.clone());
            Ok(ExecutorIdentifier::process("127.0.0.1", port, job_id))
        }

        async fn is_alive(&self, identifier: &ExecutorIdentifier) -> Result<bool, JobCallerError> {
            Ok(self.alive.lock().await.contains(&identifier.name))
        }

        async fn resolve(
            &self,
            identifier: &ExecutorIdentifier,
        ) -> Result<ExecutorIdentifier, JobCallerError> {
            let mut resolved = identifier.clone();
            if let Some(host) = &self.resolved_host {
                resolved.host = host.clone();
            }
            Ok(resolved)
        }

        async fn destroy(&self, identifier: &ExecutorIdentifier) -> Result<(), JobCallerError> {
            self.alive.lock().await.retain(|name| name != &identifier.name);
            self.destroyed.lock().await.push(identifier.clone());
            Ok(())
        }
    }

    fn settings(monitor_mode: MonitorMode) -> SupervisorSettings {
        SupervisorSettings {
            endpoint: SupervisorEndpoint::new("10.0.0.1", 8990),
            monitor_mode,
            report_urls: vec!["http://10.0.0.1:8990/report".to_string()],
            report_interval: Duration::from_secs(5),
            context_transfer: ContextTransfer::Inline,
            context_directory: std::env::temp_dir(),
            executor_user: "jobvisor".to_string(),
            log_directory: PathBuf::from("/var/log/jobvisor"),
            container_listen_port: 8989,
        }
    }

    fn ports(min_port: u16, max_port: u16, lease: Duration) -> Arc<PortDetector> {
        let detector = PortDetector::with_check(min_port, max_port, lease, Arc::new(AlwaysFree));
        Arc::new(detector.unwrap())
    }

    fn detector(min_port: u16, max_port: u16) -> Arc<PortDetector> {
        ports(min_port, max_port, Duration::from_secs(60))
    }

    fn supervisor(
        monitor_mode: MonitorMode,
        caller: Arc<MockJobCaller>,
        port_detector: Arc<PortDetector>,
    ) -> LocalTaskSupervisor {
        LocalTaskSupervisor::new(settings(monitor_mode), caller, port_detector, EventBus::default())
    }

    fn job(id: &str) -> JobContext {
        JobContext::new(JobIdentity::from_string(id), "jobvisor.executor.CountingExecutor")
            .with_parameter("maxCount", "5")
    }

    #[tokio::test]
    async fn test_pull_mode_injects_leased_port() {
        let caller = Arc::new(MockJobCaller::new(RunMode::Process));
        let event_bus = EventBus::new(16);
        let mut events = event_bus.subscribe();
        let supervisor = LocalTaskSupervisor::new(
            settings(MonitorMode::Pull),
            caller.clone(),
            detector(45000, 45010),
            event_bus,
        );

        let config = ProcessConfig::default().with_env("EXTRA", "1");
        let endpoint = supervisor.start_task(&job("job-1"), &config).await.unwrap();

        assert_eq!(endpoint.port(), 45000);
        assert_eq!(endpoint.job_identity.as_str(), "job-1");
        assert_eq!(supervisor.task(&endpoint.job_identity), Some(endpoint.clone()));

        let launches = caller.launches.lock().await;
        let environment = &launches[0].environment;
        assert_eq!(environment.get(env::EXECUTOR_PORT).map(String::as_str), Some("45000"));
        assert_eq!(environment.get(env::RUN_MODE).map(String::as_str), Some("process"));
        assert_eq!(environment.get(env::EXECUTOR_USER).map(String::as_str), Some("jobvisor"));
        assert_eq!(environment.get("EXTRA").map(String::as_str), Some("1"));
        assert!(!environment.contains_key(env::REPORT_URLS));
        assert!(!environment.contains_key(env::REPORT_INTERVAL_MS));

        let transferred = JobContext::from_json(&environment[env::JOB_CONTEXT]).unwrap();
        assert_eq!(transferred, job("job-1"));

        match events.recv().await.unwrap() {
            DomainEvent::Task(TaskEvent::Started { job_identity, .. }) => {
                assert_eq!(job_identity.as_str(), "job-1")
            }
            other => panic!("Unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_push_mode_injects_report_urls_and_interval() {
        let caller = Arc::new(MockJobCaller::new(RunMode::Process));
        let supervisor = supervisor(MonitorMode::Push, caller.clone(), detector(45000, 45000));

        let config = ProcessConfig::default();
        let endpoint = supervisor.start_task(&job("job-2"), &config).await.unwrap();
        assert_eq!(endpoint.port(), 0);

        let launches = caller.launches.lock().await;
        let environment = &launches[0].environment;
        assert_eq!(launches[0].listen_port, None);
        assert_eq!(
            environment.get(env::REPORT_URLS).map(String::as_str),
            Some("http://10.0.0.1:8990/report")
        );
        assert_eq!(environment.get(env::REPORT_INTERVAL_MS).map(String::as_str), Some("5000"));
        assert!(!environment.contains_key(env::EXECUTOR_PORT));
    }

    #[tokio::test]
    async fn test_container_pull_mode_uses_fixed_port() {
        let caller = Arc::new(MockJobCaller::new(RunMode::K8s));
        let mut settings = settings(MonitorMode::Pull);
        settings.context_transfer = ContextTransfer::File;
        let ports = detector(45000, 45000);
        let supervisor =
            LocalTaskSupervisor::new(settings, caller.clone(), ports, EventBus::default());

        supervisor.start_task(&job("job-3"), &ProcessConfig::default()).await.unwrap();
        supervisor.start_task(&job("job-4"), &ProcessConfig::default()).await.unwrap();

        let launches = caller.launches.lock().await;
        assert!(launches.iter().all(|l| l.listen_port == Some(8989)));
        // Context always travels inline to pods
        assert!(launches[0].environment.contains_key(env::JOB_CONTEXT));
        assert_eq!(launches[0].environment[env::RUN_MODE], "k8s");
    }

    #[tokio::test]
    async fn test_file_transfer_writes_context_file() {
        let dir = tempfile::tempdir().unwrap();
        let caller = Arc::new(MockJobCaller::new(RunMode::Process));
        let mut settings = settings(MonitorMode::Pull);
        settings.context_transfer = ContextTransfer::File;
        settings.context_directory = dir.path().join("contexts");
        let ports = detector(45000, 45010);
        let supervisor =
            LocalTaskSupervisor::new(settings, caller.clone(), ports, EventBus::default());

        let config = ProcessConfig::default();
        let endpoint = supervisor.start_task(&job("job-5"), &config).await.unwrap();

        let path = {
            let launches = caller.launches.lock().await;
            assert!(!launches[0].environment.contains_key(env::JOB_CONTEXT));
            PathBuf::from(&launches[0].environment[env::JOB_CONTEXT_FILE])
        };
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(JobContext::from_json(&written).unwrap(), job("job-5"));

        supervisor.destroy_task(&endpoint, &job("job-5")).await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_port_exhaustion_is_reported() {
        let caller = Arc::new(MockJobCaller::new(RunMode::Process));
        let supervisor = supervisor(MonitorMode::Pull, caller.clone(), detector(45000, 45000));

        supervisor.start_task(&job("job-6"), &ProcessConfig::default()).await.unwrap();
        let err = supervisor
            .start_task(&job("job-7"), &ProcessConfig::default())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SupervisorError::Port(PortError::Exhausted { min_port: 45000, max_port: 45000 })
        ));
        assert_eq!(caller.launches.lock().await.len(), 1);
        assert_eq!(supervisor.task_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_launch_releases_port() {
        let caller = Arc::new(MockJobCaller::new(RunMode::Process).failing());
        let ports = detector(45000, 45000);
        let supervisor = supervisor(MonitorMode::Pull, caller, ports.clone());

        let err = supervisor
            .start_task(&job("job-8"), &ProcessConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::JobCaller(JobCallerError::Launch { .. })));
        assert_eq!(supervisor.task_count(), 0);
        assert_eq!(ports.get_port().unwrap(), 45000);
    }

    #[tokio::test]
    async fn test_destroying_finished_task_keeps_reissued_lease() {
        let caller = Arc::new(MockJobCaller::new(RunMode::Process));
        let supervisor =
            supervisor(MonitorMode::Pull, caller, ports(45000, 45000, Duration::from_millis(250)));
        let config = ProcessConfig::default();

        let first = supervisor.start_task(&job("job-a"), &config).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        // The first lease expired, so its port goes to the next task
        let second = supervisor.start_task(&job("job-b"), &config).await.unwrap();
        assert_eq!(first.port(), second.port());

        assert!(supervisor.destroy_task(&first, &job("job-a")).await.unwrap());

        let err = supervisor
            .start_task(&job("job-c"), &config)
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::Port(PortError::Exhausted { .. })));

        // Tearing down the current holder does free it
        assert!(supervisor.destroy_task(&second, &job("job-b")).await.unwrap());
        let third = supervisor.start_task(&job("job-c"), &config).await.unwrap();
        assert_eq!(third.port(), second.port());
    }

    #[tokio::test]
    async fn test_resolve_endpoint_updates_tracked_task() {
        let caller = Arc::new(MockJobCaller::new(RunMode::K8s).resolving_to("10.1.0.7"));
        let supervisor = supervisor(MonitorMode::Pull, caller, detector(45000, 45000));

        let config = ProcessConfig::default();
        let endpoint = supervisor.start_task(&job("job-r"), &config).await.unwrap();
        assert_eq!(endpoint.host(), "127.0.0.1");

        let resolved = supervisor.resolve_endpoint(&endpoint).await.unwrap();
        assert_eq!(resolved.host(), "10.1.0.7");
        assert_eq!(resolved.port(), 8989);
        assert_eq!(supervisor.task(&endpoint.job_identity), Some(resolved));
    }

    #[tokio::test]
    async fn test_lifecycle_start_check_destroy() {
        let caller = Arc::new(MockJobCaller::new(RunMode::Process));
        let event_bus = EventBus::new(16);
        let mut events = event_bus.subscribe_job(JobIdentity::from_string("job-9"));
        let supervisor = LocalTaskSupervisor::new(
            settings(MonitorMode::Pull),
            caller.clone(),
            detector(45000, 45010),
            event_bus,
        );
        assert_eq!(supervisor.supervisor_endpoint(), SupervisorEndpoint::new("10.0.0.1", 8990));

        let context = job("job-9");
        let endpoint = supervisor.start_task(&context, &ProcessConfig::default()).await.unwrap();
        assert!(supervisor.is_task_alive(&endpoint.identifier).await.unwrap());

        assert!(supervisor.destroy_task(&endpoint, &context).await.unwrap());
        assert!(!supervisor.is_task_alive(&endpoint.identifier).await.unwrap());

        // Already gone: still succeeds, nothing tracked any more
        assert!(!supervisor.destroy_task(&endpoint, &context).await.unwrap());
        assert_eq!(caller.destroyed.lock().await.len(), 2);

        assert!(matches!(events.recv().await.unwrap(), TaskEvent::Started { .. }));
        assert!(matches!(events.recv().await.unwrap(), TaskEvent::Destroyed { .. }));
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = JobvisorConfigManifest::default();
        config.spec.supervisor.host = "192.168.1.5".to_string();
        config.spec.monitor.mode = MonitorMode::Push;
        let settings = SupervisorSettings::from_config(&config);
        assert_eq!(settings.endpoint, SupervisorEndpoint::new("192.168.1.5", 8990));
        assert_eq!(settings.monitor_mode, MonitorMode::Push);
        assert_eq!(settings.report_interval, Duration::from_secs(10));
        assert_eq!(settings.container_listen_port, 8989);
    }

    #[test]
    fn test_from_config_requires_k8s_section_for_pods() {
        let config = JobvisorConfigManifest::default();
        let pods = LocalTaskSupervisor::from_config(&config, RunMode::K8s, EventBus::default());
        assert!(pods.is_err());
        let supervisor =
            LocalTaskSupervisor::from_config(&config, RunMode::Process, EventBus::default());
        let supervisor = supervisor.unwrap();
        assert_eq!(supervisor.run_mode(), RunMode::Process);
    }
}
