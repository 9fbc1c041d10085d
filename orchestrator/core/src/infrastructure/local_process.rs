// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Local Process Backend
//!
//! Runs executors as child processes of the supervisor.
//!
//! - [`LocalResourceOperator`] keeps bookkeeping for local resources in a
//!   bounded LRU registry. Eviction only forgets the entry; it never touches
//!   the process.
//! - [`ProcessJobCaller`] spawns the executor program with the assembled
//!   environment and tracks the `Child` handle for liveness and teardown.

use crate::domain::job::ExecutorIdentifier;
use crate::domain::resource::{
    LastActiveFn, Resource, ResourceContext, ResourceError, ResourceId, ResourceKind, ResourceLocation,
    ResourceOperator, ResourceState,
};
use crate::domain::supervisor::{JobCaller, JobCallerError, LaunchRequest, RunMode};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct LocalResource {
    pub id: ResourceId,
    pub state: ResourceState,
    pub create_time: DateTime<Utc>,
    /// Monotonic per-operator creation counter
    pub sequence: u64,
    pub pid: Option<u32>,
}

impl Resource for LocalResource {
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

pub struct LocalResourceOperator {
    registry: Mutex<LruCache<ResourceId, LocalResource>>,
    sequence: AtomicU64,
}

impl LocalResourceOperator {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            registry: Mutex::new(LruCache::new(capacity)),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn resource_id(name: &str) -> ResourceId {
        ResourceId::new(ResourceLocation::local(), ResourceKind::Process, "", name)
    }

    /// Records the OS pid once the process has been spawned.
    pub fn attach_pid(&self, id: &ResourceId, pid: Option<u32>) {
        if let Some(resource) = self.registry.lock().peek_mut(id) {
            resource.pid = pid;
        }
    }

    pub fn len(&self) -> usize {
        self.registry.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ResourceOperator<ResourceContext, LocalResource> for LocalResourceOperator {
    async fn create(&self, context: &ResourceContext) -> Result<LocalResource, ResourceError> {
        let id = context.resource_id(ResourceKind::Process);
        let mut registry = self.registry.lock();

        if let Some(existing) = registry.get(&id) {
            if existing.state.is_live() {
                return Ok(existing.clone());
            }
        }

        let resource = LocalResource {
            id: id.clone(),
            state: ResourceState::Running,
            create_time: Utc::now(),
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst) + 1,
            pid: None,
        };
        if let Some((evicted, _)) = registry.push(id, resource.clone()) {
            if evicted != resource.id {
                debug!(resource_id = %evicted, "Evicted local resource from registry");
            }
        }

        metrics::counter!("jobvisor_resources_created_total", "kind" => ResourceKind::Process.as_str())
            .increment(1);
        Ok(resource)
    }

    async fn query(&self, id: &ResourceId) -> Result<Option<LocalResource>, ResourceError> {
        Ok(self.registry.lock().get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<LocalResource>, ResourceError> {
        Ok(self.registry.lock().iter().map(|(_, r)| r.clone()).collect())
    }

    async fn destroy(&self, id: &ResourceId) -> Result<String, ResourceError> {
        match self.registry.lock().pop(id) {
            Some(_) => Ok(format!("Local resource {} released", id)),
            None => Ok(format!("Local resource {} not found", id)),
        }
    }

    fn can_be_destroyed(&self, _id: &ResourceId, _last_active: LastActiveFn<'_>) -> bool {
        true
    }
}

/// Spawns executors as local child processes.
pub struct ProcessJobCaller {
    operator: Arc<LocalResourceOperator>,
    host: String,
    program: String,
    args: Vec<String>,
    log_directory: PathBuf,
    children: DashMap<String, Child>,
}

impl ProcessJobCaller {
    pub fn new(
        operator: Arc<LocalResourceOperator>,
        host: impl Into<String>,
        program: impl Into<String>,
        args: Vec<String>,
        log_directory: impl Into<PathBuf>,
    ) -> Self {
        Self {
            operator,
            host: host.into(),
            program: program.into(),
            args,
            log_directory: log_directory.into(),
            children: DashMap::new(),
        }
    }

    pub fn operator(&self) -> &Arc<LocalResourceOperator> {
        &self.operator
    }

    /// Forgets an exited child for `job_id`; `true` while one is still running.
    fn is_running(&self, job_id: &str) -> bool {
        let running = match self.children.get_mut(job_id) {
            Some(mut child) => matches!(child.try_wait(), Ok(None)),
            None => return false,
        };
        if !running {
            self.children.remove(job_id);
        }
        running
    }

    fn open_log(&self, name: &str) -> std::io::Result<(Stdio, Stdio)> {
        std::fs::create_dir_all(&self.log_directory)?;
        let log = std::fs::File::create(self.log_directory.join(format!("{}.log", name)))?;
        Ok((Stdio::from(log.try_clone()?), Stdio::from(log)))
    }
}

#[async_trait]
impl JobCaller for ProcessJobCaller {
    fn run_mode(&self) -> RunMode {
        RunMode::Process
    }

    async fn start(&self, request: LaunchRequest) -> Result<ExecutorIdentifier, JobCallerError> {
        let job_id = request.job_context.job_identity.to_string();
        let launch_err = |message: String| JobCallerError::Launch {
            job_id: job_id.clone(),
            message,
        };

        if self.is_running(&job_id) {
            return Err(launch_err("An executor for this job is already running".to_string()));
        }

        let context = ResourceContext::new(ResourceLocation::local(), "", job_id.clone())
            .with_env(request.environment.clone());
        let resource = self.operator.create(&context).await?;

        let (stdout, stderr) = match self.open_log(&job_id) {
            Ok(pipes) => pipes,
            Err(e) => {
                self.operator.destroy(&resource.id).await?;
                return Err(launch_err(format!("Failed to open executor log: {}", e)));
            }
        };

        let spawned = Command::new(&self.program)
            .args(&self.args)
            .envs(&request.environment)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .kill_on_drop(true)
            .spawn();

        let child = match spawned {
            Ok(child) => child,
            Err(e) => {
                self.operator.destroy(&resource.id).await?;
                return Err(launch_err(format!("Failed to spawn '{}': {}", self.program, e)));
            }
        };
        let pid = child.id();

        // A concurrent start for the same job may have won the slot
        let mut slot = self.children.entry(job_id.clone());
        let taken = match &mut slot {
            Entry::Occupied(existing) => matches!(existing.get_mut().try_wait(), Ok(None)),
            Entry::Vacant(_) => false,
        };
        if taken {
            drop(slot);
            drop(child);
            return Err(launch_err("An executor for this job is already running".to_string()));
        }
        slot.insert(child);
        self.operator.attach_pid(&resource.id, pid);

        let port = request.listen_port.unwrap_or(0);
        let identifier = ExecutorIdentifier::process(&self.host, port, job_id);
        info!(executor = %identifier, pid = ?pid, "Spawned local executor process");
        Ok(identifier)
    }

    async fn is_alive(&self, identifier: &ExecutorIdentifier) -> Result<bool, JobCallerError> {
        let Some(mut child) = self.children.get_mut(&identifier.name) else {
            return Ok(false);
        };
        match child.try_wait() {
            Ok(None) => Ok(true),
            Ok(Some(status)) => {
                debug!(executor = %identifier, %status, "Executor process has exited");
                Ok(false)
            }
            Err(e) => {
                warn!(executor = %identifier, error = %e, "Failed to poll executor process");
                Ok(false)
            }
        }
    }

    async fn destroy(&self, identifier: &ExecutorIdentifier) -> Result<(), JobCallerError> {
        if let Some((_, mut child)) = self.children.remove(&identifier.name) {
            if matches!(child.try_wait(), Ok(None)) {
                if let Err(e) = child.kill().await {
                    return Err(JobCallerError::Terminate {
                        identifier: identifier.to_string(),
                        message: e.to_string(),
                    });
                }
                info!(executor = %identifier, "Killed local executor process");
            }
        }

        let message = self
            .operator
            .destroy(&LocalResourceOperator::resource_id(&identifier.name))
            .await?;
        debug!(executor = %identifier, "{}", message);
        Ok(())
    }
}
