// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Executor Runtime
//!
//! The in-resource side of a task. Started inside the process or pod the
//! supervisor provisioned, it:
//!
//! 1. reads the environment contract ([`RuntimeEnvironment::from_env`]),
//! 2. resolves the executor by name through the [`ExecutorRegistry`],
//! 3. serves `/heartbeat` and `/status` (pull mode) or posts reports to the
//!    configured URLs (push mode) while the executor runs,
//! 4. runs `init` → `start` → `close` and publishes the final status.
//!
//! In pull mode the status server stays up after completion until the final
//! status has been read once, or `final_status_linger` elapses.

use crate::domain::executor::{ExecutorError, JobExecutor};
use crate::domain::job::{env, JobContext, JobIdentity, JobStatus, TaskReport};
use crate::domain::supervisor::RunMode;
use crate::infrastructure::counting_executor::{CountingExecutor, COUNTING_EXECUTOR};
use crate::infrastructure::executor_client::ReportPublisher;
use crate::presentation::api::executor_status_app;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Missing environment variable {0}")]
    MissingVariable(&'static str),
    #[error("Invalid value for {name}: {message}")]
    InvalidVariable { name: &'static str, message: String },
    #[error("Failed to read job context file: {0}")]
    ContextFile(String),
    #[error(transparent)]
    Executor(#[from] ExecutorError),
    #[error("Status server failed: {0}")]
    Server(String),
}

type ExecutorFactory = Arc<dyn Fn() -> Arc<dyn JobExecutor> + Send + Sync>;

/// Maps fully-qualified executor names to factories.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    factories: HashMap<String, ExecutorFactory>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the executors shipped in this crate.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(COUNTING_EXECUTOR, || Arc::new(CountingExecutor::new()) as Arc<dyn JobExecutor>);
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn JobExecutor> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn JobExecutor>, ExecutorError> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| ExecutorError::UnknownExecutor(name.to_string()))
    }
}

/// Everything the supervisor handed the executor through its environment.
#[derive(Debug, Clone)]
pub struct RuntimeEnvironment {
    pub run_mode: RunMode,
    pub job_context: JobContext,
    pub executor_user: Option<String>,
    pub log_directory: Option<PathBuf>,
    pub listen_port: Option<u16>,
    pub report_urls: Vec<String>,
    /// Push report period chosen by the supervisor
    pub report_interval: Option<Duration>,
}

impl RuntimeEnvironment {
    pub fn from_env() -> Result<Self, RuntimeError> {
        Self::from_vars(&std::env::vars().collect())
    }

    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, RuntimeError> {
        let run_mode = match vars.get(env::RUN_MODE).map(String::as_str) {
            Some("process") => RunMode::Process,
            Some("k8s") => RunMode::K8s,
            Some(other) => {
                return Err(RuntimeError::InvalidVariable {
                    name: env::RUN_MODE,
                    message: format!("unknown run mode '{}'", other),
                })
            }
            None => return Err(RuntimeError::MissingVariable(env::RUN_MODE)),
        };

        let context_json = match (vars.get(env::JOB_CONTEXT), vars.get(env::JOB_CONTEXT_FILE)) {
            (Some(inline), _) => inline.clone(),
            (None, Some(path)) => {
                std::fs::read_to_string(path).map_err(|e| RuntimeError::ContextFile(format!("{}: {}", path, e)))?
            }
            (None, None) => return Err(RuntimeError::MissingVariable(env::JOB_CONTEXT)),
        };
        let job_context = JobContext::from_json(&context_json).map_err(|e| RuntimeError::InvalidVariable {
            name: env::JOB_CONTEXT,
            message: e.to_string(),
        })?;

        let listen_port = vars
            .get(env::EXECUTOR_PORT)
            .map(|p| {
                p.parse::<u16>().map_err(|e| RuntimeError::InvalidVariable {
                    name: env::EXECUTOR_PORT,
                    message: e.to_string(),
                })
            })
            .transpose()?;

        let report_urls = vars
            .get(env::REPORT_URLS)
            .map(|urls| {
                urls.split(',')
                    .map(str::trim)
                    .filter(|u| !u.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let report_interval = vars
            .get(env::REPORT_INTERVAL_MS)
            .map(|ms| match ms.trim().parse::<u64>() {
                Ok(0) => Err(RuntimeError::InvalidVariable {
                    name: env::REPORT_INTERVAL_MS,
                    message: "must be greater than zero".to_string(),
                }),
                Ok(ms) => Ok(Duration::from_millis(ms)),
                Err(e) => Err(RuntimeError::InvalidVariable {
                    name: env::REPORT_INTERVAL_MS,
                    message: e.to_string(),
                }),
            })
            .transpose()?;

        Ok(Self {
            run_mode,
            job_context,
            executor_user: vars.get(env::EXECUTOR_USER).cloned(),
            log_directory: vars.get(env::LOG_DIRECTORY).map(PathBuf::from),
            listen_port,
            report_urls,
            report_interval,
        })
    }
}

/// Live status of the running executor, shared with the status server and
/// the push reporter.
pub struct TaskStatusHandle {
    job_identity: JobIdentity,
    executor: Arc<dyn JobExecutor>,
    status: RwLock<JobStatus>,
    executor_endpoint: Option<String>,
    final_read: AtomicBool,
    final_read_notify: Notify,
}

impl TaskStatusHandle {
    pub fn new(job_identity: JobIdentity, executor: Arc<dyn JobExecutor>, executor_endpoint: Option<String>) -> Self {
        Self {
            job_identity,
            executor,
            status: RwLock::new(JobStatus::Preparing),
            executor_endpoint,
            final_read: AtomicBool::new(false),
            final_read_notify: Notify::new(),
        }
    }

    pub fn status(&self) -> JobStatus {
        *self.status.read()
    }

    pub fn set_status(&self, status: JobStatus) {
        *self.status.write() = status;
    }

    pub fn report(&self) -> TaskReport {
        let status = self.status();
        let result = if status.is_terminated() {
            self.executor.result()
        } else {
            serde_json::Value::Null
        };
        TaskReport {
            job_identity: self.job_identity.clone(),
            status,
            progress: self.executor.progress(),
            result,
            executor_endpoint: self.executor_endpoint.clone(),
        }
    }

    /// Called by the status server after it served a terminal report.
    pub fn mark_final_read(&self) {
        self.final_read.store(true, Ordering::SeqCst);
        self.final_read_notify.notify_waiters();
    }

    async fn wait_final_read(&self) {
        loop {
            let notified = self.final_read_notify.notified();
            if self.final_read.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }
}

const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(10);

pub struct ExecutorRuntime {
    environment: RuntimeEnvironment,
    registry: ExecutorRegistry,
    report_interval: Duration,
    final_status_linger: Duration,
}

impl ExecutorRuntime {
    pub fn new(environment: RuntimeEnvironment, registry: ExecutorRegistry) -> Self {
        let report_interval = environment.report_interval.unwrap_or(DEFAULT_REPORT_INTERVAL);
        Self {
            environment,
            registry,
            report_interval,
            final_status_linger: Duration::from_secs(60),
        }
    }

    pub fn from_env(registry: ExecutorRegistry) -> Result<Self, RuntimeError> {
        Ok(Self::new(RuntimeEnvironment::from_env()?, registry))
    }

    pub fn with_final_status_linger(mut self, linger: Duration) -> Self {
        self.final_status_linger = linger;
        self
    }

    /// Runs the executor to completion and returns its final report.
    pub async fn run(self) -> Result<TaskReport, RuntimeError> {
        let job_context = self.environment.job_context.clone();
        let job_id = job_context.job_identity.clone();
        let executor = self.registry.resolve(&job_context.job_class)?;

        let endpoint = self.environment.listen_port.map(|port| {
            let host = hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "localhost".to_string());
            format!("http://{}:{}", host, port)
        });
        let handle = Arc::new(TaskStatusHandle::new(job_id.clone(), executor.clone(), endpoint));
        let shutdown = CancellationToken::new();

        info!(
            job_id = %job_id,
            job_class = %job_context.job_class,
            run_mode = %self.environment.run_mode,
            user = ?self.environment.executor_user,
            "Executor runtime starting"
        );

        let server = match self.environment.listen_port {
            Some(port) => Some(self.spawn_status_server(port, handle.clone(), shutdown.clone()).await?),
            None => None,
        };

        let publisher = if self.environment.report_urls.is_empty() {
            None
        } else {
            ReportPublisher::new(self.environment.report_urls.clone(), Duration::from_secs(10))
                .map_err(|e| warn!(job_id = %job_id, error = %e, "Push reporting disabled"))
                .ok()
        };
        let reporter = publisher
            .clone()
            .map(|p| spawn_reporter(p, handle.clone(), self.report_interval, shutdown.clone()));

        let stopper = {
            let executor = executor.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = shutdown.cancelled() => {}
                    _ = tokio::signal::ctrl_c() => {
                        info!("Termination requested, stopping executor");
                        executor.stop();
                    }
                }
            })
        };

        let final_status = match executor.init(&job_context).await {
            Ok(()) => {
                handle.set_status(JobStatus::Running);
                match executor.start().await {
                    Ok(true) => JobStatus::Done,
                    Ok(false) => JobStatus::Canceled,
                    Err(e) => {
                        error!(job_id = %job_id, error = %e, "Executor failed");
                        JobStatus::Failed
                    }
                }
            }
            Err(e) => {
                error!(job_id = %job_id, error = %e, "Executor initialization failed");
                JobStatus::Failed
            }
        };
        executor.close().await;
        handle.set_status(final_status);
        let report = handle.report();
        info!(job_id = %job_id, status = ?final_status, progress = report.progress, "Executor finished");

        if let Some(publisher) = &publisher {
            publisher.publish(&report).await;
        }

        if server.is_some() {
            if tokio::time::timeout(self.final_status_linger, handle.wait_final_read())
                .await
                .is_err()
            {
                warn!(job_id = %job_id, "Final status was not collected before linger timeout");
            }
        }

        shutdown.cancel();
        if let Some(server) = server {
            server
                .await
                .map_err(|e| RuntimeError::Server(e.to_string()))?
                .map_err(|e| RuntimeError::Server(e.to_string()))?;
        }
        if let Some(reporter) = reporter {
            let _ = reporter.await;
        }
        let _ = stopper.await;

        Ok(report)
    }

    async fn spawn_status_server(
        &self,
        port: u16,
        handle: Arc<TaskStatusHandle>,
        shutdown: CancellationToken,
    ) -> Result<tokio::task::JoinHandle<std::io::Result<()>>, RuntimeError> {
        let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(|e| RuntimeError::Server(format!("Failed to bind port {}: {}", port, e)))?;
        info!(port, "Executor status server listening");

        let app = executor_status_app(handle);
        Ok(tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
        }))
    }
}

fn spawn_reporter(
    publisher: ReportPublisher,
    handle: Arc<TaskStatusHandle>,
    interval: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let report = handle.report();
                    if report.status.is_terminated() {
                        break;
                    }
                    publisher.publish(&report).await;
                }
            }
        }
    })
}
