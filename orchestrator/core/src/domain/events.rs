// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::domain::job::{ExecutorEndpoint, JobIdentity, TaskReport};
use crate::domain::resource::{ResourceId, ResourceState};
use crate::domain::supervisor::RunMode;

/// Task lifecycle events published by the supervisor and status receivers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TaskEvent {
    Started {
        job_identity: JobIdentity,
        endpoint: ExecutorEndpoint,
        run_mode: RunMode,
        started_at: DateTime<Utc>,
    },
    Destroyed {
        job_identity: JobIdentity,
        endpoint: ExecutorEndpoint,
        destroyed_at: DateTime<Utc>,
    },
    StatusReported {
        report: TaskReport,
        reported_at: DateTime<Utc>,
    },
}

impl TaskEvent {
    pub fn job_identity(&self) -> &JobIdentity {
        match self {
            TaskEvent::Started { job_identity, .. } => job_identity,
            TaskEvent::Destroyed { job_identity, .. } => job_identity,
            TaskEvent::StatusReported { report, .. } => &report.job_identity,
        }
    }
}

/// Resource events emitted by the resource manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResourceEvent {
    Created {
        resource_id: ResourceId,
        state: ResourceState,
        created_at: DateTime<Utc>,
    },
    Destroyed {
        resource_id: ResourceId,
        destroyed_at: DateTime<Utc>,
    },
}
