// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus Implementation - Pub/Sub for Task and Resource Events
//
// In-memory event streaming over a tokio broadcast channel. Collaborators
// subscribe instead of polling the supervisor. Events are lost on restart.

use crate::domain::events::{ResourceEvent, TaskEvent};
use crate::domain::job::JobIdentity;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    Task(TaskEvent),
    Resource(ResourceEvent),
}

/// In-process fan-out of task and resource events.
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<DomainEvent>>,
}

impl EventBus {
    /// Slow receivers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    pub fn publish_task_event(&self, event: TaskEvent) {
        self.publish(DomainEvent::Task(event));
    }

    pub fn publish_resource_event(&self, event: ResourceEvent) {
        self.publish(DomainEvent::Resource(event));
    }

    fn publish(&self, event: DomainEvent) {
        debug!(?event, "Task bus event");

        // send() only fails when nobody is subscribed
        if self.sender.send(event).is_err() {
            debug!("Task bus event dropped, no subscribers");
        }
    }

    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe to task events of a single job
    pub fn subscribe_job(&self, job_identity: JobIdentity) -> JobEventReceiver {
        JobEventReceiver {
            receiver: self.sender.subscribe(),
            job_identity,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

fn map_recv_error(e: broadcast::error::RecvError) -> EventBusError {
    match e {
        broadcast::error::RecvError::Closed => EventBusError::Closed,
        broadcast::error::RecvError::Lagged(n) => {
            warn!(skipped = n, "Task bus receiver fell behind");
            EventBusError::Lagged(n)
        }
    }
}

pub struct EventReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Result<DomainEvent, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }

    pub fn try_recv(&mut self) -> Result<DomainEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!(skipped = n, "Task bus receiver fell behind");
                EventBusError::Lagged(n)
            }
        })
    }
}

/// Receiver filtered to one job's task events
pub struct JobEventReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
    job_identity: JobIdentity,
}

impl JobEventReceiver {
    pub async fn recv(&mut self) -> Result<TaskEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(map_recv_error)?;
            if let DomainEvent::Task(task_event) = event {
                if task_event.job_identity() == &self.job_identity {
                    return Ok(task_event);
                }
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Task event bus closed")]
    Closed,

    #[error("No pending task events")]
    Empty,

    #[error("Receiver skipped {0} task events")]
    Lagged(u64),
}
