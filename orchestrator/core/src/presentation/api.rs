// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

use crate::application::executor_runtime::TaskStatusHandle;
use crate::domain::events::TaskEvent;
use crate::domain::job::TaskReport;
use crate::infrastructure::event_bus::EventBus;

/// Served by a running executor in pull mode.
pub fn executor_status_app(handle: Arc<TaskStatusHandle>) -> Router {
    Router::new()
        .route("/heartbeat", get(heartbeat))
        .route("/status", get(status))
        .with_state(handle)
}

async fn heartbeat() -> Json<serde_json::Value> {
    Json(json!({ "alive": true }))
}

async fn status(State(handle): State<Arc<TaskStatusHandle>>) -> Json<TaskReport> {
    let report = handle.report();
    if report.status.is_terminated() {
        handle.mark_final_read();
    }
    Json(report)
}

/// Mounted on the supervisor side to receive push-mode reports.
pub fn report_receiver_app(event_bus: EventBus) -> Router {
    Router::new()
        .route("/report", post(receive_report))
        .with_state(event_bus)
}

async fn receive_report(State(event_bus): State<EventBus>, Json(report): Json<TaskReport>) -> StatusCode {
    debug!(job_id = %report.job_identity, status = ?report.status, "Received task report");
    event_bus.publish_task_event(TaskEvent::StatusReported {
        report,
        reported_at: Utc::now(),
    });
    StatusCode::ACCEPTED
}
