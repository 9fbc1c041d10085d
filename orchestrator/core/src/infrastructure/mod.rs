// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod counting_executor;
pub mod event_bus;
pub mod executor_client;
pub mod k8s;
pub mod local_process;
pub mod port_detector;
pub mod telemetry;

pub use event_bus::{DomainEvent, EventBus};
pub use port_detector::PortDetector;
