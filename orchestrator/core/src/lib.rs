// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # jobvisor-core
//!
//! Job supervision core: launches job executors as local processes or
//! pods, tracks the platform resources backing them and monitors their
//! progress by polling (`pull`) or by receiving reports (`push`).
//!
//! # Architecture
//!
//! - `domain`: jobs, resources, executor and supervisor contracts
//! - `application`: task supervisor, resource manager, action FSM, executor runtime
//! - `infrastructure`: process and pod backends, port leasing, HTTP clients, event bus
//! - `presentation`: HTTP surfaces served by executors and supervisors

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
