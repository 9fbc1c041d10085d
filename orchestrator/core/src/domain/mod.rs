// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain model: jobs, executors, resources and the supervisor contracts.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Pure types and traits; no I/O

pub mod action;
pub mod config;
pub mod events;
pub mod executor;
pub mod job;
pub mod resource;
pub mod supervisor;
