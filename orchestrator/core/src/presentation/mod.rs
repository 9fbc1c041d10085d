// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Presentation Layer (`jobvisor-core`)
//!
//! HTTP surface for task status. No business logic lives here; handlers read
//! from application state or publish onto the event bus.
//!
//! | Module | Transport | Description |
//! |--------|-----------|-------------|
//! | [`api`] | HTTP (Axum) | executor `/heartbeat` + `/status`, supervisor-side `/report` receiver |

pub mod api;
