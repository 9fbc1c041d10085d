// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod action_fsm;
pub mod executor_runtime;
pub mod resource_manager;
pub mod task_supervisor;

pub use action_fsm::{ActionFsm, FsmError, StepOutcome};
pub use executor_runtime::{ExecutorRegistry, ExecutorRuntime, RuntimeEnvironment};
pub use resource_manager::{AnyResource, ResourceManager};
pub use task_supervisor::{LocalTaskSupervisor, SupervisorSettings};
