// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Action State Machine Application Service
//!
//! Executes exactly one workflow step per [`ActionFsm::schedule`] call.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Drive caller-persisted workflows one state at a time
//! - **Dependencies:** Domain (`Action`, `StateTransfer`, `FsmDelegate`)
//!
//! # Step
//!
//! ```text
//! current = delegate.resolve_state(ctx)
//! match node[current].action.execute(ctx) {
//!     Ok(result) => {
//!         next = node.transfer(current, result, ctx)   // advisory check vs allowed set
//!         delegate.on_action_complete(current, next, json(result), ctx)
//!         Completed { current, next }
//!     }
//!     Err(e) => {
//!         node.action.rollback(ctx)
//!         delegate.handle_exception(ctx, e)
//!         Retry { current }                           // state unchanged
//!     }
//! }
//! ```
//!
//! The engine holds no per-workflow state. The caller persists `next` (usually
//! in `on_action_complete`) and feeds the updated context back in.

use crate::domain::action::{Action, FsmDelegate, StateTransfer};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FsmError {
    #[error("No action registered for state '{0}'")]
    UnregisteredState(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Completed { current_state: String, next_state: String },
    Retry { current_state: String },
}

impl StepOutcome {
    pub fn completed(&self) -> bool {
        matches!(self, StepOutcome::Completed { .. })
    }

    pub fn current_state(&self) -> &str {
        match self {
            StepOutcome::Completed { current_state, .. } | StepOutcome::Retry { current_state } => current_state,
        }
    }

    pub fn next_state(&self) -> Option<&str> {
        match self {
            StepOutcome::Completed { next_state, .. } => Some(next_state),
            StepOutcome::Retry { .. } => None,
        }
    }
}

pub struct FsmNode<C, R>
where
    C: Send + Sync,
{
    pub state: String,
    action: Arc<dyn Action<C, R>>,
    transfer: Arc<dyn StateTransfer<C, R>>,
    pub next_states: HashSet<String>,
}

/// `true` when `next_state` is in the allowed set. Diagnostics only.
pub fn check_transition(next_state: &str, allowed: &HashSet<String>) -> bool {
    allowed.contains(next_state)
}

pub struct ActionFsm<C, R>
where
    C: Send + Sync,
{
    nodes: HashMap<String, FsmNode<C, R>>,
    delegate: Arc<dyn FsmDelegate<C>>,
}

impl<C, R> ActionFsm<C, R>
where
    C: Send + Sync,
    R: Serialize + Send + Sync,
{
    pub fn new(delegate: Arc<dyn FsmDelegate<C>>) -> Self {
        Self {
            nodes: HashMap::new(),
            delegate,
        }
    }

    /// Registers the node for `state`. A later registration of the same state
    /// replaces the earlier one.
    pub fn register_event<A, T, I, S>(&mut self, state: impl Into<String>, action: A, transfer: T, next_states: I) -> &mut Self
    where
        A: Action<C, R> + 'static,
        T: StateTransfer<C, R> + 'static,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let state = state.into();
        let node = FsmNode {
            state: state.clone(),
            action: Arc::new(action),
            transfer: Arc::new(transfer),
            next_states: next_states.into_iter().map(Into::into).collect(),
        };
        if self.nodes.insert(state.clone(), node).is_some() {
            debug!(state = %state, "Replaced FSM node");
        }
        self
    }

    pub fn node(&self, state: &str) -> Option<&FsmNode<C, R>> {
        self.nodes.get(state)
    }

    pub fn states(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// Runs one step for `context`. Action failures are absorbed and reported
    /// as [`StepOutcome::Retry`]; only an unregistered state is an error.
    pub async fn schedule(&self, context: &C) -> Result<StepOutcome, FsmError> {
        let current_state = self.delegate.resolve_state(context);
        let node = self
            .nodes
            .get(&current_state)
            .ok_or_else(|| FsmError::UnregisteredState(current_state.clone()))?;

        match node.action.execute(context).await {
            Ok(result) => {
                let next_state = node.transfer.translate_to_new_state(&current_state, &result, context);
                if !check_transition(&next_state, &node.next_states) {
                    warn!(
                        current_state = %current_state,
                        next_state = %next_state,
                        expected = ?node.next_states,
                        "Unexpected state transition"
                    );
                }

                let extra_info = serde_json::to_string(&result).unwrap_or_else(|e| {
                    warn!(current_state = %current_state, error = %e, "Failed to serialize action result");
                    String::new()
                });
                self.delegate
                    .on_action_complete(&current_state, &next_state, &extra_info, context)
                    .await;

                info!(current_state = %current_state, next_state = %next_state, "Action completed");
                Ok(StepOutcome::Completed {
                    current_state,
                    next_state,
                })
            }
            Err(error) => {
                metrics::counter!("jobvisor_fsm_action_failures_total").increment(1);
                warn!(current_state = %current_state, error = %error, "Action failed, rolling back");
                node.action.rollback(context).await;
                self.delegate.handle_exception(context, &error).await;
                Ok(StepOutcome::Retry { current_state })
            }
        }
    }
}
