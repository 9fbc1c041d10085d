// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Action Contracts
//!
//! Building blocks of an action state machine: the per-state [`Action`], the
//! pure [`StateTransfer`] that picks the next state, and the [`FsmDelegate`]
//! hooks through which the caller resolves and persists workflow state.
//!
//! The engine itself lives in `application::action_fsm`.

use async_trait::async_trait;

/// One state's unit of work plus its compensating rollback.
#[async_trait]
pub trait Action<C, R>: Send + Sync
where
    C: Send + Sync,
{
    /// Performs the real work; any error triggers `rollback` and a retry on the
    /// next scheduling tick.
    async fn execute(&self, context: &C) -> anyhow::Result<R>;

    /// Best-effort undo of a failed `execute`.
    async fn rollback(&self, _context: &C) {}
}

/// Pure next-state function. Must be deterministic and side-effect free.
pub trait StateTransfer<C, R>: Send + Sync {
    fn translate_to_new_state(&self, current_state: &str, result: &R, context: &C) -> String;
}

impl<C, R, F> StateTransfer<C, R> for F
where
    F: Fn(&str, &R, &C) -> String + Send + Sync,
{
    fn translate_to_new_state(&self, current_state: &str, result: &R, context: &C) -> String {
        self(current_state, result, context)
    }
}

/// Caller-side hooks. The engine never inspects `C` except via `resolve_state`.
#[async_trait]
pub trait FsmDelegate<C>: Send + Sync
where
    C: Send + Sync,
{
    fn resolve_state(&self, context: &C) -> String;

    /// Invoked after a successful step; persist `next_state` here.
    async fn on_action_complete(
        &self,
        current_state: &str,
        next_state: &str,
        extra_info: &str,
        context: &C,
    );

    /// Decides whether a failure is permanent or left for retry.
    async fn handle_exception(&self, context: &C, error: &anyhow::Error);
}
