// Copyright (C) 2025 The runlet Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-execution state cell.
//!
//! Each execution record lives in its own `watch` channel. Dispatch mutates it
//! without touching the registry lock, readers clone a consistent snapshot and
//! waiters are woken on every change.

use tokio::sync::watch;

use crate::models::FunctionExecution;

/// Shared, observable state of one execution.
#[derive(Debug)]
pub struct ExecutionCell {
    tx: watch::Sender<FunctionExecution>,
}

impl ExecutionCell {
    /// Wrap a freshly started execution.
    pub fn new(execution: FunctionExecution) -> Self {
        let (tx, _rx) = watch::channel(execution);
        Self { tx }
    }

    /// A copy of the current state.
    pub fn snapshot(&self) -> FunctionExecution {
        self.tx.borrow().clone()
    }

    /// Apply `f` to the state and notify waiters.
    pub fn update(&self, f: impl FnOnce(&mut FunctionExecution)) {
        self.tx.send_modify(f);
    }

    /// Wait until the execution is completed or failed.
    pub async fn wait_terminal(&self) -> FunctionExecution {
        let mut rx = self.tx.subscribe();
        match rx.wait_for(|execution| execution.status.is_terminal()).await {
            Ok(execution) => execution.clone(),
            // The sender lives in `self`, so the channel cannot close here.
            Err(_) => self.snapshot(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExecutionStatus, FunctionInvocation, Principal};
    use std::sync::Arc;
    use std::time::Duration;

    fn running() -> FunctionExecution {
        FunctionExecution::start(&FunctionInvocation::new("f", Principal::new("alice")))
    }

    #[tokio::test]
    async fn test_snapshot_reflects_updates() {
        let cell = ExecutionCell::new(running());
        cell.update(|e| e.logs.push("line".to_string()));
        assert_eq!(cell.snapshot().logs, vec!["line".to_string()]);
    }

    #[tokio::test]
    async fn test_wait_terminal_wakes_on_completion() {
        let cell = Arc::new(ExecutionCell::new(running()));

        let writer = cell.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.update(|e| e.status = ExecutionStatus::Completed);
        });

        let done = tokio::time::timeout(Duration::from_secs(1), cell.wait_terminal())
            .await
            .expect("waiter should be woken");
        assert_eq!(done.status, ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn test_wait_terminal_returns_immediately_when_done() {
        let cell = ExecutionCell::new(running());
        cell.update(|e| e.fail("boom"));
        assert_eq!(cell.wait_terminal().await.status, ExecutionStatus::Failed);
    }
}
