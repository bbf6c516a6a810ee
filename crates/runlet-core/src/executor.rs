// Copyright (C) 2025 The runlet Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Gas-metered execution on top of a [`Sandbox`].
//!
//! Gas is charged after the run from the reported duration and memory:
//!
//! | Component | Cost |
//! |-----------|------|
//! | base | 1000 |
//! | per millisecond | 1 |
//! | per KiB of memory | 1 |
//! | network capability | 500 |
//! | file I/O capability | 500 |

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::models::Principal;
use crate::sandbox::{ResourceLimits, Sandbox, SandboxError, SandboxInput};

/// Gas prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasSchedule {
    /// Flat cost of every run.
    pub base_cost: u64,
    /// Cost per millisecond of wall time.
    pub per_ms: u64,
    /// Cost per KiB of peak memory.
    pub per_kib: u64,
    /// Cost of each granted capability (network, file I/O).
    pub capability_cost: u64,
}

impl Default for GasSchedule {
    fn default() -> Self {
        Self {
            base_cost: 1000,
            per_ms: 1,
            per_kib: 1,
            capability_cost: 500,
        }
    }
}

impl GasSchedule {
    /// Gas for a run with the given measurements.
    pub fn charge(
        &self,
        duration_ms: u64,
        memory_used_bytes: u64,
        network: bool,
        file_io: bool,
    ) -> u64 {
        let mut gas = self
            .base_cost
            .saturating_add(self.per_ms.saturating_mul(duration_ms))
            .saturating_add(self.per_kib.saturating_mul(memory_used_bytes / 1024));
        if network {
            gas = gas.saturating_add(self.capability_cost);
        }
        if file_io {
            gas = gas.saturating_add(self.capability_cost);
        }
        gas
    }
}

/// Per-run options.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOptions {
    /// Time ceiling, enforced here as well as in the sandbox.
    pub timeout: Duration,
    /// Memory ceiling in bytes.
    pub memory_limit_bytes: u64,
    /// Gas ceiling; `None` means unmetered.
    pub gas_limit: Option<u64>,
    /// Function being run, passed to the code as context.
    pub function_id: Option<String>,
    /// Invoking principal.
    pub caller: Option<Principal>,
    /// Trace ID passed to the code as context.
    pub trace_id: Option<String>,
    /// Request network access.
    pub network: bool,
    /// Request filesystem access.
    pub file_io: bool,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            memory_limit_bytes: 128 * 1024 * 1024,
            gas_limit: Some(1_000_000),
            function_id: None,
            caller: None,
            trace_id: None,
            network: false,
            file_io: false,
        }
    }
}

/// Outcome status of a metered run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionOutcome {
    /// The code returned normally within its limits.
    Success,
    /// The sandbox failed, the code raised, or a limit was exceeded.
    Error,
}

/// Result of a metered run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Outcome.
    pub status: ExecutionOutcome,
    /// Value returned by the code.
    pub result: Option<Value>,
    /// Captured log lines.
    pub logs: Vec<String>,
    /// Failure description.
    pub error: Option<String>,
    /// Wall time in milliseconds.
    pub duration_ms: u64,
    /// Peak memory in bytes.
    pub memory_used_bytes: u64,
    /// Gas charged.
    pub gas_used: u64,
}

impl ExecutionResult {
    /// True when the run succeeded.
    pub fn is_success(&self) -> bool {
        self.status == ExecutionOutcome::Success
    }

    fn failed(error: String, duration_ms: u64, gas_used: u64) -> Self {
        Self {
            status: ExecutionOutcome::Error,
            result: None,
            logs: Vec::new(),
            error: Some(error),
            duration_ms,
            memory_used_bytes: 0,
            gas_used,
        }
    }
}

/// Runs code in a sandbox under time and gas ceilings.
#[derive(Clone)]
pub struct FunctionExecutor {
    sandbox: Arc<dyn Sandbox>,
    schedule: GasSchedule,
}

impl FunctionExecutor {
    /// Executor with the default gas schedule.
    pub fn new(sandbox: Arc<dyn Sandbox>) -> Self {
        Self::with_schedule(sandbox, GasSchedule::default())
    }

    /// Executor with a custom gas schedule.
    pub fn with_schedule(sandbox: Arc<dyn Sandbox>, schedule: GasSchedule) -> Self {
        Self { sandbox, schedule }
    }

    /// The gas schedule in use.
    pub fn schedule(&self) -> &GasSchedule {
        &self.schedule
    }

    /// The underlying sandbox.
    pub fn sandbox(&self) -> &Arc<dyn Sandbox> {
        &self.sandbox
    }

    /// Run `code` with `args`. Never fails; problems are reported on the result.
    pub async fn execute(
        &self,
        code: &str,
        args: Value,
        options: &ExecutionOptions,
    ) -> ExecutionResult {
        let limits = ResourceLimits {
            memory_limit_bytes: options.memory_limit_bytes,
            timeout: options.timeout,
            network: options.network,
            file_io: options.file_io,
        }
        .clamp_to(self.sandbox.config());

        let input = SandboxInput {
            code: code.to_string(),
            args,
            parameters: json!({
                "function_id": options.function_id,
                "caller": options.caller,
                "trace_id": options.trace_id,
                "timestamp": Utc::now().timestamp(),
            }),
            limits: limits.clone(),
        };

        let start = Instant::now();
        let outcome = tokio::time::timeout(limits.timeout, self.sandbox.execute(&input)).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        let output = match outcome {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                warn!(
                    sandbox = self.sandbox.sandbox_type(),
                    error = %err,
                    "Sandbox execution failed"
                );
                let gas = self.schedule.charge(0, 0, limits.network, limits.file_io);
                return ExecutionResult::failed(
                    format!("sandbox execution error: {}", err),
                    elapsed_ms,
                    gas,
                );
            }
            Err(_) => {
                let err = SandboxError::Timeout {
                    timeout_ms: limits.timeout.as_millis() as u64,
                };
                warn!(
                    sandbox = self.sandbox.sandbox_type(),
                    error = %err,
                    "Sandbox execution timed out"
                );
                let gas = self.schedule.charge(elapsed_ms, 0, limits.network, limits.file_io);
                return ExecutionResult::failed(err.to_string(), elapsed_ms, gas);
            }
        };

        let gas_used = self.schedule.charge(
            output.duration_ms,
            output.memory_used_bytes,
            limits.network,
            limits.file_io,
        );

        debug!(
            sandbox = self.sandbox.sandbox_type(),
            duration_ms = output.duration_ms,
            memory_used_bytes = output.memory_used_bytes,
            gas_used = gas_used,
            "Sandbox execution finished"
        );

        let mut result = ExecutionResult {
            status: ExecutionOutcome::Success,
            result: output.result,
            logs: output.logs,
            error: None,
            duration_ms: output.duration_ms,
            memory_used_bytes: output.memory_used_bytes,
            gas_used,
        };

        if let Some(limit) = options.gas_limit
            && gas_used > limit
        {
            result.status = ExecutionOutcome::Error;
            result.error = Some("gas limit exceeded".to_string());
            return result;
        }

        if let Some(error) = output.error.filter(|e| !e.is_empty()) {
            result.status = ExecutionOutcome::Error;
            result.error = Some(error);
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::MockSandbox;

    #[test]
    fn test_gas_schedule() {
        let schedule = GasSchedule::default();
        assert_eq!(schedule.charge(0, 0, false, false), 1000);
        assert_eq!(schedule.charge(10, 2048, false, false), 1012);
        assert_eq!(schedule.charge(0, 0, true, true), 2000);
        assert_eq!(schedule.charge(0, 1023, false, false), 1000);
        assert_eq!(schedule.charge(u64::MAX, u64::MAX, true, true), u64::MAX);
    }

    #[tokio::test]
    async fn test_execute_success_charges_gas() {
        let sandbox = Arc::new(MockSandbox::new());
        let executor = FunctionExecutor::new(sandbox.clone());
        let result = executor
            .execute("function main() {}", json!({"a": 1}), &ExecutionOptions::default())
            .await;

        assert!(result.is_success());
        assert_eq!(result.result, Some(json!({"echo": {"a": 1}})));
        // 1 MiB reported by the mock
        assert!(result.gas_used >= 1000 + 1024);
    }

    #[tokio::test]
    async fn test_execute_gas_limit_exceeded() {
        let executor = FunctionExecutor::new(Arc::new(MockSandbox::new()));
        let options = ExecutionOptions {
            gas_limit: Some(1500),
            ..ExecutionOptions::default()
        };
        let result = executor.execute("x", json!({}), &options).await;

        assert_eq!(result.status, ExecutionOutcome::Error);
        assert_eq!(result.error.as_deref(), Some("gas limit exceeded"));
    }

    #[tokio::test]
    async fn test_execute_unmetered() {
        let executor = FunctionExecutor::new(Arc::new(MockSandbox::new()));
        let options = ExecutionOptions {
            gas_limit: None,
            ..ExecutionOptions::default()
        };
        assert!(executor.execute("x", json!({}), &options).await.is_success());
    }

    #[tokio::test]
    async fn test_execute_sandbox_error() {
        let executor = FunctionExecutor::new(Arc::new(MockSandbox::failing()));
        let result = executor
            .execute("x", json!({}), &ExecutionOptions::default())
            .await;

        assert_eq!(result.status, ExecutionOutcome::Error);
        assert!(result.error.unwrap().starts_with("sandbox execution error:"));
        assert_eq!(result.gas_used, 1000);
    }

    #[tokio::test]
    async fn test_execute_code_error() {
        let executor = FunctionExecutor::new(Arc::new(MockSandbox::erroring("TypeError")));
        let result = executor
            .execute("x", json!({}), &ExecutionOptions::default())
            .await;
        assert_eq!(result.error.as_deref(), Some("TypeError"));
        assert!(result.result.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_timeout() {
        let executor = FunctionExecutor::new(Arc::new(MockSandbox::slow(10_000)));
        let options = ExecutionOptions {
            timeout: Duration::from_millis(100),
            ..ExecutionOptions::default()
        };
        let result = executor.execute("x", json!({}), &options).await;

        assert_eq!(result.status, ExecutionOutcome::Error);
        assert_eq!(
            result.error.as_deref(),
            Some("Execution timed out after 100ms")
        );
    }

    #[tokio::test]
    async fn test_capabilities_require_sandbox_permission() {
        let sandbox = Arc::new(MockSandbox::new());
        let executor = FunctionExecutor::new(sandbox.clone());
        let options = ExecutionOptions {
            network: true,
            gas_limit: None,
            ..ExecutionOptions::default()
        };
        executor.execute("x", json!({}), &options).await;

        // default sandbox config denies network
        assert!(!sandbox.inputs().await[0].limits.network);
    }
}
