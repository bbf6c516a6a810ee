// Copyright (C) 2025 The runlet Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock sandbox for testing.
//!
//! Does not run code. Echoes the arguments back as the result and records
//! every input it receives.

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

use super::traits::*;

/// Mock sandbox for testing.
pub struct MockSandbox {
    config: SandboxConfig,
    calls: AtomicUsize,
    inputs: Mutex<Vec<SandboxInput>>,
    /// Optional delay to simulate execution time (in milliseconds)
    pub execution_delay_ms: u64,
    /// If true, every run fails with a backend error
    pub fail_by_default: bool,
    /// If set, every run completes with this code-level error
    pub code_error: Option<String>,
    /// Memory usage reported for every run
    pub memory_used_bytes: u64,
}

impl Default for MockSandbox {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSandbox {
    /// Create a new mock sandbox.
    pub fn new() -> Self {
        Self::with_config(SandboxConfig::default())
    }

    /// Create a mock sandbox with explicit limits.
    pub fn with_config(config: SandboxConfig) -> Self {
        Self {
            config,
            calls: AtomicUsize::new(0),
            inputs: Mutex::new(Vec::new()),
            execution_delay_ms: 0,
            fail_by_default: false,
            code_error: None,
            memory_used_bytes: 1024 * 1024,
        }
    }

    /// Create a mock sandbox whose runs fail with a backend error.
    pub fn failing() -> Self {
        Self {
            fail_by_default: true,
            ..Self::new()
        }
    }

    /// Create a mock sandbox whose runs report a code-level error.
    pub fn erroring(message: impl Into<String>) -> Self {
        Self {
            code_error: Some(message.into()),
            ..Self::new()
        }
    }

    /// Create a mock sandbox that takes `delay_ms` per run.
    pub fn slow(delay_ms: u64) -> Self {
        Self {
            execution_delay_ms: delay_ms,
            ..Self::new()
        }
    }

    /// Number of runs started.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Inputs received so far, oldest first.
    pub async fn inputs(&self) -> Vec<SandboxInput> {
        self.inputs.lock().await.clone()
    }
}

#[async_trait]
impl Sandbox for MockSandbox {
    fn sandbox_type(&self) -> &'static str {
        "mock"
    }

    fn config(&self) -> &SandboxConfig {
        &self.config
    }

    async fn execute(&self, input: &SandboxInput) -> Result<SandboxOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inputs.lock().await.push(input.clone());

        let start = std::time::Instant::now();

        // Simulate execution
        if self.execution_delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.execution_delay_ms)).await;
        }

        if self.fail_by_default {
            return Err(SandboxError::ExecutionFailed(
                "mock sandbox configured to fail".to_string(),
            ));
        }

        if self.memory_used_bytes > input.limits.memory_limit_bytes {
            return Err(SandboxError::ResourceLimit(format!(
                "memory usage {} exceeds limit {}",
                self.memory_used_bytes, input.limits.memory_limit_bytes
            )));
        }

        Ok(SandboxOutput {
            result: Some(json!({ "echo": input.args })),
            logs: vec![format!("mock run of {} bytes", input.code.len())],
            duration_ms: start.elapsed().as_millis() as u64,
            memory_used_bytes: self.memory_used_bytes,
            error: self.code_error.clone(),
        })
    }
}
