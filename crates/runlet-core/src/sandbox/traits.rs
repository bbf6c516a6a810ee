// Copyright (C) 2025 The runlet Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Sandbox trait definitions.
//!
//! Defines the abstract interface for code execution backends.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::config::Config;

/// Errors from sandbox operations.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum SandboxError {
    /// The code raised or the engine failed.
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    /// The run exceeded its time limit.
    #[error("Execution timed out after {timeout_ms}ms")]
    Timeout {
        /// The limit that was hit.
        timeout_ms: u64,
    },

    /// The run exceeded a resource limit other than time.
    #[error("Resource limit exceeded: {0}")]
    ResourceLimit(String),

    /// The backend could not accept work.
    #[error("Sandbox unavailable: {0}")]
    Unavailable(String),
}

/// Result type for sandbox operations.
pub type Result<T> = std::result::Result<T, SandboxError>;

/// Limits a sandbox is created with. Per-call limits never exceed these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxConfig {
    /// Memory ceiling in bytes.
    pub memory_limit_bytes: u64,
    /// Time ceiling.
    pub timeout: Duration,
    /// Whether code may use the network.
    pub allow_network: bool,
    /// Whether code may touch the filesystem.
    pub allow_file_io: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl SandboxConfig {
    /// Derive sandbox limits from the control plane configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            memory_limit_bytes: config.max_memory_bytes,
            timeout: config.max_execution_time,
            allow_network: config.enable_network,
            allow_file_io: config.enable_file_io,
        }
    }
}

/// Limits for a single run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Memory ceiling in bytes.
    pub memory_limit_bytes: u64,
    /// Time ceiling.
    pub timeout: Duration,
    /// Network access granted.
    pub network: bool,
    /// Filesystem access granted.
    pub file_io: bool,
}

impl ResourceLimits {
    /// Tighten these limits to what `config` permits.
    pub fn clamp_to(self, config: &SandboxConfig) -> Self {
        Self {
            memory_limit_bytes: self.memory_limit_bytes.min(config.memory_limit_bytes),
            timeout: self.timeout.min(config.timeout),
            network: self.network && config.allow_network,
            file_io: self.file_io && config.allow_file_io,
        }
    }
}

/// Input for one sandbox run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxInput {
    /// Artifact to run.
    pub code: String,
    /// Arguments passed to `main`.
    pub args: Value,
    /// Execution context (function ID, caller, trace ID).
    pub parameters: Value,
    /// Limits for this run.
    pub limits: ResourceLimits,
}

/// Output of one sandbox run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SandboxOutput {
    /// Value returned by `main`.
    pub result: Option<Value>,
    /// Captured log lines.
    pub logs: Vec<String>,
    /// Wall time in milliseconds.
    pub duration_ms: u64,
    /// Peak memory in bytes.
    pub memory_used_bytes: u64,
    /// Error raised by the code, if any.
    pub error: Option<String>,
}

/// Execution backend.
///
/// Implementations must be safe to call concurrently.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Backend name for logs.
    fn sandbox_type(&self) -> &'static str;

    /// Limits the sandbox was created with.
    fn config(&self) -> &SandboxConfig;

    /// Run `input.code` to completion.
    ///
    /// An `Err` means the backend failed. Errors raised by the code itself are
    /// reported through [`SandboxOutput::error`].
    async fn execute(&self, input: &SandboxInput) -> Result<SandboxOutput>;
}
