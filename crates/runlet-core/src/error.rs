// Copyright (C) 2025 The runlet Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for runlet-core.

use runlet_compiler::CompileError;
use thiserror::Error;

use crate::config::ConfigError;
use crate::sandbox::SandboxError;

/// Result type using the core [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Control plane errors.
///
/// Structural and authorization failures are returned to the caller. Failures
/// inside an execution are recorded on the execution instead.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum Error {
    /// A function, version, execution, permission record or deployment is absent.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// What was looked up.
        kind: &'static str,
        /// The identifier that missed.
        id: String,
    },

    /// A function with the same owner and name already exists.
    #[error("function already exists: {id}")]
    AlreadyExists {
        /// The derived function ID.
        id: String,
    },

    /// The caller may not perform the operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The validator rejected the code.
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// Function code is larger than the configured maximum.
    #[error("function code size {size} exceeds maximum size of {max} bytes")]
    SizeExceeded {
        /// Submitted size in bytes.
        size: usize,
        /// Configured limit in bytes.
        max: usize,
    },

    /// Only `javascript` is accepted.
    #[error("unsupported runtime: {0}")]
    UnsupportedRuntime(String),

    /// The compiler rejected the code.
    #[error("compilation failed: {0}")]
    CompilationFailed(#[from] CompileError),

    /// A deployment test run did not succeed.
    #[error("test execution failed: {0}")]
    TestExecutionFailed(String),

    /// The sandbox backend failed.
    #[error("Sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for [`Error::NotFound`].
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::AlreadyExists { .. } => "ALREADY_EXISTS",
            Self::PermissionDenied(_) => "PERMISSION_DENIED",
            Self::ValidationFailed(_) => "VALIDATION_FAILED",
            Self::SizeExceeded { .. } => "SIZE_EXCEEDED",
            Self::UnsupportedRuntime(_) => "UNSUPPORTED_RUNTIME",
            Self::CompilationFailed(_) => "COMPILATION_FAILED",
            Self::TestExecutionFailed(_) => "TEST_EXECUTION_FAILED",
            Self::Sandbox(_) => "SANDBOX_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Other(_) => "INTERNAL_ERROR",
        }
    }
}
