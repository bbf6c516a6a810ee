// Copyright (C) 2025 The runlet Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runlet Core - function lifecycle and deployment orchestration
//!
//! This crate owns user-submitted functions from creation to invocation:
//! the registry with its permission model and version ledger, and the
//! deployment manager that runs validation, compilation, test execution and
//! activation as sagas with partial compensation.
//!
//! # Architecture
//!
//! ```text
//!                   ┌──────────────────────────┐
//!  deploy/update ──►│    DeploymentManager     │── audit records
//!  rollback         │  (deploy/update/rollback │
//!                   │        sagas)            │
//!                   └──┬─────────┬─────────┬───┘
//!                      │         │         │
//!                      ▼         ▼         ▼
//!               Validator   Compiler   FunctionExecutor ──► Sandbox
//!                      │                   ▲
//!                      ▼                   │
//!  invoke ────►┌──────────────────────────┐│
//!              │     FunctionRegistry     ├┘
//!              │ functions · permissions  │
//!              │ versions · executions    │
//!              └──────────────────────────┘
//! ```
//!
//! Invocations bypass the manager and go straight to the registry, which
//! checks permissions and dispatches to the sandbox through the gas-metered
//! [`FunctionExecutor`].
//!
//! # Function status
//!
//! | Status | Set by | Invocable |
//! |--------|--------|-----------|
//! | `deploying` | deploy with auto-activate | no |
//! | `updating` | update with auto-activate | no |
//! | `rollback` | rollback in progress | no |
//! | `active` | successful deploy, update or rollback | yes |
//! | `error` | failed validation or test run under auto-activate | no |
//! | `disabled` | deploy without auto-activate | no |

#![deny(missing_docs)]

/// Environment-driven configuration.
pub mod config;

/// Embeddable control plane wiring every component.
pub mod control_plane;

/// Deployment manager and its sagas.
pub mod deployment;

/// Error types.
pub mod error;

/// Per-execution state cells.
pub mod execution;

/// Gas-metered execution on top of a sandbox.
pub mod executor;

/// Background pruning of execution and deployment history.
pub mod history_pruner;

/// Domain types: functions, versions, executions, permissions.
pub mod models;

/// Function registry.
pub mod registry;

/// Saga runner.
pub mod saga;

/// Sandbox contract and mock backend.
pub mod sandbox;

/// Static code validation.
pub mod validator;

pub use config::{Config, ConfigError, HistoryConfig};
pub use control_plane::ControlPlane;
pub use deployment::{
    DeploymentError, DeploymentKind, DeploymentManager, DeploymentOptions, DeploymentResult,
    DeploymentStatus, FunctionCompiler,
};
pub use error::{Error, Result};
pub use executor::{ExecutionOptions, ExecutionResult, FunctionExecutor, GasSchedule};
pub use models::{
    ExecutionStatus, Function, FunctionExecution, FunctionInvocation, FunctionPermissions,
    FunctionStatus, FunctionUpdate, FunctionVersion, NewFunction, Principal,
};
pub use registry::FunctionRegistry;
pub use validator::{RuleValidator, ValidationReport, Validator};

pub use runlet_compiler;
