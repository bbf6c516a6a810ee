// Copyright (C) 2025 The runlet Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deployment manager.
//!
//! Deploy, update and rollback run as [`Saga`](crate::saga::Saga)s over the
//! registry, compiler, validator and executor:
//!
//! | Operation | Fatal steps | Best-effort steps | Compensation |
//! |-----------|-------------|-------------------|--------------|
//! | deploy | create, compile | validate, test run, activate, permissions, persist | none |
//! | update | load, apply patch, compile | validate, test run, activate, permissions, persist | restore code and status |
//! | rollback | every step | none | none |
//!
//! Best-effort failures are joined with `"; "` into the message of the
//! [`DeploymentResult`]. A fatal failure returns a [`DeploymentError`] that
//! carries the same audit record. Every record is kept in the manager until
//! pruned by [`DeploymentManager::clear_deployment_history`].

mod steps;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use runlet_compiler::{CompilationResult, CompileError, CompileOptions, Compiler};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::executor::{ExecutionResult, FunctionExecutor};
use crate::models::{
    Function, FunctionPermissions, FunctionStatus, FunctionUpdate, Metadata, Principal,
};
use crate::registry::FunctionRegistry;
use crate::saga::{Saga, SagaReport, SagaRun, StepError};
use crate::validator::{RuleValidator, ValidationReport, Validator};
use steps::{
    DeployContext, Outputs, RollbackContext, Services, UpdateContext, deploy_saga,
    rollback_saga, update_saga,
};

/// Compilation backend used by deploy and update.
#[async_trait]
pub trait FunctionCompiler: Send + Sync {
    /// Compile `code` with `options`.
    async fn compile(
        &self,
        code: &str,
        options: &CompileOptions,
    ) -> std::result::Result<Arc<CompilationResult>, CompileError>;
}

#[async_trait]
impl FunctionCompiler for Compiler {
    async fn compile(
        &self,
        code: &str,
        options: &CompileOptions,
    ) -> std::result::Result<Arc<CompilationResult>, CompileError> {
        Compiler::compile(self, code, Some(options))
    }
}

/// Options for deploy and update.
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentOptions {
    /// Promote the function to `Active` when every stage succeeds.
    pub auto_activate: bool,
    /// Run the validator on new code.
    pub validate_code: bool,
    /// Permission record to install.
    pub permissions: Option<FunctionPermissions>,
    /// Trigger IDs to associate.
    pub triggers: Option<Vec<String>>,
    /// Metadata to store.
    pub metadata: Option<Metadata>,
    /// Compiler options; environment presets are used when absent.
    pub compile_options: Option<CompileOptions>,
    /// Time limit of the test run. Zero skips the test run.
    pub test_timeout: Duration,
}

impl Default for DeploymentOptions {
    fn default() -> Self {
        Self {
            auto_activate: true,
            validate_code: true,
            permissions: None,
            triggers: None,
            metadata: None,
            compile_options: None,
            test_timeout: Duration::ZERO,
        }
    }
}

impl DeploymentOptions {
    /// Set the test-run time limit.
    pub fn with_test_timeout(mut self, timeout: Duration) -> Self {
        self.test_timeout = timeout;
        self
    }

    /// Set the permission record to install.
    pub fn with_permissions(mut self, permissions: FunctionPermissions) -> Self {
        self.permissions = Some(permissions);
        self
    }

    /// Set explicit compiler options.
    pub fn with_compile_options(mut self, options: CompileOptions) -> Self {
        self.compile_options = Some(options);
        self
    }
}

/// Operation recorded by a [`DeploymentResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentKind {
    /// New function.
    Deploy,
    /// Change to an existing function.
    Update,
    /// Restore of an earlier version.
    Rollback,
}

impl DeploymentKind {
    /// Returns the string representation of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deploy => "deploy",
            Self::Update => "update",
            Self::Rollback => "rollback",
        }
    }
}

impl std::fmt::Display for DeploymentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final status of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    /// No fatal step failed.
    Completed,
    /// A fatal step failed.
    Failed,
}

impl DeploymentStatus {
    /// Returns the string representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Audit record of one deploy, update or rollback.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentResult {
    /// Deployment ID.
    pub id: Uuid,
    /// Operation.
    pub kind: DeploymentKind,
    /// Latest known state of the function.
    pub function: Option<Function>,
    /// Validator report, if validation ran.
    pub validation: Option<ValidationReport>,
    /// Compilation result, if compilation succeeded.
    pub compilation: Option<CompilationResult>,
    /// Test-run result, if a test run happened.
    pub test_execution: Option<ExecutionResult>,
    /// Final status.
    pub status: DeploymentStatus,
    /// Accumulated messages, `"; "` separated.
    pub message: String,
    /// When the operation started.
    pub deployed_at: DateTime<Utc>,
    /// Acting principal.
    pub deployed_by: Principal,
    /// Step trace.
    pub saga: SagaReport,
}

impl DeploymentResult {
    /// True if the deployment completed.
    pub fn is_completed(&self) -> bool {
        self.status == DeploymentStatus::Completed
    }
}

/// A fatal deployment failure.
#[derive(Debug, Clone, Error)]
#[error("{} failed: {}", .result.kind, .result.message)]
pub struct DeploymentError {
    /// Audit record, with status `failed`.
    pub result: Box<DeploymentResult>,
    /// Error of the fatal step.
    #[source]
    pub source: Error,
}

/// Orchestrates deploy, update and rollback on top of the registry.
pub struct DeploymentManager {
    services: Services,
    deploy: Saga<DeployContext>,
    update: Saga<UpdateContext>,
    rollback: Saga<RollbackContext>,
    deployments: RwLock<HashMap<Uuid, DeploymentResult>>,
}

impl DeploymentManager {
    /// Manager with a fresh compiler, the built-in validator and the
    /// registry's executor.
    pub fn new(registry: Arc<FunctionRegistry>) -> Self {
        let executor = registry.executor().clone();
        Self {
            services: Services {
                registry,
                compiler: Arc::new(Compiler::new()),
                validator: Arc::new(RuleValidator::new()),
                executor,
            },
            deploy: deploy_saga(),
            update: update_saga(),
            rollback: rollback_saga(),
            deployments: RwLock::new(HashMap::new()),
        }
    }

    /// Use a shared or custom compiler.
    pub fn with_compiler(mut self, compiler: Arc<dyn FunctionCompiler>) -> Self {
        self.services.compiler = compiler;
        self
    }

    /// Use a different validator.
    pub fn with_validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.services.validator = validator;
        self
    }

    /// Use a different executor for test runs.
    pub fn with_executor(mut self, executor: FunctionExecutor) -> Self {
        self.services.executor = executor;
        self
    }

    /// The underlying registry.
    pub fn registry(&self) -> &Arc<FunctionRegistry> {
        &self.services.registry
    }

    /// The compiler.
    pub fn compiler(&self) -> &Arc<dyn FunctionCompiler> {
        &self.services.compiler
    }

    /// Create, validate, compile, test and activate a new function.
    pub async fn deploy_function(
        &self,
        owner: &Principal,
        name: &str,
        description: &str,
        code: &str,
        runtime: &str,
        options: DeploymentOptions,
    ) -> std::result::Result<DeploymentResult, DeploymentError> {
        let deployment_id = Uuid::new_v4();
        let deployed_at = Utc::now();
        let status = if options.auto_activate {
            FunctionStatus::Deploying
        } else {
            FunctionStatus::Disabled
        };
        info!(deployment_id = %deployment_id, owner = %owner, name, "Deploying function");

        let mut ctx = DeployContext {
            services: self.services.clone(),
            deployment_id,
            owner: owner.clone(),
            name: name.to_string(),
            description: description.to_string(),
            code: code.to_string(),
            runtime: runtime.to_string(),
            options,
            status,
            outputs: Outputs::default(),
        };
        let run = self.deploy.run(&mut ctx).await;

        self.finish(
            Record {
                id: deployment_id,
                kind: DeploymentKind::Deploy,
                deployed_at,
                deployed_by: owner.clone(),
                success_message: "Function deployed successfully".to_string(),
            },
            ctx.outputs,
            run,
        )
        .await
    }

    /// Apply `update`, recompiling and retesting changed code.
    ///
    /// A compilation failure restores the previous code and status.
    pub async fn update_function(
        &self,
        function_id: &str,
        updater: &Principal,
        update: FunctionUpdate,
        options: DeploymentOptions,
    ) -> std::result::Result<DeploymentResult, DeploymentError> {
        let deployment_id = Uuid::new_v4();
        let deployed_at = Utc::now();
        info!(
            deployment_id = %deployment_id,
            function_id = %function_id,
            updated_by = %updater,
            code_changed = update.code.is_some(),
            "Updating function"
        );

        let mut ctx = UpdateContext {
            services: self.services.clone(),
            deployment_id,
            function_id: function_id.to_string(),
            updater: updater.clone(),
            update,
            options,
            previous: None,
            withhold_activation: false,
            outputs: Outputs::default(),
        };
        let run = self.update.run(&mut ctx).await;

        self.finish(
            Record {
                id: deployment_id,
                kind: DeploymentKind::Update,
                deployed_at,
                deployed_by: updater.clone(),
                success_message: "Function updated successfully".to_string(),
            },
            ctx.outputs,
            run,
        )
        .await
    }

    /// Restore the code of `version` as a new version and reactivate.
    pub async fn rollback_function(
        &self,
        function_id: &str,
        version: u32,
        rollbacker: &Principal,
    ) -> std::result::Result<DeploymentResult, DeploymentError> {
        let deployment_id = Uuid::new_v4();
        let deployed_at = Utc::now();
        info!(
            deployment_id = %deployment_id,
            function_id = %function_id,
            version,
            "Rolling back function"
        );

        let mut ctx = RollbackContext {
            services: self.services.clone(),
            function_id: function_id.to_string(),
            version,
            rollbacker: rollbacker.clone(),
            target: None,
            outputs: Outputs::default(),
        };
        let run = self.rollback.run(&mut ctx).await;

        self.finish(
            Record {
                id: deployment_id,
                kind: DeploymentKind::Rollback,
                deployed_at,
                deployed_by: rollbacker.clone(),
                success_message: format!("Successfully rolled back to version {}", version),
            },
            ctx.outputs,
            run,
        )
        .await
    }

    /// Delete a function through the registry.
    pub async fn delete_function(&self, function_id: &str, deleter: &Principal) -> Result<()> {
        self.services
            .registry
            .delete_function(function_id, deleter)
            .await
    }

    /// Audit record of a deployment.
    pub async fn get_deployment(&self, deployment_id: &Uuid) -> Option<DeploymentResult> {
        self.deployments.read().await.get(deployment_id).cloned()
    }

    /// Every retained audit record, most recent first.
    pub async fn list_deployments(&self) -> Vec<DeploymentResult> {
        let mut deployments: Vec<DeploymentResult> =
            self.deployments.read().await.values().cloned().collect();
        deployments.sort_by(|a, b| b.deployed_at.cmp(&a.deployed_at).then_with(|| a.id.cmp(&b.id)));
        deployments
    }

    /// Drop audit records older than `max_age`. Returns the number removed.
    pub async fn clear_deployment_history(&self, max_age: Duration) -> usize {
        let Some(cutoff) = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return 0;
        };

        let mut deployments = self.deployments.write().await;
        let before = deployments.len();
        deployments.retain(|_, deployment| deployment.deployed_at >= cutoff);
        let removed = before - deployments.len();

        if removed > 0 {
            info!(removed, "Cleared deployment history");
        }
        removed
    }

    async fn finish(
        &self,
        record: Record,
        outputs: Outputs,
        run: SagaRun,
    ) -> std::result::Result<DeploymentResult, DeploymentError> {
        let SagaRun { report, error } = run;
        let message = compose_message(&report, error.as_ref(), &record.success_message);
        let result = DeploymentResult {
            id: record.id,
            kind: record.kind,
            function: outputs.function,
            validation: outputs.validation,
            compilation: outputs.compilation,
            test_execution: outputs.test_execution,
            status: if error.is_some() {
                DeploymentStatus::Failed
            } else {
                DeploymentStatus::Completed
            },
            message,
            deployed_at: record.deployed_at,
            deployed_by: record.deployed_by,
            saga: report,
        };

        self.deployments
            .write()
            .await
            .insert(result.id, result.clone());

        let function_id = result.function.as_ref().map(|f| f.id.as_str()).unwrap_or_default();
        match error {
            None => {
                info!(
                    deployment_id = %result.id,
                    kind = %result.kind,
                    function_id = %function_id,
                    message = %result.message,
                    "Deployment completed"
                );
                Ok(result)
            }
            Some(err) => {
                warn!(
                    deployment_id = %result.id,
                    kind = %result.kind,
                    function_id = %function_id,
                    message = %result.message,
                    "Deployment failed"
                );
                Err(DeploymentError {
                    result: Box::new(result),
                    source: err.cause,
                })
            }
        }
    }
}

struct Record {
    id: Uuid,
    kind: DeploymentKind,
    deployed_at: DateTime<Utc>,
    deployed_by: Principal,
    success_message: String,
}

/// Join best-effort failures, the fatal failure and the compensation outcome.
fn compose_message(report: &SagaReport, fatal: Option<&StepError>, success: &str) -> String {
    let mut parts = report.warnings.clone();

    if let Some(fatal) = fatal {
        parts.push(fatal.message.clone());
        if !report.compensation_errors.is_empty() {
            parts.extend(
                report
                    .compensation_errors
                    .iter()
                    .map(|err| format!("Rollback failed: {}", err)),
            );
        } else if report.compensated() > 0 {
            parts.push("Rolled back to previous version".to_string());
        }
    }

    if parts.is_empty() {
        success.to_string()
    } else {
        parts.join("; ")
    }
}
