// Copyright (C) 2025 The runlet Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Saga steps for deploy, update and rollback.

use async_trait::async_trait;
use runlet_compiler::{CompilationResult, CompileEnvironment, CompileOptions};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use super::{DeploymentOptions, FunctionCompiler};
use crate::error::Error;
use crate::executor::{ExecutionOptions, ExecutionResult, FunctionExecutor};
use crate::models::{
    Function, FunctionPermissions, FunctionStatus, FunctionUpdate, FunctionVersion, NewFunction,
    Principal,
};
use crate::registry::FunctionRegistry;
use crate::saga::{Saga, SagaStep, StepError, StepOutcome, StepPolicy};
use crate::validator::{ValidationReport, Validator};

/// Collaborators shared by every step.
#[derive(Clone)]
pub(crate) struct Services {
    pub registry: Arc<FunctionRegistry>,
    pub compiler: Arc<dyn FunctionCompiler>,
    pub validator: Arc<dyn Validator>,
    pub executor: FunctionExecutor,
}

/// Artifacts collected for the audit record.
#[derive(Default)]
pub(crate) struct Outputs {
    pub function: Option<Function>,
    pub validation: Option<ValidationReport>,
    pub compilation: Option<CompilationResult>,
    pub test_execution: Option<ExecutionResult>,
}

impl Outputs {
    fn function(&self) -> Result<&Function, StepError> {
        self.function
            .as_ref()
            .ok_or_else(|| Error::Other("function not loaded".to_string()).into())
    }
}

pub(crate) struct DeployContext {
    pub services: Services,
    pub deployment_id: Uuid,
    pub owner: Principal,
    pub name: String,
    pub description: String,
    pub code: String,
    pub runtime: String,
    pub options: DeploymentOptions,
    /// Status persisted at the end of the saga.
    pub status: FunctionStatus,
    pub outputs: Outputs,
}

pub(crate) struct UpdateContext {
    pub services: Services,
    pub deployment_id: Uuid,
    pub function_id: String,
    pub updater: Principal,
    pub update: FunctionUpdate,
    pub options: DeploymentOptions,
    /// Snapshot taken before the patch, restored by compensation.
    pub previous: Option<Function>,
    /// Set when validation or the test run failed under auto-activate.
    pub withhold_activation: bool,
    pub outputs: Outputs,
}

pub(crate) struct RollbackContext {
    pub services: Services,
    pub function_id: String,
    pub version: u32,
    pub rollbacker: Principal,
    pub target: Option<FunctionVersion>,
    pub outputs: Outputs,
}

pub(crate) fn deploy_saga() -> Saga<DeployContext> {
    Saga::new("deploy")
        .step(CreateFunction)
        .step(ValidateCode)
        .step(CompileCode)
        .step(TestRun)
        .step(Activate)
        .step(ApplyPermissions)
        .step(PersistFunction)
}

pub(crate) fn update_saga() -> Saga<UpdateContext> {
    Saga::new("update")
        .step(LoadFunction)
        .step(ValidateUpdate)
        .step(ApplyPatch)
        .step(CompileUpdate)
        .step(TestUpdate)
        .step(ActivateUpdate)
        .step(ApplyUpdatePermissions)
        .step(PersistUpdateAttributes)
}

pub(crate) fn rollback_saga() -> Saga<RollbackContext> {
    Saga::new("rollback")
        .step(LoadVersion)
        .step(MarkRollback)
        .step(RestoreVersion)
        .step(Reactivate)
}

// Shared stage logic

fn validate(services: &Services, code: &str) -> (ValidationReport, Result<(), StepError>) {
    let report = services.validator.validate(code);
    let verdict = if report.valid {
        Ok(())
    } else {
        Err(StepError::new(
            format!("Validation failed with {} errors", report.error_count),
            Error::ValidationFailed(report.error_messages().join(", ")),
        ))
    };
    (report, verdict)
}

async fn compile(
    services: &Services,
    code: &str,
    explicit: Option<&CompileOptions>,
    status: FunctionStatus,
) -> Result<CompilationResult, StepError> {
    let options = explicit.cloned().unwrap_or_else(|| {
        let environment = if status == FunctionStatus::Active {
            CompileEnvironment::Prod
        } else {
            CompileEnvironment::Dev
        };
        CompileOptions::for_environment(environment)
    });

    match services.compiler.compile(code, &options).await {
        Ok(result) => Ok(result.as_ref().clone()),
        Err(err) => Err(StepError::new(
            format!("Compilation failed: {}", err),
            Error::CompilationFailed(err),
        )),
    }
}

async fn test_run(
    services: &Services,
    compiled: &str,
    function_id: &str,
    caller: &Principal,
    trace_id: String,
    timeout: Duration,
) -> (ExecutionResult, Result<(), StepError>) {
    let config = services.registry.config();
    let options = ExecutionOptions {
        timeout,
        memory_limit_bytes: config.max_memory_bytes,
        gas_limit: Some(config.test_gas_limit),
        function_id: Some(function_id.to_string()),
        caller: Some(caller.clone()),
        trace_id: Some(trace_id),
        network: config.enable_network,
        file_io: config.enable_file_io,
    };

    let result = services
        .executor
        .execute(compiled, json!({"_test": true}), &options)
        .await;

    let verdict = if result.is_success() {
        Ok(())
    } else {
        let error = result.error.clone().unwrap_or_default();
        Err(StepError::new(
            format!("Test execution failed: {}", error),
            Error::TestExecutionFailed(error),
        ))
    };
    (result, verdict)
}

async fn apply_permissions(
    services: &Services,
    function_id: &str,
    actor: &Principal,
    permissions: Option<&FunctionPermissions>,
) -> Result<StepOutcome, StepError> {
    let Some(permissions) = permissions else {
        return Ok(StepOutcome::Skipped);
    };
    services
        .registry
        .update_permissions(function_id, actor, permissions.clone())
        .await
        .map_err(|err| StepError::new(format!("Failed to set permissions: {}", err), err))?;
    Ok(StepOutcome::Completed)
}

// Deploy

struct CreateFunction;

#[async_trait]
impl SagaStep<DeployContext> for CreateFunction {
    fn name(&self) -> &'static str {
        "create_function"
    }

    fn policy(&self) -> StepPolicy {
        StepPolicy::Fatal
    }

    async fn execute(&self, ctx: &mut DeployContext) -> Result<StepOutcome, StepError> {
        let new = NewFunction::new(ctx.owner.clone(), ctx.name.clone(), ctx.code.clone())
            .description(ctx.description.clone())
            .runtime(ctx.runtime.clone())
            .status(ctx.status);

        let function = ctx
            .services
            .registry
            .register(new)
            .await
            .map_err(|err| StepError::new(format!("Failed to create function: {}", err), err))?;
        ctx.outputs.function = Some(function);
        Ok(StepOutcome::Completed)
    }
}

struct ValidateCode;

#[async_trait]
impl SagaStep<DeployContext> for ValidateCode {
    fn name(&self) -> &'static str {
        "validate_code"
    }

    fn policy(&self) -> StepPolicy {
        StepPolicy::BestEffort
    }

    async fn execute(&self, ctx: &mut DeployContext) -> Result<StepOutcome, StepError> {
        if !ctx.options.validate_code {
            return Ok(StepOutcome::Skipped);
        }

        let (report, verdict) = validate(&ctx.services, &ctx.code);
        ctx.outputs.validation = Some(report);
        if verdict.is_err() && ctx.options.auto_activate {
            ctx.status = FunctionStatus::Error;
        }
        verdict.map(|()| StepOutcome::Completed)
    }
}

struct CompileCode;

#[async_trait]
impl SagaStep<DeployContext> for CompileCode {
    fn name(&self) -> &'static str {
        "compile"
    }

    fn policy(&self) -> StepPolicy {
        StepPolicy::Fatal
    }

    async fn execute(&self, ctx: &mut DeployContext) -> Result<StepOutcome, StepError> {
        let result = compile(
            &ctx.services,
            &ctx.code,
            ctx.options.compile_options.as_ref(),
            ctx.status,
        )
        .await?;
        debug!(
            deployment_id = %ctx.deployment_id,
            code_hash = %result.code_hash,
            warnings = result.warning_count(),
            "Function compiled"
        );
        ctx.outputs.compilation = Some(result);
        Ok(StepOutcome::Completed)
    }
}

struct TestRun;

#[async_trait]
impl SagaStep<DeployContext> for TestRun {
    fn name(&self) -> &'static str {
        "test_run"
    }

    fn policy(&self) -> StepPolicy {
        StepPolicy::BestEffort
    }

    async fn execute(&self, ctx: &mut DeployContext) -> Result<StepOutcome, StepError> {
        if ctx.options.test_timeout.is_zero() {
            return Ok(StepOutcome::Skipped);
        }
        let Some(compiled) = ctx.outputs.compilation.as_ref().map(|c| c.compiled_code.clone())
        else {
            return Ok(StepOutcome::Skipped);
        };
        let function_id = ctx.outputs.function()?.id.clone();

        let (result, verdict) = test_run(
            &ctx.services,
            &compiled,
            &function_id,
            &ctx.owner,
            format!("test-{}", ctx.deployment_id),
            ctx.options.test_timeout,
        )
        .await;
        ctx.outputs.test_execution = Some(result);
        if verdict.is_err() && ctx.options.auto_activate {
            ctx.status = FunctionStatus::Error;
        }
        verdict.map(|()| StepOutcome::Completed)
    }
}

struct Activate;

#[async_trait]
impl SagaStep<DeployContext> for Activate {
    fn name(&self) -> &'static str {
        "activate"
    }

    fn policy(&self) -> StepPolicy {
        StepPolicy::BestEffort
    }

    async fn execute(&self, ctx: &mut DeployContext) -> Result<StepOutcome, StepError> {
        if ctx.options.auto_activate && ctx.status == FunctionStatus::Deploying {
            ctx.status = FunctionStatus::Active;
            return Ok(StepOutcome::Completed);
        }
        Ok(StepOutcome::Skipped)
    }
}

struct ApplyPermissions;

#[async_trait]
impl SagaStep<DeployContext> for ApplyPermissions {
    fn name(&self) -> &'static str {
        "apply_permissions"
    }

    fn policy(&self) -> StepPolicy {
        StepPolicy::BestEffort
    }

    async fn execute(&self, ctx: &mut DeployContext) -> Result<StepOutcome, StepError> {
        let function_id = ctx.outputs.function()?.id.clone();
        apply_permissions(
            &ctx.services,
            &function_id,
            &ctx.owner,
            ctx.options.permissions.as_ref(),
        )
        .await
    }
}

struct PersistFunction;

#[async_trait]
impl SagaStep<DeployContext> for PersistFunction {
    fn name(&self) -> &'static str {
        "persist"
    }

    fn policy(&self) -> StepPolicy {
        StepPolicy::BestEffort
    }

    async fn execute(&self, ctx: &mut DeployContext) -> Result<StepOutcome, StepError> {
        let function_id = ctx.outputs.function()?.id.clone();
        let update = FunctionUpdate {
            status: Some(ctx.status),
            triggers: ctx.options.triggers.clone(),
            metadata: ctx.options.metadata.clone(),
            ..FunctionUpdate::default()
        };

        let function = ctx
            .services
            .registry
            .update_function(&function_id, &ctx.owner, update)
            .await
            .map_err(|err| StepError::new(format!("Failed to update function: {}", err), err))?;
        ctx.outputs.function = Some(function);
        Ok(StepOutcome::Completed)
    }
}

// Update

struct LoadFunction;

#[async_trait]
impl SagaStep<UpdateContext> for LoadFunction {
    fn name(&self) -> &'static str {
        "load_function"
    }

    fn policy(&self) -> StepPolicy {
        StepPolicy::Fatal
    }

    async fn execute(&self, ctx: &mut UpdateContext) -> Result<StepOutcome, StepError> {
        let function = ctx
            .services
            .registry
            .get_function(&ctx.function_id)
            .await
            .map_err(|err| StepError::new(format!("Failed to get function: {}", err), err))?;
        ctx.previous = Some(function.clone());
        ctx.outputs.function = Some(function);
        Ok(StepOutcome::Completed)
    }
}

struct ValidateUpdate;

#[async_trait]
impl SagaStep<UpdateContext> for ValidateUpdate {
    fn name(&self) -> &'static str {
        "validate_code"
    }

    fn policy(&self) -> StepPolicy {
        StepPolicy::BestEffort
    }

    async fn execute(&self, ctx: &mut UpdateContext) -> Result<StepOutcome, StepError> {
        let Some(code) = ctx.update.code.as_deref() else {
            return Ok(StepOutcome::Skipped);
        };
        if !ctx.options.validate_code {
            return Ok(StepOutcome::Skipped);
        }

        let (report, verdict) = validate(&ctx.services, code);
        ctx.outputs.validation = Some(report);
        if verdict.is_err() && ctx.options.auto_activate {
            ctx.withhold_activation = true;
        }
        verdict.map(|()| StepOutcome::Completed)
    }
}

struct ApplyPatch;

#[async_trait]
impl SagaStep<UpdateContext> for ApplyPatch {
    fn name(&self) -> &'static str {
        "apply_update"
    }

    fn policy(&self) -> StepPolicy {
        StepPolicy::Fatal
    }

    async fn execute(&self, ctx: &mut UpdateContext) -> Result<StepOutcome, StepError> {
        let mut patch = ctx.update.clone();
        if ctx.options.auto_activate {
            patch.status = Some(FunctionStatus::Updating);
        }

        let function = ctx
            .services
            .registry
            .update_function(&ctx.function_id, &ctx.updater, patch)
            .await
            .map_err(|err| StepError::new(format!("Failed to update function: {}", err), err))?;
        ctx.outputs.function = Some(function);
        Ok(StepOutcome::Completed)
    }

    fn has_compensation(&self) -> bool {
        true
    }

    async fn compensate(&self, ctx: &mut UpdateContext) -> Result<(), StepError> {
        let Some(previous) = ctx.previous.as_ref() else {
            return Err(Error::Other("no snapshot to restore".to_string()).into());
        };
        let restore = FunctionUpdate::new()
            .code(previous.code.clone())
            .status(previous.status);

        let function = ctx
            .services
            .registry
            .update_function(&ctx.function_id, &ctx.updater, restore)
            .await?;
        ctx.outputs.function = Some(function);
        Ok(())
    }
}

struct CompileUpdate;

#[async_trait]
impl SagaStep<UpdateContext> for CompileUpdate {
    fn name(&self) -> &'static str {
        "compile"
    }

    fn policy(&self) -> StepPolicy {
        StepPolicy::Fatal
    }

    async fn execute(&self, ctx: &mut UpdateContext) -> Result<StepOutcome, StepError> {
        if ctx.update.code.is_none() {
            return Ok(StepOutcome::Skipped);
        }
        let function = ctx.outputs.function()?;
        let result = compile(
            &ctx.services,
            &function.code,
            ctx.options.compile_options.as_ref(),
            function.status,
        )
        .await?;
        ctx.outputs.compilation = Some(result);
        Ok(StepOutcome::Completed)
    }
}

struct TestUpdate;

#[async_trait]
impl SagaStep<UpdateContext> for TestUpdate {
    fn name(&self) -> &'static str {
        "test_run"
    }

    fn policy(&self) -> StepPolicy {
        StepPolicy::BestEffort
    }

    async fn execute(&self, ctx: &mut UpdateContext) -> Result<StepOutcome, StepError> {
        if ctx.update.code.is_none() || ctx.options.test_timeout.is_zero() {
            return Ok(StepOutcome::Skipped);
        }
        let Some(compiled) = ctx.outputs.compilation.as_ref().map(|c| c.compiled_code.clone())
        else {
            return Ok(StepOutcome::Skipped);
        };

        let (result, verdict) = test_run(
            &ctx.services,
            &compiled,
            &ctx.function_id,
            &ctx.updater,
            format!("update-test-{}", ctx.deployment_id),
            ctx.options.test_timeout,
        )
        .await;
        ctx.outputs.test_execution = Some(result);
        if verdict.is_err() && ctx.options.auto_activate {
            ctx.withhold_activation = true;
        }
        verdict.map(|()| StepOutcome::Completed)
    }
}

struct ActivateUpdate;

#[async_trait]
impl SagaStep<UpdateContext> for ActivateUpdate {
    fn name(&self) -> &'static str {
        "activate"
    }

    fn policy(&self) -> StepPolicy {
        StepPolicy::BestEffort
    }

    async fn execute(&self, ctx: &mut UpdateContext) -> Result<StepOutcome, StepError> {
        if !ctx.options.auto_activate || ctx.outputs.function()?.status != FunctionStatus::Updating
        {
            return Ok(StepOutcome::Skipped);
        }

        let status = if ctx.withhold_activation {
            FunctionStatus::Error
        } else {
            FunctionStatus::Active
        };
        let function = ctx
            .services
            .registry
            .update_function(&ctx.function_id, &ctx.updater, FunctionUpdate::new().status(status))
            .await
            .map_err(|err| StepError::new(format!("Failed to update status: {}", err), err))?;
        ctx.outputs.function = Some(function);
        Ok(StepOutcome::Completed)
    }
}

struct ApplyUpdatePermissions;

#[async_trait]
impl SagaStep<UpdateContext> for ApplyUpdatePermissions {
    fn name(&self) -> &'static str {
        "apply_permissions"
    }

    fn policy(&self) -> StepPolicy {
        StepPolicy::BestEffort
    }

    async fn execute(&self, ctx: &mut UpdateContext) -> Result<StepOutcome, StepError> {
        apply_permissions(
            &ctx.services,
            &ctx.function_id,
            &ctx.updater,
            ctx.options.permissions.as_ref(),
        )
        .await
    }
}

struct PersistUpdateAttributes;

#[async_trait]
impl SagaStep<UpdateContext> for PersistUpdateAttributes {
    fn name(&self) -> &'static str {
        "persist"
    }

    fn policy(&self) -> StepPolicy {
        StepPolicy::BestEffort
    }

    async fn execute(&self, ctx: &mut UpdateContext) -> Result<StepOutcome, StepError> {
        if ctx.options.triggers.is_none() && ctx.options.metadata.is_none() {
            return Ok(StepOutcome::Skipped);
        }
        let update = FunctionUpdate {
            triggers: ctx.options.triggers.clone(),
            metadata: ctx.options.metadata.clone(),
            ..FunctionUpdate::default()
        };

        let function = ctx
            .services
            .registry
            .update_function(&ctx.function_id, &ctx.updater, update)
            .await
            .map_err(|err| StepError::new(format!("Failed to update function: {}", err), err))?;
        ctx.outputs.function = Some(function);
        Ok(StepOutcome::Completed)
    }
}

// Rollback

struct LoadVersion;

#[async_trait]
impl SagaStep<RollbackContext> for LoadVersion {
    fn name(&self) -> &'static str {
        "load_version"
    }

    fn policy(&self) -> StepPolicy {
        StepPolicy::Fatal
    }

    async fn execute(&self, ctx: &mut RollbackContext) -> Result<StepOutcome, StepError> {
        let registry = &ctx.services.registry;
        let function = registry
            .get_function(&ctx.function_id)
            .await
            .map_err(|err| StepError::new(format!("Failed to get function: {}", err), err))?;
        ctx.outputs.function = Some(function);

        let target = registry
            .get_function_version(&ctx.function_id, ctx.version)
            .await
            .map_err(|err| {
                StepError::new(
                    format!("Failed to get version {}: {}", ctx.version, err),
                    err,
                )
            })?;
        ctx.target = Some(target);
        Ok(StepOutcome::Completed)
    }
}

async fn set_status(ctx: &mut RollbackContext, status: FunctionStatus) -> Result<(), StepError> {
    let function = ctx
        .services
        .registry
        .update_function(&ctx.function_id, &ctx.rollbacker, FunctionUpdate::new().status(status))
        .await
        .map_err(|err| StepError::new(format!("Failed to update function status: {}", err), err))?;
    ctx.outputs.function = Some(function);
    Ok(())
}

struct MarkRollback;

#[async_trait]
impl SagaStep<RollbackContext> for MarkRollback {
    fn name(&self) -> &'static str {
        "mark_rollback"
    }

    fn policy(&self) -> StepPolicy {
        StepPolicy::Fatal
    }

    async fn execute(&self, ctx: &mut RollbackContext) -> Result<StepOutcome, StepError> {
        set_status(ctx, FunctionStatus::Rollback).await?;
        Ok(StepOutcome::Completed)
    }
}

struct RestoreVersion;

#[async_trait]
impl SagaStep<RollbackContext> for RestoreVersion {
    fn name(&self) -> &'static str {
        "restore_version"
    }

    fn policy(&self) -> StepPolicy {
        StepPolicy::Fatal
    }

    async fn execute(&self, ctx: &mut RollbackContext) -> Result<StepOutcome, StepError> {
        let Some(target) = ctx.target.as_ref() else {
            return Err(Error::not_found("version", ctx.version.to_string()).into());
        };
        let restore = FunctionUpdate::new()
            .code(target.code.clone())
            .description(format!(
                "{} (Rolled back to v{})",
                target.description, target.version
            ));

        let function = ctx
            .services
            .registry
            .update_function(&ctx.function_id, &ctx.rollbacker, restore)
            .await
            .map_err(|err| {
                StepError::new(format!("Failed to update function code: {}", err), err)
            })?;
        ctx.outputs.function = Some(function);
        Ok(StepOutcome::Completed)
    }
}

struct Reactivate;

#[async_trait]
impl SagaStep<RollbackContext> for Reactivate {
    fn name(&self) -> &'static str {
        "reactivate"
    }

    fn policy(&self) -> StepPolicy {
        StepPolicy::Fatal
    }

    async fn execute(&self, ctx: &mut RollbackContext) -> Result<StepOutcome, StepError> {
        set_status(ctx, FunctionStatus::Active).await?;
        Ok(StepOutcome::Completed)
    }
}
