// Copyright (C) 2025 The runlet Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Integration tests for deploy, update and rollback sagas.

mod common;

use async_trait::async_trait;
use common::*;
use runlet_core::runlet_compiler::{
    CompilationResult, CompileEnvironment, CompileError, CompileOptions, Compiler,
};
use runlet_core::saga::CompensationState;
use runlet_core::sandbox::MockSandbox;
use runlet_core::{
    Config, DeploymentKind, DeploymentManager, DeploymentOptions, DeploymentStatus, Error,
    FunctionCompiler, FunctionInvocation, FunctionPermissions, FunctionRegistry, FunctionStatus,
    FunctionUpdate,
};
use serde_json::{Map, json};
use std::sync::Arc;
use std::time::Duration;

/// Deletes the function it is compiling for, then rejects the source.
struct DeletingCompiler {
    registry: Arc<FunctionRegistry>,
    function_id: String,
}

#[async_trait]
impl FunctionCompiler for DeletingCompiler {
    async fn compile(
        &self,
        _code: &str,
        _options: &CompileOptions,
    ) -> Result<Arc<CompilationResult>, CompileError> {
        self.registry
            .delete_function(&self.function_id, &owner())
            .await
            .expect("Failed to delete function");
        Err(CompileError::EmptySource)
    }
}

#[tokio::test]
async fn test_deploy_with_failed_validation_completes_in_error() {
    let ctx = TestContext::new();

    let result = ctx
        .manager
        .deploy_function(&owner(), "calc", "", UNSAFE_CODE, "", DeploymentOptions::default())
        .await
        .unwrap();

    assert_eq!(result.status, DeploymentStatus::Completed);
    assert_eq!(result.message, "Validation failed with 1 errors");
    let validation = result.validation.as_ref().unwrap();
    assert!(!validation.valid);
    assert_eq!(validation.violations[0].rule_id, "SEC001");

    let function = ctx.registry.get_function(&result.function.unwrap().id).await.unwrap();
    assert_eq!(function.status, FunctionStatus::Error);
}

#[tokio::test]
async fn test_deploy_without_validation_activates_unsafe_code() {
    let ctx = TestContext::new();
    let options = DeploymentOptions {
        validate_code: false,
        ..DeploymentOptions::default()
    };

    let result = ctx
        .manager
        .deploy_function(&owner(), "calc", "", UNSAFE_CODE, "", options)
        .await
        .unwrap();

    assert!(result.validation.is_none());
    assert_eq!(result.function.unwrap().status, FunctionStatus::Active);
}

#[tokio::test]
async fn test_deploy_compile_failure_is_fatal() {
    let ctx = TestContext::new();

    let err = ctx
        .manager
        .deploy_function(&owner(), "broken", "", BROKEN_CODE, "", DeploymentOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.result.status, DeploymentStatus::Failed);
    assert!(err.result.message.starts_with("Compilation failed:"));
    assert!(matches!(err.source, Error::CompilationFailed(_)));
    assert_eq!(err.result.saga.aborted_at, Some("compile"));

    // No compensation on deploy: the function stays behind, never activated.
    let function_id = err.result.function.as_ref().unwrap().id.clone();
    let function = ctx.registry.get_function(&function_id).await.unwrap();
    assert_eq!(function.status, FunctionStatus::Deploying);

    let stored = ctx.manager.get_deployment(&err.result.id).await.unwrap();
    assert_eq!(stored.status, DeploymentStatus::Failed);
}

#[tokio::test]
async fn test_deploy_runs_compiled_artifact_as_test() {
    let ctx = TestContext::new();
    let options = DeploymentOptions::default()
        .with_test_timeout(Duration::from_secs(1))
        .with_compile_options(CompileOptions::for_environment(CompileEnvironment::Prod));

    let result = ctx
        .manager
        .deploy_function(&owner(), "calc", "", VALID_CODE, "", options)
        .await
        .unwrap();

    assert_eq!(result.message, "Function deployed successfully");
    assert!(result.test_execution.as_ref().unwrap().is_success());
    assert_eq!(result.function.as_ref().unwrap().status, FunctionStatus::Active);

    let inputs = ctx.sandbox.inputs().await;
    assert_eq!(inputs.len(), 1);
    assert_eq!(inputs[0].args, json!({"_test": true}));
    assert_eq!(inputs[0].code, result.compilation.as_ref().unwrap().compiled_code);
    assert_ne!(inputs[0].code, VALID_CODE);
    assert_eq!(
        inputs[0].parameters["trace_id"],
        json!(format!("test-{}", result.id))
    );
}

#[tokio::test]
async fn test_deploy_test_failure_withholds_activation() {
    let ctx = TestContext::with_sandbox(Config::default(), MockSandbox::erroring("boom"));
    let options = DeploymentOptions::default().with_test_timeout(Duration::from_secs(1));

    let result = ctx
        .manager
        .deploy_function(&owner(), "calc", "", VALID_CODE, "", options)
        .await
        .unwrap();

    assert_eq!(result.status, DeploymentStatus::Completed);
    assert_eq!(result.message, "Test execution failed: boom");
    assert_eq!(result.function.unwrap().status, FunctionStatus::Error);
}

#[tokio::test]
async fn test_deploy_test_run_is_gas_limited() {
    let ctx = TestContext::with_config(Config {
        test_gas_limit: 1000,
        ..Config::default()
    });
    let options = DeploymentOptions::default().with_test_timeout(Duration::from_secs(1));

    let result = ctx
        .manager
        .deploy_function(&owner(), "calc", "", VALID_CODE, "", options)
        .await
        .unwrap();

    assert_eq!(result.message, "Test execution failed: gas limit exceeded");
    assert_eq!(result.function.unwrap().status, FunctionStatus::Error);
}

#[tokio::test]
async fn test_deploy_applies_side_updates() {
    let ctx = TestContext::new();
    let mut metadata = Map::new();
    metadata.insert("team".to_string(), json!("payments"));
    let options = DeploymentOptions {
        permissions: Some(FunctionPermissions {
            function_id: String::new(),
            owner: other(),
            allowed_principals: vec![other()],
            public: false,
            read_only: true,
        }),
        triggers: Some(vec!["cron-1".to_string()]),
        metadata: Some(metadata.clone()),
        ..DeploymentOptions::default()
    };

    let result = ctx
        .manager
        .deploy_function(&owner(), "calc", "", VALID_CODE, "", options)
        .await
        .unwrap();
    let function = result.function.unwrap();

    assert_eq!(function.triggers, vec!["cron-1".to_string()]);
    assert_eq!(function.metadata, metadata);

    let permissions = ctx.registry.get_permissions(&function.id).await.unwrap();
    assert_eq!(permissions.owner, owner());
    assert_eq!(permissions.function_id, function.id);
    assert!(permissions.read_only);
    assert!(permissions.is_allowed(&other()));
}

#[tokio::test]
async fn test_deploy_without_auto_activate_is_disabled() {
    let ctx = TestContext::new();
    let options = DeploymentOptions {
        auto_activate: false,
        ..DeploymentOptions::default()
    };

    let result = ctx
        .manager
        .deploy_function(&owner(), "calc", "", UNSAFE_CODE, "", options)
        .await
        .unwrap();

    // Validation failures only force Error under auto-activate.
    assert_eq!(result.message, "Validation failed with 1 errors");
    assert_eq!(result.function.unwrap().status, FunctionStatus::Disabled);
}

#[tokio::test]
async fn test_update_compile_failure_restores_previous_state() {
    let ctx = TestContext::new();
    let function = ctx.create(&owner(), "calc", VALID_CODE).await;

    let err = ctx
        .manager
        .update_function(
            &function.id,
            &owner(),
            FunctionUpdate::new().code(BROKEN_CODE),
            DeploymentOptions::default(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.result.kind, DeploymentKind::Update);
    assert_eq!(err.result.status, DeploymentStatus::Failed);
    assert!(err.result.message.starts_with("Compilation failed:"));
    assert!(err.result.message.ends_with("; Rolled back to previous version"));
    assert!(matches!(err.source, Error::CompilationFailed(_)));
    assert_eq!(
        err.result.saga.step("apply_update").unwrap().compensation,
        CompensationState::Completed
    );

    let restored = ctx.registry.get_function(&function.id).await.unwrap();
    assert_eq!(restored.code, VALID_CODE);
    assert_eq!(restored.status, FunctionStatus::Active);

    // Applying and restoring both count as code mutations.
    let versions = ctx.registry.list_function_versions(&function.id).await.unwrap();
    let numbers: Vec<u32> = versions.iter().map(|v| v.version).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
    assert_eq!(versions[2].code, VALID_CODE);
}

#[tokio::test]
async fn test_update_with_failing_restore_reports_both_errors() {
    let ctx = TestContext::new();
    let function = ctx.create(&owner(), "calc", VALID_CODE).await;
    let manager = DeploymentManager::new(ctx.registry.clone()).with_compiler(Arc::new(
        DeletingCompiler {
            registry: ctx.registry.clone(),
            function_id: function.id.clone(),
        },
    ));

    let err = manager
        .update_function(
            &function.id,
            &owner(),
            FunctionUpdate::new().code("function main(args) { return 2; }"),
            DeploymentOptions::default(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.result.status, DeploymentStatus::Failed);
    assert_eq!(
        err.result.message,
        format!(
            "Compilation failed: empty code; Rollback failed: function not found: {}",
            function.id
        )
    );
    assert!(!err.result.message.contains("Rolled back to previous version"));
    assert!(matches!(err.source, Error::CompilationFailed(_)));
    assert_eq!(
        err.result.saga.step("apply_update").unwrap().compensation,
        CompensationState::Failed
    );
    assert!(matches!(
        ctx.registry.get_function(&function.id).await,
        Err(Error::NotFound { kind: "function", .. })
    ));
}

#[tokio::test]
async fn test_update_test_failure_keeps_new_code_in_error() {
    let ctx = TestContext::with_sandbox(Config::default(), MockSandbox::erroring("boom"));
    let function = ctx.create(&owner(), "calc", VALID_CODE).await;
    let new_code = "function main(args) { return args.a * args.b; }";

    let result = ctx
        .manager
        .update_function(
            &function.id,
            &owner(),
            FunctionUpdate::new().code(new_code),
            DeploymentOptions::default().with_test_timeout(Duration::from_secs(1)),
        )
        .await
        .unwrap();

    assert_eq!(result.status, DeploymentStatus::Completed);
    assert_eq!(result.message, "Test execution failed: boom");
    assert!(!result.message.contains("Rolled back"));
    assert!(result.test_execution.is_some());
    assert_eq!(
        result.saga.step("apply_update").unwrap().compensation,
        CompensationState::Pending
    );

    let updated = ctx.registry.get_function(&function.id).await.unwrap();
    assert_eq!(updated.code, new_code);
    assert_eq!(updated.status, FunctionStatus::Error);

    let versions = ctx.registry.list_function_versions(&function.id).await.unwrap();
    let numbers: Vec<u32> = versions.iter().map(|v| v.version).collect();
    assert_eq!(numbers, vec![1, 2]);
}

#[tokio::test]
async fn test_deploy_accepts_regex_with_quote() {
    let ctx = TestContext::new();
    let code = "function main(args) {\n  return args.s.replace(/'/g, \"\");\n}";

    let result = ctx
        .manager
        .deploy_function(&owner(), "strip", "", code, "", DeploymentOptions::default())
        .await
        .unwrap();

    assert_eq!(result.message, "Function deployed successfully");
    assert!(result.compilation.is_some());
    assert_eq!(result.function.unwrap().status, FunctionStatus::Active);
}

#[tokio::test]
async fn test_update_accepts_regex_with_slashes() {
    let ctx = TestContext::new();
    let function = ctx.create(&owner(), "urls", VALID_CODE).await;
    let new_code = concat!(
        "function main(args) {\n",
        "  if (/^https?:\\/\\//.test(args.url)) { return 1; }\n",
        "  return 0;\n",
        "}"
    );

    let result = ctx
        .manager
        .update_function(
            &function.id,
            &owner(),
            FunctionUpdate::new().code(new_code),
            DeploymentOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(result.message, "Function updated successfully");
    let updated = ctx.registry.get_function(&function.id).await.unwrap();
    assert_eq!(updated.code, new_code);
    assert_eq!(updated.status, FunctionStatus::Active);
}

#[tokio::test]
async fn test_update_success_reactivates() {
    let ctx = TestContext::new();
    let function = ctx.create(&owner(), "calc", VALID_CODE).await;
    let new_code = "function main(args) { return args.a * args.b; }";

    let result = ctx
        .manager
        .update_function(
            &function.id,
            &owner(),
            FunctionUpdate::new().code(new_code).description("multiplies"),
            DeploymentOptions::default().with_test_timeout(Duration::from_secs(1)),
        )
        .await
        .unwrap();

    assert_eq!(result.message, "Function updated successfully");
    assert!(result.compilation.is_some());
    assert!(result.test_execution.is_some());

    let updated = ctx.registry.get_function(&function.id).await.unwrap();
    assert_eq!(updated.code, new_code);
    assert_eq!(updated.description, "multiplies");
    assert_eq!(updated.status, FunctionStatus::Active);

    let inputs = ctx.sandbox.inputs().await;
    assert_eq!(
        inputs[0].parameters["trace_id"],
        json!(format!("update-test-{}", result.id))
    );
}

#[tokio::test]
async fn test_update_with_failed_validation_ends_in_error() {
    let ctx = TestContext::new();
    let function = ctx.create(&owner(), "calc", VALID_CODE).await;

    let result = ctx
        .manager
        .update_function(
            &function.id,
            &owner(),
            FunctionUpdate::new().code(UNSAFE_CODE),
            DeploymentOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(result.status, DeploymentStatus::Completed);
    assert_eq!(result.message, "Validation failed with 1 errors");
    assert_eq!(result.function.unwrap().status, FunctionStatus::Error);
}

#[tokio::test]
async fn test_update_without_code_skips_compilation() {
    let ctx = TestContext::new();
    let compiler = Arc::new(Compiler::new());
    let manager = DeploymentManager::new(ctx.registry.clone()).with_compiler(compiler.clone());
    let function = ctx.create(&owner(), "calc", VALID_CODE).await;

    let result = manager
        .update_function(
            &function.id,
            &owner(),
            FunctionUpdate::new().description("docs only"),
            DeploymentOptions::default(),
        )
        .await
        .unwrap();

    assert!(result.compilation.is_none());
    assert!(result.validation.is_none());
    assert_eq!(result.function.unwrap().status, FunctionStatus::Active);
    assert_eq!(compiler.cache_stats().entries, 0);
}

#[tokio::test]
async fn test_update_by_stranger_fails_without_compensation() {
    let ctx = TestContext::new();
    let function = ctx.create(&owner(), "calc", VALID_CODE).await;

    let err = ctx
        .manager
        .update_function(
            &function.id,
            &other(),
            FunctionUpdate::new().code(VALID_CODE),
            DeploymentOptions::default(),
        )
        .await
        .unwrap_err();

    assert_eq!(
        err.result.message,
        "Failed to update function: permission denied: not function owner"
    );
    assert!(matches!(err.source, Error::PermissionDenied(_)));
    assert_eq!(err.result.saga.compensated(), 0);
    assert_eq!(
        ctx.registry.get_function(&function.id).await.unwrap().status,
        FunctionStatus::Active
    );
}

#[tokio::test]
async fn test_update_missing_function() {
    let ctx = TestContext::new();

    let err = ctx
        .manager
        .update_function(
            "missing",
            &owner(),
            FunctionUpdate::new().code(VALID_CODE),
            DeploymentOptions::default(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.result.message, "Failed to get function: function not found: missing");
    assert!(err.result.function.is_none());
}

#[tokio::test]
async fn test_rollback_appends_version_and_reactivates() {
    let ctx = TestContext::new();
    let function = ctx.create(&owner(), "calc", VALID_CODE).await;
    ctx.registry
        .update_function(
            &function.id,
            &owner(),
            FunctionUpdate::new()
                .code("function main() { return 0; }")
                .status(FunctionStatus::Error),
        )
        .await
        .unwrap();

    let result = ctx
        .manager
        .rollback_function(&function.id, 1, &owner())
        .await
        .unwrap();

    assert_eq!(result.kind, DeploymentKind::Rollback);
    assert_eq!(result.message, "Successfully rolled back to version 1");

    let function = ctx.registry.get_function(&function.id).await.unwrap();
    assert_eq!(function.code, VALID_CODE);
    assert_eq!(function.description, "test function (Rolled back to v1)");
    assert_eq!(function.status, FunctionStatus::Active);

    let versions = ctx.registry.list_function_versions(&function.id).await.unwrap();
    assert_eq!(versions.len(), 3);
    assert_eq!(versions[2].version, 3);
    assert_eq!(versions[2].code, VALID_CODE);
    assert_eq!(versions[2].status, FunctionStatus::Rollback);
}

#[tokio::test]
async fn test_rollback_to_unknown_version_fails() {
    let ctx = TestContext::new();
    let function = ctx.create(&owner(), "calc", VALID_CODE).await;

    let err = ctx
        .manager
        .rollback_function(&function.id, 9, &owner())
        .await
        .unwrap_err();

    assert!(err.result.message.starts_with("Failed to get version 9:"));
    assert!(matches!(err.source, Error::NotFound { kind: "version", .. }));
    assert_eq!(
        ctx.registry.get_function(&function.id).await.unwrap().status,
        FunctionStatus::Active
    );
}

#[tokio::test]
async fn test_deployed_function_is_invocable_and_deletable() {
    let ctx = TestContext::new();
    let result = ctx
        .manager
        .deploy_function(&owner(), "calc", "", VALID_CODE, "", DeploymentOptions::default())
        .await
        .unwrap();
    let function_id = result.function.unwrap().id;

    let execution = ctx
        .registry
        .invoke_function(
            FunctionInvocation::new(&function_id, owner()).parameters(json!({"a": 1, "b": 2})),
        )
        .await
        .unwrap();
    assert!(execution.error.is_none());

    ctx.manager.delete_function(&function_id, &owner()).await.unwrap();
    assert!(ctx.registry.get_function(&function_id).await.is_err());
    assert!(ctx.registry.get_execution(&execution.id).await.is_ok());

    let deployments = ctx.manager.list_deployments().await;
    assert_eq!(deployments.len(), 1);
    assert_eq!(deployments[0].id, result.id);
}
