// Copyright (C) 2025 The runlet Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Function registry.
//!
//! Owns functions, their permission records, version ledgers and execution
//! cells behind a single readers-writer lock. Every mutation holds the write
//! lock for its whole duration, so create, update and delete are linearizable
//! per function ID.
//!
//! Dispatch never holds the lock while the sandbox runs. Results are written
//! to the execution's own [`ExecutionCell`].

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{Config, DEFAULT_RUNTIME};
use crate::error::{Error, Result};
use crate::execution::ExecutionCell;
use crate::executor::{ExecutionOptions, FunctionExecutor};
use crate::models::{
    ExecutionStatus, Function, FunctionExecution, FunctionInvocation, FunctionPermissions,
    FunctionUpdate, FunctionVersion, Metadata, NewFunction, Principal, function_id,
};
use crate::sandbox::Sandbox;

#[derive(Default)]
struct RegistryState {
    functions: HashMap<String, Function>,
    permissions: HashMap<String, FunctionPermissions>,
    versions: HashMap<String, Vec<FunctionVersion>>,
    executions: HashMap<Uuid, Arc<ExecutionCell>>,
}

impl RegistryState {
    fn function(&self, id: &str) -> Result<&Function> {
        self.functions
            .get(id)
            .ok_or_else(|| Error::not_found("function", id))
    }

    fn append_version(&mut self, function: &Function, created_by: &Principal) -> u32 {
        let ledger = self.versions.entry(function.id.clone()).or_default();
        let version = ledger.last().map(|v| v.version + 1).unwrap_or(1);
        ledger.push(FunctionVersion {
            function_id: function.id.clone(),
            version,
            code: function.code.clone(),
            description: function.description.clone(),
            runtime: function.runtime.clone(),
            created_by: created_by.clone(),
            created_at: Utc::now(),
            status: function.status,
        });
        version
    }
}

/// In-memory function registry.
pub struct FunctionRegistry {
    config: Config,
    executor: FunctionExecutor,
    state: RwLock<RegistryState>,
}

impl FunctionRegistry {
    /// Create a registry dispatching to `sandbox`.
    pub fn new(config: Config, sandbox: Arc<dyn Sandbox>) -> Self {
        Self::with_executor(config, FunctionExecutor::new(sandbox))
    }

    /// Create a registry with a preconfigured executor.
    pub fn with_executor(config: Config, executor: FunctionExecutor) -> Self {
        Self {
            config: config.normalized(),
            executor,
            state: RwLock::new(RegistryState::default()),
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Executor used for dispatch.
    pub fn executor(&self) -> &FunctionExecutor {
        &self.executor
    }

    fn check_size(&self, code: &str) -> Result<()> {
        if code.len() > self.config.max_function_size {
            return Err(Error::SizeExceeded {
                size: code.len(),
                max: self.config.max_function_size,
            });
        }
        Ok(())
    }

    fn resolve_runtime(&self, runtime: &str) -> Result<String> {
        let runtime = match runtime.trim() {
            "" => self.config.default_runtime.as_str(),
            other => other,
        };
        if runtime != DEFAULT_RUNTIME {
            return Err(Error::UnsupportedRuntime(runtime.to_string()));
        }
        Ok(runtime.to_string())
    }

    /// Create an active function owned by `owner`.
    pub async fn create_function(
        &self,
        owner: &Principal,
        name: &str,
        description: &str,
        code: &str,
        runtime: &str,
    ) -> Result<Function> {
        self.register(
            NewFunction::new(owner.clone(), name, code)
                .description(description)
                .runtime(runtime),
        )
        .await
    }

    /// Create a function with an explicit initial status.
    ///
    /// The function, its private permission record and version 1 are stored
    /// under one write-lock acquisition.
    pub async fn register(&self, new: NewFunction) -> Result<Function> {
        self.check_size(&new.code)?;
        let runtime = self.resolve_runtime(&new.runtime)?;
        let id = function_id(&new.owner, &new.name);

        let mut state = self.state.write().await;
        if state.functions.contains_key(&id) {
            return Err(Error::AlreadyExists { id });
        }

        let now = Utc::now();
        let function = Function {
            id: id.clone(),
            name: new.name,
            description: new.description,
            owner: new.owner,
            code: new.code,
            runtime,
            status: new.status,
            triggers: Vec::new(),
            created_at: now,
            updated_at: now,
            last_executed: None,
            metadata: Metadata::new(),
        };

        state.permissions.insert(
            id.clone(),
            FunctionPermissions::private(id.clone(), function.owner.clone()),
        );
        state.append_version(&function, &function.owner);
        state.functions.insert(id.clone(), function.clone());

        info!(
            function_id = %id,
            owner = %function.owner,
            status = %function.status,
            "Function created"
        );

        Ok(function)
    }

    /// Fetch a function.
    pub async fn get_function(&self, function_id: &str) -> Result<Function> {
        self.state.read().await.function(function_id).cloned()
    }

    /// Apply `update` on behalf of `updater`.
    ///
    /// The owner may always update. Other principals need to be allow-listed
    /// on a function that is not read-only. A code change appends a version
    /// attributed to `updater`.
    pub async fn update_function(
        &self,
        function_id: &str,
        updater: &Principal,
        update: FunctionUpdate,
    ) -> Result<Function> {
        if let Some(code) = &update.code {
            self.check_size(code)?;
        }

        let mut state = self.state.write().await;
        let owner = state.function(function_id)?.owner.clone();

        if *updater != owner {
            let permissions = state
                .permissions
                .get(function_id)
                .ok_or_else(|| Error::not_found("permissions", function_id))?;
            if permissions.read_only {
                return Err(Error::PermissionDenied("function is read-only".to_string()));
            }
            if !permissions.is_allowed(updater) {
                return Err(Error::PermissionDenied("not function owner".to_string()));
            }
        }

        let Some(function) = state.functions.get_mut(function_id) else {
            return Err(Error::not_found("function", function_id));
        };

        let mut changed = false;
        if let Some(description) = update.description
            && description != function.description
        {
            function.description = description;
            changed = true;
        }
        if let Some(status) = update.status
            && status != function.status
        {
            function.status = status;
            changed = true;
        }
        if let Some(metadata) = update.metadata
            && metadata != function.metadata
        {
            function.metadata = metadata;
            changed = true;
        }
        if let Some(triggers) = update.triggers
            && triggers != function.triggers
        {
            function.triggers = triggers;
            changed = true;
        }
        let code_updated = match update.code {
            Some(code) => {
                changed |= code != function.code;
                function.code = code;
                true
            }
            None => false,
        };
        if changed {
            function.updated_at = Utc::now();
        }

        let function = function.clone();
        if code_updated {
            let version = state.append_version(&function, updater);
            info!(
                function_id = %function.id,
                version,
                updated_by = %updater,
                "Function code updated"
            );
        } else {
            debug!(function_id = %function.id, status = %function.status, "Function updated");
        }

        Ok(function)
    }

    /// Delete a function, its permissions and its versions. Owner only.
    ///
    /// Executions of the function are kept.
    pub async fn delete_function(&self, function_id: &str, deleter: &Principal) -> Result<()> {
        let mut state = self.state.write().await;
        if state.function(function_id)?.owner != *deleter {
            return Err(Error::PermissionDenied("not function owner".to_string()));
        }

        state.functions.remove(function_id);
        state.permissions.remove(function_id);
        state.versions.remove(function_id);

        info!(function_id = %function_id, "Function deleted");
        Ok(())
    }

    /// Invoke a function.
    ///
    /// Returns the running execution for asynchronous invocations and the
    /// finished execution otherwise. Execution failures are recorded on the
    /// execution, not returned.
    pub async fn invoke_function(
        self: &Arc<Self>,
        invocation: FunctionInvocation,
    ) -> Result<FunctionExecution> {
        let (function, cell) = {
            let mut state = self.state.write().await;
            let function = state.function(&invocation.function_id)?.clone();
            let permissions = state
                .permissions
                .get(&invocation.function_id)
                .ok_or_else(|| Error::not_found("permissions", &invocation.function_id))?;
            if !permissions.can_invoke(&invocation.caller) {
                return Err(Error::PermissionDenied(
                    "not authorized to invoke this function".to_string(),
                ));
            }

            let cell = Arc::new(ExecutionCell::new(FunctionExecution::start(&invocation)));
            state.executions.insert(cell.snapshot().id, cell.clone());
            (function, cell)
        };

        debug!(
            function_id = %function.id,
            execution_id = %cell.snapshot().id,
            is_async = invocation.is_async,
            "Dispatching invocation"
        );

        if invocation.is_async {
            let registry = self.clone();
            let running = cell.snapshot();
            tokio::spawn(async move {
                registry.dispatch(function, cell, invocation).await;
            });
            return Ok(running);
        }

        self.dispatch(function, cell.clone(), invocation).await;
        Ok(cell.snapshot())
    }

    async fn dispatch(
        &self,
        function: Function,
        cell: Arc<ExecutionCell>,
        invocation: FunctionInvocation,
    ) {
        if !function.status.is_invocable() {
            cell.update(|execution| {
                execution.fail(format!("function is not active (status: {})", function.status))
            });
            return;
        }

        let options = ExecutionOptions {
            timeout: self.config.max_execution_time,
            memory_limit_bytes: self.config.max_memory_bytes,
            gas_limit: None,
            function_id: Some(function.id.clone()),
            caller: Some(invocation.caller.clone()),
            trace_id: invocation.trace_id.clone(),
            network: self.config.enable_network,
            file_io: self.config.enable_file_io,
        };
        let result = self
            .executor
            .execute(&function.code, invocation.parameters, &options)
            .await;
        let finished = Utc::now();

        if let Some(stored) = self.state.write().await.functions.get_mut(&function.id) {
            stored.last_executed = Some(finished);
        }

        cell.update(|execution| {
            execution.completed_at = Some(finished);
            execution.duration_ms = result.duration_ms;
            execution.memory_used_bytes = result.memory_used_bytes;
            execution.result = result.result;
            execution.logs = result.logs;
            execution.cost = result.gas_used;
            match result.error {
                Some(error) => {
                    execution.status = ExecutionStatus::Failed;
                    execution.error = Some(error);
                }
                None => execution.status = ExecutionStatus::Completed,
            }
        });

        let execution = cell.snapshot();
        if execution.status == ExecutionStatus::Failed {
            warn!(
                function_id = %function.id,
                execution_id = %execution.id,
                error = execution.error.as_deref().unwrap_or_default(),
                "Execution failed"
            );
        } else {
            debug!(
                function_id = %function.id,
                execution_id = %execution.id,
                duration_ms = execution.duration_ms,
                cost = execution.cost,
                "Execution completed"
            );
        }
    }

    async fn execution_cell(&self, execution_id: &Uuid) -> Result<Arc<ExecutionCell>> {
        self.state
            .read()
            .await
            .executions
            .get(execution_id)
            .cloned()
            .ok_or_else(|| Error::not_found("execution", execution_id.to_string()))
    }

    /// Snapshot of an execution.
    pub async fn get_execution(&self, execution_id: &Uuid) -> Result<FunctionExecution> {
        Ok(self.execution_cell(execution_id).await?.snapshot())
    }

    /// Wait until an execution is completed or failed.
    pub async fn wait_for_execution(&self, execution_id: &Uuid) -> Result<FunctionExecution> {
        let cell = self.execution_cell(execution_id).await?;
        Ok(cell.wait_terminal().await)
    }

    /// Permission record of a function.
    pub async fn get_permissions(&self, function_id: &str) -> Result<FunctionPermissions> {
        self.state
            .read()
            .await
            .permissions
            .get(function_id)
            .cloned()
            .ok_or_else(|| Error::not_found("permissions", function_id))
    }

    /// Replace the permission record. Owner only.
    ///
    /// `function_id` and `owner` in `permissions` are overwritten with the
    /// function's own values.
    pub async fn update_permissions(
        &self,
        function_id: &str,
        updater: &Principal,
        mut permissions: FunctionPermissions,
    ) -> Result<FunctionPermissions> {
        let mut state = self.state.write().await;
        let owner = state.function(function_id)?.owner.clone();
        if *updater != owner {
            return Err(Error::PermissionDenied("not function owner".to_string()));
        }

        permissions.function_id = function_id.to_string();
        permissions.owner = owner;
        state
            .permissions
            .insert(function_id.to_string(), permissions.clone());

        debug!(
            function_id = %function_id,
            public = permissions.public,
            read_only = permissions.read_only,
            allowed = permissions.allowed_principals.len(),
            "Permissions updated"
        );
        Ok(permissions)
    }

    /// Functions owned by `owner`, oldest first.
    pub async fn list_functions(&self, owner: &Principal) -> Vec<Function> {
        let state = self.state.read().await;
        sorted_functions(state.functions.values().filter(|f| f.owner == *owner))
    }

    /// Every function, oldest first.
    pub async fn list_all_functions(&self) -> Vec<Function> {
        let state = self.state.read().await;
        sorted_functions(state.functions.values())
    }

    /// Executions of a function, most recent first. `limit == 0` returns all.
    pub async fn list_executions(&self, function_id: &str, limit: usize) -> Vec<FunctionExecution> {
        let state = self.state.read().await;
        let mut executions: Vec<FunctionExecution> = state
            .executions
            .values()
            .map(|cell| cell.snapshot())
            .filter(|e| e.function_id == function_id)
            .collect();
        drop(state);

        executions.sort_by(|a, b| {
            b.started_at
                .cmp(&a.started_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        if limit > 0 {
            executions.truncate(limit);
        }
        executions
    }

    /// Version ledger of a function, ascending.
    pub async fn list_function_versions(&self, function_id: &str) -> Result<Vec<FunctionVersion>> {
        let state = self.state.read().await;
        state.function(function_id)?;
        Ok(state.versions.get(function_id).cloned().unwrap_or_default())
    }

    /// One version of a function.
    pub async fn get_function_version(
        &self,
        function_id: &str,
        version: u32,
    ) -> Result<FunctionVersion> {
        let state = self.state.read().await;
        state.function(function_id)?;
        state
            .versions
            .get(function_id)
            .and_then(|ledger| ledger.iter().find(|v| v.version == version))
            .cloned()
            .ok_or_else(|| Error::not_found("version", format!("{}@{}", function_id, version)))
    }

    /// Remove finished executions that completed more than `max_age` ago.
    /// Returns the number removed.
    pub async fn clear_execution_history(&self, max_age: Duration) -> usize {
        let Some(cutoff) = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return 0;
        };

        let mut state = self.state.write().await;
        let before = state.executions.len();
        state.executions.retain(|_, cell| {
            let execution = cell.snapshot();
            !(execution.status.is_terminal()
                && execution.completed_at.is_some_and(|done| done < cutoff))
        });
        let removed = before - state.executions.len();

        if removed > 0 {
            info!(removed, "Cleared execution history");
        }
        removed
    }
}

fn sorted_functions<'a>(functions: impl Iterator<Item = &'a Function>) -> Vec<Function> {
    let mut functions: Vec<Function> = functions.cloned().collect();
    functions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    functions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FunctionStatus;
    use crate::sandbox::MockSandbox;
    use serde_json::json;

    const CODE: &str = "function main(args) { return args; }";

    fn registry() -> Arc<FunctionRegistry> {
        Arc::new(FunctionRegistry::new(
            Config::default(),
            Arc::new(MockSandbox::new()),
        ))
    }

    fn alice() -> Principal {
        Principal::new("alice")
    }

    #[tokio::test]
    async fn test_create_function_defaults() {
        let registry = registry();
        let function = registry
            .create_function(&alice(), "hello", "greets", CODE, "")
            .await
            .unwrap();

        assert_eq!(function.id, function_id(&alice(), "hello"));
        assert_eq!(function.status, FunctionStatus::Active);
        assert_eq!(function.runtime, "javascript");

        let permissions = registry.get_permissions(&function.id).await.unwrap();
        assert_eq!(permissions.owner, alice());
        assert!(!permissions.public);
        assert!(!permissions.read_only);

        let versions = registry.list_function_versions(&function.id).await.unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].version, 1);
    }

    #[tokio::test]
    async fn test_create_rejects_duplicates_and_runtimes() {
        let registry = registry();
        registry
            .create_function(&alice(), "hello", "", CODE, "javascript")
            .await
            .unwrap();

        let err = registry
            .create_function(&alice(), "hello", "", CODE, "")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists { .. }));

        let err = registry
            .create_function(&alice(), "py", "", CODE, "python")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedRuntime(ref r) if r == "python"));
    }

    #[tokio::test]
    async fn test_update_bumps_timestamp_only_on_change() {
        let registry = registry();
        let function = registry
            .create_function(&alice(), "hello", "same", CODE, "")
            .await
            .unwrap();

        let unchanged = registry
            .update_function(&function.id, &alice(), FunctionUpdate::new().description("same"))
            .await
            .unwrap();
        assert_eq!(unchanged.updated_at, function.updated_at);

        tokio::time::sleep(Duration::from_millis(5)).await;
        let changed = registry
            .update_function(&function.id, &alice(), FunctionUpdate::new().description("new"))
            .await
            .unwrap();
        assert!(changed.updated_at > function.updated_at);
    }

    #[tokio::test]
    async fn test_allow_listed_non_owner_may_update_writable_function() {
        let registry = registry();
        let bob = Principal::new("bob");
        let function = registry
            .create_function(&alice(), "hello", "", CODE, "")
            .await
            .unwrap();

        let mut permissions = registry.get_permissions(&function.id).await.unwrap();
        permissions.allowed_principals.push(bob.clone());
        registry
            .update_permissions(&function.id, &alice(), permissions)
            .await
            .unwrap();

        let updated = registry
            .update_function(
                &function.id,
                &bob,
                FunctionUpdate::new().code("function main() { return 2; }"),
            )
            .await
            .unwrap();
        let versions = registry.list_function_versions(&updated.id).await.unwrap();
        assert_eq!(versions.last().unwrap().created_by, bob);
    }

    #[tokio::test]
    async fn test_delete_keeps_executions() {
        let registry = registry();
        let function = registry
            .create_function(&alice(), "hello", "", CODE, "")
            .await
            .unwrap();
        let execution = registry
            .invoke_function(FunctionInvocation::new(&function.id, alice()))
            .await
            .unwrap();

        let err = registry
            .delete_function(&function.id, &Principal::new("mallory"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)));

        registry.delete_function(&function.id, &alice()).await.unwrap();
        assert!(registry.get_function(&function.id).await.is_err());
        assert!(registry.get_permissions(&function.id).await.is_err());
        assert!(registry.list_function_versions(&function.id).await.is_err());
        assert!(registry.get_execution(&execution.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_sync_invoke_records_result() {
        let registry = registry();
        let function = registry
            .create_function(&alice(), "hello", "", CODE, "")
            .await
            .unwrap();

        let execution = registry
            .invoke_function(
                FunctionInvocation::new(&function.id, alice())
                    .parameters(json!({"x": 1}))
                    .trace_id("trace-1"),
            )
            .await
            .unwrap();

        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.result, Some(json!({"echo": {"x": 1}})));
        assert!(execution.cost >= 1000);
        assert_eq!(execution.trace_id.as_deref(), Some("trace-1"));
        assert!(registry.get_function(&function.id).await.unwrap().last_executed.is_some());
    }

    #[tokio::test]
    async fn test_clear_execution_history() {
        let registry = registry();
        let function = registry
            .create_function(&alice(), "hello", "", CODE, "")
            .await
            .unwrap();
        registry
            .invoke_function(FunctionInvocation::new(&function.id, alice()))
            .await
            .unwrap();

        assert_eq!(registry.clear_execution_history(Duration::from_secs(3600)).await, 0);
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(registry.clear_execution_history(Duration::ZERO).await, 1);
        assert!(registry.list_executions(&function.id, 0).await.is_empty());
    }
}
