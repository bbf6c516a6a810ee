// Copyright (C) 2025 The runlet Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable control plane.
//!
//! [`ControlPlane`] wires the registry, the deployment manager and the
//! optional history pruner around a caller-supplied [`Sandbox`].
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use runlet_core::control_plane::ControlPlane;
//! use runlet_core::sandbox::MockSandbox;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let plane = ControlPlane::builder()
//!         .sandbox(Arc::new(MockSandbox::new()))
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     // ... deploy and invoke through plane.manager() / plane.registry() ...
//!
//!     plane.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use anyhow::Result;
use runlet_compiler::Compiler;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::{Config, HistoryConfig};
use crate::deployment::DeploymentManager;
use crate::executor::{FunctionExecutor, GasSchedule};
use crate::history_pruner::HistoryPruner;
use crate::registry::FunctionRegistry;
use crate::sandbox::Sandbox;
use crate::validator::{RuleValidator, Validator};

/// Builder for a [`ControlPlane`].
#[derive(Default)]
pub struct ControlPlaneBuilder {
    config: Option<Config>,
    sandbox: Option<Arc<dyn Sandbox>>,
    validator: Option<Arc<dyn Validator>>,
    compiler: Option<Arc<Compiler>>,
    gas_schedule: Option<GasSchedule>,
    history: Option<HistoryConfig>,
}

impl ControlPlaneBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an explicit configuration instead of [`Config::from_env`].
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the sandbox backend (required).
    pub fn sandbox(mut self, sandbox: Arc<dyn Sandbox>) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    /// Replace the built-in validator.
    pub fn validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Share an existing compiler and its cache.
    pub fn compiler(mut self, compiler: Arc<Compiler>) -> Self {
        self.compiler = Some(compiler);
        self
    }

    /// Override the gas schedule.
    pub fn gas_schedule(mut self, schedule: GasSchedule) -> Self {
        self.gas_schedule = Some(schedule);
        self
    }

    /// Override the history pruning settings of the configuration.
    pub fn history(mut self, history: HistoryConfig) -> Self {
        self.history = Some(history);
        self
    }

    /// Validate the builder and produce a configuration.
    pub fn build(self) -> Result<ControlPlaneConfig> {
        let sandbox = self
            .sandbox
            .ok_or_else(|| anyhow::anyhow!("sandbox is required"))?;

        let mut config = match self.config {
            Some(config) => config.normalized(),
            None => Config::from_env()?,
        };
        if let Some(history) = self.history {
            config.history = history;
        }

        Ok(ControlPlaneConfig {
            config,
            sandbox,
            validator: self
                .validator
                .unwrap_or_else(|| Arc::new(RuleValidator::new())),
            compiler: self.compiler.unwrap_or_default(),
            gas_schedule: self.gas_schedule.unwrap_or_default(),
        })
    }
}

/// Validated settings for a [`ControlPlane`].
pub struct ControlPlaneConfig {
    config: Config,
    sandbox: Arc<dyn Sandbox>,
    validator: Arc<dyn Validator>,
    compiler: Arc<Compiler>,
    gas_schedule: GasSchedule,
}

impl ControlPlaneConfig {
    /// Active configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Create the components and spawn the history pruner.
    pub async fn start(self) -> Result<ControlPlane> {
        let executor = FunctionExecutor::with_schedule(self.sandbox.clone(), self.gas_schedule);
        let registry = Arc::new(FunctionRegistry::with_executor(
            self.config.clone(),
            executor.clone(),
        ));
        let manager = Arc::new(
            DeploymentManager::new(registry.clone())
                .with_compiler(self.compiler.clone())
                .with_validator(self.validator)
                .with_executor(executor),
        );

        let pruner = HistoryPruner::new(
            registry.clone(),
            manager.clone(),
            self.config.history.clone(),
        );
        let pruner_shutdown = pruner.shutdown_handle();
        let pruner_handle = tokio::spawn(async move {
            pruner.run().await;
        });

        info!(
            sandbox = self.sandbox.sandbox_type(),
            max_function_size = self.config.max_function_size,
            max_execution_time_ms = self.config.max_execution_time.as_millis() as u64,
            history_pruning = self.config.history.prune_enabled,
            "ControlPlane started"
        );

        Ok(ControlPlane {
            registry,
            manager,
            compiler: self.compiler,
            pruner_handle,
            pruner_shutdown,
        })
    }
}

/// A running control plane.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct ControlPlane {
    registry: Arc<FunctionRegistry>,
    manager: Arc<DeploymentManager>,
    compiler: Arc<Compiler>,
    pruner_handle: JoinHandle<()>,
    pruner_shutdown: Arc<Notify>,
}

impl ControlPlane {
    /// Create a new builder for configuring the control plane.
    pub fn builder() -> ControlPlaneBuilder {
        ControlPlaneBuilder::new()
    }

    /// The function registry.
    pub fn registry(&self) -> &Arc<FunctionRegistry> {
        &self.registry
    }

    /// The deployment manager.
    pub fn manager(&self) -> &Arc<DeploymentManager> {
        &self.manager
    }

    /// The shared compiler.
    pub fn compiler(&self) -> &Arc<Compiler> {
        &self.compiler
    }

    /// Stop the history pruner and wait for it.
    pub async fn shutdown(self) -> Result<()> {
        info!("ControlPlane shutting down...");
        self.pruner_shutdown.notify_one();

        if let Err(e) = self.pruner_handle.await {
            error!("History pruner task panicked: {}", e);
            return Err(anyhow::anyhow!("history pruner task panicked: {}", e));
        }

        info!("ControlPlane shutdown complete");
        Ok(())
    }

    /// Check if background tasks are still running.
    ///
    /// Always false when pruning is disabled, since the pruner exits at once.
    pub fn is_running(&self) -> bool {
        !self.pruner_handle.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FunctionInvocation, Principal};
    use crate::deployment::DeploymentOptions;
    use crate::sandbox::MockSandbox;
    use std::time::Duration;

    #[test]
    fn test_build_requires_sandbox() {
        let err = ControlPlane::builder()
            .config(Config::default())
            .build()
            .err()
            .unwrap();
        assert!(err.to_string().contains("sandbox is required"));
    }

    #[test]
    fn test_build_normalizes_config() {
        let config = Config {
            max_function_size: 0,
            ..Config::default()
        };
        let built = ControlPlane::builder()
            .config(config)
            .sandbox(Arc::new(MockSandbox::new()))
            .build()
            .unwrap();
        assert_eq!(built.config().max_function_size, Config::default().max_function_size);
    }

    #[tokio::test]
    async fn test_start_deploy_invoke_shutdown() {
        let plane = ControlPlane::builder()
            .config(Config::default())
            .sandbox(Arc::new(MockSandbox::new()))
            .history(HistoryConfig {
                prune_enabled: true,
                prune_interval: Duration::from_secs(3600),
                max_age: Duration::from_secs(3600),
            })
            .build()
            .unwrap()
            .start()
            .await
            .unwrap();
        assert!(plane.is_running());

        let owner = Principal::new("alice");
        let deployed = plane
            .manager()
            .deploy_function(
                &owner,
                "hello",
                "",
                "function main(args) { return args; }",
                "",
                DeploymentOptions::default(),
            )
            .await
            .unwrap();
        let function_id = deployed.function.unwrap().id;

        let execution = plane
            .registry()
            .invoke_function(FunctionInvocation::new(&function_id, owner))
            .await
            .unwrap();
        assert!(execution.error.is_none());
        assert_eq!(plane.compiler().cache_stats().entries, 1);

        plane.shutdown().await.unwrap();
    }
}
