// Copyright (C) 2025 The runlet Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background worker for pruning execution and deployment history.
//!
//! Finished executions and deployment audit records older than
//! [`HistoryConfig::max_age`] are removed every
//! [`HistoryConfig::prune_interval`]. The worker is opt-in; both stores can
//! also be pruned manually.

use std::sync::Arc;

use tokio::sync::Notify;
use tracing::{debug, info};

use crate::config::HistoryConfig;
use crate::deployment::DeploymentManager;
use crate::registry::FunctionRegistry;

/// Records removed by one pruning pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneStats {
    /// Executions removed from the registry.
    pub executions: usize,
    /// Audit records removed from the deployment manager.
    pub deployments: usize,
}

/// Background worker that prunes old history.
pub struct HistoryPruner {
    registry: Arc<FunctionRegistry>,
    manager: Arc<DeploymentManager>,
    config: HistoryConfig,
    shutdown: Arc<Notify>,
}

impl HistoryPruner {
    /// Create a new pruner.
    pub fn new(
        registry: Arc<FunctionRegistry>,
        manager: Arc<DeploymentManager>,
        config: HistoryConfig,
    ) -> Self {
        Self {
            registry,
            manager,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the pruning loop until the shutdown signal is received.
    pub async fn run(&self) {
        if !self.config.prune_enabled {
            info!("History pruner disabled");
            return;
        }

        info!(
            prune_interval_secs = self.config.prune_interval.as_secs(),
            max_age_secs = self.config.max_age.as_secs(),
            "History pruner started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("History pruner received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.prune_interval) => {
                    self.prune_once().await;
                }
            }
        }

        info!("History pruner stopped");
    }

    /// Run a single pruning pass.
    pub async fn prune_once(&self) -> PruneStats {
        let stats = PruneStats {
            executions: self
                .registry
                .clear_execution_history(self.config.max_age)
                .await,
            deployments: self
                .manager
                .clear_deployment_history(self.config.max_age)
                .await,
        };

        if stats == PruneStats::default() {
            debug!("No history to prune");
        } else {
            info!(
                executions = stats.executions,
                deployments = stats.deployments,
                "Pruned history"
            );
        }
        stats
    }
}
