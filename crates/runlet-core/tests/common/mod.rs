// Copyright (C) 2025 The runlet Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test utilities for runlet-core integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use runlet_core::sandbox::MockSandbox;
use runlet_core::{Config, DeploymentManager, Function, FunctionRegistry, Principal};

/// Minimal function that passes every built-in validation rule.
pub const VALID_CODE: &str = "function main(args) {\n  return { sum: args.a + args.b };\n}";

/// Fails SEC001.
pub const UNSAFE_CODE: &str = "function main(args) {\n  return eval(args.expr);\n}";

/// Unclosed brace, rejected by the compiler precheck.
pub const BROKEN_CODE: &str = "function main(args) {\n  return args;\n";

/// Test context holding a registry and manager around one mock sandbox.
pub struct TestContext {
    pub sandbox: Arc<MockSandbox>,
    pub registry: Arc<FunctionRegistry>,
    pub manager: DeploymentManager,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self::with_sandbox(config, MockSandbox::new())
    }

    pub fn with_sandbox(config: Config, sandbox: MockSandbox) -> Self {
        let sandbox = Arc::new(sandbox);
        let registry = Arc::new(FunctionRegistry::new(config, sandbox.clone()));
        let manager = DeploymentManager::new(registry.clone());
        Self {
            sandbox,
            registry,
            manager,
        }
    }

    /// Create an active function directly through the registry.
    pub async fn create(&self, owner: &Principal, name: &str, code: &str) -> Function {
        self.registry
            .create_function(owner, name, "test function", code, "")
            .await
            .expect("Failed to create function")
    }
}

pub fn owner() -> Principal {
    Principal::new("owner")
}

pub fn other() -> Principal {
    Principal::new("other")
}
