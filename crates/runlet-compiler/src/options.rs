// Copyright (C) 2025 The runlet Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Compilation options.

use serde::{Deserialize, Serialize};

/// Target environment of a compilation. Selects option presets and the
/// verbosity of injected tracing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompileEnvironment {
    /// Development: verbose tracing, no size optimizations.
    #[default]
    Dev,
    /// Testing: same passes as development.
    Test,
    /// Production: comments and logging stripped, minified.
    Prod,
}

impl CompileEnvironment {
    /// Returns the string representation of the environment.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dev => "dev",
            Self::Test => "test",
            Self::Prod => "prod",
        }
    }
}

impl std::fmt::Display for CompileEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CompileEnvironment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" | "development" => Ok(Self::Dev),
            "test" | "testing" => Ok(Self::Test),
            "prod" | "production" => Ok(Self::Prod),
            _ => Err(format!("Unknown compile environment: {}", s)),
        }
    }
}

/// Switches for the individual passes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompileOptions {
    /// Collapse whitespace and strip comments.
    pub minify: bool,
    /// Remove `//` and `/* */` comments.
    pub remove_comments: bool,
    /// Remove `console.log(...)` statements.
    pub strip_console_log: bool,
    /// Wrap the `main` body with timing instrumentation.
    pub inject_tracing: bool,
    /// Add the gas accounting prelude to `main`.
    pub inject_gas_tracking: bool,
    /// Target environment.
    pub environment: CompileEnvironment,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self::for_environment(CompileEnvironment::Dev)
    }
}

impl CompileOptions {
    /// Preset options for an environment.
    pub fn for_environment(environment: CompileEnvironment) -> Self {
        match environment {
            CompileEnvironment::Prod => Self {
                minify: true,
                remove_comments: true,
                strip_console_log: true,
                inject_tracing: true,
                inject_gas_tracking: true,
                environment,
            },
            CompileEnvironment::Dev | CompileEnvironment::Test => Self {
                minify: false,
                remove_comments: false,
                strip_console_log: false,
                inject_tracing: true,
                inject_gas_tracking: true,
                environment,
            },
        }
    }

    /// Stable textual form of the enabled options, used in cache keys.
    pub fn fingerprint(&self) -> String {
        let mut out = String::from(self.environment.as_str());
        if self.minify {
            out.push_str("|minify");
        }
        if self.remove_comments {
            out.push_str("|nocomments");
        }
        if self.strip_console_log {
            out.push_str("|noconsole");
        }
        if self.inject_tracing {
            out.push_str("|trace");
        }
        if self.inject_gas_tracking {
            out.push_str("|gas");
        }
        out
    }
}
