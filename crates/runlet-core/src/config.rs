// Copyright (C) 2025 The runlet Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for runlet-core.

use std::time::Duration;

/// Default maximum source size (1 MiB).
pub const DEFAULT_MAX_FUNCTION_SIZE: usize = 1024 * 1024;
/// Default execution time ceiling.
pub const DEFAULT_MAX_EXECUTION_TIME: Duration = Duration::from_secs(5);
/// Default memory ceiling (128 MiB).
pub const DEFAULT_MAX_MEMORY_BYTES: u64 = 128 * 1024 * 1024;
/// The only runtime accepted.
pub const DEFAULT_RUNTIME: &str = "javascript";
/// Default gas budget for deployment test runs.
pub const DEFAULT_TEST_GAS_LIMIT: u64 = 1_000_000;

/// Control plane configuration.
///
/// Zero sizes and durations are replaced with the defaults, both when loading
/// from the environment and through [`Config::normalized`].
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Largest accepted function source, in bytes.
    pub max_function_size: usize,
    /// Execution time ceiling for invocations.
    pub max_execution_time: Duration,
    /// Memory ceiling for invocations.
    pub max_memory_bytes: u64,
    /// Whether functions may use the network.
    pub enable_network: bool,
    /// Whether functions may touch the filesystem.
    pub enable_file_io: bool,
    /// Runtime used when a create request leaves it empty.
    pub default_runtime: String,
    /// Gas budget for deployment test runs.
    pub test_gas_limit: u64,
    /// Background history pruning.
    pub history: HistoryConfig,
}

/// Settings for the history pruning worker.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryConfig {
    /// Whether the pruner runs.
    pub prune_enabled: bool,
    /// Time between pruning sweeps.
    pub prune_interval: Duration,
    /// Records older than this are removed.
    pub max_age: Duration,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            prune_enabled: false,
            prune_interval: Duration::from_secs(3600), // 1 hour
            max_age: Duration::from_secs(24 * 3600),   // 24 hours
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_function_size: DEFAULT_MAX_FUNCTION_SIZE,
            max_execution_time: DEFAULT_MAX_EXECUTION_TIME,
            max_memory_bytes: DEFAULT_MAX_MEMORY_BYTES,
            enable_network: false,
            enable_file_io: false,
            default_runtime: DEFAULT_RUNTIME.to_string(),
            test_gas_limit: DEFAULT_TEST_GAS_LIMIT,
            history: HistoryConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `RUNLET_MAX_FUNCTION_SIZE`: bytes (default: 1048576)
    /// - `RUNLET_MAX_EXECUTION_TIME_MS`: milliseconds (default: 5000)
    /// - `RUNLET_MAX_MEMORY_BYTES`: bytes (default: 134217728)
    /// - `RUNLET_ENABLE_NETWORK`: "true" or "1" to enable (default: false)
    /// - `RUNLET_ENABLE_FILE_IO`: "true" or "1" to enable (default: false)
    /// - `RUNLET_DEFAULT_RUNTIME`: runtime name (default: javascript)
    /// - `RUNLET_TEST_GAS_LIMIT`: gas units (default: 1000000)
    /// - `RUNLET_HISTORY_PRUNE_ENABLED`: "true" or "1" to enable (default: false)
    /// - `RUNLET_HISTORY_PRUNE_INTERVAL_SECS`: seconds (default: 3600)
    /// - `RUNLET_HISTORY_MAX_AGE_SECS`: seconds (default: 86400)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let max_function_size =
            parse_var("RUNLET_MAX_FUNCTION_SIZE")?.unwrap_or(defaults.max_function_size);

        let max_execution_time = parse_var::<u64>("RUNLET_MAX_EXECUTION_TIME_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.max_execution_time);

        let max_memory_bytes =
            parse_var("RUNLET_MAX_MEMORY_BYTES")?.unwrap_or(defaults.max_memory_bytes);

        let enable_network = flag_var("RUNLET_ENABLE_NETWORK");
        let enable_file_io = flag_var("RUNLET_ENABLE_FILE_IO");

        let default_runtime = std::env::var("RUNLET_DEFAULT_RUNTIME")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.default_runtime);

        let test_gas_limit = parse_var("RUNLET_TEST_GAS_LIMIT")?.unwrap_or(defaults.test_gas_limit);

        let history = HistoryConfig {
            prune_enabled: flag_var("RUNLET_HISTORY_PRUNE_ENABLED"),
            prune_interval: parse_var::<u64>("RUNLET_HISTORY_PRUNE_INTERVAL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.history.prune_interval),
            max_age: parse_var::<u64>("RUNLET_HISTORY_MAX_AGE_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.history.max_age),
        };

        Ok(Self {
            max_function_size,
            max_execution_time,
            max_memory_bytes,
            enable_network,
            enable_file_io,
            default_runtime,
            test_gas_limit,
            history,
        }
        .normalized())
    }

    /// Replace zero limits with their defaults.
    pub fn normalized(mut self) -> Self {
        let defaults = Self::default();
        if self.max_function_size == 0 {
            self.max_function_size = defaults.max_function_size;
        }
        if self.max_execution_time.is_zero() {
            self.max_execution_time = defaults.max_execution_time;
        }
        if self.max_memory_bytes == 0 {
            self.max_memory_bytes = defaults.max_memory_bytes;
        }
        if self.default_runtime.trim().is_empty() {
            self.default_runtime = defaults.default_runtime;
        }
        if self.test_gas_limit == 0 {
            self.test_gas_limit = defaults.test_gas_limit;
        }
        if self.history.prune_interval.is_zero() {
            self.history.prune_interval = defaults.history.prune_interval;
        }
        if self.history.max_age.is_zero() {
            self.history.max_age = defaults.history.max_age;
        }
        self
    }
}

fn flag_var(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false)
}

fn parse_var<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(value) => {
            let parsed = value.trim().parse::<T>();
            parsed
                .map(Some)
                .map_err(|_| ConfigError::Invalid { name, value })
        }
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => Err(ConfigError::Invalid {
            name,
            value: "<non-unicode>".to_string(),
        }),
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// A setting could not be parsed.
    #[error("Invalid value for {name}: {value:?}")]
    Invalid {
        /// Variable name.
        name: &'static str,
        /// Raw value.
        value: String,
    },
}
