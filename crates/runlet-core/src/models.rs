// Copyright (C) 2025 The runlet Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Function, version, execution and permission records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

/// Free-form function metadata.
pub type Metadata = Map<String, Value>;

/// A pre-authenticated caller identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principal(String);

impl Principal {
    /// Wrap an identity string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identity as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The identity bytes used when deriving function IDs.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Principal {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for Principal {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Derive the function ID for `(owner, name)`: the first 16 hex characters of
/// `sha256(owner_bytes ‖ name_bytes)`.
pub fn function_id(owner: &Principal, name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(owner.as_bytes());
    hasher.update(name.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

/// Lifecycle status of a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FunctionStatus {
    /// Deployed and invocable.
    Active,
    /// Deployed without activation.
    Disabled,
    /// Validation or test run failed.
    Error,
    /// Deployment in progress.
    Deploying,
    /// Update in progress.
    Updating,
    /// Rollback in progress.
    Rollback,
}

impl FunctionStatus {
    /// Returns the string representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Disabled => "disabled",
            Self::Error => "error",
            Self::Deploying => "deploying",
            Self::Updating => "updating",
            Self::Rollback => "rollback",
        }
    }

    /// Only active functions may be invoked.
    pub fn is_invocable(&self) -> bool {
        matches!(self, Self::Active)
    }
}

impl fmt::Display for FunctionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FunctionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "disabled" => Ok(Self::Disabled),
            "error" => Ok(Self::Error),
            "deploying" => Ok(Self::Deploying),
            "updating" => Ok(Self::Updating),
            "rollback" => Ok(Self::Rollback),
            _ => Err(format!("Unknown function status: {}", s)),
        }
    }
}

/// A stored function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    /// Derived from owner and name, see [`function_id`].
    pub id: String,
    /// Name, unique per owner.
    pub name: String,
    /// Human readable description.
    pub description: String,
    /// Owning principal.
    pub owner: Principal,
    /// Current source.
    pub code: String,
    /// Runtime name.
    pub runtime: String,
    /// Lifecycle status.
    pub status: FunctionStatus,
    /// Attached trigger IDs.
    pub triggers: Vec<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last change to any attribute.
    pub updated_at: DateTime<Utc>,
    /// Completion time of the latest execution.
    pub last_executed: Option<DateTime<Utc>>,
    /// Free-form metadata.
    pub metadata: Metadata,
}

/// Parameters for registering a new function.
///
/// ```
/// use runlet_core::{FunctionStatus, NewFunction, Principal};
///
/// let new = NewFunction::new(Principal::new("alice"), "hello", "function main() { return 1; }")
///     .description("Says hello")
///     .status(FunctionStatus::Disabled);
/// assert_eq!(new.status, FunctionStatus::Disabled);
/// assert_eq!(new.runtime, "");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct NewFunction {
    /// Owning principal.
    pub owner: Principal,
    /// Function name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Source code.
    pub code: String,
    /// Runtime; empty selects the configured default.
    pub runtime: String,
    /// Initial status.
    pub status: FunctionStatus,
}

impl NewFunction {
    /// Start a new active function with an empty description.
    pub fn new(owner: Principal, name: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            owner,
            name: name.into(),
            description: String::new(),
            code: code.into(),
            runtime: String::new(),
            status: FunctionStatus::Active,
        }
    }

    /// Set the description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the runtime.
    pub fn runtime(mut self, runtime: impl Into<String>) -> Self {
        self.runtime = runtime.into();
        self
    }

    /// Set the initial status.
    pub fn status(mut self, status: FunctionStatus) -> Self {
        self.status = status;
        self
    }
}

/// Patch applied by [`FunctionRegistry::update_function`](crate::FunctionRegistry::update_function).
/// Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FunctionUpdate {
    /// New description.
    pub description: Option<String>,
    /// New source; appends a version.
    pub code: Option<String>,
    /// New status.
    pub status: Option<FunctionStatus>,
    /// Replacement metadata.
    pub metadata: Option<Metadata>,
    /// Replacement trigger IDs.
    pub triggers: Option<Vec<String>>,
}

impl FunctionUpdate {
    /// An empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the code.
    pub fn code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Set the status.
    pub fn status(mut self, status: FunctionStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Replace the metadata.
    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Replace the triggers.
    pub fn triggers(mut self, triggers: Vec<String>) -> Self {
        self.triggers = Some(triggers);
        self
    }

    /// True when no field is set.
    pub fn is_empty(&self) -> bool {
        self.description.is_none()
            && self.code.is_none()
            && self.status.is_none()
            && self.metadata.is_none()
            && self.triggers.is_none()
    }
}

/// An immutable snapshot in a function's version ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionVersion {
    /// Owning function.
    pub function_id: String,
    /// Starts at 1, increases by one per code change.
    pub version: u32,
    /// Code at this version.
    pub code: String,
    /// Description at this version.
    pub description: String,
    /// Runtime at this version.
    pub runtime: String,
    /// Principal that produced the version.
    pub created_by: Principal,
    /// When the version was appended.
    pub created_at: DateTime<Utc>,
    /// Function status when the version was appended.
    pub status: FunctionStatus,
}

/// Outcome of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    /// Dispatched, no outcome yet.
    Running,
    /// Finished without error.
    Completed,
    /// Finished with an error.
    Failed,
}

impl ExecutionStatus {
    /// Returns the string representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// True for `completed` and `failed`.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One invocation attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionExecution {
    /// Execution ID.
    pub id: Uuid,
    /// Invoked function.
    pub function_id: String,
    /// Current status.
    pub status: ExecutionStatus,
    /// Dispatch time.
    pub started_at: DateTime<Utc>,
    /// Set once terminal.
    pub completed_at: Option<DateTime<Utc>>,
    /// Wall time in milliseconds.
    pub duration_ms: u64,
    /// Peak memory reported by the sandbox.
    pub memory_used_bytes: u64,
    /// Invocation parameters.
    pub parameters: Value,
    /// Value returned by the function.
    pub result: Option<Value>,
    /// Captured log lines.
    pub logs: Vec<String>,
    /// Failure description.
    pub error: Option<String>,
    /// Invoking principal.
    pub invoked_by: Principal,
    /// Gas charged for the run.
    pub cost: u64,
    /// Caller supplied trace ID.
    pub trace_id: Option<String>,
}

impl FunctionExecution {
    /// A fresh `running` execution.
    pub fn start(invocation: &FunctionInvocation) -> Self {
        Self {
            id: Uuid::new_v4(),
            function_id: invocation.function_id.clone(),
            status: ExecutionStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: 0,
            memory_used_bytes: 0,
            parameters: invocation.parameters.clone(),
            result: None,
            logs: Vec::new(),
            error: None,
            invoked_by: invocation.caller.clone(),
            cost: 0,
            trace_id: invocation.trace_id.clone(),
        }
    }

    /// Mark as failed now, computing the duration from the start time.
    pub fn fail(&mut self, error: impl Into<String>) {
        let now = Utc::now();
        self.status = ExecutionStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(now);
        self.duration_ms = (now - self.started_at).num_milliseconds().max(0) as u64;
    }
}

/// Access control for one function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionPermissions {
    /// Function the record belongs to.
    pub function_id: String,
    /// Always equal to the function's owner.
    pub owner: Principal,
    /// Principals allowed to invoke, and to update unless read-only.
    pub allowed_principals: Vec<Principal>,
    /// Anyone may invoke.
    pub public: bool,
    /// Allow-listed principals may not update.
    pub read_only: bool,
}

impl FunctionPermissions {
    /// Private, writable permissions for a new function.
    pub fn private(function_id: impl Into<String>, owner: Principal) -> Self {
        Self {
            function_id: function_id.into(),
            owner,
            allowed_principals: Vec::new(),
            public: false,
            read_only: false,
        }
    }

    /// True if `principal` is on the allow-list.
    pub fn is_allowed(&self, principal: &Principal) -> bool {
        self.allowed_principals.contains(principal)
    }

    /// Owner, public or allow-listed callers may invoke.
    pub fn can_invoke(&self, principal: &Principal) -> bool {
        self.owner == *principal || self.public || self.is_allowed(principal)
    }
}

/// A request to run a function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionInvocation {
    /// Target function.
    pub function_id: String,
    /// Parameters passed to `main`.
    pub parameters: Value,
    /// Return before the run completes.
    pub is_async: bool,
    /// Invoking principal.
    pub caller: Principal,
    /// Optional trace ID.
    pub trace_id: Option<String>,
}

impl FunctionInvocation {
    /// A synchronous invocation with empty parameters.
    pub fn new(function_id: impl Into<String>, caller: Principal) -> Self {
        Self {
            function_id: function_id.into(),
            parameters: Value::Object(Map::new()),
            is_async: false,
            caller,
            trace_id: None,
        }
    }

    /// Set the parameters.
    pub fn parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    /// Dispatch in the background.
    pub fn asynchronous(mut self) -> Self {
        self.is_async = true;
        self
    }

    /// Set the trace ID.
    pub fn trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }
}
