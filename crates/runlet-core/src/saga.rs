// Copyright (C) 2025 The runlet Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Saga runner for multi-step operations with partial compensation.
//!
//! A [`Saga`] is an ordered list of [`SagaStep`]s sharing a mutable context.
//! Each step declares a [`StepPolicy`]:
//!
//! - `BestEffort` failures are recorded as warnings and the saga continues.
//! - A `Fatal` failure stops the saga. Completed steps that declare a
//!   compensation are then compensated in reverse order (last step first).
//!
//! Compensation failures are recorded but never stop the remaining
//! compensations.

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::Error;

/// Failure policy of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepPolicy {
    /// Failure aborts the saga and triggers compensation.
    Fatal,
    /// Failure is recorded and the saga continues.
    BestEffort,
}

/// What a successful step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The step ran.
    Completed,
    /// The step had nothing to do.
    Skipped,
}

/// A step failure: the message recorded in the saga report and its cause.
#[derive(Debug, Clone)]
pub struct StepError {
    /// Human readable message, e.g. `Compilation failed: ...`.
    pub message: String,
    /// Underlying error.
    pub cause: Error,
}

impl StepError {
    /// Failure with an explicit message.
    pub fn new(message: impl Into<String>, cause: Error) -> Self {
        Self {
            message: message.into(),
            cause,
        }
    }
}

impl From<Error> for StepError {
    fn from(cause: Error) -> Self {
        Self {
            message: cause.to_string(),
            cause,
        }
    }
}

impl std::fmt::Display for StepError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// Compensation state of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CompensationState {
    /// The step has no compensation, or did not complete.
    None,
    /// The step completed; compensation runs if a later fatal step fails.
    Pending,
    /// Compensation is currently in progress.
    Triggered,
    /// Compensation completed successfully.
    Completed,
    /// Compensation failed.
    Failed,
}

impl CompensationState {
    /// Returns the string representation of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Pending => "pending",
            Self::Triggered => "triggered",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Execution state of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepState {
    /// Ran successfully.
    Completed,
    /// Had nothing to do.
    Skipped,
    /// Failed without stopping the saga.
    Failed,
    /// Failed and stopped the saga.
    Aborted,
}

/// Record of one step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepRecord {
    /// Step name.
    pub name: &'static str,
    /// Step policy.
    pub policy: StepPolicy,
    /// Execution state.
    pub state: StepState,
    /// Compensation state.
    pub compensation: CompensationState,
    /// Failure message, if the step or its compensation failed.
    pub error: Option<String>,
}

/// Trace of one saga run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SagaReport {
    /// Steps that were reached, in order.
    pub steps: Vec<StepRecord>,
    /// Messages of best-effort failures, in order.
    pub warnings: Vec<String>,
    /// Name of the fatal step, if the saga aborted.
    pub aborted_at: Option<&'static str>,
    /// Messages of failed compensations, in execution order.
    pub compensation_errors: Vec<String>,
}

impl SagaReport {
    /// Names of steps that completed.
    pub fn completed_steps(&self) -> Vec<&'static str> {
        self.steps
            .iter()
            .filter(|s| s.state == StepState::Completed)
            .map(|s| s.name)
            .collect()
    }

    /// True if a fatal step failed.
    pub fn is_aborted(&self) -> bool {
        self.aborted_at.is_some()
    }

    /// Number of compensations that ran successfully.
    pub fn compensated(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.compensation == CompensationState::Completed)
            .count()
    }

    /// Record of the named step.
    pub fn step(&self, name: &str) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.name == name)
    }
}

/// Outcome of a saga run.
#[derive(Debug)]
pub struct SagaRun {
    /// Step trace.
    pub report: SagaReport,
    /// The fatal failure, if the saga aborted.
    pub error: Option<StepError>,
}

/// One step of a saga over context `C`.
#[async_trait]
pub trait SagaStep<C: Send>: Send + Sync {
    /// Step name for reports and logs.
    fn name(&self) -> &'static str;

    /// Failure policy.
    fn policy(&self) -> StepPolicy;

    /// Run the step.
    async fn execute(&self, ctx: &mut C) -> Result<StepOutcome, StepError>;

    /// Whether [`compensate`](Self::compensate) undoes this step.
    fn has_compensation(&self) -> bool {
        false
    }

    /// Undo the step after a later fatal failure.
    async fn compensate(&self, _ctx: &mut C) -> Result<(), StepError> {
        Ok(())
    }
}

/// An ordered list of steps.
pub struct Saga<C: Send> {
    name: &'static str,
    steps: Vec<Box<dyn SagaStep<C>>>,
}

impl<C: Send> Saga<C> {
    /// An empty saga.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            steps: Vec::new(),
        }
    }

    /// Append a step.
    pub fn step(mut self, step: impl SagaStep<C> + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// True if the saga has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run every step against `ctx`.
    pub async fn run(&self, ctx: &mut C) -> SagaRun {
        let mut report = SagaReport::default();

        for (index, step) in self.steps.iter().enumerate() {
            let policy = step.policy();
            match step.execute(ctx).await {
                Ok(outcome) => {
                    debug!(saga = self.name, step = step.name(), ?outcome, "Saga step finished");
                    let (state, compensation) = match outcome {
                        StepOutcome::Completed if step.has_compensation() => {
                            (StepState::Completed, CompensationState::Pending)
                        }
                        StepOutcome::Completed => (StepState::Completed, CompensationState::None),
                        StepOutcome::Skipped => (StepState::Skipped, CompensationState::None),
                    };
                    report.steps.push(StepRecord {
                        name: step.name(),
                        policy,
                        state,
                        compensation,
                        error: None,
                    });
                }
                Err(err) if policy == StepPolicy::BestEffort => {
                    warn!(
                        saga = self.name,
                        step = step.name(),
                        error = %err,
                        "Saga step failed, continuing"
                    );
                    report.warnings.push(err.message.clone());
                    report.steps.push(StepRecord {
                        name: step.name(),
                        policy,
                        state: StepState::Failed,
                        compensation: CompensationState::None,
                        error: Some(err.message),
                    });
                }
                Err(err) => {
                    warn!(
                        saga = self.name,
                        step = step.name(),
                        error = %err,
                        "Saga step failed, aborting"
                    );
                    report.steps.push(StepRecord {
                        name: step.name(),
                        policy,
                        state: StepState::Aborted,
                        compensation: CompensationState::None,
                        error: Some(err.message.clone()),
                    });
                    report.aborted_at = Some(step.name());
                    self.compensate(ctx, index, &mut report).await;
                    return SagaRun {
                        report,
                        error: Some(err),
                    };
                }
            }
        }

        SagaRun {
            report,
            error: None,
        }
    }

    /// Compensate completed steps before `failed_index`, last first.
    async fn compensate(&self, ctx: &mut C, failed_index: usize, report: &mut SagaReport) {
        let pending: Vec<usize> = report
            .steps
            .iter()
            .enumerate()
            .filter(|(_, record)| record.compensation == CompensationState::Pending)
            .map(|(position, _)| position)
            .collect();

        if pending.is_empty() {
            debug!(saga = self.name, "No pending compensations to trigger");
            return;
        }

        info!(
            saga = self.name,
            count = pending.len(),
            "Triggering compensation"
        );

        for position in pending.into_iter().rev() {
            // Records and steps are index aligned up to the failed step.
            debug_assert!(position < failed_index);
            let step = &self.steps[position];
            report.steps[position].compensation = CompensationState::Triggered;

            match step.compensate(ctx).await {
                Ok(()) => {
                    info!(saga = self.name, step = step.name(), "Step compensated");
                    report.steps[position].compensation = CompensationState::Completed;
                }
                Err(err) => {
                    warn!(
                        saga = self.name,
                        step = step.name(),
                        error = %err,
                        "Compensation failed"
                    );
                    report.steps[position].compensation = CompensationState::Failed;
                    report.steps[position].error = Some(err.message.clone());
                    report.compensation_errors.push(err.message);
                }
            }
        }
    }
}
