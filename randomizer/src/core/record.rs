//! Run record model and its transition rules.
//!
//! The record is always persisted in full. What a command is allowed to show
//! is decided by projection ([`BlindRunView`]), never by dropping fields from
//! storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::types::{RunMode, RunStatus, Tactic, ToolStep};

/// Durable state of a single simulation run (`runs/<run-id>.json`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunRecord {
    pub run_id: String,
    /// Selected technique. Hidden from `run` output until revealed.
    pub technique_id: String,
    pub account: String,
    pub region: String,
    pub mode: RunMode,
    pub tactic_filter: Option<Tactic>,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub warmup_at: Option<DateTime<Utc>>,
    pub detonated_at: Option<DateTime<Utc>>,
    pub cleaned_at: Option<DateTime<Utc>>,
    /// Last error when `status = failed`.
    pub error: Option<String>,
    pub failed_at: Option<DateTime<Utc>>,
    /// Status the run had reached before it failed.
    pub failed_from: Option<RunStatus>,
    pub cleanup_report: Option<CleanupReport>,
}

/// Fields supplied by the orchestrator when a run is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRun {
    pub run_id: String,
    pub technique_id: String,
    pub account: String,
    pub region: String,
    pub mode: RunMode,
    pub tactic_filter: Option<Tactic>,
    pub started_at: DateTime<Utc>,
}

impl RunRecord {
    pub fn new(fields: NewRun) -> Self {
        Self {
            run_id: fields.run_id,
            technique_id: fields.technique_id,
            account: fields.account,
            region: fields.region,
            mode: fields.mode,
            tactic_filter: fields.tactic_filter,
            status: RunStatus::Started,
            started_at: fields.started_at,
            warmup_at: None,
            detonated_at: None,
            cleaned_at: None,
            error: None,
            failed_at: None,
            failed_from: None,
            cleanup_report: None,
        }
    }

    /// Apply a change, enforcing monotonic status transitions.
    pub fn apply(&mut self, change: RunUpdate) -> Result<(), TransitionError> {
        match change {
            RunUpdate::Advance { status, at } => {
                if status == RunStatus::Failed || !self.status.can_transition_to(status) {
                    return Err(self.transition_error(status));
                }
                match status {
                    RunStatus::WarmupComplete => self.warmup_at = Some(at),
                    RunStatus::Detonated => self.detonated_at = Some(at),
                    RunStatus::Cleaned => self.cleaned_at = Some(at),
                    RunStatus::Started | RunStatus::Failed => {}
                }
                self.status = status;
            }
            RunUpdate::Fail { error, at } => {
                if !self.status.can_transition_to(RunStatus::Failed) {
                    return Err(self.transition_error(RunStatus::Failed));
                }
                self.failed_from = Some(self.status);
                self.failed_at = Some(at);
                self.error = Some(error);
                self.status = RunStatus::Failed;
            }
            RunUpdate::CleanupAttempt { report } => {
                // A failed run keeps its status; a clean attempt is still worth a timestamp.
                if self.status == RunStatus::Failed && report.succeeded() {
                    self.cleaned_at = Some(report.attempted_at);
                }
                self.cleanup_report = Some(report);
            }
        }
        Ok(())
    }

    fn transition_error(&self, to: RunStatus) -> TransitionError {
        TransitionError {
            from: self.status,
            to,
        }
    }
}

/// A change to a persisted run record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunUpdate {
    /// Move one step along the success path and stamp the matching timestamp.
    Advance { status: RunStatus, at: DateTime<Utc> },
    /// Enter the absorbing `failed` state.
    Fail { error: String, at: DateTime<Utc> },
    /// Record the outcome of a revert + cleanup attempt without changing status.
    CleanupAttempt { report: CleanupReport },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionError {
    pub from: RunStatus,
    pub to: RunStatus,
}

/// Outcome of one tool step during cleanup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "message", rename_all = "lowercase")]
pub enum StepOutcome {
    Ok,
    Error(String),
}

impl StepOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, StepOutcome::Ok)
    }
}

/// Both halves of a cleanup are always attempted; this keeps each result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub revert: StepOutcome,
    pub cleanup: StepOutcome,
    pub attempted_at: DateTime<Utc>,
}

impl CleanupReport {
    pub fn succeeded(&self) -> bool {
        self.revert.is_ok() && self.cleanup.is_ok()
    }

    pub fn outcome(&self, step: ToolStep) -> Option<&StepOutcome> {
        match step {
            ToolStep::Revert => Some(&self.revert),
            ToolStep::Cleanup => Some(&self.cleanup),
            ToolStep::Warmup | ToolStep::Detonate => None,
        }
    }

    /// One-line summary naming which steps succeeded.
    pub fn summary(&self) -> String {
        [ToolStep::Revert, ToolStep::Cleanup]
            .into_iter()
            .filter_map(|step| {
                self.outcome(step).map(|outcome| match outcome {
                    StepOutcome::Ok => format!("{step}=ok"),
                    StepOutcome::Error(message) => format!("{step}=failed ({message})"),
                })
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// The part of a record that `run` is allowed to print. Carries no technique id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlindRunView {
    pub run_id: String,
    pub account: String,
    pub region: String,
    pub mode: RunMode,
    pub tactic_filter: Option<Tactic>,
    pub status: RunStatus,
}

impl From<&RunRecord> for BlindRunView {
    fn from(record: &RunRecord) -> Self {
        Self {
            run_id: record.run_id.clone(),
            account: record.account.clone(),
            region: record.region.clone(),
            mode: record.mode,
            tactic_filter: record.tactic_filter,
            status: record.status,
        }
    }
}
