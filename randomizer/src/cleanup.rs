//! Orchestration for `randomizer cleanup`, plus the revert + cleanup sequence
//! shared with validate-mode runs.

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::core::record::{CleanupReport, RunRecord, RunUpdate, StepOutcome};
use crate::core::types::{RunStatus, ToolStep};
use crate::error::{RandomizerError, find_domain_error};
use crate::io::init::StatePaths;
use crate::io::lock::{LockHandle, LockManager, LockOwner, LockPurpose, LockState};
use crate::io::run_store::RunStore;
use crate::io::tool::{SimulationTool, StepRequest};

/// Error recorded on runs that were left before detonation by a dead process.
pub const ABANDONED_BEFORE_DETONATION: &str = "abandoned before detonation";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    /// Nothing to do; the record was not touched.
    AlreadyClean(RunRecord),
    /// Both revert and cleanup succeeded.
    Cleaned(RunRecord),
}

/// Revert and clean up the technique of `run_id`.
///
/// At most one cleanup of a given run proceeds at a time, even when another
/// run holds the main lock and this one runs without it.
#[instrument(skip_all, fields(run_id = %run_id))]
pub fn cleanup_run(
    paths: &StatePaths,
    store: &RunStore,
    tool: &dyn SimulationTool,
    locks: &LockManager,
    run_id: &str,
) -> Result<CleanupOutcome> {
    let record = store.get(run_id)?;
    if is_clean(&record) {
        return Ok(CleanupOutcome::AlreadyClean(record));
    }

    let run_guard = locks
        .at(paths.run_cleanup_lock_path(run_id))
        .acquire(LockOwner::current(run_id, LockPurpose::Cleanup))?;
    let result = cleanup_exclusive(paths, store, tool, locks, run_id);
    release(Some(run_guard));
    result
}

fn cleanup_exclusive(
    paths: &StatePaths,
    store: &RunStore,
    tool: &dyn SimulationTool,
    locks: &LockManager,
    run_id: &str,
) -> Result<CleanupOutcome> {
    let guard = serialize_with_runs(locks, run_id)?;
    // Re-read under the lock; a concurrent cleanup may have finished first.
    let mut record = store.get(run_id)?;
    if is_clean(&record) {
        release(guard);
        return Ok(CleanupOutcome::AlreadyClean(record));
    }

    if matches!(record.status, RunStatus::Started | RunStatus::WarmupComplete) {
        warn!(status = %record.status, "run never detonated, marking it failed before cleanup");
        record = store.update(
            run_id,
            RunUpdate::Fail {
                error: ABANDONED_BEFORE_DETONATION.to_string(),
                at: Utc::now(),
            },
        )?;
    }

    let result = revert_and_clean(paths, store, tool, &record);
    release(guard);
    result.map(CleanupOutcome::Cleaned)
}

/// Run revert then cleanup for a detonated or failed run and persist the outcome.
///
/// Both steps are always attempted. A detonated run becomes `cleaned` when both
/// succeed and `failed` otherwise; a failed run keeps its status and only gains
/// the report. Any step failure surfaces as [`RandomizerError::CleanupIncomplete`].
pub(crate) fn revert_and_clean(
    paths: &StatePaths,
    store: &RunStore,
    tool: &dyn SimulationTool,
    record: &RunRecord,
) -> Result<RunRecord> {
    let report = attempt_cleanup(paths, tool, record);
    let run_id = record.run_id.as_str();
    let mut updated = store.update(
        run_id,
        RunUpdate::CleanupAttempt {
            report: report.clone(),
        },
    )?;

    if report.succeeded() {
        if updated.status == RunStatus::Detonated {
            updated = store.update(
                run_id,
                RunUpdate::Advance {
                    status: RunStatus::Cleaned,
                    at: report.attempted_at,
                },
            )?;
        }
        info!(status = %updated.status, "cleanup complete");
        return Ok(updated);
    }

    let summary = report.summary();
    if updated.status != RunStatus::Failed {
        store.update(
            run_id,
            RunUpdate::Fail {
                error: format!("cleanup incomplete: {summary}"),
                at: report.attempted_at,
            },
        )?;
    }
    Err(RandomizerError::CleanupIncomplete {
        run_id: run_id.to_string(),
        summary,
    }
    .into())
}

fn attempt_cleanup(
    paths: &StatePaths,
    tool: &dyn SimulationTool,
    record: &RunRecord,
) -> CleanupReport {
    let outcome = |step: ToolStep| {
        let request = StepRequest {
            technique_id: record.technique_id.clone(),
            region: record.region.clone(),
            log_path: Some(
                paths
                    .run_logs_dir(&record.run_id)
                    .join(format!("{step}.log")),
            ),
        };
        match tool.run_step(step, &request) {
            Ok(()) => StepOutcome::Ok,
            Err(failure) => {
                warn!(step = %step, message = %failure.message, "cleanup step failed");
                StepOutcome::Error(failure.message)
            }
        }
    };
    let revert = outcome(ToolStep::Revert);
    let cleanup = outcome(ToolStep::Cleanup);
    CleanupReport {
        revert,
        cleanup,
        attempted_at: Utc::now(),
    }
}

fn is_clean(record: &RunRecord) -> bool {
    match record.status {
        RunStatus::Cleaned => true,
        RunStatus::Failed => record.cleaned_at.is_some(),
        RunStatus::Started | RunStatus::WarmupComplete | RunStatus::Detonated => false,
    }
}

/// Decide whether cleanup runs under the lock.
///
/// A live lock held for this same run means its process is still working on
/// it. A lock held by a different run does not block cleanup of this one.
fn serialize_with_runs(locks: &LockManager, run_id: &str) -> Result<Option<LockHandle>> {
    if let LockState::Held {
        owner: Some(owner),
        stale: false,
        ..
    } = locks.inspect()?
    {
        if owner.run_id == run_id {
            return Err(RandomizerError::LockHeld {
                pid: owner.pid,
                run_id: owner.run_id,
                acquired_at: owner.acquired_at.to_rfc3339(),
            }
            .into());
        }
        info!(holder = %owner.run_id, "lock held by another run, cleaning up without it");
        return Ok(None);
    }

    match locks.acquire(LockOwner::current(run_id, LockPurpose::Cleanup)) {
        Ok(handle) => Ok(Some(handle)),
        Err(err) => match find_domain_error(&err) {
            Some(RandomizerError::LockHeld { run_id: holder, .. }) if holder != run_id => {
                debug!(holder = %holder, "lock taken concurrently, cleaning up without it");
                Ok(None)
            }
            _ => Err(err),
        },
    }
}

fn release(guard: Option<LockHandle>) {
    if let Some(handle) = guard
        && let Err(err) = handle.release()
    {
        warn!(err = %format!("{err:#}"), "failed to release cleanup lock");
    }
}
