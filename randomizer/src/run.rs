//! Orchestration for `randomizer run`.
//!
//! Takes the lock, verifies the account, picks a technique blind, then walks
//! the run through warmup, dwell, detonation and (in validate mode) cleanup.
//! Once the record exists every failure is persisted as `failed` before the
//! lock is released.

use std::ops::RangeInclusive;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use rand::Rng;
use tracing::{debug, info, instrument, warn};

use crate::cleanup::revert_and_clean;
use crate::core::ids::{generate_run_id, validate_account, validate_region};
use crate::core::record::{BlindRunView, NewRun, RunRecord, RunUpdate};
use crate::core::selector::{pick_dwell_secs, select_technique};
use crate::core::types::{RunMode, RunStatus, Tactic, ToolStep};
use crate::error::{RandomizerError, find_domain_error};
use crate::io::account::{AccountVerifier, verify_account};
use crate::io::catalog::Catalog;
use crate::io::config::RandomizerConfig;
use crate::io::history::HistoryStore;
use crate::io::init::StatePaths;
use crate::io::interrupt::CancelToken;
use crate::io::lock::{LockManager, LockOwner, LockPurpose};
use crate::io::run_store::RunStore;
use crate::io::tool::{SimulationTool, StepRequest};

/// Error recorded when the operator interrupts a run.
pub const INTERRUPTED_BY_OPERATOR: &str = "interrupted by operator";

/// Operator inputs for one run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub account: String,
    pub region: String,
    pub mode: RunMode,
    pub tactic: Option<Tactic>,
    /// Dwell between warmup and detonation, in seconds.
    pub dwell_secs: RangeInclusive<u64>,
    /// Skip recently detonated techniques when alternatives exist.
    pub avoid_recent: bool,
    /// Overrides `history.avoid_last_n`.
    pub avoid_last_n: Option<usize>,
}

/// Collaborators for a run. Everything is borrowed so tests can inspect fakes afterwards.
pub struct RunDeps<'a> {
    pub paths: &'a StatePaths,
    pub config: &'a RandomizerConfig,
    pub tool: &'a dyn SimulationTool,
    pub account: &'a dyn AccountVerifier,
    pub locks: &'a LockManager,
    pub cancel: &'a CancelToken,
}

/// Progress notifications, safe to print: none of them names the technique.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    Started(BlindRunView),
    Dwelling(u64),
    StepSucceeded(ToolStep),
}

/// Blind summary of a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub view: BlindRunView,
    pub dwell_secs: u64,
}

/// Execute a randomized run end to end.
#[instrument(skip_all, fields(mode = %request.mode, tactic = ?request.tactic))]
pub fn run_simulation<R, F>(
    deps: &RunDeps<'_>,
    request: &RunRequest,
    rng: &mut R,
    mut on_event: F,
) -> Result<RunSummary>
where
    R: Rng + ?Sized,
    F: FnMut(&RunEvent),
{
    validate_request(deps.config, request)?;

    let run_id = generate_run_id(Utc::now(), rng);
    let handle = deps
        .locks
        .acquire(LockOwner::current(&run_id, LockPurpose::Run))?;

    let store = RunStore::open(deps.paths)?;
    let history = HistoryStore::new(&deps.paths.history_path, deps.config.history.capacity);
    let result = (|| -> Result<RunSummary> {
        if deps.cancel.is_cancelled() {
            return Err(RandomizerError::Interrupted { run_id: None }.into());
        }
        verify_account(deps.account, &request.account)?;
        let technique_id = pick_technique(deps, request, &history, rng)?;
        let dwell_secs = pick_dwell_secs(&request.dwell_secs, rng);

        let record = store.create(NewRun {
            run_id: run_id.clone(),
            technique_id,
            account: request.account.clone(),
            region: request.region.clone(),
            mode: request.mode,
            tactic_filter: request.tactic,
            started_at: Utc::now(),
        })?;
        on_event(&RunEvent::Started(BlindRunView::from(&record)));

        let finished = advance(deps, &store, &history, record, dwell_secs, &mut on_event)
            .inspect_err(|err| mark_failed(&store, &run_id, err))?;
        Ok(RunSummary {
            view: BlindRunView::from(&finished),
            dwell_secs,
        })
    })();

    let released = handle.release();
    let summary = result?;
    released?;
    Ok(summary)
}

fn validate_request(config: &RandomizerConfig, request: &RunRequest) -> Result<()> {
    validate_account(&request.account)?;
    validate_region(&request.region)?;
    let (min, max) = (*request.dwell_secs.start(), *request.dwell_secs.end());
    if min > max {
        return Err(RandomizerError::InvalidInput(format!(
            "--dwell-min ({min}) must not exceed --dwell-max ({max})"
        ))
        .into());
    }
    if max > config.max_dwell_secs() {
        return Err(RandomizerError::InvalidInput(format!(
            "--dwell-max ({max}) would outlast the lock stale threshold; the limit is {}s",
            config.max_dwell_secs()
        ))
        .into());
    }
    Ok(())
}

fn pick_technique<R: Rng + ?Sized>(
    deps: &RunDeps<'_>,
    request: &RunRequest,
    history: &HistoryStore,
    rng: &mut R,
) -> Result<String> {
    let eligible = Catalog::new(deps.tool).list(request.tactic)?;
    let avoid_last_n = request
        .avoid_last_n
        .unwrap_or(deps.config.history.avoid_last_n);
    let recent = history.recent(avoid_last_n);
    let technique = select_technique(&eligible, &recent, request.avoid_recent, rng).ok_or(
        RandomizerError::NoEligibleTechnique {
            tactic: request.tactic,
        },
    )?;
    debug!(eligible = eligible.len(), recent = recent.len(), "technique selected");
    Ok(technique.id.clone())
}

/// Walk a created record through the remaining states.
fn advance<F: FnMut(&RunEvent)>(
    deps: &RunDeps<'_>,
    store: &RunStore,
    history: &HistoryStore,
    record: RunRecord,
    dwell_secs: u64,
    on_event: &mut F,
) -> Result<RunRecord> {
    let run_id = record.run_id.clone();
    let step_request = |step: ToolStep| StepRequest {
        technique_id: record.technique_id.clone(),
        region: record.region.clone(),
        log_path: Some(
            deps.paths
                .run_logs_dir(&run_id)
                .join(format!("{step}.log")),
        ),
    };
    let run_step = |step: ToolStep| -> Result<()> {
        if deps.cancel.is_cancelled() {
            return Err(interrupted(&run_id));
        }
        deps.tool
            .run_step(step, &step_request(step))
            .map_err(|failure| RandomizerError::ToolFailure {
                run_id: run_id.clone(),
                step: failure.step,
                message: failure.message,
            })?;
        Ok(())
    };

    run_step(ToolStep::Warmup)?;
    store.update(
        &run_id,
        RunUpdate::Advance {
            status: RunStatus::WarmupComplete,
            at: Utc::now(),
        },
    )?;
    on_event(&RunEvent::StepSucceeded(ToolStep::Warmup));

    if dwell_secs > 0 {
        on_event(&RunEvent::Dwelling(dwell_secs));
        info!(dwell_secs, "dwelling before detonation");
        if !deps.cancel.sleep(Duration::from_secs(dwell_secs)) {
            return Err(interrupted(&run_id));
        }
    }

    run_step(ToolStep::Detonate)?;
    let detonated = store.update(
        &run_id,
        RunUpdate::Advance {
            status: RunStatus::Detonated,
            at: Utc::now(),
        },
    )?;
    on_event(&RunEvent::StepSucceeded(ToolStep::Detonate));
    if let Err(err) = history.record(&detonated.technique_id) {
        warn!(err = %format!("{err:#}"), "failed to update history");
    }

    if detonated.mode == RunMode::Train {
        return Ok(detonated);
    }
    let cleaned = revert_and_clean(deps.paths, store, deps.tool, &detonated)?;
    on_event(&RunEvent::StepSucceeded(ToolStep::Cleanup));
    Ok(cleaned)
}

fn interrupted(run_id: &str) -> anyhow::Error {
    RandomizerError::Interrupted {
        run_id: Some(run_id.to_string()),
    }
    .into()
}

/// Best-effort `failed` write. Records that already reached a terminal state are left alone.
fn mark_failed(store: &RunStore, run_id: &str, err: &anyhow::Error) {
    let current = match store.get(run_id) {
        Ok(record) => record,
        Err(read_err) => {
            warn!(err = %format!("{read_err:#}"), "cannot read run record to mark it failed");
            return;
        }
    };
    if current.status.is_terminal() {
        return;
    }
    let note = failure_note(err);
    if let Err(write_err) = store.update(
        run_id,
        RunUpdate::Fail {
            error: note,
            at: Utc::now(),
        },
    ) {
        warn!(err = %format!("{write_err:#}"), "failed to mark run failed");
    }
}

fn failure_note(err: &anyhow::Error) -> String {
    match find_domain_error(err) {
        Some(RandomizerError::ToolFailure { step, message, .. }) => {
            format!("{step} failed: {message}")
        }
        Some(RandomizerError::Interrupted { .. }) => INTERRUPTED_BY_OPERATOR.to_string(),
        _ => format!("{err:#}"),
    }
}
