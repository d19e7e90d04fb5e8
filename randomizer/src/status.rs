//! `randomizer status`: lock state, the tool's own state report and recent runs.

use anyhow::Result;
use tracing::warn;

use crate::core::record::RunRecord;
use crate::io::lock::{LockManager, LockState};
use crate::io::run_store::RunStore;
use crate::io::tool::SimulationTool;

pub const RECENT_RUNS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub lock: LockState,
    /// The tool's status output, or why it could not be obtained.
    pub tool_status: Result<String, String>,
    pub recent_runs: Vec<RunRecord>,
}

/// Gather status. A failing tool does not fail the command.
pub fn collect_status(
    store: &RunStore,
    locks: &LockManager,
    tool: &dyn SimulationTool,
) -> Result<StatusReport> {
    let lock = locks.inspect()?;
    let tool_status = tool.status().map_err(|err| {
        warn!(err = %format!("{err:#}"), "tool status unavailable");
        format!("{err:#}")
    });
    let recent_runs = store.list(RECENT_RUNS)?;
    Ok(StatusReport {
        lock,
        tool_status,
        recent_runs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{RunMode, RunStatus};
    use crate::io::lock::{LockOwner, LockPurpose};
    use crate::test_support::{ScriptedTool, TestState};

    #[test]
    fn reports_free_lock_and_recent_runs() {
        let state = TestState::new();
        state.seed_run("20240115T120000Z-0a1b2c3d", RunMode::Train, RunStatus::Detonated);
        let report =
            collect_status(&state.store(), &state.locks(), &ScriptedTool::default()).expect("status");
        assert_eq!(report.lock, LockState::Free);
        assert!(report.tool_status.is_ok());
        assert_eq!(report.recent_runs.len(), 1);
    }

    #[test]
    fn reports_the_holder_of_a_live_lock() {
        let state = TestState::new();
        let locks = state.locks();
        let _held = locks
            .acquire(LockOwner::current("20240115T120000Z-0a1b2c3d", LockPurpose::Run))
            .expect("acquire");
        let report = collect_status(&state.store(), &locks, &ScriptedTool::default()).expect("status");
        match report.lock {
            LockState::Held { owner, stale, .. } => {
                assert_eq!(owner.expect("owner").pid, std::process::id());
                assert!(!stale);
            }
            LockState::Free => panic!("expected held lock"),
        }
    }
}
