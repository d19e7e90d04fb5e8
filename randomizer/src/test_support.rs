//! Test-only fakes and fixtures for the randomizer.

use std::cell::{Cell, RefCell};

use anyhow::{Result, anyhow};
use chrono::{Duration, TimeZone, Utc};

use crate::core::record::{NewRun, RunRecord, RunUpdate};
use crate::core::types::{RunMode, RunStatus, Technique, ToolStep};
use crate::io::account::AccountVerifier;
use crate::io::config::RandomizerConfig;
use crate::io::history::HistoryStore;
use crate::io::init::{InitOptions, StatePaths, init_state};
use crate::io::interrupt::CancelToken;
use crate::io::lock::{LockManager, ProcessProbe};
use crate::io::run_store::RunStore;
use crate::io::tool::{SimulationTool, StepRequest, ToolFailure};

pub const ACCOUNT: &str = "123456789012";
pub const REGION: &str = "us-east-1";

/// Technique with a deterministic name; the id must be `<provider>.<tactic>.<name>`.
pub fn technique(id: &str) -> Technique {
    let name = id.rsplit('.').next().unwrap_or(id).replace('-', " ");
    Technique::from_id(id, &name).expect("technique id with a known tactic")
}

/// A small catalog spanning a few tactics.
pub const DEFAULT_CATALOG: &[&str] = &[
    "aws.credential-access.ec2-get-password-data",
    "aws.defense-evasion.cloudtrail-stop",
    "aws.discovery.ec2-enumerate-from-instance",
    "aws.persistence.iam-backdoor-user",
    "aws.persistence.iam-create-admin-user",
];

/// Simulation tool with scripted outcomes and a call log.
pub struct ScriptedTool {
    catalog: Vec<Technique>,
    failing_steps: Vec<ToolStep>,
    fail_listing: bool,
    cancel_after: Option<(ToolStep, CancelToken)>,
    calls: RefCell<Vec<(ToolStep, StepRequest)>>,
    listing_calls: Cell<usize>,
}

impl Default for ScriptedTool {
    fn default() -> Self {
        Self::with_catalog(DEFAULT_CATALOG)
    }
}

impl ScriptedTool {
    pub fn with_catalog(ids: &[&str]) -> Self {
        Self {
            catalog: ids.iter().map(|id| technique(id)).collect(),
            failing_steps: Vec::new(),
            fail_listing: false,
            cancel_after: None,
            calls: RefCell::new(Vec::new()),
            listing_calls: Cell::new(0),
        }
    }

    /// Make `step` exit with status 1.
    pub fn failing(mut self, step: ToolStep) -> Self {
        self.failing_steps.push(step);
        self
    }

    pub fn failing_listing(mut self) -> Self {
        self.fail_listing = true;
        self
    }

    /// Simulate an operator interrupt arriving while `step` runs.
    pub fn cancel_after(mut self, step: ToolStep, token: CancelToken) -> Self {
        self.cancel_after = Some((step, token));
        self
    }

    pub fn calls(&self) -> Vec<ToolStep> {
        self.calls.borrow().iter().map(|(step, _)| *step).collect()
    }

    pub fn requests(&self) -> Vec<StepRequest> {
        self.calls
            .borrow()
            .iter()
            .map(|(_, request)| request.clone())
            .collect()
    }

    pub fn listing_calls(&self) -> usize {
        self.listing_calls.get()
    }
}

impl SimulationTool for ScriptedTool {
    fn list_techniques(&self) -> Result<Vec<Technique>> {
        self.listing_calls.set(self.listing_calls.get() + 1);
        if self.fail_listing {
            return Err(anyhow!("stratus: command not found"));
        }
        Ok(self.catalog.clone())
    }

    fn run_step(&self, step: ToolStep, request: &StepRequest) -> Result<(), ToolFailure> {
        self.calls.borrow_mut().push((step, request.clone()));
        if let Some((cancel_step, token)) = &self.cancel_after
            && *cancel_step == step
        {
            token.cancel();
        }
        if self.failing_steps.contains(&step) {
            return Err(ToolFailure {
                step,
                message: "exit status 1: simulated failure".to_string(),
                exit_code: Some(1),
                timed_out: false,
            });
        }
        Ok(())
    }

    fn status(&self) -> Result<String> {
        Ok("No techniques warmed up or detonated.\n".to_string())
    }
}

/// Account verifier that always reports the same account.
pub struct FakeAccount {
    account: String,
}

impl FakeAccount {
    pub fn new(account: &str) -> Self {
        Self {
            account: account.to_string(),
        }
    }
}

impl AccountVerifier for FakeAccount {
    fn current_account(&self) -> Result<String> {
        Ok(self.account.clone())
    }
}

/// Liveness probe with a fixed answer.
pub struct FakeProbe {
    alive: bool,
}

impl FakeProbe {
    pub fn new(alive: bool) -> Self {
        Self { alive }
    }
}

impl ProcessProbe for FakeProbe {
    fn is_alive(&self, _pid: u32) -> bool {
        self.alive
    }
}

/// Initialized state directory in a temp dir.
pub struct TestState {
    _temp: tempfile::TempDir,
    pub paths: StatePaths,
    pub config: RandomizerConfig,
}

impl Default for TestState {
    fn default() -> Self {
        Self::new()
    }
}

impl TestState {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_state(&temp.path().join("state"), &InitOptions { force: false })
            .expect("init state");
        Self {
            _temp: temp,
            paths,
            config: RandomizerConfig::default(),
        }
    }

    pub fn store(&self) -> RunStore {
        RunStore::open(&self.paths).expect("open run store")
    }

    /// Lock manager whose owners always look alive.
    pub fn locks(&self) -> LockManager {
        LockManager::new(&self.paths.lock_path, &self.config.lock)
            .with_probe(Box::new(FakeProbe::new(true)))
    }

    pub fn history(&self) -> HistoryStore {
        HistoryStore::new(&self.paths.history_path, self.config.history.capacity)
    }

    /// Persist a run that has reached `status` along the normal path.
    pub fn seed_run(&self, run_id: &str, mode: RunMode, status: RunStatus) -> RunRecord {
        let store = self.store();
        let started_at = Utc
            .with_ymd_and_hms(2024, 1, 15, 12, 0, 0)
            .single()
            .expect("timestamp");
        let mut record = store
            .create(NewRun {
                run_id: run_id.to_string(),
                technique_id: DEFAULT_CATALOG[4].to_string(),
                account: ACCOUNT.to_string(),
                region: REGION.to_string(),
                mode,
                tactic_filter: None,
                started_at,
            })
            .expect("create run");
        let path = [
            RunStatus::WarmupComplete,
            RunStatus::Detonated,
            RunStatus::Cleaned,
        ];
        if status == RunStatus::Failed {
            return store
                .update(
                    run_id,
                    RunUpdate::Fail {
                        error: "exit status 1: simulated failure".to_string(),
                        at: started_at + Duration::seconds(1),
                    },
                )
                .expect("fail run");
        }
        for (offset, next) in (1_i64..).zip(path) {
            if record.status == status {
                break;
            }
            record = store
                .update(
                    run_id,
                    RunUpdate::Advance {
                        status: next,
                        at: started_at + Duration::seconds(offset),
                    },
                )
                .expect("advance run");
        }
        record
    }
}
