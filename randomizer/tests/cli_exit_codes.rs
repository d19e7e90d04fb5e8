//! CLI tests for randomizer exit codes.
//!
//! Spawns the randomizer binary against fake `stratus` and `aws` scripts and
//! verifies each failure class exits with its dedicated code.
#![cfg(unix)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use randomizer::core::types::RunStatus;
use randomizer::exit_codes;
use randomizer::io::config::{RandomizerConfig, write_config};
use randomizer::io::init::{InitOptions, StatePaths, init_state};
use randomizer::io::lock::{LockManager, LockOwner, LockPurpose};
use randomizer::io::run_store::RunStore;

const ACCOUNT: &str = "123456789012";
const TECHNIQUES: [&str; 2] = [
    "aws.persistence.iam-create-admin-user",
    "aws.discovery.ec2-enumerate-from-instance",
];

struct Fixture {
    _temp: tempfile::TempDir,
    bin_dir: PathBuf,
    paths: StatePaths,
}

impl Fixture {
    fn new(fail_step: Option<&str>) -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let bin_dir = temp.path().join("bin");
        fs::create_dir_all(&bin_dir).expect("bin dir");
        let paths =
            init_state(&temp.path().join("state"), &InitOptions { force: true }).expect("init");

        let stratus = write_script(&bin_dir, "stratus", &fake_stratus(&bin_dir, fail_step));
        let aws = write_script(
            &bin_dir,
            "aws",
            &format!("#!/bin/sh\nprintf '{{\"Account\":\"%s\",\"Arn\":\"x\"}}' {ACCOUNT}\n"),
        );
        let mut config = RandomizerConfig::default();
        // Run through `sh` so the scripts never need to be exec'd directly.
        config.tool.command = vec!["sh".to_string(), stratus.display().to_string()];
        config.identity.command = vec!["sh".to_string(), aws.display().to_string()];
        write_config(&paths.config_path, &config).expect("write config");

        Self {
            _temp: temp,
            bin_dir,
            paths,
        }
    }

    fn randomizer(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_randomizer"))
            .arg("--state-dir")
            .arg(&self.paths.state_dir)
            .args(args)
            .output()
            .expect("spawn randomizer")
    }

    fn run(&self, extra: &[&str]) -> Output {
        let mut args = vec!["run", "--account", ACCOUNT, "--region", "us-east-1"];
        args.extend_from_slice(extra);
        self.randomizer(&args)
    }

    fn tool_calls(&self) -> String {
        fs::read_to_string(self.bin_dir.join("calls.log")).unwrap_or_default()
    }

    fn store(&self) -> RunStore {
        RunStore::open(&self.paths).expect("store")
    }
}

fn fake_stratus(bin_dir: &Path, fail_step: Option<&str>) -> String {
    let calls = bin_dir.join("calls.log");
    let fail = fail_step.unwrap_or("none");
    format!(
        r#"#!/bin/sh
echo "$1 $2 $AWS_REGION" >> "{calls}"
case "$1" in
  list)
    echo "+------------------------------------------+"
    echo "| TECHNIQUE ID | TECHNIQUE NAME | PLATFORM |"
    echo "| {t0} | Create an administrative user | AWS |"
    echo "| {t1} | Execute Discovery Commands | AWS |"
    ;;
  status)
    echo "No techniques warmed up or detonated."
    ;;
  {fail})
    echo "simulated $1 failure" >&2
    exit 1
    ;;
esac
exit 0
"#,
        calls = calls.display(),
        t0 = TECHNIQUES[0],
        t1 = TECHNIQUES[1],
    )
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).expect("write script");
    path
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn train_run_is_blind_until_revealed_and_cleanup_is_idempotent() {
    let fixture = Fixture::new(None);

    let run = fixture.run(&[]);
    assert_eq!(run.status.code(), Some(exit_codes::OK), "{}", stderr(&run));
    let out = stdout(&run);
    assert!(out.contains("RUN_ID: "));
    assert!(out.contains("MODE: train"));
    for technique in TECHNIQUES {
        assert!(!out.contains(technique), "run output leaked {technique}");
    }

    let records = fixture.store().list(1).expect("list");
    let record = &records[0];
    assert_eq!(record.status, RunStatus::Detonated);
    assert!(fixture.tool_calls().contains(&format!(
        "warmup {} us-east-1",
        record.technique_id
    )));

    let reveal = fixture.randomizer(&["reveal", &record.run_id]);
    assert_eq!(reveal.status.code(), Some(exit_codes::OK));
    assert!(stdout(&reveal).contains(&record.technique_id));

    let cleanup = fixture.randomizer(&["cleanup", &record.run_id]);
    assert_eq!(cleanup.status.code(), Some(exit_codes::OK), "{}", stderr(&cleanup));
    let cleaned = fixture.store().get(&record.run_id).expect("get");
    assert_eq!(cleaned.status, RunStatus::Cleaned);

    let again = fixture.randomizer(&["cleanup", &record.run_id]);
    assert_eq!(again.status.code(), Some(exit_codes::OK));
    assert!(stdout(&again).contains("already cleaned"));
    assert_eq!(fixture.store().get(&record.run_id).expect("get"), cleaned);
}

#[test]
fn unknown_run_exits_with_not_found_and_lists_known_runs() {
    let fixture = Fixture::new(None);
    let run = fixture.run(&[]);
    assert_eq!(run.status.code(), Some(exit_codes::OK));

    let output = fixture.randomizer(&["reveal", "20990101T000000Z-00000000"]);
    assert_eq!(output.status.code(), Some(exit_codes::RUN_NOT_FOUND));
    let err = stderr(&output);
    assert!(err.contains("error: run 20990101T000000Z-00000000 not found"));
    assert!(err.contains("Available runs:"));
}

#[test]
fn account_mismatch_exits_before_any_tool_call() {
    let fixture = Fixture::new(None);
    let output = fixture.randomizer(&["run", "--account", "999999999999", "--region", "us-east-1"]);
    assert_eq!(output.status.code(), Some(exit_codes::ACCOUNT_MISMATCH));
    assert!(fixture.tool_calls().is_empty());
    assert!(fixture.store().list(5).expect("list").is_empty());
}

#[test]
fn held_lock_exits_with_lock_held_and_creates_no_run() {
    let fixture = Fixture::new(None);
    let config = RandomizerConfig::default();
    let locks = LockManager::new(&fixture.paths.lock_path, &config.lock);
    let _held = locks
        .acquire(LockOwner::current("20240101T000000Z-00000000", LockPurpose::Run))
        .expect("hold lock");

    let output = fixture.run(&[]);
    assert_eq!(output.status.code(), Some(exit_codes::LOCK_HELD));
    assert!(stderr(&output).contains("20240101T000000Z-00000000"));
    assert!(fixture.store().list(5).expect("list").is_empty());
}

#[test]
fn warmup_failure_exits_with_tool_failure_and_records_it() {
    let fixture = Fixture::new(Some("warmup"));
    let output = fixture.run(&[]);
    assert_eq!(output.status.code(), Some(exit_codes::TOOL_FAILURE));

    let records = fixture.store().list(1).expect("list");
    let record = &records[0];
    assert_eq!(record.status, RunStatus::Failed);
    assert!(record.warmup_at.is_none());
    assert!(
        record
            .error
            .as_deref()
            .expect("error")
            .contains("simulated warmup failure")
    );
    assert!(!fixture.paths.lock_path.exists());
    let log = fixture
        .paths
        .run_logs_dir(&record.run_id)
        .join("warmup.log");
    assert!(fs::read_to_string(log).expect("log").contains("simulated warmup failure"));
}

#[test]
fn validate_run_exits_ok_after_cleanup() {
    let fixture = Fixture::new(None);
    let output = fixture.run(&["--mode", "validate"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK), "{}", stderr(&output));
    let records = fixture.store().list(1).expect("list");
    let record = &records[0];
    assert_eq!(record.status, RunStatus::Cleaned);
    assert!(!fixture.paths.lock_path.exists());
}

#[test]
fn empty_tactic_exits_with_no_eligible_technique() {
    let fixture = Fixture::new(None);
    let output = fixture.run(&["--tactic", "exfiltration"]);
    assert_eq!(output.status.code(), Some(exit_codes::NO_ELIGIBLE_TECHNIQUE));
    assert!(fixture.store().list(5).expect("list").is_empty());
}

#[test]
fn list_techniques_filters_by_tactic() {
    let fixture = Fixture::new(None);
    let output = fixture.randomizer(&["list", "--techniques", "--tactic", "discovery"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let out = stdout(&output);
    assert!(out.contains(TECHNIQUES[1]));
    assert!(!out.contains(TECHNIQUES[0]));
    assert!(out.contains("Total: 1 techniques"));
}

#[test]
fn status_reports_free_lock_and_tool_state() {
    let fixture = Fixture::new(None);
    let output = fixture.randomizer(&["status"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let out = stdout(&output);
    assert!(out.contains("free"));
    assert!(out.contains("No techniques warmed up or detonated."));
}
