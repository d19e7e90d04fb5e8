//! Crash-safe single-run lock (`run.lock`).
//!
//! The marker is created atomically by hard-linking a fully written temp file
//! to the marker path, so readers never see a half-written marker. A marker
//! whose owner is gone, or that is older than the stale threshold, is
//! reclaimed. Acquisition waits at most `lock.wait_secs`.
//!
//! Only one process at a time may remove the marker: both stale reclaim and
//! release hold `run.lock.reclaim`, created with `create_new`, while they
//! re-read, compare and delete it.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use rand::{Rng, distributions::Alphanumeric};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::core::staleness::is_stale;
use crate::error::RandomizerError;
use crate::io::config::LockConfig;

/// Why the lock is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockPurpose {
    Run,
    Cleanup,
}

impl LockPurpose {
    pub fn as_str(self) -> &'static str {
        match self {
            LockPurpose::Run => "run",
            LockPurpose::Cleanup => "cleanup",
        }
    }
}

/// Marker payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockOwner {
    pub pid: u32,
    pub run_id: String,
    pub purpose: LockPurpose,
    /// Random per-acquisition token; release only removes a marker carrying it.
    pub token: String,
    pub acquired_at: DateTime<Utc>,
}

impl LockOwner {
    /// Owner record for this process.
    pub fn current(run_id: impl Into<String>, purpose: LockPurpose) -> Self {
        Self {
            pid: std::process::id(),
            run_id: run_id.into(),
            purpose,
            token: generate_token(),
            acquired_at: Utc::now(),
        }
    }

    fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.acquired_at).to_std().unwrap_or(Duration::ZERO)
    }
}

fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(16)
        .collect()
}

/// Answers whether a process id still refers to a running process.
pub trait ProcessProbe: Send + Sync {
    fn is_alive(&self, pid: u32) -> bool;
}

/// Liveness from the operating system. Unknown is treated as alive.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProbe;

impl ProcessProbe for SystemProbe {
    fn is_alive(&self, pid: u32) -> bool {
        if pid == std::process::id() {
            return true;
        }
        probe_pid(pid)
    }
}

#[cfg(target_os = "linux")]
fn probe_pid(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(all(unix, not(target_os = "linux")))]
fn probe_pid(pid: u32) -> bool {
    use std::process::{Command, Stdio};
    Command::new("kill")
        .arg("-0")
        .arg(pid.to_string())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_or(true, |status| status.success())
}

#[cfg(not(unix))]
fn probe_pid(_pid: u32) -> bool {
    true
}

/// Snapshot of the lock for `status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockState {
    Free,
    Held {
        /// `None` when the marker could not be parsed.
        owner: Option<LockOwner>,
        age: Option<Duration>,
        stale: bool,
    },
}

enum Marker {
    Missing,
    Unreadable(Vec<u8>),
    Owned { owner: LockOwner, raw: Vec<u8> },
}

enum Attempt {
    Acquired,
    Held(Option<LockOwner>),
}

pub struct LockManager {
    path: PathBuf,
    stale_after: Duration,
    wait: Duration,
    poll_interval: Duration,
    probe: Arc<dyn ProcessProbe>,
}

impl LockManager {
    pub fn new(path: impl Into<PathBuf>, config: &LockConfig) -> Self {
        Self {
            path: path.into(),
            stale_after: Duration::from_secs(config.stale_after_secs),
            wait: Duration::from_secs(config.wait_secs),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            probe: Arc::new(SystemProbe),
        }
    }

    pub fn with_probe(mut self, probe: Box<dyn ProcessProbe>) -> Self {
        self.probe = Arc::from(probe);
        self
    }

    /// A manager for a different marker path with the same timing and liveness check.
    pub fn at(&self, path: impl Into<PathBuf>) -> LockManager {
        LockManager {
            path: path.into(),
            stale_after: self.stale_after,
            wait: self.wait,
            poll_interval: self.poll_interval,
            probe: Arc::clone(&self.probe),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the lock for `owner`, or fail with [`RandomizerError::LockHeld`].
    #[instrument(skip_all, fields(run_id = %owner.run_id, purpose = ?owner.purpose))]
    pub fn acquire(&self, owner: LockOwner) -> Result<LockHandle> {
        let deadline = Instant::now() + self.wait;
        loop {
            match self.try_acquire(&owner)? {
                Attempt::Acquired => {
                    debug!(path = %self.path.display(), "lock acquired");
                    return Ok(LockHandle {
                        path: self.path.clone(),
                        token: owner.token,
                        released: false,
                    });
                }
                Attempt::Held(holder) => {
                    if Instant::now() >= deadline {
                        return Err(held_error(holder).into());
                    }
                    thread::sleep(self.poll_interval);
                }
            }
        }
    }

    /// Report the lock state without changing it.
    pub fn inspect(&self) -> Result<LockState> {
        Ok(match self.read_marker()? {
            Marker::Missing => LockState::Free,
            Marker::Unreadable(_) => LockState::Held {
                owner: None,
                age: None,
                stale: true,
            },
            Marker::Owned { owner, .. } => {
                let age = owner.age(Utc::now());
                let stale = is_stale(age, self.probe.is_alive(owner.pid), self.stale_after);
                LockState::Held {
                    owner: Some(owner),
                    age: Some(age),
                    stale,
                }
            }
        })
    }

    fn try_acquire(&self, owner: &LockOwner) -> Result<Attempt> {
        if self.try_create(owner)? {
            return Ok(Attempt::Acquired);
        }
        let (raw, holder) = match self.read_marker()? {
            // Released between our create and read.
            Marker::Missing => {
                return Ok(if self.try_create(owner)? {
                    Attempt::Acquired
                } else {
                    Attempt::Held(None)
                });
            }
            Marker::Unreadable(raw) => {
                warn!(path = %self.path.display(), "lock marker unreadable, treating as stale");
                (raw, None)
            }
            Marker::Owned { owner: holder, raw } => {
                let age = holder.age(Utc::now());
                let alive = self.probe.is_alive(holder.pid);
                if !is_stale(age, alive, self.stale_after) {
                    return Ok(Attempt::Held(Some(holder)));
                }
                warn!(
                    pid = holder.pid,
                    run_id = %holder.run_id,
                    age_secs = age.as_secs(),
                    owner_alive = alive,
                    "reclaiming stale lock"
                );
                (raw, Some(holder))
            }
        };

        if !self.reclaim(&raw)? {
            return Ok(Attempt::Held(holder));
        }
        if self.try_create(owner)? {
            info!(path = %self.path.display(), "stale lock reclaimed");
            return Ok(Attempt::Acquired);
        }
        Ok(Attempt::Held(None))
    }

    /// Create the marker if absent. Returns false when it already exists.
    fn try_create(&self, owner: &LockOwner) -> Result<bool> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create lock directory {}", parent.display()))?;
        }
        let mut payload = serde_json::to_string_pretty(owner).context("serialize lock marker")?;
        payload.push('\n');
        let tmp_path = sibling(&self.path, &format!("{}.{}.tmp", owner.pid, owner.token));
        fs::write(&tmp_path, payload)
            .with_context(|| format!("write lock temp file {}", tmp_path.display()))?;
        let linked = fs::hard_link(&tmp_path, &self.path);
        let _ = fs::remove_file(&tmp_path);
        match linked {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(err) => Err(err).with_context(|| format!("create lock {}", self.path.display())),
        }
    }

    /// Remove a marker judged stale, provided it is still that marker.
    ///
    /// Runs under the removal guard, so the marker cannot be swapped between
    /// the comparison and the removal.
    fn reclaim(&self, judged: &[u8]) -> Result<bool> {
        let Some(_guard) = RemovalGuard::acquire(&self.path)? else {
            debug!("another process is reclaiming the lock");
            return Ok(false);
        };
        match fs::read(&self.path) {
            Ok(current) if current == judged => {}
            Ok(_) => {
                debug!("lock changed before it could be reclaimed");
                return Ok(false);
            }
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(true),
            Err(err) => {
                return Err(err).with_context(|| format!("read lock {}", self.path.display()));
            }
        }
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(true),
            Err(err) => {
                Err(err).with_context(|| format!("remove stale lock {}", self.path.display()))
            }
        }
    }

    fn read_marker(&self) -> Result<Marker> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Marker::Missing),
            Err(err) => {
                return Err(err).with_context(|| format!("read lock {}", self.path.display()));
            }
        };
        Ok(match serde_json::from_slice::<LockOwner>(&raw) {
            Ok(owner) => Marker::Owned { owner, raw },
            Err(_) => Marker::Unreadable(raw),
        })
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{suffix}"));
    path.with_file_name(name)
}

/// How long to wait for another process to finish removing a marker.
const GUARD_WAIT: Duration = Duration::from_secs(2);
const GUARD_POLL: Duration = Duration::from_millis(10);
/// A guard older than this was left behind by a crashed process.
const GUARD_ABANDONED_AFTER: Duration = Duration::from_secs(30);

/// Exclusive right to remove the marker, held as a `create_new` file next to it.
///
/// Stale reclaim and release both remove the marker only while holding this,
/// so a compare-then-remove never deletes a marker created in between.
struct RemovalGuard {
    path: PathBuf,
}

impl RemovalGuard {
    /// Take the guard for `lock`, waiting up to [`GUARD_WAIT`]. `None` if still busy.
    fn acquire(lock: &Path) -> Result<Option<Self>> {
        let path = sibling(lock, "reclaim");
        let deadline = Instant::now() + GUARD_WAIT;
        loop {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(_) => return Ok(Some(Self { path })),
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    if guard_age(&path).is_some_and(|age| age > GUARD_ABANDONED_AFTER) {
                        warn!(path = %path.display(), "removing abandoned lock guard");
                        let _ = fs::remove_file(&path);
                        continue;
                    }
                    if Instant::now() >= deadline {
                        return Ok(None);
                    }
                    thread::sleep(GUARD_POLL);
                }
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("create lock guard {}", path.display()));
                }
            }
        }
    }
}

impl Drop for RemovalGuard {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), %err, "failed to remove lock guard");
        }
    }
}

fn guard_age(path: &Path) -> Option<Duration> {
    fs::metadata(path).ok()?.modified().ok()?.elapsed().ok()
}

fn held_error(holder: Option<LockOwner>) -> RandomizerError {
    match holder {
        Some(owner) => RandomizerError::LockHeld {
            pid: owner.pid,
            run_id: owner.run_id,
            acquired_at: owner.acquired_at.to_rfc3339(),
        },
        None => RandomizerError::LockHeld {
            pid: 0,
            run_id: "unknown".to_string(),
            acquired_at: "unknown".to_string(),
        },
    }
}

/// Proof of lock ownership. Released explicitly, or on drop as a fallback.
#[derive(Debug)]
pub struct LockHandle {
    path: PathBuf,
    token: String,
    released: bool,
}

impl LockHandle {
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        release_marker(&self.path, &self.token)
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = release_marker(&self.path, &self.token) {
            warn!(err = %format!("{err:#}"), "failed to release lock on drop");
        }
    }
}

fn release_marker(path: &Path, token: &str) -> Result<()> {
    let Some(_guard) = RemovalGuard::acquire(path)? else {
        return Err(anyhow!("lock {} is busy, leaving it for stale reclaim", path.display()));
    };
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            warn!(path = %path.display(), "lock marker already gone at release");
            return Ok(());
        }
        Err(err) => return Err(err).with_context(|| format!("read lock {}", path.display())),
    };
    match serde_json::from_slice::<LockOwner>(&raw) {
        Ok(owner) if owner.token == token => {
            fs::remove_file(path).with_context(|| format!("remove lock {}", path.display()))?;
            debug!(path = %path.display(), "lock released");
        }
        _ => warn!(path = %path.display(), "lock marker belongs to another owner, leaving it"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::exit_code_for;
    use crate::exit_codes;
    use crate::test_support::FakeProbe;

    fn manager(dir: &Path, alive: bool) -> LockManager {
        LockManager::new(dir.join("run.lock"), &LockConfig::default())
            .with_probe(Box::new(FakeProbe::new(alive)))
    }

    fn write_marker(path: &Path, owner: &LockOwner) {
        fs::write(path, serde_json::to_string(owner).expect("json")).expect("write marker");
    }

    fn foreign_owner(run_id: &str, age: chrono::Duration) -> LockOwner {
        LockOwner {
            pid: 4_000_000,
            run_id: run_id.to_string(),
            purpose: LockPurpose::Run,
            token: "foreign".to_string(),
            acquired_at: Utc::now() - age,
        }
    }

    #[test]
    fn second_acquire_fails_with_lock_held() {
        let temp = tempfile::tempdir().expect("tempdir");
        let locks = manager(temp.path(), true);
        let handle = locks
            .acquire(LockOwner::current("run-a", LockPurpose::Run))
            .expect("first");
        let err = locks
            .acquire(LockOwner::current("run-b", LockPurpose::Run))
            .unwrap_err();
        assert_eq!(exit_code_for(&err), exit_codes::LOCK_HELD);
        assert!(err.to_string().contains("run-a"));

        handle.release().expect("release");
        assert!(!locks.path().exists());
        locks
            .acquire(LockOwner::current("run-b", LockPurpose::Run))
            .expect("after release");
    }

    #[test]
    fn drop_releases_the_lock() {
        let temp = tempfile::tempdir().expect("tempdir");
        let locks = manager(temp.path(), true);
        {
            let _handle = locks
                .acquire(LockOwner::current("run-a", LockPurpose::Run))
                .expect("acquire");
            assert!(locks.path().exists());
        }
        assert!(!locks.path().exists());
        let leftovers: Vec<_> = fs::read_dir(temp.path()).expect("read dir").collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn marker_with_dead_owner_is_reclaimed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let locks = manager(temp.path(), false);
        write_marker(
            locks.path(),
            &foreign_owner("crashed", chrono::Duration::seconds(5)),
        );

        let handle = locks
            .acquire(LockOwner::current("fresh", LockPurpose::Run))
            .expect("reclaim");
        let marker: LockOwner =
            serde_json::from_slice(&fs::read(locks.path()).expect("read")).expect("parse");
        assert_eq!(marker.run_id, "fresh");
        handle.release().expect("release");
    }

    #[test]
    fn marker_older_than_threshold_is_reclaimed_even_if_pid_alive() {
        let temp = tempfile::tempdir().expect("tempdir");
        let locks = manager(temp.path(), true);
        write_marker(locks.path(), &foreign_owner("old", chrono::Duration::hours(7)));
        locks
            .acquire(LockOwner::current("fresh", LockPurpose::Run))
            .expect("reclaim");
    }

    #[test]
    fn fresh_live_marker_is_never_reclaimed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let locks = manager(temp.path(), true);
        let owner = foreign_owner("busy", chrono::Duration::minutes(3));
        write_marker(locks.path(), &owner);

        assert!(locks
            .acquire(LockOwner::current("fresh", LockPurpose::Run))
            .is_err());
        let marker: LockOwner =
            serde_json::from_slice(&fs::read(locks.path()).expect("read")).expect("parse");
        assert_eq!(marker, owner);
    }

    #[test]
    fn unreadable_marker_is_stale() {
        let temp = tempfile::tempdir().expect("tempdir");
        let locks = manager(temp.path(), true);
        fs::write(locks.path(), "{\"pid\":").expect("write partial");
        assert_eq!(
            locks.inspect().expect("inspect"),
            LockState::Held {
                owner: None,
                age: None,
                stale: true
            }
        );
        locks
            .acquire(LockOwner::current("fresh", LockPurpose::Run))
            .expect("reclaim");
    }

    #[test]
    fn inspect_reports_owner_and_staleness() {
        let temp = tempfile::tempdir().expect("tempdir");
        let locks = manager(temp.path(), true);
        assert_eq!(locks.inspect().expect("inspect"), LockState::Free);

        write_marker(locks.path(), &foreign_owner("busy", chrono::Duration::minutes(3)));
        match locks.inspect().expect("inspect") {
            LockState::Held { owner, age, stale } => {
                assert_eq!(owner.expect("owner").run_id, "busy");
                assert!(age.expect("age") >= Duration::from_secs(170));
                assert!(!stale);
            }
            LockState::Free => panic!("expected held lock"),
        }
        assert!(locks.path().exists());
    }

    #[test]
    fn release_leaves_a_marker_it_does_not_own() {
        let temp = tempfile::tempdir().expect("tempdir");
        let locks = manager(temp.path(), true);
        let handle = locks
            .acquire(LockOwner::current("mine", LockPurpose::Run))
            .expect("acquire");
        let other = foreign_owner("theirs", chrono::Duration::seconds(1));
        write_marker(locks.path(), &other);

        handle.release().expect("release");
        assert!(locks.path().exists());
    }

    #[test]
    fn bounded_wait_picks_up_a_released_lock() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = LockConfig {
            wait_secs: 5,
            poll_interval_ms: 20,
            ..LockConfig::default()
        };
        let locks = LockManager::new(temp.path().join("run.lock"), &config)
            .with_probe(Box::new(FakeProbe::new(true)));
        let handle = locks
            .acquire(LockOwner::current("first", LockPurpose::Run))
            .expect("first");
        let releaser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            handle.release().expect("release");
        });
        locks
            .acquire(LockOwner::current("second", LockPurpose::Cleanup))
            .expect("second after wait");
        releaser.join().expect("join");
    }

    #[test]
    fn reclaim_waits_out_a_busy_guard_and_leaves_the_marker() {
        let temp = tempfile::tempdir().expect("tempdir");
        let locks = manager(temp.path(), false);
        let crashed = foreign_owner("crashed", chrono::Duration::seconds(5));
        write_marker(locks.path(), &crashed);
        let guard = temp.path().join("run.lock.reclaim");
        fs::write(&guard, "").expect("guard");

        let err = locks
            .acquire(LockOwner::current("fresh", LockPurpose::Run))
            .unwrap_err();
        assert_eq!(exit_code_for(&err), exit_codes::LOCK_HELD);
        let marker: LockOwner =
            serde_json::from_slice(&fs::read(locks.path()).expect("read")).expect("parse");
        assert_eq!(marker, crashed);
        assert!(guard.exists());
    }

    #[test]
    fn abandoned_guard_does_not_block_reclaim() {
        let temp = tempfile::tempdir().expect("tempdir");
        let locks = manager(temp.path(), false);
        write_marker(locks.path(), &foreign_owner("crashed", chrono::Duration::seconds(5)));
        let guard = temp.path().join("run.lock.reclaim");
        fs::File::create(&guard)
            .expect("guard")
            .set_modified(std::time::SystemTime::now() - Duration::from_secs(120))
            .expect("backdate guard");

        let handle = locks
            .acquire(LockOwner::current("fresh", LockPurpose::Run))
            .expect("reclaim");
        assert!(!guard.exists());
        handle.release().expect("release");
        assert!(!locks.path().exists());
    }
}
