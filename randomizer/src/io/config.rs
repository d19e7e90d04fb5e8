//! Randomizer configuration stored under `<state-dir>/config.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use super::fsutil::write_atomic;

/// Tool invocations a run makes while holding the lock: listing, warmup,
/// detonate, revert and cleanup.
const TOOL_CALLS_PER_RUN: u64 = 5;

/// Randomizer configuration (TOML).
///
/// Edited by humans; missing tables and keys take the defaults below.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RandomizerConfig {
    pub history: HistoryConfig,
    pub lock: LockConfig,
    pub tool: ToolConfig,
    pub identity: IdentityConfig,
    pub listing: ListingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HistoryConfig {
    /// How many detonated technique ids to remember.
    pub capacity: usize,
    /// Default number of most recent techniques to avoid when selecting.
    pub avoid_last_n: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: 20,
            avoid_last_n: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LockConfig {
    /// Age after which a lock marker is reclaimed even if its pid looks alive.
    pub stale_after_secs: u64,
    /// How long `acquire` keeps retrying a held lock before failing.
    pub wait_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: 6 * 60 * 60,
            wait_secs: 0,
            poll_interval_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolConfig {
    /// Program and leading arguments of the simulation tool.
    pub command: Vec<String>,
    /// Platform passed to `list --platform` and used as the technique id prefix.
    pub platform: String,
    /// Per-step wall-clock limit in seconds.
    pub timeout_secs: u64,
    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            command: vec!["stratus".to_string()],
            platform: "aws".to_string(),
            timeout_secs: 60 * 60,
            output_limit_bytes: 100_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IdentityConfig {
    /// Command printing caller identity JSON with an `Account` field.
    pub command: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            command: ["aws", "sts", "get-caller-identity", "--output", "json"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ListingConfig {
    /// Rows shown by `list --runs` when `--limit` is not given.
    pub default_limit: usize,
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self { default_limit: 20 }
    }
}

impl RandomizerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.history.capacity == 0 {
            return Err(anyhow!("history.capacity must be > 0"));
        }
        if self.history.avoid_last_n > self.history.capacity {
            return Err(anyhow!(
                "history.avoid_last_n ({}) must not exceed history.capacity ({})",
                self.history.avoid_last_n,
                self.history.capacity
            ));
        }
        if self.lock.poll_interval_ms == 0 {
            return Err(anyhow!("lock.poll_interval_ms must be > 0"));
        }
        if self.tool.timeout_secs == 0 {
            return Err(anyhow!("tool.timeout_secs must be > 0"));
        }
        if self.lock.stale_after_secs <= self.longest_locked_work().as_secs() {
            return Err(anyhow!(
                "lock.stale_after_secs ({}) must exceed identity.timeout_secs ({}) + {} x tool.timeout_secs ({})",
                self.lock.stale_after_secs,
                self.identity.timeout_secs,
                TOOL_CALLS_PER_RUN,
                self.tool.timeout_secs
            ));
        }
        if self.tool.output_limit_bytes == 0 {
            return Err(anyhow!("tool.output_limit_bytes must be > 0"));
        }
        validate_command("tool.command", &self.tool.command)?;
        if self.tool.platform.trim().is_empty() {
            return Err(anyhow!("tool.platform must not be empty"));
        }
        validate_command("identity.command", &self.identity.command)?;
        if self.identity.timeout_secs == 0 {
            return Err(anyhow!("identity.timeout_secs must be > 0"));
        }
        if self.listing.default_limit == 0 {
            return Err(anyhow!("listing.default_limit must be > 0"));
        }
        Ok(())
    }

    /// Upper bound on time a run spends in child processes while it holds the lock.
    pub fn longest_locked_work(&self) -> Duration {
        let tool = self.tool.timeout_secs.saturating_mul(TOOL_CALLS_PER_RUN);
        Duration::from_secs(tool.saturating_add(self.identity.timeout_secs))
    }

    /// Longest dwell that keeps a live run younger than the stale threshold.
    pub fn max_dwell_secs(&self) -> u64 {
        self.lock
            .stale_after_secs
            .saturating_sub(self.longest_locked_work().as_secs())
    }
}

fn validate_command(key: &str, command: &[String]) -> Result<()> {
    if command.is_empty() || command[0].trim().is_empty() {
        return Err(anyhow!("{key} must be a non-empty array"));
    }
    Ok(())
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RandomizerConfig::default()`.
pub fn load_config(path: &Path) -> Result<RandomizerConfig> {
    if !path.exists() {
        let cfg = RandomizerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RandomizerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &RandomizerConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, RandomizerConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let mut cfg = RandomizerConfig::default();
        cfg.tool.command = vec!["/opt/bin/stratus".to_string()];
        cfg.lock.wait_secs = 5;
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "[history]\ncapacity = 8\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.history.capacity, 8);
        assert_eq!(cfg.history.avoid_last_n, 5);
        assert_eq!(cfg.tool, ToolConfig::default());
    }

    #[test]
    fn stale_threshold_must_outlast_tool_timeouts() {
        let mut cfg = RandomizerConfig::default();
        cfg.lock.stale_after_secs = cfg.tool.timeout_secs * 2;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("stale_after_secs"));
    }

    #[test]
    fn avoid_window_cannot_exceed_capacity() {
        let mut cfg = RandomizerConfig::default();
        cfg.history.avoid_last_n = cfg.history.capacity + 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn default_dwell_budget_leaves_room_for_every_locked_child() {
        let cfg = RandomizerConfig::default();
        assert_eq!(cfg.max_dwell_secs(), 6 * 3600 - 5 * 3600 - 60);
    }

    #[test]
    fn longest_live_run_stays_under_stale_threshold() {
        let mut cfg = RandomizerConfig::default();
        for (tool_secs, identity_secs, stale_secs) in
            [(3600, 60, 21_600), (600, 300, 4_000), (30, 5, 156)]
        {
            cfg.tool.timeout_secs = tool_secs;
            cfg.identity.timeout_secs = identity_secs;
            cfg.lock.stale_after_secs = stale_secs;
            cfg.validate().expect("valid config");
            let worst = identity_secs + 5 * tool_secs + cfg.max_dwell_secs();
            assert!(worst <= stale_secs, "{worst}s run vs {stale_secs}s threshold");
        }
    }

    #[test]
    fn identity_timeout_counts_toward_stale_threshold() {
        let mut cfg = RandomizerConfig::default();
        cfg.lock.stale_after_secs = 5 * cfg.tool.timeout_secs + 1;
        cfg.identity.timeout_secs = 1;
        assert!(cfg.validate().is_err());
        cfg.identity.timeout_secs = 0;
        // zero identity timeout is rejected on its own
        assert!(cfg.validate().is_err());
        cfg.lock.stale_after_secs += 1;
        cfg.identity.timeout_secs = 1;
        cfg.validate().expect("stale threshold now exceeds locked work");
    }
}
