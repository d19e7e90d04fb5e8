//! State directory layout and `randomizer init`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::info;

use super::config::{RandomizerConfig, write_config};

/// Default state directory, relative to the working directory.
pub const DEFAULT_STATE_DIR: &str = ".randomizer";

/// All canonical paths within a state directory.
///
/// Every command takes the state directory explicitly; nothing here is global,
/// so tests point it at a temp directory.
#[derive(Debug, Clone)]
pub struct StatePaths {
    pub state_dir: PathBuf,
    pub runs_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub config_path: PathBuf,
    pub history_path: PathBuf,
    pub lock_path: PathBuf,
}

impl StatePaths {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        let state_dir = state_dir.into();
        Self {
            runs_dir: state_dir.join("runs"),
            logs_dir: state_dir.join("logs"),
            config_path: state_dir.join("config.toml"),
            history_path: state_dir.join("history.json"),
            lock_path: state_dir.join("run.lock"),
            state_dir,
        }
    }

    pub fn run_record_path(&self, run_id: &str) -> PathBuf {
        self.runs_dir.join(format!("{run_id}.json"))
    }

    /// Marker held while one cleanup of `run_id` is in progress.
    pub fn run_cleanup_lock_path(&self, run_id: &str) -> PathBuf {
        self.runs_dir.join(format!("{run_id}.cleanup"))
    }

    pub fn run_logs_dir(&self, run_id: &str) -> PathBuf {
        self.logs_dir.join(run_id)
    }
}

/// Options for `init_state`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite an existing `config.toml` with defaults.
    pub force: bool,
}

/// Create the state directory layout and a default `config.toml`.
///
/// Existing run records and history are never touched; only the config is
/// rewritten, and only with `force`.
pub fn init_state(state_dir: &Path, options: &InitOptions) -> Result<StatePaths> {
    let paths = StatePaths::new(state_dir);
    if paths.state_dir.exists() && !paths.state_dir.is_dir() {
        return Err(anyhow!(
            "init: {} exists but is not a directory",
            paths.state_dir.display()
        ));
    }
    if paths.config_path.exists() && !options.force {
        return Err(anyhow!(
            "init: {} already exists (use --force to overwrite)",
            paths.config_path.display()
        ));
    }

    create_dir(&paths.state_dir)?;
    create_dir(&paths.runs_dir)?;
    create_dir(&paths.logs_dir)?;
    write_config(&paths.config_path, &RandomizerConfig::default())?;

    info!(state_dir = %paths.state_dir.display(), "state directory initialized");
    Ok(paths)
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::load_config;

    #[test]
    fn init_creates_expected_layout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_state(&temp.path().join("state"), &InitOptions { force: false })
            .expect("init");

        assert!(paths.state_dir.is_dir());
        assert!(paths.runs_dir.is_dir());
        assert!(paths.logs_dir.is_dir());
        assert_eq!(
            load_config(&paths.config_path).expect("config"),
            RandomizerConfig::default()
        );
        assert!(!paths.lock_path.exists());
    }

    #[test]
    fn init_without_force_refuses_existing_config() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_state(temp.path(), &InitOptions { force: false }).expect("init");
        let err = init_state(temp.path(), &InitOptions { force: false }).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn init_with_force_restores_defaults_and_keeps_runs() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_state(temp.path(), &InitOptions { force: false }).expect("init");
        fs::write(&paths.config_path, "[history]\ncapacity = 3\navoid_last_n = 1\n")
            .expect("customize");
        let run_file = paths.run_record_path("20240115T120000Z-0a1b2c3d");
        fs::write(&run_file, "{}").expect("write run");

        init_state(temp.path(), &InitOptions { force: true }).expect("re-init");

        assert_eq!(
            load_config(&paths.config_path).expect("config"),
            RandomizerConfig::default()
        );
        assert!(run_file.exists());
    }
}
