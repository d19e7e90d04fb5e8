//! Simulation tool abstraction.
//!
//! The [`SimulationTool`] trait decouples run orchestration from the actual
//! attack-simulation backend (currently the `stratus` CLI). Tests use scripted
//! tools that return predetermined outcomes without spawning processes.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::types::{Technique, ToolStep};
use crate::io::config::ToolConfig;
use crate::io::process::{CommandOutput, command_from_argv, run_command_with_timeout};

/// Where and for whom a tool step runs.
#[derive(Debug, Clone)]
pub struct StepRequest {
    pub technique_id: String,
    /// Region exported to the tool as `AWS_REGION` / `AWS_DEFAULT_REGION`.
    pub region: String,
    /// Where to write the step's stdout/stderr, if anywhere.
    pub log_path: Option<PathBuf>,
}

/// Structured failure of one tool step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolFailure {
    pub step: ToolStep,
    pub message: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

impl ToolFailure {
    pub fn new(step: ToolStep, message: impl Into<String>) -> Self {
        Self {
            step,
            message: message.into(),
            exit_code: None,
            timed_out: false,
        }
    }
}

/// Abstraction over attack-simulation backends.
pub trait SimulationTool {
    /// Enumerate every technique the tool offers for the configured platform.
    fn list_techniques(&self) -> Result<Vec<Technique>>;

    /// Run one primitive (warmup, detonate, revert or cleanup) for a technique.
    fn run_step(&self, step: ToolStep, request: &StepRequest) -> Result<(), ToolFailure>;

    /// The tool's own report of techniques it has state for.
    fn status(&self) -> Result<String>;
}

/// Tool backed by the `stratus` CLI (or whatever `tool.command` points at).
#[derive(Debug, Clone)]
pub struct StratusTool {
    config: ToolConfig,
}

impl StratusTool {
    pub fn new(config: ToolConfig) -> Self {
        Self { config }
    }

    fn run(&self, args: &[&str], region: Option<&str>) -> Result<CommandOutput> {
        let mut cmd = command_from_argv(&self.config.command)?;
        cmd.args(args);
        if let Some(region) = region {
            cmd.env("AWS_REGION", region).env("AWS_DEFAULT_REGION", region);
        }
        run_command_with_timeout(
            cmd,
            Duration::from_secs(self.config.timeout_secs),
            self.config.output_limit_bytes,
        )
    }
}

impl SimulationTool for StratusTool {
    #[instrument(skip_all, fields(platform = %self.config.platform))]
    fn list_techniques(&self) -> Result<Vec<Technique>> {
        let output = self
            .run(&["list", "--platform", self.config.platform.as_str()], None)
            .context("run technique listing")?;
        if !output.succeeded() {
            return Err(anyhow!("technique listing failed: {}", output.failure_message()));
        }
        let techniques = parse_technique_listing(&output.stdout.lossy(), &self.config.platform);
        debug!(count = techniques.len(), "parsed technique listing");
        Ok(techniques)
    }

    #[instrument(skip_all, fields(step = %step, technique = %request.technique_id))]
    fn run_step(&self, step: ToolStep, request: &StepRequest) -> Result<(), ToolFailure> {
        info!(region = %request.region, "starting tool step");
        let output = self
            .run(
                &[step.as_str(), request.technique_id.as_str()],
                Some(&request.region),
            )
            .map_err(|err| ToolFailure::new(step, format!("{err:#}")))?;

        if let Some(log_path) = &request.log_path
            && let Err(err) = write_tool_log(log_path, &output)
        {
            warn!(err = %err, path = %log_path.display(), "failed to write tool log");
        }

        if output.succeeded() {
            debug!("tool step completed successfully");
            return Ok(());
        }
        warn!(exit_code = ?output.status.code(), timed_out = output.timed_out, "tool step failed");
        Err(ToolFailure {
            step,
            message: output.failure_message(),
            exit_code: output.status.code(),
            timed_out: output.timed_out,
        })
    }

    fn status(&self) -> Result<String> {
        let output = self.run(&["status"], None).context("run tool status")?;
        let mut text = output.stdout.lossy();
        text.push_str(&output.stderr.lossy());
        Ok(text)
    }
}

/// Extract techniques from `list` output.
///
/// Accepts both the bordered table (`| aws.x.y | Name | ... |`) and plain
/// whitespace-separated rows. A row is a technique when its first column starts
/// with `<platform>.`; the tactic comes from the id's second segment.
pub fn parse_technique_listing(stdout: &str, platform: &str) -> Vec<Technique> {
    let prefix = format!("{platform}.");
    let mut techniques: Vec<Technique> = Vec::new();
    for line in stdout.lines() {
        let row = line.trim().trim_start_matches('|').trim();
        if !row.starts_with(&prefix) {
            continue;
        }
        let (id, name) = if row.contains('|') {
            let mut columns = row.split('|').map(str::trim);
            let id = columns.next().unwrap_or_default();
            (id, columns.next().unwrap_or_default())
        } else {
            match row.split_once(char::is_whitespace) {
                Some((id, rest)) => (id, rest.trim()),
                None => (row, ""),
            }
        };
        if techniques.iter().any(|t| t.id == id) {
            continue;
        }
        match Technique::from_id(id, name) {
            Some(technique) => techniques.push(technique),
            None => debug!(id, "skipping technique with unknown tactic"),
        }
    }
    techniques
}

fn write_tool_log(path: &Path, output: &CommandOutput) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create tool log dir {}", parent.display()))?;
    }
    fs::write(path, output.log_text()).with_context(|| format!("write tool log {}", path.display()))
}
