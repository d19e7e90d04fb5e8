//! Run record storage (`runs/<run-id>.json`).
//!
//! One pretty-printed JSON document per run, replaced atomically on every
//! change and validated against `schemas/run_record.v1.schema.json` on read.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use jsonschema::{Draft, Validator};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::core::ids::validate_run_id;
use crate::core::record::{NewRun, RunRecord, RunUpdate};
use crate::error::RandomizerError;
use crate::io::fsutil::write_json_atomic;
use crate::io::init::StatePaths;

const RUN_RECORD_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/run_record.v1.schema.json"
));

pub struct RunStore {
    paths: StatePaths,
    validator: Validator,
}

impl RunStore {
    pub fn open(paths: &StatePaths) -> Result<Self> {
        let schema: Value =
            serde_json::from_str(RUN_RECORD_SCHEMA).context("parse run record schema")?;
        let validator = jsonschema::options()
            .with_draft(Draft::Draft202012)
            .build(&schema)
            .map_err(|err| anyhow!("compile run record schema: {err}"))?;
        Ok(Self {
            paths: paths.clone(),
            validator,
        })
    }

    /// Persist a new record in status `started`.
    #[instrument(skip_all, fields(run_id = %fields.run_id))]
    pub fn create(&self, fields: NewRun) -> Result<RunRecord> {
        validate_run_id(&fields.run_id)?;
        let path = self.paths.run_record_path(&fields.run_id);
        if path.exists() {
            return Err(anyhow!("run record {} already exists", path.display()));
        }
        let record = RunRecord::new(fields);
        write_json_atomic(&path, &record)
            .with_context(|| format!("write run record {}", path.display()))?;
        debug!(status = %record.status, "run record created");
        Ok(record)
    }

    /// Load a record, apply `change` and persist the result.
    #[instrument(skip(self, change), fields(run_id = %run_id))]
    pub fn update(&self, run_id: &str, change: RunUpdate) -> Result<RunRecord> {
        let mut record = self.get(run_id)?;
        record
            .apply(change)
            .map_err(|err| RandomizerError::InvalidTransition {
                run_id: run_id.to_string(),
                from: err.from.to_string(),
                to: err.to.to_string(),
            })?;
        let path = self.paths.run_record_path(run_id);
        write_json_atomic(&path, &record)
            .with_context(|| format!("write run record {}", path.display()))?;
        debug!(status = %record.status, "run record updated");
        Ok(record)
    }

    /// Load one record.
    ///
    /// Ids that are not well formed cannot name a record and are reported as
    /// not found without touching the filesystem.
    pub fn get(&self, run_id: &str) -> Result<RunRecord> {
        if validate_run_id(run_id).is_err() {
            return Err(RandomizerError::RunNotFound(run_id.to_string()).into());
        }
        let path = self.paths.run_record_path(run_id);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(RandomizerError::RunNotFound(run_id.to_string()).into());
            }
            Err(err) => {
                return Err(err).with_context(|| format!("read run record {}", path.display()));
            }
        };
        self.parse(run_id, &contents).map_err(|reason| {
            RandomizerError::CorruptRecord {
                run_id: run_id.to_string(),
                reason,
            }
            .into()
        })
    }

    /// Up to `limit` records, most recent first. Corrupt records are skipped.
    pub fn list(&self, limit: usize) -> Result<Vec<RunRecord>> {
        let mut records = Vec::new();
        for run_id in self.run_ids()? {
            if records.len() >= limit {
                break;
            }
            match self.get(&run_id) {
                Ok(record) => records.push(record),
                Err(err) => warn!(run_id = %run_id, err = %format!("{err:#}"), "skipping unreadable run record"),
            }
        }
        Ok(records)
    }

    /// Up to `n` run ids, most recent first, without reading the records.
    pub fn recent_run_ids(&self, n: usize) -> Result<Vec<String>> {
        let mut ids = self.run_ids()?;
        ids.truncate(n);
        Ok(ids)
    }

    /// All run ids in the store, newest first (ids sort chronologically).
    fn run_ids(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.paths.runs_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("read runs directory {}", self.paths.runs_dir.display())
                });
            }
        };
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.context("read runs directory entry")?;
            let path: PathBuf = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str())
                && validate_run_id(stem).is_ok()
            {
                ids.push(stem.to_string());
            }
        }
        ids.sort_unstable_by(|a, b| b.cmp(a));
        Ok(ids)
    }

    fn parse(&self, run_id: &str, contents: &str) -> Result<RunRecord, String> {
        let value: Value = serde_json::from_str(contents).map_err(|err| err.to_string())?;
        let messages: Vec<String> = self
            .validator
            .iter_errors(&value)
            .map(|err| err.to_string())
            .collect();
        if !messages.is_empty() {
            return Err(format!("schema validation failed: {}", messages.join("; ")));
        }
        let record: RunRecord = serde_json::from_value(value).map_err(|err| err.to_string())?;
        if record.run_id != run_id {
            return Err(format!("record names run {}", record.run_id));
        }
        Ok(record)
    }
}
