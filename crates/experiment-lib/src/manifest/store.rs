//! On-disk layout of one run directory
//!
//! ```text
//! <output_dir>/<run_id>/
//!   plan.jsonl
//!   manifest.json
//!   probes.jsonl
//!   results/burst-<index>-<endpoint>.json
//!   snapshots/snapshot-<seq>.json
//!   analysis.json, latency-vs-replicas.csv, analysis-summary.txt
//! ```

use crate::error::{ExperimentError, Result};
use crate::models::{BurstPlan, ExperimentManifest, LoadResult, ProbeResult, Snapshot};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const PLAN_FILE: &str = "plan.jsonl";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const PROBE_LOG_FILE: &str = "probes.jsonl";
pub const RESULTS_DIR: &str = "results";
pub const SNAPSHOTS_DIR: &str = "snapshots";

/// Reads and writes the artifacts of a single run
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    run_dir: PathBuf,
}

impl ArtifactStore {
    /// Create `<output_dir>/<run_id>` and its sub-directories
    pub fn create(output_dir: &Path, run_id: &str) -> Result<Self> {
        let run_dir = output_dir.join(run_id);
        std::fs::create_dir_all(run_dir.join(RESULTS_DIR))?;
        std::fs::create_dir_all(run_dir.join(SNAPSHOTS_DIR))?;
        debug!(run_dir = %run_dir.display(), "Created run directory");
        Ok(Self { run_dir })
    }

    /// Open an existing run directory for reading
    pub fn open(run_dir: impl Into<PathBuf>) -> Result<Self> {
        let run_dir = run_dir.into();
        if !run_dir.join(MANIFEST_FILE).is_file() {
            return Err(ExperimentError::invalid_manifest(format!(
                "no {} in {}",
                MANIFEST_FILE,
                run_dir.display()
            )));
        }
        Ok(Self { run_dir })
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.run_dir.join(relative)
    }

    pub fn write_plan(&self, plan: &BurstPlan) -> Result<()> {
        let mut body = Vec::new();
        for burst in plan {
            serde_json::to_writer(&mut body, burst)?;
            body.push(b'\n');
        }
        write_atomic(&self.path(PLAN_FILE), &body)
    }

    pub fn read_plan(&self) -> Result<BurstPlan> {
        read_jsonl(&self.path(PLAN_FILE))
    }

    pub fn write_manifest(&self, manifest: &ExperimentManifest) -> Result<()> {
        write_json(&self.path(MANIFEST_FILE), manifest)
    }

    pub fn read_manifest(&self) -> Result<ExperimentManifest> {
        read_json(&self.path(MANIFEST_FILE))
    }

    /// Persist one load result; returns its path relative to the run directory
    pub fn write_load_result(&self, result: &LoadResult) -> Result<String> {
        let relative = format!(
            "{}/burst-{}-{}.json",
            RESULTS_DIR,
            result.burst_index,
            file_safe(&result.endpoint_name)
        );
        write_json(&self.path(&relative), result)?;
        Ok(relative)
    }

    /// Persist one snapshot; returns its path relative to the run directory
    pub fn write_snapshot(&self, seq: u64, snapshot: &Snapshot) -> Result<String> {
        let relative = format!("{}/snapshot-{:05}.json", SNAPSHOTS_DIR, seq);
        write_json(&self.path(&relative), snapshot)?;
        Ok(relative)
    }

    pub fn read_snapshot(&self, snapshot_ref: &str) -> Result<Snapshot> {
        read_json(&self.path(snapshot_ref))
    }

    /// Append probe records to the probe log
    pub fn append_probes(&self, probes: &[ProbeResult]) -> Result<()> {
        if probes.is_empty() {
            return Ok(());
        }
        let mut body = Vec::new();
        for probe in probes {
            serde_json::to_writer(&mut body, probe)?;
            body.push(b'\n');
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(PROBE_LOG_FILE))?;
        file.write_all(&body)?;
        Ok(())
    }

    /// Read a JSONL probe log; a missing log reads as empty
    pub fn read_probes(&self, probe_log_ref: &str) -> Result<Vec<ProbeResult>> {
        let path = self.path(probe_log_ref);
        if !path.exists() {
            return Ok(Vec::new());
        }
        read_jsonl(&path)
    }

    pub fn write_json<T: Serialize>(&self, relative: &str, value: &T) -> Result<()> {
        write_json(&self.path(relative), value)
    }

    pub fn write_text(&self, relative: &str, content: &str) -> Result<()> {
        write_atomic(&self.path(relative), content.as_bytes())
    }
}

/// Write through a temp file and rename so readers never see a partial file
fn write_atomic(path: &Path, body: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let temp_path = path.with_extension("tmp");
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)?;
    file.write_all(body)?;
    file.sync_all()?;
    std::fs::rename(&temp_path, path)?;
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let body = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &body)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = File::open(path)?;
    let mut records = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(serde_json::from_str(&line)?);
    }
    Ok(records)
}

/// Endpoint names end up in file names
fn file_safe(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
