//! Experiment manifest: creation, append-only recording and finalization
//!
//! The sampler and the executor both append to the manifest while a run is in
//! progress. Artifacts are written to disk first; the shared manifest lock is
//! held only for the in-memory push.

mod store;

pub use store::{ArtifactStore, MANIFEST_FILE, PLAN_FILE, PROBE_LOG_FILE, RESULTS_DIR, SNAPSHOTS_DIR};

use crate::config::ExperimentConfig;
use crate::error::{ExperimentError, Result};
use crate::models::{
    BurstPlan, BurstWindow, ExperimentManifest, LoadResult, ProbeResult, Snapshot, SnapshotRef,
    TelemetryError,
};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Build the initial manifest of a run
pub fn new_manifest(
    run_id: &str,
    seed: u64,
    started_at: DateTime<Utc>,
    config: &ExperimentConfig,
    plan: BurstPlan,
) -> ExperimentManifest {
    let mut endpoints = config.endpoints.clone();
    endpoints.sort_by(|a, b| a.name.cmp(&b.name));

    ExperimentManifest {
        run_id: run_id.to_string(),
        seed,
        started_at,
        finalized_at: None,
        endpoints,
        services: config.services.clone(),
        burst_plan: plan,
        burst_windows: Vec::new(),
        load_results: Vec::new(),
        snapshot_index: Vec::new(),
        probe_log_ref: PROBE_LOG_FILE.to_string(),
        probe_count: 0,
        telemetry_errors: Vec::new(),
        incomplete: false,
        incomplete_reason: None,
    }
}

/// Shared, append-only handle to the manifest of a running experiment
#[derive(Clone)]
pub struct ManifestRecorder {
    manifest: Arc<Mutex<ExperimentManifest>>,
    store: ArtifactStore,
    next_snapshot_seq: Arc<AtomicU64>,
}

impl ManifestRecorder {
    pub fn new(manifest: ExperimentManifest, store: ArtifactStore) -> Self {
        Self {
            manifest: Arc::new(Mutex::new(manifest)),
            store,
            next_snapshot_seq: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Persist the plan and the initial (unfinalized) manifest
    pub async fn persist_initial(&self) -> Result<()> {
        let manifest = self.manifest.lock().await.clone();
        self.store.write_plan(&manifest.burst_plan)?;
        self.store.write_manifest(&manifest)
    }

    pub async fn record_burst_window(&self, window: BurstWindow) {
        self.manifest.lock().await.burst_windows.push(window);
    }

    /// Persist and record the results of one burst
    pub async fn record_load_results(&self, results: Vec<LoadResult>) -> Result<()> {
        for result in &results {
            self.store.write_load_result(result)?;
        }
        self.manifest.lock().await.load_results.extend(results);
        Ok(())
    }

    /// Persist a snapshot and index it.
    ///
    /// Returns `false` when the timestamp does not advance past the last indexed
    /// snapshot; such a snapshot is dropped to keep the index strictly ordered.
    pub async fn record_snapshot(&self, snapshot: &Snapshot) -> Result<bool> {
        if let Some(last) = self.last_snapshot_timestamp().await {
            if snapshot.timestamp <= last {
                warn!(
                    timestamp = %snapshot.timestamp,
                    last = %last,
                    "Dropping snapshot that does not advance the index"
                );
                return Ok(false);
            }
        }

        let seq = self.next_snapshot_seq.fetch_add(1, Ordering::SeqCst);
        let snapshot_ref = self.store.write_snapshot(seq, snapshot)?;
        debug!(seq, snapshot_ref = %snapshot_ref, "Recorded snapshot");

        self.manifest.lock().await.snapshot_index.push(SnapshotRef {
            timestamp: snapshot.timestamp,
            snapshot_ref,
        });
        Ok(true)
    }

    pub async fn record_probes(&self, probes: &[ProbeResult]) -> Result<()> {
        self.store.append_probes(probes)?;
        self.manifest.lock().await.probe_count += probes.len() as u64;
        Ok(())
    }

    pub async fn record_telemetry_errors(&self, errors: Vec<TelemetryError>) {
        self.manifest.lock().await.telemetry_errors.extend(errors);
    }

    pub async fn mark_incomplete(&self, reason: impl Into<String>) {
        let mut manifest = self.manifest.lock().await;
        manifest.incomplete = true;
        // Keep the first reason; later failures are consequences of it
        if manifest.incomplete_reason.is_none() {
            manifest.incomplete_reason = Some(reason.into());
        }
    }

    /// Clone of the current manifest state
    pub async fn current(&self) -> ExperimentManifest {
        self.manifest.lock().await.clone()
    }

    async fn last_snapshot_timestamp(&self) -> Option<DateTime<Utc>> {
        self.manifest
            .lock()
            .await
            .snapshot_index
            .last()
            .map(|s| s.timestamp)
    }

    /// Stamp the manifest as finalized and overwrite `manifest.json` once
    pub async fn finalize(&self, finalized_at: DateTime<Utc>) -> Result<ExperimentManifest> {
        let manifest = {
            let mut manifest = self.manifest.lock().await;
            if manifest.finalized_at.is_some() {
                return Err(ExperimentError::InvalidTransition {
                    from: "finalized".to_string(),
                    to: "finalized".to_string(),
                });
            }
            manifest.finalized_at = Some(finalized_at);
            manifest.clone()
        };
        self.store.write_manifest(&manifest)?;
        Ok(manifest)
    }
}
