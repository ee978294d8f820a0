//! Offline correlation of a finalized run
//!
//! Joins per-burst load results with the snapshots and probes captured by
//! the sampler, by timestamp window, and writes the resulting tables next to
//! the manifest.

mod join;
mod report;
mod tables;

pub use join::{Attribution, BurstTimeline};
pub use report::{replica_csv, summary_text};
pub use tables::{
    ClusterSummary, EndpointLatencyRow, EndpointSummary, NodePairRow, NodeUsageRow,
    NodeUsageSummary, PathSummary, PlacementRow, ProbeSummary, ReplicaRow,
};

use crate::error::{ExperimentError, Result};
use crate::manifest::ArtifactStore;
use crate::models::{ExperimentManifest, LoadResult, Snapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const ANALYSIS_FILE: &str = "analysis.json";
pub const REPLICA_CSV_FILE: &str = "latency-vs-replicas.csv";
pub const SUMMARY_FILE: &str = "analysis-summary.txt";

/// Every table derived from one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub run_id: String,
    pub seed: u64,
    pub started_at: DateTime<Utc>,
    pub finalized_at: Option<DateTime<Utc>>,
    pub incomplete: bool,
    pub incomplete_reason: Option<String>,
    pub warnings: Vec<String>,
    pub planned_bursts: usize,
    /// Bursts with a result for every endpoint; the only ones analyzed
    pub complete_bursts: Vec<usize>,
    pub snapshot_count: usize,
    pub probe_count: usize,
    pub telemetry_error_count: usize,
    pub endpoint_latency: Vec<EndpointLatencyRow>,
    pub placement: Vec<PlacementRow>,
    /// Empty when the metrics API never answered
    pub node_usage: Vec<NodeUsageRow>,
    pub node_usage_summary: BTreeMap<String, NodeUsageSummary>,
    pub node_pairs: Vec<NodePairRow>,
    pub replicas: Vec<ReplicaRow>,
    pub endpoint_summary: BTreeMap<String, EndpointSummary>,
    pub cluster_summary: ClusterSummary,
    pub paths: BTreeMap<String, PathSummary>,
    pub probe_summary: ProbeSummary,
    pub pod_movements: BTreeMap<String, Vec<String>>,
    pub service_node_spread: BTreeMap<String, BTreeMap<String, f64>>,
    pub latest_node_pods: BTreeMap<String, Vec<String>>,
}

/// Result of checking a manifest before analysis
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManifestCheck {
    pub complete_bursts: BTreeSet<usize>,
    pub warnings: Vec<String>,
}

/// Check the manifest's invariants and find the bursts that can be analyzed
pub fn validate_manifest(manifest: &ExperimentManifest) -> Result<ManifestCheck> {
    if !manifest.is_finalized() {
        return Err(ExperimentError::invalid_manifest(format!(
            "run {} is not finalized",
            manifest.run_id
        )));
    }

    for (position, burst) in manifest.burst_plan.iter().enumerate() {
        if burst.index != position {
            return Err(ExperimentError::invalid_manifest(format!(
                "plan entry {} carries index {}",
                position, burst.index
            )));
        }
    }

    let mut seen: BTreeMap<usize, BTreeSet<&str>> = BTreeMap::new();
    for result in &manifest.load_results {
        let burst = manifest.burst_plan.get(result.burst_index).ok_or_else(|| {
            ExperimentError::invalid_manifest(format!(
                "load result references unknown burst {}",
                result.burst_index
            ))
        })?;
        if !burst.per_endpoint_rate.contains_key(&result.endpoint_name) {
            return Err(ExperimentError::invalid_manifest(format!(
                "burst {} has a result for unplanned endpoint '{}'",
                result.burst_index, result.endpoint_name
            )));
        }
        if !seen
            .entry(result.burst_index)
            .or_default()
            .insert(&result.endpoint_name)
        {
            return Err(ExperimentError::invalid_manifest(format!(
                "burst {} has more than one result for endpoint '{}'",
                result.burst_index, result.endpoint_name
            )));
        }
    }

    for pair in manifest.snapshot_index.windows(2) {
        if pair[1].timestamp <= pair[0].timestamp {
            return Err(ExperimentError::invalid_manifest(format!(
                "snapshot index is not strictly increasing at {}",
                pair[1].snapshot_ref
            )));
        }
    }

    let mut check = ManifestCheck::default();
    for burst in &manifest.burst_plan {
        let endpoints = seen.get(&burst.index).map(|s| s.len()).unwrap_or(0);
        if endpoints == burst.per_endpoint_rate.len() {
            check.complete_bursts.insert(burst.index);
        } else if endpoints > 0 {
            check.warnings.push(format!(
                "burst {} has {} of {} endpoint results and is excluded",
                burst.index,
                endpoints,
                burst.per_endpoint_rate.len()
            ));
        }
    }

    let expected = manifest.expected_result_count();
    if manifest.load_results.len() != expected {
        if !manifest.incomplete {
            return Err(ExperimentError::invalid_manifest(format!(
                "{} load results for {} bursts x {} endpoints, but the run is not marked incomplete",
                manifest.load_results.len(),
                manifest.burst_plan.len(),
                manifest.endpoints.len()
            )));
        }
        check.warnings.insert(
            0,
            format!(
                "incomplete run: {} of {} bursts completed ({})",
                check.complete_bursts.len(),
                manifest.burst_plan.len(),
                manifest
                    .incomplete_reason
                    .as_deref()
                    .unwrap_or("no reason recorded")
            ),
        );
    } else if manifest.incomplete {
        check.warnings.insert(
            0,
            format!(
                "run marked incomplete although every burst has results ({})",
                manifest
                    .incomplete_reason
                    .as_deref()
                    .unwrap_or("no reason recorded")
            ),
        );
    }

    Ok(check)
}

/// Offline analysis over one run directory
pub struct Correlator {
    store: ArtifactStore,
}

impl Correlator {
    pub fn new(store: ArtifactStore) -> Self {
        Self { store }
    }

    pub fn open(run_dir: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self::new(ArtifactStore::open(run_dir)?))
    }

    pub fn run_dir(&self) -> &Path {
        self.store.run_dir()
    }

    /// Validate the manifest and build every table
    pub fn analyze(&self) -> Result<Analysis> {
        let manifest = self.store.read_manifest()?;
        let check = validate_manifest(&manifest)?;
        let mut warnings = check.warnings;

        let mut snapshots: Vec<Snapshot> = Vec::with_capacity(manifest.snapshot_index.len());
        for entry in &manifest.snapshot_index {
            match self.store.read_snapshot(&entry.snapshot_ref) {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => {
                    warn!(snapshot = %entry.snapshot_ref, error = %e, "Skipping unreadable snapshot");
                    warnings.push(format!("snapshot {} unreadable: {}", entry.snapshot_ref, e));
                }
            }
        }

        let probes = self.store.read_probes(&manifest.probe_log_ref)?;
        if probes.len() as u64 != manifest.probe_count {
            warnings.push(format!(
                "probe log holds {} entries, manifest counted {}",
                probes.len(),
                manifest.probe_count
            ));
        }

        let results: Vec<LoadResult> = manifest
            .load_results
            .iter()
            .filter(|r| check.complete_bursts.contains(&r.burst_index))
            .cloned()
            .collect();
        let timeline = BurstTimeline::new(&manifest.burst_windows);

        let paths = tables::paths(&probes);
        let node_usage = tables::node_usage(&snapshots, &timeline);
        let analysis = Analysis {
            run_id: manifest.run_id.clone(),
            seed: manifest.seed,
            started_at: manifest.started_at,
            finalized_at: manifest.finalized_at,
            incomplete: manifest.incomplete,
            incomplete_reason: manifest.incomplete_reason.clone(),
            planned_bursts: manifest.burst_plan.len(),
            complete_bursts: check.complete_bursts.iter().copied().collect(),
            snapshot_count: snapshots.len(),
            probe_count: probes.len(),
            telemetry_error_count: manifest.telemetry_errors.len(),
            endpoint_latency: tables::endpoint_latency(&results, &manifest.burst_windows),
            placement: tables::placement(&snapshots, &timeline),
            node_usage_summary: tables::node_usage_summary(&node_usage),
            node_usage,
            node_pairs: tables::node_pairs(&probes),
            replicas: tables::replicas(&tables::ReplicaInputs {
                snapshots: &snapshots,
                timeline: &timeline,
                results: &results,
                probes: &probes,
                services: &manifest.services,
            }),
            endpoint_summary: tables::endpoint_summary(&results),
            cluster_summary: tables::cluster_summary(&results),
            probe_summary: tables::probe_summary(&probes, &paths, &snapshots),
            paths,
            pod_movements: tables::pod_movements(&snapshots),
            service_node_spread: tables::service_node_spread(&snapshots),
            latest_node_pods: tables::latest_node_pods(&snapshots),
            warnings,
        };

        info!(
            run_id = %analysis.run_id,
            complete_bursts = analysis.complete_bursts.len(),
            planned_bursts = analysis.planned_bursts,
            snapshots = analysis.snapshot_count,
            probes = analysis.probe_count,
            incomplete = analysis.incomplete,
            "Analysis built"
        );
        Ok(analysis)
    }

    /// Write `analysis.json`, the replica CSV and the text summary
    pub fn write_outputs(&self, analysis: &Analysis) -> Result<Vec<PathBuf>> {
        self.store.write_json(ANALYSIS_FILE, analysis)?;
        self.store
            .write_text(REPLICA_CSV_FILE, &replica_csv(&analysis.replicas)?)?;
        self.store.write_text(SUMMARY_FILE, &summary_text(analysis))?;

        Ok([ANALYSIS_FILE, REPLICA_CSV_FILE, SUMMARY_FILE]
            .iter()
            .map(|f| self.store.path(f))
            .collect())
    }

    /// Analyze and write outputs in one step
    pub fn run(&self) -> Result<Analysis> {
        let analysis = self.analyze()?;
        self.write_outputs(&analysis)?;
        Ok(analysis)
    }
}
