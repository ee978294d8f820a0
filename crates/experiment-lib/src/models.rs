//! Core data models for burst experiments
//!
//! Every record here is written to disk as JSON and read back by the
//! correlator, so field names are part of the artifact format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::{EndpointConfig, ServiceConfig};

/// Percentiles reported for every load result
pub const REPORTED_PERCENTILES: &[f64] = &[50.0, 90.0, 95.0, 99.0, 99.9];

/// Percentile -> latency in seconds, keyed by the formatted percentile ("50", "99.9")
pub type PercentileMap = BTreeMap<String, f64>;

/// Map key used for a percentile in [`PercentileMap`]
pub fn percentile_key(q: f64) -> String {
    format!("{}", q)
}

/// How a burst's rate was drawn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BurstKind {
    HeavyTail,
    Spike,
}

impl BurstKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BurstKind::HeavyTail => "heavy_tail",
            BurstKind::Spike => "spike",
        }
    }
}

/// One entry of a burst plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BurstDescriptor {
    pub index: usize,
    pub kind: BurstKind,
    pub total_rate: f64,
    pub duration_seconds: u64,
    pub inter_burst_pause_seconds: u64,
    pub per_endpoint_rate: BTreeMap<String, f64>,
}

/// Ordered sequence of bursts, persisted before execution
pub type BurstPlan = Vec<BurstDescriptor>;

/// Result of one endpoint's load generator for one burst
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadResult {
    pub burst_index: usize,
    pub endpoint_name: String,
    pub requested_rate: f64,
    pub achieved_rate: f64,
    pub duration_ns: u64,
    pub latency_percentiles: PercentileMap,
    pub request_count: u64,
    pub error_count: u64,
}

impl LoadResult {
    /// Latency at percentile `q` in seconds, if the generator reported it
    pub fn percentile(&self, q: f64) -> Option<f64> {
        self.latency_percentiles.get(&percentile_key(q)).copied()
    }

    /// Number of requests that completed successfully
    pub fn success_count(&self) -> u64 {
        self.request_count.saturating_sub(self.error_count)
    }
}

/// Wall-clock window in which a burst actually ran
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BurstWindow {
    pub burst_index: usize,
    pub started_at: DateTime<Utc>,
    pub duration_seconds: u64,
}

impl BurstWindow {
    /// Exclusive end of the window: `started_at + duration_seconds`
    pub fn ends_at(&self) -> DateTime<Utc> {
        self.started_at + chrono::Duration::seconds(self.duration_seconds as i64)
    }

    /// Whether `ts` falls inside `[started_at, ends_at)`
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.started_at && ts < self.ends_at()
    }
}

/// Kubernetes pod lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    pub fn parse(phase: &str) -> Self {
        match phase {
            "Pending" => PodPhase::Pending,
            "Running" => PodPhase::Running,
            "Succeeded" => PodPhase::Succeeded,
            "Failed" => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }
}

/// Where one pod is scheduled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodPlacement {
    pub pod_id: String,
    pub node_id: String,
    pub service_name: String,
    pub phase: PodPhase,
}

impl PodPlacement {
    pub fn is_live(&self) -> bool {
        self.phase == PodPhase::Running && !self.node_id.is_empty()
    }
}

/// Autoscaler status for one service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoscalerStatus {
    pub desired_replicas: i32,
    pub current_replicas: i32,
    pub observed_metric_value: Option<f64>,
}

/// CPU and memory in use by one pod or node
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub cpu_cores: f64,
    pub memory_bytes: f64,
}

/// Resource usage as reported by the cluster's metrics API
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageReport {
    pub pods: BTreeMap<String, ResourceUsage>,
    pub nodes: BTreeMap<String, ResourceUsage>,
}

impl UsageReport {
    pub fn is_empty(&self) -> bool {
        self.pods.is_empty() && self.nodes.is_empty()
    }
}

/// One timestamped capture of cluster state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub timestamp: DateTime<Utc>,
    pub pod_placement: Vec<PodPlacement>,
    pub service_endpoints: BTreeMap<String, Vec<String>>,
    pub autoscaler_state: BTreeMap<String, AutoscalerStatus>,
    /// Empty when the metrics API was unavailable for this tick
    #[serde(default, skip_serializing_if = "UsageReport::is_empty")]
    pub resource_usage: UsageReport,
}

impl Snapshot {
    /// Running pods of `service`
    pub fn live_pods<'a>(&'a self, service: &'a str) -> impl Iterator<Item = &'a PodPlacement> {
        self.pod_placement
            .iter()
            .filter(move |p| p.service_name == service && p.is_live())
    }

    /// Nodes hosting at least one endpoint pod of `service`
    pub fn endpoint_nodes(&self, service: &str) -> Vec<String> {
        let Some(pods) = self.service_endpoints.get(service) else {
            return Vec::new();
        };
        let mut nodes: Vec<String> = self
            .pod_placement
            .iter()
            .filter(|p| pods.contains(&p.pod_id) && !p.node_id.is_empty())
            .map(|p| p.node_id.clone())
            .collect();
        nodes.sort();
        nodes.dedup();
        nodes
    }
}

/// One latency probe from a live pod to a service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub timestamp: DateTime<Utc>,
    pub source_pod: String,
    pub source_node: String,
    pub target_service: String,
    pub dns_seconds: Option<f64>,
    pub connect_seconds: Option<f64>,
    pub ttfb_seconds: Option<f64>,
    pub total_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProbeResult {
    /// An explicit error entry for a probe that could not be taken
    pub fn failed(
        timestamp: DateTime<Utc>,
        source_pod: impl Into<String>,
        source_node: impl Into<String>,
        target_service: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            source_pod: source_pod.into(),
            source_node: source_node.into(),
            target_service: target_service.into(),
            dns_seconds: None,
            connect_seconds: None,
            ttfb_seconds: None,
            total_seconds: None,
            status_code: None,
            error: Some(error.into()),
        }
    }

    /// Failed to run, or the target answered with a 4xx/5xx status
    pub fn is_error(&self) -> bool {
        self.error.is_some() || self.status_code.map(|c| c >= 400).unwrap_or(false)
    }

    /// Time spent between connect and first byte (server/queue delay)
    pub fn queueing_seconds(&self) -> Option<f64> {
        match (self.ttfb_seconds, self.connect_seconds) {
            (Some(ttfb), Some(connect)) => Some(ttfb - connect),
            _ => None,
        }
    }
}

/// Which cluster read failed during a sampler tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetrySource {
    PodPlacement,
    ServiceEndpoints,
    AutoscalerState,
    ResourceUsage,
}

impl TelemetrySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TelemetrySource::PodPlacement => "pod_placement",
            TelemetrySource::ServiceEndpoints => "service_endpoints",
            TelemetrySource::AutoscalerState => "autoscaler_state",
            TelemetrySource::ResourceUsage => "resource_usage",
        }
    }
}

/// Explicit record of a failed telemetry read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryError {
    pub timestamp: DateTime<Utc>,
    pub source: TelemetrySource,
    pub message: String,
}

/// Pointer from the manifest to a persisted snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRef {
    pub timestamp: DateTime<Utc>,
    pub snapshot_ref: String,
}

/// Persisted record of one experiment run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentManifest {
    pub run_id: String,
    pub seed: u64,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalized_at: Option<DateTime<Utc>>,
    pub endpoints: Vec<EndpointConfig>,
    #[serde(default)]
    pub services: BTreeMap<String, ServiceConfig>,
    pub burst_plan: BurstPlan,
    pub burst_windows: Vec<BurstWindow>,
    pub load_results: Vec<LoadResult>,
    pub snapshot_index: Vec<SnapshotRef>,
    pub probe_log_ref: String,
    pub probe_count: u64,
    pub telemetry_errors: Vec<TelemetryError>,
    pub incomplete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incomplete_reason: Option<String>,
}

impl ExperimentManifest {
    /// Number of load results a fully completed run produces
    pub fn expected_result_count(&self) -> usize {
        self.burst_plan.len() * self.endpoints.len()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized_at.is_some()
    }

    pub fn endpoint_names(&self) -> Vec<String> {
        self.endpoints.iter().map(|e| e.name.clone()).collect()
    }
}
