//! Table builders over validated run data
//!
//! All latencies are in seconds; the text report converts to milliseconds.

use super::join::{Attribution, BurstTimeline};
use crate::config::ServiceConfig;
use crate::models::{BurstWindow, LoadResult, PercentileMap, ProbeResult, Snapshot};
use crate::stats::{self, percentile_of};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// (a) one endpoint's latency for one burst
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointLatencyRow {
    pub burst_index: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub endpoint: String,
    pub requested_rate: f64,
    pub achieved_rate: f64,
    pub request_count: u64,
    pub error_count: u64,
    pub latency_percentiles: PercentileMap,
}

/// (b) live pods of one service on one node at one snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementRow {
    pub timestamp: DateTime<Utc>,
    pub window: Attribution,
    pub service: String,
    pub node: String,
    pub live_pods: usize,
}

/// CPU and memory of one node at one snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeUsageRow {
    pub timestamp: DateTime<Utc>,
    pub window: Attribution,
    pub node: String,
    pub cpu_cores: f64,
    pub memory_bytes: f64,
    pub live_pods: usize,
}

/// Per-node usage during bursts against idle periods
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeUsageSummary {
    pub samples: usize,
    pub peak_cpu_cores: f64,
    pub peak_window: Attribution,
    pub peak_memory_bytes: f64,
    pub burst_cpu_avg: Option<f64>,
    pub idle_cpu_avg: Option<f64>,
}

/// (c) probe tail latency from one node to one service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodePairRow {
    pub source_node: String,
    pub target_service: String,
    pub samples: usize,
    pub total_avg: Option<f64>,
    pub total_p95: Option<f64>,
    pub total_p99: Option<f64>,
}

/// (d) one service's replicas at one snapshot next to the latency it served
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaRow {
    pub timestamp: DateTime<Utc>,
    pub window: Attribution,
    /// Burst the endpoint latency was taken from
    pub latency_source_burst: Option<usize>,
    pub service: String,
    pub desired_replicas: i32,
    pub current_replicas: i32,
    pub observed_metric_value: Option<f64>,
    pub dependent_endpoint: Option<String>,
    pub endpoint_p95: Option<f64>,
    pub endpoint_p99: Option<f64>,
    /// Service-to-service probe latency at this tick
    pub s2s_p95: Option<f64>,
    pub s2s_p99: Option<f64>,
    pub at_max_replicas: bool,
    pub above_target_utilization: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointSummary {
    pub runs: usize,
    pub total_requests: u64,
    pub total_errors: u64,
    pub avg_achieved_rate: Option<f64>,
    pub max_achieved_rate: Option<f64>,
    pub p95_median: Option<f64>,
    pub p95_max: Option<f64>,
    pub p99_median: Option<f64>,
    pub p99_max: Option<f64>,
}

/// Combined achieved rate across endpoints, per burst
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub burst_count: usize,
    pub combined_rate_avg: Option<f64>,
    pub combined_rate_p95: Option<f64>,
    pub combined_rate_max: Option<f64>,
}

/// Probe statistics of one `source_pod -> target_service` path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathSummary {
    pub source_pod: String,
    pub source_node: String,
    pub target_service: String,
    pub samples: usize,
    pub total_avg: Option<f64>,
    pub total_p95: Option<f64>,
    pub total_p99: Option<f64>,
    pub dns_avg: Option<f64>,
    pub connect_avg: Option<f64>,
    pub ttfb_avg: Option<f64>,
    /// ttfb - connect: time spent waiting on the server
    pub queueing_avg: Option<f64>,
    pub error_rate: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeSummary {
    pub path_count: usize,
    pub total_samples: usize,
    pub attempts: usize,
    pub error_entries: usize,
    /// Share of probes whose source node also hosts a target endpoint
    pub intra_node_ratio: Option<f64>,
}

pub fn endpoint_latency(results: &[LoadResult], windows: &[BurstWindow]) -> Vec<EndpointLatencyRow> {
    let starts: BTreeMap<usize, DateTime<Utc>> =
        windows.iter().map(|w| (w.burst_index, w.started_at)).collect();
    results
        .iter()
        .map(|r| EndpointLatencyRow {
            burst_index: r.burst_index,
            started_at: starts.get(&r.burst_index).copied(),
            endpoint: r.endpoint_name.clone(),
            requested_rate: r.requested_rate,
            achieved_rate: r.achieved_rate,
            request_count: r.request_count,
            error_count: r.error_count,
            latency_percentiles: r.latency_percentiles.clone(),
        })
        .collect()
}

pub fn placement(snapshots: &[Snapshot], timeline: &BurstTimeline) -> Vec<PlacementRow> {
    let mut rows = Vec::new();
    for snapshot in snapshots {
        let window = timeline.attribute(snapshot.timestamp);
        for ((service, node), live_pods) in live_pod_counts(snapshot) {
            rows.push(PlacementRow {
                timestamp: snapshot.timestamp,
                window,
                service,
                node,
                live_pods,
            });
        }
    }
    rows
}

/// Nodes reported by the metrics API, one row per snapshot
pub fn node_usage(snapshots: &[Snapshot], timeline: &BurstTimeline) -> Vec<NodeUsageRow> {
    let mut rows = Vec::new();
    for snapshot in snapshots {
        let window = timeline.attribute(snapshot.timestamp);
        for (node, usage) in &snapshot.resource_usage.nodes {
            rows.push(NodeUsageRow {
                timestamp: snapshot.timestamp,
                window,
                node: node.clone(),
                cpu_cores: usage.cpu_cores,
                memory_bytes: usage.memory_bytes,
                live_pods: snapshot
                    .pod_placement
                    .iter()
                    .filter(|p| p.is_live() && &p.node_id == node)
                    .count(),
            });
        }
    }
    rows
}

pub fn node_usage_summary(rows: &[NodeUsageRow]) -> BTreeMap<String, NodeUsageSummary> {
    let mut by_node: BTreeMap<&str, Vec<&NodeUsageRow>> = BTreeMap::new();
    for row in rows {
        by_node.entry(row.node.as_str()).or_default().push(row);
    }

    by_node
        .into_iter()
        .filter_map(|(node, rows)| {
            let peak = rows
                .iter()
                .copied()
                .max_by(|a, b| a.cpu_cores.total_cmp(&b.cpu_cores))?;
            let cpu_where = |burst: bool| -> Vec<f64> {
                rows.iter()
                    .filter(|r| matches!(r.window, Attribution::Burst(_)) == burst)
                    .map(|r| r.cpu_cores)
                    .collect()
            };
            Some((
                node.to_string(),
                NodeUsageSummary {
                    samples: rows.len(),
                    peak_cpu_cores: peak.cpu_cores,
                    peak_window: peak.window,
                    peak_memory_bytes: rows
                        .iter()
                        .map(|r| r.memory_bytes)
                        .fold(0.0, f64::max),
                    burst_cpu_avg: stats::mean(&cpu_where(true)),
                    idle_cpu_avg: stats::mean(&cpu_where(false)),
                },
            ))
        })
        .collect()
}

fn live_pod_counts(snapshot: &Snapshot) -> BTreeMap<(String, String), usize> {
    let mut counts = BTreeMap::new();
    for pod in snapshot.pod_placement.iter().filter(|p| p.is_live()) {
        *counts
            .entry((pod.service_name.clone(), pod.node_id.clone()))
            .or_insert(0) += 1;
    }
    counts
}

/// Totals of probes that got a non-error response
fn good_total(probe: &ProbeResult) -> Option<f64> {
    if probe.is_error() {
        None
    } else {
        probe.total_seconds
    }
}

pub fn node_pairs(probes: &[ProbeResult]) -> Vec<NodePairRow> {
    let mut totals: BTreeMap<(String, String), Vec<f64>> = BTreeMap::new();
    for probe in probes.iter().filter(|p| !p.source_node.is_empty()) {
        if let Some(total) = good_total(probe) {
            totals
                .entry((probe.source_node.clone(), probe.target_service.clone()))
                .or_default()
                .push(total);
        }
    }
    totals
        .into_iter()
        .map(|((source_node, target_service), values)| NodePairRow {
            source_node,
            target_service,
            samples: values.len(),
            total_avg: stats::mean(&values),
            total_p95: percentile_of(&values, 95.0),
            total_p99: percentile_of(&values, 99.0),
        })
        .collect()
}

/// Inputs of the replica-vs-latency table
pub struct ReplicaInputs<'a> {
    pub snapshots: &'a [Snapshot],
    pub timeline: &'a BurstTimeline,
    /// Results of complete bursts only
    pub results: &'a [LoadResult],
    pub probes: &'a [ProbeResult],
    pub services: &'a BTreeMap<String, ServiceConfig>,
}

pub fn replicas(inputs: &ReplicaInputs<'_>) -> Vec<ReplicaRow> {
    let mut probe_totals: BTreeMap<DateTime<Utc>, Vec<f64>> = BTreeMap::new();
    for probe in inputs.probes {
        if let Some(total) = good_total(probe) {
            probe_totals.entry(probe.timestamp).or_default().push(total);
        }
    }

    let mut rows = Vec::new();
    for snapshot in inputs.snapshots {
        let window = inputs.timeline.attribute(snapshot.timestamp);
        let latency_source_burst = match window {
            Attribution::Burst(index) => Some(index),
            Attribution::Idle => inputs.timeline.latency_source(snapshot.timestamp),
        };
        let s2s = probe_totals.get(&snapshot.timestamp);
        let s2s_p95 = s2s.and_then(|v| percentile_of(v, 95.0));
        let s2s_p99 = s2s.and_then(|v| percentile_of(v, 99.0));

        for (service, status) in &snapshot.autoscaler_state {
            let config = inputs.services.get(service);
            let dependent_endpoint = config.and_then(|c| c.dependent_endpoint.clone());
            let result = match (&dependent_endpoint, latency_source_burst) {
                (Some(endpoint), Some(burst)) => inputs
                    .results
                    .iter()
                    .find(|r| r.burst_index == burst && &r.endpoint_name == endpoint),
                _ => None,
            };

            let at_max_replicas = config
                .and_then(|c| c.max_replicas)
                .map(|max| status.current_replicas >= max)
                .unwrap_or(false);
            let above_target_utilization = match (
                config.and_then(|c| c.target_utilization),
                status.observed_metric_value,
            ) {
                (Some(target), Some(observed)) => observed > target,
                _ => false,
            };

            rows.push(ReplicaRow {
                timestamp: snapshot.timestamp,
                window,
                latency_source_burst,
                service: service.clone(),
                desired_replicas: status.desired_replicas,
                current_replicas: status.current_replicas,
                observed_metric_value: status.observed_metric_value,
                dependent_endpoint,
                endpoint_p95: result.and_then(|r| r.percentile(95.0)),
                endpoint_p99: result.and_then(|r| r.percentile(99.0)),
                s2s_p95,
                s2s_p99,
                at_max_replicas,
                above_target_utilization,
            });
        }
    }
    rows
}

pub fn endpoint_summary(results: &[LoadResult]) -> BTreeMap<String, EndpointSummary> {
    let mut by_endpoint: BTreeMap<&str, Vec<&LoadResult>> = BTreeMap::new();
    for result in results {
        by_endpoint.entry(&result.endpoint_name).or_default().push(result);
    }

    by_endpoint
        .into_iter()
        .map(|(endpoint, rows)| {
            let rates: Vec<f64> = rows.iter().map(|r| r.achieved_rate).collect();
            let p95s: Vec<f64> = rows.iter().filter_map(|r| r.percentile(95.0)).collect();
            let p99s: Vec<f64> = rows.iter().filter_map(|r| r.percentile(99.0)).collect();
            let summary = EndpointSummary {
                runs: rows.len(),
                total_requests: rows.iter().map(|r| r.request_count).sum(),
                total_errors: rows.iter().map(|r| r.error_count).sum(),
                avg_achieved_rate: stats::mean(&rates),
                max_achieved_rate: stats::max(&rates),
                p95_median: percentile_of(&p95s, 50.0),
                p95_max: stats::max(&p95s),
                p99_median: percentile_of(&p99s, 50.0),
                p99_max: stats::max(&p99s),
            };
            (endpoint.to_string(), summary)
        })
        .collect()
}

pub fn cluster_summary(results: &[LoadResult]) -> ClusterSummary {
    let mut per_burst: BTreeMap<usize, f64> = BTreeMap::new();
    for result in results {
        *per_burst.entry(result.burst_index).or_insert(0.0) += result.achieved_rate;
    }
    let combined: Vec<f64> = per_burst.values().copied().collect();
    ClusterSummary {
        burst_count: per_burst.len(),
        combined_rate_avg: stats::mean(&combined),
        combined_rate_p95: percentile_of(&combined, 95.0),
        combined_rate_max: stats::max(&combined),
    }
}

pub fn path_key(source_pod: &str, target_service: &str) -> String {
    format!("{}->{}", source_pod, target_service)
}

pub fn paths(probes: &[ProbeResult]) -> BTreeMap<String, PathSummary> {
    let mut grouped: BTreeMap<String, Vec<&ProbeResult>> = BTreeMap::new();
    for probe in probes.iter().filter(|p| !p.source_pod.is_empty()) {
        grouped
            .entry(path_key(&probe.source_pod, &probe.target_service))
            .or_default()
            .push(probe);
    }

    grouped
        .into_iter()
        .filter_map(|(key, attempts)| {
            let totals: Vec<f64> = attempts.iter().filter_map(|p| p.total_seconds).collect();
            if totals.is_empty() {
                return None;
            }
            let collect = |f: fn(&ProbeResult) -> Option<f64>| -> Vec<f64> {
                attempts.iter().filter_map(|p| f(p)).collect()
            };
            let errors = attempts.iter().filter(|p| p.is_error()).count();
            let first = attempts[0];
            Some((
                key,
                PathSummary {
                    source_pod: first.source_pod.clone(),
                    source_node: first.source_node.clone(),
                    target_service: first.target_service.clone(),
                    samples: totals.len(),
                    total_avg: stats::mean(&totals),
                    total_p95: percentile_of(&totals, 95.0),
                    total_p99: percentile_of(&totals, 99.0),
                    dns_avg: stats::mean(&collect(|p| p.dns_seconds)),
                    connect_avg: stats::mean(&collect(|p| p.connect_seconds)),
                    ttfb_avg: stats::mean(&collect(|p| p.ttfb_seconds)),
                    queueing_avg: stats::mean(&collect(|p| p.queueing_seconds())),
                    error_rate: Some(errors as f64 / attempts.len() as f64),
                },
            ))
        })
        .collect()
}

pub fn probe_summary(
    probes: &[ProbeResult],
    paths: &BTreeMap<String, PathSummary>,
    snapshots: &[Snapshot],
) -> ProbeSummary {
    let by_timestamp: BTreeMap<DateTime<Utc>, &Snapshot> =
        snapshots.iter().map(|s| (s.timestamp, s)).collect();

    let mut same_node = 0usize;
    let mut comparable = 0usize;
    for probe in probes.iter().filter(|p| !p.source_node.is_empty()) {
        let Some(snapshot) = by_timestamp.get(&probe.timestamp) else {
            continue;
        };
        let target_nodes = snapshot.endpoint_nodes(&probe.target_service);
        if target_nodes.is_empty() {
            continue;
        }
        comparable += 1;
        if target_nodes.contains(&probe.source_node) {
            same_node += 1;
        }
    }

    ProbeSummary {
        path_count: paths.len(),
        total_samples: paths.values().map(|p| p.samples).sum(),
        attempts: probes.len(),
        error_entries: probes.iter().filter(|p| p.is_error()).count(),
        intra_node_ratio: (comparable > 0).then(|| same_node as f64 / comparable as f64),
    }
}

/// Pods observed on more than one node, with the nodes in order of first sighting
pub fn pod_movements(snapshots: &[Snapshot]) -> BTreeMap<String, Vec<String>> {
    let mut history: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for snapshot in snapshots {
        for pod in snapshot.pod_placement.iter().filter(|p| !p.node_id.is_empty()) {
            let nodes = history.entry(pod.pod_id.clone()).or_default();
            if !nodes.contains(&pod.node_id) {
                nodes.push(pod.node_id.clone());
            }
        }
    }
    history.retain(|_, nodes| nodes.len() > 1);
    history
}

/// Service -> node -> live pods averaged over all snapshots
pub fn service_node_spread(snapshots: &[Snapshot]) -> BTreeMap<String, BTreeMap<String, f64>> {
    if snapshots.is_empty() {
        return BTreeMap::new();
    }
    let mut totals: BTreeMap<String, BTreeMap<String, usize>> = BTreeMap::new();
    let mut nodes = BTreeSet::new();
    for snapshot in snapshots {
        for ((service, node), count) in live_pod_counts(snapshot) {
            nodes.insert(node.clone());
            *totals.entry(service).or_default().entry(node).or_insert(0) += count;
        }
    }

    let n = snapshots.len() as f64;
    totals
        .into_iter()
        .map(|(service, per_node)| {
            let averages = nodes
                .iter()
                .map(|node| {
                    let total = per_node.get(node).copied().unwrap_or(0) as f64;
                    (node.clone(), (total / n * 100.0).round() / 100.0)
                })
                .collect();
            (service, averages)
        })
        .collect()
}

/// Node -> pods in the latest snapshot
pub fn latest_node_pods(snapshots: &[Snapshot]) -> BTreeMap<String, Vec<String>> {
    let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();
    if let Some(latest) = snapshots.iter().max_by_key(|s| s.timestamp) {
        for pod in latest.pod_placement.iter().filter(|p| !p.node_id.is_empty()) {
            out.entry(pod.node_id.clone()).or_default().push(pod.pod_id.clone());
        }
    }
    for pods in out.values_mut() {
        pods.sort();
    }
    out
}
