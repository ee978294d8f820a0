//! Flat renderings of an [`Analysis`]: the replica CSV and a text summary

use super::tables::{PathSummary, ReplicaRow};
use super::Analysis;
use crate::error::Result;
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt::Write as _;

const TOP_PATHS: usize = 12;
const TOP_DECOMPOSITION: usize = 15;
const TOP_NODE_PAIRS: usize = 15;

fn ms(value: Option<f64>) -> String {
    match value {
        Some(seconds) => format!("{:.2} ms", seconds * 1000.0),
        None => "n/a".to_string(),
    }
}

fn ms_cell(value: Option<f64>) -> String {
    value
        .map(|seconds| format!("{:.3}", seconds * 1000.0))
        .unwrap_or_default()
}

fn num(value: Option<f64>) -> String {
    value.map(|v| format!("{:.2}", v)).unwrap_or_else(|| "n/a".into())
}

#[derive(Serialize)]
struct CsvRow<'a> {
    timestamp: String,
    window: String,
    latency_source_burst: Option<usize>,
    service: &'a str,
    desired_replicas: i32,
    current_replicas: i32,
    observed_metric: Option<f64>,
    dependent_endpoint: Option<&'a str>,
    endpoint_p95_ms: String,
    endpoint_p99_ms: String,
    s2s_p95_ms: String,
    s2s_p99_ms: String,
    at_max_replicas: bool,
    above_target_utilization: bool,
}

/// Long-format replica-vs-latency table, one line per (snapshot, service)
pub fn replica_csv(rows: &[ReplicaRow]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    if rows.is_empty() {
        writer.write_record([
            "timestamp",
            "window",
            "latency_source_burst",
            "service",
            "desired_replicas",
            "current_replicas",
            "observed_metric",
            "dependent_endpoint",
            "endpoint_p95_ms",
            "endpoint_p99_ms",
            "s2s_p95_ms",
            "s2s_p99_ms",
            "at_max_replicas",
            "above_target_utilization",
        ])?;
    }
    for row in rows {
        writer.serialize(CsvRow {
            timestamp: row.timestamp.to_rfc3339(),
            window: row.window.to_string(),
            latency_source_burst: row.latency_source_burst,
            service: &row.service,
            desired_replicas: row.desired_replicas,
            current_replicas: row.current_replicas,
            observed_metric: row.observed_metric_value,
            dependent_endpoint: row.dependent_endpoint.as_deref(),
            endpoint_p95_ms: ms_cell(row.endpoint_p95),
            endpoint_p99_ms: ms_cell(row.endpoint_p99),
            s2s_p95_ms: ms_cell(row.s2s_p95),
            s2s_p99_ms: ms_cell(row.s2s_p99),
            at_max_replicas: row.at_max_replicas,
            above_target_utilization: row.above_target_utilization,
        })?;
    }
    let bytes = writer.into_inner().map_err(|e| e.into_error())?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Descending by a latency, missing values last
fn by_desc(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.total_cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn section(out: &mut String, title: &str) {
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", title);
    let _ = writeln!(out, "{}", "-".repeat(title.len()));
}

/// Human-readable report of one run
pub fn summary_text(analysis: &Analysis) -> String {
    let mut out = String::new();

    if analysis.incomplete {
        let _ = writeln!(out, "!!! INCOMPLETE RUN !!!");
        let _ = writeln!(
            out,
            "Only {} of {} bursts completed; statistics cover completed bursts only.",
            analysis.complete_bursts.len(),
            analysis.planned_bursts
        );
        if let Some(reason) = &analysis.incomplete_reason {
            let _ = writeln!(out, "Reason: {}", reason);
        }
        let _ = writeln!(out);
    }

    let _ = writeln!(out, "Run:        {}", analysis.run_id);
    let _ = writeln!(out, "Seed:       {}", analysis.seed);
    let _ = writeln!(out, "Started:    {}", analysis.started_at.to_rfc3339());
    if let Some(finalized) = analysis.finalized_at {
        let _ = writeln!(out, "Finalized:  {}", finalized.to_rfc3339());
    }
    let _ = writeln!(
        out,
        "Bursts:     {} of {} analyzed",
        analysis.complete_bursts.len(),
        analysis.planned_bursts
    );
    let _ = writeln!(
        out,
        "Snapshots:  {}  Probes: {}  Telemetry errors: {}",
        analysis.snapshot_count, analysis.probe_count, analysis.telemetry_error_count
    );

    if !analysis.warnings.is_empty() {
        section(&mut out, "Warnings");
        for warning in &analysis.warnings {
            let _ = writeln!(out, "- {}", warning);
        }
    }

    section(&mut out, "1) Node -> Pods (latest snapshot)");
    if analysis.latest_node_pods.is_empty() {
        let _ = writeln!(out, "no snapshots");
    }
    for (node, pods) in &analysis.latest_node_pods {
        let _ = writeln!(out, "{}: {}", node, pods.join(", "));
    }

    section(&mut out, "1b) Service -> Nodes (average live pods per snapshot)");
    for (service, nodes) in &analysis.service_node_spread {
        let spread: Vec<String> = nodes
            .iter()
            .filter(|(_, avg)| **avg > 0.0)
            .map(|(node, avg)| format!("{}={:.2}", node, avg))
            .collect();
        let _ = writeln!(out, "{}: {}", service, spread.join(", "));
    }
    if analysis.pod_movements.is_empty() {
        let _ = writeln!(out, "pods moved between nodes: none");
    } else {
        let _ = writeln!(out, "pods moved between nodes:");
        for (pod, nodes) in &analysis.pod_movements {
            let _ = writeln!(out, "  {}: {}", pod, nodes.join(" -> "));
        }
    }

    if !analysis.node_usage_summary.is_empty() {
        section(&mut out, "1c) Node CPU (burst vs idle)");
        for (node, usage) in &analysis.node_usage_summary {
            let _ = writeln!(
                out,
                "{}: peak={:.2} cores ({}) burst_avg={} idle_avg={} peak_mem={:.0} MiB",
                node,
                usage.peak_cpu_cores,
                usage.peak_window,
                num(usage.burst_cpu_avg),
                num(usage.idle_cpu_avg),
                usage.peak_memory_bytes / (1024.0 * 1024.0)
            );
        }
    }

    section(&mut out, "2) End-to-end latency per endpoint");
    for (endpoint, summary) in &analysis.endpoint_summary {
        let _ = writeln!(
            out,
            "{}: runs={} requests={} errors={} avg_rate={} max_rate={} p95 median={} max={} p99 median={} max={}",
            endpoint,
            summary.runs,
            summary.total_requests,
            summary.total_errors,
            num(summary.avg_achieved_rate),
            num(summary.max_achieved_rate),
            ms(summary.p95_median),
            ms(summary.p95_max),
            ms(summary.p99_median),
            ms(summary.p99_max)
        );
    }
    let cluster = &analysis.cluster_summary;
    let _ = writeln!(
        out,
        "combined rate over {} bursts: avg={} p95={} max={}",
        cluster.burst_count,
        num(cluster.combined_rate_avg),
        num(cluster.combined_rate_p95),
        num(cluster.combined_rate_max)
    );

    let mut paths: Vec<&PathSummary> = analysis.paths.values().collect();
    paths.sort_by(|a, b| by_desc(a.total_p95, b.total_p95));

    section(&mut out, "3) Service-to-service latency (top paths by p95)");
    let probes = &analysis.probe_summary;
    let _ = writeln!(
        out,
        "paths={} samples={} attempts={} errors={} intra_node_ratio={}",
        probes.path_count,
        probes.total_samples,
        probes.attempts,
        probes.error_entries,
        num(probes.intra_node_ratio)
    );
    for path in paths.iter().take(TOP_PATHS) {
        let _ = writeln!(
            out,
            "{} -> {} (node {}): samples={} avg={} p95={} p99={} error_rate={}",
            path.source_pod,
            path.target_service,
            path.source_node,
            path.samples,
            ms(path.total_avg),
            ms(path.total_p95),
            ms(path.total_p99),
            num(path.error_rate)
        );
    }

    section(&mut out, "4) Queueing vs network decomposition");
    for path in paths.iter().take(TOP_DECOMPOSITION) {
        let _ = writeln!(
            out,
            "{} -> {}: dns={} connect={} ttfb={} queueing={}",
            path.source_pod,
            path.target_service,
            ms(path.dns_avg),
            ms(path.connect_avg),
            ms(path.ttfb_avg),
            ms(path.queueing_avg)
        );
    }

    section(&mut out, "5) Tail latency by (source_node, target_service)");
    let mut pairs: Vec<_> = analysis.node_pairs.iter().collect();
    pairs.sort_by(|a, b| by_desc(a.total_p95, b.total_p95));
    for pair in pairs.iter().take(TOP_NODE_PAIRS) {
        let _ = writeln!(
            out,
            "({}) -> ({}): samples={} avg={} p95={} p99={}",
            pair.source_node,
            pair.target_service,
            pair.samples,
            ms(pair.total_avg),
            ms(pair.total_p95),
            ms(pair.total_p99)
        );
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlate::tables::{ClusterSummary, ProbeSummary};
    use crate::correlate::Attribution;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    fn analysis() -> Analysis {
        Analysis {
            run_id: "run-9".into(),
            seed: 3,
            started_at: Utc.with_ymd_and_hms(2026, 5, 1, 10, 0, 0).unwrap(),
            finalized_at: None,
            incomplete: false,
            incomplete_reason: None,
            warnings: Vec::new(),
            planned_bursts: 2,
            complete_bursts: vec![0, 1],
            snapshot_count: 0,
            probe_count: 0,
            telemetry_error_count: 0,
            endpoint_latency: Vec::new(),
            placement: Vec::new(),
            node_usage: Vec::new(),
            node_usage_summary: BTreeMap::new(),
            node_pairs: Vec::new(),
            replicas: Vec::new(),
            endpoint_summary: BTreeMap::new(),
            cluster_summary: ClusterSummary::default(),
            paths: BTreeMap::new(),
            probe_summary: ProbeSummary::default(),
            pod_movements: BTreeMap::new(),
            service_node_spread: BTreeMap::new(),
            latest_node_pods: BTreeMap::new(),
        }
    }

    fn replica_row() -> ReplicaRow {
        ReplicaRow {
            timestamp: Utc.with_ymd_and_hms(2026, 5, 1, 10, 0, 15).unwrap(),
            window: Attribution::Burst(0),
            latency_source_burst: Some(0),
            service: "cart".into(),
            desired_replicas: 3,
            current_replicas: 2,
            observed_metric_value: Some(91.5),
            dependent_endpoint: Some("cart".into()),
            endpoint_p95: Some(0.25),
            endpoint_p99: None,
            s2s_p95: Some(0.0125),
            s2s_p99: Some(0.0125),
            at_max_replicas: false,
            above_target_utilization: true,
        }
    }

    #[test]
    fn test_ms_formatting() {
        assert_eq!(ms(Some(0.0125)), "12.50 ms");
        assert_eq!(ms(None), "n/a");
    }

    #[test]
    fn test_replica_csv_layout() {
        let csv = replica_csv(&[replica_row()]).unwrap();
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("timestamp,window,latency_source_burst,service"));
        assert!(lines[1].contains("burst-0"));
        assert!(lines[1].contains("250.000"));
        assert!(lines[1].ends_with("false,true"));
    }

    #[test]
    fn test_empty_csv_keeps_header() {
        let csv = replica_csv(&[]).unwrap();
        assert_eq!(csv.lines().count(), 1);
        assert!(csv.contains("above_target_utilization"));
    }

    #[test]
    fn test_incomplete_banner() {
        let mut incomplete = analysis();
        incomplete.incomplete = true;
        incomplete.incomplete_reason = Some("cancelled after burst 0".into());
        incomplete.complete_bursts = vec![0];

        let text = summary_text(&incomplete);
        assert!(text.starts_with("!!! INCOMPLETE RUN !!!"));
        assert!(text.contains("Only 1 of 2 bursts completed"));
        assert!(text.contains("cancelled after burst 0"));

        assert!(!summary_text(&analysis()).contains("INCOMPLETE"));
    }

    #[test]
    fn test_paths_sorted_by_p95() {
        let mut a = analysis();
        for (pod, p95) in [("fast", 0.001), ("slow", 0.5)] {
            a.paths.insert(
                format!("{}->cart", pod),
                PathSummary {
                    source_pod: pod.into(),
                    source_node: "node-1".into(),
                    target_service: "cart".into(),
                    samples: 3,
                    total_avg: Some(p95),
                    total_p95: Some(p95),
                    total_p99: Some(p95),
                    dns_avg: None,
                    connect_avg: None,
                    ttfb_avg: None,
                    queueing_avg: None,
                    error_rate: Some(0.0),
                },
            );
        }

        let text = summary_text(&a);
        let slow = text.find("slow -> cart (node").unwrap();
        let fast = text.find("fast -> cart (node").unwrap();
        assert!(slow < fast);
    }
}
