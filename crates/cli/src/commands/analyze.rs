//! `blab analyze`: correlate a finalized run

use anyhow::{Context, Result};
use colored::Colorize;
use experiment_lib::correlate::{
    Analysis, Correlator, EndpointSummary, NodeUsageSummary, ReplicaRow,
};
use std::path::Path;
use tabled::Tabled;
use tracing::debug;

use crate::output::{
    format_ms, format_rate, print_header, print_info, print_json, print_success, print_table,
    print_warning, OutputFormat,
};

#[derive(Tabled)]
struct EndpointRow {
    #[tabled(rename = "Endpoint")]
    endpoint: String,
    #[tabled(rename = "Runs")]
    runs: usize,
    #[tabled(rename = "Avg Rate")]
    avg_rate: String,
    #[tabled(rename = "Max Rate")]
    max_rate: String,
    #[tabled(rename = "p95 (median)")]
    p95_median: String,
    #[tabled(rename = "p95 (max)")]
    p95_max: String,
    #[tabled(rename = "p99 (max)")]
    p99_max: String,
}

#[derive(Tabled)]
struct ReplicaTableRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Window")]
    window: String,
    #[tabled(rename = "Service")]
    service: String,
    #[tabled(rename = "Replicas")]
    replicas: String,
    #[tabled(rename = "Endpoint p95")]
    endpoint_p95: String,
    #[tabled(rename = "S2S p95")]
    s2s_p95: String,
    #[tabled(rename = "Flags")]
    flags: String,
}

#[derive(Tabled)]
struct NodeUsageTableRow {
    #[tabled(rename = "Node")]
    node: String,
    #[tabled(rename = "Peak CPU")]
    peak_cpu: String,
    #[tabled(rename = "Peak In")]
    peak_window: String,
    #[tabled(rename = "Burst Avg")]
    burst_avg: String,
    #[tabled(rename = "Idle Avg")]
    idle_avg: String,
}

fn node_usage_row(node: &str, usage: &NodeUsageSummary) -> NodeUsageTableRow {
    let cores = |c: Option<f64>| c.map(|c| format!("{:.2}", c)).unwrap_or_else(|| "-".into());
    NodeUsageTableRow {
        node: node.to_string(),
        peak_cpu: cores(Some(usage.peak_cpu_cores)),
        peak_window: usage.peak_window.to_string(),
        burst_avg: cores(usage.burst_cpu_avg),
        idle_avg: cores(usage.idle_cpu_avg),
    }
}

fn endpoint_row(endpoint: &str, summary: &EndpointSummary) -> EndpointRow {
    let rate = |r: Option<f64>| r.map(format_rate).unwrap_or_else(|| "-".into());
    EndpointRow {
        endpoint: endpoint.to_string(),
        runs: summary.runs,
        avg_rate: rate(summary.avg_achieved_rate),
        max_rate: rate(summary.max_achieved_rate),
        p95_median: format_ms(summary.p95_median),
        p95_max: format_ms(summary.p95_max),
        p99_max: format_ms(summary.p99_max),
    }
}

fn replica_row(row: &ReplicaRow) -> ReplicaTableRow {
    let mut flags = Vec::new();
    if row.at_max_replicas {
        flags.push("at-max");
    }
    if row.above_target_utilization {
        flags.push("above-target");
    }
    ReplicaTableRow {
        time: row.timestamp.format("%H:%M:%S").to_string(),
        window: match row.latency_source_burst {
            Some(source) if row.window.burst_index().is_none() => {
                format!("{} (after burst-{})", row.window, source)
            }
            _ => row.window.to_string(),
        },
        service: row.service.clone(),
        replicas: format!("{}/{}", row.current_replicas, row.desired_replicas),
        endpoint_p95: format_ms(row.endpoint_p95),
        s2s_p95: format_ms(row.s2s_p95),
        flags: flags.join(","),
    }
}

fn print_analysis(analysis: &Analysis) {
    if analysis.incomplete {
        print_warning(&format!(
            "{} only {} of {} bursts completed",
            "INCOMPLETE RUN:".red().bold(),
            analysis.complete_bursts.len(),
            analysis.planned_bursts
        ));
    }
    for warning in &analysis.warnings {
        print_warning(warning);
    }

    print_header(&format!("Analysis of {}", analysis.run_id));
    println!("Snapshots:        {}", analysis.snapshot_count);
    println!("Probes:           {}", analysis.probe_count);
    println!("Telemetry errors: {}", analysis.telemetry_error_count);
    if let Some(ratio) = analysis.probe_summary.intra_node_ratio {
        println!("Intra-node ratio: {:.2}", ratio);
    }
    println!();

    println!("{}", "Endpoint latency".bold());
    let endpoints: Vec<EndpointRow> = analysis
        .endpoint_summary
        .iter()
        .map(|(endpoint, summary)| endpoint_row(endpoint, summary))
        .collect();
    print_table(&endpoints, "No completed bursts");
    println!();

    if !analysis.node_usage_summary.is_empty() {
        println!("{}", "Node CPU (cores)".bold());
        let nodes: Vec<NodeUsageTableRow> = analysis
            .node_usage_summary
            .iter()
            .map(|(node, usage)| node_usage_row(node, usage))
            .collect();
        print_table(&nodes, "No usage data");
        println!();
    }

    println!("{}", "Replicas vs latency".bold());
    let replicas: Vec<ReplicaTableRow> = analysis.replicas.iter().map(replica_row).collect();
    print_table(&replicas, "No autoscaler data in snapshots");
}

pub fn analyze_run(run_dir: &Path, write: bool, format: OutputFormat) -> Result<()> {
    debug!(run_dir = %run_dir.display(), write, "Analyzing run");
    let correlator = Correlator::open(run_dir)?;
    let analysis = correlator
        .analyze()
        .with_context(|| format!("Failed to analyze {}", run_dir.display()))?;

    let written = if write {
        correlator.write_outputs(&analysis)?
    } else {
        Vec::new()
    };
    debug!(outputs = written.len(), "Analysis complete");

    match format {
        OutputFormat::Json => print_json(&analysis)?,
        OutputFormat::Table => {
            print_analysis(&analysis);
            println!();
            if written.is_empty() {
                print_info("Analysis not written (--no-write)");
            }
            for path in &written {
                print_success(&format!("Wrote {}", path.display()));
            }
        }
    }

    Ok(())
}
