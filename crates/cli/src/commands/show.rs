//! `blab show`: summarize a run's manifest

use anyhow::Result;
use colored::Colorize;
use experiment_lib::{manifest::ArtifactStore, ExperimentManifest};
use std::collections::BTreeMap;
use std::path::Path;
use tabled::Tabled;
use tracing::debug;

use crate::output::{
    color_status, format_rate, format_ratio, print_header, print_json, print_table, print_warning,
    OutputFormat,
};

#[derive(Tabled)]
struct BurstRunRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Started")]
    started: String,
    #[tabled(rename = "Target")]
    target_rate: String,
    #[tabled(rename = "Achieved")]
    achieved_rate: String,
    #[tabled(rename = "Requests")]
    requests: u64,
    #[tabled(rename = "Errors")]
    errors: String,
    #[tabled(rename = "Endpoints")]
    endpoints: String,
}

/// `complete`, `incomplete`, or `running` for a manifest not yet finalized
fn run_status(manifest: &ExperimentManifest) -> &'static str {
    if !manifest.is_finalized() {
        "running"
    } else if manifest.incomplete {
        "incomplete"
    } else {
        "complete"
    }
}

fn burst_rows(manifest: &ExperimentManifest) -> Vec<BurstRunRow> {
    let starts: BTreeMap<usize, _> = manifest
        .burst_windows
        .iter()
        .map(|w| (w.burst_index, w.started_at))
        .collect();

    manifest
        .burst_plan
        .iter()
        .filter(|burst| starts.contains_key(&burst.index))
        .map(|burst| {
            let results: Vec<_> = manifest
                .load_results
                .iter()
                .filter(|r| r.burst_index == burst.index)
                .collect();
            let requests: u64 = results.iter().map(|r| r.request_count).sum();
            let errors: u64 = results.iter().map(|r| r.error_count).sum();
            BurstRunRow {
                index: burst.index,
                started: starts[&burst.index].format("%H:%M:%S").to_string(),
                target_rate: format_rate(burst.total_rate),
                achieved_rate: format_rate(results.iter().map(|r| r.achieved_rate).sum()),
                requests,
                errors: format!("{} ({})", errors, format_ratio(errors, requests)),
                endpoints: format!("{}/{}", results.len(), burst.per_endpoint_rate.len()),
            }
        })
        .collect()
}

/// `1h 02m 05s` style duration
fn format_wall_time(elapsed: chrono::Duration) -> String {
    let secs = elapsed.num_seconds().max(0);
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}h {:02}m {:02}s", h, m, s)
    } else {
        format!("{}m {:02}s", m, s)
    }
}

pub fn show_run(run_dir: &Path, format: OutputFormat) -> Result<()> {
    let manifest = ArtifactStore::open(run_dir)?.read_manifest()?;
    debug!(
        run_dir = %run_dir.display(),
        run_id = %manifest.run_id,
        finalized = manifest.finalized_at.is_some(),
        "Loaded manifest"
    );

    match format {
        OutputFormat::Json => print_json(&manifest)?,
        OutputFormat::Table => {
            print_header("Experiment Run");
            println!("Run:              {}", manifest.run_id.cyan());
            println!("Seed:             {}", manifest.seed);
            println!("Status:           {}", color_status(run_status(&manifest)));
            println!("Started:          {}", manifest.started_at.to_rfc3339());
            if let Some(finalized) = manifest.finalized_at {
                println!("Finalized:        {}", finalized.to_rfc3339());
                println!(
                    "Wall time:        {}",
                    format_wall_time(finalized - manifest.started_at)
                );
            }
            println!(
                "Bursts started:   {} of {}",
                manifest.burst_windows.len(),
                manifest.burst_plan.len()
            );
            println!("Load results:     {}", manifest.load_results.len());
            println!("Snapshots:        {}", manifest.snapshot_index.len());
            println!("Probes:           {}", manifest.probe_count);
            println!("Telemetry errors: {}", manifest.telemetry_errors.len());
            if let Some(reason) = &manifest.incomplete_reason {
                print_warning(&format!("Incomplete: {}", reason));
            }
            println!();
            print_table(&burst_rows(&manifest), "No bursts started");
        }
    }

    Ok(())
}
