//! `blab plan`: generate a burst plan without running it

use anyhow::Result;
use colored::Colorize;
use experiment_lib::{BurstPlan, BurstPlanGenerator};
use serde_json::json;
use std::path::Path;
use tabled::Tabled;
use tracing::debug;

use crate::config::load_experiment_config;
use crate::output::{color_status, format_rate, print_header, print_json, print_table, OutputFormat};

#[derive(Tabled)]
struct BurstRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Total Rate")]
    total_rate: String,
    #[tabled(rename = "Duration")]
    duration: String,
    #[tabled(rename = "Pause")]
    pause: String,
    #[tabled(rename = "Per Endpoint")]
    split: String,
}

fn plan_rows(plan: &BurstPlan) -> Vec<BurstRow> {
    plan.iter()
        .map(|burst| BurstRow {
            index: burst.index,
            kind: color_status(burst.kind.as_str()),
            total_rate: format_rate(burst.total_rate),
            duration: format!("{}s", burst.duration_seconds),
            pause: format!("{}s", burst.inter_burst_pause_seconds),
            split: burst
                .per_endpoint_rate
                .iter()
                .map(|(name, rate)| format!("{}={:.1}", name, rate))
                .collect::<Vec<_>>()
                .join(", "),
        })
        .collect()
}

/// Wall time of the load phase; the executor skips the pause after the last burst
fn expected_runtime_secs(plan: &BurstPlan) -> u64 {
    let bursts: u64 = plan.iter().map(|b| b.duration_seconds).sum();
    let pauses: u64 = plan
        .iter()
        .rev()
        .skip(1)
        .map(|b| b.inter_burst_pause_seconds)
        .sum();
    bursts + pauses
}

pub fn show_plan(config_path: &Path, seed: Option<u64>, format: OutputFormat) -> Result<()> {
    let mut config = load_experiment_config(config_path)?;
    if let Some(seed) = seed {
        config.plan.seed = Some(seed);
    }
    config.validate()?;

    let generator = BurstPlanGenerator::new(config.plan.clone(), config.endpoint_weights())?;
    let plan = generator.generate();
    debug!(
        config = %config_path.display(),
        seed = generator.seed(),
        bursts = plan.len(),
        "Generated burst plan"
    );

    match format {
        OutputFormat::Json => print_json(&json!({
            "seed": generator.seed(),
            "expected_runtime_secs": expected_runtime_secs(&plan),
            "bursts": plan,
        }))?,
        OutputFormat::Table => {
            print_header("Burst Plan");
            println!("Seed:             {}", generator.seed().to_string().cyan());
            println!("Bursts:           {}", plan.len());
            println!("Endpoints:        {}", config.endpoints.len());
            println!("Expected runtime: {}s", expected_runtime_secs(&plan));
            println!();
            print_table(&plan_rows(&plan), "Plan is empty");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use experiment_lib::{BurstDescriptor, BurstKind};
    use std::collections::BTreeMap;

    fn burst(index: usize, duration: u64, pause: u64) -> BurstDescriptor {
        BurstDescriptor {
            index,
            kind: BurstKind::Spike,
            total_rate: 100.0,
            duration_seconds: duration,
            inter_burst_pause_seconds: pause,
            per_endpoint_rate: BTreeMap::from([("cart".into(), 30.0), ("home".into(), 70.0)]),
        }
    }

    #[test]
    fn test_expected_runtime_skips_last_pause() {
        let plan = vec![burst(0, 30, 5), burst(1, 20, 7), burst(2, 10, 9)];
        assert_eq!(expected_runtime_secs(&plan), 30 + 20 + 10 + 5 + 7);
        assert_eq!(expected_runtime_secs(&Vec::new()), 0);
    }

    #[test]
    fn test_plan_rows() {
        colored::control::set_override(false);
        let rows = plan_rows(&vec![burst(0, 30, 5)]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].kind, "spike");
        assert_eq!(rows[0].total_rate, "100.0/s");
        assert_eq!(rows[0].split, "cart=30.0, home=70.0");
    }
}
