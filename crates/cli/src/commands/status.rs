//! `blab status`: health of a running burst-runner

use anyhow::Result;
use colored::Colorize;
use experiment_lib::HealthResponse;
use serde_json::json;
use tabled::Tabled;
use tracing::debug;

use crate::client::RunnerClient;
use crate::output::{color_status, print_header, print_json, print_table, OutputFormat};

#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Message")]
    message: String,
}

fn component_rows(health: &HealthResponse) -> Vec<ComponentRow> {
    let mut rows: Vec<ComponentRow> = health
        .components
        .iter()
        .map(|(name, component)| ComponentRow {
            name: name.clone(),
            status: color_status(&format!("{:?}", component.status).to_lowercase()),
            message: component.message.clone().unwrap_or_default(),
        })
        .collect();
    rows.sort_by(|a, b| a.name.cmp(&b.name));
    rows
}

pub async fn show_status(client: &RunnerClient, format: OutputFormat) -> Result<()> {
    let health = client.health().await?;
    let readiness = client.readiness().await?;
    debug!(
        phase = %readiness.phase.as_str(),
        ready = readiness.ready,
        components = health.components.len(),
        "Fetched runner status"
    );

    match format {
        OutputFormat::Json => print_json(&json!({
            "health": health,
            "readiness": readiness,
        }))?,
        OutputFormat::Table => {
            print_header("Runner Status");
            println!("Phase:   {}", color_status(readiness.phase.as_str()));
            println!(
                "Health:  {}",
                color_status(&format!("{:?}", health.status).to_lowercase())
            );
            let ready = if readiness.ready {
                "yes".green().to_string()
            } else {
                "no".red().to_string()
            };
            match &readiness.reason {
                Some(reason) => println!("Ready:   {} ({})", ready, reason),
                None => println!("Ready:   {}", ready),
            }
            println!();
            print_table(&component_rows(&health), "No components registered");
        }
    }

    Ok(())
}
