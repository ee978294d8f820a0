//! Burstlab CLI
//!
//! Offline tooling around burst-load experiments: preview a seeded plan,
//! inspect a run's manifest, correlate a finalized run, and check on a
//! runner that is still going.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{analyze, plan, show, status};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Burst-load experiment toolkit
#[derive(Parser)]
#[command(name = "blab")]
#[command(author, version, about = "Burstlab: plan, inspect and analyze burst-load experiments", long_about = None)]
pub struct Cli {
    /// Output format
    #[arg(long, short, global = true, default_value = "table")]
    pub format: output::OutputFormat,

    /// Enable verbose output
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate and print a burst plan without running it
    Plan {
        /// Experiment configuration file
        #[arg(long, short, env = "BURSTLAB_CONFIG")]
        config: PathBuf,

        /// Override the plan seed
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Correlate a finalized run and write its analysis files
    Analyze {
        /// Run directory containing manifest.json
        run_dir: PathBuf,

        /// Print the analysis without writing files
        #[arg(long)]
        no_write: bool,
    },

    /// Summarize a run's manifest
    Show {
        /// Run directory containing manifest.json
        run_dir: PathBuf,
    },

    /// Query a running burst-runner's health endpoints
    Status {
        /// Runner API URL
        #[arg(long, env = "BURSTLAB_RUNNER_URL", default_value = "http://localhost:9095")]
        runner_url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::registry()
            .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .init();
    }

    match cli.command {
        Commands::Plan { config, seed } => {
            plan::show_plan(&config, seed, cli.format)?;
        }
        Commands::Analyze { run_dir, no_write } => {
            analyze::analyze_run(&run_dir, !no_write, cli.format)?;
        }
        Commands::Show { run_dir } => {
            show::show_run(&run_dir, cli.format)?;
        }
        Commands::Status { runner_url } => {
            let client = client::RunnerClient::new(&runner_url)?;
            status::show_status(&client, cli.format).await?;
        }
    }

    Ok(())
}
