//! Burst Runner - drives one burst-load experiment
//!
//! Generates a seeded burst plan, issues it against the configured
//! endpoints while sampling cluster state in the background, and leaves a
//! finalized manifest plus all artifacts in the run directory.

use anyhow::{Context, Result};
use burst_runner::{api, config::RunnerArgs};
use clap::Parser;
use experiment_lib::{
    cluster::KubeCluster,
    health::{components, HealthRegistry},
    load::HttpLoadGenerator,
    observability::ExperimentMetrics,
    Correlator, ExperimentDriver,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const RUNNER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let args = RunnerArgs::parse();
    info!(version = RUNNER_VERSION, "Starting burst-runner");

    let config = args.resolve()?;
    info!(
        namespace = %config.namespace,
        endpoints = config.endpoints.len(),
        bursts = config.plan.count,
        output_dir = %config.output_dir.display(),
        "Experiment configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::CLUSTER).await;
    health_registry.register(components::SAMPLER).await;
    health_registry.register(components::EXECUTOR).await;

    let metrics = ExperimentMetrics::new();
    let app_state = Arc::new(
        api::AppState::new(health_registry.clone(), metrics).with_planned_bursts(config.plan.count),
    );
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    let cluster = Arc::new(
        KubeCluster::connect(
            &config.namespace,
            &config.service_label,
            config.kubeconfig.as_deref(),
        )
        .await
        .context("Failed to connect to the cluster")?,
    );
    let generator = Arc::new(HttpLoadGenerator::new()?);

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("SIGINT received, stopping before the next burst");
                cancel.cancel();
            }
        }
    });

    let mut driver = ExperimentDriver::new(config, cluster.clone(), cluster, generator)
        .with_health(health_registry);
    let summary = driver.run(cancel).await?;

    if summary.execution.is_complete() {
        info!(
            run_dir = %summary.run_dir.display(),
            bursts = summary.execution.completed_bursts,
            snapshots = summary.sampler.snapshots,
            probes = summary.sampler.probes,
            "Experiment complete"
        );
    } else {
        warn!(
            run_dir = %summary.run_dir.display(),
            completed = summary.execution.completed_bursts,
            planned = summary.execution.planned_bursts,
            reason = summary.execution.incomplete_reason.as_deref().unwrap_or("unknown"),
            "Experiment incomplete; artifacts kept for the completed bursts"
        );
    }

    if args.analyze {
        let analysis = Correlator::open(&summary.run_dir)?
            .run()
            .context("Failed to correlate the run")?;
        info!(
            run_dir = %summary.run_dir.display(),
            replica_rows = analysis.replicas.len(),
            warnings = analysis.warnings.len(),
            "Analysis written"
        );
    }

    api_handle.abort();
    info!("Shutting down");
    Ok(())
}
