//! Experiment driver
//!
//! Owns one run end to end: validate, plan, preflight, start the sampler, run
//! the executor, stop the sampler and finalize the manifest. Once execution
//! has started a finalized manifest is always written, even when the executor
//! stops early.

use crate::clock::ExperimentClock;
use crate::cluster::{ClusterState, PodExec};
use crate::collector::{CrossServiceProbe, SamplerStats, SnapshotCollector, TelemetrySampler};
use crate::config::ExperimentConfig;
use crate::error::{ExperimentError, Result};
use crate::health::{components, HealthRegistry};
use crate::load::{ExecutionOutcome, LoadExecutor, LoadGenerator};
use crate::manifest::{new_manifest, ArtifactStore, ManifestRecorder};
use crate::models::ExperimentManifest;
use crate::observability::StructuredLogger;
use crate::plan::BurstPlanGenerator;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Lifecycle of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverState {
    Idle,
    SamplingAndLoading,
    Draining,
    Finalized,
}

impl DriverState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverState::Idle => "idle",
            DriverState::SamplingAndLoading => "sampling_and_loading",
            DriverState::Draining => "draining",
            DriverState::Finalized => "finalized",
        }
    }

    pub fn can_transition_to(&self, next: DriverState) -> bool {
        matches!(
            (self, next),
            (DriverState::Idle, DriverState::SamplingAndLoading)
                | (DriverState::SamplingAndLoading, DriverState::Draining)
                | (DriverState::Draining, DriverState::Finalized)
        )
    }
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a finished run produced
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_dir: PathBuf,
    pub manifest: ExperimentManifest,
    pub execution: ExecutionOutcome,
    pub sampler: SamplerStats,
}

pub struct ExperimentDriver {
    config: ExperimentConfig,
    cluster: Arc<dyn ClusterState>,
    exec: Arc<dyn PodExec>,
    generator: Arc<dyn LoadGenerator>,
    health: HealthRegistry,
    state: DriverState,
}

impl ExperimentDriver {
    pub fn new(
        config: ExperimentConfig,
        cluster: Arc<dyn ClusterState>,
        exec: Arc<dyn PodExec>,
        generator: Arc<dyn LoadGenerator>,
    ) -> Self {
        Self {
            config,
            cluster,
            exec,
            generator,
            health: HealthRegistry::new(),
            state: DriverState::Idle,
        }
    }

    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = health;
        self
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    async fn transition(&mut self, next: DriverState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(ExperimentError::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        info!(from = %self.state, to = %next, "Driver state change");
        self.state = next;
        self.health.set_phase(next).await;
        Ok(())
    }

    /// Run the whole experiment.
    ///
    /// Fails before any load is issued on invalid configuration or an
    /// unreachable cluster. After that, early stops (cancellation, an
    /// unreachable burst) produce a finalized manifest flagged incomplete.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<RunSummary> {
        if self.state != DriverState::Idle {
            return Err(ExperimentError::InvalidTransition {
                from: self.state.to_string(),
                to: DriverState::SamplingAndLoading.to_string(),
            });
        }

        self.config.validate()?;

        let clock = ExperimentClock::start();
        let started_at = clock.now();
        let run_id = self.config.resolve_run_id(started_at);

        let plan_generator =
            BurstPlanGenerator::new(self.config.plan.clone(), self.config.endpoint_weights())?;
        let seed = plan_generator.seed();
        let plan = plan_generator.generate();

        self.preflight().await?;

        let store = ArtifactStore::create(&self.config.output_dir, &run_id)?;
        let run_dir = store.run_dir().to_path_buf();
        let manifest = new_manifest(&run_id, seed, started_at, &self.config, plan.clone());
        let recorder = ManifestRecorder::new(manifest, store);
        recorder.persist_initial().await?;

        let logger = StructuredLogger::new(run_id.clone());
        logger.log_experiment_started(seed, plan.len(), self.config.endpoints.len());

        let mut sampler = TelemetrySampler::builder()
            .collector(SnapshotCollector::new(self.cluster.clone()))
            .recorder(recorder.clone())
            .clock(clock)
            .interval(self.config.sampler.interval())
            .health(self.health.clone())
            .logger(logger.clone());
        if !self.config.probe.pairs.is_empty() {
            sampler = sampler.probe(CrossServiceProbe::new(self.exec.clone(), self.config.probe.clone()));
        }
        let sampler = sampler
            .build()
            .map_err(|e| ExperimentError::invalid_config(e.to_string()))?;

        let executor = LoadExecutor::new(
            self.generator.clone(),
            &self.config.endpoints,
            self.config.load.clone(),
            recorder.clone(),
            clock,
        )
        .with_health(self.health.clone())
        .with_logger(logger.clone());

        self.transition(DriverState::SamplingAndLoading).await?;
        let mut sampler_handle = sampler.start();
        // Load starts only once a pre-load snapshot exists
        sampler_handle.first_tick().await;

        let planned_bursts = plan.len();
        let execution = match tokio::spawn(async move { executor.run(&plan, cancel).await }).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "Load executor failed");
                let recorded = recorder.current().await.load_results.len();
                let completed_bursts = recorded / self.config.endpoints.len().max(1);
                ExecutionOutcome {
                    completed_bursts,
                    planned_bursts,
                    incomplete_reason: Some(format!("load executor failed: {}", e)),
                }
            }
        };

        self.transition(DriverState::Draining).await?;
        let sampler_stats = sampler_handle.stop().await;

        if let Some(reason) = &execution.incomplete_reason {
            recorder.mark_incomplete(reason.clone()).await;
        }
        let manifest = recorder.finalize(clock.now()).await?;
        self.transition(DriverState::Finalized).await?;

        logger.log_experiment_finalized(
            execution.completed_bursts,
            execution.planned_bursts,
            manifest.snapshot_index.len(),
            manifest.incomplete,
            manifest.incomplete_reason.as_deref(),
        );

        Ok(RunSummary {
            run_dir,
            manifest,
            execution,
            sampler: sampler_stats,
        })
    }

    /// One placement read; failure means nothing would be observable
    async fn preflight(&self) -> Result<()> {
        self.health.register(components::CLUSTER).await;
        match self.cluster.pod_placement().await {
            Ok(pods) => {
                info!(pods = pods.len(), namespace = %self.config.namespace, "Cluster preflight passed");
                self.health.set_healthy(components::CLUSTER).await;
                Ok(())
            }
            Err(e) => {
                let message = format!("{:#}", e);
                self.health
                    .set_unhealthy(components::CLUSTER, message.clone())
                    .await;
                Err(ExperimentError::ClusterUnreachable(message))
            }
        }
    }
}
