//! Walks the burst plan: one generator per endpoint per burst, a join
//! barrier between bursts, then the inter-burst pause.

use super::{LoadGenerator, LoadRequest};
use crate::clock::ExperimentClock;
use crate::config::{EndpointConfig, LoadConfig};
use crate::error::ExperimentError;
use crate::health::{components, HealthRegistry};
use crate::manifest::ManifestRecorder;
use crate::models::{BurstDescriptor, BurstPlan, BurstWindow, LoadResult};
use crate::observability::{ExperimentMetrics, StructuredLogger};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// How far the executor got through the plan
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    pub completed_bursts: usize,
    pub planned_bursts: usize,
    pub incomplete_reason: Option<String>,
}

impl ExecutionOutcome {
    pub fn is_complete(&self) -> bool {
        self.incomplete_reason.is_none() && self.completed_bursts == self.planned_bursts
    }

    pub fn into_result(self) -> Result<(), ExperimentError> {
        match self.incomplete_reason {
            None => Ok(()),
            Some(reason) => Err(ExperimentError::IncompleteExperiment {
                completed_bursts: self.completed_bursts,
                planned_bursts: self.planned_bursts,
                reason,
            }),
        }
    }
}

/// Runs a burst plan against the configured endpoints
pub struct LoadExecutor {
    generator: Arc<dyn LoadGenerator>,
    endpoint_urls: BTreeMap<String, String>,
    load: LoadConfig,
    recorder: ManifestRecorder,
    clock: ExperimentClock,
    health: HealthRegistry,
    logger: StructuredLogger,
    metrics: ExperimentMetrics,
}

impl LoadExecutor {
    pub fn new(
        generator: Arc<dyn LoadGenerator>,
        endpoints: &[EndpointConfig],
        load: LoadConfig,
        recorder: ManifestRecorder,
        clock: ExperimentClock,
    ) -> Self {
        Self {
            generator,
            endpoint_urls: endpoints
                .iter()
                .map(|e| (e.name.clone(), e.url.clone()))
                .collect(),
            load,
            recorder,
            clock,
            health: HealthRegistry::new(),
            logger: StructuredLogger::new("unnamed"),
            metrics: ExperimentMetrics::new(),
        }
    }

    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = health;
        self
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    /// Execute bursts in plan order until the plan ends, a burst is entirely
    /// unreachable, or `cancel` fires between bursts.
    pub async fn run(&self, plan: &BurstPlan, cancel: CancellationToken) -> ExecutionOutcome {
        self.health.register(components::EXECUTOR).await;

        let mut outcome = ExecutionOutcome {
            completed_bursts: 0,
            planned_bursts: plan.len(),
            incomplete_reason: None,
        };

        for (position, burst) in plan.iter().enumerate() {
            if cancel.is_cancelled() {
                outcome.incomplete_reason = Some(format!("cancelled before burst {}", burst.index));
                break;
            }

            let results = self.run_burst(burst).await;
            let requests: u64 = results.iter().map(|r| r.request_count).sum();
            let errors: u64 = results.iter().map(|r| r.error_count).sum();
            let unreachable = is_unreachable(&results);

            for result in &results {
                self.metrics
                    .add_load(&result.endpoint_name, result.request_count, result.error_count);
            }

            match self.recorder.record_load_results(results).await {
                Ok(()) => {}
                Err(e) if e.is_fatal() => {
                    error!(burst_index = burst.index, error = %e, "Failed to persist load results");
                    self.health
                        .set_unhealthy(components::EXECUTOR, format!("failed to persist results: {}", e))
                        .await;
                    outcome.incomplete_reason =
                        Some(format!("failed to persist results of burst {}: {}", burst.index, e));
                    break;
                }
                Err(e) => {
                    warn!(burst_index = burst.index, error = %e, "Load results not recorded");
                    self.health
                        .set_degraded(components::EXECUTOR, format!("results of burst {} not recorded: {}", burst.index, e))
                        .await;
                }
            }

            outcome.completed_bursts += 1;
            self.metrics.inc_bursts_completed();
            self.logger
                .log_burst_completed(burst.index, requests, errors, unreachable);

            if unreachable {
                self.health
                    .set_degraded(
                        components::EXECUTOR,
                        format!("burst {} had no successful request", burst.index),
                    )
                    .await;
                if self.load.abort_on_unreachable_burst {
                    outcome.incomplete_reason =
                        Some(format!("burst {} unreachable: every endpoint failed every request", burst.index));
                    break;
                }
            }

            let is_last = position + 1 == plan.len();
            if !is_last && burst.inter_burst_pause_seconds > 0 {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        outcome.incomplete_reason = Some(format!("cancelled after burst {}", burst.index));
                        break;
                    }
                    _ = tokio::time::sleep(Duration::from_secs(burst.inter_burst_pause_seconds)) => {}
                }
            }
        }

        self.metrics.set_target_rate(0.0);
        info!(
            completed = outcome.completed_bursts,
            planned = outcome.planned_bursts,
            reason = ?outcome.incomplete_reason,
            "Load executor finished"
        );
        outcome
    }

    /// Run every endpoint of one burst concurrently and wait for all of them
    async fn run_burst(&self, burst: &BurstDescriptor) -> Vec<LoadResult> {
        let duration = Duration::from_secs(burst.duration_seconds);
        let window = BurstWindow {
            burst_index: burst.index,
            started_at: self.clock.now(),
            duration_seconds: burst.duration_seconds,
        };
        self.recorder.record_burst_window(window).await;
        self.metrics.set_target_rate(burst.total_rate);
        self.logger.log_burst_started(
            burst.index,
            burst.kind.as_str(),
            burst.total_rate,
            burst.duration_seconds,
        );

        let mut results = Vec::with_capacity(burst.per_endpoint_rate.len());
        let mut tasks = JoinSet::new();

        for (endpoint, rate) in &burst.per_endpoint_rate {
            if *rate <= 0.0 {
                results.push(idle_result(burst.index, endpoint, duration));
                continue;
            }
            let Some(url) = self.endpoint_urls.get(endpoint) else {
                results.push(failed_result(burst.index, endpoint, *rate, "no URL configured"));
                continue;
            };

            let request = LoadRequest {
                burst_index: burst.index,
                endpoint: endpoint.clone(),
                url: url.clone(),
                rate: *rate,
                duration,
                concurrency: self.load.concurrency,
                request_timeout: self.load.request_timeout(),
            };
            let generator = self.generator.clone();
            tasks.spawn(async move {
                let outcome = generator.run(request.clone()).await;
                (request, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((request, Ok(outcome))) => results.push(outcome.into_result(&request)),
                Ok((request, Err(e))) => {
                    let err = ExperimentError::LoadGeneration {
                        burst_index: request.burst_index,
                        endpoint: request.endpoint.clone(),
                        message: format!("{:#}", e),
                    };
                    warn!(error = %err, "Load generator failed");
                    results.push(failed_result(
                        request.burst_index,
                        &request.endpoint,
                        request.rate,
                        &err.to_string(),
                    ));
                }
                Err(e) => warn!(burst_index = burst.index, error = %e, "Load generator task panicked"),
            }
        }

        // A panicked task leaves no request behind; fill its slot so every
        // endpoint of the burst has a result
        for (endpoint, rate) in &burst.per_endpoint_rate {
            if !results.iter().any(|r| &r.endpoint_name == endpoint) {
                results.push(failed_result(burst.index, endpoint, *rate, "load generator task panicked"));
            }
        }

        results.sort_by(|a, b| a.endpoint_name.cmp(&b.endpoint_name));
        results
    }
}

/// Every endpoint that was asked for load got zero successful responses
fn is_unreachable(results: &[LoadResult]) -> bool {
    let mut loaded = results.iter().filter(|r| r.requested_rate > 0.0).peekable();
    loaded.peek().is_some() && loaded.all(|r| r.success_count() == 0)
}

/// Result for an endpoint that received no share of the burst
fn idle_result(burst_index: usize, endpoint: &str, duration: Duration) -> LoadResult {
    LoadResult {
        burst_index,
        endpoint_name: endpoint.to_string(),
        requested_rate: 0.0,
        achieved_rate: 0.0,
        duration_ns: duration.as_nanos() as u64,
        latency_percentiles: BTreeMap::new(),
        request_count: 0,
        error_count: 0,
    }
}

fn failed_result(burst_index: usize, endpoint: &str, rate: f64, message: &str) -> LoadResult {
    warn!(burst_index, endpoint = %endpoint, error = %message, "Recording failed load result");
    LoadResult {
        burst_index,
        endpoint_name: endpoint.to_string(),
        requested_rate: rate,
        achieved_rate: 0.0,
        duration_ns: 0,
        latency_percentiles: BTreeMap::new(),
        request_count: 0,
        error_count: 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExperimentConfig;
    use crate::health::ComponentStatus;
    use crate::manifest::{new_manifest, ArtifactStore, RESULTS_DIR};
    use crate::models::BurstKind;
    use crate::testing::{FakeLoad, FakeLoadGenerator};
    use chrono::Utc;
    use tempfile::TempDir;

    fn endpoints() -> Vec<EndpointConfig> {
        ["a", "b"]
            .iter()
            .map(|name| EndpointConfig {
                name: name.to_string(),
                url: format!("http://frontend/{}", name),
                weight: 1.0,
            })
            .collect()
    }

    fn burst(index: usize, duration: u64, pause: u64) -> BurstDescriptor {
        BurstDescriptor {
            index,
            kind: BurstKind::HeavyTail,
            total_rate: 20.0,
            duration_seconds: duration,
            inter_burst_pause_seconds: pause,
            per_endpoint_rate: BTreeMap::from([("a".to_string(), 10.0), ("b".to_string(), 10.0)]),
        }
    }

    fn setup(dir: &TempDir, generator: FakeLoadGenerator) -> (LoadExecutor, ManifestRecorder, Arc<FakeLoadGenerator>) {
        let config = ExperimentConfig {
            endpoints: endpoints(),
            ..Default::default()
        };
        let store = ArtifactStore::create(dir.path(), "run").unwrap();
        let recorder = ManifestRecorder::new(new_manifest("run", 1, Utc::now(), &config, Vec::new()), store);
        let generator = Arc::new(generator);
        let executor = LoadExecutor::new(
            generator.clone(),
            &config.endpoints,
            config.load.clone(),
            recorder.clone(),
            ExperimentClock::start(),
        );
        (executor, recorder, generator)
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_result_per_burst_and_endpoint() {
        let dir = TempDir::new().unwrap();
        let (executor, recorder, _) = setup(&dir, FakeLoadGenerator::healthy());
        let plan = vec![burst(0, 10, 3), burst(1, 5, 2), burst(2, 7, 4)];

        let outcome = executor.run(&plan, CancellationToken::new()).await;

        assert!(outcome.is_complete());
        let manifest = recorder.current().await;
        assert_eq!(manifest.load_results.len(), 6);
        assert_eq!(manifest.burst_windows.len(), 3);
        assert!(dir.path().join("run/results/burst-2-b.json").is_file());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bursts_never_overlap() {
        let dir = TempDir::new().unwrap();
        let (executor, _, generator) = setup(&dir, FakeLoadGenerator::healthy());
        let plan = vec![burst(0, 10, 3), burst(1, 5, 0), burst(2, 7, 4)];

        executor.run(&plan, CancellationToken::new()).await;

        let calls = generator.calls();
        for later in &calls {
            for earlier in calls.iter().filter(|c| c.burst_index < later.burst_index) {
                assert!(later.started >= earlier.finished);
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_windows_include_pause() {
        let dir = TempDir::new().unwrap();
        let (executor, recorder, _) = setup(&dir, FakeLoadGenerator::healthy());
        let plan = vec![burst(0, 10, 3), burst(1, 5, 9)];

        let start = tokio::time::Instant::now();
        executor.run(&plan, CancellationToken::new()).await;

        let windows = recorder.current().await.burst_windows;
        assert_eq!(
            windows[1].started_at - windows[0].started_at,
            chrono::Duration::seconds(13)
        );
        // No pause after the last burst
        assert_eq!(start.elapsed(), Duration::from_secs(18));
    }

    #[tokio::test(start_paused = true)]
    async fn test_endpoint_errors_are_recorded_and_run_proceeds() {
        let dir = TempDir::new().unwrap();
        let generator = FakeLoadGenerator::healthy().with("b", FakeLoad::Respond { errors: 5, latency: 0.2 });
        let (executor, recorder, _) = setup(&dir, generator);
        let plan = vec![burst(0, 10, 1), burst(1, 10, 1)];

        let outcome = executor.run(&plan, CancellationToken::new()).await;

        assert!(outcome.is_complete());
        let results = recorder.current().await.load_results;
        let b: Vec<_> = results.iter().filter(|r| r.endpoint_name == "b").collect();
        assert_eq!(b.len(), 2);
        assert!(b.iter().all(|r| r.error_count == 5));
        assert_eq!(results.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generator_failure_becomes_result() {
        let dir = TempDir::new().unwrap();
        let generator = FakeLoadGenerator::healthy().with("a", FakeLoad::Fail("dns failure".into()));
        let (executor, recorder, _) = setup(&dir, generator);

        let outcome = executor.run(&vec![burst(0, 5, 1)], CancellationToken::new()).await;

        assert!(outcome.is_complete());
        let results = recorder.current().await.load_results;
        let a = results.iter().find(|r| r.endpoint_name == "a").unwrap();
        assert_eq!(a.achieved_rate, 0.0);
        assert_eq!(a.error_count, 1);
        assert!(a.latency_percentiles.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_burst_stops_run() {
        let dir = TempDir::new().unwrap();
        let generator = FakeLoadGenerator::healthy()
            .with("a", FakeLoad::Unreachable)
            .with("b", FakeLoad::Unreachable);
        let (executor, recorder, _) = setup(&dir, generator);
        let plan = vec![burst(0, 5, 1), burst(1, 5, 1), burst(2, 5, 1)];

        let outcome = executor.run(&plan, CancellationToken::new()).await;

        assert_eq!(outcome.completed_bursts, 1);
        assert!(outcome.incomplete_reason.as_deref().unwrap().contains("unreachable"));
        assert_eq!(recorder.current().await.load_results.len(), 2);
        assert!(matches!(
            outcome.into_result(),
            Err(ExperimentError::IncompleteExperiment { completed_bursts: 1, planned_bursts: 3, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_partially_reachable_burst_continues() {
        let dir = TempDir::new().unwrap();
        let generator = FakeLoadGenerator::healthy().with("a", FakeLoad::Unreachable);
        let (executor, _, _) = setup(&dir, generator);

        let outcome = executor
            .run(&vec![burst(0, 5, 1), burst(1, 5, 1)], CancellationToken::new())
            .await;
        assert!(outcome.is_complete());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_pause() {
        let dir = TempDir::new().unwrap();
        let (executor, recorder, _) = setup(&dir, FakeLoadGenerator::healthy());
        let plan = vec![burst(0, 5, 60), burst(1, 5, 1)];
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            trigger.cancel();
        });

        let outcome = executor.run(&plan, cancel).await;

        assert_eq!(outcome.completed_bursts, 1);
        assert!(outcome.incomplete_reason.unwrap().contains("cancelled"));
        assert_eq!(recorder.current().await.load_results.len(), 2);
    }

    #[test]
    fn test_zero_rate_endpoint_does_not_make_burst_unreachable() {
        let mut failed = failed_result(0, "a", 5.0, "boom");
        failed.request_count = 5;
        failed.error_count = 5;
        let idle = idle_result(0, "b", Duration::from_secs(1));

        assert!(is_unreachable(&[failed.clone(), idle.clone()]));
        assert!(!is_unreachable(&[idle]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unwritable_results_dir_stops_run() {
        let dir = TempDir::new().unwrap();
        let (executor, recorder, generator) = setup(&dir, FakeLoadGenerator::healthy());
        let health = HealthRegistry::new();
        let executor = executor.with_health(health.clone());
        std::fs::remove_dir_all(recorder.store().path(RESULTS_DIR)).unwrap();
        let plan = vec![burst(0, 5, 1), burst(1, 5, 1)];

        let outcome = executor.run(&plan, CancellationToken::new()).await;

        assert_eq!(outcome.completed_bursts, 0);
        assert!(outcome
            .incomplete_reason
            .as_deref()
            .unwrap()
            .starts_with("failed to persist results of burst 0"));
        // The second burst never started
        assert!(generator.calls().iter().all(|c| c.burst_index == 0));
        assert_eq!(
            health.health().await.components[components::EXECUTOR].status,
            ComponentStatus::Unhealthy
        );
    }
}
