//! Telemetry sampler loop
//!
//! Captures a snapshot and runs the cross-service probes on a fixed interval
//! for the whole lifetime of an experiment, independent of the burst schedule.

use super::{CrossServiceProbe, SnapshotCollector};
use crate::clock::ExperimentClock;
use crate::health::{components, HealthRegistry};
use crate::manifest::ManifestRecorder;
use crate::models::Snapshot;
use crate::observability::{ExperimentMetrics, StructuredLogger};
use anyhow::Result;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Counters for one sampler run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SamplerStats {
    pub ticks: u64,
    pub snapshots: u64,
    pub snapshot_failures: u64,
    pub probes: u64,
    pub probe_errors: u64,
    /// Ticks that took longer than the interval
    pub overruns: u64,
}

/// Periodic snapshot + probe loop
pub struct TelemetrySampler {
    collector: SnapshotCollector,
    probe: Option<CrossServiceProbe>,
    recorder: ManifestRecorder,
    clock: ExperimentClock,
    interval: Duration,
    health: HealthRegistry,
    logger: StructuredLogger,
    metrics: ExperimentMetrics,
}

/// Handle to a running sampler
pub struct SamplerHandle {
    cancel: CancellationToken,
    task: JoinHandle<SamplerStats>,
    first_tick: Option<oneshot::Receiver<()>>,
}

impl SamplerHandle {
    /// Wait until the first tick has captured and recorded its snapshot.
    ///
    /// Returns immediately on later calls, or if the sampler stopped before
    /// completing a tick.
    pub async fn first_tick(&mut self) {
        if let Some(rx) = self.first_tick.take() {
            let _ = rx.await;
        }
    }

    /// Request termination and wait for the in-flight tick to finish
    pub async fn stop(self) -> SamplerStats {
        self.cancel.cancel();
        match self.task.await {
            Ok(stats) => stats,
            Err(e) => {
                error!(error = %e, "Sampler task failed");
                SamplerStats::default()
            }
        }
    }
}

impl TelemetrySampler {
    pub fn builder() -> TelemetrySamplerBuilder {
        TelemetrySamplerBuilder::new()
    }

    /// Spawn the loop; the first tick fires immediately
    pub fn start(self) -> SamplerHandle {
        let cancel = CancellationToken::new();
        let (tx, rx) = oneshot::channel();
        let task = tokio::spawn(self.run(cancel.clone(), tx));
        SamplerHandle {
            cancel,
            task,
            first_tick: Some(rx),
        }
    }

    async fn run(self, cancel: CancellationToken, first_tick: oneshot::Sender<()>) -> SamplerStats {
        info!(interval_secs = self.interval.as_secs(), "Starting telemetry sampler");
        self.health.register(components::SAMPLER).await;

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut stats = SamplerStats::default();
        let mut last_snapshot: Option<Snapshot> = None;
        let mut first_tick = Some(first_tick);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(ticks = stats.ticks, snapshots = stats.snapshots, "Stopping telemetry sampler");
                    break;
                }
                _ = ticker.tick() => {
                    self.tick(&mut last_snapshot, &mut stats).await;
                    if let Some(tx) = first_tick.take() {
                        let _ = tx.send(());
                    }
                }
            }
        }

        stats
    }

    async fn tick(&self, last_snapshot: &mut Option<Snapshot>, stats: &mut SamplerStats) {
        let started = Instant::now();
        let timestamp = self.clock.now();
        stats.ticks += 1;

        let capture = self.collector.capture(timestamp).await;
        let error_summary = capture
            .errors
            .iter()
            .map(|e| e.message.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        if !capture.errors.is_empty() {
            for e in &capture.errors {
                self.logger.log_telemetry_error(e.source.as_str(), &e.message);
            }
            self.metrics.add_telemetry_errors(capture.errors.len() as u64);
            self.recorder.record_telemetry_errors(capture.errors).await;
        }

        let snapshot_ok = match capture.snapshot {
            Some(snapshot) => {
                let recorded = match self.recorder.record_snapshot(&snapshot).await {
                    Ok(true) => {
                        stats.snapshots += 1;
                        self.metrics.inc_snapshots();
                        self.health.set_healthy(components::SAMPLER).await;
                        true
                    }
                    Ok(false) => {
                        self.health.set_healthy(components::SAMPLER).await;
                        true
                    }
                    Err(e) if e.is_fatal() => {
                        error!(error = %e, "Failed to persist snapshot");
                        self.health
                            .set_unhealthy(components::SAMPLER, format!("failed to persist snapshot: {}", e))
                            .await;
                        false
                    }
                    Err(e) => {
                        warn!(error = %e, "Snapshot not recorded");
                        self.health
                            .set_degraded(components::SAMPLER, format!("snapshot not recorded: {}", e))
                            .await;
                        false
                    }
                };
                *last_snapshot = Some(snapshot);
                recorded
            }
            None => {
                stats.snapshot_failures += 1;
                self.health
                    .set_degraded(components::SAMPLER, error_summary)
                    .await;
                false
            }
        };

        let mut probe_count = 0;
        let mut probe_errors = 0;
        if let Some(probe) = &self.probe {
            let results = probe.run(timestamp, last_snapshot.as_ref()).await;
            probe_count = results.len();
            probe_errors = results.iter().filter(|r| r.is_error()).count();
            if let Err(e) = self.recorder.record_probes(&results).await {
                error!(error = %e, "Failed to persist probe results");
            }
            stats.probes += probe_count as u64;
            stats.probe_errors += probe_errors as u64;
            self.metrics.add_probes(probe_count as u64, probe_errors as u64);
        }

        let elapsed = started.elapsed();
        self.metrics.observe_tick_latency(elapsed.as_secs_f64());
        if elapsed > self.interval {
            stats.overruns += 1;
            warn!(
                elapsed_ms = elapsed.as_millis() as u64,
                interval_secs = self.interval.as_secs(),
                "Sampler tick overran its interval"
            );
        }

        self.logger
            .log_sampler_tick(stats.ticks, snapshot_ok, probe_count, probe_errors, elapsed.as_millis());
    }
}

/// Builder for [`TelemetrySampler`]
pub struct TelemetrySamplerBuilder {
    collector: Option<SnapshotCollector>,
    probe: Option<CrossServiceProbe>,
    recorder: Option<ManifestRecorder>,
    clock: Option<ExperimentClock>,
    interval: Duration,
    health: Option<HealthRegistry>,
    logger: Option<StructuredLogger>,
}

impl TelemetrySamplerBuilder {
    pub fn new() -> Self {
        Self {
            collector: None,
            probe: None,
            recorder: None,
            clock: None,
            interval: Duration::from_secs(8),
            health: None,
            logger: None,
        }
    }

    pub fn collector(mut self, collector: SnapshotCollector) -> Self {
        self.collector = Some(collector);
        self
    }

    /// Probes are optional; without them only snapshots are taken
    pub fn probe(mut self, probe: CrossServiceProbe) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn recorder(mut self, recorder: ManifestRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn clock(mut self, clock: ExperimentClock) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn build(self) -> Result<TelemetrySampler> {
        let collector = self
            .collector
            .ok_or_else(|| anyhow::anyhow!("Snapshot collector is required"))?;
        let recorder = self
            .recorder
            .ok_or_else(|| anyhow::anyhow!("Manifest recorder is required"))?;
        if self.interval.is_zero() {
            anyhow::bail!("Sampler interval must be positive");
        }

        Ok(TelemetrySampler {
            collector,
            probe: self.probe,
            recorder,
            clock: self.clock.unwrap_or_default(),
            interval: self.interval,
            health: self.health.unwrap_or_default(),
            logger: self.logger.unwrap_or_else(|| StructuredLogger::new("unnamed")),
            metrics: ExperimentMetrics::new(),
        })
    }
}

impl Default for TelemetrySamplerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExperimentConfig, ProbeConfig, ProbePair};
    use crate::health::ComponentStatus;
    use crate::manifest::{new_manifest, ArtifactStore, SNAPSHOTS_DIR};
    use crate::testing::FakeCluster;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn recorder(dir: &TempDir) -> ManifestRecorder {
        let store = ArtifactStore::create(dir.path(), "run").unwrap();
        let manifest = new_manifest("run", 1, Utc::now(), &ExperimentConfig::default(), Vec::new());
        ManifestRecorder::new(manifest, store)
    }

    fn probe(cluster: Arc<FakeCluster>) -> CrossServiceProbe {
        CrossServiceProbe::new(
            cluster,
            ProbeConfig {
                pairs: vec![ProbePair {
                    source_service: "frontend".into(),
                    target_service: "cart".into(),
                }],
                targets: BTreeMap::from([("cart".to_string(), "http://cart:7070/".to_string())]),
                repeat: 3,
                timeout_secs: 2,
            },
        )
    }

    fn sampler(cluster: Arc<FakeCluster>, recorder: ManifestRecorder, interval_secs: u64) -> TelemetrySampler {
        TelemetrySampler::builder()
            .collector(SnapshotCollector::new(cluster.clone()))
            .probe(probe(cluster))
            .recorder(recorder)
            .clock(ExperimentClock::start())
            .interval(Duration::from_secs(interval_secs))
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_requires_collector() {
        let dir = TempDir::new().unwrap();
        assert!(TelemetrySampler::builder()
            .recorder(recorder(&dir))
            .build()
            .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_eight_second_interval_stopped_at_twenty_five() {
        let dir = TempDir::new().unwrap();
        let cluster = Arc::new(FakeCluster::with_default_workload());
        let recorder = recorder(&dir);

        let handle = sampler(cluster, recorder.clone(), 8).start();
        tokio::time::sleep(Duration::from_secs(25)).await;
        let stats = handle.stop().await;

        let index = recorder.current().await.snapshot_index;
        assert!((3..=4).contains(&index.len()), "got {} snapshots", index.len());
        assert_eq!(stats.snapshots as usize, index.len());
        assert!(index.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[tokio::test(start_paused = true)]
    async fn test_probes_logged_every_tick() {
        let dir = TempDir::new().unwrap();
        let cluster = Arc::new(FakeCluster::with_default_workload());
        let recorder = recorder(&dir);

        let handle = sampler(cluster, recorder.clone(), 8).start();
        tokio::time::sleep(Duration::from_secs(9)).await;
        let stats = handle.stop().await;

        // Two ticks, two frontend nodes, three repeats
        assert_eq!(stats.ticks, 2);
        assert_eq!(stats.probes, 12);
        let manifest = recorder.current().await;
        assert_eq!(manifest.probe_count, 12);

        let probes = recorder.store().read_probes(&manifest.probe_log_ref).unwrap();
        let snapshot_times: Vec<_> = manifest.snapshot_index.iter().map(|s| s.timestamp).collect();
        assert!(probes.iter().all(|p| snapshot_times.contains(&p.timestamp)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_read_recorded_and_sampling_continues() {
        let dir = TempDir::new().unwrap();
        let cluster = Arc::new(FakeCluster::with_default_workload());
        cluster.fail_autoscaler.store(true, Ordering::SeqCst);
        let recorder = recorder(&dir);
        let health = HealthRegistry::new();

        let sampler = TelemetrySampler::builder()
            .collector(SnapshotCollector::new(cluster.clone()))
            .probe(probe(cluster.clone()))
            .recorder(recorder.clone())
            .interval(Duration::from_secs(8))
            .health(health.clone())
            .build()
            .unwrap();

        let handle = sampler.start();
        tokio::time::sleep(Duration::from_secs(1)).await;
        cluster.fail_autoscaler.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(8)).await;
        let stats = handle.stop().await;

        assert_eq!(stats.snapshot_failures, 1);
        assert_eq!(stats.snapshots, 1);
        let manifest = recorder.current().await;
        assert_eq!(manifest.telemetry_errors.len(), 1);
        // The first tick had no snapshot to pick probe sources from
        assert_eq!(stats.probe_errors, 1);
        assert_eq!(
            health.health().await.components[components::SAMPLER].status,
            crate::health::ComponentStatus::Healthy
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_tick_counts_overrun() {
        let dir = TempDir::new().unwrap();
        let cluster = Arc::new(FakeCluster::with_default_workload());
        cluster.read_delay_ms.store(10_000, Ordering::SeqCst);
        let recorder = recorder(&dir);

        let handle = sampler(cluster, recorder.clone(), 8).start();
        tokio::time::sleep(Duration::from_secs(25)).await;
        let stats = handle.stop().await;

        assert!(stats.overruns >= 1);
        let index = recorder.current().await.snapshot_index;
        assert!(index.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unwritable_snapshot_dir_marks_sampler_unhealthy() {
        let dir = TempDir::new().unwrap();
        let cluster = Arc::new(FakeCluster::with_default_workload());
        let recorder = recorder(&dir);
        std::fs::remove_dir_all(recorder.store().path(SNAPSHOTS_DIR)).unwrap();
        let health = HealthRegistry::new();

        let sampler = TelemetrySampler::builder()
            .collector(SnapshotCollector::new(cluster))
            .recorder(recorder.clone())
            .interval(Duration::from_secs(8))
            .health(health.clone())
            .build()
            .unwrap();

        let handle = sampler.start();
        tokio::time::sleep(Duration::from_secs(1)).await;
        let stats = handle.stop().await;

        assert_eq!(stats.ticks, 1);
        assert_eq!(stats.snapshots, 0);
        assert!(recorder.current().await.snapshot_index.is_empty());
        let sampler_health = &health.health().await.components[components::SAMPLER];
        assert_eq!(sampler_health.status, ComponentStatus::Unhealthy);
        assert!(sampler_health
            .message
            .as_deref()
            .unwrap_or_default()
            .contains("failed to persist snapshot"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_resolves_after_first_snapshot() {
        let dir = TempDir::new().unwrap();
        let cluster = Arc::new(FakeCluster::with_default_workload());
        cluster.read_delay_ms.store(3_000, Ordering::SeqCst);
        let recorder = recorder(&dir);

        let mut handle = sampler(cluster, recorder.clone(), 8).start();
        let waited = Instant::now();
        handle.first_tick().await;

        // The placement read alone takes three seconds
        assert!(waited.elapsed() >= Duration::from_secs(3));
        assert_eq!(recorder.current().await.snapshot_index.len(), 1);

        // Later calls return at once
        handle.first_tick().await;
        handle.stop().await;
    }
}
