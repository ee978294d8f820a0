//! Observability for experiment runs
//!
//! Provides:
//! - Prometheus metrics (sampler tick latency, snapshot/probe counts, load counters)
//! - Structured logging of experiment events with tracing

use prometheus::{
    register_gauge, register_histogram, register_int_counter, register_int_counter_vec, Encoder,
    Gauge, Histogram, IntCounter, IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for sampler tick latency (in seconds)
const TICK_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ExperimentMetricsInner> = OnceLock::new();

struct ExperimentMetricsInner {
    sampler_tick_seconds: Histogram,
    snapshots_captured: IntCounter,
    probes_total: IntCounter,
    probe_errors: IntCounter,
    telemetry_errors: IntCounter,
    bursts_completed: IntCounter,
    load_requests: IntCounterVec,
    load_errors: IntCounterVec,
    target_rate: Gauge,
}

impl ExperimentMetricsInner {
    fn new() -> Self {
        Self {
            sampler_tick_seconds: register_histogram!(
                "burstlab_sampler_tick_seconds",
                "Time spent on one sampler tick (snapshot and probes)",
                TICK_BUCKETS.to_vec()
            )
            .expect("Failed to register sampler_tick_seconds"),

            snapshots_captured: register_int_counter!(
                "burstlab_snapshots_captured_total",
                "Snapshots captured by the telemetry sampler"
            )
            .expect("Failed to register snapshots_captured"),

            probes_total: register_int_counter!(
                "burstlab_probes_total",
                "Cross-service probes attempted"
            )
            .expect("Failed to register probes_total"),

            probe_errors: register_int_counter!(
                "burstlab_probe_errors_total",
                "Cross-service probes that failed or returned an error status"
            )
            .expect("Failed to register probe_errors"),

            telemetry_errors: register_int_counter!(
                "burstlab_telemetry_errors_total",
                "Failed cluster reads during snapshot capture"
            )
            .expect("Failed to register telemetry_errors"),

            bursts_completed: register_int_counter!(
                "burstlab_bursts_completed_total",
                "Bursts whose load generators all finished"
            )
            .expect("Failed to register bursts_completed"),

            load_requests: register_int_counter_vec!(
                "burstlab_load_requests_total",
                "Load requests issued per endpoint",
                &["endpoint"]
            )
            .expect("Failed to register load_requests"),

            load_errors: register_int_counter_vec!(
                "burstlab_load_errors_total",
                "Failed load requests per endpoint",
                &["endpoint"]
            )
            .expect("Failed to register load_errors"),

            target_rate: register_gauge!(
                "burstlab_target_rate",
                "Aggregate target request rate of the running burst"
            )
            .expect("Failed to register target_rate"),
        }
    }
}

/// Handle to the global experiment metrics; clones share the same metrics
#[derive(Clone)]
pub struct ExperimentMetrics {
    _private: (),
}

impl Default for ExperimentMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ExperimentMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ExperimentMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ExperimentMetricsInner {
        GLOBAL_METRICS.get_or_init(ExperimentMetricsInner::new)
    }

    pub fn observe_tick_latency(&self, duration_secs: f64) {
        self.inner().sampler_tick_seconds.observe(duration_secs);
    }

    pub fn inc_snapshots(&self) {
        self.inner().snapshots_captured.inc();
    }

    /// Count probe attempts and how many of them failed
    pub fn add_probes(&self, attempts: u64, errors: u64) {
        self.inner().probes_total.inc_by(attempts);
        self.inner().probe_errors.inc_by(errors);
    }

    pub fn add_telemetry_errors(&self, count: u64) {
        self.inner().telemetry_errors.inc_by(count);
    }

    pub fn inc_bursts_completed(&self) {
        self.inner().bursts_completed.inc();
    }

    /// Record one endpoint's request and error counts for a burst
    pub fn add_load(&self, endpoint: &str, requests: u64, errors: u64) {
        self.inner()
            .load_requests
            .with_label_values(&[endpoint])
            .inc_by(requests);
        self.inner()
            .load_errors
            .with_label_values(&[endpoint])
            .inc_by(errors);
    }

    pub fn set_target_rate(&self, rate: f64) {
        self.inner().target_rate.set(rate);
    }

    pub fn bursts_completed(&self) -> u64 {
        self.inner().bursts_completed.get()
    }

    /// Aggregate rate of the burst in progress, 0 between bursts
    pub fn target_rate(&self) -> f64 {
        self.inner().target_rate.get()
    }

    /// Every registered metric in the Prometheus text format
    pub fn encode_text(&self) -> prometheus::Result<Vec<u8>> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
        Ok(buffer)
    }
}

/// Structured logger for experiment events
///
/// Every event carries the run id and an `event` field so runs can be
/// filtered out of the JSON log stream.
#[derive(Clone)]
pub struct StructuredLogger {
    run_id: String,
}

impl StructuredLogger {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn log_experiment_started(&self, seed: u64, bursts: usize, endpoints: usize) {
        info!(
            event = "experiment_started",
            run_id = %self.run_id,
            seed = seed,
            bursts = bursts,
            endpoints = endpoints,
            "Experiment started"
        );
    }

    pub fn log_burst_started(&self, burst_index: usize, kind: &str, total_rate: f64, duration_secs: u64) {
        info!(
            event = "burst_started",
            run_id = %self.run_id,
            burst_index = burst_index,
            kind = %kind,
            total_rate = total_rate,
            duration_secs = duration_secs,
            "Burst started"
        );
    }

    pub fn log_burst_completed(&self, burst_index: usize, requests: u64, errors: u64, unreachable: bool) {
        if unreachable {
            warn!(
                event = "burst_completed",
                run_id = %self.run_id,
                burst_index = burst_index,
                requests = requests,
                errors = errors,
                unreachable = true,
                "Burst completed without a single successful request"
            );
        } else {
            info!(
                event = "burst_completed",
                run_id = %self.run_id,
                burst_index = burst_index,
                requests = requests,
                errors = errors,
                unreachable = false,
                "Burst completed"
            );
        }
    }

    pub fn log_sampler_tick(&self, tick: u64, snapshot_ok: bool, probes: usize, probe_errors: usize, elapsed_ms: u128) {
        info!(
            event = "sampler_tick",
            run_id = %self.run_id,
            tick = tick,
            snapshot_ok = snapshot_ok,
            probes = probes,
            probe_errors = probe_errors,
            elapsed_ms = elapsed_ms as u64,
            "Sampler tick complete"
        );
    }

    pub fn log_telemetry_error(&self, source: &str, message: &str) {
        warn!(
            event = "telemetry_error",
            run_id = %self.run_id,
            source = %source,
            error = %message,
            "Telemetry read failed"
        );
    }

    pub fn log_experiment_finalized(
        &self,
        completed_bursts: usize,
        planned_bursts: usize,
        snapshots: usize,
        incomplete: bool,
        reason: Option<&str>,
    ) {
        if incomplete {
            warn!(
                event = "experiment_finalized",
                run_id = %self.run_id,
                completed_bursts = completed_bursts,
                planned_bursts = planned_bursts,
                snapshots = snapshots,
                incomplete = true,
                reason = reason.unwrap_or("unknown"),
                "Experiment finalized incomplete"
            );
        } else {
            info!(
                event = "experiment_finalized",
                run_id = %self.run_id,
                completed_bursts = completed_bursts,
                planned_bursts = planned_bursts,
                snapshots = snapshots,
                incomplete = false,
                "Experiment finalized"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_experiment_metrics_creation() {
        let metrics = ExperimentMetrics::new();

        metrics.observe_tick_latency(0.2);
        metrics.inc_snapshots();
        metrics.add_probes(6, 1);
        metrics.add_telemetry_errors(1);
        metrics.inc_bursts_completed();
        metrics.add_load("home", 100, 2);
        metrics.set_target_rate(42.0);

        // A second handle shares the registered metrics
        let again = ExperimentMetrics::new();
        again.inc_snapshots();
    }

    #[test]
    fn test_metrics_are_gathered() {
        let metrics = ExperimentMetrics::new();
        metrics.add_load("cart", 10, 0);

        let families = prometheus::gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "burstlab_load_requests_total"));
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("20260101-000000");
        assert_eq!(logger.run_id(), "20260101-000000");
    }
}
