//! Telemetry collection during an experiment
//!
//! This module provides the snapshot collector (placement, endpoints,
//! autoscaler state, resource usage), the cross-service probe run from inside workload pods,
//! and the sampler loop that drives both on a fixed interval for the whole
//! experiment.

mod probe;
mod sampler;

pub use probe::{parse_probe_output, probe_command, CrossServiceProbe};
pub use sampler::{SamplerHandle, SamplerStats, TelemetrySampler};

use crate::cluster::ClusterState;
use crate::error::ExperimentError;
use crate::models::{Snapshot, TelemetryError, TelemetrySource};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of one capture
#[derive(Debug, Clone)]
pub struct Capture {
    /// Present when placement, endpoints and autoscaler state were all read
    pub snapshot: Option<Snapshot>,
    /// Every failed read, including a failed usage read that still produced a snapshot
    pub errors: Vec<TelemetryError>,
}

/// Captures one snapshot of cluster state per call
#[derive(Clone)]
pub struct SnapshotCollector {
    cluster: Arc<dyn ClusterState>,
}

impl SnapshotCollector {
    pub fn new(cluster: Arc<dyn ClusterState>) -> Self {
        Self { cluster }
    }

    /// Read placement, endpoints, autoscaler state and resource usage in
    /// sequence and tag them with `timestamp`.
    ///
    /// A snapshot is only produced when the first three reads succeed. Usage
    /// is best effort: when the metrics API fails the snapshot carries an
    /// empty usage report and the failure is returned as an error entry.
    pub async fn capture(&self, timestamp: DateTime<Utc>) -> Capture {
        let mut errors = Vec::new();
        let failed = |source: TelemetrySource, e: anyhow::Error| {
            let err = ExperimentError::TelemetryUnavailable(format!("{}: {:#}", source.as_str(), e));
            warn!(source = source.as_str(), error = %err, "Cluster read failed");
            TelemetryError {
                timestamp,
                source,
                message: err.to_string(),
            }
        };

        let pod_placement = self
            .cluster
            .pod_placement()
            .await
            .map_err(|e| errors.push(failed(TelemetrySource::PodPlacement, e)))
            .ok();
        let service_endpoints = self
            .cluster
            .service_endpoints()
            .await
            .map_err(|e| errors.push(failed(TelemetrySource::ServiceEndpoints, e)))
            .ok();
        let autoscaler_state = self
            .cluster
            .autoscaler_state()
            .await
            .map_err(|e| errors.push(failed(TelemetrySource::AutoscalerState, e)))
            .ok();
        let resource_usage = self
            .cluster
            .resource_usage()
            .await
            .map_err(|e| errors.push(failed(TelemetrySource::ResourceUsage, e)))
            .unwrap_or_default();

        let snapshot = match (pod_placement, service_endpoints, autoscaler_state) {
            (Some(pod_placement), Some(service_endpoints), Some(autoscaler_state)) => {
                debug!(
                    pods = pod_placement.len(),
                    services = service_endpoints.len(),
                    autoscalers = autoscaler_state.len(),
                    usage_nodes = resource_usage.nodes.len(),
                    "Captured snapshot"
                );
                Some(Snapshot {
                    timestamp,
                    pod_placement,
                    service_endpoints,
                    autoscaler_state,
                    resource_usage,
                })
            }
            _ => None,
        };

        Capture { snapshot, errors }
    }
}
