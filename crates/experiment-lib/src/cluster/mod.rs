//! Typed interface to the cluster under test
//!
//! The experiment core only sees structured records. Decoding Kubernetes
//! objects happens in the Kubernetes backend ([`KubeCluster`]) and nowhere else.

mod k8s;

pub use self::k8s::{parse_quantity, KubeCluster};

use crate::models::{AutoscalerStatus, PodPlacement, UsageReport};
use anyhow::Result;
use std::collections::BTreeMap;

pub use async_trait::async_trait;

/// Read-only view of cluster state
#[async_trait]
pub trait ClusterState: Send + Sync {
    /// Pod to node placement of the workload
    async fn pod_placement(&self) -> Result<Vec<PodPlacement>>;

    /// Service name -> ready endpoint pod ids
    async fn service_endpoints(&self) -> Result<BTreeMap<String, Vec<String>>>;

    /// Service name -> autoscaler status
    async fn autoscaler_state(&self) -> Result<BTreeMap<String, AutoscalerStatus>>;

    /// Pod and node CPU/memory usage from the metrics API
    async fn resource_usage(&self) -> Result<UsageReport>;
}

/// Run a command inside a live workload pod and return its stdout
#[async_trait]
pub trait PodExec: Send + Sync {
    async fn exec(&self, pod_id: &str, command: &[String]) -> Result<String>;
}
