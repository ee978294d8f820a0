//! In-memory fakes shared by unit tests

use crate::cluster::{ClusterState, PodExec};
use crate::load::{LoadGenerator, LoadOutcome, LoadRequest};
use crate::models::{AutoscalerStatus, PodPhase, PodPlacement, ResourceUsage, Snapshot, UsageReport};
use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub fn pod(pod_id: &str, node_id: &str, service: &str) -> PodPlacement {
    PodPlacement {
        pod_id: pod_id.to_string(),
        node_id: node_id.to_string(),
        service_name: service.to_string(),
        phase: PodPhase::Running,
    }
}

fn default_placement() -> Vec<PodPlacement> {
    vec![
        pod("cart-1", "node-1", "cart"),
        pod("frontend-a", "node-1", "frontend"),
        pod("frontend-b", "node-2", "frontend"),
    ]
}

fn default_endpoints() -> BTreeMap<String, Vec<String>> {
    BTreeMap::from([
        ("cart".to_string(), vec!["cart-1".to_string()]),
        (
            "frontend".to_string(),
            vec!["frontend-a".to_string(), "frontend-b".to_string()],
        ),
    ])
}

fn default_autoscalers() -> BTreeMap<String, AutoscalerStatus> {
    BTreeMap::from([(
        "cart".to_string(),
        AutoscalerStatus {
            desired_replicas: 2,
            current_replicas: 1,
            observed_metric_value: Some(85.0),
        },
    )])
}

fn default_usage() -> UsageReport {
    let usage = |cpu_cores: f64, memory_mib: f64| ResourceUsage {
        cpu_cores,
        memory_bytes: memory_mib * 1024.0 * 1024.0,
    };
    UsageReport {
        pods: BTreeMap::from([
            ("cart-1".to_string(), usage(0.5, 128.0)),
            ("frontend-a".to_string(), usage(0.25, 64.0)),
            ("frontend-b".to_string(), usage(0.25, 64.0)),
        ]),
        nodes: BTreeMap::from([
            ("node-1".to_string(), usage(1.5, 2048.0)),
            ("node-2".to_string(), usage(0.75, 1024.0)),
        ]),
    }
}

/// Snapshot of the default workload at `timestamp`
pub fn default_snapshot(timestamp: DateTime<Utc>) -> Snapshot {
    Snapshot {
        timestamp,
        pod_placement: default_placement(),
        service_endpoints: default_endpoints(),
        autoscaler_state: default_autoscalers(),
        resource_usage: default_usage(),
    }
}

/// Programmable cluster: two frontend pods on two nodes, one cart pod
pub struct FakeCluster {
    pub placement: Mutex<Vec<PodPlacement>>,
    pub endpoints: Mutex<BTreeMap<String, Vec<String>>>,
    pub autoscalers: Mutex<BTreeMap<String, AutoscalerStatus>>,
    pub usage: Mutex<UsageReport>,
    pub fail_placement: AtomicBool,
    pub fail_endpoints: AtomicBool,
    pub fail_autoscaler: AtomicBool,
    pub fail_usage: AtomicBool,
    pub fail_exec: AtomicBool,
    pub exec_output: Mutex<String>,
    pub exec_calls: AtomicUsize,
    pub placement_calls: AtomicUsize,
    /// Delay added to every placement read, in milliseconds
    pub read_delay_ms: AtomicU64,
}

impl FakeCluster {
    pub fn with_default_workload() -> Self {
        Self {
            placement: Mutex::new(default_placement()),
            endpoints: Mutex::new(default_endpoints()),
            autoscalers: Mutex::new(default_autoscalers()),
            usage: Mutex::new(default_usage()),
            fail_placement: AtomicBool::new(false),
            fail_endpoints: AtomicBool::new(false),
            fail_autoscaler: AtomicBool::new(false),
            fail_usage: AtomicBool::new(false),
            fail_exec: AtomicBool::new(false),
            exec_output: Mutex::new(
                "dns=0.001 connect=0.002 ttfb=0.010 total=0.012 code=200".to_string(),
            ),
            exec_calls: AtomicUsize::new(0),
            placement_calls: AtomicUsize::new(0),
            read_delay_ms: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl ClusterState for FakeCluster {
    async fn pod_placement(&self) -> Result<Vec<PodPlacement>> {
        self.placement_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.read_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_placement.load(Ordering::SeqCst) {
            bail!("pod list failed: connection refused");
        }
        Ok(self.placement.lock().unwrap().clone())
    }

    async fn service_endpoints(&self) -> Result<BTreeMap<String, Vec<String>>> {
        if self.fail_endpoints.load(Ordering::SeqCst) {
            bail!("endpoints list failed: connection refused");
        }
        Ok(self.endpoints.lock().unwrap().clone())
    }

    async fn autoscaler_state(&self) -> Result<BTreeMap<String, AutoscalerStatus>> {
        if self.fail_autoscaler.load(Ordering::SeqCst) {
            bail!("autoscaler list failed: forbidden");
        }
        Ok(self.autoscalers.lock().unwrap().clone())
    }

    async fn resource_usage(&self) -> Result<UsageReport> {
        if self.fail_usage.load(Ordering::SeqCst) {
            bail!("metrics API unavailable");
        }
        Ok(self.usage.lock().unwrap().clone())
    }
}

#[async_trait]
impl PodExec for FakeCluster {
    async fn exec(&self, pod_id: &str, _command: &[String]) -> Result<String> {
        self.exec_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_exec.load(Ordering::SeqCst) {
            bail!("exec into {} failed", pod_id);
        }
        Ok(self.exec_output.lock().unwrap().clone())
    }
}

/// Scripted behaviour of one endpoint
#[derive(Debug, Clone)]
pub enum FakeLoad {
    /// Issue `rate * duration` requests, `errors` of them failing, all at `latency`
    Respond { errors: u64, latency: f64 },
    /// Every request fails without a response
    Unreachable,
    /// The generator itself fails
    Fail(String),
}

/// One recorded generator call
#[derive(Debug, Clone)]
pub struct LoadCall {
    pub burst_index: usize,
    pub endpoint: String,
    pub started: tokio::time::Instant,
    pub finished: tokio::time::Instant,
}

/// Load generator that sleeps for the burst duration and reports scripted counts
pub struct FakeLoadGenerator {
    behaviour: Mutex<BTreeMap<String, FakeLoad>>,
    pub calls: Mutex<Vec<LoadCall>>,
}

impl FakeLoadGenerator {
    pub fn healthy() -> Self {
        Self {
            behaviour: Mutex::new(BTreeMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with(self, endpoint: &str, load: FakeLoad) -> Self {
        self.behaviour
            .lock()
            .unwrap()
            .insert(endpoint.to_string(), load);
        self
    }

    pub fn calls(&self) -> Vec<LoadCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl LoadGenerator for FakeLoadGenerator {
    async fn run(&self, request: LoadRequest) -> Result<LoadOutcome> {
        let started = tokio::time::Instant::now();
        let behaviour = self
            .behaviour
            .lock()
            .unwrap()
            .get(&request.endpoint)
            .cloned()
            .unwrap_or(FakeLoad::Respond {
                errors: 0,
                latency: 0.05,
            });

        tokio::time::sleep(request.duration).await;
        self.calls.lock().unwrap().push(LoadCall {
            burst_index: request.burst_index,
            endpoint: request.endpoint.clone(),
            started,
            finished: tokio::time::Instant::now(),
        });

        let issued = (request.rate * request.duration.as_secs_f64()).round() as u64;
        match behaviour {
            FakeLoad::Respond { errors, latency } => Ok(LoadOutcome {
                request_count: issued,
                error_count: errors.min(issued),
                elapsed: request.duration,
                latencies: vec![latency; issued as usize],
            }),
            FakeLoad::Unreachable => Ok(LoadOutcome {
                request_count: issued,
                error_count: issued,
                elapsed: request.duration,
                latencies: Vec::new(),
            }),
            FakeLoad::Fail(message) => bail!(message),
        }
    }
}
