//! Experiment configuration
//!
//! One explicit struct threaded through the driver and every component.
//! Loading (files, environment) is the binaries' job; this module only
//! defines the shape, the defaults and validation.

use crate::error::{ExperimentError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Full configuration of one experiment run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Run identifier; derived from the start time when unset
    #[serde(default)]
    pub run_id: Option<String>,

    /// Directory that receives one sub-directory per run
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Namespace of the workload under test
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Pod label carrying the service name
    #[serde(default = "default_service_label")]
    pub service_label: String,

    /// Explicit kubeconfig path; in-cluster or default kubeconfig otherwise
    #[serde(default)]
    pub kubeconfig: Option<PathBuf>,

    /// Port for the runner's health/metrics server
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default)]
    pub plan: PlanConfig,

    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,

    #[serde(default)]
    pub load: LoadConfig,

    #[serde(default)]
    pub sampler: SamplerConfig,

    #[serde(default)]
    pub probe: ProbeConfig,

    /// Per-service autoscaler configuration, keyed by service name
    #[serde(default)]
    pub services: BTreeMap<String, ServiceConfig>,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_service_label() -> String {
    "app".to_string()
}

fn default_api_port() -> u16 {
    9095
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            run_id: None,
            output_dir: default_output_dir(),
            namespace: default_namespace(),
            service_label: default_service_label(),
            kubeconfig: None,
            api_port: default_api_port(),
            plan: PlanConfig::default(),
            endpoints: Vec::new(),
            load: LoadConfig::default(),
            sampler: SamplerConfig::default(),
            probe: ProbeConfig::default(),
            services: BTreeMap::new(),
        }
    }
}

/// Inputs of the burst plan generator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanConfig {
    pub count: usize,
    pub rate_floor: f64,
    pub rate_ceiling: f64,
    pub min_duration_secs: u64,
    pub max_duration_secs: u64,
    pub max_inter_burst_pause_secs: u64,
    pub spike_probability: f64,
    /// Fixed seed for reproducible plans
    pub seed: Option<u64>,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            count: 20,
            rate_floor: 10.0,
            rate_ceiling: 200.0,
            min_duration_secs: 10,
            max_duration_secs: 60,
            max_inter_burst_pause_secs: 15,
            spike_probability: 0.1,
            seed: None,
        }
    }
}

/// One target endpoint of the load
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub name: String,
    pub url: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

/// Load generator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    /// Maximum in-flight requests per endpoint generator
    pub concurrency: usize,
    pub request_timeout_secs: u64,
    /// Stop the plan when every endpoint of a burst failed every request
    pub abort_on_unreachable_burst: bool,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            concurrency: 32,
            request_timeout_secs: 10,
            abort_on_unreachable_burst: true,
        }
    }
}

impl LoadConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Telemetry sampler settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    pub interval_secs: u64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self { interval_secs: 8 }
    }
}

impl SamplerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// A (source service, target service) pair to probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbePair {
    pub source_service: String,
    pub target_service: String,
}

/// Cross-service probe settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub pairs: Vec<ProbePair>,
    /// Target service -> URL probed from inside the source pod
    pub targets: BTreeMap<String, String>,
    /// Probes per source pod and target on every tick
    pub repeat: u32,
    pub timeout_secs: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            pairs: Vec::new(),
            targets: BTreeMap::new(),
            repeat: 3,
            timeout_secs: 5,
        }
    }
}

/// Autoscaler thresholds of one service, used to flag correlation rows
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Endpoint whose latency depends on this service
    pub dependent_endpoint: Option<String>,
    pub min_replicas: Option<i32>,
    pub max_replicas: Option<i32>,
    /// Target utilization in percent
    pub target_utilization: Option<f64>,
}

impl ExperimentConfig {
    /// Endpoint name -> weight
    pub fn endpoint_weights(&self) -> BTreeMap<String, f64> {
        self.endpoints
            .iter()
            .map(|e| (e.name.clone(), e.weight))
            .collect()
    }

    /// Run id, falling back to a timestamp-derived one
    pub fn resolve_run_id(&self, now: chrono::DateTime<chrono::Utc>) -> String {
        self.run_id
            .clone()
            .unwrap_or_else(|| now.format("%Y%m%d-%H%M%S").to_string())
    }

    /// Check every section; plan parameters are checked by the plan generator
    pub fn validate(&self) -> Result<()> {
        crate::plan::validate_plan_config(&self.plan, &self.endpoint_weights())?;

        let mut names = BTreeSet::new();
        for endpoint in &self.endpoints {
            if endpoint.name.is_empty() {
                return Err(ExperimentError::invalid_config("endpoint name must not be empty"));
            }
            if !names.insert(endpoint.name.as_str()) {
                return Err(ExperimentError::invalid_config(format!(
                    "duplicate endpoint '{}'",
                    endpoint.name
                )));
            }
            validate_http_url(&endpoint.url)
                .map_err(|e| ExperimentError::invalid_config(format!("endpoint '{}': {}", endpoint.name, e)))?;
        }

        if self.load.concurrency == 0 {
            return Err(ExperimentError::invalid_config("load.concurrency must be at least 1"));
        }
        if self.load.request_timeout_secs == 0 {
            return Err(ExperimentError::invalid_config("load.request_timeout_secs must be positive"));
        }
        if self.sampler.interval_secs == 0 {
            return Err(ExperimentError::invalid_config("sampler.interval_secs must be positive"));
        }
        if self.probe.repeat == 0 {
            return Err(ExperimentError::invalid_config("probe.repeat must be at least 1"));
        }

        for pair in &self.probe.pairs {
            let url = self.probe.targets.get(&pair.target_service).ok_or_else(|| {
                ExperimentError::invalid_config(format!(
                    "probe target '{}' has no URL in probe.targets",
                    pair.target_service
                ))
            })?;
            validate_http_url(url).map_err(|e| {
                ExperimentError::invalid_config(format!("probe target '{}': {}", pair.target_service, e))
            })?;
        }

        for (service, svc) in &self.services {
            if let Some(endpoint) = &svc.dependent_endpoint {
                if !names.contains(endpoint.as_str()) {
                    return Err(ExperimentError::invalid_config(format!(
                        "service '{}' depends on unknown endpoint '{}'",
                        service, endpoint
                    )));
                }
            }
            if let (Some(min), Some(max)) = (svc.min_replicas, svc.max_replicas) {
                if min > max {
                    return Err(ExperimentError::invalid_config(format!(
                        "service '{}': min_replicas {} exceeds max_replicas {}",
                        service, min, max
                    )));
                }
            }
        }

        Ok(())
    }
}

fn validate_http_url(raw: &str) -> std::result::Result<(), String> {
    let url = Url::parse(raw).map_err(|e| format!("invalid URL '{}': {}", raw, e))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(format!("unsupported scheme '{}' in '{}'", other, raw)),
    }
}
