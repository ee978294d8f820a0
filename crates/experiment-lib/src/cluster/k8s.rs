//! Kubernetes backend for the cluster-state interface

use super::{ClusterState, PodExec};
use crate::models::{AutoscalerStatus, PodPhase, PodPlacement, ResourceUsage, UsageReport};
use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::{Endpoints, Pod};
use kube::api::{Api, ApiResource, AttachParams, DynamicObject, GroupVersionKind, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

/// Cluster access through the Kubernetes API server
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    namespace: String,
    service_label: String,
}

impl KubeCluster {
    pub fn new(client: Client, namespace: impl Into<String>, service_label: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            service_label: service_label.into(),
        }
    }

    /// Connect with an explicit kubeconfig, or the in-cluster/default config
    pub async fn connect(
        namespace: &str,
        service_label: &str,
        kubeconfig: Option<&Path>,
    ) -> Result<Self> {
        let client = match kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path)
                    .with_context(|| format!("Failed to read kubeconfig {}", path.display()))?;
                let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .context("Failed to load kubeconfig")?;
                Client::try_from(config).context("Failed to create Kubernetes client")?
            }
            None => Client::try_default()
                .await
                .context("Failed to create Kubernetes client from default config")?,
        };

        info!(namespace = %namespace, "Connected to Kubernetes API");
        Ok(Self::new(client, namespace, service_label))
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

fn metrics_resource(kind: &str, plural: &str) -> ApiResource {
    ApiResource::from_gvk_with_plural(&GroupVersionKind::gvk("metrics.k8s.io", "v1beta1", kind), plural)
}

#[async_trait]
impl ClusterState for KubeCluster {
    async fn pod_placement(&self) -> Result<Vec<PodPlacement>> {
        let pods = self
            .pods()
            .list(&ListParams::default())
            .await
            .context("Failed to list pods")?;

        Ok(pods
            .items
            .iter()
            .filter_map(|pod| pod_to_placement(pod, &self.service_label))
            .collect())
    }

    async fn service_endpoints(&self) -> Result<BTreeMap<String, Vec<String>>> {
        let api: Api<Endpoints> = Api::namespaced(self.client.clone(), &self.namespace);
        let endpoints = api
            .list(&ListParams::default())
            .await
            .context("Failed to list endpoints")?;

        Ok(endpoints.items.iter().filter_map(endpoint_members).collect())
    }

    async fn autoscaler_state(&self) -> Result<BTreeMap<String, AutoscalerStatus>> {
        let api: Api<HorizontalPodAutoscaler> = Api::namespaced(self.client.clone(), &self.namespace);
        let hpas = api
            .list(&ListParams::default())
            .await
            .context("Failed to list horizontal pod autoscalers")?;

        Ok(hpas.items.iter().filter_map(autoscaler_status).collect())
    }

    async fn resource_usage(&self) -> Result<UsageReport> {
        let pod_api: Api<DynamicObject> = Api::namespaced_with(
            self.client.clone(),
            &self.namespace,
            &metrics_resource("PodMetrics", "pods"),
        );
        let node_api: Api<DynamicObject> =
            Api::all_with(self.client.clone(), &metrics_resource("NodeMetrics", "nodes"));

        let pods = pod_api
            .list(&ListParams::default())
            .await
            .context("Failed to list pod metrics")?;
        let nodes = node_api
            .list(&ListParams::default())
            .await
            .context("Failed to list node metrics")?;

        Ok(UsageReport {
            pods: pods.items.iter().filter_map(pod_usage).collect(),
            nodes: nodes.items.iter().filter_map(node_usage).collect(),
        })
    }
}

#[async_trait]
impl PodExec for KubeCluster {
    async fn exec(&self, pod_id: &str, command: &[String]) -> Result<String> {
        debug!(pod = %pod_id, command = ?command, "Executing in pod");

        let params = AttachParams::default().stdout(true).stderr(false);
        let mut attached = self
            .pods()
            .exec(pod_id, command.to_vec(), &params)
            .await
            .with_context(|| format!("Failed to exec in pod {}", pod_id))?;

        let mut output = String::new();
        if let Some(mut stdout) = attached.stdout() {
            stdout
                .read_to_string(&mut output)
                .await
                .with_context(|| format!("Failed to read output from pod {}", pod_id))?;
        }
        attached
            .join()
            .await
            .with_context(|| format!("Exec session in pod {} did not complete", pod_id))?;

        Ok(output)
    }
}

/// Decode a pod; pods without a name are skipped
fn pod_to_placement(pod: &Pod, service_label: &str) -> Option<PodPlacement> {
    let pod_id = pod.metadata.name.clone()?;
    let service_name = pod
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(service_label))
        .cloned()
        .unwrap_or_else(|| "unknown".to_string());
    let node_id = pod
        .spec
        .as_ref()
        .and_then(|spec| spec.node_name.clone())
        .unwrap_or_default();
    let phase = pod
        .status
        .as_ref()
        .and_then(|status| status.phase.as_deref())
        .map(PodPhase::parse)
        .unwrap_or(PodPhase::Unknown);

    Some(PodPlacement {
        pod_id,
        node_id,
        service_name,
        phase,
    })
}

/// Service name and ready pod ids of an Endpoints object
fn endpoint_members(endpoints: &Endpoints) -> Option<(String, Vec<String>)> {
    let service = endpoints.metadata.name.clone()?;
    let mut pods: Vec<String> = endpoints
        .subsets
        .iter()
        .flatten()
        .flat_map(|subset| subset.addresses.iter().flatten())
        .filter_map(|addr| addr.target_ref.as_ref().and_then(|r| r.name.clone()))
        .collect();
    pods.sort();
    pods.dedup();
    Some((service, pods))
}

/// Service name and status of an autoscaler
fn autoscaler_status(hpa: &HorizontalPodAutoscaler) -> Option<(String, AutoscalerStatus)> {
    let service = hpa
        .spec
        .as_ref()
        .map(|spec| spec.scale_target_ref.name.clone())
        .or_else(|| hpa.metadata.name.clone())?;
    let status = hpa.status.as_ref()?;

    let observed_metric_value = status.current_metrics.as_ref().and_then(|metrics| {
        let utilization = metrics.iter().find_map(|m| {
            m.resource
                .as_ref()
                .and_then(|r| r.current.average_utilization)
                .map(f64::from)
        });
        utilization.or_else(|| {
            metrics.iter().find_map(|m| {
                let current = m
                    .resource
                    .as_ref()
                    .map(|r| &r.current)
                    .or_else(|| m.pods.as_ref().map(|p| &p.current))
                    .or_else(|| m.object.as_ref().map(|o| &o.current))
                    .or_else(|| m.external.as_ref().map(|e| &e.current))?;
                current
                    .average_value
                    .as_ref()
                    .or(current.value.as_ref())
                    .and_then(|q| parse_quantity(&q.0))
            })
        })
    });

    Some((
        service,
        AutoscalerStatus {
            desired_replicas: status.desired_replicas,
            current_replicas: status.current_replicas.unwrap_or(0),
            observed_metric_value,
        },
    ))
}

/// Usage map (`{"cpu": "250m", "memory": "64Mi"}`) of a metrics object
fn usage_of(value: &serde_json::Value) -> ResourceUsage {
    let quantity = |key: &str| {
        value
            .get(key)
            .and_then(|q| q.as_str())
            .and_then(parse_quantity)
            .unwrap_or(0.0)
    };
    ResourceUsage {
        cpu_cores: quantity("cpu"),
        memory_bytes: quantity("memory"),
    }
}

/// Pod name and summed container usage of a PodMetrics object
fn pod_usage(metrics: &DynamicObject) -> Option<(String, ResourceUsage)> {
    let pod_id = metrics.metadata.name.clone()?;
    let total = metrics
        .data
        .get("containers")
        .and_then(|c| c.as_array())
        .into_iter()
        .flatten()
        .filter_map(|container| container.get("usage"))
        .map(usage_of)
        .fold(ResourceUsage::default(), |acc, u| ResourceUsage {
            cpu_cores: acc.cpu_cores + u.cpu_cores,
            memory_bytes: acc.memory_bytes + u.memory_bytes,
        });
    Some((pod_id, total))
}

/// Node name and usage of a NodeMetrics object
fn node_usage(metrics: &DynamicObject) -> Option<(String, ResourceUsage)> {
    let node_id = metrics.metadata.name.clone()?;
    let usage = metrics.data.get("usage")?;
    Some((node_id, usage_of(usage)))
}

/// Parse a Kubernetes quantity ("250m", "1.5", "128Mi") into a plain number
pub fn parse_quantity(raw: &str) -> Option<f64> {
    const SUFFIXES: &[(&str, f64)] = &[
        ("Ki", 1024.0),
        ("Mi", 1024.0 * 1024.0),
        ("Gi", 1024.0 * 1024.0 * 1024.0),
        ("Ti", 1024.0 * 1024.0 * 1024.0 * 1024.0),
        ("Pi", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
        ("Ei", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
        ("n", 1e-9),
        ("u", 1e-6),
        ("m", 1e-3),
        ("k", 1e3),
        ("M", 1e6),
        ("G", 1e9),
        ("T", 1e12),
        ("P", 1e15),
        ("E", 1e18),
    ];

    let raw = raw.trim();
    for (suffix, factor) in SUFFIXES {
        if let Some(number) = raw.strip_suffix(suffix) {
            return number.parse::<f64>().ok().map(|n| n * factor);
        }
    }
    raw.parse::<f64>().ok()
}
