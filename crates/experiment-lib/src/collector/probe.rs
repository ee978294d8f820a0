//! Cross-service latency probes
//!
//! Probes run `curl` inside a live pod of the source service, so the measured
//! latency covers the real pod-to-pod network path rather than the driver's.

use crate::cluster::PodExec;
use crate::config::{ProbeConfig, ProbePair};
use crate::models::{ProbeResult, Snapshot};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// curl write-out format; every value is in seconds except `code`
const WRITE_OUT: &str = "dns=%{time_namelookup} connect=%{time_connect} ttfb=%{time_starttransfer} total=%{time_total} code=%{http_code}";

/// Grace period on top of curl's own `--max-time` for the exec round trip
const EXEC_GRACE: Duration = Duration::from_secs(5);

/// Command executed inside the source pod
pub fn probe_command(url: &str, timeout_secs: u64) -> Vec<String> {
    vec![
        "curl".to_string(),
        "-s".to_string(),
        "-o".to_string(),
        "/dev/null".to_string(),
        "--max-time".to_string(),
        timeout_secs.to_string(),
        "-w".to_string(),
        WRITE_OUT.to_string(),
        url.to_string(),
    ]
}

/// Timings parsed from one probe's output
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeTimings {
    pub dns: Option<f64>,
    pub connect: Option<f64>,
    pub ttfb: Option<f64>,
    pub total: Option<f64>,
    pub code: Option<u16>,
}

/// Parse whitespace separated `key=value` pairs; unknown or malformed pairs are ignored
pub fn parse_probe_output(raw: &str) -> ProbeTimings {
    let mut timings = ProbeTimings::default();
    for token in raw.split_whitespace() {
        let Some((key, value)) = token.split_once('=') else {
            continue;
        };
        match key {
            "code" => timings.code = value.parse().ok(),
            "dns" => timings.dns = value.parse().ok(),
            "connect" => timings.connect = value.parse().ok(),
            "ttfb" => timings.ttfb = value.parse().ok(),
            "total" => timings.total = value.parse().ok(),
            _ => {}
        }
    }
    timings
}

/// Runs the configured probe pairs from live pods
#[derive(Clone)]
pub struct CrossServiceProbe {
    exec: Arc<dyn PodExec>,
    config: ProbeConfig,
}

impl CrossServiceProbe {
    pub fn new(exec: Arc<dyn PodExec>, config: ProbeConfig) -> Self {
        Self { exec, config }
    }

    /// Probe every pair `repeat` times from one live source pod per node.
    ///
    /// Every attempt yields exactly one record; failures are error entries.
    pub async fn run(&self, timestamp: DateTime<Utc>, snapshot: Option<&Snapshot>) -> Vec<ProbeResult> {
        let mut results = Vec::new();

        for pair in &self.config.pairs {
            let Some(snapshot) = snapshot else {
                results.push(ProbeResult::failed(
                    timestamp,
                    "",
                    "",
                    &pair.target_service,
                    "no placement snapshot available",
                ));
                continue;
            };

            let Some(url) = self.config.targets.get(&pair.target_service) else {
                results.push(ProbeResult::failed(
                    timestamp,
                    "",
                    "",
                    &pair.target_service,
                    format!("no URL configured for target '{}'", pair.target_service),
                ));
                continue;
            };

            let sources = source_pods(snapshot, pair);
            if sources.is_empty() {
                results.push(ProbeResult::failed(
                    timestamp,
                    "",
                    "",
                    &pair.target_service,
                    format!("no running pod for source service '{}'", pair.source_service),
                ));
                continue;
            }

            for (node, pod) in sources {
                for _ in 0..self.config.repeat {
                    results.push(self.probe_once(timestamp, &pod, &node, &pair.target_service, url).await);
                }
            }
        }

        results
    }

    async fn probe_once(
        &self,
        timestamp: DateTime<Utc>,
        pod: &str,
        node: &str,
        target_service: &str,
        url: &str,
    ) -> ProbeResult {
        let command = probe_command(url, self.config.timeout_secs);
        let deadline = Duration::from_secs(self.config.timeout_secs) + EXEC_GRACE;

        let output = match tokio::time::timeout(deadline, self.exec.exec(pod, &command)).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!(pod = %pod, target = %target_service, error = %e, "Probe exec failed");
                return ProbeResult::failed(timestamp, pod, node, target_service, format!("{:#}", e));
            }
            Err(_) => {
                warn!(pod = %pod, target = %target_service, "Probe exec timed out");
                return ProbeResult::failed(
                    timestamp,
                    pod,
                    node,
                    target_service,
                    format!("probe timed out after {}s", deadline.as_secs()),
                );
            }
        };

        let timings = parse_probe_output(&output);
        let error = match (timings.total, timings.code) {
            (None, _) => Some(format!("unparseable probe output: {}", output.trim())),
            (_, Some(0)) | (_, None) => Some("no HTTP response".to_string()),
            _ => None,
        };

        debug!(pod = %pod, target = %target_service, total = ?timings.total, code = ?timings.code, "Probe complete");

        ProbeResult {
            timestamp,
            source_pod: pod.to_string(),
            source_node: node.to_string(),
            target_service: target_service.to_string(),
            dns_seconds: timings.dns,
            connect_seconds: timings.connect,
            ttfb_seconds: timings.ttfb,
            total_seconds: timings.total,
            status_code: timings.code.filter(|c| *c != 0),
            error,
        }
    }
}

/// First live pod (by name) of the source service on each node
fn source_pods(snapshot: &Snapshot, pair: &ProbePair) -> Vec<(String, String)> {
    let mut per_node: BTreeMap<String, String> = BTreeMap::new();
    for pod in snapshot.live_pods(&pair.source_service) {
        per_node
            .entry(pod.node_id.clone())
            .and_modify(|current| {
                if pod.pod_id < *current {
                    *current = pod.pod_id.clone();
                }
            })
            .or_insert_with(|| pod.pod_id.clone());
    }
    per_node.into_iter().collect()
}
