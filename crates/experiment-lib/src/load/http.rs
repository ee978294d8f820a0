//! Open-loop HTTP GET load generator

use super::{LoadGenerator, LoadOutcome, LoadRequest};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::debug;
use url::Url;

/// Issues one GET every `1 / rate` seconds, skipping a tick when
/// `concurrency` requests are already in flight
#[derive(Clone)]
pub struct HttpLoadGenerator {
    client: Client,
}

impl HttpLoadGenerator {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(64)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client })
    }
}

/// How one request ended
enum RequestOutcome {
    /// Got a response; `ok` is false for non-2xx
    Response { ok: bool, latency: f64 },
    Failed,
}

#[async_trait]
impl LoadGenerator for HttpLoadGenerator {
    async fn run(&self, request: LoadRequest) -> Result<LoadOutcome> {
        let url = Url::parse(&request.url).with_context(|| format!("Invalid URL {}", request.url))?;
        if !(request.rate.is_finite() && request.rate > 0.0) {
            anyhow::bail!("rate must be positive, got {}", request.rate);
        }

        let planned = (request.rate * request.duration.as_secs_f64()).round() as u64;
        let semaphore = Arc::new(Semaphore::new(request.concurrency.max(1)));
        let mut in_flight = JoinSet::new();
        let mut skipped = 0u64;

        let start = Instant::now();
        // Rates past 1e9/s round the period to zero, which `interval` rejects
        let period = Duration::from_secs_f64(1.0 / request.rate).max(Duration::from_nanos(1));
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);

        for _ in 0..planned {
            ticker.tick().await;

            let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                skipped += 1;
                continue;
            };

            let client = self.client.clone();
            let url = url.clone();
            let timeout = request.request_timeout;
            in_flight.spawn(async move {
                let sent = Instant::now();
                let outcome = match client.get(url).timeout(timeout).send().await {
                    Ok(response) => {
                        let ok = response.status().is_success();
                        // Latency covers the full body; a body cut short is a failed request
                        match response.bytes().await {
                            Ok(_) => RequestOutcome::Response {
                                ok,
                                latency: sent.elapsed().as_secs_f64(),
                            },
                            Err(_) => RequestOutcome::Failed,
                        }
                    }
                    Err(_) => RequestOutcome::Failed,
                };
                drop(permit);
                outcome
            });
        }

        // Hold the burst open for its full duration even if the schedule ended early
        tokio::time::sleep_until(start + request.duration).await;
        // Achieved rate is measured over the issue window, not the drain of slow responses
        let issue_window = start.elapsed();

        let mut outcome = LoadOutcome::default();
        while let Some(joined) = in_flight.join_next().await {
            outcome.request_count += 1;
            match joined {
                Ok(RequestOutcome::Response { ok, latency }) => {
                    outcome.latencies.push(latency);
                    if !ok {
                        outcome.error_count += 1;
                    }
                }
                Ok(RequestOutcome::Failed) | Err(_) => outcome.error_count += 1,
            }
        }
        outcome.elapsed = issue_window;

        debug!(
            endpoint = %request.endpoint,
            burst_index = request.burst_index,
            planned,
            drain_ms = (start.elapsed() - issue_window).as_millis() as u64,
            issued = outcome.request_count,
            skipped,
            errors = outcome.error_count,
            "Load generator finished"
        );

        Ok(outcome)
    }
}
