//! Load generation
//!
//! A [`LoadGenerator`] drives one endpoint at a fixed rate for a fixed
//! duration and reports raw counts and latencies. The [`LoadExecutor`] walks
//! the burst plan and runs one generator per endpoint per burst.

mod executor;
mod http;

pub use executor::{ExecutionOutcome, LoadExecutor};
pub use http::HttpLoadGenerator;

use crate::models::{percentile_key, LoadResult, PercentileMap, REPORTED_PERCENTILES};
use crate::stats;
use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

/// One endpoint's share of one burst
#[derive(Debug, Clone, PartialEq)]
pub struct LoadRequest {
    pub burst_index: usize,
    pub endpoint: String,
    pub url: String,
    /// Target requests per second
    pub rate: f64,
    pub duration: Duration,
    /// Maximum requests in flight
    pub concurrency: usize,
    pub request_timeout: Duration,
}

/// Raw measurements of one generator run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadOutcome {
    /// Requests issued
    pub request_count: u64,
    /// Transport failures, truncated bodies and non-2xx responses
    pub error_count: u64,
    /// Issue window: from the first tick to the end of the burst, excluding the drain
    pub elapsed: Duration,
    /// Latency of every request that got a response, in seconds
    pub latencies: Vec<f64>,
}

impl LoadOutcome {
    /// Requests issued per second over the issue window
    pub fn achieved_rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.request_count as f64 / secs
        } else {
            0.0
        }
    }

    /// Reported percentiles; empty when nothing got a response
    pub fn percentiles(&self) -> PercentileMap {
        let mut sorted = self.latencies.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));
        REPORTED_PERCENTILES
            .iter()
            .filter_map(|q| stats::percentile(&sorted, *q).map(|v| (percentile_key(*q), v)))
            .collect()
    }

    pub fn into_result(self, request: &LoadRequest) -> LoadResult {
        LoadResult {
            burst_index: request.burst_index,
            endpoint_name: request.endpoint.clone(),
            requested_rate: request.rate,
            achieved_rate: self.achieved_rate(),
            duration_ns: self.elapsed.as_nanos() as u64,
            latency_percentiles: self.percentiles(),
            request_count: self.request_count,
            error_count: self.error_count,
        }
    }
}

/// Issues load against one endpoint
#[async_trait]
pub trait LoadGenerator: Send + Sync {
    /// Run at `request.rate` for `request.duration`.
    ///
    /// Failed requests are counted in the outcome; `Err` means the generator
    /// itself could not run.
    async fn run(&self, request: LoadRequest) -> Result<LoadOutcome>;
}
