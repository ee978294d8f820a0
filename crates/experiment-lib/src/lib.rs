//! Burst-load experiment library
//!
//! This crate provides the core functionality for:
//! - Seeded burst plan generation
//! - Concurrent load execution against weighted endpoints
//! - Background cluster snapshots and cross-service probes
//! - Run manifests and on-disk artifacts
//! - Offline correlation of latency with placement and autoscaling
//! - Health checks and observability

pub mod clock;
pub mod cluster;
pub mod collector;
pub mod config;
pub mod correlate;
pub mod driver;
pub mod error;
pub mod health;
pub mod load;
pub mod manifest;
pub mod models;
pub mod observability;
pub mod plan;
pub mod stats;

#[cfg(test)]
pub(crate) mod testing;

pub use config::ExperimentConfig;
pub use correlate::{Analysis, Correlator};
pub use driver::{DriverState, ExperimentDriver, RunSummary};
pub use error::{ExperimentError, Result};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{ExperimentMetrics, StructuredLogger};
pub use plan::BurstPlanGenerator;
