//! Error taxonomy for experiment runs
//!
//! Only configuration errors and an unreachable cluster abort a run.
//! Everything else is recorded as data in the manifest.

use thiserror::Error;

/// Errors raised by experiment components
#[derive(Debug, Error)]
pub enum ExperimentError {
    /// Bad plan or experiment parameters; fix before running
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// One endpoint's generator failed for one burst
    #[error("load generation failed for endpoint '{endpoint}' in burst {burst_index}: {message}")]
    LoadGeneration {
        burst_index: usize,
        endpoint: String,
        message: String,
    },

    /// A snapshot or probe read failed
    #[error("telemetry unavailable: {0}")]
    TelemetryUnavailable(String),

    /// The driver could not complete the full plan
    #[error("incomplete experiment: {completed_bursts} of {planned_bursts} bursts completed ({reason})")]
    IncompleteExperiment {
        completed_bursts: usize,
        planned_bursts: usize,
        reason: String,
    },

    /// The cluster could not be reached at all
    #[error("cluster unreachable: {0}")]
    ClusterUnreachable(String),

    /// A manifest failed validation before correlation
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("invalid driver transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl ExperimentError {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        ExperimentError::InvalidConfiguration(message.into())
    }

    pub fn invalid_manifest(message: impl Into<String>) -> Self {
        ExperimentError::InvalidManifest(message.into())
    }

    /// Whether this error must abort the run
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ExperimentError::InvalidConfiguration(_)
                | ExperimentError::ClusterUnreachable(_)
                | ExperimentError::InvalidTransition { .. }
                | ExperimentError::Io(_)
                | ExperimentError::Json(_)
        )
    }
}

pub type Result<T, E = ExperimentError> = std::result::Result<T, E>;
