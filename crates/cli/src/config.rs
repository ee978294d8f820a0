//! Experiment configuration loading for offline commands

use anyhow::{Context, Result};
use experiment_lib::ExperimentConfig;
use std::path::Path;

/// Read an experiment configuration file, with the runner's `BURSTLAB_*`
/// environment overrides applied on top
pub fn load_experiment_config(path: &Path) -> Result<ExperimentConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::from(path))
        .add_source(
            config::Environment::with_prefix("BURSTLAB")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .with_context(|| format!("Failed to read {}", path.display()))?;

    settings
        .try_deserialize()
        .with_context(|| format!("Invalid experiment configuration in {}", path.display()))
}
