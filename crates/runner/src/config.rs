//! Runner arguments and configuration loading

use anyhow::{Context, Result};
use clap::Parser;
use experiment_lib::ExperimentConfig;
use std::path::{Path, PathBuf};

/// Prefix of environment overrides, e.g. `BURSTLAB_PLAN__COUNT=20`
pub const ENV_PREFIX: &str = "BURSTLAB";

#[derive(Debug, Parser)]
#[command(name = "burst-runner")]
#[command(about = "Run one burst-load experiment and record its artifacts", long_about = None)]
#[command(version)]
pub struct RunnerArgs {
    /// Experiment configuration file (toml, yaml or json)
    #[arg(short, long, env = "BURSTLAB_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the run identifier
    #[arg(long)]
    pub run_id: Option<String>,

    /// Override the plan seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Correlate the run as soon as it is finalized
    #[arg(long)]
    pub analyze: bool,
}

/// Load the experiment configuration from an optional file, then environment overrides
pub fn load_config(path: Option<&Path>) -> Result<ExperimentConfig> {
    let mut builder = config::Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(config::File::from(path));
    }

    let settings = builder
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("Failed to load experiment configuration")?;

    settings
        .try_deserialize()
        .context("Invalid experiment configuration")
}

impl RunnerArgs {
    /// Load configuration and apply command-line overrides
    pub fn resolve(&self) -> Result<ExperimentConfig> {
        let mut config = load_config(self.config.as_deref())?;
        if let Some(run_id) = &self.run_id {
            config.run_id = Some(run_id.clone());
        }
        if let Some(seed) = self.seed {
            config.plan.seed = Some(seed);
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const EXPERIMENT_TOML: &str = r#"
output_dir = "/tmp/burstlab"
namespace = "shop"

[plan]
count = 4
rate_floor = 20.0
rate_ceiling = 200.0
seed = 99

[[endpoints]]
name = "home"
url = "http://frontend.shop.svc/"
weight = 0.7

[[endpoints]]
name = "cart"
url = "http://frontend.shop.svc/cart"
weight = 0.3

[sampler]
interval_secs = 8

[services.cartservice]
dependent_endpoint = "cart"
max_replicas = 5
target_utilization = 70.0
"#;

    fn toml_file(content: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_config_from_file() {
        let file = toml_file(EXPERIMENT_TOML);
        let config = load_config(Some(file.path())).unwrap();

        assert_eq!(config.namespace, "shop");
        assert_eq!(config.plan.count, 4);
        assert_eq!(config.plan.seed, Some(99));
        assert_eq!(config.endpoints.len(), 2);
        assert_eq!(config.endpoints[1].name, "cart");
        assert_eq!(config.sampler.interval_secs, 8);
        assert_eq!(config.services["cartservice"].max_replicas, Some(5));
        // untouched sections keep their defaults
        assert_eq!(config.service_label, "app");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cli_overrides() {
        let file = toml_file(EXPERIMENT_TOML);
        let args = RunnerArgs::parse_from([
            "burst-runner",
            "--config",
            file.path().to_str().unwrap(),
            "--run-id",
            "nightly",
            "--seed",
            "5",
            "--analyze",
        ]);

        let config = args.resolve().unwrap();
        assert_eq!(config.run_id.as_deref(), Some("nightly"));
        assert_eq!(config.plan.seed, Some(5));
        assert!(args.analyze);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(load_config(Some(Path::new("/nonexistent/burstlab.toml"))).is_err());
    }
}
