//! Burst plan generation
//!
//! Synthesizes a bursty traffic plan: most bursts are drawn from a Pareto
//! distribution (modest rates with a long right tail), and with a fixed
//! probability a burst is a spike close to the rate ceiling. The plan is fully
//! determined by its configuration and seed.

use crate::config::PlanConfig;
use crate::error::{ExperimentError, Result};
use crate::models::{BurstDescriptor, BurstKind, BurstPlan};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use tracing::debug;

/// Shape parameter of the heavy-tail rate distribution
pub const PARETO_SHAPE: f64 = 1.25;

/// Spikes are drawn from `[SPIKE_FLOOR_FRACTION * ceiling, ceiling]`
pub const SPIKE_FLOOR_FRACTION: f64 = 0.8;

/// Lower bound of the inter-burst pause draw
pub const MIN_PAUSE_SECS: u64 = 2;

/// Check generator inputs
pub fn validate_plan_config(config: &PlanConfig, weights: &BTreeMap<String, f64>) -> Result<()> {
    if config.count == 0 {
        return Err(ExperimentError::invalid_config("plan.count must be positive"));
    }
    if !(config.rate_floor.is_finite() && config.rate_floor > 0.0) {
        return Err(ExperimentError::invalid_config("plan.rate_floor must be a positive number"));
    }
    if !config.rate_ceiling.is_finite() || config.rate_floor > config.rate_ceiling {
        return Err(ExperimentError::invalid_config(format!(
            "plan.rate_floor {} exceeds plan.rate_ceiling {}",
            config.rate_floor, config.rate_ceiling
        )));
    }
    if config.min_duration_secs == 0 {
        return Err(ExperimentError::invalid_config("plan.min_duration_secs must be positive"));
    }
    if config.min_duration_secs > config.max_duration_secs {
        return Err(ExperimentError::invalid_config(format!(
            "plan.min_duration_secs {} exceeds plan.max_duration_secs {}",
            config.min_duration_secs, config.max_duration_secs
        )));
    }
    if !(0.0..=1.0).contains(&config.spike_probability) {
        return Err(ExperimentError::invalid_config(
            "plan.spike_probability must be within [0, 1]",
        ));
    }
    if weights.is_empty() {
        return Err(ExperimentError::invalid_config("at least one endpoint is required"));
    }
    for (name, weight) in weights {
        if !(weight.is_finite() && *weight > 0.0) {
            return Err(ExperimentError::invalid_config(format!(
                "endpoint '{}' has non-positive weight {}",
                name, weight
            )));
        }
    }
    Ok(())
}

/// Split `total_rate` across endpoints in proportion to their weights.
///
/// Endpoints are taken in name order. All but the last receive whole-number
/// rates; the last absorbs the rounding remainder so the split sums to
/// `total_rate` exactly.
pub fn split_rate(total_rate: f64, weights: &BTreeMap<String, f64>) -> BTreeMap<String, f64> {
    let weight_sum: f64 = weights.values().sum();
    let ceiling = total_rate.floor();
    let last = weights.len().saturating_sub(1);

    let mut split = BTreeMap::new();
    let mut cumulative_weight = 0.0;
    let mut assigned = 0.0;

    for (i, (name, weight)) in weights.iter().enumerate() {
        if i == last {
            split.insert(name.clone(), total_rate - assigned);
            break;
        }
        cumulative_weight += weight;
        // Round the running total rather than each share so errors never accumulate
        let target = (total_rate * cumulative_weight / weight_sum)
            .round()
            .min(ceiling)
            .max(assigned);
        split.insert(name.clone(), target - assigned);
        assigned = target;
    }

    split
}

/// Seeded burst plan generator
#[derive(Debug, Clone)]
pub struct BurstPlanGenerator {
    config: PlanConfig,
    weights: BTreeMap<String, f64>,
    seed: u64,
}

impl BurstPlanGenerator {
    /// Validate inputs and fix the seed (drawn from the OS RNG when unset)
    pub fn new(config: PlanConfig, weights: BTreeMap<String, f64>) -> Result<Self> {
        validate_plan_config(&config, &weights)?;
        let seed = config.seed.unwrap_or_else(rand::random);
        Ok(Self {
            config,
            weights,
            seed,
        })
    }

    /// Seed the plan is generated from
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Produce exactly `count` descriptors
    pub fn generate(&self) -> BurstPlan {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let plan: BurstPlan = (0..self.config.count)
            .map(|index| self.next_burst(index, &mut rng))
            .collect();

        debug!(
            seed = self.seed,
            bursts = plan.len(),
            spikes = plan.iter().filter(|b| b.kind == BurstKind::Spike).count(),
            "Generated burst plan"
        );
        plan
    }

    fn next_burst(&self, index: usize, rng: &mut ChaCha8Rng) -> BurstDescriptor {
        let cfg = &self.config;

        let (kind, total_rate) = if rng.gen_bool(cfg.spike_probability) {
            let low = (SPIKE_FLOOR_FRACTION * cfg.rate_ceiling).max(cfg.rate_floor);
            (BurstKind::Spike, rng.gen_range(low..=cfg.rate_ceiling))
        } else {
            // Inverse CDF of Pareto(scale = rate_floor, shape); u is in (0, 1]
            let u = 1.0 - rng.gen::<f64>();
            let rate = cfg.rate_floor / u.powf(1.0 / PARETO_SHAPE);
            (BurstKind::HeavyTail, rate.clamp(cfg.rate_floor, cfg.rate_ceiling))
        };

        let duration_seconds = rng.gen_range(cfg.min_duration_secs..=cfg.max_duration_secs);
        let inter_burst_pause_seconds = if cfg.max_inter_burst_pause_secs < MIN_PAUSE_SECS {
            cfg.max_inter_burst_pause_secs
        } else {
            rng.gen_range(MIN_PAUSE_SECS..=cfg.max_inter_burst_pause_secs)
        };

        BurstDescriptor {
            index,
            kind,
            total_rate,
            duration_seconds,
            inter_burst_pause_seconds,
            per_endpoint_rate: split_rate(total_rate, &self.weights),
        }
    }
}
