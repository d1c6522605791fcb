use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

use crate::{validate_catalog, ResourceCatalog};

/// Simulation environment parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvConfig {
    /// Seed for the deterministic RNG.
    pub rng_seed: u64,
    /// Simulated seconds that pass per tick.
    pub tick_seconds: f64,
    /// Per-app chance of a CPU spike on a tick.
    pub spike_probability: f64,
    /// Chance an action fails while the system is thrashing.
    pub action_failure_probability: f64,
    /// Stress factor above which actions may fail.
    pub stress_failure_threshold: f64,
    /// Extra or replacement profiles layered over the builtin catalog.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profiles: Option<ResourceCatalog>,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            rng_seed: 42,
            tick_seconds: 1.0,
            spike_probability: 0.1,
            action_failure_probability: 0.3,
            stress_failure_threshold: 1.2,
            profiles: None,
        }
    }
}

impl EnvConfig {
    /// Builtin catalog with any configured overrides applied.
    pub fn catalog(&self) -> ResourceCatalog {
        let mut catalog = ResourceCatalog::builtin();
        if let Some(extra) = &self.profiles {
            catalog.merge(extra);
        }
        catalog
    }
}

/// Decision agent thresholds, cooldowns and learning rates.
///
/// Durations are in simulated seconds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Ticks between learning cycles.
    pub learning_interval: u64,
    pub tactical_cpu_threshold: f64,
    pub reflex_mem_threshold: f64,
    /// I/O wait above which performance strategies are damped.
    pub high_io_threshold: f64,
    pub default_cooldown: f64,
    pub renice_cooldown: f64,
    pub drop_caches_cooldown: f64,
    /// How long a drop_caches failure keeps the emergency tier armed.
    pub failure_memory: f64,
    pub penalty_factor: f64,
    pub reward_factor: f64,
    pub weight_cap: f64,
    pub weight_floor: f64,
    /// Mean CPU over a window above which the window counts as poor.
    pub poor_avg_cpu: f64,
    /// Peak I/O wait over a window above which the window counts as poor.
    pub poor_max_io_wait: f64,
    /// Samples with failures tolerated before the window counts as poor.
    pub tolerated_failure_samples: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            learning_interval: 10,
            tactical_cpu_threshold: 70.0,
            reflex_mem_threshold: 90.0,
            high_io_threshold: 20.0,
            default_cooldown: 60.0,
            renice_cooldown: 120.0,
            drop_caches_cooldown: 15.0,
            failure_memory: 30.0,
            penalty_factor: 0.95,
            reward_factor: 1.05,
            weight_cap: 1.2,
            weight_floor: 0.1,
            poor_avg_cpu: 80.0,
            poor_max_io_wait: 30.0,
            tolerated_failure_samples: 1,
        }
    }
}

/// Top-level sandbox configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub env: EnvConfig,
    pub agent: AgentConfig,
}

impl SandboxConfig {
    /// Parse and validate a YAML document. Missing fields take defaults.
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let cfg: SandboxConfig =
            serde_yaml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        validate_config(&cfg)?;
        Ok(cfg)
    }

    /// Read, parse and validate a YAML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!(path = %path.display(), "loading sandbox config");
        let text = fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }
}

/// Validation errors for configuration invariants.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// Probability outside [0, 1].
    #[error("{0} must be within [0,1]")]
    InvalidProbability(&'static str),
    /// Numeric field must be finite and strictly positive.
    #[error("{0} must be finite and > 0")]
    NonPositive(&'static str),
    /// Weight floor above weight cap.
    #[error("weight floor {floor} exceeds weight cap {cap}")]
    WeightBounds { floor: f64, cap: f64 },
    /// Learning interval of zero ticks.
    #[error("learning interval must be at least one tick")]
    ZeroLearningInterval,
    /// Catalog entry with an empty app name.
    #[error("resource profile with empty app name")]
    EmptyAppName,
    /// Catalog entry with negative or non-finite costs.
    #[error("invalid resource profile for {app}/{state}")]
    InvalidProfile { app: String, state: String },
    /// Snapshot metric that is not a finite number.
    #[error("snapshot metric {0} is not finite")]
    NonFiniteMetric(&'static str),
}

/// Errors produced while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(#[from] ValidationError),
}

fn probability(value: f64, field: &'static str) -> Result<(), ValidationError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ValidationError::InvalidProbability(field));
    }
    Ok(())
}

fn positive(value: f64, field: &'static str) -> Result<(), ValidationError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ValidationError::NonPositive(field));
    }
    Ok(())
}

/// Validate environment parameters, including catalog overrides.
pub fn validate_env_config(c: &EnvConfig) -> Result<(), ValidationError> {
    positive(c.tick_seconds, "tick_seconds")?;
    probability(c.spike_probability, "spike_probability")?;
    probability(c.action_failure_probability, "action_failure_probability")?;
    positive(c.stress_failure_threshold, "stress_failure_threshold")?;
    if let Some(profiles) = &c.profiles {
        validate_catalog(profiles)?;
    }
    Ok(())
}

/// Validate agent thresholds and learning parameters.
pub fn validate_agent_config(c: &AgentConfig) -> Result<(), ValidationError> {
    if c.learning_interval == 0 {
        return Err(ValidationError::ZeroLearningInterval);
    }
    positive(c.tactical_cpu_threshold, "tactical_cpu_threshold")?;
    positive(c.reflex_mem_threshold, "reflex_mem_threshold")?;
    positive(c.high_io_threshold, "high_io_threshold")?;
    positive(c.default_cooldown, "default_cooldown")?;
    positive(c.renice_cooldown, "renice_cooldown")?;
    positive(c.drop_caches_cooldown, "drop_caches_cooldown")?;
    positive(c.failure_memory, "failure_memory")?;
    positive(c.penalty_factor, "penalty_factor")?;
    positive(c.reward_factor, "reward_factor")?;
    positive(c.weight_cap, "weight_cap")?;
    positive(c.weight_floor, "weight_floor")?;
    if c.weight_floor > c.weight_cap {
        return Err(ValidationError::WeightBounds {
            floor: c.weight_floor,
            cap: c.weight_cap,
        });
    }
    positive(c.poor_avg_cpu, "poor_avg_cpu")?;
    positive(c.poor_max_io_wait, "poor_max_io_wait")?;
    Ok(())
}

/// Validate the whole sandbox configuration.
pub fn validate_config(c: &SandboxConfig) -> Result<(), ValidationError> {
    validate_env_config(&c.env)?;
    validate_agent_config(&c.agent)
}
