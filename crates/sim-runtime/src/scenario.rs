//! Scripted user and fault activity, scheduled by tick.

use serde::{Deserialize, Serialize};
use sim_core::IDLE;
use std::fmt;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

const TOUR: &str = include_str!("../../../assets/scenarios/tour.yaml");
const WORKSTATION: &str = include_str!("../../../assets/scenarios/workstation.yaml");
const THRASHING: &str = include_str!("../../../assets/scenarios/thrashing.yaml");
const STRESS: &str = include_str!("../../../assets/scenarios/stress.yaml");

/// Names accepted by [`Scenario::builtin`].
pub const BUILTIN_SCENARIOS: [&str; 4] = ["tour", "workstation", "thrashing", "stress"];

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("unknown scenario `{0}`")]
    Unknown(String),
    #[error("step {index}: {reason}")]
    InvalidStep { index: usize, reason: String },
}

fn default_state() -> String {
    IDLE.to_string()
}

/// One mutation of the simulated machine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScenarioOp {
    Launch {
        app: String,
        #[serde(default = "default_state")]
        state: String,
    },
    Close {
        app: String,
    },
    SetState {
        app: String,
        state: String,
    },
    /// Every user app in the catalog.
    LaunchAll {
        #[serde(default = "default_state")]
        state: String,
    },
    CloseAll,
    MemoryStress {
        level: f64,
    },
    IoStress {
        level: f64,
    },
    /// Narration only; the machine is untouched.
    Note {
        message: String,
    },
}

impl fmt::Display for ScenarioOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScenarioOp::Launch { app, state } => write!(f, "launch {app} ({state})"),
            ScenarioOp::Close { app } => write!(f, "close {app}"),
            ScenarioOp::SetState { app, state } => write!(f, "{app} -> {state}"),
            ScenarioOp::LaunchAll { state } => write!(f, "launch all user apps ({state})"),
            ScenarioOp::CloseAll => f.write_str("close all user apps"),
            ScenarioOp::MemoryStress { level } => write!(f, "memory pressure {level:.0}%"),
            ScenarioOp::IoStress { level } => write!(f, "i/o saturation {level:.0}%"),
            ScenarioOp::Note { message } => f.write_str(message),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScenarioStep {
    /// Ticks after scheduling at which the step fires.
    pub at_tick: u64,
    pub op: ScenarioOp,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub steps: Vec<ScenarioStep>,
}

impl Scenario {
    pub fn from_yaml_str(text: &str) -> Result<Self, ScenarioError> {
        let scenario: Scenario = serde_yaml::from_str(text)?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn builtin(name: &str) -> Result<Self, ScenarioError> {
        let text = match name {
            "tour" => TOUR,
            "workstation" => WORKSTATION,
            "thrashing" => THRASHING,
            "stress" => STRESS,
            other => return Err(ScenarioError::Unknown(other.to_string())),
        };
        Self::from_yaml_str(text)
    }

    /// Resolve a built-in name first, then fall back to a YAML file path.
    pub fn load(name_or_path: &str) -> Result<Self, ScenarioError> {
        if BUILTIN_SCENARIOS.contains(&name_or_path) {
            return Self::builtin(name_or_path);
        }
        let path = Path::new(name_or_path);
        if !path.exists() {
            return Err(ScenarioError::Unknown(name_or_path.to_string()));
        }
        debug!(path = %path.display(), "loading scenario file");
        Self::from_yaml_str(&fs::read_to_string(path)?)
    }

    /// Tick of the last step, or zero for an empty script.
    pub fn duration(&self) -> u64 {
        self.steps.iter().map(|s| s.at_tick).max().unwrap_or(0)
    }

    pub fn validate(&self) -> Result<(), ScenarioError> {
        for (index, step) in self.steps.iter().enumerate() {
            let invalid = |reason: &str| ScenarioError::InvalidStep {
                index,
                reason: reason.to_string(),
            };
            match &step.op {
                ScenarioOp::Launch { app, state } | ScenarioOp::SetState { app, state } => {
                    if app.is_empty() {
                        return Err(invalid("empty app name"));
                    }
                    if state.is_empty() {
                        return Err(invalid("empty app state"));
                    }
                }
                ScenarioOp::Close { app } if app.is_empty() => {
                    return Err(invalid("empty app name"));
                }
                ScenarioOp::LaunchAll { state } if state.is_empty() => {
                    return Err(invalid("empty app state"));
                }
                ScenarioOp::MemoryStress { level } | ScenarioOp::IoStress { level }
                    if !level.is_finite() =>
                {
                    return Err(invalid("stress level is not finite"));
                }
                _ => {}
            }
        }
        Ok(())
    }
}
