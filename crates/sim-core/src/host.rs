//! Capability seams between the agent and whatever system it manages.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

use crate::{Governor, ValidationError};

/// Point-in-time view of the managed system.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub cpu_percent: f64,
    pub mem_percent: f64,
    pub io_wait: f64,
    /// Names of running apps.
    pub running_apps: BTreeSet<String>,
    /// Seconds on the source's clock when the snapshot was taken.
    pub timestamp: f64,
}

impl Snapshot {
    pub fn is_running(&self, app: &str) -> bool {
        self.running_apps.contains(app)
    }

    /// True if at least one of `apps` is running.
    pub fn any_running(&self, apps: &[&str]) -> bool {
        apps.iter().any(|a| self.running_apps.contains(*a))
    }

    /// Reject snapshots carrying NaN or infinite readings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let fields = [
            (self.cpu_percent, "cpu_percent"),
            (self.mem_percent, "mem_percent"),
            (self.io_wait, "io_wait"),
            (self.timestamp, "timestamp"),
        ];
        for (value, name) in fields {
            if !value.is_finite() {
                return Err(ValidationError::NonFiniteMetric(name));
            }
        }
        Ok(())
    }
}

/// Corrective action the agent can ask an executor to perform.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    SetGovernor { governor: Governor },
    DropCaches,
    ReniceHighCpu,
    KillMostMemProc,
    /// Any action the executor does not model; accepted without effect.
    Other { name: String },
}

impl Action {
    /// Stable action name used for debouncing and failure memory.
    pub fn name(&self) -> &str {
        match self {
            Action::SetGovernor { .. } => "set_governor",
            Action::DropCaches => "drop_caches",
            Action::ReniceHighCpu => "renice_high_cpu",
            Action::KillMostMemProc => "kill_most_mem_proc",
            Action::Other { name } => name.as_str(),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::SetGovernor { governor } => write!(f, "set_governor(governor={governor})"),
            other => f.write_str(other.name()),
        }
    }
}

/// Why an executor refused or failed to carry out an action.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ActionError {
    #[error("action `{action}` failed due to high system stress (stress factor {stress_factor:.2})")]
    SystemStress { action: String, stress_factor: f64 },
    #[error("action `{action}` rejected: {reason}")]
    Rejected { action: String, reason: String },
}

/// Errors from a metrics source.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum SourceError {
    #[error("metrics source unavailable: {0}")]
    Unavailable(String),
}

/// Read-only access to current system metrics.
pub trait SystemMetricsSource {
    fn snapshot(&self) -> Result<Snapshot, SourceError>;
}

/// Fire-and-report execution of corrective actions.
pub trait ActionExecutor {
    fn execute(&mut self, action: &Action) -> Result<(), ActionError>;
}

/// Anything the agent can both observe and act on.
pub trait Host: SystemMetricsSource + ActionExecutor {}

impl<T: SystemMetricsSource + ActionExecutor> Host for T {}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> Snapshot {
        Snapshot {
            cpu_percent: 12.0,
            mem_percent: 40.0,
            io_wait: 0.0,
            running_apps: ["python3", "steam"].iter().map(|s| s.to_string()).collect(),
            timestamp: 3.0,
        }
    }

    #[test]
    fn action_names_and_display() {
        let a = Action::SetGovernor {
            governor: Governor::Powersave,
        };
        assert_eq!(a.name(), "set_governor");
        assert_eq!(a.to_string(), "set_governor(governor=powersave)");
        assert_eq!(Action::KillMostMemProc.to_string(), "kill_most_mem_proc");
        let other = Action::Other {
            name: "flush_swap".into(),
        };
        assert_eq!(other.name(), "flush_swap");
    }

    #[test]
    fn action_json_is_tagged() {
        let a = Action::SetGovernor {
            governor: Governor::Performance,
        };
        let v = serde_json::to_value(&a).unwrap();
        assert_eq!(v["kind"], "set_governor");
        assert_eq!(v["governor"], "performance");
    }

    #[test]
    fn snapshot_membership() {
        let s = snapshot();
        assert!(s.is_running("steam"));
        assert!(s.any_running(&["lutris", "steam"]));
        assert!(!s.any_running(&["blender", "kdenlive"]));
        s.validate().unwrap();
    }

    #[test]
    fn non_finite_snapshot_is_invalid() {
        let mut s = snapshot();
        s.io_wait = f64::NAN;
        assert_eq!(
            s.validate(),
            Err(ValidationError::NonFiniteMetric("io_wait"))
        );
    }
}
