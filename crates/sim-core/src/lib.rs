#![deny(warnings)]

//! Core domain models and invariants for the load sandbox.
//!
//! This crate defines the types shared by the simulated environment, the
//! decision agent and the runtime: the resource catalog, strategies and
//! governors, the action vocabulary, the typed event stream, the capability
//! traits the agent talks through, and configuration with validation helpers.

mod catalog;
mod config;
mod event;
mod host;

pub use catalog::*;
pub use config::*;
pub use event::*;
pub use host::*;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Index, IndexMut};

/// Host process entry that is always present in the running-app table.
pub const HOST_PROCESS: &str = "python3";
/// Desktop shell entry that is always present in the running-app table.
pub const DESKTOP_SHELL: &str = "cinnamon";
/// Apps that bulk operations and the kill action never touch.
pub const PERMANENT_APPS: [&str; 2] = [HOST_PROCESS, DESKTOP_SHELL];

/// Activity tag for an app that is open but not working.
pub const IDLE: &str = "idle";
/// Activity tag for an app under full load.
pub const ACTIVE: &str = "active";

/// Upper bound for every percentage metric.
pub const METRIC_CEILING: f64 = 99.9;

/// Returns true for the two entries that must survive bulk closes.
pub fn is_permanent_app(name: &str) -> bool {
    PERMANENT_APPS.contains(&name)
}

/// Clamp a percentage metric into `[0, METRIC_CEILING]`. NaN maps to 0.
pub fn clamp_metric(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, METRIC_CEILING)
}

/// Operating mode chosen by the decision agent.
///
/// Declaration order is the tie-break order used everywhere a maximum is
/// taken over strategies: the first maximal entry wins.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Strategy {
    /// Balanced everyday operation.
    Default,
    /// Content creation and rendering workloads.
    Workstation,
    /// Interactive gaming sessions.
    Gaming,
    /// Low activity, favour energy savings.
    PowerSave,
}

impl Strategy {
    /// All strategies in tie-break order.
    pub const ALL: [Strategy; 4] = [
        Strategy::Default,
        Strategy::Workstation,
        Strategy::Gaming,
        Strategy::PowerSave,
    ];

    /// Position in [`Strategy::ALL`].
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Upper-case identifier, e.g. `POWER_SAVE`.
    pub const fn name(self) -> &'static str {
        match self {
            Strategy::Default => "DEFAULT",
            Strategy::Workstation => "WORKSTATION",
            Strategy::Gaming => "GAMING",
            Strategy::PowerSave => "POWER_SAVE",
        }
    }

    /// Governor applied while this strategy is current.
    pub const fn governor(self) -> Governor {
        match self {
            Strategy::Gaming | Strategy::Workstation => Governor::Performance,
            Strategy::PowerSave => Governor::Powersave,
            Strategy::Default => Governor::Schedutil,
        }
    }

    /// Human-readable cause recorded when the agent switches to this strategy.
    pub const fn reason_label(self) -> &'static str {
        match self {
            Strategy::Gaming => "Gaming session",
            Strategy::Workstation => "Workstation task",
            Strategy::PowerSave => "Low system activity",
            Strategy::Default => "System idle",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A value for every strategy. No entry can ever be missing.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StrategyTable<T>([T; 4]);

impl<T: Copy> StrategyTable<T> {
    /// Table with the same value for every strategy.
    pub fn splat(value: T) -> Self {
        Self([value; 4])
    }

    /// Iterate `(strategy, value)` pairs in tie-break order.
    pub fn iter(&self) -> impl Iterator<Item = (Strategy, T)> + '_ {
        Strategy::ALL.iter().map(move |s| (*s, self.0[s.index()]))
    }
}

impl<T: Copy + PartialOrd> StrategyTable<T> {
    /// Strategy holding the largest value; the earliest one in
    /// [`Strategy::ALL`] wins ties.
    pub fn argmax(&self) -> Strategy {
        let mut best = Strategy::ALL[0];
        for s in Strategy::ALL.iter().skip(1) {
            if self[*s] > self[best] {
                best = *s;
            }
        }
        best
    }
}

impl<T> Index<Strategy> for StrategyTable<T> {
    type Output = T;

    fn index(&self, strategy: Strategy) -> &T {
        &self.0[strategy.index()]
    }
}

impl<T> IndexMut<Strategy> for StrategyTable<T> {
    fn index_mut(&mut self, strategy: Strategy) -> &mut T {
        &mut self.0[strategy.index()]
    }
}

/// Simulated CPU frequency governor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Governor {
    /// Maximum clocks at all times.
    Performance,
    /// Lowest clocks, favouring energy.
    Powersave,
    /// Clocks follow scheduler utilisation.
    Schedutil,
}

impl Governor {
    /// Kernel name of the governor, e.g. `schedutil`.
    pub const fn as_str(self) -> &'static str {
        match self {
            Governor::Performance => "performance",
            Governor::Powersave => "powersave",
            Governor::Schedutil => "schedutil",
        }
    }
}

impl fmt::Display for Governor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
