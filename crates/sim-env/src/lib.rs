#![deny(warnings)]

//! Simulated host machine for the load sandbox.
//!
//! This crate provides:
//! - A resource-load model driven by the app catalog, with a feedback
//!   "thrashing" regime once aggregate CPU demand exceeds capacity
//! - A mutation API for scenario injection (launch/close apps, force
//!   memory or I/O pressure)
//! - A mock execution backend whose actions fail more often under stress
//!
//! All randomness is drawn from a seeded ChaCha RNG so runs are reproducible.

mod backend;

pub use backend::{DROP_CACHES_FLOOR, DROP_CACHES_IO_LIMIT};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use sim_core::{
    clamp_metric, is_permanent_app, EnvConfig, Governor, ResourceCatalog, DESKTOP_SHELL,
    HOST_PROCESS, IDLE,
};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Demand (in percent of the machine) above which the system is oversubscribed.
pub const CPU_CAPACITY: f64 = 100.0;
/// I/O wait never climbs past this through thrashing alone.
pub const IO_WAIT_CEILING: f64 = 99.0;
/// Memory at or above this level is only moved by stress injection or actions.
pub const MEM_PRESSURE_LATCH: f64 = 90.0;

/// Mutable machine state owned by the environment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentState {
    /// App name to activity tag.
    pub running_apps: BTreeMap<String, String>,
    pub cpu_percent: f64,
    pub mem_percent: f64,
    pub io_wait: f64,
    pub governor: Governor,
    /// Ratio of demanded to available CPU; 1.0 unless oversubscribed.
    pub stress_factor: f64,
    /// Simulated seconds since start.
    pub clock: f64,
}

impl Default for EnvironmentState {
    fn default() -> Self {
        let mut running_apps = BTreeMap::new();
        running_apps.insert(HOST_PROCESS.to_string(), IDLE.to_string());
        running_apps.insert(DESKTOP_SHELL.to_string(), IDLE.to_string());
        Self {
            running_apps,
            cpu_percent: 5.0,
            mem_percent: 18.0,
            io_wait: 0.0,
            governor: Governor::Schedutil,
            stress_factor: 1.0,
            clock: 0.0,
        }
    }
}

/// Aggregates computed by one load update, before noise.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LoadSample {
    pub potential_cpu: f64,
    pub base_mem: f64,
}

/// Feedback-driven resource-load simulator.
#[derive(Clone, Debug)]
pub struct SimulationEnvironment {
    config: EnvConfig,
    catalog: ResourceCatalog,
    state: EnvironmentState,
    rng: ChaCha8Rng,
}

impl SimulationEnvironment {
    pub fn new(config: EnvConfig) -> Self {
        let catalog = config.catalog();
        let rng = ChaCha8Rng::seed_from_u64(config.rng_seed);
        Self {
            config,
            catalog,
            state: EnvironmentState::default(),
            rng,
        }
    }

    /// Default parameters with a specific seed.
    pub fn with_seed(seed: u64) -> Self {
        Self::new(EnvConfig {
            rng_seed: seed,
            ..EnvConfig::default()
        })
    }

    pub fn config(&self) -> &EnvConfig {
        &self.config
    }

    pub fn catalog(&self) -> &ResourceCatalog {
        &self.catalog
    }

    pub fn state(&self) -> &EnvironmentState {
        &self.state
    }

    pub fn cpu_percent(&self) -> f64 {
        self.state.cpu_percent
    }

    pub fn mem_percent(&self) -> f64 {
        self.state.mem_percent
    }

    pub fn io_wait(&self) -> f64 {
        self.state.io_wait
    }

    pub fn governor(&self) -> Governor {
        self.state.governor
    }

    pub fn stress_factor(&self) -> f64 {
        self.state.stress_factor
    }

    pub fn clock(&self) -> f64 {
        self.state.clock
    }

    pub fn running_apps(&self) -> &BTreeMap<String, String> {
        &self.state.running_apps
    }

    pub fn is_running(&self, app: &str) -> bool {
        self.state.running_apps.contains_key(app)
    }

    /// Launch an app, or overwrite the state of one already running.
    pub fn add_app(&mut self, app: &str, state: &str) {
        info!(app, state, "launching app");
        self.state
            .running_apps
            .insert(app.to_string(), state.to_string());
    }

    /// Close an app. Closing an app that is not running does nothing.
    pub fn remove_app(&mut self, app: &str) {
        if self.state.running_apps.remove(app).is_some() {
            info!(app, "closing app");
        }
    }

    /// Close every user app, keeping the host process and desktop shell.
    /// Returns the names that were closed.
    pub fn close_all_apps(&mut self) -> Vec<String> {
        let closing: Vec<String> = self
            .state
            .running_apps
            .keys()
            .filter(|name| !is_permanent_app(name))
            .cloned()
            .collect();
        for app in &closing {
            self.state.running_apps.remove(app);
        }
        info!(closed = closing.len(), "closed all user apps");
        closing
    }

    /// Launch every user app the catalog knows in `state`, overwriting the
    /// state of any already running. Returns the names launched.
    pub fn launch_all_apps(&mut self, state: &str) -> Vec<String> {
        let launching: Vec<String> = self
            .catalog
            .apps()
            .filter(|name| !is_permanent_app(name))
            .map(str::to_string)
            .collect();
        for app in &launching {
            self.state
                .running_apps
                .insert(app.clone(), state.to_string());
        }
        info!(launched = launching.len(), state, "launched all user apps");
        launching
    }

    /// Change the activity tag of a running app; ignored if it is not running.
    pub fn set_app_state(&mut self, app: &str, state: &str) {
        if let Some(current) = self.state.running_apps.get_mut(app) {
            *current = state.to_string();
            info!(app, state, "app state changed");
        }
    }

    /// Force memory usage to `level` (clamped), e.g. a sudden allocation storm.
    /// Non-finite levels are ignored.
    pub fn trigger_memory_stress(&mut self, level: f64) {
        if !level.is_finite() {
            warn!(level, "ignoring non-finite memory stress level");
            return;
        }
        self.state.mem_percent = clamp_metric(level);
        info!(level = self.state.mem_percent, "memory pressure injected");
    }

    /// Force I/O wait to `level` (clamped), e.g. a saturated disk.
    /// Non-finite levels are ignored.
    pub fn trigger_io_stress(&mut self, level: f64) {
        if !level.is_finite() {
            warn!(level, "ignoring non-finite I/O stress level");
            return;
        }
        self.state.io_wait = clamp_metric(level);
        info!(level = self.state.io_wait, "I/O saturation injected");
    }

    /// Advance the machine by one tick.
    pub fn update_system_load(&mut self) -> LoadSample {
        let mut potential_cpu = 0.0;
        let mut base_mem = 0.0;
        for (app, state) in &self.state.running_apps {
            let profile = self.catalog.lookup(app, state);
            potential_cpu += profile.base_cpu;
            // independent draw per app
            if self.rng.gen::<f64>() < self.config.spike_probability {
                potential_cpu += profile.spike_cpu;
            }
            base_mem += profile.mem;
        }

        let actual_cpu = if potential_cpu > CPU_CAPACITY {
            let stress = potential_cpu / CPU_CAPACITY;
            self.state.stress_factor = stress;
            if self.state.io_wait < IO_WAIT_CEILING {
                self.state.io_wait = (self.state.io_wait + stress * 5.0).min(IO_WAIT_CEILING);
            }
            CPU_CAPACITY - (stress - 1.0) * 10.0
        } else {
            self.state.stress_factor = 1.0;
            self.state.io_wait = (self.state.io_wait - 5.0).max(0.0);
            potential_cpu
        };

        let cpu_noise: f64 = self.rng.gen_range(-2.0..=2.0);
        self.state.cpu_percent = clamp_metric(actual_cpu + cpu_noise);

        if self.state.mem_percent < MEM_PRESSURE_LATCH {
            let mem_noise: f64 = self.rng.gen_range(-1.0..=1.0);
            self.state.mem_percent = clamp_metric(base_mem + mem_noise);
        }

        self.state.clock += self.config.tick_seconds;
        debug!(
            potential_cpu,
            stress = self.state.stress_factor,
            cpu = self.state.cpu_percent,
            mem = self.state.mem_percent,
            io_wait = self.state.io_wait,
            "system load updated"
        );
        LoadSample {
            potential_cpu,
            base_mem,
        }
    }

    /// Most memory-hungry user app for its current activity state. Ties go
    /// to the lexicographically first name.
    pub fn most_memory_hungry_app(&self) -> Option<String> {
        let mut best: Option<(&String, f64)> = None;
        for (app, state) in &self.state.running_apps {
            if is_permanent_app(app) {
                continue;
            }
            let mem = self.catalog.lookup(app, state).mem;
            match best {
                Some((_, top)) if top >= mem => {}
                _ => best = Some((app, mem)),
            }
        }
        best.map(|(app, _)| app.clone())
    }
}

impl Default for SimulationEnvironment {
    fn default() -> Self {
        Self::new(EnvConfig::default())
    }
}
