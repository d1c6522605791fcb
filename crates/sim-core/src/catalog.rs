use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{ValidationError, ACTIVE, IDLE};

/// CPU and memory cost of one app in one activity state.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResourceProfile {
    /// Steady CPU demand in percent of the whole machine.
    pub base_cpu: f64,
    /// Extra CPU demand added on a spike tick.
    pub spike_cpu: f64,
    /// Memory footprint in percent of physical RAM.
    pub mem: f64,
}

impl ResourceProfile {
    /// Profile used for any (app, state) pair missing from the catalog.
    pub const FALLBACK: ResourceProfile = ResourceProfile::new(1.0, 0.0, 1.0);

    pub const fn new(base_cpu: f64, spike_cpu: f64, mem: f64) -> Self {
        Self {
            base_cpu,
            spike_cpu,
            mem,
        }
    }
}

/// Static per-application cost table keyed by app name, then activity state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceCatalog(BTreeMap<String, BTreeMap<String, ResourceProfile>>);

impl ResourceCatalog {
    /// Empty catalog; every lookup falls back.
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    /// Desktop apps known to the sandbox out of the box.
    pub fn builtin() -> Self {
        let mut c = Self::empty();
        c.insert("cinnamon", IDLE, ResourceProfile::new(2.0, 0.0, 5.0));
        c.insert("python3", IDLE, ResourceProfile::new(1.0, 0.0, 3.0));
        c.insert("firefox", IDLE, ResourceProfile::new(5.0, 15.0, 10.0));
        c.insert("steam", IDLE, ResourceProfile::new(2.0, 10.0, 8.0));
        c.insert("steam", ACTIVE, ResourceProfile::new(40.0, 20.0, 20.0));
        c.insert("blender", IDLE, ResourceProfile::new(2.0, 5.0, 12.0));
        c.insert("blender", ACTIVE, ResourceProfile::new(80.0, 15.0, 40.0));
        c.insert("kdenlive", IDLE, ResourceProfile::new(4.0, 10.0, 15.0));
        c.insert("kdenlive", ACTIVE, ResourceProfile::new(75.0, 20.0, 35.0));
        c.insert("obs", IDLE, ResourceProfile::new(8.0, 10.0, 10.0));
        c.insert("obs", ACTIVE, ResourceProfile::new(30.0, 25.0, 18.0));
        c
    }

    pub fn insert(&mut self, app: &str, state: &str, profile: ResourceProfile) {
        self.0
            .entry(app.to_string())
            .or_default()
            .insert(state.to_string(), profile);
    }

    /// Profile for `(app, state)`, or [`ResourceProfile::FALLBACK`].
    pub fn lookup(&self, app: &str, state: &str) -> ResourceProfile {
        self.0
            .get(app)
            .and_then(|states| states.get(state))
            .copied()
            .unwrap_or(ResourceProfile::FALLBACK)
    }

    /// Overlay `other` on top of this catalog, replacing matching entries.
    pub fn merge(&mut self, other: &ResourceCatalog) {
        for (app, states) in &other.0 {
            for (state, profile) in states {
                self.insert(app, state, *profile);
            }
        }
    }

    /// App names with at least one profile, in name order.
    pub fn apps(&self) -> impl Iterator<Item = &str> + '_ {
        self.0.keys().map(String::as_str)
    }

    /// Number of (app, state) entries.
    pub fn len(&self) -> usize {
        self.0.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ResourceCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Validate a catalog: every cost must be finite and non-negative.
pub fn validate_catalog(catalog: &ResourceCatalog) -> Result<(), ValidationError> {
    for (app, states) in &catalog.0 {
        if app.trim().is_empty() {
            return Err(ValidationError::EmptyAppName);
        }
        for (state, p) in states {
            let values = [p.base_cpu, p.spike_cpu, p.mem];
            if values.iter().any(|v| !v.is_finite() || *v < 0.0) {
                return Err(ValidationError::InvalidProfile {
                    app: app.clone(),
                    state: state.clone(),
                });
            }
        }
    }
    Ok(())
}
