//! Mock execution backend and metrics source for the simulated machine.

use rand::Rng;
use sim_core::{
    Action, ActionError, ActionExecutor, Snapshot, SourceError, SystemMetricsSource,
};
use tracing::{debug, info};

use crate::SimulationEnvironment;

/// Memory never drops below this through cache eviction.
pub const DROP_CACHES_FLOOR: f64 = 20.0;
/// I/O wait at or above which cache eviction is much less effective.
pub const DROP_CACHES_IO_LIMIT: f64 = 15.0;

impl SimulationEnvironment {
    fn drop_caches(&mut self) {
        let reduction = if self.state.io_wait < DROP_CACHES_IO_LIMIT {
            10.0
        } else {
            3.0
        };
        self.state.mem_percent = (self.state.mem_percent - reduction).max(DROP_CACHES_FLOOR);
    }

    fn kill_most_mem_proc(&mut self) {
        if let Some(app) = self.most_memory_hungry_app() {
            info!(app = %app, "killing app to free memory");
            self.state.running_apps.remove(&app);
        }
    }
}

impl ActionExecutor for SimulationEnvironment {
    fn execute(&mut self, action: &Action) -> Result<(), ActionError> {
        debug!(%action, "attempting action");
        if self.state.stress_factor > self.config.stress_failure_threshold
            && self.rng.gen::<f64>() < self.config.action_failure_probability
        {
            return Err(ActionError::SystemStress {
                action: action.name().to_string(),
                stress_factor: self.state.stress_factor,
            });
        }
        match action {
            Action::SetGovernor { governor } => self.state.governor = *governor,
            Action::DropCaches => self.drop_caches(),
            Action::ReniceHighCpu => {}
            Action::KillMostMemProc => self.kill_most_mem_proc(),
            Action::Other { name } => {
                debug!(action = %name, "unmodelled action accepted");
            }
        }
        Ok(())
    }
}

impl SystemMetricsSource for SimulationEnvironment {
    fn snapshot(&self) -> Result<Snapshot, SourceError> {
        Ok(Snapshot {
            cpu_percent: self.state.cpu_percent,
            mem_percent: self.state.mem_percent,
            io_wait: self.state.io_wait,
            running_apps: self.state.running_apps.keys().cloned().collect(),
            timestamp: self.state.clock,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim_core::{EnvConfig, Governor, ACTIVE, IDLE};

    fn env_with_failure_rate(p: f64) -> SimulationEnvironment {
        SimulationEnvironment::new(EnvConfig {
            spike_probability: 0.0,
            action_failure_probability: p,
            ..EnvConfig::default()
        })
    }

    /// Push the stress factor to 1.58 with two active heavy apps.
    fn thrash(env: &mut SimulationEnvironment) {
        env.add_app("blender", ACTIVE);
        env.add_app("kdenlive", ACTIVE);
        env.update_system_load();
        assert!(env.stress_factor() > 1.2);
    }

    #[test]
    fn set_governor_applies() {
        let mut env = SimulationEnvironment::default();
        env.execute(&Action::SetGovernor {
            governor: Governor::Performance,
        })
        .unwrap();
        assert_eq!(env.governor(), Governor::Performance);
    }

    #[test]
    fn drop_caches_depends_on_io_wait() {
        let mut env = SimulationEnvironment::default();
        env.trigger_memory_stress(95.0);
        env.execute(&Action::DropCaches).unwrap();
        assert_eq!(env.mem_percent(), 85.0);

        env.trigger_memory_stress(95.0);
        env.trigger_io_stress(40.0);
        env.execute(&Action::DropCaches).unwrap();
        assert_eq!(env.mem_percent(), 92.0);

        env.trigger_memory_stress(25.0);
        env.trigger_io_stress(0.0);
        env.execute(&Action::DropCaches).unwrap();
        assert_eq!(env.mem_percent(), DROP_CACHES_FLOOR);
    }

    #[test]
    fn kill_removes_hungriest_user_app() {
        let mut env = SimulationEnvironment::default();
        env.add_app("firefox", IDLE);
        env.add_app("kdenlive", IDLE);
        env.execute(&Action::KillMostMemProc).unwrap();
        assert!(!env.is_running("kdenlive"));
        assert!(env.is_running("firefox"));
    }

    #[test]
    fn kill_never_touches_permanent_apps() {
        let mut env = SimulationEnvironment::default();
        env.execute(&Action::KillMostMemProc).unwrap();
        assert_eq!(env.running_apps().len(), 2);
    }

    #[test]
    fn renice_and_unknown_actions_change_nothing() {
        let mut env = SimulationEnvironment::default();
        let before = env.state().clone();
        env.execute(&Action::ReniceHighCpu).unwrap();
        env.execute(&Action::Other {
            name: "defrag".into(),
        })
        .unwrap();
        assert_eq!(env.state(), &before);
    }

    #[test]
    fn thrashing_makes_actions_fail() {
        let mut env = env_with_failure_rate(1.0);
        thrash(&mut env);
        let err = env.execute(&Action::ReniceHighCpu).unwrap_err();
        assert!(matches!(err, ActionError::SystemStress { .. }));
        assert!(err.to_string().contains("renice_high_cpu"));
    }

    #[test]
    fn calm_system_never_fails_actions() {
        let mut env = env_with_failure_rate(1.0);
        env.update_system_load();
        for _ in 0..50 {
            env.execute(&Action::DropCaches).unwrap();
        }
    }

    #[test]
    fn snapshot_mirrors_state() {
        let mut env = SimulationEnvironment::default();
        env.add_app("steam", IDLE);
        env.update_system_load();
        let snap = env.snapshot().unwrap();
        assert_eq!(snap.cpu_percent, env.cpu_percent());
        assert_eq!(snap.mem_percent, env.mem_percent());
        assert_eq!(snap.io_wait, env.io_wait());
        assert_eq!(snap.timestamp, 1.0);
        assert!(snap.is_running("steam"));
        assert_eq!(snap.running_apps.len(), 3);
    }
}
