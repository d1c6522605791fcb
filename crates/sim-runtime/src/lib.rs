#![deny(warnings)]

//! ECS tick driver for the load sandbox.
//!
//! The world holds the simulated machine, the decision agent, the pending
//! scenario steps and the event journal as resources. One run of the tick
//! schedule executes three chained systems on a single thread:
//! fire due scenario steps, update the machine load, step the agent.

mod scenario;

pub use scenario::*;

use bevy_ecs::prelude::*;
use bevy_ecs::schedule::{ExecutorKind, ScheduleLabel};
use serde::{Deserialize, Serialize};
use sim_ai::DecisionAgent;
use sim_core::{
    validate_config, AgentEvent, Governor, SandboxConfig, Strategy, StrategyTable, ValidationError,
};
use sim_env::SimulationEnvironment;
use std::collections::{BTreeMap, VecDeque};
use tracing::{debug, info};

/// Label of the per-tick schedule.
#[derive(ScheduleLabel, Debug, Clone, PartialEq, Eq, Hash)]
pub struct SandboxTick;

#[derive(Resource)]
pub struct Machine(pub SimulationEnvironment);

#[derive(Resource)]
pub struct Agent(pub DecisionAgent);

/// Completed ticks.
#[derive(Resource, Debug, Default, Clone, Copy)]
pub struct TickClock {
    pub tick: u64,
}

#[derive(Clone, Debug, PartialEq)]
struct PendingStep {
    due: u64,
    op: ScenarioOp,
}

/// Scenario steps waiting for their tick, ordered by due tick then
/// insertion.
#[derive(Resource, Debug, Default)]
pub struct ScenarioQueue {
    pending: VecDeque<PendingStep>,
    /// Steps fired on the most recent tick.
    fired: Vec<ScenarioOp>,
}

impl ScenarioQueue {
    fn push(&mut self, due: u64, op: ScenarioOp) {
        let at = self.pending.partition_point(|p| p.due <= due);
        self.pending.insert(at, PendingStep { due, op });
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn last_fired(&self) -> &[ScenarioOp] {
        &self.fired
    }
}

/// One agent event stamped with when it happened.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub tick: u64,
    /// Simulated seconds.
    pub timestamp: f64,
    #[serde(flatten)]
    pub event: AgentEvent,
}

/// Undrained records kept before the oldest are discarded.
pub const JOURNAL_CAPACITY: usize = 1024;

/// Agent events waiting for a reader, plus per-kind totals for the whole
/// run. Readers take records with [`EventJournal::drain`]; when nobody
/// drains, only the newest [`JOURNAL_CAPACITY`] records are kept.
#[derive(Resource, Debug)]
pub struct EventJournal {
    pending: VecDeque<EventRecord>,
    capacity: usize,
    total: usize,
    dropped: usize,
    counts: BTreeMap<&'static str, usize>,
}

impl Default for EventJournal {
    fn default() -> Self {
        Self::with_capacity(JOURNAL_CAPACITY)
    }
}

impl EventJournal {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            capacity: capacity.max(1),
            total: 0,
            dropped: 0,
            counts: BTreeMap::new(),
        }
    }

    fn record(&mut self, record: EventRecord) {
        self.total += 1;
        *self.counts.entry(record.event.kind()).or_insert(0) += 1;
        if self.pending.len() == self.capacity {
            self.pending.pop_front();
            self.dropped += 1;
        }
        self.pending.push_back(record);
    }

    /// Undrained records, oldest first.
    pub fn records(&self) -> impl ExactSizeIterator<Item = &EventRecord> + '_ {
        self.pending.iter()
    }

    /// Take every undrained record, oldest first.
    pub fn drain(&mut self) -> Vec<EventRecord> {
        self.pending.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Records ever journaled, drained or not.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Records discarded undrained because the journal was full.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Records ever journaled, per event kind.
    pub fn counts(&self) -> &BTreeMap<&'static str, usize> {
        &self.counts
    }
}

/// Everything a presentation layer shows after a tick.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    pub tick: u64,
    pub cpu: f64,
    pub mem: f64,
    pub io_wait: f64,
    pub governor: Governor,
    pub stress_factor: f64,
    /// App name to state.
    pub running_apps: BTreeMap<String, String>,
    pub strategy: Strategy,
    pub last_trigger_reason: String,
    pub failure_count: usize,
    pub weights: StrategyTable<f64>,
}

fn fire_scenario_steps(
    clock: Res<TickClock>,
    mut queue: ResMut<ScenarioQueue>,
    mut machine: ResMut<Machine>,
) {
    queue.fired.clear();
    while queue.pending.front().is_some_and(|p| p.due <= clock.tick) {
        let Some(step) = queue.pending.pop_front() else {
            break;
        };
        apply_op(&mut machine.0, &step.op);
        queue.fired.push(step.op);
    }
}

fn apply_op(env: &mut SimulationEnvironment, op: &ScenarioOp) {
    match op {
        ScenarioOp::Launch { app, state } => env.add_app(app, state),
        ScenarioOp::Close { app } => env.remove_app(app),
        ScenarioOp::SetState { app, state } => env.set_app_state(app, state),
        ScenarioOp::LaunchAll { state } => {
            let launched = env.launch_all_apps(state);
            debug!(?launched, "launched user apps");
        }
        ScenarioOp::CloseAll => {
            let closed = env.close_all_apps();
            debug!(?closed, "closed user apps");
        }
        ScenarioOp::MemoryStress { level } => env.trigger_memory_stress(*level),
        ScenarioOp::IoStress { level } => env.trigger_io_stress(*level),
        ScenarioOp::Note { message } => info!(target: "scenario", "{message}"),
    }
}

fn update_load(mut machine: ResMut<Machine>) {
    let sample = machine.0.update_system_load();
    debug!(?sample, "load updated");
}

fn agent_step(
    mut clock: ResMut<TickClock>,
    mut machine: ResMut<Machine>,
    mut agent: ResMut<Agent>,
    mut journal: ResMut<EventJournal>,
) {
    clock.tick += 1;
    agent.0.main_loop_step(&mut machine.0);
    let timestamp = machine.0.clock();
    for event in agent.0.drain_events() {
        journal.record(EventRecord {
            tick: clock.tick,
            timestamp,
            event,
        });
    }
}

fn tick_schedule() -> Schedule {
    let mut schedule = Schedule::new(SandboxTick);
    schedule.set_executor_kind(ExecutorKind::SingleThreaded);
    schedule.add_systems((fire_scenario_steps, update_load, agent_step).chain());
    schedule
}

/// Build a validated sandbox world ready to tick.
pub fn init_world(config: SandboxConfig) -> Result<World, ValidationError> {
    validate_config(&config)?;
    info!(seed = config.env.rng_seed, "initializing sandbox world");
    let mut world = World::new();
    world.insert_resource(Machine(SimulationEnvironment::new(config.env)));
    world.insert_resource(Agent(DecisionAgent::new(config.agent)));
    world.insert_resource(TickClock::default());
    world.insert_resource(ScenarioQueue::default());
    world.insert_resource(EventJournal::default());
    world.add_schedule(tick_schedule());
    Ok(world)
}

/// Queue every step of `scenario` relative to the current tick.
pub fn schedule_scenario(world: &mut World, scenario: &Scenario) {
    let now = world.resource::<TickClock>().tick;
    info!(
        scenario = %scenario.name,
        steps = scenario.steps.len(),
        "scheduling scenario"
    );
    let mut queue = world.resource_mut::<ScenarioQueue>();
    for step in &scenario.steps {
        queue.push(now + step.at_tick, step.op.clone());
    }
}

/// Advance `n` ticks and return the resulting dashboard.
pub fn run_ticks(world: &mut World, n: u64) -> DashboardSnapshot {
    for _ in 0..n {
        world.run_schedule(SandboxTick);
    }
    dashboard(world)
}

pub fn dashboard(world: &World) -> DashboardSnapshot {
    let env = &world.resource::<Machine>().0;
    let agent = &world.resource::<Agent>().0;
    DashboardSnapshot {
        tick: world.resource::<TickClock>().tick,
        cpu: env.cpu_percent(),
        mem: env.mem_percent(),
        io_wait: env.io_wait(),
        governor: env.governor(),
        stress_factor: env.stress_factor(),
        running_apps: env.running_apps().clone(),
        strategy: agent.current_strategy(),
        last_trigger_reason: agent.last_trigger_reason().to_string(),
        failure_count: agent.failure_count(),
        weights: *agent.strategy_weights(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim_core::EnvConfig;

    fn quiet_world() -> World {
        init_world(SandboxConfig {
            env: EnvConfig {
                spike_probability: 0.0,
                ..EnvConfig::default()
            },
            ..SandboxConfig::default()
        })
        .unwrap()
    }

    fn script(steps: Vec<(u64, ScenarioOp)>) -> Scenario {
        Scenario {
            name: "test".into(),
            description: String::new(),
            steps: steps
                .into_iter()
                .map(|(at_tick, op)| ScenarioStep { at_tick, op })
                .collect(),
        }
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut cfg = SandboxConfig::default();
        cfg.env.tick_seconds = 0.0;
        assert!(init_world(cfg).is_err());
    }

    #[test]
    fn ticks_advance_clock_and_agent() {
        let mut world = quiet_world();
        let dash = run_ticks(&mut world, 3);
        assert_eq!(dash.tick, 3);
        assert_eq!(world.resource::<Agent>().0.tick_counter(), 3);
        assert_eq!(world.resource::<Machine>().0.clock(), 3.0);
    }

    #[test]
    fn idle_desktop_settles_in_power_save() {
        let mut world = quiet_world();
        let dash = run_ticks(&mut world, 1);
        assert_eq!(dash.strategy, Strategy::PowerSave);
        assert_eq!(dash.governor, Governor::Powersave);
        let first = world
            .resource::<EventJournal>()
            .records()
            .next()
            .cloned()
            .unwrap();
        assert_eq!(first.tick, 1);
        assert_eq!(first.event.kind(), "strategy_applied");
    }

    #[test]
    fn steps_fire_on_their_tick_in_order() {
        let mut world = quiet_world();
        schedule_scenario(
            &mut world,
            &script(vec![
                (2, ScenarioOp::Launch {
                    app: "steam".into(),
                    state: "idle".into(),
                }),
                (1, ScenarioOp::Launch {
                    app: "firefox".into(),
                    state: "idle".into(),
                }),
                (2, ScenarioOp::Close {
                    app: "steam".into(),
                }),
            ]),
        );
        run_ticks(&mut world, 1);
        assert!(!world.resource::<Machine>().0.is_running("firefox"));
        run_ticks(&mut world, 1);
        assert!(world.resource::<Machine>().0.is_running("firefox"));
        run_ticks(&mut world, 1);
        // launch then close on the same tick leaves steam closed
        assert!(!world.resource::<Machine>().0.is_running("steam"));
        let fired = world.resource::<ScenarioQueue>().last_fired().to_vec();
        assert_eq!(fired.len(), 2);
        assert!(matches!(fired[0], ScenarioOp::Launch { .. }));
        assert!(world.resource::<ScenarioQueue>().is_empty());
    }

    #[test]
    fn scheduling_is_relative_to_now() {
        let mut world = quiet_world();
        run_ticks(&mut world, 5);
        schedule_scenario(
            &mut world,
            &script(vec![(0, ScenarioOp::MemoryStress { level: 95.0 })]),
        );
        assert_eq!(world.resource::<ScenarioQueue>().len(), 1);
        run_ticks(&mut world, 1);
        assert!(world.resource::<ScenarioQueue>().is_empty());
    }

    #[test]
    fn steam_session_switches_to_gaming() {
        let mut world = quiet_world();
        schedule_scenario(
            &mut world,
            &script(vec![(0, ScenarioOp::Launch {
                app: "steam".into(),
                state: "active".into(),
            })]),
        );
        let dash = run_ticks(&mut world, 1);
        assert_eq!(dash.strategy, Strategy::Gaming);
        assert!(dash.last_trigger_reason.contains("Gaming"));
        assert_eq!(dash.governor, Governor::Performance);
    }

    #[test]
    fn memory_crisis_triggers_reflex() {
        let mut world = quiet_world();
        schedule_scenario(
            &mut world,
            &script(vec![
                (0, ScenarioOp::Launch {
                    app: "firefox".into(),
                    state: "idle".into(),
                }),
                (0, ScenarioOp::MemoryStress { level: 96.0 }),
            ]),
        );
        run_ticks(&mut world, 1);
        let counts = world.resource::<EventJournal>().counts();
        assert_eq!(counts.get("reflex_triggered"), Some(&1));
    }

    #[test]
    fn builtin_scenarios_run_to_completion() {
        for name in BUILTIN_SCENARIOS {
            let mut world = quiet_world();
            let scenario = Scenario::builtin(name).unwrap();
            schedule_scenario(&mut world, &scenario);
            let dash = run_ticks(&mut world, scenario.duration() + 1);
            assert!(world.resource::<ScenarioQueue>().is_empty(), "{name}");
            for v in [dash.cpu, dash.mem, dash.io_wait] {
                assert!((0.0..=99.9).contains(&v), "{name}: {v}");
            }
            let journal = world.resource::<EventJournal>();
            assert!(!journal.counts().contains_key("app_crash"), "{name}");
        }
    }

    #[test]
    fn same_seed_same_run() {
        let run = || {
            let mut world = init_world(SandboxConfig::default()).unwrap();
            schedule_scenario(&mut world, &Scenario::builtin("thrashing").unwrap());
            let dash = run_ticks(&mut world, 20);
            (dash, world.resource_mut::<EventJournal>().drain())
        };
        assert_eq!(run(), run());
    }

    fn crash_record(tick: u64) -> EventRecord {
        EventRecord {
            tick,
            timestamp: tick as f64,
            event: AgentEvent::AppCrash(sim_core::AppCrash {
                reason: format!("fault {tick}"),
                trace: Vec::new(),
            }),
        }
    }

    #[test]
    fn drained_journal_keeps_totals() {
        let mut world = quiet_world();
        run_ticks(&mut world, 1);
        let first = world.resource_mut::<EventJournal>().drain();
        assert!(!first.is_empty());
        let journal = world.resource::<EventJournal>();
        assert!(journal.is_empty());
        assert_eq!(journal.total(), first.len());
        assert_eq!(journal.counts().get("strategy_applied"), Some(&1));

        run_ticks(&mut world, 1);
        let journal = world.resource::<EventJournal>();
        assert!(journal.records().all(|r| r.tick == 2));
        assert_eq!(journal.total(), first.len() + journal.len());
    }

    #[test]
    fn full_journal_discards_oldest() {
        let mut journal = EventJournal::with_capacity(3);
        for tick in 1..=5 {
            journal.record(crash_record(tick));
        }
        assert_eq!(journal.len(), 3);
        assert_eq!(journal.dropped(), 2);
        assert_eq!(journal.total(), 5);
        assert_eq!(journal.counts().get("app_crash"), Some(&5));
        let ticks: Vec<u64> = journal.drain().iter().map(|r| r.tick).collect();
        assert_eq!(ticks, vec![3, 4, 5]);
        assert_eq!(journal.dropped(), 2);
    }

    #[test]
    fn tour_launches_firefox_on_the_fifth_update() {
        let mut world = quiet_world();
        schedule_scenario(&mut world, &Scenario::builtin("tour").unwrap());
        run_ticks(&mut world, 4);
        assert!(!world.resource::<Machine>().0.is_running("firefox"));
        run_ticks(&mut world, 1);
        assert!(world.resource::<Machine>().0.is_running("firefox"));
        assert_eq!(
            world.resource::<ScenarioQueue>().last_fired(),
            &[ScenarioOp::Launch {
                app: "firefox".into(),
                state: "idle".into(),
            }]
        );
    }

    #[test]
    fn event_record_serializes_flat() {
        let mut world = quiet_world();
        run_ticks(&mut world, 1);
        let record = world.resource_mut::<EventJournal>().drain().remove(0);
        let v = serde_json::to_value(&record).unwrap();
        assert_eq!(v["tick"], 1);
        assert_eq!(v["event"], "strategy_applied");
        assert!(v["details"].is_object());
    }

    #[test]
    fn default_config_asset_loads() {
        let path = std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("../../assets/config/default.yaml");
        let cfg = SandboxConfig::load(&path).unwrap();
        assert_eq!(cfg, SandboxConfig::default());
    }
}
