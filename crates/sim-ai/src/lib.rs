#![deny(warnings)]

//! Rule-based decision agent for the load sandbox.
//!
//! Each tick the agent takes a snapshot from its host, scores the four
//! operating strategies, switches strategy when another one wins, and runs
//! two corrective policies:
//! - tactical: renice when CPU load is high
//! - reflexive: drop caches on critical memory, escalating to killing the
//!   hungriest app when cache eviction failed recently
//!
//! Every `learning_interval` ticks it reweights the strategy it used most,
//! rewarding calm windows and penalizing poor ones.

mod scoring;

pub use scoring::*;

use serde::{Deserialize, Serialize};
use sim_core::{
    Action, ActionError, ActionExecutor, ActionFailure, ActionSuccess, AgentConfig, AgentEvent,
    AppCrash, EmergencyAction, Host, LearningCycle, ReflexTriggered, Snapshot, SourceError,
    StrategyApplied, Strategy, StrategyTable, TacticalBoost, ValidationError, Verdict,
    WeightAdjustment, validate_agent_config,
};
use std::any::Any;
use std::collections::BTreeMap;
use std::error::Error as _;
use std::panic::{self, AssertUnwindSafe};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Label recorded before the first strategy switch.
pub const INITIAL_REASON: &str = "Initial State";

/// Faults that abort a tick.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("could not read system snapshot")]
    Source(#[from] SourceError),
    #[error("system snapshot rejected")]
    InvalidSnapshot(#[from] ValidationError),
}

/// One tick's worth of observed performance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSample {
    pub strategy: Strategy,
    pub cpu: f64,
    pub io_wait: f64,
    /// Failure-tracker size when the sample was taken.
    pub failures: usize,
}

/// What happened to a requested action.
#[derive(Clone, Debug, PartialEq)]
pub enum ActionOutcome {
    /// Still within the cooldown of an earlier success; nothing was sent.
    Debounced,
    Succeeded,
    Failed(ActionError),
}

/// Strategy-selecting agent with failure memory and learned weights.
#[derive(Clone, Debug)]
pub struct DecisionAgent {
    config: AgentConfig,
    current_strategy: Strategy,
    last_trigger_reason: String,
    tick_counter: u64,
    weights: StrategyTable<f64>,
    history: Vec<PerformanceSample>,
    /// Action name to time of its last failure.
    failure_tracker: BTreeMap<String, f64>,
    /// Action name to cooldown expiry.
    active_optimizations: BTreeMap<String, f64>,
    events: Vec<AgentEvent>,
    /// Timestamp of the snapshot being acted on.
    now: f64,
}

impl DecisionAgent {
    /// Build an agent. An invalid config is reported but still used; a zero
    /// `learning_interval` disables learning.
    pub fn new(config: AgentConfig) -> Self {
        if let Err(err) = validate_agent_config(&config) {
            warn!(%err, "decision agent config is invalid");
        }
        info!("decision agent initialized");
        Self {
            config,
            current_strategy: Strategy::Default,
            last_trigger_reason: INITIAL_REASON.to_string(),
            tick_counter: 0,
            weights: StrategyTable::splat(1.0),
            history: Vec::new(),
            failure_tracker: BTreeMap::new(),
            active_optimizations: BTreeMap::new(),
            events: Vec::new(),
            now: 0.0,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn current_strategy(&self) -> Strategy {
        self.current_strategy
    }

    pub fn last_trigger_reason(&self) -> &str {
        &self.last_trigger_reason
    }

    pub fn tick_counter(&self) -> u64 {
        self.tick_counter
    }

    pub fn strategy_weights(&self) -> &StrategyTable<f64> {
        &self.weights
    }

    /// Samples collected in the current learning window.
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Number of actions with a remembered failure.
    pub fn failure_count(&self) -> usize {
        self.failure_tracker.len()
    }

    /// Time of the last failure of `action`, if remembered.
    pub fn last_failure(&self, action: &str) -> Option<f64> {
        self.failure_tracker.get(action).copied()
    }

    /// True if `action` is still inside the cooldown of an earlier success
    /// at time `now`.
    pub fn is_active(&self, action: &str, now: f64) -> bool {
        self.active_optimizations
            .get(action)
            .is_some_and(|expiry| now < *expiry)
    }

    /// Events emitted since the last drain.
    pub fn events(&self) -> &[AgentEvent] {
        &self.events
    }

    pub fn drain_events(&mut self) -> Vec<AgentEvent> {
        std::mem::take(&mut self.events)
    }

    /// Run one full decision tick against `host`. Never fails: faults are
    /// reported as [`AgentEvent::AppCrash`] and the next call starts afresh.
    pub fn main_loop_step<H: Host + ?Sized>(&mut self, host: &mut H) {
        self.tick_counter += 1;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.run_step(host)));
        let crash = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(err)) => crash_from_error(&err),
            Err(payload) => crash_from_panic(payload.as_ref()),
        };
        self.emit(AgentEvent::AppCrash(crash));
    }

    fn run_step<H: Host + ?Sized>(&mut self, host: &mut H) -> Result<(), StepError> {
        let snapshot = host.snapshot()?;
        snapshot.validate()?;
        self.strategic_assessment(&snapshot, host);
        self.tactical_maneuver(&snapshot, host);
        self.reflexive_response(&snapshot, host);
        if self.tick_counter.checked_rem(self.config.learning_interval) == Some(0) {
            self.learning_cycle();
        }
        Ok(())
    }

    /// Score strategies, switch if another one wins, and record a sample.
    pub fn strategic_assessment<E: ActionExecutor + ?Sized>(
        &mut self,
        snapshot: &Snapshot,
        executor: &mut E,
    ) -> Assessment {
        self.now = snapshot.timestamp;
        let assessment = score_strategies(snapshot, &self.weights, self.config.high_io_threshold);
        debug!(winner = %assessment.winner, scores = ?assessment.scores, "strategies scored");

        if assessment.winner != self.current_strategy {
            self.current_strategy = assessment.winner;
            self.last_trigger_reason = assessment.reason.clone();
            self.emit(AgentEvent::StrategyApplied(StrategyApplied {
                new_strategy: assessment.winner,
                reason: assessment.reason.clone(),
                score: assessment.winning_score(),
            }));
            self.apply_strategy(executor);
        }

        self.history.push(PerformanceSample {
            strategy: self.current_strategy,
            cpu: snapshot.cpu_percent,
            io_wait: snapshot.io_wait,
            failures: self.failure_tracker.len(),
        });
        assessment
    }

    /// Request the governor that matches the current strategy.
    pub fn apply_strategy<E: ActionExecutor + ?Sized>(&mut self, executor: &mut E) -> ActionOutcome {
        let action = Action::SetGovernor {
            governor: self.current_strategy.governor(),
        };
        let cooldown = self.config.default_cooldown;
        self.perform_action(executor, action, cooldown)
    }

    /// Proactively renice when CPU load is high.
    pub fn tactical_maneuver<E: ActionExecutor + ?Sized>(
        &mut self,
        snapshot: &Snapshot,
        executor: &mut E,
    ) -> Option<ActionOutcome> {
        self.now = snapshot.timestamp;
        if snapshot.cpu_percent <= self.config.tactical_cpu_threshold {
            return None;
        }
        self.emit(AgentEvent::TacticalBoost(TacticalBoost {
            reason: format!("High CPU Load ({:.0}%) detected", snapshot.cpu_percent),
            cpu_percent: snapshot.cpu_percent,
        }));
        let cooldown = self.config.renice_cooldown;
        Some(self.perform_action(executor, Action::ReniceHighCpu, cooldown))
    }

    /// Respond to critical memory pressure, escalating to a kill when cache
    /// eviction failed within the failure-memory window.
    pub fn reflexive_response<E: ActionExecutor + ?Sized>(
        &mut self,
        snapshot: &Snapshot,
        executor: &mut E,
    ) -> Option<ActionOutcome> {
        self.now = snapshot.timestamp;
        if snapshot.mem_percent <= self.config.reflex_mem_threshold {
            return None;
        }
        self.emit(AgentEvent::ReflexTriggered(ReflexTriggered {
            reason: format!("Critical Memory Pressure ({:.0}%)", snapshot.mem_percent),
            mem_percent: snapshot.mem_percent,
        }));

        if self.failed_recently(Action::DropCaches.name()) {
            self.emit(AgentEvent::EmergencyAction(EmergencyAction {
                action: Action::KillMostMemProc,
                reason: "drop_caches failed recently".to_string(),
            }));
            let cooldown = self.config.default_cooldown;
            Some(self.perform_action(executor, Action::KillMostMemProc, cooldown))
        } else {
            let cooldown = self.config.drop_caches_cooldown;
            Some(self.perform_action(executor, Action::DropCaches, cooldown))
        }
    }

    fn failed_recently(&self, action: &str) -> bool {
        self.failure_tracker
            .get(action)
            .is_some_and(|failed_at| self.now - failed_at < self.config.failure_memory)
    }

    /// Execute `action` unless it is still cooling down from an earlier
    /// success. Failures are remembered, never propagated.
    pub fn perform_action<E: ActionExecutor + ?Sized>(
        &mut self,
        executor: &mut E,
        action: Action,
        cooldown: f64,
    ) -> ActionOutcome {
        if self.is_active(action.name(), self.now) {
            debug!(%action, "action still active, skipped");
            return ActionOutcome::Debounced;
        }
        match executor.execute(&action) {
            Ok(()) => {
                self.active_optimizations
                    .insert(action.name().to_string(), self.now + cooldown);
                self.emit(AgentEvent::ActionSuccess(ActionSuccess { action }));
                ActionOutcome::Succeeded
            }
            Err(err) => {
                self.failure_tracker
                    .insert(action.name().to_string(), self.now);
                self.emit(AgentEvent::ActionFailure(ActionFailure {
                    action,
                    error: err.to_string(),
                }));
                ActionOutcome::Failed(err)
            }
        }
    }

    /// Reweight the most-used strategy of the current window, then start a
    /// fresh window. Does nothing on an empty window.
    pub fn learning_cycle(&mut self) -> Option<LearningCycle> {
        if self.history.is_empty() {
            return None;
        }
        let n = self.history.len() as f64;
        let avg_cpu = self.history.iter().map(|p| p.cpu).sum::<f64>() / n;
        let max_io_wait = self
            .history
            .iter()
            .map(|p| p.io_wait)
            .fold(f64::NEG_INFINITY, f64::max);
        let failure_samples = self.history.iter().filter(|p| p.failures > 0).count();

        let mut usage = StrategyTable::splat(0usize);
        for p in &self.history {
            usage[p.strategy] += 1;
        }
        let most_used = usage.argmax();

        let cfg = &self.config;
        let poor = avg_cpu > cfg.poor_avg_cpu
            || max_io_wait > cfg.poor_max_io_wait
            || failure_samples > cfg.tolerated_failure_samples;
        let old_weight = self.weights[most_used];
        let (verdict, new_weight) = if poor {
            (
                Verdict::Penalized,
                (old_weight * cfg.penalty_factor).max(cfg.weight_floor),
            )
        } else {
            (
                Verdict::Rewarded,
                (old_weight * cfg.reward_factor).min(cfg.weight_cap),
            )
        };
        self.weights[most_used] = new_weight;

        let cycle = LearningCycle {
            avg_cpu,
            max_io_wait,
            failure_samples,
            adjustment: WeightAdjustment {
                strategy: most_used,
                verdict,
                old_weight,
                new_weight,
            },
        };
        self.emit(AgentEvent::LearningCycle(cycle.clone()));
        self.history.clear();
        self.failure_tracker.clear();
        Some(cycle)
    }

    fn emit(&mut self, event: AgentEvent) {
        match &event {
            AgentEvent::ActionFailure(_) => warn!(kind = event.kind(), "{event}"),
            AgentEvent::AppCrash(c) => error!(kind = event.kind(), trace = ?c.trace, "{event}"),
            _ => info!(kind = event.kind(), "{event}"),
        }
        self.events.push(event);
    }
}

impl Default for DecisionAgent {
    fn default() -> Self {
        Self::new(AgentConfig::default())
    }
}

fn crash_from_error(err: &StepError) -> AppCrash {
    let mut trace = vec![err.to_string()];
    let mut source = err.source();
    while let Some(cause) = source {
        trace.push(cause.to_string());
        source = cause.source();
    }
    AppCrash {
        reason: trace.join(": "),
        trace,
    }
}

fn crash_from_panic(payload: &(dyn Any + Send)) -> AppCrash {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    AppCrash {
        reason: format!("panic during step: {message}"),
        trace: vec![message],
    }
}
