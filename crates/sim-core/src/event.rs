//! Typed event stream emitted by the decision agent.
//!
//! Every kind of event has its own payload struct. Renderers match
//! exhaustively on [`AgentEvent`], so adding a kind is a compile error at
//! every presentation site until it is handled.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Action, Strategy};

/// The agent switched strategy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StrategyApplied {
    pub new_strategy: Strategy,
    pub reason: String,
    /// Weighted score of the winning strategy.
    pub score: f64,
}

/// Proactive response to sustained CPU load.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TacticalBoost {
    pub reason: String,
    pub cpu_percent: f64,
}

/// Immediate response to a critical memory reading.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReflexTriggered {
    pub reason: String,
    pub mem_percent: f64,
}

/// The gentle remediation failed recently; going destructive.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmergencyAction {
    pub action: Action,
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionSuccess {
    pub action: Action,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionFailure {
    pub action: Action,
    pub error: String,
}

/// A tick was aborted by an internal fault.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AppCrash {
    pub reason: String,
    /// Cause chain, outermost first.
    pub trace: Vec<String>,
}

/// Direction of a learning-cycle weight change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Penalized,
    Rewarded,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WeightAdjustment {
    pub strategy: Strategy,
    pub verdict: Verdict,
    pub old_weight: f64,
    pub new_weight: f64,
}

/// Summary of one learning window.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LearningCycle {
    pub avg_cpu: f64,
    pub max_io_wait: f64,
    pub failure_samples: usize,
    pub adjustment: WeightAdjustment,
}

/// Everything the agent reports to the outside world.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "details", rename_all = "snake_case")]
pub enum AgentEvent {
    StrategyApplied(StrategyApplied),
    TacticalBoost(TacticalBoost),
    ReflexTriggered(ReflexTriggered),
    EmergencyAction(EmergencyAction),
    ActionSuccess(ActionSuccess),
    ActionFailure(ActionFailure),
    AppCrash(AppCrash),
    LearningCycle(LearningCycle),
}

impl AgentEvent {
    /// Snake-case kind, identical to the serialized tag.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentEvent::StrategyApplied(_) => "strategy_applied",
            AgentEvent::TacticalBoost(_) => "tactical_boost",
            AgentEvent::ReflexTriggered(_) => "reflex_triggered",
            AgentEvent::EmergencyAction(_) => "emergency_action",
            AgentEvent::ActionSuccess(_) => "action_success",
            AgentEvent::ActionFailure(_) => "action_failure",
            AgentEvent::AppCrash(_) => "app_crash",
            AgentEvent::LearningCycle(_) => "learning_cycle",
        }
    }
}

impl fmt::Display for AgentEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentEvent::StrategyApplied(e) => write!(
                f,
                "Strategy set to {} (Score: {:.0}). Reason: {}",
                e.new_strategy.name().replace('_', " "),
                e.score,
                e.reason
            ),
            AgentEvent::TacticalBoost(e) => write!(
                f,
                "Tactical Boost: Proactively managing resources. Reason: {}",
                e.reason
            ),
            AgentEvent::ReflexTriggered(e) => {
                write!(f, "Reflex Action Triggered! Reason: {}", e.reason)
            }
            AgentEvent::EmergencyAction(e) => {
                write!(f, "Escalation! Running {}. Reason: {}", e.action, e.reason)
            }
            AgentEvent::ActionSuccess(e) => {
                write!(f, "Action '{}' executed successfully.", e.action)
            }
            AgentEvent::ActionFailure(e) => {
                write!(f, "Action '{}' failed! Error: {}", e.action, e.error)
            }
            AgentEvent::AppCrash(e) => write!(f, "CRITICAL ERROR: {}", e.reason),
            AgentEvent::LearningCycle(e) => {
                let a = &e.adjustment;
                let verb = match a.verdict {
                    Verdict::Penalized => "Reduced",
                    Verdict::Rewarded => "Increased",
                };
                write!(
                    f,
                    "Learning cycle (avg CPU {:.1}%, max I/O {:.1}%, failure samples {}): \
                     {} weight for {} {:.3} -> {:.3}",
                    e.avg_cpu,
                    e.max_io_wait,
                    e.failure_samples,
                    verb,
                    a.strategy,
                    a.old_weight,
                    a.new_weight
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Governor;

    #[test]
    fn serialized_tag_matches_kind() {
        let events = vec![
            AgentEvent::StrategyApplied(StrategyApplied {
                new_strategy: Strategy::Gaming,
                reason: "Gaming session".into(),
                score: 70.0,
            }),
            AgentEvent::ActionSuccess(ActionSuccess {
                action: Action::SetGovernor {
                    governor: Governor::Performance,
                },
            }),
            AgentEvent::AppCrash(AppCrash {
                reason: "boom".into(),
                trace: vec!["boom".into()],
            }),
        ];
        for ev in events {
            let v = serde_json::to_value(&ev).unwrap();
            assert_eq!(v["event"], ev.kind());
            assert!(v["details"].is_object());
        }
    }

    #[test]
    fn strategy_applied_renders_like_a_log_line() {
        let ev = AgentEvent::StrategyApplied(StrategyApplied {
            new_strategy: Strategy::PowerSave,
            reason: "Low system activity".into(),
            score: 50.4,
        });
        assert_eq!(
            ev.to_string(),
            "Strategy set to POWER SAVE (Score: 50). Reason: Low system activity"
        );
    }

    #[test]
    fn learning_cycle_renders_direction() {
        let ev = AgentEvent::LearningCycle(LearningCycle {
            avg_cpu: 85.0,
            max_io_wait: 10.0,
            failure_samples: 0,
            adjustment: WeightAdjustment {
                strategy: Strategy::Gaming,
                verdict: Verdict::Penalized,
                old_weight: 1.0,
                new_weight: 0.95,
            },
        });
        let line = ev.to_string();
        assert!(line.contains("Reduced weight for GAMING"));
        assert!(line.contains("1.000 -> 0.950"));
    }

    #[test]
    fn json_roundtrip_keeps_payload() {
        let ev = AgentEvent::ActionFailure(ActionFailure {
            action: Action::DropCaches,
            error: "stress".into(),
        });
        let s = serde_json::to_string(&ev).unwrap();
        let back: AgentEvent = serde_json::from_str(&s).unwrap();
        assert_eq!(back, ev);
    }
}
