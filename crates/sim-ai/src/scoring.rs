//! Strategy scoring.

use sim_core::{Snapshot, Strategy, StrategyTable};

const DEFAULT_BASE: f64 = 10.0;
const GAME_LAUNCHER_BONUS: f64 = 60.0;
const STREAMING_BONUS: f64 = 20.0;
const CREATIVE_SUITE_BONUS: f64 = 50.0;
const HEAVY_CPU_BONUS: f64 = 15.0;
const BUSY_CPU_BONUS: f64 = 10.0;
const IDLE_BONUS: f64 = 40.0;

const HEAVY_CPU: f64 = 75.0;
const BUSY_CPU: f64 = 50.0;
const IDLE_CPU: f64 = 20.0;
const IDLE_MAX_APPS: usize = 5;

/// Multipliers applied to performance strategies while the disk is saturated.
pub const GAMING_IO_DAMPING: f64 = 0.5;
pub const WORKSTATION_IO_DAMPING: f64 = 0.7;

const GAME_LAUNCHERS: [&str; 2] = ["steam", "lutris"];
const CREATIVE_SUITES: [&str; 2] = ["kdenlive", "blender"];
const STREAMING: &str = "obs";

/// Result of scoring every strategy against one snapshot.
#[derive(Clone, Debug, PartialEq)]
pub struct Assessment {
    /// Scores from app and CPU rules alone.
    pub raw: StrategyTable<f64>,
    /// Final scores after I/O damping and learned weights.
    pub scores: StrategyTable<f64>,
    pub winner: Strategy,
    /// Why the winner won, including any I/O note.
    pub reason: String,
}

impl Assessment {
    pub fn winning_score(&self) -> f64 {
        self.scores[self.winner]
    }
}

fn cpu_bonus(cpu: f64) -> f64 {
    if cpu > HEAVY_CPU {
        HEAVY_CPU_BONUS
    } else if cpu > BUSY_CPU {
        BUSY_CPU_BONUS
    } else {
        0.0
    }
}

/// Rule scores before damping and weighting.
pub fn raw_scores(snapshot: &Snapshot) -> StrategyTable<f64> {
    let mut raw = StrategyTable::splat(0.0);
    raw[Strategy::Default] = DEFAULT_BASE;

    if snapshot.any_running(&GAME_LAUNCHERS) {
        raw[Strategy::Gaming] += GAME_LAUNCHER_BONUS;
    }
    if snapshot.is_running(STREAMING) {
        raw[Strategy::Gaming] += STREAMING_BONUS;
        raw[Strategy::Workstation] += STREAMING_BONUS;
    }
    if snapshot.any_running(&CREATIVE_SUITES) {
        raw[Strategy::Workstation] += CREATIVE_SUITE_BONUS;
    }
    let bonus = cpu_bonus(snapshot.cpu_percent);
    raw[Strategy::Gaming] += bonus;
    raw[Strategy::Workstation] += bonus;

    if snapshot.cpu_percent < IDLE_CPU && snapshot.running_apps.len() < IDLE_MAX_APPS {
        raw[Strategy::PowerSave] += IDLE_BONUS;
    }
    raw
}

/// Score all strategies and pick a winner (first maximal in
/// [`Strategy::ALL`] order).
pub fn score_strategies(
    snapshot: &Snapshot,
    weights: &StrategyTable<f64>,
    high_io_threshold: f64,
) -> Assessment {
    let raw = raw_scores(snapshot);
    let mut scores = raw;

    let io_note = if snapshot.io_wait > high_io_threshold {
        scores[Strategy::Gaming] *= GAMING_IO_DAMPING;
        scores[Strategy::Workstation] *= WORKSTATION_IO_DAMPING;
        format!(" (High I/O: {:.0}%)", snapshot.io_wait)
    } else {
        String::new()
    };

    for s in Strategy::ALL {
        scores[s] *= weights[s];
    }

    let winner = scores.argmax();
    Assessment {
        raw,
        scores,
        winner,
        reason: format!("{}{}", winner.reason_label(), io_note),
    }
}
