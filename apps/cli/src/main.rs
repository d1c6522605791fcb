#![deny(warnings)]

//! Headless CLI: runs the load sandbox and renders the dashboard each tick.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use sim_core::{validate_config, SandboxConfig, Strategy};
use sim_runtime::{DashboardSnapshot, EventJournal, EventRecord, Scenario};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

const DEFAULT_SCENARIO: &str = "tour";
/// Ticks run after the last scenario step so the agent can settle.
const SETTLE_TICKS: u64 = 5;

#[derive(Debug, Default)]
struct Args {
    scenario: Option<String>,
    ticks: Option<u64>,
    seed: Option<u64>,
    config: Option<PathBuf>,
    json: bool,
    version: bool,
}

fn parse_args() -> Result<Args> {
    let mut args = Args::default();
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--scenario" => args.scenario = it.next(),
            "--ticks" => {
                let v = it.next().context("--ticks needs a value")?;
                args.ticks = Some(v.parse().with_context(|| format!("bad --ticks `{v}`"))?);
            }
            "--seed" => {
                let v = it.next().context("--seed needs a value")?;
                args.seed = Some(v.parse().with_context(|| format!("bad --seed `{v}`"))?);
            }
            "--config" => args.config = it.next().map(PathBuf::from),
            "--json" => args.json = true,
            "--version" => args.version = true,
            other => bail!("unknown argument `{other}`"),
        }
    }
    Ok(args)
}

fn version_line() -> String {
    format!(
        "load-sandbox {} ({} {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_SHA"),
        env!("BUILD_DATE")
    )
}

fn load_config(args: &Args) -> Result<SandboxConfig> {
    let mut cfg = match &args.config {
        Some(path) => SandboxConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => SandboxConfig::default(),
    };
    if let Some(seed) = args.seed {
        cfg.env.rng_seed = seed;
    }
    validate_config(&cfg).context("validating config")?;
    Ok(cfg)
}

fn render_dashboard(d: &DashboardSnapshot) {
    let apps: Vec<String> = d
        .running_apps
        .iter()
        .map(|(app, state)| format!("{app}({state})"))
        .collect();
    let weights: Vec<String> = Strategy::ALL
        .iter()
        .map(|s| format!("{}={:.2}", s, d.weights[*s]))
        .collect();
    println!(
        "[t={:>3}] CPU {:>5.1}% | MEM {:>5.1}% | IO {:>5.1}% | stress {:.2} | gov {} | strategy {} | failures {}",
        d.tick,
        d.cpu,
        d.mem,
        d.io_wait,
        d.stress_factor,
        d.governor,
        d.strategy,
        d.failure_count
    );
    println!("        apps: {}", apps.join(", "));
    println!("        trigger: {} | weights: {}", d.last_trigger_reason, weights.join(" "));
}

fn render_event(r: &EventRecord, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(r)?);
    } else {
        println!("        [{:>6.1}s] {}", r.timestamp, r.event);
    }
    Ok(())
}

fn main() -> Result<()> {
    // Logging setup
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_max_level(Level::INFO)
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args()?;
    if args.version {
        println!("{}", version_line());
        return Ok(());
    }
    info!(?args, "starting CLI");

    let cfg = load_config(&args)?;
    let scenario_name = args.scenario.as_deref().unwrap_or(DEFAULT_SCENARIO);
    let scenario = Scenario::load(scenario_name)
        .with_context(|| format!("loading scenario `{scenario_name}`"))?;
    let ticks = args
        .ticks
        .unwrap_or_else(|| scenario.duration() + SETTLE_TICKS);

    let started = Utc::now();
    let mut world = sim_runtime::init_world(cfg).context("initializing sandbox")?;
    sim_runtime::schedule_scenario(&mut world, &scenario);
    if !args.json {
        println!("{}", version_line());
        println!(
            "Scenario `{}`: {} ({} ticks, started {})",
            scenario.name,
            scenario.description.trim(),
            ticks,
            started.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }

    let mut last = sim_runtime::dashboard(&world);
    for _ in 0..ticks {
        last = sim_runtime::run_ticks(&mut world, 1);
        let events = world.resource_mut::<EventJournal>().drain();
        let fired = world.resource::<sim_runtime::ScenarioQueue>().last_fired();
        if args.json {
            println!("{}", serde_json::to_string(&last)?);
        } else {
            for op in fired {
                println!(">>> {op}");
            }
            render_dashboard(&last);
        }
        for record in &events {
            render_event(record, args.json)?;
        }
    }

    let journal = world.resource::<EventJournal>();
    let elapsed = Utc::now() - started;
    if args.json {
        println!("{}", serde_json::to_string(&journal.counts())?);
    } else {
        println!(
            "Summary | ticks: {} | final strategy: {} | governor: {} | events: {} | wall time: {} ms",
            last.tick,
            last.strategy,
            last.governor,
            journal.total(),
            elapsed.num_milliseconds()
        );
        for (kind, n) in journal.counts() {
            println!("  {kind}: {n}");
        }
    }
    Ok(())
}
