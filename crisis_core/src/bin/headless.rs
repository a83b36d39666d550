use std::env;
use std::process::ExitCode;

use tracing::{error, info, warn};

use crisis_core::{
    load_scenario_from_env, load_simulation_config_from_env, run_tick, try_build_headless_app,
    SimulationMetrics, SimulationWorld, WarningBoard,
};

const DEFAULT_TICKS: u64 = 10;

fn requested_ticks() -> u64 {
    let raw = env::args()
        .nth(1)
        .or_else(|| env::var("CRISIS_TICKS").ok());
    match raw {
        Some(value) => value.parse().unwrap_or_else(|err| {
            warn!(
                target: "crisis_core::config",
                value = %value,
                error = %err,
                "ticks.parse_failed"
            );
            DEFAULT_TICKS
        }),
        None => DEFAULT_TICKS,
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let (config, _) = load_simulation_config_from_env();
    let (scenario, _) = load_scenario_from_env();
    let ticks = requested_ticks();

    let mut app = match try_build_headless_app((*config).clone(), &scenario) {
        Ok(app) => app,
        Err(err) => {
            error!(target: "crisis_core::config", error = %err, "scenario.build_failed");
            return ExitCode::FAILURE;
        }
    };

    info!(
        grid_width = config.grid_width,
        grid_height = config.grid_height,
        level = %config.level,
        ticks,
        "crisis headless run starting"
    );

    for _ in 0..ticks {
        run_tick(&mut app);
        let metrics = app.world.resource::<SimulationMetrics>();
        info!(
            target: "crisis_core::tick",
            tick = metrics.tick,
            severe = metrics.severe_crises,
            affected_tiles = metrics.affected_tiles,
            transitions = metrics.tier_transitions,
            "crisis.tick_metrics"
        );
    }

    let warnings: Vec<String> = app
        .world
        .resource::<WarningBoard>()
        .visible()
        .map(str::to_string)
        .collect();
    let summary = app.world.resource::<SimulationWorld>().summary();
    match serde_json::to_string_pretty(&summary) {
        Ok(json) => println!("{json}"),
        Err(err) => {
            error!(error = %err, "summary.serialize_failed");
            return ExitCode::FAILURE;
        }
    }
    info!(warnings = ?warnings, "crisis headless run finished");
    ExitCode::SUCCESS
}
