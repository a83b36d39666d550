//! Causal crisis simulation core.
//!
//! Status and crisis variables feed each other through linear causes, every
//! crisis carries a four-tier state machine resolved by a bounded settle loop,
//! and severe crises spread a connected footprint over a tile map. The whole
//! pipeline runs once per [`run_tick`].

pub mod causes;
pub mod definitions;
mod hashing;
pub mod metrics;
pub mod presentation;
pub mod region;
mod resources;
pub mod state_machine;
mod systems;
pub mod tiles;
pub mod topology;
pub mod variables;
mod world;

use bevy::prelude::*;

pub use causes::{contribution, CausalGraph, Cause};
pub use definitions::{
    load_scenario_from_env, ConfigSource, DefinitionError, LevelSeed, ScenarioDefinition,
};
pub use hashing::StateDigest;
pub use metrics::SimulationMetrics;
pub use presentation::{NullObserver, TierNotice, TierNoticeKind, TierObserver, WarningBoard};
pub use region::{
    target_tile_count, RandomSource, ReconcileReport, RegionExpander, SelectionShortfall,
};
pub use resources::{
    load_simulation_config_from_env, LastTickReport, SimulationConfig, SimulationConfigError,
    SimulationTick,
};
pub use state_machine::{Guard, MachineError, StateMachine, StateMachineDefinition};
pub use tiles::{Biome, FootprintEntry, GridError, Tile, TileGrid, TileMap};
pub use topology::{CrisisGuard, CrisisMachines, GuardGraph, SettleOutcome};
pub use variables::{
    CrisisCategory, CrisisId, LookupError, StatusId, TierIndex, VariableRef, VariableRegistry,
    SEVERE_TIER, TIER_COUNT,
};
pub use world::{CrisisSummary, SimulationWorld, TickReport};

/// Construct a Bevy [`App`] with the builtin scenario and default configuration.
pub fn build_headless_app() -> App {
    try_build_headless_app(SimulationConfig::default(), &ScenarioDefinition::builtin())
        .expect("builtin scenario should build a world")
}

/// Construct a Bevy [`App`] running the crisis tick pipeline for `scenario`.
pub fn try_build_headless_app(
    config: SimulationConfig,
    scenario: &ScenarioDefinition,
) -> Result<App, DefinitionError> {
    let mut board = WarningBoard::with_history(config.notice_history_limit);
    let world = SimulationWorld::from_config(scenario, &config, &mut board)?;

    let mut app = App::new();
    app.insert_resource(config)
        .insert_resource(world)
        .insert_resource(board)
        .insert_resource(SimulationTick::default())
        .insert_resource(SimulationMetrics::default())
        .insert_resource(LastTickReport::default())
        .add_plugins(MinimalPlugins)
        .add_systems(
            Update,
            (
                systems::tick_status_values,
                systems::tick_crisis_values,
                systems::settle_crisis_states,
                systems::reconcile_crisis_tiles,
                systems::advance_tick,
                metrics::collect_metrics,
            )
                .chain(),
        );

    Ok(app)
}

/// Execute a single simulation tick.
///
/// Runs the chained systems configured in [`try_build_headless_app`]
/// (statuses → crises → settle → tile reconcile → tick increment → metrics).
pub fn run_tick(app: &mut App) {
    app.update();
}
