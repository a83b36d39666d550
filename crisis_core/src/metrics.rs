use bevy::prelude::*;

use crate::presentation::WarningBoard;
use crate::resources::{LastTickReport, SimulationTick};
use crate::tiles::TileMap;
use crate::world::SimulationWorld;

#[derive(Resource, Default, Debug, Clone, PartialEq)]
pub struct SimulationMetrics {
    pub tick: u64,
    pub crisis_count: usize,
    pub severe_crises: usize,
    pub visible_warnings: usize,
    pub mean_crisis_value: f64,
    pub affected_tiles: usize,
    pub playable_tiles: usize,
    pub settle_passes: usize,
    pub tier_transitions: usize,
    pub settle_capped: bool,
    pub tiles_added: usize,
    pub tiles_removed: usize,
    pub selection_shortfalls: usize,
}

pub fn collect_metrics(
    tick: Res<SimulationTick>,
    world: Res<SimulationWorld>,
    board: Res<WarningBoard>,
    report: Res<LastTickReport>,
    mut metrics: ResMut<SimulationMetrics>,
) {
    let crises = world.registry().crises();
    metrics.tick = tick.0;
    metrics.crisis_count = crises.len();
    metrics.severe_crises = world.severe_crises().len();
    metrics.visible_warnings = board.visible_count();
    metrics.mean_crisis_value = if crises.is_empty() {
        0.0
    } else {
        crises.iter().map(|crisis| crisis.value()).sum::<f64>() / crises.len() as f64
    };
    metrics.affected_tiles = world
        .grid()
        .tiles()
        .filter(|tile| !tile.footprint().is_empty())
        .count();
    metrics.playable_tiles = world.grid().total_playable();

    let report = &report.0;
    metrics.settle_passes = report.settle.passes;
    metrics.tier_transitions = report.settle.transitions;
    metrics.settle_capped = report.settle.capped;
    metrics.tiles_added = report.reconciled.iter().map(|r| r.added.len()).sum();
    metrics.tiles_removed = report.reconciled.iter().map(|r| r.removed.len()).sum();
    metrics.selection_shortfalls = report
        .reconciled
        .iter()
        .filter(|r| r.shortfall.is_some())
        .count();
}
