use bevy::prelude::*;
use tracing::debug;

use crate::presentation::WarningBoard;
use crate::resources::{LastTickReport, SimulationTick};
use crate::world::{SimulationWorld, TickReport};

/// Recompute every status variable from the causal graph.
pub fn tick_status_values(
    mut world: ResMut<SimulationWorld>,
    mut report: ResMut<LastTickReport>,
) {
    report.0 = TickReport::default();
    report.0.statuses_updated = world.tick_status();
}

/// Recompute every crisis variable; statuses are already at this tick's values.
pub fn tick_crisis_values(
    mut world: ResMut<SimulationWorld>,
    mut report: ResMut<LastTickReport>,
) {
    report.0.crises_updated = world.tick_crisis();
}

pub fn settle_crisis_states(
    mut world: ResMut<SimulationWorld>,
    mut board: ResMut<WarningBoard>,
    mut report: ResMut<LastTickReport>,
) {
    report.0.settle = world.settle_states(&mut *board);
}

/// Grow or shrink the footprint of every crisis that ticked in a severe tier.
pub fn reconcile_crisis_tiles(
    mut world: ResMut<SimulationWorld>,
    mut report: ResMut<LastTickReport>,
) {
    report.0.reconciled = world.reconcile_manifested();
}

pub fn advance_tick(mut tick: ResMut<SimulationTick>, report: Res<LastTickReport>) {
    tick.0 = tick.0.wrapping_add(1);
    debug!(
        target: "crisis_core::tick",
        tick = tick.0,
        statuses = report.0.statuses_updated,
        crises = report.0.crises_updated,
        transitions = report.0.settle.transitions,
        reconciled = report.0.reconciled.len(),
        "crisis.tick_completed"
    );
}
