use std::collections::HashSet;

use bevy::math::UVec2;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, warn};

use crate::tiles::{FootprintEntry, TileMap};
use crate::variables::{CrisisCategory, CrisisId, LookupError, SEVERE_TIER};

/// Injectable source of uniform picks.
pub trait RandomSource {
    /// Uniform integer in `0..n`. Callers never pass `n == 0`.
    fn uniform_int(&mut self, n: usize) -> usize;
}

impl RandomSource for ChaCha8Rng {
    fn uniform_int(&mut self, n: usize) -> usize {
        self.gen_range(0..n)
    }
}

/// Footprint size for a crisis value: zero tiles at the tier-2 threshold, the whole
/// map at 100. `None` while the value sits below the tier-2 threshold.
pub fn target_tile_count(value: f64, thresholds: &[f64; 3], total_tiles: usize) -> Option<usize> {
    let floor = thresholds[SEVERE_TIER - 1];
    let clamped = value.clamp(0.0, 100.0);
    if clamped < floor {
        return None;
    }
    let span = 100.0 - floor;
    if span <= 0.0 {
        return Some(total_tiles);
    }
    let target = ((clamped - floor) / span * total_tiles as f64).floor();
    if target < 0.0 {
        return None;
    }
    Some((target as usize).min(total_tiles))
}

/// Growth ran out of candidate tiles before reaching its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionShortfall {
    pub requested: usize,
    pub missing: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileReport {
    pub crisis: CrisisId,
    pub target: usize,
    pub before: usize,
    pub after: usize,
    pub added: Vec<UVec2>,
    pub removed: Vec<UVec2>,
    pub glyphs_set: usize,
    pub glyphs_cleared: usize,
    pub shortfall: Option<SelectionShortfall>,
}

impl ReconcileReport {
    fn new(crisis: CrisisId, target: usize, before: usize) -> Self {
        Self {
            crisis,
            target,
            before,
            after: before,
            added: Vec::new(),
            removed: Vec::new(),
            glyphs_set: 0,
            glyphs_cleared: 0,
            shortfall: None,
        }
    }

    pub fn changed(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }
}

/// Grows and shrinks one crisis footprint at a time on a borrowed map.
pub struct RegionExpander<'a, M: TileMap + ?Sized, R: RandomSource + ?Sized> {
    map: &'a mut M,
    rng: &'a mut R,
}

impl<'a, M: TileMap + ?Sized, R: RandomSource + ?Sized> RegionExpander<'a, M, R> {
    pub fn new(map: &'a mut M, rng: &'a mut R) -> Self {
        Self { map, rng }
    }

    /// Tiles currently carrying `crisis`, row-major.
    pub fn crisis_tiles(&self, crisis: CrisisId) -> Vec<UVec2> {
        self.map
            .playable_positions()
            .into_iter()
            .filter(|&position| {
                self.map
                    .tile(position)
                    .map_or(false, |tile| tile.contains(crisis))
            })
            .collect()
    }

    /// Brings the footprint of `crisis` to the size its value calls for.
    ///
    /// Returns `Ok(None)` when the value is below the manifest threshold.
    pub fn reconcile(
        &mut self,
        crisis: CrisisId,
        name: &str,
        category: CrisisCategory,
        value: f64,
        thresholds: &[f64; 3],
    ) -> Result<Option<ReconcileReport>, LookupError> {
        let Some(target) = target_tile_count(value, thresholds, self.map.total_playable()) else {
            return Ok(None);
        };
        let current = self.crisis_tiles(crisis);
        let mut report = ReconcileReport::new(crisis, target, current.len());

        if target > current.len() {
            self.grow(crisis, category, current, target, &mut report)?;
        } else if target < current.len() {
            self.shrink(crisis, category, current, target, &mut report)?;
        }

        debug!(
            target: "crisis_core::region",
            crisis = %name,
            target = report.target,
            before = report.before,
            after = report.after,
            "crisis.region_reconciled"
        );
        if let Some(shortfall) = report.shortfall {
            warn!(
                target: "crisis_core::region",
                crisis = %name,
                requested = shortfall.requested,
                missing = shortfall.missing,
                "crisis.region_selection_shortfall"
            );
        }
        Ok(Some(report))
    }

    fn grow(
        &mut self,
        crisis: CrisisId,
        category: CrisisCategory,
        current: Vec<UVec2>,
        target: usize,
        report: &mut ReconcileReport,
    ) -> Result<(), LookupError> {
        let requested = target - current.len();
        let mut assigned: HashSet<UVec2> = current.iter().copied().collect();
        let mut frontier = Vec::new();
        let mut queued = HashSet::new();
        for &position in &current {
            self.extend_frontier(position, &assigned, &mut frontier, &mut queued);
        }

        for step in 0..requested {
            let pick = if assigned.is_empty() || frontier.is_empty() {
                // first tile, or a disconnected remainder: draw from the whole map
                let pool: Vec<UVec2> = self
                    .map
                    .playable_positions()
                    .into_iter()
                    .filter(|position| !assigned.contains(position))
                    .collect();
                if pool.is_empty() {
                    report.shortfall = Some(SelectionShortfall {
                        requested,
                        missing: requested - step,
                    });
                    break;
                }
                pool[self.rng.uniform_int(pool.len())]
            } else {
                let index = self.rng.uniform_int(frontier.len());
                let position = frontier.swap_remove(index);
                queued.remove(&position);
                position
            };

            if self.assign(pick, crisis, category)? {
                report.glyphs_set += 1;
            }
            assigned.insert(pick);
            report.added.push(pick);
            self.extend_frontier(pick, &assigned, &mut frontier, &mut queued);
        }

        report.after = assigned.len();
        Ok(())
    }

    fn extend_frontier(
        &self,
        position: UVec2,
        assigned: &HashSet<UVec2>,
        frontier: &mut Vec<UVec2>,
        queued: &mut HashSet<UVec2>,
    ) {
        for neighbor in self.map.neighbors(position) {
            if !assigned.contains(&neighbor) && queued.insert(neighbor) {
                frontier.push(neighbor);
            }
        }
    }

    fn shrink(
        &mut self,
        crisis: CrisisId,
        category: CrisisCategory,
        current: Vec<UVec2>,
        target: usize,
        report: &mut ReconcileReport,
    ) -> Result<(), LookupError> {
        let mut assigned = current;
        while assigned.len() > target {
            let border = self.border(&assigned);
            // a finite footprint always touches the map edge or a gap, so the
            // fallback only guards against a map that reports no neighbours at all
            let candidates = if border.is_empty() {
                assigned.clone()
            } else {
                border
            };
            let pick = candidates[self.rng.uniform_int(candidates.len())];
            if self.release(pick, crisis, category)? {
                report.glyphs_cleared += 1;
            }
            assigned.retain(|&position| position != pick);
            report.removed.push(pick);
        }
        report.after = assigned.len();
        Ok(())
    }

    /// Assigned tiles with at least one null, out-of-bounds or unassigned neighbour.
    fn border(&self, assigned: &[UVec2]) -> Vec<UVec2> {
        let members: HashSet<UVec2> = assigned.iter().copied().collect();
        assigned
            .iter()
            .copied()
            .filter(|&position| {
                let inside = self
                    .map
                    .neighbors(position)
                    .into_iter()
                    .filter(|neighbor| members.contains(neighbor))
                    .count();
                inside < 4
            })
            .collect()
    }

    /// Adds the crisis to one tile. Returns whether the visible glyph changed.
    fn assign(
        &mut self,
        position: UVec2,
        crisis: CrisisId,
        category: CrisisCategory,
    ) -> Result<bool, LookupError> {
        let tile = self.map.tile(position).ok_or(LookupError::NullTile {
            x: position.x,
            y: position.y,
        })?;
        let shown = tile.visible_glyph();
        let mut footprint = tile.footprint().to_vec();
        footprint.push(FootprintEntry { crisis, category });
        let now = footprint.first().map(|entry| entry.category);
        self.map.set_footprint(position, footprint)?;
        Ok(now != shown)
    }

    /// Removes the crisis from one tile. Returns whether its category stopped
    /// being the visible glyph.
    fn release(
        &mut self,
        position: UVec2,
        crisis: CrisisId,
        category: CrisisCategory,
    ) -> Result<bool, LookupError> {
        let tile = self.map.tile(position).ok_or(LookupError::NullTile {
            x: position.x,
            y: position.y,
        })?;
        let shown = tile.visible_glyph();
        let footprint: Vec<FootprintEntry> = tile
            .footprint()
            .iter()
            .copied()
            .filter(|entry| entry.crisis != crisis)
            .collect();
        let now = footprint.first().map(|entry| entry.category);
        self.map.set_footprint(position, footprint)?;
        Ok(shown == Some(category) && now != Some(category))
    }
}
