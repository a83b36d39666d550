use std::hash::Hasher;

use bevy::math::UVec2;
use bevy::prelude::Resource;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tracing::{debug, warn};

use crate::causes::CausalGraph;
use crate::definitions::{DefinitionError, LevelSeed, ScenarioDefinition};
use crate::hashing::StateDigest;
use crate::presentation::{NullObserver, TierObserver};
use crate::region::{ReconcileReport, RegionExpander};
use crate::resources::SimulationConfig;
use crate::tiles::{TileGrid, TileMap};
use crate::topology::{CrisisMachines, SettleOutcome};
use crate::variables::{
    CrisisCategory, CrisisId, LookupError, TierIndex, VariableRef, VariableRegistry, SEVERE_TIER,
};

/// Everything one simulation tick did, in pipeline order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub statuses_updated: usize,
    pub crises_updated: usize,
    pub settle: SettleOutcome,
    pub reconciled: Vec<ReconcileReport>,
}

/// One row of [`SimulationWorld::summary`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrisisSummary {
    pub name: String,
    pub category: CrisisCategory,
    pub value: f64,
    pub tier: TierIndex,
    pub tier_name: String,
    pub footprint: usize,
}

/// The explicit simulation context: variable registry, causal graph, crisis
/// machines, tile grid and random source. Every operation goes through it.
#[derive(Resource, Debug, Clone)]
pub struct SimulationWorld {
    registry: VariableRegistry,
    /// Definition defaults restored on `initialize`.
    defaults: VariableRegistry,
    causes: CausalGraph,
    machines: CrisisMachines,
    initial_machines: CrisisMachines,
    grid: TileGrid,
    rng: ChaCha8Rng,
    rng_seed: u64,
    settle_pass_limit: usize,
    manifest: Vec<CrisisId>,
}

impl SimulationWorld {
    /// Builds a world at definition defaults with every machine at tier 0. No
    /// level seed is applied and no observer is notified; see [`Self::initialize`].
    pub fn from_definition(
        definition: &ScenarioDefinition,
        grid: TileGrid,
        rng_seed: u64,
        settle_pass_limit: usize,
    ) -> Result<Self, DefinitionError> {
        let compiled = definition.compile()?;
        let machines =
            CrisisMachines::build(&compiled.registry, &compiled.blockers, &mut NullObserver)?;
        let world = Self {
            defaults: compiled.registry.clone(),
            registry: compiled.registry,
            causes: compiled.causes,
            initial_machines: machines.clone(),
            machines,
            grid,
            rng: ChaCha8Rng::seed_from_u64(rng_seed),
            rng_seed,
            settle_pass_limit,
            manifest: Vec::new(),
        };
        if let Some(cycle) = world.guard_cycle() {
            warn!(
                target: "crisis_core::settle",
                cycle = ?cycle,
                "crisis.guard_cycle_detected"
            );
        }
        Ok(world)
    }

    /// Builds the world for `config` on its procedural map and seeds `config.level`.
    pub fn from_config(
        definition: &ScenarioDefinition,
        config: &SimulationConfig,
        observer: &mut dyn TierObserver,
    ) -> Result<Self, DefinitionError> {
        let mut world = Self::from_definition(
            definition,
            config.build_grid(),
            config.rng_seed,
            config.settle_pass_limit,
        )?;
        let seed = definition.level(&config.level)?;
        world
            .initialize(&seed, observer)
            .map_err(|err| DefinitionError::UnknownSeedVariable {
                level: seed.name.clone(),
                variable: match err {
                    LookupError::UnknownVariable(variable) => variable,
                    other => other.to_string(),
                },
            })?;
        Ok(world)
    }

    /// Level reset: definition defaults, then the seed values, every machine back
    /// at tier 0, empty footprints and a reseeded random source.
    ///
    /// Fails without touching anything if the seed names an unknown variable.
    pub fn initialize(
        &mut self,
        seed: &LevelSeed,
        observer: &mut dyn TierObserver,
    ) -> Result<(), LookupError> {
        let mut assignments = Vec::with_capacity(seed.values.len());
        for (name, value) in &seed.values {
            assignments.push((self.defaults.resolve(name)?, *value));
        }

        self.registry = self.defaults.clone();
        for (reference, value) in assignments {
            self.registry.set_value(reference, value);
        }
        self.machines.retire(observer);
        self.machines = self.initial_machines.clone();
        self.machines.announce(observer);
        self.grid.clear_footprints();
        self.rng = ChaCha8Rng::seed_from_u64(self.rng_seed);
        self.manifest.clear();
        Ok(())
    }

    /// Applies the causal graph to every status variable.
    pub fn tick_status(&mut self) -> usize {
        self.causes.apply_statuses(&mut self.registry)
    }

    /// Applies the causal graph to every crisis variable.
    pub fn tick_crisis(&mut self) -> usize {
        self.causes.apply_crises(&mut self.registry)
    }

    /// Resolves every crisis machine against the current values and remembers
    /// which crises now manifest on the map.
    pub fn settle_states(&mut self, observer: &mut dyn TierObserver) -> SettleOutcome {
        let outcome = self
            .machines
            .settle(&self.registry, self.settle_pass_limit, observer);
        self.manifest = outcome.manifest.clone();
        outcome
    }

    /// Grows or shrinks one crisis footprint to match its value.
    pub fn reconcile_tiles(&mut self, name: &str) -> Result<Option<ReconcileReport>, LookupError> {
        let id = self.registry.resolve_crisis(name)?;
        self.reconcile_crisis(id)
    }

    fn reconcile_crisis(&mut self, id: CrisisId) -> Result<Option<ReconcileReport>, LookupError> {
        let crisis = self.registry.crisis(id);
        RegionExpander::new(&mut self.grid, &mut self.rng).reconcile(
            id,
            crisis.name(),
            crisis.category,
            crisis.value(),
            &crisis.thresholds,
        )
    }

    /// Reconciles every crisis from the last settle's manifest. Tile failures
    /// are logged and skipped.
    pub fn reconcile_manifested(&mut self) -> Vec<ReconcileReport> {
        let manifest = std::mem::take(&mut self.manifest);
        let mut reports = Vec::with_capacity(manifest.len());
        for &id in &manifest {
            match self.reconcile_crisis(id) {
                Ok(Some(report)) => reports.push(report),
                Ok(None) => {}
                Err(err) => warn!(
                    target: "crisis_core::region",
                    crisis = %self.registry.crisis(id).name(),
                    error = %err,
                    "crisis.region_reconcile_failed"
                ),
            }
        }
        self.manifest = manifest;
        reports
    }

    /// Runs one full tick: statuses, crises, settle, then tile reconciliation.
    pub fn step(&mut self, observer: &mut dyn TierObserver) -> TickReport {
        let statuses_updated = self.tick_status();
        let crises_updated = self.tick_crisis();
        let settle = self.settle_states(observer);
        let reconciled = self.reconcile_manifested();
        debug!(
            target: "crisis_core::tick",
            statuses = statuses_updated,
            crises = crises_updated,
            passes = settle.passes,
            transitions = settle.transitions,
            reconciled = reconciled.len(),
            "crisis.tick_completed"
        );
        TickReport {
            statuses_updated,
            crises_updated,
            settle,
            reconciled,
        }
    }

    /// Recomputes a single variable from its causes. Returns the applied delta.
    pub fn update_variable(&mut self, name: &str) -> Result<f64, LookupError> {
        let reference = self.registry.resolve(name)?;
        Ok(self.causes.apply(reference, &mut self.registry))
    }

    pub fn get_value(&self, name: &str) -> Result<f64, LookupError> {
        Ok(self.registry.value(self.registry.resolve(name)?))
    }

    /// Direct override. Machines only react on the next settle.
    pub fn set_value(&mut self, name: &str, value: f64) -> Result<(), LookupError> {
        let reference = self.registry.resolve(name)?;
        self.registry.set_value(reference, value);
        Ok(())
    }

    pub fn last_delta(&self, name: &str) -> Result<f64, LookupError> {
        Ok(self.registry.variable(self.registry.resolve(name)?).last_delta)
    }

    pub fn get_tier(&self, name: &str) -> Result<TierIndex, LookupError> {
        let id = self.registry.resolve_crisis(name)?;
        self.machines
            .tier(id)
            .ok_or_else(|| LookupError::UnknownVariable(name.to_string()))
    }

    pub fn tier_name(&self, name: &str) -> Result<&str, LookupError> {
        let tier = self.get_tier(name)?;
        let id = self.registry.resolve_crisis(name)?;
        self.registry
            .crisis(id)
            .tier_name(tier)
            .ok_or_else(|| LookupError::UnknownVariable(name.to_string()))
    }

    /// Tier the value alone would select, ignoring escalation blockers.
    pub fn classified_tier(&self, name: &str) -> Result<TierIndex, LookupError> {
        let crisis = self.registry.crisis(self.registry.resolve_crisis(name)?);
        Ok(crisis.classify(crisis.value()))
    }

    pub fn crisis_tiles(&self, name: &str) -> Result<Vec<UVec2>, LookupError> {
        let id = self.registry.resolve_crisis(name)?;
        Ok(self.grid.crisis_tiles(id))
    }

    /// Crises whose warning indicator should be showing.
    pub fn severe_crises(&self) -> Vec<&str> {
        self.registry
            .crisis_ids()
            .filter(|id| self.machines.tier(*id).map_or(false, |tier| tier >= SEVERE_TIER))
            .map(|id| self.registry.crisis(id).name())
            .collect()
    }

    /// Digest of every value, tier and footprint. Equal worlds hash equal across runs.
    pub fn state_hash(&self) -> u64 {
        let mut digest = StateDigest::new();
        for variable in self.registry.statuses() {
            digest.write_str(&variable.name);
            digest.write_f64(variable.value);
        }
        for (crisis, tier) in self.registry.crises().iter().zip(self.machines.tiers()) {
            digest.write_str(crisis.name());
            digest.write_f64(crisis.value());
            digest.write_index(*tier);
        }
        for tile in self.grid.tiles() {
            if tile.footprint().is_empty() {
                continue;
            }
            digest.write_u32(tile.position.x);
            digest.write_u32(tile.position.y);
            for entry in tile.footprint() {
                digest.write_index(entry.crisis.index());
            }
        }
        digest.finish()
    }

    pub fn summary(&self) -> Vec<CrisisSummary> {
        self.registry
            .crisis_ids()
            .map(|id| {
                let crisis = self.registry.crisis(id);
                let tier = self.machines.tier(id).unwrap_or_default();
                CrisisSummary {
                    name: crisis.name().to_string(),
                    category: crisis.category,
                    value: crisis.value(),
                    tier,
                    tier_name: crisis.tier_name(tier).unwrap_or_default().to_string(),
                    footprint: self.grid.crisis_tiles(id).len(),
                }
            })
            .collect()
    }

    /// A cycle of crises whose escalation blockers read each other, if any.
    pub fn guard_cycle(&self) -> Option<Vec<String>> {
        self.machines.guard_graph().find_cycle().map(|cycle| {
            cycle
                .into_iter()
                .map(|id| self.registry.name_of(VariableRef::Crisis(id)).to_string())
                .collect()
        })
    }

    pub fn registry(&self) -> &VariableRegistry {
        &self.registry
    }

    pub fn machines(&self) -> &CrisisMachines {
        &self.machines
    }

    pub fn grid(&self) -> &TileGrid {
        &self.grid
    }

    pub fn total_playable(&self) -> usize {
        self.grid.total_playable()
    }

    pub fn settle_pass_limit(&self) -> usize {
        self.settle_pass_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presentation::WarningBoard;

    const SCENARIO: &str = r#"{
        "statuses": [
            { "name": "wage_income", "initial": 72 },
            { "name": "economy", "initial": 50,
              "causes": [{ "source": "wage_income", "intercept": -0.2, "slope": 0.1 }] }
        ],
        "crises": [
            { "name": "inflation", "category": "finance",
              "thresholds": [30, 50, 70],
              "tiers": ["low", "medium", "high", "hyperinflation"],
              "initial": 10,
              "blockers": [
                  { "tier": 2, "crises": ["recession"] },
                  { "tier": 3, "crises": ["recession"] }
              ] },
            { "name": "recession", "category": "finance",
              "thresholds": [25, 45, 60],
              "tiers": ["growth", "slowdown", "recession", "depression"],
              "initial": 0 }
        ],
        "levels": {
            "default": {},
            "overheated": { "inflation": 55 }
        }
    }"#;

    fn world(rows: &[&str]) -> SimulationWorld {
        let definition = ScenarioDefinition::from_json_str(SCENARIO).unwrap();
        SimulationWorld::from_definition(&definition, TileGrid::from_ascii(rows).unwrap(), 7, 64)
            .unwrap()
    }

    fn open_world() -> SimulationWorld {
        world(&["gggggggggg"; 10])
    }

    #[test]
    fn economy_moves_by_wage_contribution() {
        let mut world = open_world();
        world.tick_status();
        assert!((world.get_value("economy").unwrap() - 49.872).abs() < 1e-9);
        assert!((world.last_delta("economy").unwrap() - (-0.128)).abs() < 1e-12);
        assert_eq!(world.last_delta("wage_income").unwrap(), 0.0);
    }

    #[test]
    fn inflation_escalates_to_high_when_recession_is_mild() {
        let mut world = open_world();
        let mut board = WarningBoard::default();
        world.set_value("inflation", 55.0).unwrap();
        world.settle_states(&mut board);
        assert_eq!(world.get_tier("inflation").unwrap(), 2);
        assert_eq!(world.tier_name("inflation").unwrap(), "high");
        assert!(board.is_visible("inflation"));
    }

    #[test]
    fn inflation_stalls_at_medium_during_a_recession() {
        let mut world = open_world();
        let mut board = WarningBoard::default();
        world.set_value("recession", 50.0).unwrap();
        world.settle_states(&mut board);
        assert_eq!(world.get_tier("recession").unwrap(), 2);

        world.set_value("inflation", 55.0).unwrap();
        world.settle_states(&mut board);
        assert_eq!(world.get_tier("inflation").unwrap(), 1);
        assert_eq!(world.tier_name("inflation").unwrap(), "medium");
        assert_eq!(world.classified_tier("inflation").unwrap(), 2);
        assert!(!board.is_visible("inflation"));
    }

    #[test]
    fn reconcile_marks_the_computed_share_of_the_map() {
        let mut world = open_world();
        world.set_value("recession", 85.0).unwrap();
        let report = world
            .reconcile_tiles("recession")
            .unwrap()
            .expect("above the manifest threshold");
        // floor((85 - 45) / (100 - 45) * 100) = 72
        assert_eq!(report.target, 72);
        assert_eq!(world.crisis_tiles("recession").unwrap().len(), 72);
    }

    #[test]
    fn step_reconciles_only_manifested_crises() {
        let mut world = open_world();
        world.set_value("recession", 70.0).unwrap();
        world.set_value("inflation", 45.0).unwrap();
        let report = world.step(&mut NullObserver);

        assert_eq!(report.statuses_updated, 2);
        assert_eq!(report.crises_updated, 2);
        assert_eq!(report.settle.manifest, vec![CrisisId(1)]);
        assert_eq!(report.reconciled.len(), 1);
        assert!(world.crisis_tiles("inflation").unwrap().is_empty());
        assert!(!world.crisis_tiles("recession").unwrap().is_empty());
    }

    #[test]
    fn lookups_fail_with_typed_errors() {
        let mut world = open_world();
        assert_eq!(
            world.get_value("gdp"),
            Err(LookupError::UnknownVariable("gdp".to_string()))
        );
        assert_eq!(
            world.get_tier("economy"),
            Err(LookupError::NotACrisis("economy".to_string()))
        );
        assert!(world.set_value("gdp", 1.0).is_err());
        assert!(world.reconcile_tiles("wage_income").is_err());
    }

    #[test]
    fn update_variable_applies_one_formula() {
        let mut world = open_world();
        let delta = world.update_variable("economy").unwrap();
        assert!((delta - (-0.128)).abs() < 1e-12);
        assert_eq!(world.get_value("wage_income").unwrap(), 72.0);
    }

    #[test]
    fn initialize_resets_values_tiers_and_tiles() {
        let mut world = open_world();
        let mut board = WarningBoard::default();
        world.set_value("recession", 90.0).unwrap();
        world.step(&mut board);
        world.step(&mut board);
        assert!(!world.crisis_tiles("recession").unwrap().is_empty());

        let definition = ScenarioDefinition::from_json_str(SCENARIO).unwrap();
        let seed = definition.level("overheated").unwrap();
        world.initialize(&seed, &mut board).unwrap();

        assert_eq!(world.get_value("inflation").unwrap(), 55.0);
        assert_eq!(world.get_value("recession").unwrap(), 0.0);
        assert_eq!(world.get_tier("recession").unwrap(), 0);
        assert!(world.crisis_tiles("recession").unwrap().is_empty());
        assert_eq!(board.recent().last().map(|notice| notice.tier), Some(0));
        assert!(!board.is_visible("recession"));
    }

    #[test]
    fn initialize_rejects_unknown_seed_variables_untouched() {
        let mut world = open_world();
        world.set_value("inflation", 42.0).unwrap();
        let seed = LevelSeed::new("broken").with_value("gdp", 3.0);
        assert!(world.initialize(&seed, &mut NullObserver).is_err());
        assert_eq!(world.get_value("inflation").unwrap(), 42.0);
    }

    #[test]
    fn identical_worlds_hash_identically() {
        let mut a = open_world();
        let mut b = open_world();
        for world in [&mut a, &mut b] {
            world.set_value("recession", 80.0).unwrap();
            for _ in 0..3 {
                world.step(&mut NullObserver);
            }
        }
        assert_eq!(a.state_hash(), b.state_hash());

        b.set_value("economy", 1.0).unwrap();
        assert_ne!(a.state_hash(), b.state_hash());
    }

    #[test]
    fn summary_lists_every_crisis() {
        let mut world = open_world();
        world.set_value("inflation", 35.0).unwrap();
        world.settle_states(&mut NullObserver);
        let summary = world.summary();
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].name, "inflation");
        assert_eq!(summary[0].tier_name, "medium");
        assert_eq!(summary[1].footprint, 0);
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json[0]["category"], "finance");
    }

    #[test]
    fn scenario_without_blocker_cycles_reports_none() {
        assert_eq!(open_world().guard_cycle(), None);
    }
}
