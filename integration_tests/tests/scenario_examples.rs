use anyhow::Result;
use serde::Deserialize;

use crisis_core::{
    NullObserver, ScenarioDefinition, SimulationWorld, TileGrid, TileMap, WarningBoard,
};

const SCENARIO: &str = r#"{
    "version": 1,
    "statuses": [
        { "name": "wage_income", "initial": 72 },
        { "name": "economy", "initial": 50,
          "causes": [{ "source": "wage_income", "intercept": -0.2, "factor": 0.1 }] }
    ],
    "crises": [
        { "name": "inflation", "category": "finance",
          "thresholds": [30, 50, 70],
          "tiers": ["low", "medium", "high", "hyperinflation"],
          "blockers": [
              { "tier": 2, "crises": ["recession"] },
              { "tier": 3, "crises": ["recession"] }
          ] },
        { "name": "recession", "category": "finance",
          "thresholds": [25, 45, 65],
          "tiers": ["growth", "slowdown", "recession", "depression"] },
        { "name": "epidemic", "category": "health",
          "thresholds": [30, 60, 85],
          "tiers": ["contained", "outbreak", "epidemic", "pandemic"] }
    ],
    "levels": { "default": {} }
}"#;

#[derive(Debug, Deserialize)]
struct SummaryRow {
    name: String,
    category: String,
    tier: usize,
    tier_name: String,
    footprint: usize,
}

fn world() -> Result<SimulationWorld> {
    let definition = ScenarioDefinition::from_json_str(SCENARIO)?;
    let grid = TileGrid::from_ascii(&["gggggggggg"; 10])?;
    let mut world = SimulationWorld::from_definition(&definition, grid, 2024, 64)?;
    world.initialize(&definition.level("default")?, &mut NullObserver)?;
    Ok(world)
}

#[test]
fn wage_income_moves_economy_each_tick() -> Result<()> {
    let mut world = world()?;
    for tick in 1..=3 {
        world.step(&mut NullObserver);
        let expected = 50.0 - 0.128 * tick as f64;
        assert!((world.get_value("economy")? - expected).abs() < 1e-9);
        assert!((world.last_delta("economy")? + 0.128).abs() < 1e-12);
    }
    Ok(())
}

#[test]
fn inflation_reaches_high_without_recession() -> Result<()> {
    let mut world = world()?;
    let mut board = WarningBoard::default();
    assert_eq!(world.tier_name("inflation")?, "low");

    world.set_value("inflation", 55.0)?;
    world.settle_states(&mut board);

    assert_eq!(world.get_tier("inflation")?, 2);
    assert_eq!(world.tier_name("inflation")?, "high");
    assert!(board.is_visible("inflation"));
    Ok(())
}

#[test]
fn inflation_stalls_at_medium_in_a_recession() -> Result<()> {
    let mut world = world()?;
    let mut board = WarningBoard::default();
    world.set_value("recession", 50.0)?;
    world.settle_states(&mut board);
    assert_eq!(world.get_tier("recession")?, 2);

    world.set_value("inflation", 55.0)?;
    world.settle_states(&mut board);
    assert_eq!(world.get_tier("inflation")?, 1);
    assert_eq!(world.tier_name("inflation")?, "medium");
    assert!(!board.is_visible("inflation"));
    assert!(board.is_visible("recession"));

    // recovery lifts the block on the next settle
    world.set_value("recession", 10.0)?;
    world.settle_states(&mut board);
    assert_eq!(world.get_tier("inflation")?, 2);
    assert!(!board.is_visible("recession"));
    Ok(())
}

#[test]
fn epidemic_covers_sixty_two_of_a_hundred_tiles() -> Result<()> {
    let mut world = world()?;
    assert_eq!(world.grid().total_playable(), 100);
    world.set_value("epidemic", 85.0)?;

    let report = world
        .reconcile_tiles("epidemic")?
        .expect("epidemic is above its manifest threshold");
    assert_eq!(report.target, 62);
    assert_eq!(world.crisis_tiles("epidemic")?.len(), 62);

    let again = world.reconcile_tiles("epidemic")?.expect("still manifest");
    assert!(again.added.is_empty() && again.removed.is_empty());
    Ok(())
}

#[test]
fn summary_serializes_for_clients() -> Result<()> {
    let mut world = world()?;
    world.set_value("epidemic", 90.0)?;
    world.step(&mut NullObserver);

    let json = serde_json::to_string(&world.summary())?;
    let rows: Vec<SummaryRow> = serde_json::from_str(&json)?;
    assert_eq!(rows.len(), 3);

    let epidemic = rows
        .iter()
        .find(|row| row.name == "epidemic")
        .expect("epidemic row");
    assert_eq!(epidemic.category, "health");
    assert_eq!(epidemic.tier, 3);
    assert_eq!(epidemic.tier_name, "pandemic");
    assert_eq!(epidemic.footprint, world.crisis_tiles("epidemic")?.len());
    assert!(epidemic.footprint > 0);
    Ok(())
}
