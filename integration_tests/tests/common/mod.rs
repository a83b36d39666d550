#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Once;

use bevy::prelude::App;
use crisis_core::{
    load_scenario_from_env, load_simulation_config_from_env, try_build_headless_app,
    SimulationConfig,
};

static INIT: Once = Once::new();

pub fn ensure_test_config() {
    INIT.call_once(|| {
        let config_path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("tests")
            .join("fixtures")
            .join("test_simulation_config.json");

        debug_assert!(
            config_path.exists(),
            "missing test simulation config at {}",
            config_path.display()
        );

        std::env::set_var("CRISIS_SIM_CONFIG_PATH", &config_path);
    });
}

/// Config from the test fixture.
pub fn test_config() -> SimulationConfig {
    ensure_test_config();
    let (config, source) = load_simulation_config_from_env();
    assert!(source.path.is_some(), "test config fell back to builtin");
    (*config).clone()
}

/// App built from the test fixture config and the builtin scenario.
pub fn build_test_app() -> App {
    let (scenario, _) = load_scenario_from_env();
    try_build_headless_app(test_config(), &scenario).expect("builtin scenario builds")
}
