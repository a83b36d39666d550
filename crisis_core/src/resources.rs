use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use bevy::prelude::*;
use serde::Deserialize;
use thiserror::Error;

use crate::definitions::{load_with_env_path, ConfigSource};
use crate::tiles::TileGrid;
use crate::world::TickReport;

/// Global configuration parameters for the headless crisis simulation.
#[derive(Resource, Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub grid_width: u32,
    pub grid_height: u32,
    pub rng_seed: u64,
    /// Full settle passes allowed per tick before the loop gives up.
    pub settle_pass_limit: usize,
    /// Level seed table applied on initialization.
    pub level: String,
    /// Share of procedurally generated cells left as null (water).
    pub water_ratio: f32,
    pub notice_history_limit: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            grid_width: 48,
            grid_height: 32,
            rng_seed: 0x5eed_cafe,
            settle_pass_limit: 64,
            level: "default".to_string(),
            water_ratio: 0.25,
            notice_history_limit: 32,
        }
    }
}

impl SimulationConfig {
    pub fn builtin() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn from_json_str(json: &str) -> Result<Self, SimulationConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, SimulationConfigError> {
        let contents =
            fs::read_to_string(path).map_err(|source| SimulationConfigError::ReadFailed {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_json_str(&contents)
    }

    /// Procedural map for this configuration.
    pub fn build_grid(&self) -> TileGrid {
        TileGrid::procedural(
            self.grid_width,
            self.grid_height,
            self.rng_seed,
            self.water_ratio,
        )
    }
}

#[derive(Debug, Error)]
pub enum SimulationConfigError {
    #[error("failed to parse simulation config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read simulation config from {path:?}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Loads the config named by `CRISIS_SIM_CONFIG_PATH`, falling back to defaults.
pub fn load_simulation_config_from_env() -> (Arc<SimulationConfig>, ConfigSource) {
    load_with_env_path(
        "CRISIS_SIM_CONFIG_PATH",
        "simulation_config",
        SimulationConfig::builtin,
        SimulationConfig::from_file,
    )
}

/// Tracks simulation ticks.
#[derive(Resource, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulationTick(pub u64);

/// What the tick pipeline did on its most recent run.
#[derive(Resource, Debug, Clone, Default)]
pub struct LastTickReport(pub TickReport);
