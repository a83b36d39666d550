use std::{
    collections::BTreeMap,
    env, fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::causes::{CausalGraph, Cause};
use crate::state_machine::MachineError;
use crate::topology::EscalationBlocker;
use crate::variables::{
    CrisisCategory, CrisisVariable, TierIndex, Variable, VariableRef, VariableRegistry,
    THRESHOLD_COUNT, TIER_COUNT,
};

pub const BUILTIN_SCENARIO: &str = include_str!("data/scenario.json");

/// One linear cause: `intercept + (source / 100) * slope` per tick.
#[derive(Debug, Clone, Deserialize)]
pub struct CauseDefinition {
    pub source: String,
    #[serde(default)]
    pub intercept: f64,
    #[serde(default, alias = "factor")]
    pub slope: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusDefinition {
    pub name: String,
    #[serde(default)]
    pub initial: f64,
    #[serde(default)]
    pub causes: Vec<CauseDefinition>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Entering `tier` requires every crisis in `crises` to sit below its severe tiers.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockerDefinition {
    pub tier: TierIndex,
    pub crises: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CrisisDefinition {
    pub name: String,
    pub category: CrisisCategory,
    pub thresholds: [f64; THRESHOLD_COUNT],
    pub tiers: Vec<String>,
    #[serde(default)]
    pub initial: f64,
    #[serde(default)]
    pub causes: Vec<CauseDefinition>,
    #[serde(default)]
    pub blockers: Vec<BlockerDefinition>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Static description of every variable, cause, blocker and level seed table.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ScenarioDefinition {
    pub version: u32,
    pub statuses: Vec<StatusDefinition>,
    pub crises: Vec<CrisisDefinition>,
    pub levels: BTreeMap<String, BTreeMap<String, f64>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Starting values applied on top of definition defaults when a level begins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LevelSeed {
    pub name: String,
    pub values: BTreeMap<String, f64>,
}

impl LevelSeed {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: BTreeMap::new(),
        }
    }

    pub fn with_value(mut self, variable: impl Into<String>, value: f64) -> Self {
        self.values.insert(variable.into(), value);
        self
    }
}

#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("failed to parse scenario definition: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read scenario definition from {path:?}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("variable {0} is declared more than once")]
    DuplicateVariable(String),
    #[error("{target} has a cause reading unknown variable {source_name}")]
    UnknownCauseSource { target: String, source_name: String },
    #[error("crisis {crisis} is blocked by unknown crisis {blocker}")]
    UnknownBlocker { crisis: String, blocker: String },
    #[error("crisis {0} lists itself as an escalation blocker")]
    SelfBlocker(String),
    #[error("crisis {crisis} blocker tier {tier} is outside 1..={max}")]
    BlockerTierOutOfRange {
        crisis: String,
        tier: TierIndex,
        max: TierIndex,
    },
    #[error("crisis {0} thresholds must be finite and strictly increasing")]
    InvalidThresholds(String),
    #[error("crisis {crisis} names {found} tiers, expected {expected}")]
    TierCount {
        crisis: String,
        expected: usize,
        found: usize,
    },
    #[error("unknown level {0}")]
    UnknownLevel(String),
    #[error("level {level} seeds unknown variable {variable}")]
    UnknownSeedVariable { level: String, variable: String },
    #[error("crisis machine is malformed: {0}")]
    Machine(#[from] MachineError),
}

/// Registries resolved from a validated definition. Values hold the definition
/// defaults; no level seed is applied yet.
#[derive(Debug, Clone)]
pub struct CompiledScenario {
    pub registry: VariableRegistry,
    pub causes: CausalGraph,
    /// Indexed by crisis id.
    pub blockers: Vec<Vec<EscalationBlocker>>,
}

impl ScenarioDefinition {
    pub fn builtin() -> Arc<Self> {
        Arc::new(
            serde_json::from_str(BUILTIN_SCENARIO).expect("builtin scenario should parse"),
        )
    }

    pub fn from_json_str(json: &str) -> Result<Self, DefinitionError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, DefinitionError> {
        let contents = fs::read_to_string(path).map_err(|source| DefinitionError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&contents)
    }

    pub fn level(&self, name: &str) -> Result<LevelSeed, DefinitionError> {
        let values = self
            .levels
            .get(name)
            .ok_or_else(|| DefinitionError::UnknownLevel(name.to_string()))?;
        Ok(LevelSeed {
            name: name.to_string(),
            values: values.clone(),
        })
    }

    /// Validates the definition and resolves every name to an id.
    pub fn compile(&self) -> Result<CompiledScenario, DefinitionError> {
        let mut registry = VariableRegistry::new();
        for status in &self.statuses {
            registry
                .insert_status(Variable::new(status.name.clone(), status.initial))
                .ok_or_else(|| DefinitionError::DuplicateVariable(status.name.clone()))?;
        }
        for crisis in &self.crises {
            let tier_names = validate_crisis_shape(crisis)?;
            registry
                .insert_crisis(CrisisVariable {
                    variable: Variable::new(crisis.name.clone(), crisis.initial),
                    category: crisis.category,
                    thresholds: crisis.thresholds,
                    tier_names,
                })
                .ok_or_else(|| DefinitionError::DuplicateVariable(crisis.name.clone()))?;
        }

        let mut causes = CausalGraph::new(self.statuses.len(), self.crises.len());
        let targets = registry
            .status_ids()
            .map(VariableRef::Status)
            .zip(self.statuses.iter().map(|status| (&status.name, &status.causes)))
            .chain(
                registry
                    .crisis_ids()
                    .map(VariableRef::Crisis)
                    .zip(self.crises.iter().map(|crisis| (&crisis.name, &crisis.causes))),
            );
        for (target, (name, list)) in targets {
            for cause in list {
                let source = registry.resolve(&cause.source).map_err(|_| {
                    DefinitionError::UnknownCauseSource {
                        target: name.clone(),
                        source_name: cause.source.clone(),
                    }
                })?;
                causes.add(target, Cause::new(source, cause.intercept, cause.slope));
            }
        }

        let mut blockers = Vec::with_capacity(self.crises.len());
        for crisis in &self.crises {
            let mut resolved = Vec::with_capacity(crisis.blockers.len());
            for blocker in &crisis.blockers {
                if blocker.tier == 0 || blocker.tier >= TIER_COUNT {
                    return Err(DefinitionError::BlockerTierOutOfRange {
                        crisis: crisis.name.clone(),
                        tier: blocker.tier,
                        max: TIER_COUNT - 1,
                    });
                }
                let mut blocked_by = Vec::with_capacity(blocker.crises.len());
                for other in &blocker.crises {
                    if other == &crisis.name {
                        return Err(DefinitionError::SelfBlocker(crisis.name.clone()));
                    }
                    let id = registry.resolve_crisis(other).map_err(|_| {
                        DefinitionError::UnknownBlocker {
                            crisis: crisis.name.clone(),
                            blocker: other.clone(),
                        }
                    })?;
                    blocked_by.push(id);
                }
                resolved.push(EscalationBlocker {
                    tier: blocker.tier,
                    blocked_by,
                });
            }
            blockers.push(resolved);
        }

        for (level, values) in &self.levels {
            if let Some(variable) = values.keys().find(|name| registry.resolve(name).is_err()) {
                return Err(DefinitionError::UnknownSeedVariable {
                    level: level.clone(),
                    variable: variable.clone(),
                });
            }
        }

        Ok(CompiledScenario {
            registry,
            causes,
            blockers,
        })
    }
}

fn validate_crisis_shape(
    crisis: &CrisisDefinition,
) -> Result<[String; TIER_COUNT], DefinitionError> {
    let thresholds = &crisis.thresholds;
    let finite = thresholds.iter().all(|value| value.is_finite());
    let increasing = thresholds.windows(2).all(|pair| pair[0] < pair[1]);
    if !finite || !increasing {
        return Err(DefinitionError::InvalidThresholds(crisis.name.clone()));
    }
    <[String; TIER_COUNT]>::try_from(crisis.tiers.clone()).map_err(|found| {
        DefinitionError::TierCount {
            crisis: crisis.name.clone(),
            expected: TIER_COUNT,
            found: found.len(),
        }
    })
}

/// Where a loaded definition came from; `None` means the builtin copy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigSource {
    pub path: Option<PathBuf>,
}

/// Loads the scenario named by `CRISIS_SCENARIO_PATH`, falling back to the builtin.
pub fn load_scenario_from_env() -> (Arc<ScenarioDefinition>, ConfigSource) {
    load_with_env_path(
        "CRISIS_SCENARIO_PATH",
        "scenario",
        ScenarioDefinition::builtin,
        ScenarioDefinition::from_file,
    )
}

pub(crate) fn load_with_env_path<T, E>(
    env_var: &str,
    label: &'static str,
    builtin: fn() -> Arc<T>,
    from_file: fn(&Path) -> Result<T, E>,
) -> (Arc<T>, ConfigSource)
where
    E: std::fmt::Display,
{
    if let Some(path) = env::var(env_var).ok().map(PathBuf::from) {
        match from_file(&path) {
            Ok(loaded) => {
                tracing::info!(
                    target: "crisis_core::config",
                    path = %path.display(),
                    "{label}.loaded=file"
                );
                return (Arc::new(loaded), ConfigSource { path: Some(path) });
            }
            Err(err) => {
                tracing::warn!(
                    target: "crisis_core::config",
                    path = %path.display(),
                    error = %err,
                    "{label}.load_failed"
                );
            }
        }
    }

    tracing::info!(target: "crisis_core::config", "{label}.loaded=builtin");
    (builtin(), ConfigSource::default())
}
