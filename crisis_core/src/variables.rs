use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of severity tiers every crisis carries.
pub const TIER_COUNT: usize = 4;
/// Number of thresholds separating the tiers.
pub const THRESHOLD_COUNT: usize = TIER_COUNT - 1;
/// First tier at which a crisis shows a warning and claims map tiles.
pub const SEVERE_TIER: TierIndex = 2;

pub type TierIndex = usize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatusId(pub u16);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CrisisId(pub u16);

impl StatusId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl CrisisId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for CrisisId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "crisis#{}", self.0)
    }
}

/// Status and crisis variables share one name namespace but live in separate stores.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VariableRef {
    Status(StatusId),
    Crisis(CrisisId),
}

/// Thematic grouping of a crisis, used to pick the glyph drawn on affected tiles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrisisCategory {
    Finance,
    Health,
    Education,
    Social,
    Environment,
    Nature,
    Infrastructure,
    Labor,
    Defense,
    Stability,
    Industry,
}

impl CrisisCategory {
    pub const ALL: [CrisisCategory; 11] = [
        CrisisCategory::Finance,
        CrisisCategory::Health,
        CrisisCategory::Education,
        CrisisCategory::Social,
        CrisisCategory::Environment,
        CrisisCategory::Nature,
        CrisisCategory::Infrastructure,
        CrisisCategory::Labor,
        CrisisCategory::Defense,
        CrisisCategory::Stability,
        CrisisCategory::Industry,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CrisisCategory::Finance => "finance",
            CrisisCategory::Health => "health",
            CrisisCategory::Education => "education",
            CrisisCategory::Social => "social",
            CrisisCategory::Environment => "environment",
            CrisisCategory::Nature => "nature",
            CrisisCategory::Infrastructure => "infrastructure",
            CrisisCategory::Labor => "labor",
            CrisisCategory::Defense => "defense",
            CrisisCategory::Stability => "stability",
            CrisisCategory::Industry => "industry",
        }
    }

    /// Single-character map marker for the category.
    pub fn glyph(self) -> char {
        match self {
            CrisisCategory::Finance => '$',
            CrisisCategory::Health => '+',
            CrisisCategory::Education => 'e',
            CrisisCategory::Social => '!',
            CrisisCategory::Environment => '~',
            CrisisCategory::Nature => '*',
            CrisisCategory::Infrastructure => '#',
            CrisisCategory::Labor => 'w',
            CrisisCategory::Defense => 'x',
            CrisisCategory::Stability => '?',
            CrisisCategory::Industry => 'i',
        }
    }
}

impl fmt::Display for CrisisCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named numeric indicator. Values are conventionally 0..100 but never clamped here.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub value: f64,
    pub last_delta: f64,
}

impl Variable {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            last_delta: 0.0,
        }
    }

    /// Accumulates `delta` into the value and records it as the last applied delta.
    pub fn apply_delta(&mut self, delta: f64) {
        self.value += delta;
        self.last_delta = delta;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CrisisVariable {
    pub variable: Variable,
    pub category: CrisisCategory,
    pub thresholds: [f64; THRESHOLD_COUNT],
    pub tier_names: [String; TIER_COUNT],
}

impl CrisisVariable {
    pub fn name(&self) -> &str {
        &self.variable.name
    }

    pub fn value(&self) -> f64 {
        self.variable.value
    }

    /// Tier implied by the thresholds alone, ignoring any escalation guards.
    pub fn classify(&self, value: f64) -> TierIndex {
        self.thresholds
            .iter()
            .take_while(|threshold| value >= **threshold)
            .count()
    }

    pub fn tier_name(&self, tier: TierIndex) -> Option<&str> {
        self.tier_names.get(tier).map(String::as_str)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LookupError {
    #[error("unknown variable {0}")]
    UnknownVariable(String),
    #[error("{0} is a status variable, not a crisis")]
    NotACrisis(String),
    #[error("tile ({x}, {y}) is outside the map")]
    OutOfBounds { x: u32, y: u32 },
    #[error("tile ({x}, {y}) is not part of the playable map")]
    NullTile { x: u32, y: u32 },
}

/// Holds every status and crisis variable of the running level.
#[derive(Debug, Clone, Default)]
pub struct VariableRegistry {
    statuses: Vec<Variable>,
    crises: Vec<CrisisVariable>,
    names: HashMap<String, VariableRef>,
}

impl VariableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `None` when the name is already taken by any variable or the
    /// status ids are exhausted.
    pub fn insert_status(&mut self, variable: Variable) -> Option<StatusId> {
        if self.names.contains_key(&variable.name) {
            return None;
        }
        let id = StatusId(u16::try_from(self.statuses.len()).ok()?);
        self.names
            .insert(variable.name.clone(), VariableRef::Status(id));
        self.statuses.push(variable);
        Some(id)
    }

    /// Returns `None` when the name is taken or the crisis ids are exhausted.
    pub fn insert_crisis(&mut self, crisis: CrisisVariable) -> Option<CrisisId> {
        if self.names.contains_key(crisis.name()) {
            return None;
        }
        let id = CrisisId(u16::try_from(self.crises.len()).ok()?);
        self.names
            .insert(crisis.name().to_string(), VariableRef::Crisis(id));
        self.crises.push(crisis);
        Some(id)
    }

    pub fn resolve(&self, name: &str) -> Result<VariableRef, LookupError> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| LookupError::UnknownVariable(name.to_string()))
    }

    pub fn resolve_crisis(&self, name: &str) -> Result<CrisisId, LookupError> {
        match self.resolve(name)? {
            VariableRef::Crisis(id) => Ok(id),
            VariableRef::Status(_) => Err(LookupError::NotACrisis(name.to_string())),
        }
    }

    pub fn variable(&self, reference: VariableRef) -> &Variable {
        match reference {
            VariableRef::Status(id) => &self.statuses[id.index()],
            VariableRef::Crisis(id) => &self.crises[id.index()].variable,
        }
    }

    fn variable_mut(&mut self, reference: VariableRef) -> &mut Variable {
        match reference {
            VariableRef::Status(id) => &mut self.statuses[id.index()],
            VariableRef::Crisis(id) => &mut self.crises[id.index()].variable,
        }
    }

    pub fn value(&self, reference: VariableRef) -> f64 {
        self.variable(reference).value
    }

    pub fn set_value(&mut self, reference: VariableRef, value: f64) {
        self.variable_mut(reference).value = value;
    }

    pub fn apply_delta(&mut self, reference: VariableRef, delta: f64) {
        self.variable_mut(reference).apply_delta(delta);
    }

    pub fn crisis(&self, id: CrisisId) -> &CrisisVariable {
        &self.crises[id.index()]
    }

    pub fn statuses(&self) -> &[Variable] {
        &self.statuses
    }

    pub fn crises(&self) -> &[CrisisVariable] {
        &self.crises
    }

    pub fn status_ids(&self) -> impl Iterator<Item = StatusId> {
        (0..self.statuses.len()).map(|idx| StatusId(idx as u16))
    }

    pub fn crisis_ids(&self) -> impl Iterator<Item = CrisisId> {
        (0..self.crises.len()).map(|idx| CrisisId(idx as u16))
    }

    pub fn name_of(&self, reference: VariableRef) -> &str {
        &self.variable(reference).name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inflation() -> CrisisVariable {
        CrisisVariable {
            variable: Variable::new("inflation", 10.0),
            category: CrisisCategory::Finance,
            thresholds: [30.0, 50.0, 70.0],
            tier_names: [
                "low".to_string(),
                "medium".to_string(),
                "high".to_string(),
                "hyperinflation".to_string(),
            ],
        }
    }

    #[test]
    fn apply_delta_accumulates_and_records() {
        let mut variable = Variable::new("economy", 50.0);
        variable.apply_delta(-0.128);
        variable.apply_delta(-0.128);
        assert!((variable.value - 49.744).abs() < 1e-9);
        assert_eq!(variable.last_delta, -0.128);
    }

    #[test]
    fn classify_uses_inclusive_lower_bounds() {
        let crisis = inflation();
        assert_eq!(crisis.classify(-5.0), 0);
        assert_eq!(crisis.classify(29.999), 0);
        assert_eq!(crisis.classify(30.0), 1);
        assert_eq!(crisis.classify(55.0), 2);
        assert_eq!(crisis.classify(70.0), 3);
        assert_eq!(crisis.classify(250.0), 3);
    }

    #[test]
    fn names_are_shared_between_stores() {
        let mut registry = VariableRegistry::new();
        assert!(registry
            .insert_status(Variable::new("inflation", 1.0))
            .is_some());
        assert!(registry.insert_crisis(inflation()).is_none());
        assert_eq!(registry.crises().len(), 0);
    }

    #[test]
    fn insert_fails_once_ids_run_out() {
        let mut registry = VariableRegistry::new();
        for idx in 0..=u16::MAX as usize {
            assert!(registry
                .insert_status(Variable::new(format!("status_{idx}"), 0.0))
                .is_some());
        }
        assert!(registry
            .insert_status(Variable::new("one_too_many", 0.0))
            .is_none());
        assert_eq!(registry.statuses().len(), u16::MAX as usize + 1);
        assert_eq!(
            registry.resolve("status_65535"),
            Ok(VariableRef::Status(StatusId(u16::MAX)))
        );
    }

    #[test]
    fn resolve_crisis_rejects_status_names() {
        let mut registry = VariableRegistry::new();
        registry.insert_status(Variable::new("taxes", 40.0));
        let id = registry.insert_crisis(inflation()).unwrap();

        assert_eq!(registry.resolve_crisis("inflation"), Ok(id));
        assert_eq!(
            registry.resolve_crisis("taxes"),
            Err(LookupError::NotACrisis("taxes".to_string()))
        );
        assert_eq!(
            registry.resolve("missing"),
            Err(LookupError::UnknownVariable("missing".to_string()))
        );
    }

    #[test]
    fn set_value_does_not_touch_last_delta() {
        let mut registry = VariableRegistry::new();
        let id = registry.insert_status(Variable::new("taxes", 40.0)).unwrap();
        let reference = VariableRef::Status(id);
        registry.apply_delta(reference, 2.0);
        registry.set_value(reference, 10.0);
        assert_eq!(registry.value(reference), 10.0);
        assert_eq!(registry.variable(reference).last_delta, 2.0);
    }
}
