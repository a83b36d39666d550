use crate::variables::{CrisisId, StatusId, VariableRef, VariableRegistry};

/// A linear term feeding one variable's per-tick delta from another variable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cause {
    pub source: VariableRef,
    pub intercept: f64,
    pub slope: f64,
}

impl Cause {
    pub fn new(source: VariableRef, intercept: f64, slope: f64) -> Self {
        Self {
            source,
            intercept,
            slope,
        }
    }
}

/// `intercept + (source / 100) * slope`.
pub fn contribution(intercept: f64, slope: f64, source_value: f64) -> f64 {
    intercept + (source_value / 100.0) * slope
}

/// Ordered cause lists for every status and crisis variable.
#[derive(Debug, Clone, Default)]
pub struct CausalGraph {
    status: Vec<Vec<Cause>>,
    crisis: Vec<Vec<Cause>>,
}

impl CausalGraph {
    pub fn new(status_count: usize, crisis_count: usize) -> Self {
        Self {
            status: vec![Vec::new(); status_count],
            crisis: vec![Vec::new(); crisis_count],
        }
    }

    pub fn add(&mut self, target: VariableRef, cause: Cause) {
        self.causes_mut(target).push(cause);
    }

    pub fn causes(&self, target: VariableRef) -> &[Cause] {
        let list = match target {
            VariableRef::Status(id) => self.status.get(id.index()),
            VariableRef::Crisis(id) => self.crisis.get(id.index()),
        };
        list.map(Vec::as_slice).unwrap_or(&[])
    }

    fn causes_mut(&mut self, target: VariableRef) -> &mut Vec<Cause> {
        let (lists, index) = match target {
            VariableRef::Status(id) => (&mut self.status, id.index()),
            VariableRef::Crisis(id) => (&mut self.crisis, id.index()),
        };
        if lists.len() <= index {
            lists.resize_with(index + 1, Vec::new);
        }
        &mut lists[index]
    }

    /// Sum of every cause of `target`, read against the registry as it is now.
    pub fn delta(&self, target: VariableRef, registry: &VariableRegistry) -> f64 {
        self.causes(target)
            .iter()
            .map(|cause| contribution(cause.intercept, cause.slope, registry.value(cause.source)))
            .sum()
    }

    /// Adds the summed contributions to `target` and returns the applied delta.
    pub fn apply(&self, target: VariableRef, registry: &mut VariableRegistry) -> f64 {
        let delta = self.delta(target, registry);
        registry.apply_delta(target, delta);
        delta
    }

    /// Updates every status in registration order. Later statuses see earlier
    /// statuses' new values; crises are still at the previous tick.
    pub fn apply_statuses(&self, registry: &mut VariableRegistry) -> usize {
        let ids: Vec<StatusId> = registry.status_ids().collect();
        for id in &ids {
            self.apply(VariableRef::Status(*id), registry);
        }
        ids.len()
    }

    pub fn apply_crises(&self, registry: &mut VariableRegistry) -> usize {
        let ids: Vec<CrisisId> = registry.crisis_ids().collect();
        for id in &ids {
            self.apply(VariableRef::Crisis(*id), registry);
        }
        ids.len()
    }

    /// Every variable read by a cause of `target`.
    pub fn sources(&self, target: VariableRef) -> impl Iterator<Item = VariableRef> + '_ {
        self.causes(target).iter().map(|cause| cause.source)
    }
}
