//! Crisis tier machines: four ordered tiers wired by threshold guards, optional
//! cross-crisis escalation blockers, and the settle loop that resolves them.

use tracing::{info, warn};

use crate::presentation::TierObserver;
use crate::state_machine::{
    Guard, MachineError, StateDef, StateMachine, StateMachineDefinition, Transition,
};
use crate::variables::{
    CrisisId, CrisisVariable, TierIndex, VariableRef, VariableRegistry, SEVERE_TIER, TIER_COUNT,
};

/// Everything a crisis guard may read.
#[derive(Debug, Clone, Copy)]
pub struct GuardContext<'a> {
    pub registry: &'a VariableRegistry,
    /// Current tier of every crisis machine, indexed by [`CrisisId`].
    pub tiers: &'a [TierIndex],
}

#[derive(Debug, Clone, PartialEq)]
pub enum CrisisGuard {
    Always,
    ValueAtLeast { crisis: CrisisId, threshold: f64 },
    ValueBelow { crisis: CrisisId, threshold: f64 },
    /// Holds while `crisis` sits strictly below `tier`.
    TierBelow { crisis: CrisisId, tier: TierIndex },
    All(Vec<CrisisGuard>),
    Any(Vec<CrisisGuard>),
}

impl CrisisGuard {
    fn and(self, extra: Vec<CrisisGuard>) -> CrisisGuard {
        if extra.is_empty() {
            return self;
        }
        let mut all = Vec::with_capacity(extra.len() + 1);
        all.push(self);
        all.extend(extra);
        CrisisGuard::All(all)
    }

    /// Crises whose machine tier this guard reads.
    pub fn tier_dependencies(&self, out: &mut Vec<CrisisId>) {
        match self {
            CrisisGuard::TierBelow { crisis, .. } => {
                if !out.contains(crisis) {
                    out.push(*crisis);
                }
            }
            CrisisGuard::All(guards) | CrisisGuard::Any(guards) => {
                for guard in guards {
                    guard.tier_dependencies(out);
                }
            }
            CrisisGuard::Always
            | CrisisGuard::ValueAtLeast { .. }
            | CrisisGuard::ValueBelow { .. } => {}
        }
    }
}

impl<'a> Guard<GuardContext<'a>> for CrisisGuard {
    fn holds(&self, context: &GuardContext<'a>) -> bool {
        match self {
            CrisisGuard::Always => true,
            CrisisGuard::ValueAtLeast { crisis, threshold } => {
                context.registry.value(VariableRef::Crisis(*crisis)) >= *threshold
            }
            CrisisGuard::ValueBelow { crisis, threshold } => {
                context.registry.value(VariableRef::Crisis(*crisis)) < *threshold
            }
            CrisisGuard::TierBelow { crisis, tier } => context
                .tiers
                .get(crisis.index())
                .map_or(true, |current| current < tier),
            CrisisGuard::All(guards) => guards.iter().all(|guard| guard.holds(context)),
            CrisisGuard::Any(guards) => guards.iter().any(|guard| guard.holds(context)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierHookKind {
    Enter,
    Exit,
    Tick,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierHook {
    pub crisis: CrisisId,
    pub tier: TierIndex,
    pub kind: TierHookKind,
}

/// Entering `tier` additionally requires every crisis in `blocked_by` to be below
/// its own severe tiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscalationBlocker {
    pub tier: TierIndex,
    pub blocked_by: Vec<CrisisId>,
}

pub type CrisisStateMachine = StateMachine<CrisisGuard, TierHook>;

fn blocker_guards(blockers: &[EscalationBlocker], tier: TierIndex) -> Vec<CrisisGuard> {
    blockers
        .iter()
        .filter(|blocker| blocker.tier == tier)
        .flat_map(|blocker| blocker.blocked_by.iter())
        .map(|other| CrisisGuard::TierBelow {
            crisis: *other,
            tier: SEVERE_TIER,
        })
        .collect()
}

/// Four-state definition for one crisis. From tier `i` the machine may drop to
/// `i - 1` when the value falls below `thresholds[i - 1]`, or climb to `i + 1`
/// once it reaches `thresholds[i]`; blockers on the target tier are ANDed in.
pub fn crisis_machine_definition(
    id: CrisisId,
    crisis: &CrisisVariable,
    blockers: &[EscalationBlocker],
) -> StateMachineDefinition<CrisisGuard, TierHook> {
    let hook = |tier, kind| TierHook {
        crisis: id,
        tier,
        kind,
    };
    let states = (0..TIER_COUNT)
        .map(|tier| {
            let mut state = StateDef::new(crisis.tier_names[tier].clone());
            state.on_enter = Some(hook(tier, TierHookKind::Enter));
            state.on_exit = Some(hook(tier, TierHookKind::Exit));
            if tier >= SEVERE_TIER {
                state.on_tick = Some(hook(tier, TierHookKind::Tick));
            }
            if tier > 0 {
                let guard = CrisisGuard::ValueBelow {
                    crisis: id,
                    threshold: crisis.thresholds[tier - 1],
                }
                .and(blocker_guards(blockers, tier - 1));
                state
                    .transitions
                    .push(Transition::to(crisis.tier_names[tier - 1].clone()).when(guard));
            }
            if tier + 1 < TIER_COUNT {
                let guard = CrisisGuard::ValueAtLeast {
                    crisis: id,
                    threshold: crisis.thresholds[tier],
                }
                .and(blocker_guards(blockers, tier + 1));
                state
                    .transitions
                    .push(Transition::to(crisis.tier_names[tier + 1].clone()).when(guard));
            }
            state
        })
        .collect();

    StateMachineDefinition {
        initial_state: crisis.tier_names[0].clone(),
        states,
    }
}

pub fn build_crisis_machine(
    id: CrisisId,
    crisis: &CrisisVariable,
    blockers: &[EscalationBlocker],
    emit: &mut impl FnMut(&TierHook),
) -> Result<CrisisStateMachine, MachineError> {
    StateMachine::new(crisis_machine_definition(id, crisis, blockers), emit)
}

fn dispatch(
    hook: &TierHook,
    names: &[String],
    observer: &mut dyn TierObserver,
    manifest: &mut Vec<CrisisId>,
) {
    let name = names
        .get(hook.crisis.index())
        .map(String::as_str)
        .unwrap_or_default();
    match hook.kind {
        TierHookKind::Enter => observer.on_tier_enter(name, hook.tier),
        TierHookKind::Exit => observer.on_tier_exit(name, hook.tier),
        TierHookKind::Tick => {
            if !manifest.contains(&hook.crisis) {
                manifest.push(hook.crisis);
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettleOutcome {
    pub passes: usize,
    pub transitions: usize,
    /// The pass limit stopped the loop before it went quiet.
    pub capped: bool,
    /// Crises whose tier ticked as severe after settling, in registration order.
    pub manifest: Vec<CrisisId>,
}

/// One machine per crisis, stored in registration order.
#[derive(Debug, Clone, Default)]
pub struct CrisisMachines {
    machines: Vec<CrisisStateMachine>,
    tiers: Vec<TierIndex>,
    names: Vec<String>,
}

impl CrisisMachines {
    /// Builds every machine at tier 0, firing each `on_enter` into `observer`.
    pub fn build(
        registry: &VariableRegistry,
        blockers: &[Vec<EscalationBlocker>],
        observer: &mut dyn TierObserver,
    ) -> Result<Self, MachineError> {
        let names: Vec<String> = registry
            .crises()
            .iter()
            .map(|crisis| crisis.name().to_string())
            .collect();
        let mut machines = Vec::with_capacity(names.len());
        let mut unused = Vec::new();
        for id in registry.crisis_ids() {
            let crisis_blockers = blockers.get(id.index()).map(Vec::as_slice).unwrap_or(&[]);
            let machine = build_crisis_machine(
                id,
                registry.crisis(id),
                crisis_blockers,
                &mut |hook| dispatch(hook, &names, &mut *observer, &mut unused),
            )?;
            machines.push(machine);
        }
        let tiers = machines.iter().map(StateMachine::current).collect();
        Ok(Self {
            machines,
            tiers,
            names,
        })
    }

    pub fn len(&self) -> usize {
        self.machines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }

    pub fn tier(&self, crisis: CrisisId) -> Option<TierIndex> {
        self.tiers.get(crisis.index()).copied()
    }

    pub fn tiers(&self) -> &[TierIndex] {
        &self.tiers
    }

    pub fn machine(&self, crisis: CrisisId) -> Option<&CrisisStateMachine> {
        self.machines.get(crisis.index())
    }

    /// Tells `observer` every machine is leaving its current tier. Machines
    /// already at tier 0 stay silent.
    pub fn retire(&self, observer: &mut dyn TierObserver) {
        for (name, tier) in self.names.iter().zip(&self.tiers) {
            if *tier != 0 {
                observer.on_tier_exit(name, *tier);
            }
        }
    }

    /// Tells `observer` about the tier every machine currently sits in.
    pub fn announce(&self, observer: &mut dyn TierObserver) {
        for (name, tier) in self.names.iter().zip(&self.tiers) {
            observer.on_tier_enter(name, *tier);
        }
    }

    /// Crises whose machine could still transition against the current values.
    pub fn pending(&self, registry: &VariableRegistry) -> Vec<CrisisId> {
        let context = GuardContext {
            registry,
            tiers: &self.tiers,
        };
        self.machines
            .iter()
            .enumerate()
            .filter(|(_, machine)| machine.enabled_transition(&context).is_some())
            .map(|(idx, _)| CrisisId(idx as u16))
            .collect()
    }

    /// Runs full transition passes over every machine until one pass changes
    /// nothing or `pass_limit` passes have run, then ticks every machine once.
    pub fn settle(
        &mut self,
        registry: &VariableRegistry,
        pass_limit: usize,
        observer: &mut dyn TierObserver,
    ) -> SettleOutcome {
        let mut outcome = SettleOutcome::default();
        let CrisisMachines {
            machines,
            tiers,
            names,
        } = self;

        loop {
            if outcome.passes >= pass_limit {
                outcome.capped = true;
                break;
            }
            outcome.passes += 1;

            let mut moved = 0;
            for (idx, machine) in machines.iter_mut().enumerate() {
                let from = machine.current();
                let context = GuardContext {
                    registry,
                    tiers: tiers.as_slice(),
                };
                let transitioned = machine.try_transition(&context, &mut |hook| {
                    dispatch(hook, names.as_slice(), &mut *observer, &mut outcome.manifest)
                });
                if !transitioned {
                    continue;
                }
                let to = machine.current();
                tiers[idx] = to;
                moved += 1;
                info!(
                    target: "crisis_core::settle",
                    crisis = %names[idx],
                    from = machine.state_name(from).unwrap_or_default(),
                    to = machine.current_state(),
                    tier = to,
                    pass = outcome.passes,
                    "crisis.tier_transition"
                );
            }

            outcome.transitions += moved;
            if moved == 0 {
                break;
            }
        }

        if outcome.capped {
            let still_pending = self.pending(registry);
            if still_pending.is_empty() {
                outcome.capped = false;
            } else {
                let names: Vec<&str> = still_pending
                    .iter()
                    .map(|id| self.names[id.index()].as_str())
                    .collect();
                warn!(
                    target: "crisis_core::settle",
                    passes = outcome.passes,
                    pending = ?names,
                    "crisis.settle_pass_limit_reached"
                );
            }
        }

        let CrisisMachines {
            machines, names, ..
        } = self;
        for machine in machines.iter() {
            machine.tick(&mut |hook| {
                dispatch(hook, names.as_slice(), &mut *observer, &mut outcome.manifest)
            });
        }
        outcome
    }

    /// Escalation-blocker dependencies: `edges[a]` lists the crises `a` reads.
    pub fn guard_graph(&self) -> GuardGraph {
        let edges = self
            .machines
            .iter()
            .map(|machine| {
                let mut deps = Vec::new();
                for state in 0..machine.state_count() {
                    for (_, guard) in machine.transitions_from(state) {
                        if let Some(guard) = guard {
                            guard.tier_dependencies(&mut deps);
                        }
                    }
                }
                deps
            })
            .collect();
        GuardGraph { edges }
    }
}

/// Directed graph of which crisis guards read which other crisis tiers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuardGraph {
    pub edges: Vec<Vec<CrisisId>>,
}

impl GuardGraph {
    /// Some cycle through the graph, or `None` when it is a DAG.
    pub fn find_cycle(&self) -> Option<Vec<CrisisId>> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Mark {
            Unvisited,
            Active,
            Done,
        }

        let mut marks = vec![Mark::Unvisited; self.edges.len()];
        let mut path: Vec<usize> = Vec::new();

        for root in 0..self.edges.len() {
            if marks[root] != Mark::Unvisited {
                continue;
            }
            // iterative DFS: (node, next edge index)
            let mut stack = vec![(root, 0usize)];
            marks[root] = Mark::Active;
            path.push(root);
            while let Some((node, next)) = stack.last_mut() {
                let node = *node;
                let Some(target) = self.edges[node].get(*next).map(|id| id.index()) else {
                    marks[node] = Mark::Done;
                    path.pop();
                    stack.pop();
                    continue;
                };
                *next += 1;
                if target >= marks.len() {
                    continue;
                }
                match marks[target] {
                    Mark::Active => {
                        let start = path.iter().position(|idx| *idx == target).unwrap_or(0);
                        return Some(
                            path[start..]
                                .iter()
                                .map(|idx| CrisisId(*idx as u16))
                                .collect(),
                        );
                    }
                    Mark::Unvisited => {
                        marks[target] = Mark::Active;
                        path.push(target);
                        stack.push((target, 0));
                    }
                    Mark::Done => {}
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presentation::{TierNoticeKind, WarningBoard};
    use crate::variables::{CrisisCategory, Variable};

    fn crisis(name: &str, value: f64, thresholds: [f64; 3]) -> CrisisVariable {
        CrisisVariable {
            variable: Variable::new(name, value),
            category: CrisisCategory::Finance,
            thresholds,
            tier_names: [
                format!("{name}_0"),
                format!("{name}_1"),
                format!("{name}_2"),
                format!("{name}_3"),
            ],
        }
    }

    fn world(values: &[(&str, f64)]) -> (VariableRegistry, Vec<CrisisId>) {
        let mut registry = VariableRegistry::new();
        let ids = values
            .iter()
            .map(|(name, value)| {
                registry
                    .insert_crisis(crisis(name, *value, [30.0, 50.0, 70.0]))
                    .unwrap()
            })
            .collect();
        (registry, ids)
    }

    fn set(registry: &mut VariableRegistry, id: CrisisId, value: f64) {
        registry.set_value(VariableRef::Crisis(id), value);
    }

    #[test]
    fn definition_has_four_states_with_edge_tiers_trimmed() {
        let (registry, ids) = world(&[("inflation", 0.0)]);
        let definition = crisis_machine_definition(ids[0], registry.crisis(ids[0]), &[]);
        assert_eq!(definition.states.len(), TIER_COUNT);
        assert_eq!(definition.states[0].transitions.len(), 1);
        assert_eq!(definition.states[1].transitions.len(), 2);
        assert_eq!(definition.states[3].transitions.len(), 1);
        assert_eq!(definition.states[0].transitions[0].target, "inflation_1");
        assert_eq!(definition.states[3].transitions[0].target, "inflation_2");
        assert!(definition.states[1].on_tick.is_none());
        assert!(definition.states[2].on_tick.is_some());
    }

    #[test]
    fn settle_climbs_one_tier_per_pass() {
        let (mut registry, ids) = world(&[("inflation", 0.0)]);
        let mut board = WarningBoard::default();
        let mut machines = CrisisMachines::build(&registry, &[], &mut board).unwrap();
        set(&mut registry, ids[0], 75.0);

        let outcome = machines.settle(&registry, 64, &mut board);

        assert_eq!(machines.tier(ids[0]), Some(3));
        assert_eq!(outcome.transitions, 3);
        assert_eq!(outcome.passes, 4);
        assert!(!outcome.capped);
        assert_eq!(outcome.manifest, vec![ids[0]]);
        assert!(board.is_visible("inflation"));
    }

    #[test]
    fn settle_leaves_no_enabled_transition() {
        let (mut registry, ids) = world(&[("b", 0.0), ("a", 0.0), ("c", 90.0)]);
        let blockers = vec![
            vec![],
            vec![EscalationBlocker {
                tier: 2,
                blocked_by: vec![ids[0]],
            }],
            vec![],
        ];
        let mut machines =
            CrisisMachines::build(&registry, &blockers, &mut crate::NullObserver).unwrap();
        set(&mut registry, ids[0], 55.0);
        set(&mut registry, ids[1], 60.0);

        machines.settle(&registry, 64, &mut crate::NullObserver);

        assert!(machines.pending(&registry).is_empty());
        assert_eq!(machines.tier(ids[0]), Some(2));
        // b turned severe one pass before a could leave tier 1
        assert_eq!(machines.tier(ids[1]), Some(1));
        assert_eq!(machines.tier(ids[2]), Some(3));
    }

    #[test]
    fn cascade_resolves_within_one_settle() {
        // a is blocked by b; b drops out of its severe tiers during the same settle
        let (mut registry, ids) = world(&[("a", 0.0), ("b", 0.0)]);
        let blockers = vec![
            vec![EscalationBlocker {
                tier: 2,
                blocked_by: vec![ids[1]],
            }],
            vec![],
        ];
        let mut machines =
            CrisisMachines::build(&registry, &blockers, &mut crate::NullObserver).unwrap();
        set(&mut registry, ids[1], 60.0);
        machines.settle(&registry, 64, &mut crate::NullObserver);
        assert_eq!(machines.tier(ids[1]), Some(2));

        set(&mut registry, ids[0], 60.0);
        set(&mut registry, ids[1], 10.0);
        machines.settle(&registry, 64, &mut crate::NullObserver);

        assert_eq!(machines.tier(ids[1]), Some(0));
        assert_eq!(machines.tier(ids[0]), Some(2));
    }

    #[test]
    fn blocker_also_guards_downward_moves_into_its_tier() {
        let (mut registry, ids) = world(&[("a", 80.0), ("b", 0.0)]);
        let blockers = vec![
            vec![EscalationBlocker {
                tier: 2,
                blocked_by: vec![ids[1]],
            }],
            vec![],
        ];
        let mut machines =
            CrisisMachines::build(&registry, &blockers, &mut crate::NullObserver).unwrap();
        machines.settle(&registry, 64, &mut crate::NullObserver);
        assert_eq!(machines.tier(ids[0]), Some(3));

        set(&mut registry, ids[1], 60.0);
        machines.settle(&registry, 64, &mut crate::NullObserver);
        assert_eq!(machines.tier(ids[1]), Some(2));

        set(&mut registry, ids[0], 55.0);
        machines.settle(&registry, 64, &mut crate::NullObserver);
        assert_eq!(machines.tier(ids[0]), Some(3));

        set(&mut registry, ids[1], 0.0);
        machines.settle(&registry, 64, &mut crate::NullObserver);
        assert_eq!(machines.tier(ids[1]), Some(0));
        assert_eq!(machines.tier(ids[0]), Some(2));
    }

    #[test]
    fn pass_limit_stops_the_loop_and_still_ticks() {
        let (mut registry, ids) = world(&[("inflation", 0.0)]);
        let mut machines =
            CrisisMachines::build(&registry, &[], &mut crate::NullObserver).unwrap();
        set(&mut registry, ids[0], 90.0);

        let outcome = machines.settle(&registry, 2, &mut crate::NullObserver);
        assert!(outcome.capped);
        assert_eq!(outcome.passes, 2);
        assert_eq!(machines.tier(ids[0]), Some(2));
        assert_eq!(outcome.manifest, vec![ids[0]]);

        let outcome = machines.settle(&registry, 2, &mut crate::NullObserver);
        assert!(!outcome.capped);
        assert_eq!(machines.tier(ids[0]), Some(3));
    }

    #[test]
    fn mutual_blockers_are_reported_as_a_cycle() {
        let (registry, ids) = world(&[("a", 80.0), ("b", 80.0)]);
        let blockers = vec![
            vec![EscalationBlocker {
                tier: 2,
                blocked_by: vec![ids[1]],
            }],
            vec![EscalationBlocker {
                tier: 2,
                blocked_by: vec![ids[0]],
            }],
        ];
        let mut machines =
            CrisisMachines::build(&registry, &blockers, &mut crate::NullObserver).unwrap();
        let outcome = machines.settle(&registry, 64, &mut crate::NullObserver);

        // registration order decides who escalates first
        assert!(!outcome.capped);
        assert_eq!(machines.tier(ids[0]), Some(3));
        assert_eq!(machines.tier(ids[1]), Some(1));
        assert!(machines.guard_graph().find_cycle().is_some());
    }

    #[test]
    fn tier_notices_reach_the_observer_in_hook_order() {
        let (mut registry, ids) = world(&[("epidemic", 0.0)]);
        let mut board = WarningBoard::default();
        let mut machines = CrisisMachines::build(&registry, &[], &mut board).unwrap();
        set(&mut registry, ids[0], 35.0);
        machines.settle(&registry, 64, &mut board);

        let notices: Vec<(TierIndex, TierNoticeKind)> = board
            .recent()
            .iter()
            .map(|notice| (notice.tier, notice.kind))
            .collect();
        assert_eq!(
            notices,
            vec![
                (0, TierNoticeKind::Entered),
                (0, TierNoticeKind::Exited),
                (1, TierNoticeKind::Entered),
            ]
        );
        assert!(!board.is_visible("epidemic"));
    }

    #[test]
    fn retire_exits_every_raised_tier() {
        let (mut registry, ids) = world(&[("epidemic", 0.0), ("famine", 0.0)]);
        let mut board = WarningBoard::default();
        let mut machines = CrisisMachines::build(&registry, &[], &mut board).unwrap();
        set(&mut registry, ids[0], 80.0);
        machines.settle(&registry, 64, &mut board);
        assert!(board.is_visible("epidemic"));

        let before = board.recent().len();
        machines.retire(&mut board);

        assert!(!board.is_visible("epidemic"));
        let exits: Vec<(&str, TierIndex, TierNoticeKind)> = board.recent()[before..]
            .iter()
            .map(|notice| (notice.crisis.as_str(), notice.tier, notice.kind))
            .collect();
        assert_eq!(exits, vec![("epidemic", 3, TierNoticeKind::Exited)]);
    }

    #[test]
    fn guard_graph_detects_cycles() {
        let acyclic = GuardGraph {
            edges: vec![vec![CrisisId(1)], vec![CrisisId(2)], vec![]],
        };
        assert_eq!(acyclic.find_cycle(), None);

        let cyclic = GuardGraph {
            edges: vec![vec![CrisisId(1)], vec![CrisisId(2)], vec![CrisisId(0)]],
        };
        let cycle = cyclic.find_cycle().expect("cycle");
        assert_eq!(cycle, vec![CrisisId(0), CrisisId(1), CrisisId(2)]);
    }
}
