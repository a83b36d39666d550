//! Declarative finite state machine executor.
//!
//! Hooks are plain data payloads `E` handed to a sink supplied by the caller, and
//! guards are values implementing [`Guard`] over some context `C`. A machine never
//! captures the state it reads, so the same definition can be evaluated against any
//! context the caller builds.

use thiserror::Error;

pub type StateId = usize;

/// Side-effect-free predicate evaluated against a caller-provided context.
pub trait Guard<C: ?Sized> {
    fn holds(&self, context: &C) -> bool;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition<G, E> {
    pub target: String,
    /// `None` always passes.
    pub guard: Option<G>,
    pub action: Option<E>,
}

impl<G, E> Transition<G, E> {
    pub fn to(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            guard: None,
            action: None,
        }
    }

    pub fn when(mut self, guard: G) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn with_action(mut self, action: E) -> Self {
        self.action = Some(action);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StateDef<G, E> {
    pub name: String,
    pub on_enter: Option<E>,
    pub on_exit: Option<E>,
    pub on_tick: Option<E>,
    /// Evaluated in order; the first satisfied guard wins.
    pub transitions: Vec<Transition<G, E>>,
}

impl<G, E> StateDef<G, E> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            on_enter: None,
            on_exit: None,
            on_tick: None,
            transitions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StateMachineDefinition<G, E> {
    pub initial_state: String,
    pub states: Vec<StateDef<G, E>>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MachineError {
    #[error("initial state {0} is not declared")]
    UnknownInitialState(String),
    #[error("state {from} has a transition to undeclared state {target}")]
    UnknownTarget { from: String, target: String },
    #[error("state {0} is declared twice")]
    DuplicateState(String),
}

#[derive(Debug, Clone)]
struct CompiledTransition<G, E> {
    target: StateId,
    guard: Option<G>,
    action: Option<E>,
}

#[derive(Debug, Clone)]
struct CompiledState<G, E> {
    name: String,
    on_enter: Option<E>,
    on_exit: Option<E>,
    on_tick: Option<E>,
    transitions: Vec<CompiledTransition<G, E>>,
}

/// A running machine. Every transition target is resolved when the machine is
/// built, so `current` always names a declared state.
#[derive(Debug, Clone)]
pub struct StateMachine<G, E> {
    states: Vec<CompiledState<G, E>>,
    current: StateId,
}

impl<G, E> StateMachine<G, E> {
    /// Builds the machine and fires the initial state's `on_enter`.
    pub fn new(
        definition: StateMachineDefinition<G, E>,
        emit: &mut impl FnMut(&E),
    ) -> Result<Self, MachineError> {
        let names: Vec<String> = definition
            .states
            .iter()
            .map(|state| state.name.clone())
            .collect();
        for (idx, name) in names.iter().enumerate() {
            if names[..idx].contains(name) {
                return Err(MachineError::DuplicateState(name.clone()));
            }
        }
        let lookup = |name: &str| names.iter().position(|candidate| candidate == name);

        let initial = lookup(&definition.initial_state)
            .ok_or_else(|| MachineError::UnknownInitialState(definition.initial_state.clone()))?;

        let mut states = Vec::with_capacity(definition.states.len());
        for state in definition.states {
            let mut transitions = Vec::with_capacity(state.transitions.len());
            for transition in state.transitions {
                let target =
                    lookup(&transition.target).ok_or_else(|| MachineError::UnknownTarget {
                        from: state.name.clone(),
                        target: transition.target.clone(),
                    })?;
                transitions.push(CompiledTransition {
                    target,
                    guard: transition.guard,
                    action: transition.action,
                });
            }
            states.push(CompiledState {
                name: state.name,
                on_enter: state.on_enter,
                on_exit: state.on_exit,
                on_tick: state.on_tick,
                transitions,
            });
        }

        let machine = Self {
            states,
            current: initial,
        };
        if let Some(hook) = &machine.states[initial].on_enter {
            emit(hook);
        }
        Ok(machine)
    }

    pub fn current(&self) -> StateId {
        self.current
    }

    pub fn current_state(&self) -> &str {
        &self.states[self.current].name
    }

    pub fn state_name(&self, state: StateId) -> Option<&str> {
        self.states.get(state).map(|state| state.name.as_str())
    }

    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    /// Index of the first transition out of the current state whose guard holds.
    pub fn enabled_transition<C: ?Sized>(&self, context: &C) -> Option<usize>
    where
        G: Guard<C>,
    {
        self.states[self.current]
            .transitions
            .iter()
            .position(|transition| {
                transition
                    .guard
                    .as_ref()
                    .map_or(true, |guard| guard.holds(context))
            })
    }

    /// Takes the first enabled transition, if any.
    ///
    /// Hooks fire as transition action, then `on_exit` of the old state, then
    /// `on_enter` of the new one. Returns whether a transition happened.
    pub fn try_transition<C: ?Sized>(&mut self, context: &C, emit: &mut impl FnMut(&E)) -> bool
    where
        G: Guard<C>,
    {
        let Some(index) = self.enabled_transition(context) else {
            return false;
        };
        let source = &self.states[self.current];
        let transition = &source.transitions[index];
        let target = transition.target;
        if let Some(action) = &transition.action {
            emit(action);
        }
        if let Some(hook) = &source.on_exit {
            emit(hook);
        }
        if let Some(hook) = &self.states[target].on_enter {
            emit(hook);
        }
        self.current = target;
        true
    }

    /// Fires the current state's `on_tick`. No transitions are evaluated.
    pub fn tick(&self, emit: &mut impl FnMut(&E)) {
        if let Some(hook) = &self.states[self.current].on_tick {
            emit(hook);
        }
    }

    /// Targets reachable from `state` in declaration order, with their guards.
    pub fn transitions_from(
        &self,
        state: StateId,
    ) -> impl Iterator<Item = (StateId, Option<&G>)> + '_ {
        self.states
            .get(state)
            .into_iter()
            .flat_map(|state| state.transitions.iter())
            .map(|transition| (transition.target, transition.guard.as_ref()))
    }
}
