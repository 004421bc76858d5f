//! Machine construction with plugin-supplied phase splicing.
//!
//! The builder starts from deep copies of the baseline shape; plugins add
//! phases between existing ones rather than replacing or reordering them,
//! so the linear planning → implementing → reviewing → done flow the host
//! relies on stays intact.

use super::events::EventId;
use super::guards::Guard;
use super::states::{StateId, StateInfo, StateRegistry};
use super::transitions::{
    baseline_globals, baseline_phase_order, baseline_registry, baseline_table, GlobalTransitions,
    Transition, TransitionTable,
};
use super::Machine;
use crate::bus::EventBus;
use crate::effects::CriticalEffect;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Invalid phase definitions or rewiring targets, detected at build time.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BuilderError {
    #[error("phase state name must not be empty")]
    EmptyStateName,

    #[error("state '{0}' is already registered")]
    DuplicateState(String),

    #[error("phase '{0}' must declare an entry event")]
    MissingEntryEvent(String),

    #[error("phase '{0}' must declare an exit event")]
    MissingExitEvent(String),

    #[error("phase '{0}' must anchor with exactly one of 'after' or 'before'")]
    InvalidAnchor(String),

    #[error("anchor state '{anchor}' for phase '{phase}' is not in the phase order")]
    AnchorNotFound { phase: String, anchor: String },

    #[error("no transition from state '{from}' for event '{event}'")]
    UnknownTransition { from: StateId, event: EventId },
}

/// A main phase to splice into the lifecycle.
#[derive(Clone)]
pub struct PhaseDefinition {
    /// Unique state name for the new phase.
    pub state: StateId,
    pub description: String,
    /// Insert immediately after this phase.
    pub after: Option<StateId>,
    /// Insert immediately before this phase.
    pub before: Option<StateId>,
    /// Event that enters the phase from its anchor.
    pub entry_event: EventId,
    /// Event that completes the phase back to idle.
    pub exit_event: EventId,
    /// Guards attached to the entry transition.
    pub entry_guards: Vec<Arc<dyn Guard>>,
    /// Effects attached to the entry transition.
    pub effects: Vec<CriticalEffect>,
}

impl PhaseDefinition {
    pub fn new(
        state: impl Into<StateId>,
        entry_event: impl Into<EventId>,
        exit_event: impl Into<EventId>,
    ) -> Self {
        Self {
            state: state.into(),
            description: String::new(),
            after: None,
            before: None,
            entry_event: entry_event.into(),
            exit_event: exit_event.into(),
            entry_guards: Vec::new(),
            effects: Vec::new(),
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn after(mut self, anchor: impl Into<StateId>) -> Self {
        self.after = Some(anchor.into());
        self
    }

    pub fn before(mut self, anchor: impl Into<StateId>) -> Self {
        self.before = Some(anchor.into());
        self
    }

    pub fn guarded(mut self, guard: Arc<dyn Guard>) -> Self {
        self.entry_guards.push(guard);
        self
    }

    pub fn with_effect(mut self, effect: CriticalEffect) -> Self {
        self.effects.push(effect);
        self
    }
}

impl fmt::Debug for PhaseDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhaseDefinition")
            .field("state", &self.state)
            .field("after", &self.after)
            .field("before", &self.before)
            .field("entry_event", &self.entry_event)
            .field("exit_event", &self.exit_event)
            .finish()
    }
}

/// Builds a [`Machine`] whose shape is customised before instantiation.
pub struct MachineBuilder {
    registry: StateRegistry,
    table: TransitionTable,
    globals: GlobalTransitions,
    phase_order: Vec<StateId>,
}

impl MachineBuilder {
    /// Seeds the builder with copies of the baseline shape.
    pub fn new() -> Self {
        Self {
            registry: baseline_registry(),
            table: baseline_table(),
            globals: baseline_globals(),
            phase_order: baseline_phase_order(),
        }
    }

    /// Splices a custom main phase into the lifecycle.
    ///
    /// Wires three transitions: anchor --entry--> phase (with the declared
    /// guards and effects), phase --exit--> idle, phase --error--> idle.
    pub fn register_phase(&mut self, definition: PhaseDefinition) -> Result<(), BuilderError> {
        let name = definition.state.clone();
        if name.is_empty() {
            return Err(BuilderError::EmptyStateName);
        }
        if self.registry.contains(&name) {
            return Err(BuilderError::DuplicateState(name.to_string()));
        }
        if definition.entry_event.is_empty() {
            return Err(BuilderError::MissingEntryEvent(name.to_string()));
        }
        if definition.exit_event.is_empty() {
            return Err(BuilderError::MissingExitEvent(name.to_string()));
        }

        let (anchor, insert_after) = match (&definition.after, &definition.before) {
            (Some(anchor), None) => (anchor.clone(), true),
            (None, Some(anchor)) => (anchor.clone(), false),
            _ => return Err(BuilderError::InvalidAnchor(name.to_string())),
        };
        let anchor_index = self
            .phase_order
            .iter()
            .position(|p| *p == anchor)
            .ok_or_else(|| BuilderError::AnchorNotFound {
                phase: name.to_string(),
                anchor: anchor.to_string(),
            })?;

        self.registry
            .insert(StateInfo::new(name.clone(), definition.description.clone()).phase());

        let position = if insert_after { anchor_index + 1 } else { anchor_index };
        self.phase_order.insert(position, name.clone());

        let mut entry = Transition::new(anchor, definition.entry_event, name.clone());
        entry.guards = definition.entry_guards;
        entry.effects = definition.effects;
        self.table.add(entry);
        self.table
            .add(Transition::new(name.clone(), definition.exit_event, StateId::idle()));
        self.table
            .add(Transition::new(name, EventId::error(), StateId::idle()));

        Ok(())
    }

    /// Appends a guard to every candidate transition at (from, event).
    pub fn add_guard_to_transition(
        &mut self,
        from: &StateId,
        event: &EventId,
        guard: Arc<dyn Guard>,
    ) -> Result<(), BuilderError> {
        let candidates =
            self.table
                .get_mut(from, event)
                .ok_or_else(|| BuilderError::UnknownTransition {
                    from: from.clone(),
                    event: event.clone(),
                })?;
        for transition in candidates {
            transition.guards.push(Arc::clone(&guard));
        }
        Ok(())
    }

    /// Appends an effect to every candidate transition at (from, event).
    pub fn add_effect_to_transition(
        &mut self,
        from: &StateId,
        event: &EventId,
        effect: CriticalEffect,
    ) -> Result<(), BuilderError> {
        let candidates =
            self.table
                .get_mut(from, event)
                .ok_or_else(|| BuilderError::UnknownTransition {
                    from: from.clone(),
                    event: event.clone(),
                })?;
        for transition in candidates {
            transition.effects.push(effect.clone());
        }
        Ok(())
    }

    /// Adds an auxiliary (non-phase) state with no wired transitions.
    pub fn register_state(&mut self, info: StateInfo) -> Result<(), BuilderError> {
        if !self.registry.insert(info.clone()) {
            return Err(BuilderError::DuplicateState(info.id.to_string()));
        }
        Ok(())
    }

    /// Appends a candidate transition at its key.
    pub fn register_transition(&mut self, transition: Transition) {
        self.table.add(transition);
    }

    pub fn has_state(&self, id: &StateId) -> bool {
        self.registry.contains(id)
    }

    pub fn has_transition(&self, from: &StateId, event: &EventId) -> bool {
        self.table.can_transition(from, event)
    }

    pub fn phase_order(&self) -> &[StateId] {
        &self.phase_order
    }

    /// Finalises the machine; notifications go to `bus`.
    pub fn build(self, bus: EventBus) -> Machine {
        Machine::from_parts(self.registry, self.table, self.globals, self.phase_order, bus)
    }
}

impl Default for MachineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
