//! Transition table, global transitions and the baseline workflow shape.

use super::events::EventId;
use super::guards::{
    CanFinish, CanRedo, CanReview, CanUndo, Guard, HasSource, HasSpecifications,
};
use super::states::{StateId, StateInfo, StateRegistry};
use crate::effects::CriticalEffect;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A candidate move: taken when the machine is in `from`, receives `event`,
/// and every guard passes.
#[derive(Clone)]
pub struct Transition {
    pub from: StateId,
    pub event: EventId,
    pub to: StateId,
    pub guards: Vec<Arc<dyn Guard>>,
    pub effects: Vec<CriticalEffect>,
}

impl Transition {
    pub fn new(from: StateId, event: EventId, to: StateId) -> Self {
        Self {
            from,
            event,
            to,
            guards: Vec::new(),
            effects: Vec::new(),
        }
    }

    pub fn guarded(mut self, guard: Arc<dyn Guard>) -> Self {
        self.guards.push(guard);
        self
    }

    pub fn with_effect(mut self, effect: CriticalEffect) -> Self {
        self.effects.push(effect);
        self
    }
}

impl fmt::Debug for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transition")
            .field("from", &self.from)
            .field("event", &self.event)
            .field("to", &self.to)
            .field(
                "guards",
                &self.guards.iter().map(|g| g.name()).collect::<Vec<_>>(),
            )
            .field(
                "effects",
                &self.effects.iter().map(|e| e.name.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Candidate transitions keyed by (from-state, event).
///
/// A key may hold several candidates; dispatch takes the first whose guards
/// all pass, in registration order.
#[derive(Debug, Clone, Default)]
pub struct TransitionTable {
    transitions: HashMap<(StateId, EventId), Vec<Transition>>,
}

impl TransitionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, transition: Transition) {
        let key = (transition.from.clone(), transition.event.clone());
        self.transitions.entry(key).or_default().push(transition);
    }

    pub fn get(&self, from: &StateId, event: &EventId) -> Option<&Vec<Transition>> {
        self.transitions.get(&(from.clone(), event.clone()))
    }

    pub fn get_mut(&mut self, from: &StateId, event: &EventId) -> Option<&mut Vec<Transition>> {
        self.transitions.get_mut(&(from.clone(), event.clone()))
    }

    pub fn can_transition(&self, from: &StateId, event: &EventId) -> bool {
        self.get(from, event).is_some_and(|c| !c.is_empty())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Transition> {
        self.transitions.values().flatten()
    }
}

/// Event-to-target moves applied from any current state, consulted before
/// the keyed table.
pub type GlobalTransitions = HashMap<EventId, StateId>;

/// Ordered list of the built-in main phases.
pub fn baseline_phase_order() -> Vec<StateId> {
    vec![
        StateId::idle(),
        StateId::planning(),
        StateId::implementing(),
        StateId::reviewing(),
        StateId::done(),
    ]
}

/// Registry of the built-in states and their metadata.
pub fn baseline_registry() -> StateRegistry {
    let mut registry = StateRegistry::new();
    registry.insert(StateInfo::new(StateId::idle(), "Between phases, awaiting a command").phase());
    registry.insert(StateInfo::new(StateId::planning(), "Producing specifications").phase());
    registry.insert(StateInfo::new(StateId::implementing(), "Applying changes").phase());
    registry.insert(StateInfo::new(StateId::reviewing(), "Reviewing applied changes").phase());
    registry.insert(StateInfo::new(StateId::done(), "Workflow finished").phase().terminal());
    registry.insert(StateInfo::new(StateId::failed(), "Aborted; recoverable via reset"));
    registry.insert(StateInfo::new(StateId::waiting(), "Blocked on a user answer"));
    registry.insert(StateInfo::new(StateId::checkpointing(), "Recording a checkpoint"));
    registry.insert(StateInfo::new(StateId::reverting(), "Rolling back to a checkpoint"));
    registry.insert(StateInfo::new(StateId::restoring(), "Re-applying an undone checkpoint"));
    registry
}

/// Global transitions applied from any state: `abort` fails the workflow.
pub fn baseline_globals() -> GlobalTransitions {
    let mut globals = GlobalTransitions::new();
    globals.insert(EventId::abort(), StateId::failed());
    globals
}

/// The baseline transition table.
pub fn baseline_table() -> TransitionTable {
    let idle = StateId::idle;
    let mut table = TransitionTable::new();

    table.add(
        Transition::new(idle(), EventId::start(), idle()).guarded(Arc::new(HasSource)),
    );

    // Planning.
    table.add(Transition::new(idle(), EventId::plan(), StateId::planning()));
    table.add(Transition::new(StateId::planning(), EventId::plan_done(), idle()));
    table.add(Transition::new(StateId::planning(), EventId::error(), idle()));
    table.add(Transition::new(StateId::planning(), EventId::checkpoint(), StateId::checkpointing()));
    table.add(Transition::new(StateId::planning(), EventId::wait(), StateId::waiting()));
    table.add(Transition::new(StateId::waiting(), EventId::answer(), idle()));
    table.add(Transition::new(StateId::waiting(), EventId::plan(), StateId::planning()));

    // Implementation.
    table.add(
        Transition::new(idle(), EventId::implement(), StateId::implementing())
            .guarded(Arc::new(HasSpecifications)),
    );
    table.add(Transition::new(StateId::implementing(), EventId::implement_done(), idle()));
    table.add(Transition::new(StateId::implementing(), EventId::error(), idle()));
    table.add(Transition::new(StateId::implementing(), EventId::checkpoint(), StateId::checkpointing()));
    table.add(
        Transition::new(StateId::implementing(), EventId::undo(), StateId::reverting())
            .guarded(Arc::new(CanUndo)),
    );

    // Review and finish.
    table.add(
        Transition::new(idle(), EventId::review(), StateId::reviewing())
            .guarded(Arc::new(CanReview)),
    );
    table.add(Transition::new(StateId::reviewing(), EventId::review_done(), idle()));
    table.add(Transition::new(StateId::reviewing(), EventId::error(), idle()));
    table.add(
        Transition::new(idle(), EventId::finish(), StateId::done()).guarded(Arc::new(CanFinish)),
    );

    // Recovery.
    table.add(Transition::new(StateId::failed(), EventId::reset(), idle()));

    // Checkpoints and undo/redo.
    table.add(Transition::new(StateId::checkpointing(), EventId::checkpoint_done(), idle()));
    table.add(
        Transition::new(idle(), EventId::undo(), StateId::reverting()).guarded(Arc::new(CanUndo)),
    );
    table.add(
        Transition::new(idle(), EventId::redo(), StateId::restoring()).guarded(Arc::new(CanRedo)),
    );
    table.add(Transition::new(StateId::reverting(), EventId::undo_done(), idle()));
    table.add(Transition::new(StateId::restoring(), EventId::redo_done(), idle()));

    table
}
