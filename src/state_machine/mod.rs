//! Phase-based workflow state machine.
//!
//! The machine is the single source of truth for transition legality. It
//! owns the current state, the work-unit handle, the history and the
//! undo/redo stacks, all behind one mutex. Effects attached to a taken
//! transition are returned to the host, never executed here.

mod builder;
mod events;
mod guards;
mod states;
mod transitions;

pub use builder::{BuilderError, MachineBuilder, PhaseDefinition};
pub use events::EventId;
pub use guards::{
    evaluate_guards, CanFinish, CanRedo, CanReview, CanUndo, FnGuard, Guard, HasSource,
    HasSpecifications, NoSpecifications,
};
pub use states::{StateId, StateInfo, StateRegistry};
pub use transitions::{
    baseline_globals, baseline_phase_order, baseline_registry, baseline_table, GlobalTransitions,
    Transition, TransitionTable,
};

use crate::bus::{EventBus, StateChange};
use crate::context::Context;
use crate::effects::CriticalEffect;
use crate::work_unit::{WorkUnit, WorkUnitHandle};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};

/// Upper bound on concurrently running listener invocations.
const MAX_CONCURRENT_LISTENERS: usize = 10;

/// Recoverable dispatch failures. Neither variant mutates state.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MachineError {
    /// No candidate transition exists for (state, event).
    #[error("no transition from state '{state}' for event '{event}'")]
    NoTransition { state: StateId, event: EventId },

    /// Candidates exist but every one was rejected by its guards.
    #[error("guards rejected event '{event}' in state '{state}'")]
    GuardRejected { state: StateId, event: EventId },
}

/// One committed transition, recorded for the lifetime of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub from: StateId,
    pub to: StateId,
    pub event: EventId,
}

/// Result of a successful dispatch. The host runs `effects` through the
/// effect pipeline after the state change is committed.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub from: StateId,
    pub to: StateId,
    pub event: EventId,
    pub effects: Vec<CriticalEffect>,
}

/// Callback invoked on every committed transition, outside the machine lock.
pub type Listener = Arc<dyn Fn(StateChange) + Send + Sync>;

struct MachineInner {
    current: StateId,
    registry: StateRegistry,
    table: TransitionTable,
    globals: GlobalTransitions,
    phase_order: Vec<StateId>,
    work_unit: Option<WorkUnitHandle>,
    history: Vec<HistoryEntry>,
    undo: Vec<String>,
    redo: Vec<String>,
    listeners: Vec<Listener>,
}

impl MachineInner {
    fn commit(&mut self, event: &EventId, to: StateId) -> StateChange {
        let from = std::mem::replace(&mut self.current, to.clone());
        self.history.push(HistoryEntry {
            from: from.clone(),
            to: to.clone(),
            event: event.clone(),
        });
        StateChange {
            from,
            to,
            event: event.clone(),
        }
    }
}

/// Thread-safe custodian of the workflow state.
pub struct Machine {
    inner: Mutex<MachineInner>,
    bus: EventBus,
    listener_limit: Arc<Semaphore>,
}

impl Machine {
    /// A machine with the baseline workflow shape.
    pub fn new(bus: EventBus) -> Self {
        MachineBuilder::new().build(bus)
    }

    pub(crate) fn from_parts(
        registry: StateRegistry,
        table: TransitionTable,
        globals: GlobalTransitions,
        phase_order: Vec<StateId>,
        bus: EventBus,
    ) -> Self {
        Self {
            inner: Mutex::new(MachineInner {
                current: StateId::idle(),
                registry,
                table,
                globals,
                phase_order,
                work_unit: None,
                history: Vec::new(),
                undo: Vec::new(),
                redo: Vec::new(),
                listeners: Vec::new(),
            }),
            bus,
            listener_limit: Arc::new(Semaphore::new(MAX_CONCURRENT_LISTENERS)),
        }
    }

    /// Attempts a transition for `event`.
    ///
    /// Global transitions are consulted first and apply unconditionally.
    /// Otherwise the first candidate at (current, event) whose guards all
    /// pass is taken. On success the state change is committed, published
    /// to the bus, fanned out to listeners, and the transition's effects
    /// are handed back for the host to execute.
    pub async fn dispatch(
        &self,
        ctx: &Context,
        event: &EventId,
    ) -> Result<DispatchOutcome, MachineError> {
        let mut inner = self.inner.lock().await;

        if let Some(target) = inner.globals.get(event).cloned() {
            let change = inner.commit(event, target);
            let listeners = inner.listeners.clone();
            drop(inner);
            return Ok(self.publish(change, Vec::new(), listeners));
        }

        let candidates = match inner.table.get(&inner.current, event) {
            Some(candidates) if !candidates.is_empty() => candidates.clone(),
            _ => {
                return Err(MachineError::NoTransition {
                    state: inner.current.clone(),
                    event: event.clone(),
                })
            }
        };

        let snapshot = match &inner.work_unit {
            Some(handle) => Some(handle.lock().await.clone()),
            None => None,
        };

        let mut taken = None;
        for candidate in candidates {
            if evaluate_guards(&candidate.guards, ctx, snapshot.as_ref()).await {
                taken = Some(candidate);
                break;
            }
        }
        let Some(transition) = taken else {
            return Err(MachineError::GuardRejected {
                state: inner.current.clone(),
                event: event.clone(),
            });
        };

        let change = inner.commit(event, transition.to.clone());
        let listeners = inner.listeners.clone();
        drop(inner);

        Ok(self.publish(change, transition.effects, listeners))
    }

    /// Read-only probe: would `event` succeed right now, and if not, why?
    pub async fn can_dispatch(&self, ctx: &Context, event: &EventId) -> (bool, String) {
        let inner = self.inner.lock().await;

        if inner.globals.contains_key(event) {
            return (true, String::new());
        }

        let candidates = match inner.table.get(&inner.current, event) {
            Some(candidates) if !candidates.is_empty() => candidates.clone(),
            _ => {
                return (
                    false,
                    format!(
                        "no transition from state '{}' for event '{}'",
                        inner.current, event
                    ),
                )
            }
        };

        let snapshot = match &inner.work_unit {
            Some(handle) => Some(handle.lock().await.clone()),
            None => None,
        };

        for candidate in &candidates {
            if evaluate_guards(&candidate.guards, ctx, snapshot.as_ref()).await {
                return (true, String::new());
            }
        }
        (
            false,
            format!(
                "guards rejected event '{}' in state '{}'",
                event, inner.current
            ),
        )
    }

    fn publish(
        &self,
        change: StateChange,
        effects: Vec<CriticalEffect>,
        listeners: Vec<Listener>,
    ) -> DispatchOutcome {
        self.bus.publish(change.clone());

        // Listeners run on their own tasks so a listener that dispatches
        // (or blocks) can never deadlock against the machine lock. The
        // semaphore bounds how many run at once.
        for listener in listeners {
            let limit = Arc::clone(&self.listener_limit);
            let change = change.clone();
            tokio::spawn(async move {
                let Ok(_permit) = limit.acquire_owned().await else {
                    return;
                };
                listener(change);
            });
        }

        DispatchOutcome {
            from: change.from,
            to: change.to,
            event: change.event,
            effects,
        }
    }

    pub async fn current_state(&self) -> StateId {
        self.inner.lock().await.current.clone()
    }

    /// Whether the current state is terminal per its registry metadata.
    pub async fn is_terminal(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.registry.is_terminal(&inner.current)
    }

    /// Installs the work-unit handle. Must happen before any dispatch whose
    /// guards read work-unit fields.
    pub async fn set_work_unit(&self, work_unit: WorkUnitHandle) {
        self.inner.lock().await.work_unit = Some(work_unit);
    }

    pub async fn work_unit(&self) -> Option<WorkUnitHandle> {
        self.inner.lock().await.work_unit.clone()
    }

    /// Snapshot of the current work unit, if one is installed.
    pub async fn work_unit_snapshot(&self) -> Option<WorkUnit> {
        let handle = self.work_unit().await?;
        let snapshot = handle.lock().await.clone();
        Some(snapshot)
    }

    /// Defensive copy of the transition history.
    pub async fn history(&self) -> Vec<HistoryEntry> {
        self.inner.lock().await.history.clone()
    }

    /// Forces the machine back to `idle`, clearing the work unit, history
    /// and both stacks. Listeners stay registered.
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        inner.current = StateId::idle();
        inner.work_unit = None;
        inner.history.clear();
        inner.undo.clear();
        inner.redo.clear();
    }

    /// Pushes a checkpoint onto the undo stack. Recording a new checkpoint
    /// invalidates anything that was redoable.
    pub async fn push_undo(&self, checkpoint: impl Into<String>) {
        let mut inner = self.inner.lock().await;
        inner.undo.push(checkpoint.into());
        inner.redo.clear();
    }

    /// Moves the top of the undo stack to the redo stack and returns it.
    pub async fn pop_undo(&self) -> Option<String> {
        let mut inner = self.inner.lock().await;
        let checkpoint = inner.undo.pop()?;
        inner.redo.push(checkpoint.clone());
        Some(checkpoint)
    }

    /// Moves the top of the redo stack back to the undo stack and returns it.
    pub async fn pop_redo(&self) -> Option<String> {
        let mut inner = self.inner.lock().await;
        let checkpoint = inner.redo.pop()?;
        inner.undo.push(checkpoint.clone());
        Some(checkpoint)
    }

    pub async fn can_undo(&self) -> bool {
        !self.inner.lock().await.undo.is_empty()
    }

    pub async fn can_redo(&self) -> bool {
        !self.inner.lock().await.redo.is_empty()
    }

    /// Ordered list of main phases, including any spliced by plugins.
    pub async fn phase_order(&self) -> Vec<StateId> {
        self.inner.lock().await.phase_order.clone()
    }

    /// Registers a callback invoked on every committed transition.
    pub async fn add_listener<F>(&self, listener: F)
    where
        F: Fn(StateChange) + Send + Sync + 'static,
    {
        self.inner.lock().await.listeners.push(Arc::new(listener));
    }

    /// Subscribes to the state-change bus.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<StateChange> {
        self.bus.subscribe()
    }
}

#[cfg(test)]
mod tests;
