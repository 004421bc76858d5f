//! State tags and the state registry.
//!
//! States are named-string wrappers rather than a closed enum because
//! workflow plugins splice new phases into the lifecycle at build time.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A named position in the workflow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateId(String);

impl StateId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    // Built-in tags.
    pub fn idle() -> Self {
        Self::new("idle")
    }
    pub fn planning() -> Self {
        Self::new("planning")
    }
    pub fn implementing() -> Self {
        Self::new("implementing")
    }
    pub fn reviewing() -> Self {
        Self::new("reviewing")
    }
    pub fn done() -> Self {
        Self::new("done")
    }
    pub fn failed() -> Self {
        Self::new("failed")
    }
    pub fn waiting() -> Self {
        Self::new("waiting")
    }
    pub fn checkpointing() -> Self {
        Self::new("checkpointing")
    }
    pub fn reverting() -> Self {
        Self::new("reverting")
    }
    pub fn restoring() -> Self {
        Self::new("restoring")
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StateId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Metadata attached to a registered state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateInfo {
    pub id: StateId,
    pub description: String,
    /// No further transitions leave a terminal state.
    pub terminal: bool,
    /// Main lifecycle position, as opposed to an auxiliary state.
    pub phase: bool,
}

impl StateInfo {
    pub fn new(id: StateId, description: impl Into<String>) -> Self {
        Self {
            id,
            description: description.into(),
            terminal: false,
            phase: false,
        }
    }

    pub fn phase(mut self) -> Self {
        self.phase = true;
        self
    }

    pub fn terminal(mut self) -> Self {
        self.terminal = true;
        self
    }
}

/// Registry of every state the machine knows about.
#[derive(Debug, Clone, Default)]
pub struct StateRegistry {
    states: HashMap<StateId, StateInfo>,
}

impl StateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a state; returns false when the name is already taken.
    pub fn insert(&mut self, info: StateInfo) -> bool {
        if self.states.contains_key(&info.id) {
            return false;
        }
        self.states.insert(info.id.clone(), info);
        true
    }

    pub fn contains(&self, id: &StateId) -> bool {
        self.states.contains_key(id)
    }

    pub fn get(&self, id: &StateId) -> Option<&StateInfo> {
        self.states.get(id)
    }

    pub fn is_terminal(&self, id: &StateId) -> bool {
        self.get(id).is_some_and(|info| info.terminal)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
