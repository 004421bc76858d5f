//! Event tags triggering transitions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A named trigger for a transition attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    // Phase entries.
    pub fn start() -> Self {
        Self::new("start")
    }
    pub fn plan() -> Self {
        Self::new("plan")
    }
    pub fn implement() -> Self {
        Self::new("implement")
    }
    pub fn review() -> Self {
        Self::new("review")
    }
    pub fn finish() -> Self {
        Self::new("finish")
    }

    // Phase completions.
    pub fn plan_done() -> Self {
        Self::new("plan_done")
    }
    pub fn implement_done() -> Self {
        Self::new("implement_done")
    }
    pub fn review_done() -> Self {
        Self::new("review_done")
    }

    // Checkpoint operations.
    pub fn checkpoint() -> Self {
        Self::new("checkpoint")
    }
    pub fn checkpoint_done() -> Self {
        Self::new("checkpoint_done")
    }
    pub fn undo() -> Self {
        Self::new("undo")
    }
    pub fn undo_done() -> Self {
        Self::new("undo_done")
    }
    pub fn redo() -> Self {
        Self::new("redo")
    }
    pub fn redo_done() -> Self {
        Self::new("redo_done")
    }

    // Control.
    pub fn error() -> Self {
        Self::new("error")
    }
    pub fn abort() -> Self {
        Self::new("abort")
    }
    pub fn reset() -> Self {
        Self::new("reset")
    }
    pub fn wait() -> Self {
        Self::new("wait")
    }
    pub fn answer() -> Self {
        Self::new("answer")
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EventId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}
