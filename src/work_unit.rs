//! Work unit: the mutable subject of a workflow session.
//!
//! A `WorkUnit` is created by the host when a task session starts and lives
//! until the workflow finishes or resets. The host is the only writer;
//! guards read snapshots of it and effects reach it through the shared
//! handle.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Shared handle to the current work unit, installed on the machine by the
/// host and passed to effects.
pub type WorkUnitHandle = Arc<Mutex<WorkUnit>>;

/// Erased weak reference to the task provider that produced a source.
///
/// Held weakly so the workflow never prolongs a provider's lifetime; the
/// host owns the provider and can downcast after `upgrade`.
#[derive(Clone)]
pub struct ProviderHandle {
    inner: Weak<dyn Any + Send + Sync>,
}

impl ProviderHandle {
    pub fn new(provider: &Arc<dyn Any + Send + Sync>) -> Self {
        Self {
            inner: Arc::downgrade(provider),
        }
    }

    /// Returns the provider if it is still alive.
    pub fn upgrade(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.inner.upgrade()
    }
}

impl fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderHandle")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

/// Origin of a work unit: where the task came from and what it said.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Source {
    /// Provider reference, e.g. `file:tasks/feature.md` or `issue:42`.
    pub reference: String,
    /// Snapshot of the task content at session start.
    #[serde(default)]
    pub content: String,
    /// Weak handle back to the provider; never serialised.
    #[serde(skip)]
    pub provider: Option<ProviderHandle>,
}

impl Source {
    pub fn new(reference: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            content: content.into(),
            provider: None,
        }
    }

    pub fn with_provider(mut self, provider: ProviderHandle) -> Self {
        self.provider = Some(provider);
        self
    }
}

/// The mutable subject of a workflow session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkUnit {
    /// Stable identifier minted at creation.
    pub id: String,
    /// Identifier assigned by the task source (issue key, file stem, ...).
    pub external_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub source: Option<Source>,
    /// Names of specification artefacts, in production order.
    #[serde(default)]
    pub specifications: Vec<String>,
    /// Checkpoint identifiers, in recording order.
    #[serde(default)]
    pub checkpoints: Vec<String>,
}

impl WorkUnit {
    pub fn new(
        external_id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            external_id: external_id.into(),
            title: title.into(),
            description: description.into(),
            source: None,
            specifications: Vec::new(),
            checkpoints: Vec::new(),
        }
    }

    pub fn with_source(mut self, source: Source) -> Self {
        self.source = Some(source);
        self
    }

    /// Records a produced specification artefact.
    pub fn add_specification(&mut self, name: impl Into<String>) {
        self.specifications.push(name.into());
    }

    /// Records a checkpoint identifier handed back by the VCS integration.
    pub fn add_checkpoint(&mut self, id: impl Into<String>) {
        self.checkpoints.push(id.into());
    }

    /// True when a source with a non-empty reference is attached.
    pub fn has_source(&self) -> bool {
        self.source.as_ref().is_some_and(|s| !s.reference.is_empty())
    }

    /// Wraps the work unit in the shared handle installed on the machine.
    pub fn into_handle(self) -> WorkUnitHandle {
        Arc::new(Mutex::new(self))
    }
}
