//! Effect taxonomy, registry and execution pipeline.
//!
//! Effects are the side-effectful actions the machine deliberately does not
//! run itself: after a dispatch the host feeds the returned effect list
//! through [`execute_effects`], where a critical failure halts the pipeline
//! and an advisory failure is logged and skipped.

use crate::context::Context;
use crate::work_unit::WorkUnitHandle;
use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Closed taxonomy of effect kinds the host can register implementations for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectKind {
    InitWorkUnit,
    ParseSource,
    SaveSpecifications,
    StageChanges,
    RecordCheckpoint,
    RestoreCheckpoint,
    SaveState,
    LoadState,
    LogError,
    LogValidationErrors,
    RollbackChanges,
    MergeAndCleanup,
    Cleanup,
}

/// A side effect sequenced along a transition.
///
/// Implementations are host closures over workspace, VCS or agent handles,
/// or plugin adapters that RPC out of process.
#[async_trait]
pub trait Effect: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, ctx: &Context, work_unit: &WorkUnitHandle) -> Result<()>;
}

type EffectFn = dyn Fn(Context, WorkUnitHandle) -> BoxFuture<'static, Result<()>> + Send + Sync;

/// Adapter turning an async closure into an [`Effect`]. The closure gets
/// owned clones of the context and the work-unit handle.
pub struct FnEffect {
    name: String,
    func: Arc<EffectFn>,
}

impl FnEffect {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(Context, WorkUnitHandle) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }
}

#[async_trait]
impl Effect for FnEffect {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &Context, work_unit: &WorkUnitHandle) -> Result<()> {
        (self.func)(ctx.clone(), Arc::clone(work_unit)).await
    }
}

/// An effect slot on a transition: name, criticality and an optional
/// implementation. An empty slot is skipped by the pipeline, which lets
/// effect tables reference optional effects.
#[derive(Clone)]
pub struct CriticalEffect {
    pub name: String,
    pub critical: bool,
    pub effect: Option<Arc<dyn Effect>>,
}

impl CriticalEffect {
    /// A blocking effect: its failure halts the pipeline.
    pub fn critical(name: impl Into<String>, effect: Arc<dyn Effect>) -> Self {
        Self {
            name: name.into(),
            critical: true,
            effect: Some(effect),
        }
    }

    /// A best-effort effect: its failure is logged and skipped.
    pub fn advisory(name: impl Into<String>, effect: Arc<dyn Effect>) -> Self {
        Self {
            name: name.into(),
            critical: false,
            effect: Some(effect),
        }
    }
}

impl fmt::Debug for CriticalEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CriticalEffect")
            .field("name", &self.name)
            .field("critical", &self.critical)
            .field("registered", &self.effect.is_some())
            .finish()
    }
}

/// Maps effect kinds to host implementations.
#[derive(Default)]
pub struct EffectRegistry {
    effects: HashMap<EffectKind, Arc<dyn Effect>>,
}

impl EffectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: EffectKind, effect: Arc<dyn Effect>) {
        self.effects.insert(kind, effect);
    }

    pub fn has(&self, kind: EffectKind) -> bool {
        self.effects.contains_key(&kind)
    }

    pub fn get(&self, kind: EffectKind) -> Option<Arc<dyn Effect>> {
        self.effects.get(&kind).cloned()
    }

    /// Runs the implementation registered for `kind`. An unregistered kind
    /// is silently skipped; effect tables may reference optional effects.
    pub async fn execute(
        &self,
        kind: EffectKind,
        ctx: &Context,
        work_unit: &WorkUnitHandle,
    ) -> Result<()> {
        match self.effects.get(&kind) {
            Some(effect) => effect.execute(ctx, work_unit).await,
            None => Ok(()),
        }
    }
}

/// Runs a sequence of effects in order.
///
/// A critical effect's error halts the pipeline and surfaces to the caller;
/// a non-critical error is logged at debug and the pipeline continues.
pub async fn execute_effects(
    effects: &[CriticalEffect],
    ctx: &Context,
    work_unit: &WorkUnitHandle,
) -> Result<()> {
    for slot in effects {
        let Some(effect) = &slot.effect else {
            continue;
        };
        match effect.execute(ctx, work_unit).await {
            Ok(()) => {}
            Err(err) if slot.critical => {
                return Err(err.context(format!("critical effect '{}' failed", slot.name)));
            }
            Err(err) => {
                debug!("non-critical effect '{}' failed: {:#}", slot.name, err);
            }
        }
    }
    Ok(())
}
