//! Transition guards.
//!
//! A guard is a pure predicate over the dispatch context and a snapshot of
//! the current work unit. The seam is async because plugin guards evaluate
//! out of process.

use crate::context::Context;
use crate::work_unit::WorkUnit;
use async_trait::async_trait;
use std::sync::Arc;

/// Boolean predicate gating a candidate transition.
#[async_trait]
pub trait Guard: Send + Sync {
    fn name(&self) -> &str;

    async fn evaluate(&self, ctx: &Context, work_unit: Option<&WorkUnit>) -> bool;
}

type GuardFn = dyn Fn(&Context, Option<&WorkUnit>) -> bool + Send + Sync;

/// Adapter turning a closure into a [`Guard`].
pub struct FnGuard {
    name: String,
    func: Arc<GuardFn>,
}

impl FnGuard {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Context, Option<&WorkUnit>) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }
}

#[async_trait]
impl Guard for FnGuard {
    fn name(&self) -> &str {
        &self.name
    }

    async fn evaluate(&self, ctx: &Context, work_unit: Option<&WorkUnit>) -> bool {
        (self.func)(ctx, work_unit)
    }
}

/// Passes iff every guard passes; an empty list passes.
pub async fn evaluate_guards(
    guards: &[Arc<dyn Guard>],
    ctx: &Context,
    work_unit: Option<&WorkUnit>,
) -> bool {
    for guard in guards {
        if !guard.evaluate(ctx, work_unit).await {
            return false;
        }
    }
    true
}

/// Work unit present, with a source carrying a non-empty reference.
pub struct HasSource;

#[async_trait]
impl Guard for HasSource {
    fn name(&self) -> &str {
        "has_source"
    }

    async fn evaluate(&self, _ctx: &Context, work_unit: Option<&WorkUnit>) -> bool {
        work_unit.is_some_and(WorkUnit::has_source)
    }
}

/// One or more specifications recorded.
pub struct HasSpecifications;

#[async_trait]
impl Guard for HasSpecifications {
    fn name(&self) -> &str {
        "has_specifications"
    }

    async fn evaluate(&self, _ctx: &Context, work_unit: Option<&WorkUnit>) -> bool {
        work_unit.is_some_and(|wu| !wu.specifications.is_empty())
    }
}

/// Zero specifications recorded.
pub struct NoSpecifications;

#[async_trait]
impl Guard for NoSpecifications {
    fn name(&self) -> &str {
        "no_specifications"
    }

    async fn evaluate(&self, _ctx: &Context, work_unit: Option<&WorkUnit>) -> bool {
        work_unit.is_some_and(|wu| wu.specifications.is_empty())
    }
}

/// At least one specification recorded; gates entering review.
pub struct CanReview;

#[async_trait]
impl Guard for CanReview {
    fn name(&self) -> &str {
        "can_review"
    }

    async fn evaluate(&self, _ctx: &Context, work_unit: Option<&WorkUnit>) -> bool {
        work_unit.is_some_and(|wu| !wu.specifications.is_empty())
    }
}

/// At least one specification recorded; gates finishing.
pub struct CanFinish;

#[async_trait]
impl Guard for CanFinish {
    fn name(&self) -> &str {
        "can_finish"
    }

    async fn evaluate(&self, _ctx: &Context, work_unit: Option<&WorkUnit>) -> bool {
        work_unit.is_some_and(|wu| !wu.specifications.is_empty())
    }
}

/// Checkpoints recorded on the work unit.
pub struct CanUndo;

#[async_trait]
impl Guard for CanUndo {
    fn name(&self) -> &str {
        "can_undo"
    }

    async fn evaluate(&self, _ctx: &Context, work_unit: Option<&WorkUnit>) -> bool {
        work_unit.is_some_and(|wu| !wu.checkpoints.is_empty())
    }
}

/// Work unit present. Whether a committed undo actually exists to redo
/// against is the host's call; it talks to the VCS.
pub struct CanRedo;

#[async_trait]
impl Guard for CanRedo {
    fn name(&self) -> &str {
        "can_redo"
    }

    async fn evaluate(&self, _ctx: &Context, work_unit: Option<&WorkUnit>) -> bool {
        work_unit.is_some()
    }
}
