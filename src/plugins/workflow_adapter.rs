//! Bridges an out-of-process workflow plugin to in-process guards,
//! effects and phase definitions.
//!
//! `workflow.init` returns what the plugin contributes; guard and effect
//! invocations RPC back into the plugin under per-call deadlines. Guards
//! degrade to `false` on any failure, effects surface theirs.

use super::process::PluginProcess;
use super::PluginError;
use crate::context::Context;
use crate::effects::{CriticalEffect, Effect};
use crate::state_machine::{Guard, PhaseDefinition};
use crate::work_unit::{WorkUnit, WorkUnitHandle};
use anyhow::{bail, Context as AnyhowContext, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const GUARD_CALL_TIMEOUT: Duration = Duration::from_secs(30);

const EFFECT_CALL_TIMEOUT: Duration = Duration::from_secs(300);

/// What a workflow plugin contributes, as declared by `workflow.init`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkflowDeclaration {
    #[serde(default)]
    pub phases: Vec<DeclaredPhase>,
    #[serde(default)]
    pub guards: Vec<DeclaredGuard>,
    #[serde(default)]
    pub effects: Vec<DeclaredEffect>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeclaredPhase {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub after: Option<String>,
    #[serde(default)]
    pub before: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeclaredGuard {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeclaredEffect {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub critical: bool,
}

#[derive(Debug, Deserialize)]
struct GuardVerdict {
    #[serde(default)]
    passed: bool,
    #[serde(default)]
    reason: String,
}

#[derive(Debug, Deserialize)]
struct EffectOutcome {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

/// State name for a plugin-contributed phase.
pub fn phase_state_name(plugin: &str, phase: &str) -> String {
    format!("plugin_{}_{}", plugin, phase)
}

/// Entry event for a plugin-contributed phase.
pub fn phase_entry_event(plugin: &str, phase: &str) -> String {
    format!("{}_start", phase_state_name(plugin, phase))
}

/// Exit event for a plugin-contributed phase.
pub fn phase_exit_event(plugin: &str, phase: &str) -> String {
    format!("{}_done", phase_state_name(plugin, phase))
}

/// Serialises a work unit for the wire. The provider handle is omitted.
pub fn marshal_work_unit(work_unit: &WorkUnit) -> Value {
    json!({
        "id": work_unit.id,
        "externalId": work_unit.external_id,
        "title": work_unit.title,
        "description": work_unit.description,
        "specifications": work_unit.specifications,
        "checkpoints": work_unit.checkpoints,
        "source": work_unit.source.as_ref().map(|source| json!({
            "reference": source.reference,
            "content": source.content,
        })),
    })
}

/// In-process face of a workflow plugin.
pub struct WorkflowAdapter {
    plugin: String,
    process: Arc<PluginProcess>,
    declaration: WorkflowDeclaration,
}

impl WorkflowAdapter {
    /// Initialises the plugin with the host's workflow config and captures
    /// its declaration.
    pub async fn connect(process: Arc<PluginProcess>, config: Value) -> Result<Self, PluginError> {
        let plugin = process.name().to_string();
        let reply = process
            .call("workflow.init", json!({ "config": config }))
            .await?;
        let declaration =
            serde_json::from_value(reply).map_err(|err| PluginError::MalformedReply {
                name: plugin.clone(),
                reason: format!("workflow.init: {}", err),
            })?;
        Ok(Self {
            plugin,
            process,
            declaration,
        })
    }

    pub fn plugin_name(&self) -> &str {
        &self.plugin
    }

    pub fn declaration(&self) -> &WorkflowDeclaration {
        &self.declaration
    }

    /// Every guard the plugin declared, as machine guards.
    pub fn guards(&self) -> Vec<Arc<dyn Guard>> {
        self.declaration
            .guards
            .iter()
            .map(|declared| self.guard_named(&declared.name))
            .collect()
    }

    /// Every effect the plugin declared, carrying its critical flag.
    pub fn effects(&self) -> Vec<CriticalEffect> {
        self.declaration
            .effects
            .iter()
            .map(|declared| self.effect_declared(declared))
            .collect()
    }

    /// Phase definitions ready for the machine builder.
    ///
    /// Guards and effects are attached to the phase whose name prefixes
    /// theirs, so `approval_has_manager` gates the `approval` phase entry.
    pub fn phase_definitions(&self) -> Vec<PhaseDefinition> {
        self.declaration
            .phases
            .iter()
            .map(|phase| {
                let mut definition = PhaseDefinition::new(
                    phase_state_name(&self.plugin, &phase.name).as_str(),
                    phase_entry_event(&self.plugin, &phase.name).as_str(),
                    phase_exit_event(&self.plugin, &phase.name).as_str(),
                )
                .describe(phase.description.clone());

                if let Some(anchor) = &phase.after {
                    definition = definition.after(anchor.as_str());
                }
                if let Some(anchor) = &phase.before {
                    definition = definition.before(anchor.as_str());
                }

                for declared in &self.declaration.guards {
                    if declared.name.starts_with(&phase.name) {
                        definition = definition.guarded(self.guard_named(&declared.name));
                    }
                }
                for declared in &self.declaration.effects {
                    if declared.name.starts_with(&phase.name) {
                        definition = definition.with_effect(self.effect_declared(declared));
                    }
                }

                definition
            })
            .collect()
    }

    fn guard_named(&self, name: &str) -> Arc<dyn Guard> {
        Arc::new(PluginGuard {
            name: name.to_string(),
            process: Arc::clone(&self.process),
        })
    }

    fn effect_declared(&self, declared: &DeclaredEffect) -> CriticalEffect {
        let effect = Arc::new(PluginEffect {
            name: declared.name.clone(),
            process: Arc::clone(&self.process),
        });
        if declared.critical {
            CriticalEffect::critical(declared.name.clone(), effect)
        } else {
            CriticalEffect::advisory(declared.name.clone(), effect)
        }
    }
}

struct PluginGuard {
    name: String,
    process: Arc<PluginProcess>,
}

#[async_trait]
impl Guard for PluginGuard {
    fn name(&self) -> &str {
        &self.name
    }

    async fn evaluate(&self, _ctx: &Context, work_unit: Option<&WorkUnit>) -> bool {
        let params = json!({
            "name": self.name,
            "workUnit": work_unit.map(marshal_work_unit),
        });
        let reply = self
            .process
            .call_with_timeout("workflow.evaluateGuard", params, GUARD_CALL_TIMEOUT)
            .await;
        match reply {
            Ok(value) => match serde_json::from_value::<GuardVerdict>(value) {
                Ok(verdict) => {
                    if !verdict.passed && !verdict.reason.is_empty() {
                        debug!("plugin guard '{}' rejected: {}", self.name, verdict.reason);
                    }
                    verdict.passed
                }
                Err(err) => {
                    debug!("plugin guard '{}' returned malformed verdict: {}", self.name, err);
                    false
                }
            },
            Err(err) => {
                debug!("plugin guard '{}' call failed: {}", self.name, err);
                false
            }
        }
    }
}

struct PluginEffect {
    name: String,
    process: Arc<PluginProcess>,
}

#[async_trait]
impl Effect for PluginEffect {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &Context, work_unit: &WorkUnitHandle) -> Result<()> {
        let snapshot = work_unit.lock().await.clone();
        let params = json!({
            "name": self.name,
            "workUnit": marshal_work_unit(&snapshot),
            "data": ctx.data,
        });
        let reply = self
            .process
            .call_with_timeout("workflow.executeEffect", params, EFFECT_CALL_TIMEOUT)
            .await
            .with_context(|| format!("plugin effect '{}' call failed", self.name))?;
        let outcome: EffectOutcome = serde_json::from_value(reply)
            .with_context(|| format!("plugin effect '{}' returned a malformed reply", self.name))?;

        if outcome.success {
            Ok(())
        } else {
            bail!(
                "plugin effect '{}' failed: {}",
                self.name,
                outcome.error.unwrap_or_else(|| "unspecified error".to_string())
            );
        }
    }
}
