use crate::bus::EventBus;
use crate::context::Context;
use crate::effects::{CriticalEffect, Effect, FnEffect};
use crate::state_machine::*;
use crate::work_unit::{Source, WorkUnit};
use std::sync::Arc;

fn ready_work_unit() -> WorkUnit {
    let mut wu = WorkUnit::new("t1", "Task", "").with_source(Source::new("file:x.md", ""));
    wu.add_specification("specification-1.md");
    wu
}

fn approval_phase() -> PhaseDefinition {
    PhaseDefinition::new("plugin_approval_approval", "approval_start", "approval_done")
        .describe("Manager approval")
        .after("reviewing")
}

fn noop_effect(name: &str) -> Arc<dyn Effect> {
    Arc::new(FnEffect::new(name, |_ctx, _wu| Box::pin(async { Ok(()) })))
}

#[test]
fn test_baseline_table_endpoints_are_registered() {
    let registry = baseline_registry();
    for transition in baseline_table().iter() {
        assert!(registry.contains(&transition.from), "missing '{}'", transition.from);
        assert!(registry.contains(&transition.to), "missing '{}'", transition.to);
    }
    for target in baseline_globals().values() {
        assert!(registry.contains(target));
    }
}

#[test]
fn test_baseline_phase_order() {
    let builder = MachineBuilder::new();
    let order: Vec<&str> = builder.phase_order().iter().map(StateId::as_str).collect();
    assert_eq!(order, ["idle", "planning", "implementing", "reviewing", "done"]);
}

#[test]
fn test_register_phase_after_anchor() {
    let mut builder = MachineBuilder::new();
    builder.register_phase(approval_phase()).unwrap();

    let order: Vec<&str> = builder.phase_order().iter().map(StateId::as_str).collect();
    assert_eq!(
        order,
        ["idle", "planning", "implementing", "reviewing", "plugin_approval_approval", "done"]
    );
    assert!(builder.has_state(&StateId::new("plugin_approval_approval")));
    assert!(builder.has_transition(&StateId::reviewing(), &EventId::new("approval_start")));
    assert!(builder.has_transition(
        &StateId::new("plugin_approval_approval"),
        &EventId::new("approval_done")
    ));
    assert!(builder.has_transition(
        &StateId::new("plugin_approval_approval"),
        &EventId::error()
    ));
}

#[test]
fn test_register_phase_before_anchor() {
    let mut builder = MachineBuilder::new();
    builder
        .register_phase(
            PhaseDefinition::new("triage", "triage_start", "triage_done").before("planning"),
        )
        .unwrap();

    let order: Vec<&str> = builder.phase_order().iter().map(StateId::as_str).collect();
    assert_eq!(order, ["idle", "triage", "planning", "implementing", "reviewing", "done"]);
}

#[test]
fn test_register_phase_validation_errors() {
    let mut builder = MachineBuilder::new();

    let err = builder
        .register_phase(PhaseDefinition::new("", "e", "x").after("idle"))
        .unwrap_err();
    assert_eq!(err, BuilderError::EmptyStateName);

    let err = builder
        .register_phase(PhaseDefinition::new("planning", "e", "x").after("idle"))
        .unwrap_err();
    assert_eq!(err, BuilderError::DuplicateState("planning".to_string()));

    let err = builder
        .register_phase(PhaseDefinition::new("p", "", "x").after("idle"))
        .unwrap_err();
    assert_eq!(err, BuilderError::MissingEntryEvent("p".to_string()));

    let err = builder
        .register_phase(PhaseDefinition::new("p", "e", "").after("idle"))
        .unwrap_err();
    assert_eq!(err, BuilderError::MissingExitEvent("p".to_string()));

    let err = builder
        .register_phase(PhaseDefinition::new("p", "e", "x"))
        .unwrap_err();
    assert_eq!(err, BuilderError::InvalidAnchor("p".to_string()));

    let err = builder
        .register_phase(PhaseDefinition::new("p", "e", "x").after("idle").before("done"))
        .unwrap_err();
    assert_eq!(err, BuilderError::InvalidAnchor("p".to_string()));

    let err = builder
        .register_phase(PhaseDefinition::new("p", "e", "x").after("nonexistent"))
        .unwrap_err();
    assert_eq!(
        err,
        BuilderError::AnchorNotFound {
            phase: "p".to_string(),
            anchor: "nonexistent".to_string(),
        }
    );

    // Anchoring on a non-phase state is rejected too.
    let err = builder
        .register_phase(PhaseDefinition::new("p", "e", "x").after("failed"))
        .unwrap_err();
    assert!(matches!(err, BuilderError::AnchorNotFound { .. }));
}

#[tokio::test]
async fn test_spliced_phase_drives_like_a_builtin() {
    let mut builder = MachineBuilder::new();
    builder.register_phase(approval_phase()).unwrap();
    let machine = builder.build(EventBus::default());
    machine.set_work_unit(ready_work_unit().into_handle()).await;
    let ctx = Context::default();

    machine.dispatch(&ctx, &EventId::review()).await.unwrap();
    let outcome = machine
        .dispatch(&ctx, &EventId::new("approval_start"))
        .await
        .unwrap();
    assert_eq!(outcome.to, StateId::new("plugin_approval_approval"));
    machine
        .dispatch(&ctx, &EventId::new("approval_done"))
        .await
        .unwrap();
    assert_eq!(machine.current_state().await, StateId::idle());

    // The error exit works from the spliced phase as well.
    machine.dispatch(&ctx, &EventId::review()).await.unwrap();
    machine
        .dispatch(&ctx, &EventId::new("approval_start"))
        .await
        .unwrap();
    let outcome = machine.dispatch(&ctx, &EventId::error()).await.unwrap();
    assert_eq!(outcome.to, StateId::idle());
}

#[tokio::test]
async fn test_phase_entry_guards_gate_the_entry() {
    let mut builder = MachineBuilder::new();
    builder
        .register_phase(
            approval_phase().guarded(Arc::new(FnGuard::new("always_no", |_, _| false))),
        )
        .unwrap();
    let machine = builder.build(EventBus::default());
    machine.set_work_unit(ready_work_unit().into_handle()).await;
    let ctx = Context::default();

    machine.dispatch(&ctx, &EventId::review()).await.unwrap();
    let err = machine
        .dispatch(&ctx, &EventId::new("approval_start"))
        .await
        .unwrap_err();
    assert!(matches!(err, MachineError::GuardRejected { .. }));
    assert_eq!(machine.current_state().await, StateId::reviewing());
}

#[tokio::test]
async fn test_add_guard_to_transition() {
    let mut builder = MachineBuilder::new();
    builder
        .add_guard_to_transition(
            &StateId::idle(),
            &EventId::plan(),
            Arc::new(FnGuard::new("always_no", |_, _| false)),
        )
        .unwrap();

    let err = builder
        .add_guard_to_transition(
            &StateId::idle(),
            &EventId::new("bogus"),
            Arc::new(FnGuard::new("x", |_, _| true)),
        )
        .unwrap_err();
    assert!(matches!(err, BuilderError::UnknownTransition { .. }));

    let machine = builder.build(EventBus::default());
    let err = machine
        .dispatch(&Context::default(), &EventId::plan())
        .await
        .unwrap_err();
    assert!(matches!(err, MachineError::GuardRejected { .. }));
}

#[tokio::test]
async fn test_add_effect_to_transition() {
    let mut builder = MachineBuilder::new();
    builder
        .add_effect_to_transition(
            &StateId::idle(),
            &EventId::plan(),
            CriticalEffect::advisory("save_state", noop_effect("save_state")),
        )
        .unwrap();

    let machine = builder.build(EventBus::default());
    let outcome = machine
        .dispatch(&Context::default(), &EventId::plan())
        .await
        .unwrap();
    assert_eq!(outcome.effects.len(), 1);
    assert_eq!(outcome.effects[0].name, "save_state");
    assert!(!outcome.effects[0].critical);
}

#[tokio::test]
async fn test_register_state_and_transition() {
    let mut builder = MachineBuilder::new();
    builder
        .register_state(StateInfo::new(StateId::new("paused"), "Paused by the user"))
        .unwrap();

    let err = builder
        .register_state(StateInfo::new(StateId::new("paused"), ""))
        .unwrap_err();
    assert_eq!(err, BuilderError::DuplicateState("paused".to_string()));

    // An auxiliary state is not a phase.
    assert!(builder.has_state(&StateId::new("paused")));
    assert!(!builder.phase_order().contains(&StateId::new("paused")));

    builder.register_transition(Transition::new(
        StateId::idle(),
        EventId::new("pause"),
        StateId::new("paused"),
    ));
    builder.register_transition(Transition::new(
        StateId::new("paused"),
        EventId::new("resume"),
        StateId::idle(),
    ));

    let machine = builder.build(EventBus::default());
    let ctx = Context::default();
    machine.dispatch(&ctx, &EventId::new("pause")).await.unwrap();
    assert_eq!(machine.current_state().await, StateId::new("paused"));
    machine.dispatch(&ctx, &EventId::new("resume")).await.unwrap();
    assert_eq!(machine.current_state().await, StateId::idle());
}

#[tokio::test]
async fn test_first_passing_candidate_wins() {
    let mut builder = MachineBuilder::new();
    builder
        .register_state(StateInfo::new(StateId::new("fast_track"), ""))
        .unwrap();
    builder
        .register_state(StateInfo::new(StateId::new("slow_track"), ""))
        .unwrap();
    builder.register_transition(
        Transition::new(StateId::idle(), EventId::new("route"), StateId::new("fast_track"))
            .guarded(Arc::new(FnGuard::new("always_no", |_, _| false))),
    );
    builder.register_transition(Transition::new(
        StateId::idle(),
        EventId::new("route"),
        StateId::new("slow_track"),
    ));

    let machine = builder.build(EventBus::default());
    let outcome = machine
        .dispatch(&Context::default(), &EventId::new("route"))
        .await
        .unwrap();
    assert_eq!(outcome.to, StateId::new("slow_track"));
}
