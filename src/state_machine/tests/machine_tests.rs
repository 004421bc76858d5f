use crate::bus::EventBus;
use crate::context::Context;
use crate::state_machine::*;
use crate::work_unit::{Source, WorkUnit};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn machine() -> Machine {
    Machine::new(EventBus::default())
}

/// A work unit with a source and one recorded specification.
fn ready_work_unit() -> WorkUnit {
    let mut wu = WorkUnit::new("t1", "Task one", "")
        .with_source(Source::new("file:x.md", "# task"));
    wu.add_specification("specification-1.md");
    wu
}

#[tokio::test]
async fn test_happy_path_through_all_phases() {
    let machine = machine();
    machine.set_work_unit(ready_work_unit().into_handle()).await;
    let ctx = Context::default();

    let steps = [
        (EventId::plan(), StateId::planning()),
        (EventId::plan_done(), StateId::idle()),
        (EventId::implement(), StateId::implementing()),
        (EventId::implement_done(), StateId::idle()),
        (EventId::review(), StateId::reviewing()),
        (EventId::review_done(), StateId::idle()),
        (EventId::finish(), StateId::done()),
    ];
    for (event, expected) in steps {
        let outcome = machine.dispatch(&ctx, &event).await.unwrap();
        assert_eq!(outcome.to, expected, "event '{}'", event);
        assert_eq!(machine.current_state().await, expected);
    }

    assert!(machine.is_terminal().await);
    assert_eq!(machine.history().await.len(), 7);
}

#[tokio::test]
async fn test_guard_rejection_leaves_state_untouched() {
    let machine = machine();
    // Work unit without a source: `start` must be rejected.
    machine
        .set_work_unit(WorkUnit::new("t2", "No source", "").into_handle())
        .await;
    let ctx = Context::default();

    let err = machine.dispatch(&ctx, &EventId::start()).await.unwrap_err();
    assert_eq!(
        err,
        MachineError::GuardRejected {
            state: StateId::idle(),
            event: EventId::start(),
        }
    );
    assert_eq!(machine.current_state().await, StateId::idle());
    assert!(machine.history().await.is_empty());
}

#[tokio::test]
async fn test_unknown_event_is_no_transition() {
    let machine = machine();
    let ctx = Context::default();

    let err = machine
        .dispatch(&ctx, &EventId::implement_done())
        .await
        .unwrap_err();
    assert!(matches!(err, MachineError::NoTransition { .. }));
    assert_eq!(machine.current_state().await, StateId::idle());
}

#[tokio::test]
async fn test_abort_is_global_and_reset_recovers() {
    let machine = machine();
    machine.set_work_unit(ready_work_unit().into_handle()).await;
    let ctx = Context::default();

    machine.dispatch(&ctx, &EventId::implement()).await.unwrap();
    assert_eq!(machine.current_state().await, StateId::implementing());

    let outcome = machine.dispatch(&ctx, &EventId::abort()).await.unwrap();
    assert_eq!(outcome.to, StateId::failed());

    let outcome = machine.dispatch(&ctx, &EventId::reset()).await.unwrap();
    assert_eq!(outcome.to, StateId::idle());
}

#[tokio::test]
async fn test_dispatch_is_deterministic() {
    let ctx = Context::default();
    for _ in 0..3 {
        let machine = machine();
        machine.set_work_unit(ready_work_unit().into_handle()).await;
        let outcome = machine.dispatch(&ctx, &EventId::review()).await.unwrap();
        assert_eq!(outcome.to, StateId::reviewing());
    }
}

#[tokio::test]
async fn test_can_dispatch_reports_reasons() {
    let machine = machine();
    let ctx = Context::default();

    let (ok, reason) = machine.can_dispatch(&ctx, &EventId::plan()).await;
    assert!(ok);
    assert!(reason.is_empty());

    // Global transitions are always dispatchable.
    let (ok, _) = machine.can_dispatch(&ctx, &EventId::abort()).await;
    assert!(ok);

    let (ok, reason) = machine.can_dispatch(&ctx, &EventId::plan_done()).await;
    assert!(!ok);
    assert!(reason.contains("no transition"));

    // No work unit installed: the finish guard rejects.
    let (ok, reason) = machine.can_dispatch(&ctx, &EventId::finish()).await;
    assert!(!ok);
    assert!(reason.contains("guards rejected"));

    // Probing never mutates state.
    assert_eq!(machine.current_state().await, StateId::idle());
    assert!(machine.history().await.is_empty());
}

#[tokio::test]
async fn test_waiting_answer_and_replan() {
    let machine = machine();
    let ctx = Context::default();

    machine.dispatch(&ctx, &EventId::plan()).await.unwrap();
    machine.dispatch(&ctx, &EventId::wait()).await.unwrap();
    assert_eq!(machine.current_state().await, StateId::waiting());

    machine.dispatch(&ctx, &EventId::plan()).await.unwrap();
    assert_eq!(machine.current_state().await, StateId::planning());

    machine.dispatch(&ctx, &EventId::wait()).await.unwrap();
    machine.dispatch(&ctx, &EventId::answer()).await.unwrap();
    assert_eq!(machine.current_state().await, StateId::idle());
}

#[tokio::test]
async fn test_checkpoint_cycle_from_planning() {
    let machine = machine();
    let ctx = Context::default();

    machine.dispatch(&ctx, &EventId::plan()).await.unwrap();
    machine.dispatch(&ctx, &EventId::checkpoint()).await.unwrap();
    assert_eq!(machine.current_state().await, StateId::checkpointing());
    machine
        .dispatch(&ctx, &EventId::checkpoint_done())
        .await
        .unwrap();
    assert_eq!(machine.current_state().await, StateId::idle());
}

#[tokio::test]
async fn test_undo_requires_checkpoints_on_work_unit() {
    let machine = machine();
    let ctx = Context::default();
    let mut wu = ready_work_unit();

    machine.set_work_unit(wu.clone().into_handle()).await;
    let err = machine.dispatch(&ctx, &EventId::undo()).await.unwrap_err();
    assert!(matches!(err, MachineError::GuardRejected { .. }));

    wu.add_checkpoint("cp-1");
    machine.set_work_unit(wu.into_handle()).await;
    let outcome = machine.dispatch(&ctx, &EventId::undo()).await.unwrap();
    assert_eq!(outcome.to, StateId::reverting());
    machine.dispatch(&ctx, &EventId::undo_done()).await.unwrap();
    assert_eq!(machine.current_state().await, StateId::idle());
}

#[tokio::test]
async fn test_reset_clears_session_state() {
    let machine = machine();
    machine.set_work_unit(ready_work_unit().into_handle()).await;
    let ctx = Context::default();

    machine.dispatch(&ctx, &EventId::plan()).await.unwrap();
    machine.push_undo("cp-1").await;
    machine.pop_undo().await;

    machine.reset().await;
    assert_eq!(machine.current_state().await, StateId::idle());
    assert!(machine.work_unit().await.is_none());
    assert!(machine.history().await.is_empty());
    assert!(!machine.can_undo().await);
    assert!(!machine.can_redo().await);
}

#[tokio::test]
async fn test_bus_receives_state_changes() {
    let bus = EventBus::default();
    let mut rx = bus.subscribe();
    let machine = Machine::new(bus);
    let ctx = Context::default();

    machine.dispatch(&ctx, &EventId::plan()).await.unwrap();

    let change = rx.recv().await.unwrap();
    assert_eq!(change.from, StateId::idle());
    assert_eq!(change.to, StateId::planning());
    assert_eq!(change.event, EventId::plan());
}

#[tokio::test]
async fn test_listener_observes_transitions() {
    let machine = machine();
    let seen: Arc<Mutex<Vec<crate::bus::StateChange>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    machine
        .add_listener(move |change| sink.lock().unwrap().push(change))
        .await;

    let ctx = Context::default();
    machine.dispatch(&ctx, &EventId::plan()).await.unwrap();

    // Listeners run on their own tasks; poll until delivery.
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        if !seen.lock().unwrap().is_empty() {
            break;
        }
        assert!(Instant::now() < deadline, "listener was never invoked");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(seen.lock().unwrap()[0].to, StateId::planning());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_blocking_listener_does_not_stall_dispatch() {
    let machine = machine();
    machine
        .add_listener(|_change| std::thread::sleep(Duration::from_secs(2)))
        .await;

    let ctx = Context::default();
    let start = Instant::now();
    machine.dispatch(&ctx, &EventId::plan()).await.unwrap();
    machine.dispatch(&ctx, &EventId::plan_done()).await.unwrap();
    machine.dispatch(&ctx, &EventId::plan()).await.unwrap();
    machine.dispatch(&ctx, &EventId::plan_done()).await.unwrap();

    // The listener sleeps on its own task; dispatches stay fast.
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_listener_dispatching_again_does_not_deadlock() {
    let machine = Arc::new(machine());
    let inner = Arc::clone(&machine);
    machine
        .add_listener(move |change| {
            if change.to == StateId::planning() {
                let inner = Arc::clone(&inner);
                tokio::spawn(async move {
                    let _ = inner.dispatch(&Context::default(), &EventId::plan_done()).await;
                });
            }
        })
        .await;

    let ctx = Context::default();
    machine.dispatch(&ctx, &EventId::plan()).await.unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        if machine.current_state().await == StateId::idle() {
            break;
        }
        assert!(Instant::now() < deadline, "re-entrant dispatch never landed");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(machine.history().await.len(), 2);
}
