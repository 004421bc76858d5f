//! mehrhof — phase-based workflow engine and out-of-process plugin runtime.
//!
//! The engine drives a task session through planning, implementation,
//! review and finish against a version-controlled workspace. A host
//! conductor owns the [`state_machine::Machine`], dispatches events, and
//! runs the effects each taken transition hands back through the
//! [`effects`] pipeline. Out-of-process plugins are discovered from
//! `plugin.yaml` manifests, supervised over line-delimited JSON, and
//! bridged into the machine as guards, effects and spliced phases.

pub mod bus;
pub mod context;
pub mod effects;
pub mod paths;
pub mod plugins;
pub mod state_machine;
pub mod task_record;
pub mod work_unit;

pub use bus::{EventBus, StateChange};
pub use context::Context;
pub use work_unit::{Source, WorkUnit, WorkUnitHandle};
