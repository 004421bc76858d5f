//! Host context threaded through guards and effects.

use std::path::PathBuf;

/// Per-dispatch context handed to guards and effects.
///
/// The engine never inspects `data`; it is an opaque payload the host (or a
/// plugin adapter) attaches to a dispatch, e.g. the `data` argument of a
/// workflow plugin effect call.
#[derive(Debug, Clone, Default)]
pub struct Context {
    /// Workspace the current task session operates on.
    pub working_dir: PathBuf,
    /// Opaque host payload forwarded to effects.
    pub data: serde_json::Value,
}

impl Context {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            data: serde_json::Value::Null,
        }
    }

    /// Attaches an opaque payload forwarded to effects.
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}
