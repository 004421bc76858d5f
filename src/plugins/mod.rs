//! Out-of-process plugin runtime.
//!
//! Plugins are described by a `plugin.yaml` manifest, hosted as child
//! processes speaking line-delimited JSON, and exposed to the workflow
//! engine as in-process guards, effects and phases.

pub mod loader;
pub mod manifest;
pub mod process;
pub mod protocol;
pub mod runtime;
pub mod workflow_adapter;

pub use loader::{discover, DiscoveryReport};
pub use manifest::{PluginKind, PluginManifest, PluginScope};
pub use process::PluginProcess;
pub use runtime::PluginRuntime;
pub use workflow_adapter::WorkflowAdapter;

use thiserror::Error;

/// Failures of the plugin runtime, per plugin; one plugin's failure never
/// affects another.
#[derive(Debug, Error)]
pub enum PluginError {
    /// Manifest invalid, executable missing or escaping, or spawn failed.
    #[error("plugin '{name}' failed to start: {reason}")]
    StartFailed { name: String, reason: String },

    /// The process is shutting down; no new calls are accepted.
    #[error("plugin '{0}' is stopping")]
    Stopping(String),

    /// The child exited and pending calls were released.
    #[error("plugin '{0}' closed before responding")]
    Closed(String),

    /// The plugin returned a structured error object.
    #[error("plugin rpc error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// The caller's deadline elapsed while waiting for a response.
    #[error("plugin call cancelled")]
    Cancelled,

    /// The plugin replied with something the adapter could not decode.
    #[error("plugin '{name}' returned a malformed reply: {reason}")]
    MalformedReply { name: String, reason: String },

    /// Writing the request failed.
    #[error("failed to write to plugin '{name}'")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// The request could not be serialised.
    #[error("failed to encode request for plugin '{name}': {reason}")]
    Encode { name: String, reason: String },
}

#[cfg(test)]
mod tests;
