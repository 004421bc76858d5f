//! Plugin manifest model, validation and executable resolution.
//!
//! A plugin lives in its own directory with a `plugin.yaml` at the top.
//! Relative executable paths are rooted at that directory; after symlink
//! resolution the executable must still be inside it.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// The protocol major version this runtime speaks.
pub const PROTOCOL_VERSION: u32 = 1;

/// Name of the manifest file inside a plugin directory.
pub const MANIFEST_FILE: &str = "plugin.yaml";

/// Manifest validation failures.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest is missing a plugin name")]
    MissingName,

    #[error("plugin '{0}': unsupported protocol version {1}")]
    UnsupportedProtocol(String, u32),

    #[error("plugin '{0}': executable must declare a path or a non-empty command")]
    MissingExecutable(String),

    #[error("plugin '{0}': declared type '{1}' has no matching configuration block")]
    MissingTypeBlock(String, PluginKind),

    #[error("plugin '{0}': provider must declare at least one scheme")]
    NoSchemes(String),

    #[error("plugin '{0}': agent block must set a name")]
    MissingAgentName(String),

    #[error("plugin '{0}': phase '{1}' must anchor with at most one of 'after' or 'before'")]
    AmbiguousPhaseAnchor(String, String),

    #[error("plugin '{0}': executable '{1}' cannot be resolved: {2}")]
    ExecutableUnresolvable(String, String, #[source] std::io::Error),

    #[error("plugin '{0}': executable '{1}' escapes the plugin directory")]
    ExecutableEscapes(String, String),
}

/// Declared plugin type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginKind {
    Provider,
    Agent,
    Workflow,
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginKind::Provider => write!(f, "provider"),
            PluginKind::Agent => write!(f, "agent"),
            PluginKind::Workflow => write!(f, "workflow"),
        }
    }
}

/// Where a plugin was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginScope {
    #[default]
    Global,
    Project,
}

/// How to launch the plugin: a path, or an argv-style command vector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutableSpec {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub command: Option<Vec<String>>,
}

/// Environment variable the plugin documents for its users.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvVarSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<String>,
}

/// Provider-specific manifest block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderSpec {
    #[serde(default)]
    pub schemes: Vec<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// Agent-specific manifest block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentSpec {
    #[serde(default)]
    pub name: String,
}

/// A phase a workflow plugin splices into the lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub after: Option<String>,
    #[serde(default)]
    pub before: Option<String>,
}

/// A guard a workflow plugin exposes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// An effect a workflow plugin exposes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub critical: bool,
}

/// Workflow-specific manifest block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowSpec {
    #[serde(default)]
    pub phases: Vec<PhaseSpec>,
    #[serde(default)]
    pub guards: Vec<GuardSpec>,
    #[serde(default)]
    pub effects: Vec<EffectSpec>,
}

/// Declarative description of an external extension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    pub version: u32,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub kind: PluginKind,
    pub protocol: u32,
    #[serde(default)]
    pub executable: ExecutableSpec,

    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub homepage: Option<String>,
    #[serde(default)]
    pub env: Vec<EnvVarSpec>,

    #[serde(default)]
    pub provider: Option<ProviderSpec>,
    #[serde(default)]
    pub agent: Option<AgentSpec>,
    #[serde(default)]
    pub workflow: Option<WorkflowSpec>,

    /// Directory the manifest was loaded from; attached by the loader.
    #[serde(skip)]
    pub dir: PathBuf,
    /// Search root the manifest came from; attached by the loader.
    #[serde(skip)]
    pub scope: PluginScope,
}

/// Program and arguments ready to spawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedExecutable {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl PluginManifest {
    /// Load and validate a manifest from a `plugin.yaml` path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest: {}", path.display()))?;
        let mut manifest: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse manifest as YAML: {}", path.display()))?;
        manifest.dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        manifest.validate()?;
        Ok(manifest)
    }

    /// Enforces the manifest invariants.
    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.name.is_empty() {
            return Err(ManifestError::MissingName);
        }
        if self.protocol != PROTOCOL_VERSION {
            return Err(ManifestError::UnsupportedProtocol(
                self.name.clone(),
                self.protocol,
            ));
        }

        let has_path = self.executable.path.as_ref().is_some_and(|p| !p.is_empty());
        let has_command = self
            .executable
            .command
            .as_ref()
            .is_some_and(|c| !c.is_empty() && !c[0].is_empty());
        if !has_path && !has_command {
            return Err(ManifestError::MissingExecutable(self.name.clone()));
        }

        match self.kind {
            PluginKind::Provider => {
                let provider = self
                    .provider
                    .as_ref()
                    .ok_or_else(|| ManifestError::MissingTypeBlock(self.name.clone(), self.kind))?;
                if provider.schemes.is_empty() {
                    return Err(ManifestError::NoSchemes(self.name.clone()));
                }
            }
            PluginKind::Agent => {
                let agent = self
                    .agent
                    .as_ref()
                    .ok_or_else(|| ManifestError::MissingTypeBlock(self.name.clone(), self.kind))?;
                if agent.name.is_empty() {
                    return Err(ManifestError::MissingAgentName(self.name.clone()));
                }
            }
            PluginKind::Workflow => {
                let workflow = self
                    .workflow
                    .as_ref()
                    .ok_or_else(|| ManifestError::MissingTypeBlock(self.name.clone(), self.kind))?;
                for phase in &workflow.phases {
                    if phase.after.is_some() && phase.before.is_some() {
                        return Err(ManifestError::AmbiguousPhaseAnchor(
                            self.name.clone(),
                            phase.name.clone(),
                        ));
                    }
                }
            }
        }

        Ok(())
    }

    /// Resolves the declared executable into a spawnable program + args.
    ///
    /// Relative paths resolve against the manifest directory, symlinks are
    /// followed, and anything landing outside the directory is rejected.
    /// A command vector whose first element is a bare program name (no path
    /// separator) is trusted to PATH lookup.
    pub fn resolve_executable(&self) -> Result<ResolvedExecutable, ManifestError> {
        if let Some(path) = self.executable.path.as_ref().filter(|p| !p.is_empty()) {
            let program = self.resolve_in_dir(path)?;
            return Ok(ResolvedExecutable {
                program,
                args: Vec::new(),
            });
        }

        if let Some(command) = self.executable.command.as_ref().filter(|c| !c.is_empty()) {
            let head = &command[0];
            let program = if head.contains(std::path::MAIN_SEPARATOR) || head.contains('/') {
                self.resolve_in_dir(head)?
            } else {
                PathBuf::from(head)
            };
            return Ok(ResolvedExecutable {
                program,
                args: command[1..].to_vec(),
            });
        }

        Err(ManifestError::MissingExecutable(self.name.clone()))
    }

    fn resolve_in_dir(&self, declared: &str) -> Result<PathBuf, ManifestError> {
        let path = Path::new(declared);
        if path.is_absolute() {
            return Ok(path.to_path_buf());
        }

        let joined = self.dir.join(path);
        let canonical = fs::canonicalize(&joined).map_err(|err| {
            ManifestError::ExecutableUnresolvable(self.name.clone(), declared.to_string(), err)
        })?;
        let canonical_dir = fs::canonicalize(&self.dir).map_err(|err| {
            ManifestError::ExecutableUnresolvable(self.name.clone(), declared.to_string(), err)
        })?;

        if !canonical.starts_with(&canonical_dir) {
            return Err(ManifestError::ExecutableEscapes(
                self.name.clone(),
                declared.to_string(),
            ));
        }
        Ok(canonical)
    }
}
