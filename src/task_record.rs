//! Persisted active-task record.
//!
//! The host keeps one of these per active task session; the engine only
//! reaches it through the `save_state` / `load_state` effects the host
//! registers.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// On-disk record of an active task session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveTaskRecord {
    /// Work-unit identifier.
    pub id: String,
    /// Task source reference.
    #[serde(rename = "ref")]
    pub task_ref: String,
    #[serde(rename = "workDir")]
    pub work_dir: PathBuf,
    /// Machine state tag at the time of the save.
    pub state: String,
    /// Working branch the session operates on.
    pub branch: String,
    /// Session start timestamp (RFC3339).
    pub started: String,
}

impl ActiveTaskRecord {
    pub fn new(
        id: impl Into<String>,
        task_ref: impl Into<String>,
        work_dir: impl Into<PathBuf>,
        state: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            task_ref: task_ref.into(),
            work_dir: work_dir.into(),
            state: state.into(),
            branch: branch.into(),
            started: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Save the record atomically using the write-then-rename pattern.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let temp_path = path.with_extension("json.tmp");
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize task record")?;
        fs::write(&temp_path, &content)
            .with_context(|| format!("Failed to write temp file: {}", temp_path.display()))?;
        fs::rename(&temp_path, path)
            .with_context(|| format!("Failed to rename to: {}", path.display()))?;
        Ok(())
    }

    /// Load a record, returning `None` when no record exists.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read task record: {}", path.display()))?;
        let record =
            serde_json::from_str(&content).context("Failed to parse task record")?;
        Ok(Some(record))
    }
}
