//! Home-based storage paths for mehrhof persistence and plugin discovery.
//!
//! - `~/.mehrhof/` - tool home
//! - `~/.mehrhof/plugins/` - globally installed plugins
//! - `<project>/.mehrhof/plugins/` - project-local plugins

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// The name of the mehrhof directory.
const MEHRHOF_DIR: &str = ".mehrhof";

/// Returns the home-based mehrhof directory: `~/.mehrhof/`
///
/// Creates the directory if it doesn't exist.
pub fn mehrhof_home_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    let dir = home.join(MEHRHOF_DIR);
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create mehrhof directory: {}", dir.display()))?;
    Ok(dir)
}

/// Returns the global plugins directory: `~/.mehrhof/plugins/`
///
/// Creates the directory if it doesn't exist.
pub fn global_plugins_dir() -> Result<PathBuf> {
    let dir = mehrhof_home_dir()?.join("plugins");
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create plugins directory: {}", dir.display()))?;
    Ok(dir)
}

/// Returns the project-local plugins directory: `<project>/.mehrhof/plugins/`
///
/// Does not create it; a project without plugins is the common case.
pub fn project_plugins_dir(project_dir: &Path) -> PathBuf {
    project_dir.join(MEHRHOF_DIR).join("plugins")
}
