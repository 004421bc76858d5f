//! Plugin discovery.
//!
//! Scans `<root>/*/plugin.yaml` under each search root. A broken manifest
//! is recorded and skipped; the other plugins are unaffected.

use super::manifest::{PluginManifest, PluginScope, MANIFEST_FILE};
use crate::paths;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Outcome of a discovery sweep.
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    pub manifests: Vec<PluginManifest>,
    pub skipped: Vec<SkippedPlugin>,
}

/// A manifest that failed to load or validate, with the reason.
#[derive(Debug)]
pub struct SkippedPlugin {
    pub manifest_path: PathBuf,
    pub reason: String,
}

/// The default search roots: global (`~/.mehrhof/plugins`) first, then the
/// project-local root if a project directory is given.
pub fn default_search_roots(project_dir: Option<&Path>) -> Vec<(PathBuf, PluginScope)> {
    let mut roots = Vec::new();
    match paths::global_plugins_dir() {
        Ok(dir) => roots.push((dir, PluginScope::Global)),
        Err(err) => warn!("global plugins directory unavailable: {:#}", err),
    }
    if let Some(project) = project_dir {
        roots.push((paths::project_plugins_dir(project), PluginScope::Project));
    }
    roots
}

/// Discovers plugins under the given roots.
///
/// Later roots never shadow earlier ones: the first manifest with a given
/// name wins and duplicates are skipped.
pub fn discover(roots: &[(PathBuf, PluginScope)]) -> DiscoveryReport {
    let mut report = DiscoveryReport::default();
    let mut seen = HashSet::new();

    for (root, scope) in roots {
        let entries = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(_) => {
                // A missing root is normal: most projects have no plugins.
                debug!("no plugin directory at {}", root.display());
                continue;
            }
        };

        for entry in entries.flatten() {
            let plugin_dir = entry.path();
            if !plugin_dir.is_dir() {
                continue;
            }
            let manifest_path = plugin_dir.join(MANIFEST_FILE);
            if !manifest_path.exists() {
                continue;
            }

            match PluginManifest::load(&manifest_path) {
                Ok(mut manifest) => {
                    if !seen.insert(manifest.name.clone()) {
                        warn!(
                            "skipping duplicate plugin '{}' at {}",
                            manifest.name,
                            manifest_path.display()
                        );
                        report.skipped.push(SkippedPlugin {
                            manifest_path,
                            reason: format!("duplicate plugin name '{}'", manifest.name),
                        });
                        continue;
                    }
                    manifest.scope = *scope;
                    report.manifests.push(manifest);
                }
                Err(err) => {
                    warn!("skipping plugin at {}: {:#}", manifest_path.display(), err);
                    report.skipped.push(SkippedPlugin {
                        manifest_path,
                        reason: format!("{:#}", err),
                    });
                }
            }
        }
    }

    report
}
