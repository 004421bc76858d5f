//! Process cache over the supervisor.
//!
//! Plugins are started on first use and reused across calls. A stopping
//! instance is waited out (with the cache lock released) before a fresh
//! one is spawned under the same name.

use super::manifest::PluginManifest;
use super::process::PluginProcess;
use super::PluginError;
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Caches running plugin processes by plugin name.
#[derive(Debug, Default)]
pub struct PluginRuntime {
    processes: Mutex<HashMap<String, Arc<PluginProcess>>>,
}

impl PluginRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the running process for the manifest, starting one if
    /// needed. A prior instance that is still stopping is waited out
    /// first, then replaced.
    pub async fn load(&self, manifest: &Arc<PluginManifest>) -> Result<Arc<PluginProcess>, PluginError> {
        loop {
            let mut processes = self.processes.lock().await;
            match processes.get(&manifest.name).cloned() {
                Some(process) if !process.is_stopping() => return Ok(process),
                Some(process) => {
                    drop(processes);
                    process.wait_stopped().await;
                    let mut processes = self.processes.lock().await;
                    if processes
                        .get(&manifest.name)
                        .is_some_and(|current| Arc::ptr_eq(current, &process))
                    {
                        processes.remove(&manifest.name);
                    }
                    continue;
                }
                None => {
                    let process = PluginProcess::start(Arc::clone(manifest)).await?;
                    processes.insert(manifest.name.clone(), Arc::clone(&process));
                    return Ok(process);
                }
            }
        }
    }

    /// Whether a process is cached (started and not stopping) for `name`.
    pub async fn is_loaded(&self, name: &str) -> bool {
        self.processes
            .lock()
            .await
            .get(name)
            .is_some_and(|p| p.is_started() && !p.is_stopping())
    }

    /// Removes the process from the cache and stops it.
    pub async fn unload(&self, name: &str) -> Result<()> {
        let process = self.processes.lock().await.remove(name);
        match process {
            Some(process) => process.stop().await,
            None => Ok(()),
        }
    }

    /// Stops every cached process and joins their errors.
    pub async fn unload_all(&self) -> Result<()> {
        let processes: Vec<Arc<PluginProcess>> =
            self.processes.lock().await.drain().map(|(_, p)| p).collect();

        let results = futures::future::join_all(processes.iter().map(|p| p.stop())).await;
        let failures: Vec<String> = results
            .into_iter()
            .filter_map(|result| result.err().map(|err| format!("{:#}", err)))
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(anyhow!(
                "{} plugin(s) failed to stop cleanly: {}",
                failures.len(),
                failures.join("; ")
            ))
        }
    }
}
