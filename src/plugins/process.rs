//! Plugin subprocess supervisor.
//!
//! Spawns a plugin executable and multiplexes line-delimited JSON requests,
//! responses and streaming notifications over its pipes. One background
//! reader is the sole consumer of stdout; a drainer logs stderr. Both are
//! bound to a supervisor-local cancellation token — per-call deadlines can
//! never wake the reader, only shutdown can.

use super::manifest::PluginManifest;
use super::protocol::{classify_line, Incoming, Request, Response, STREAM_METHOD};
use super::PluginError;
use anyhow::{anyhow, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const STDOUT_BUFFER_BYTES: usize = 1024 * 1024;

const STREAM_CHANNEL_CAPACITY: usize = 100;

/// Best-effort window for the shutdown request during stop.
const SHUTDOWN_WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// How long a stopping child may take to exit before it is killed.
const CHILD_EXIT_TIMEOUT: Duration = Duration::from_secs(10);

type PendingMap = HashMap<u64, oneshot::Sender<Response>>;

/// Removes a pending entry when the awaiting call is dropped before its
/// response arrives; a late response then finds no waiter and is dropped.
struct PendingGuard<'a> {
    pending: &'a StdMutex<PendingMap>,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&self.id);
        }
    }
}

/// Runtime handle for a running plugin.
pub struct PluginProcess {
    name: String,
    manifest: Arc<PluginManifest>,
    stdin: Mutex<Option<ChildStdin>>,
    child: Mutex<Option<Child>>,
    pending: StdMutex<PendingMap>,
    stream_tx: StdMutex<Option<mpsc::Sender<Value>>>,
    next_id: AtomicU64,
    started: AtomicBool,
    stopping: AtomicBool,
    error: StdMutex<Option<String>>,
    done_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
    cancel: CancellationToken,
}

impl PluginProcess {
    /// Resolves the executable, spawns the child with the host environment,
    /// and starts the background readers.
    pub async fn start(manifest: Arc<PluginManifest>) -> Result<Arc<Self>, PluginError> {
        let name = manifest.name.clone();
        let resolved = manifest
            .resolve_executable()
            .map_err(|err| PluginError::StartFailed {
                name: name.clone(),
                reason: err.to_string(),
            })?;

        let mut command = Command::new(&resolved.program);
        command
            .args(&resolved.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if !manifest.dir.as_os_str().is_empty() {
            command.current_dir(&manifest.dir);
        }

        let mut child = command.spawn().map_err(|err| PluginError::StartFailed {
            name: name.clone(),
            reason: format!("spawn failed: {}", err),
        })?;

        let missing_pipe = |pipe: &str| PluginError::StartFailed {
            name: name.clone(),
            reason: format!("missing {} pipe", pipe),
        };
        let stdin = child.stdin.take().ok_or_else(|| missing_pipe("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing_pipe("stderr"))?;

        let (done_tx, done_rx) = watch::channel(false);
        let process = Arc::new(Self {
            name,
            manifest,
            stdin: Mutex::new(Some(stdin)),
            child: Mutex::new(Some(child)),
            pending: StdMutex::new(PendingMap::new()),
            stream_tx: StdMutex::new(None),
            next_id: AtomicU64::new(1),
            started: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            error: StdMutex::new(None),
            done_tx,
            done_rx,
            cancel: CancellationToken::new(),
        });

        Arc::clone(&process).spawn_reader(stdout);
        Arc::clone(&process).spawn_stderr_drainer(stderr);
        process.started.store(true, Ordering::SeqCst);

        Ok(process)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn manifest(&self) -> &Arc<PluginManifest> {
        &self.manifest
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Resolves once a stop has fully completed.
    pub async fn wait_stopped(&self) {
        let mut done = self.done_rx.clone();
        while !*done.borrow() {
            if done.changed().await.is_err() {
                return;
            }
        }
    }

    /// Issues a request and awaits the response with the matching id.
    ///
    /// Responses may arrive in any order; the pending table correlates
    /// them. Dropping the returned future cancels the call: the pending
    /// entry is removed and a late response is silently discarded.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, PluginError> {
        if self.is_stopping() {
            return Err(PluginError::Stopping(self.name.clone()));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().expect("pending table poisoned").insert(id, tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };

        // A stop racing past the first check drains every entry inserted
        // before this point; re-checking closes the window.
        if self.is_stopping() {
            return Err(PluginError::Stopping(self.name.clone()));
        }

        let request = Request::new(id, method, params);
        let line = serde_json::to_string(&request).map_err(|err| PluginError::Encode {
            name: self.name.clone(),
            reason: err.to_string(),
        })?;
        self.write_line(&line).await?;

        let response = rx
            .await
            .map_err(|_| PluginError::Closed(self.name.clone()))?;

        if let Some(error) = response.error {
            return Err(PluginError::Rpc {
                code: error.code,
                message: error.message,
                data: error.data,
            });
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    /// [`call`](Self::call) bounded by a deadline; elapsing maps to
    /// [`PluginError::Cancelled`].
    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, PluginError> {
        match tokio::time::timeout(timeout, self.call(method, params)).await {
            Ok(result) => result,
            Err(_) => Err(PluginError::Cancelled),
        }
    }

    /// Opens a streaming channel and sends the id-0 request that starts it.
    ///
    /// Any prior stream channel is replaced; concurrent streams per process
    /// are not supported. Events arrive in the order the plugin sent them;
    /// on overflow the newest event is dropped. Dropping the receiver is
    /// cancellation.
    pub async fn stream(
        &self,
        method: &str,
        params: Value,
    ) -> Result<mpsc::Receiver<Value>, PluginError> {
        if self.is_stopping() {
            return Err(PluginError::Stopping(self.name.clone()));
        }

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        *self.stream_tx.lock().expect("stream slot poisoned") = Some(tx);

        let request = Request::new(0, method, params);
        let line = serde_json::to_string(&request).map_err(|err| PluginError::Encode {
            name: self.name.clone(),
            reason: err.to_string(),
        })?;
        self.write_line(&line).await?;

        Ok(rx)
    }

    /// Tears the process down.
    ///
    /// Idempotent: a repeat call waits for the first to complete and
    /// returns the recorded outcome. Pending calls fail with
    /// [`PluginError::Closed`]; the child gets `CHILD_EXIT_TIMEOUT` to
    /// exit before it is killed, and is reaped either way.
    pub async fn stop(&self) -> Result<()> {
        if self.stopping.swap(true, Ordering::SeqCst) {
            self.wait_stopped().await;
            return self.recorded_outcome();
        }

        // Best-effort shutdown notice; the reader is about to be cancelled,
        // so the reply (if any) is never awaited.
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        if let Ok(line) = serde_json::to_string(&Request {
            id,
            method: "shutdown".to_string(),
            params: None,
        }) {
            match tokio::time::timeout(SHUTDOWN_WRITE_TIMEOUT, self.write_line(&line)).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => debug!("plugin '{}': shutdown request failed: {}", self.name, err),
                Err(_) => debug!("plugin '{}': shutdown request timed out", self.name),
            }
        }

        self.cancel.cancel();
        self.release_waiters();

        // Closing stdin signals EOF to the child.
        self.stdin.lock().await.take();

        let child = self.child.lock().await.take();
        if let Some(mut child) = child {
            match tokio::time::timeout(CHILD_EXIT_TIMEOUT, child.wait()).await {
                Ok(Ok(status)) => debug!("plugin '{}' exited with {}", self.name, status),
                Ok(Err(err)) => self.record_error(format!("failed to await plugin exit: {}", err)),
                Err(_) => {
                    warn!(
                        "plugin '{}' did not exit within {:?}; killing",
                        self.name, CHILD_EXIT_TIMEOUT
                    );
                    if let Err(err) = child.start_kill() {
                        self.record_error(format!("failed to kill plugin: {}", err));
                    }
                    // Still reap after the kill to avoid a zombie.
                    if let Err(err) = child.wait().await {
                        self.record_error(format!("failed to reap plugin: {}", err));
                    }
                }
            }
        }

        let _ = self.done_tx.send(true);
        self.recorded_outcome()
    }

    fn recorded_outcome(&self) -> Result<()> {
        match self.error.lock().expect("error slot poisoned").clone() {
            Some(message) => Err(anyhow!("plugin '{}': {}", self.name, message)),
            None => Ok(()),
        }
    }

    fn record_error(&self, message: String) {
        let mut slot = self.error.lock().expect("error slot poisoned");
        if slot.is_none() {
            *slot = Some(message);
        }
    }

    async fn write_line(&self, line: &str) -> Result<(), PluginError> {
        let io_err = |source| PluginError::Io {
            name: self.name.clone(),
            source,
        };
        let mut stdin = self.stdin.lock().await;
        let Some(stdin) = stdin.as_mut() else {
            return Err(PluginError::Closed(self.name.clone()));
        };
        stdin.write_all(line.as_bytes()).await.map_err(io_err)?;
        stdin.write_all(b"\n").await.map_err(io_err)?;
        stdin.flush().await.map_err(io_err)?;
        Ok(())
    }

    fn spawn_reader(self: Arc<Self>, stdout: ChildStdout) {
        tokio::spawn(async move {
            let mut reader = BufReader::with_capacity(STDOUT_BUFFER_BYTES, stdout);
            let mut line = String::new();
            loop {
                line.clear();
                let read = tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    read = reader.read_line(&mut line) => read,
                };
                match read {
                    Ok(0) => break,
                    Ok(_) => self.handle_line(&line),
                    Err(err) => {
                        self.record_error(format!("stdout read failed: {}", err));
                        break;
                    }
                }
            }
            // On EOF, read error or cancellation alike: fail the in-flight
            // calls and close the stream channel.
            self.release_waiters();
        });
    }

    fn handle_line(&self, line: &str) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return;
        }
        match classify_line(trimmed) {
            Some(Incoming::Response(response)) => {
                let waiter = self
                    .pending
                    .lock()
                    .expect("pending table poisoned")
                    .remove(&response.id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => debug!(
                        "plugin '{}': dropping response for unknown id {}",
                        self.name, response.id
                    ),
                }
            }
            Some(Incoming::Notification(note)) if note.method == STREAM_METHOD => {
                let slot = self.stream_tx.lock().expect("stream slot poisoned");
                if let Some(tx) = slot.as_ref() {
                    if tx.try_send(note.params).is_err() {
                        debug!("plugin '{}': stream event dropped", self.name);
                    }
                }
            }
            Some(Incoming::Notification(note)) => {
                debug!("plugin '{}': ignoring notification '{}'", self.name, note.method);
            }
            None => debug!("plugin '{}': skipping malformed line", self.name),
        }
    }

    fn release_waiters(&self) {
        // Dropping the senders wakes every waiter with a closed error.
        let _drained: Vec<oneshot::Sender<Response>> = self
            .pending
            .lock()
            .expect("pending table poisoned")
            .drain()
            .map(|(_, tx)| tx)
            .collect();
        *self.stream_tx.lock().expect("stream slot poisoned") = None;
    }

    fn spawn_stderr_drainer(self: Arc<Self>, stderr: ChildStderr) {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            loop {
                let line = tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    line = lines.next_line() => line,
                };
                match line {
                    Ok(Some(line)) => debug!("[plugin:{}] {}", self.name, line),
                    Ok(None) => break,
                    Err(err) => {
                        self.record_error(format!("stderr read failed: {}", err));
                        break;
                    }
                }
            }
        });
    }
}

impl std::fmt::Debug for PluginProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginProcess")
            .field("name", &self.name)
            .field("started", &self.is_started())
            .field("stopping", &self.is_stopping())
            .finish()
    }
}
