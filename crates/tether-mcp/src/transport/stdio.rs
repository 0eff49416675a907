//! Subprocess transport: newline-delimited JSON over the child's stdio.

use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use super::{EventSink, EventSlot, Transport, TransportEvent};
use crate::config::{StdioTransportConfig, TransportKind};
use crate::error::{McpError, Result};

/// Spawns a server process and exchanges one JSON message per line.
///
/// The child's stderr is forwarded to `tracing` at debug level. Stdout EOF
/// (normally the process exiting) closes the transport.
pub struct StdioTransport {
    server_id: String,
    config: StdioTransportConfig,
    sink: EventSink,
    events: EventSlot,
    connected: Arc<AtomicBool>,
    started: AtomicBool,
    stdin: Mutex<Option<ChildStdin>>,
    child: Mutex<Option<Child>>,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl StdioTransport {
    /// Create an unconnected transport. Nothing is spawned until `connect`.
    pub fn new(server_id: impl Into<String>, config: StdioTransportConfig) -> Self {
        let (sink, rx) = EventSink::channel();
        Self {
            server_id: server_id.into(),
            config,
            sink,
            events: EventSlot::new(rx),
            connected: Arc::new(AtomicBool::new(false)),
            started: AtomicBool::new(false),
            stdin: Mutex::new(None),
            child: Mutex::new(None),
            tasks: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Process id of the child, if it is running.
    pub async fn pid(&self) -> Option<u32> {
        self.child.lock().await.as_ref().and_then(Child::id)
    }

    fn spawn_reader(&self, stdout: tokio::process::ChildStdout) -> JoinHandle<()> {
        let sink = self.sink.clone();
        let connected = Arc::clone(&self.connected);
        let server_id = self.server_id.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        tracing::trace!(server = %server_id, json = %line, "received MCP message");
                        sink.message(line.to_string());
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(server = %server_id, error = %e, "failed reading server stdout");
                        sink.error(format!("read failed: {}", e));
                        break;
                    }
                }
            }
            connected.store(false, Ordering::SeqCst);
            tracing::debug!(server = %server_id, "server stdout closed");
            sink.closed();
        })
    }

    fn spawn_stderr(&self, stderr: tokio::process::ChildStderr) -> JoinHandle<()> {
        let server_id = self.server_id.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(server = %server_id, "stderr: {}", line);
            }
        })
    }
}

#[async_trait]
impl Transport for StdioTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    async fn connect(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(McpError::connection("stdio transport already started"));
        }

        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args)
            .envs(&self.config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.config.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn().map_err(|e| {
            McpError::connection(format!(
                "failed to spawn '{}': {}",
                self.config.command, e
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::connection("failed to capture stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::connection("failed to capture stdout"))?;

        let mut tasks = vec![self.spawn_reader(stdout)];
        if let Some(stderr) = child.stderr.take() {
            tasks.push(self.spawn_stderr(stderr));
        }

        tracing::debug!(
            server = %self.server_id,
            command = %self.config.command,
            pid = ?child.id(),
            "spawned MCP server"
        );

        *self.stdin.lock().await = Some(stdin);
        *self.child.lock().await = Some(child);
        self.tasks.lock().extend(tasks);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, message: String) -> Result<()> {
        let mut guard = self.stdin.lock().await;
        let stdin = match guard.as_mut() {
            Some(stdin) if self.connected.load(Ordering::SeqCst) => stdin,
            // Closed has already been delivered; nothing more is emitted.
            Some(_) => return Err(McpError::connection("server process has exited")),
            None => return Err(McpError::connection("stdio transport is not connected")),
        };

        let mut line = message;
        line.push('\n');
        let written = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await
        }
        .await;

        if let Err(e) = written {
            self.connected.store(false, Ordering::SeqCst);
            let msg = format!("write to server stdin failed: {}", e);
            self.sink.error(msg.clone());
            return Err(McpError::connection(msg));
        }

        tracing::trace!(server = %self.server_id, json = %line.trim_end(), "sent MCP message");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.stdin.lock().await.take();

        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                tracing::debug!(server = %self.server_id, error = %e, "kill failed, process likely exited");
            }
        }

        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.sink.closed();
        Ok(())
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events.take()
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}
