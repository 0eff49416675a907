//! Connection manager for many MCP servers.
//!
//! The [`ConnectionManager`] owns one connection record per server id and
//! drives each through its lifecycle: transport construction, handshake,
//! unsolicited failures, and automatic reconnection with exponential backoff.
//!
//! # Example
//!
//! ```rust,ignore
//! use tether_mcp::{ConnectionManager, ManagerConfig, ServerConfig};
//!
//! let manager = ConnectionManager::new(ManagerConfig::default());
//! let mut events = manager.subscribe();
//!
//! manager.add_connection(
//!     ServerConfig::stdio("sqlite", "mcp-server-sqlite")
//!         .with_arg("--db")
//!         .with_arg("/path/to/db.sqlite"),
//! )?;
//! manager.connect("sqlite").await?;
//!
//! for tool in manager.list_tools("sqlite").await? {
//!     println!("{}", tool.name);
//! }
//!
//! manager.dispose().await;
//! ```
//!
//! # Concurrency
//!
//! Every connection has its own async operation lock. `connect`,
//! `disconnect`, and the handling of unsolicited closes take it, so they
//! never interleave for one server while other servers proceed
//! independently. Requests do not take it; they run concurrently on the
//! connection's [`ProtocolHandler`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::{ManagerConfig, ServerConfig, duration_millis};
use crate::connection::{ConnectionEvent, ConnectionSnapshot, ConnectionStatus};
use crate::error::{McpError, Result};
use crate::handler::{HandlerConfig, ProtocolEvent, ProtocolHandler, RequestOptions};
use crate::protocol::{
    CallToolParams, CallToolResult, GetPromptParams, GetPromptResult, InitializeParams,
    InitializeResult, ListPromptsResult, ListResourcesResult, ListToolsResult, PromptInfo,
    ReadResourceParams, ReadResourceResult, ResourceInfo, ToolInfo, methods,
};
use crate::transport::{DefaultTransportFactory, TransportFactory};

/// Delay before reconnect attempt number `attempt` (1-based).
///
/// `base × 2^(attempt − 1)`, saturating at [`Duration::MAX`].
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    match 1u32.checked_shl(attempt.saturating_sub(1)) {
        Some(factor) => base.saturating_mul(factor),
        None if base.is_zero() => Duration::ZERO,
        None => Duration::MAX,
    }
}

/// Transport and handler currently serving a connection.
struct Live {
    handler: Arc<ProtocolHandler>,
    watcher: JoinHandle<()>,
}

struct SlotState {
    config: ServerConfig,
    status: ConnectionStatus,
    reconnect_attempts: u32,
    is_reconnecting: bool,
    connected_at: Option<DateTime<Utc>>,
    last_error: Option<McpError>,
    server_info: Option<InitializeResult>,
    /// Set by `disconnect`; suppresses failure handling and reconnects.
    stopping: bool,
    /// Bumped for every new transport so stale watchers can tell.
    generation: u64,
    live: Option<Live>,
    reconnect_timer: Option<JoinHandle<()>>,
}

impl SlotState {
    fn cancel_reconnect(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
        self.is_reconnecting = false;
    }
}

struct ConnectionSlot {
    id: String,
    op_lock: tokio::sync::Mutex<()>,
    state: Mutex<SlotState>,
}

impl ConnectionSlot {
    fn new(config: ServerConfig) -> Self {
        Self {
            id: config.id.clone(),
            op_lock: tokio::sync::Mutex::new(()),
            state: Mutex::new(SlotState {
                config,
                status: ConnectionStatus::Disconnected,
                reconnect_attempts: 0,
                is_reconnecting: false,
                connected_at: None,
                last_error: None,
                server_info: None,
                stopping: false,
                generation: 0,
                live: None,
                reconnect_timer: None,
            }),
        }
    }

    fn status(&self) -> ConnectionStatus {
        self.state.lock().status
    }

    fn snapshot(&self) -> ConnectionSnapshot {
        let st = self.state.lock();
        ConnectionSnapshot {
            server_id: self.id.clone(),
            name: st.config.display_name().to_string(),
            transport: st.config.transport.kind(),
            enabled: st.config.enabled,
            status: st.status,
            reconnect_attempts: st.reconnect_attempts,
            is_reconnecting: st.is_reconnecting,
            connected_at: st.connected_at,
            last_error: st.last_error.as_ref().map(ToString::to_string),
            protocol_version: st.server_info.as_ref().map(|i| i.protocol_version.clone()),
            server_info: st.server_info.as_ref().map(|i| i.server_info.clone()),
        }
    }
}

struct ManagerInner {
    config: ManagerConfig,
    factory: Arc<dyn TransportFactory>,
    slots: RwLock<HashMap<String, Arc<ConnectionSlot>>>,
    events: RwLock<Option<broadcast::Sender<ConnectionEvent>>>,
    disposed: AtomicBool,
}

/// Manages connections to many MCP servers.
///
/// Cheap to clone; clones share the same connections.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl ConnectionManager {
    /// Create a manager using the built-in transports.
    pub fn new(config: ManagerConfig) -> Self {
        Self::with_factory(config, Arc::new(DefaultTransportFactory))
    }

    /// Create a manager that builds transports with `factory`.
    pub fn with_factory(config: ManagerConfig, factory: Arc<dyn TransportFactory>) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(ManagerInner {
                config,
                factory,
                slots: RwLock::new(HashMap::new()),
                events: RwLock::new(Some(events)),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Manager-wide settings.
    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    /// Subscribe to connection events.
    ///
    /// After [`ConnectionManager::dispose`] the returned receiver is already
    /// closed.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        match self.inner.events.read().as_ref() {
            Some(tx) => tx.subscribe(),
            None => broadcast::channel(1).1,
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Registry
    // ─────────────────────────────────────────────────────────────────────

    /// Register a server. Does not connect.
    pub fn add_connection(&self, config: ServerConfig) -> Result<()> {
        self.ensure_active()?;
        config.validate()?;

        let server_id = config.id.clone();
        {
            let mut slots = self.inner.slots.write();
            if slots.contains_key(&server_id) {
                return Err(McpError::connection(format!(
                    "server '{}' is already registered",
                    server_id
                )));
            }
            slots.insert(server_id.clone(), Arc::new(ConnectionSlot::new(config)));
        }

        tracing::debug!(server = %server_id, "added MCP server");
        self.emit(ConnectionEvent::Added { server_id });
        Ok(())
    }

    /// Disconnect and unregister a server. Unknown ids are ignored.
    pub async fn remove_connection(&self, server_id: &str) {
        let Some(slot) = self.find(server_id) else {
            return;
        };
        self.stop(&slot).await;

        let removed = {
            let mut slots = self.inner.slots.write();
            match slots.get(server_id) {
                Some(current) if Arc::ptr_eq(current, &slot) => slots.remove(server_id),
                _ => None,
            }
        };
        if removed.is_some() {
            tracing::debug!(server = %server_id, "removed MCP server");
            self.emit(ConnectionEvent::Removed {
                server_id: server_id.to_string(),
            });
        }
    }

    /// Replace a server's configuration. Takes effect on the next connect.
    pub fn update_config(&self, config: ServerConfig) -> Result<()> {
        self.ensure_active()?;
        config.validate()?;
        let slot = self.slot(&config.id)?;
        slot.state.lock().config = config;
        Ok(())
    }

    /// Ids of all registered servers, sorted.
    pub fn server_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.slots.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Snapshot of one connection.
    pub fn connection(&self, server_id: &str) -> Option<ConnectionSnapshot> {
        self.find(server_id).map(|slot| slot.snapshot())
    }

    /// Snapshots of all connections, sorted by id.
    pub fn connections(&self) -> Vec<ConnectionSnapshot> {
        let mut all: Vec<ConnectionSnapshot> = self
            .inner
            .slots
            .read()
            .values()
            .map(|slot| slot.snapshot())
            .collect();
        all.sort_by(|a, b| a.server_id.cmp(&b.server_id));
        all
    }

    /// Current status of a server, if registered.
    pub fn status(&self, server_id: &str) -> Option<ConnectionStatus> {
        self.find(server_id).map(|slot| slot.status())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────

    /// Connect to a server and complete the handshake.
    ///
    /// Already connected is a no-op. A connect already in progress is an
    /// error. On failure the connection ends in `Error` and, unless the
    /// failure is a configuration problem, a reconnect may be scheduled.
    pub async fn connect(&self, server_id: &str) -> Result<()> {
        self.ensure_active()?;
        let slot = self.slot(server_id)?;
        match slot.status() {
            ConnectionStatus::Connected => return Ok(()),
            ConnectionStatus::Connecting => {
                return Err(McpError::connection(format!(
                    "server '{}' is already connecting",
                    server_id
                )));
            }
            _ => {}
        }

        // Dropping this future must not strand the connection in Connecting.
        let manager = self.clone();
        tokio::spawn(async move {
            let _guard = slot.op_lock.lock().await;
            manager.connect_locked(&slot).await
        })
        .await
        .map_err(McpError::unknown)?
    }

    /// Connect every enabled server concurrently.
    pub async fn connect_all(&self) -> Vec<(String, Result<()>)> {
        let ids: Vec<String> = {
            let slots = self.inner.slots.read();
            let mut ids: Vec<String> = slots
                .values()
                .filter(|slot| slot.state.lock().config.enabled)
                .map(|slot| slot.id.clone())
                .collect();
            ids.sort();
            ids
        };

        let attempts = ids.into_iter().map(|id| async move {
            let result = self.connect(&id).await;
            (id, result)
        });
        futures::future::join_all(attempts).await
    }

    /// Disconnect a server. Unknown ids are ignored.
    pub async fn disconnect(&self, server_id: &str) -> Result<()> {
        if let Some(slot) = self.find(server_id) {
            self.stop(&slot).await;
        }
        Ok(())
    }

    /// Disconnect everything and close the event stream.
    ///
    /// Failures along the way are suppressed. Afterwards every mutating
    /// operation fails with a connection error.
    pub async fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        let slots: Vec<Arc<ConnectionSlot>> = self.inner.slots.read().values().cloned().collect();
        let stops = slots.iter().map(|slot| self.stop(slot));
        futures::future::join_all(stops).await;

        self.inner.slots.write().clear();
        self.inner.events.write().take();
        tracing::debug!(servers = slots.len(), "connection manager disposed");
    }

    /// Whether [`ConnectionManager::dispose`] has run.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Requests
    // ─────────────────────────────────────────────────────────────────────

    /// Send an arbitrary request to a connected server.
    pub async fn request(
        &self,
        server_id: &str,
        method: &str,
        params: Option<Value>,
        options: RequestOptions,
    ) -> Result<Value> {
        let handler = self.live_handler(server_id)?;
        handler.send_request(method, params, options).await
    }

    /// List the tools a server offers.
    pub async fn list_tools(&self, server_id: &str) -> Result<Vec<ToolInfo>> {
        let value = self
            .request(server_id, methods::TOOLS_LIST, None, RequestOptions::default())
            .await?;
        let result: ListToolsResult = serde_json::from_value(value)?;
        Ok(result.tools)
    }

    /// Invoke a tool.
    pub async fn call_tool(
        &self,
        server_id: &str,
        name: &str,
        arguments: Option<Value>,
    ) -> Result<CallToolResult> {
        let params = CallToolParams {
            name: name.to_string(),
            arguments,
        };
        let value = self
            .request(
                server_id,
                methods::TOOLS_CALL,
                Some(serde_json::to_value(params)?),
                RequestOptions::default(),
            )
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// List the resources a server offers.
    pub async fn list_resources(&self, server_id: &str) -> Result<Vec<ResourceInfo>> {
        let value = self
            .request(server_id, methods::RESOURCES_LIST, None, RequestOptions::default())
            .await?;
        let result: ListResourcesResult = serde_json::from_value(value)?;
        Ok(result.resources)
    }

    /// Read one resource.
    pub async fn read_resource(&self, server_id: &str, uri: &str) -> Result<ReadResourceResult> {
        let params = ReadResourceParams {
            uri: uri.to_string(),
        };
        let value = self
            .request(
                server_id,
                methods::RESOURCES_READ,
                Some(serde_json::to_value(params)?),
                RequestOptions::default(),
            )
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// List the prompts a server offers.
    pub async fn list_prompts(&self, server_id: &str) -> Result<Vec<PromptInfo>> {
        let value = self
            .request(server_id, methods::PROMPTS_LIST, None, RequestOptions::default())
            .await?;
        let result: ListPromptsResult = serde_json::from_value(value)?;
        Ok(result.prompts)
    }

    /// Render a prompt.
    pub async fn get_prompt(
        &self,
        server_id: &str,
        name: &str,
        arguments: Option<Value>,
    ) -> Result<GetPromptResult> {
        let params = GetPromptParams {
            name: name.to_string(),
            arguments,
        };
        let value = self
            .request(
                server_id,
                methods::PROMPTS_GET,
                Some(serde_json::to_value(params)?),
                RequestOptions::default(),
            )
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────

    fn ensure_active(&self) -> Result<()> {
        if self.is_disposed() {
            Err(McpError::connection("connection manager disposed"))
        } else {
            Ok(())
        }
    }

    fn find(&self, server_id: &str) -> Option<Arc<ConnectionSlot>> {
        self.inner.slots.read().get(server_id).cloned()
    }

    fn slot(&self, server_id: &str) -> Result<Arc<ConnectionSlot>> {
        self.find(server_id)
            .ok_or_else(|| McpError::connection(format!("unknown server '{}'", server_id)))
    }

    fn live_handler(&self, server_id: &str) -> Result<Arc<ProtocolHandler>> {
        let slot = self.slot(server_id)?;
        let st = slot.state.lock();
        match (&st.status, &st.live) {
            (ConnectionStatus::Connected, Some(live)) => Ok(Arc::clone(&live.handler)),
            _ => Err(McpError::connection(format!(
                "server '{}' is not connected ({})",
                server_id, st.status
            ))),
        }
    }

    fn emit(&self, event: ConnectionEvent) {
        if let Some(tx) = self.inner.events.read().as_ref() {
            // No subscribers is fine.
            let _ = tx.send(event);
        }
    }

    fn set_status(&self, slot: &ConnectionSlot, new: ConnectionStatus) {
        let old = {
            let mut st = slot.state.lock();
            let old = st.status;
            if old == new {
                return;
            }
            if !old.can_transition_to(new) {
                tracing::warn!(server = %slot.id, %old, %new, "ignoring invalid status transition");
                return;
            }
            st.status = new;
            old
        };
        tracing::debug!(server = %slot.id, %old, %new, "status changed");
        self.emit(ConnectionEvent::StatusChanged {
            server_id: slot.id.clone(),
            old,
            new,
        });
    }

    /// Body of `connect`; the caller holds the operation lock.
    async fn connect_locked(&self, slot: &Arc<ConnectionSlot>) -> Result<()> {
        let config = {
            let mut st = slot.state.lock();
            match st.status {
                ConnectionStatus::Connected => return Ok(()),
                ConnectionStatus::Connecting => {
                    return Err(McpError::connection(format!(
                        "server '{}' is already connecting",
                        slot.id
                    )));
                }
                _ => {}
            }
            st.stopping = false;
            st.cancel_reconnect();
            st.config.clone()
        };

        self.set_status(slot, ConnectionStatus::Connecting);
        tracing::info!(
            server = %slot.id,
            transport = %config.transport.kind(),
            target = %config.transport.target(),
            "connecting to MCP server"
        );

        let timeout = config.timeout();
        let attempt = tokio::time::timeout(timeout, self.establish(slot, &config)).await;
        let outcome = match attempt {
            Ok(result) => result,
            Err(_) => Err(McpError::timeout(timeout)),
        };

        match outcome {
            Ok(init) => {
                tracing::info!(
                    server = %slot.id,
                    remote = %init.server_info.name,
                    remote_version = %init.server_info.version,
                    protocol = %init.protocol_version,
                    "connected to MCP server"
                );
                {
                    let mut st = slot.state.lock();
                    st.connected_at = Some(Utc::now());
                    st.reconnect_attempts = 0;
                    st.last_error = None;
                    st.server_info = Some(init);
                }
                self.set_status(slot, ConnectionStatus::Connected);
                Ok(())
            }
            Err(error) => {
                tracing::error!(server = %slot.id, error = %error, "failed to connect to MCP server");
                let live = {
                    let mut st = slot.state.lock();
                    st.last_error = Some(error.clone());
                    st.live.take()
                };
                if let Some(live) = live {
                    teardown(&slot.id, live, true).await;
                }
                self.set_status(slot, ConnectionStatus::Error);
                self.emit(ConnectionEvent::Error {
                    server_id: slot.id.clone(),
                    error: error.clone(),
                });
                if !error.is_fatal() {
                    self.schedule_reconnect(slot);
                }
                Err(error)
            }
        }
    }

    /// Build the transport and handler, then run the handshake.
    async fn establish(
        &self,
        slot: &Arc<ConnectionSlot>,
        config: &ServerConfig,
    ) -> Result<InitializeResult> {
        let transport = self.inner.factory.create(&slot.id, &config.transport)?;
        let handler = Arc::new(ProtocolHandler::new(
            slot.id.clone(),
            Arc::clone(&transport),
            HandlerConfig {
                request_timeout: config.timeout(),
                event_capacity: self.inner.config.event_capacity,
            },
        ));

        let generation = {
            let mut st = slot.state.lock();
            st.generation += 1;
            st.generation
        };
        let watcher = self.spawn_watcher(slot, &handler, generation);
        slot.state.lock().live = Some(Live {
            handler: Arc::clone(&handler),
            watcher,
        });

        transport.connect().await?;

        let params = InitializeParams::new(self.inner.config.client_info.clone());
        let reply = handler
            .send_request(
                methods::INITIALIZE,
                Some(serde_json::to_value(params)?),
                RequestOptions::default(),
            )
            .await?;
        let init = InitializeResult::from_handshake(reply)?;
        handler.send_notification(methods::INITIALIZED, None).await?;
        Ok(init)
    }

    fn spawn_watcher(
        &self,
        slot: &Arc<ConnectionSlot>,
        handler: &ProtocolHandler,
        generation: u64,
    ) -> JoinHandle<()> {
        let mut events = handler.subscribe();
        let weak = Arc::downgrade(&self.inner);
        let slot = Arc::clone(slot);
        tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(server = %slot.id, skipped, "watcher lagged behind handler events");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                };
                let Some(manager) = upgrade(&weak) else {
                    return;
                };
                match event {
                    ProtocolEvent::Notification { method, params } => {
                        manager.emit(ConnectionEvent::Notification {
                            server_id: slot.id.clone(),
                            method,
                            params,
                        });
                    }
                    ProtocolEvent::ProtocolError(message) => {
                        let error = McpError::protocol(message);
                        slot.state.lock().last_error = Some(error.clone());
                        manager.emit(ConnectionEvent::Error {
                            server_id: slot.id.clone(),
                            error,
                        });
                    }
                    ProtocolEvent::TransportError(message) => {
                        manager
                            .handle_drop(&slot, generation, Some(McpError::connection(message)))
                            .await;
                        return;
                    }
                    ProtocolEvent::TransportClosed => {
                        manager.handle_drop(&slot, generation, None).await;
                        return;
                    }
                }
            }
        })
    }

    /// React to a live connection failing or closing on its own.
    async fn handle_drop(
        &self,
        slot: &Arc<ConnectionSlot>,
        generation: u64,
        error: Option<McpError>,
    ) {
        let _guard = slot.op_lock.lock().await;
        let live = {
            let mut st = slot.state.lock();
            if st.generation != generation
                || st.status != ConnectionStatus::Connected
                || st.stopping
            {
                return;
            }
            st.connected_at = None;
            st.last_error = Some(
                error
                    .clone()
                    .unwrap_or_else(|| McpError::connection("connection closed by server")),
            );
            st.live.take()
        };
        if let Some(live) = live {
            teardown(&slot.id, live, false).await;
        }

        match error {
            Some(error) => {
                tracing::warn!(server = %slot.id, error = %error, "MCP connection failed");
                self.set_status(slot, ConnectionStatus::Error);
                self.emit(ConnectionEvent::Error {
                    server_id: slot.id.clone(),
                    error,
                });
            }
            None => {
                tracing::info!(server = %slot.id, "MCP server closed the connection");
                self.set_status(slot, ConnectionStatus::Disconnected);
                self.emit(ConnectionEvent::Closed {
                    server_id: slot.id.clone(),
                });
            }
        }
        self.schedule_reconnect(slot);
    }

    /// Arm the reconnect timer if policy allows.
    fn schedule_reconnect(&self, slot: &Arc<ConnectionSlot>) {
        let (attempt, delay) = {
            let mut st = slot.state.lock();
            let enabled = st
                .config
                .auto_reconnect
                .unwrap_or(self.inner.config.auto_reconnect);
            if !enabled || st.stopping || st.reconnect_timer.is_some() || self.is_disposed() {
                return;
            }
            let max = self.inner.config.max_reconnect_attempts;
            if st.reconnect_attempts >= max {
                tracing::warn!(server = %slot.id, attempts = st.reconnect_attempts, "giving up on reconnecting");
                return;
            }

            st.reconnect_attempts += 1;
            let attempt = st.reconnect_attempts;
            let delay = backoff_delay(self.inner.config.reconnect_base_delay, attempt);
            st.is_reconnecting = true;

            let weak = Arc::downgrade(&self.inner);
            let timer_slot = Arc::clone(slot);
            st.reconnect_timer = Some(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                {
                    let mut st = timer_slot.state.lock();
                    // Detach rather than abort: this is the running task.
                    st.reconnect_timer.take();
                    st.is_reconnecting = false;
                }
                let Some(manager) = upgrade(&weak) else {
                    return;
                };
                if let Err(e) = manager.connect(&timer_slot.id).await {
                    tracing::debug!(server = %timer_slot.id, attempt, error = %e, "reconnect attempt failed");
                }
            }));
            (attempt, delay)
        };

        tracing::info!(
            server = %slot.id,
            attempt,
            delay_ms = duration_millis(delay),
            "reconnect scheduled"
        );
        self.emit(ConnectionEvent::ReconnectScheduled {
            server_id: slot.id.clone(),
            attempt,
            delay,
        });
    }

    /// Cancel any reconnect and tear the connection down.
    async fn stop(&self, slot: &Arc<ConnectionSlot>) {
        {
            let mut st = slot.state.lock();
            st.stopping = true;
            st.cancel_reconnect();
        }

        let _guard = slot.op_lock.lock().await;
        let live = {
            let mut st = slot.state.lock();
            st.stopping = true;
            st.cancel_reconnect();
            st.connected_at = None;
            st.live.take()
        };
        if let Some(live) = live {
            teardown(&slot.id, live, true).await;
        }
        if slot.status() == ConnectionStatus::Connected {
            tracing::info!(server = %slot.id, "disconnected from MCP server");
            self.set_status(slot, ConnectionStatus::Disconnected);
        }
    }
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        for slot in self.slots.get_mut().values() {
            let mut st = slot.state.lock();
            st.cancel_reconnect();
            if let Some(live) = st.live.take() {
                live.watcher.abort();
                live.handler.dispose();
            }
        }
    }
}

fn upgrade(weak: &Weak<ManagerInner>) -> Option<ConnectionManager> {
    weak.upgrade().map(|inner| ConnectionManager { inner })
}

/// Close the transport and dispose the handler.
///
/// `abort_watcher` is false when the watcher itself is tearing down.
async fn teardown(server_id: &str, live: Live, abort_watcher: bool) {
    if abort_watcher {
        live.watcher.abort();
    }
    if let Err(e) = live.handler.transport().close().await {
        tracing::debug!(server = %server_id, error = %e, "transport close failed");
    }
    live.handler.dispose();
}
