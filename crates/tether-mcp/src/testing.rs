//! In-memory transports for deterministic tests.
//!
//! [`channel_pair`] gives a [`ChannelTransport`] and the [`RemotePeer`] that
//! plays the server by hand. [`MockTransportFactory`] goes one step further
//! and runs a scripted server behind every transport it creates, so the
//! [`ConnectionManager`](crate::ConnectionManager) can be exercised without
//! processes or sockets.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::config::{TransportConfig, TransportKind};
use crate::error::{McpError, Result};
use crate::protocol::{
    ErrorCode, JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcResponse,
    MCP_PROTOCOL_VERSION, RequestId, methods,
};
use crate::transport::{EventSink, EventSlot, Transport, TransportEvent, TransportFactory};

/// Transport whose far end is a [`RemotePeer`] in the same process.
pub struct ChannelTransport {
    kind: TransportKind,
    sink: EventSink,
    events: EventSlot,
    connected: Arc<AtomicBool>,
    outbound: mpsc::UnboundedSender<String>,
    connect_error: Option<McpError>,
}

/// The server side of a [`ChannelTransport`].
pub struct RemotePeer {
    control: PeerControl,
    inbound: mpsc::UnboundedReceiver<String>,
}

/// Cloneable handle for injecting server-side events.
#[derive(Clone)]
pub struct PeerControl {
    sink: EventSink,
    connected: Arc<AtomicBool>,
}

/// Create a connected-on-demand transport and its peer.
pub fn channel_pair(kind: TransportKind) -> (ChannelTransport, RemotePeer) {
    let (sink, rx) = EventSink::channel();
    let (outbound, inbound) = mpsc::unbounded_channel();
    let connected = Arc::new(AtomicBool::new(false));
    let control = PeerControl {
        sink: sink.clone(),
        connected: Arc::clone(&connected),
    };
    (
        ChannelTransport {
            kind,
            sink,
            events: EventSlot::new(rx),
            connected,
            outbound,
            connect_error: None,
        },
        RemotePeer { control, inbound },
    )
}

impl ChannelTransport {
    /// Make `connect` fail with `error`.
    pub fn fail_connect_with(mut self, error: McpError) -> Self {
        self.connect_error = Some(error);
        self
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn connect(&self) -> Result<()> {
        if let Some(err) = &self.connect_error {
            return Err(err.clone());
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, message: String) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(McpError::connection("channel transport is not connected"));
        }
        self.outbound
            .send(message)
            .map_err(|_| McpError::connection("remote peer dropped"))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.sink.closed();
        Ok(())
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events.take()
    }
}

impl PeerControl {
    /// Deliver raw text to the client.
    pub fn send_raw(&self, text: impl Into<String>) {
        self.sink.message(text.into());
    }

    /// Deliver a message to the client.
    pub fn send(&self, message: &JsonRpcMessage) {
        if let Ok(json) = message.to_json() {
            self.sink.message(json);
        }
    }

    /// Reply to a request with a result.
    pub fn respond(&self, id: RequestId, result: Value) {
        self.send(&JsonRpcMessage::Response(JsonRpcResponse::success(id, result)));
    }

    /// Reply to a request with an error.
    pub fn respond_error(&self, id: RequestId, error: JsonRpcError) {
        self.send(&JsonRpcMessage::Response(JsonRpcResponse::failure(id, error)));
    }

    /// Push a notification to the client.
    pub fn notify(&self, method: &str, params: Option<Value>) {
        self.send(&JsonRpcMessage::Notification(JsonRpcNotification::new(
            method, params,
        )));
    }

    /// Report a transport failure.
    pub fn fail(&self, error: impl Into<String>) {
        self.sink.error(error.into());
    }

    /// Drop the connection from the server side.
    pub fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.sink.closed();
    }
}

impl RemotePeer {
    /// Handle for injecting events from elsewhere.
    pub fn control(&self) -> PeerControl {
        self.control.clone()
    }

    /// Next raw message the client sent.
    pub async fn recv_raw(&mut self) -> Option<String> {
        self.inbound.recv().await
    }

    /// Next message the client sent, classified.
    pub async fn recv(&mut self) -> Option<JsonRpcMessage> {
        let text = self.inbound.recv().await?;
        JsonRpcMessage::parse(&text).ok()
    }
}

impl std::ops::Deref for RemotePeer {
    type Target = PeerControl;

    fn deref(&self) -> &PeerControl {
        &self.control
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scripted server
// ─────────────────────────────────────────────────────────────────────────────

/// How the scripted server behind a [`MockTransportFactory`] behaves.
#[derive(Debug, Clone)]
pub struct MockServerScript {
    /// Leave `protocolVersion` out of the handshake reply.
    pub omit_protocol_version: bool,
    /// Never answer `initialize`.
    pub hang_on_initialize: bool,
    /// Fail `Transport::connect` with this error.
    pub connect_error: Option<McpError>,
    /// Tool names the server knows.
    pub tools: Vec<String>,
}

impl Default for MockServerScript {
    fn default() -> Self {
        Self {
            omit_protocol_version: false,
            hang_on_initialize: false,
            connect_error: None,
            tools: vec!["echo".to_string()],
        }
    }
}

/// Factory that wires every transport to a scripted in-process server.
pub struct MockTransportFactory {
    script: Mutex<MockServerScript>,
    create_error: Mutex<Option<McpError>>,
    peers: Mutex<Vec<(String, PeerControl)>>,
    created: AtomicUsize,
}

impl Default for MockTransportFactory {
    fn default() -> Self {
        Self::new(MockServerScript::default())
    }
}

impl MockTransportFactory {
    /// Create a factory running `script` behind each transport.
    pub fn new(script: MockServerScript) -> Self {
        Self {
            script: Mutex::new(script),
            create_error: Mutex::new(None),
            peers: Mutex::new(Vec::new()),
            created: AtomicUsize::new(0),
        }
    }

    /// Change the script for transports created from now on.
    pub fn set_script(&self, script: MockServerScript) {
        *self.script.lock() = script;
    }

    /// Make `create` fail with `error` until cleared with `None`.
    pub fn set_create_error(&self, error: Option<McpError>) {
        *self.create_error.lock() = error;
    }

    /// How many transports have been created.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Control handle for the most recent transport created for `server_id`.
    pub fn peer(&self, server_id: &str) -> Option<PeerControl> {
        self.peers
            .lock()
            .iter()
            .rev()
            .find(|(id, _)| id == server_id)
            .map(|(_, control)| control.clone())
    }
}

impl TransportFactory for MockTransportFactory {
    fn create(&self, server_id: &str, config: &TransportConfig) -> Result<Arc<dyn Transport>> {
        if let Some(err) = self.create_error.lock().clone() {
            return Err(err);
        }

        let script = self.script.lock().clone();
        let (mut transport, peer) = channel_pair(config.kind());
        if let Some(err) = script.connect_error.clone() {
            transport = transport.fail_connect_with(err);
        }

        self.peers.lock().push((server_id.to_string(), peer.control()));
        self.created.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(run_script(peer, script));
        Ok(Arc::new(transport))
    }
}

async fn run_script(mut peer: RemotePeer, script: MockServerScript) {
    let tools: HashSet<String> = script.tools.iter().cloned().collect();
    while let Some(message) = peer.recv().await {
        let JsonRpcMessage::Request(request) = message else {
            continue;
        };
        let params = request.params.unwrap_or(Value::Null);
        match request.method.as_str() {
            methods::INITIALIZE if script.hang_on_initialize => {}
            methods::INITIALIZE => {
                let mut result = json!({
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": "scripted", "version": "1.0.0"}
                });
                if !script.omit_protocol_version {
                    result["protocolVersion"] = json!(MCP_PROTOCOL_VERSION);
                }
                peer.respond(request.id, result);
            }
            methods::PING => peer.respond(request.id, json!({})),
            methods::TOOLS_LIST => {
                let list: Vec<Value> = script
                    .tools
                    .iter()
                    .map(|name| json!({"name": name, "inputSchema": {"type": "object"}}))
                    .collect();
                peer.respond(request.id, json!({"tools": list}));
            }
            methods::TOOLS_CALL => {
                let name = params["name"].as_str().unwrap_or_default().to_string();
                if tools.contains(&name) {
                    let text = params["arguments"].to_string();
                    peer.respond(
                        request.id,
                        json!({"content": [{"type": "text", "text": text}]}),
                    );
                } else {
                    peer.respond_error(
                        request.id,
                        JsonRpcError::new(ErrorCode::ToolNotFound, format!("unknown tool: {}", name)),
                    );
                }
            }
            other => peer.respond_error(
                request.id,
                JsonRpcError::new(ErrorCode::MethodNotFound, format!("method not found: {}", other)),
            ),
        }
    }
}
