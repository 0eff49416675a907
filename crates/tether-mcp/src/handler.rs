//! JSON-RPC request/response correlation over one transport.
//!
//! The handler assigns ids, keeps the table of in-flight requests, enforces
//! per-request timeouts, and turns everything else the server sends into
//! [`ProtocolEvent`]s.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::{DEFAULT_EVENT_CAPACITY, DEFAULT_TIMEOUT, duration_millis};
use crate::error::{McpError, Result, WireContext};
use crate::protocol::{
    ErrorCode, JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, RequestId, methods,
};
use crate::transport::{Transport, TransportEvent};

/// Handler settings.
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    /// Timeout for requests that do not set their own.
    pub request_timeout: Duration,
    /// Buffer size of the event channel.
    pub event_capacity: usize,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_TIMEOUT,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl HandlerConfig {
    /// Set the default request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Per-request overrides.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestOptions {
    /// Overrides [`HandlerConfig::request_timeout`].
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    /// Options with an explicit timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

/// Inbound traffic that is not a reply to one of our requests.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolEvent {
    /// The server sent a notification.
    Notification {
        method: String,
        params: Option<Value>,
    },
    /// The server sent something that is not valid JSON-RPC.
    ProtocolError(String),
    /// The transport reported a failure.
    TransportError(String),
    /// The transport closed.
    TransportClosed,
}

struct PendingRequest {
    method: String,
    started: Instant,
    context: WireContext,
    sender: oneshot::Sender<Result<Value>>,
}

/// Removes a request's table entry when its caller stops waiting, however
/// that happens. A no-op once dispatch or the timeout path removed it.
struct PendingGuard<'a> {
    pending: &'a Mutex<HashMap<RequestId, PendingRequest>>,
    id: RequestId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}

struct HandlerInner {
    server_id: String,
    transport: Arc<dyn Transport>,
    config: HandlerConfig,
    pending: Mutex<HashMap<RequestId, PendingRequest>>,
    next_id: AtomicI64,
    events: broadcast::Sender<ProtocolEvent>,
    disposed: AtomicBool,
}

/// Correlates requests and responses on one transport.
pub struct ProtocolHandler {
    inner: Arc<HandlerInner>,
    dispatch: Mutex<Option<JoinHandle<()>>>,
}

impl ProtocolHandler {
    /// Attach to `transport` and start dispatching its inbound events.
    ///
    /// Takes the transport's event stream, so only one handler can serve a
    /// given transport. Must be called inside a tokio runtime.
    pub fn new(
        server_id: impl Into<String>,
        transport: Arc<dyn Transport>,
        config: HandlerConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let inner = Arc::new(HandlerInner {
            server_id: server_id.into(),
            transport,
            config,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
            events,
            disposed: AtomicBool::new(false),
        });

        let dispatch = match inner.transport.take_events() {
            Some(rx) => Some(tokio::spawn(dispatch(Arc::clone(&inner), rx))),
            None => {
                tracing::warn!(
                    server = %inner.server_id,
                    "transport events already taken, replies will never arrive"
                );
                None
            }
        };

        Self {
            inner,
            dispatch: Mutex::new(dispatch),
        }
    }

    /// Server this handler talks to.
    pub fn server_id(&self) -> &str {
        &self.inner.server_id
    }

    /// The underlying transport.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    /// Subscribe to notifications and transport events.
    pub fn subscribe(&self) -> broadcast::Receiver<ProtocolEvent> {
        self.inner.events.subscribe()
    }

    /// Number of requests still waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Whether [`ProtocolHandler::dispose`] has run.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Send a request and wait for its result.
    ///
    /// The timeout covers the send as well as the wait. Wire errors are
    /// mapped through [`McpError::from_wire`]; a request that outlives its
    /// timeout fails with [`McpError::Timeout`] and its late reply, if any,
    /// is dropped.
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
        options: RequestOptions,
    ) -> Result<Value> {
        if self.is_disposed() {
            return Err(McpError::connection("handler disposed"));
        }

        let id = RequestId::Number(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let timeout = options.timeout.unwrap_or(self.inner.config.request_timeout);
        let context = wire_context(&self.inner.server_id, method, params.as_ref());
        let json = serde_json::to_string(&JsonRpcRequest::new(id.clone(), method, params))?;

        let (sender, mut receiver) = oneshot::channel();
        self.inner.pending.lock().insert(
            id.clone(),
            PendingRequest {
                method: method.to_string(),
                started: Instant::now(),
                context,
                sender,
            },
        );

        let _entry = PendingGuard {
            pending: &self.inner.pending,
            id: id.clone(),
        };

        tracing::debug!(server = %self.inner.server_id, method, request_id = %id, "sending request");

        let exchange = async {
            if let Err(e) = self.inner.transport.send(json).await {
                self.inner.pending.lock().remove(&id);
                return Err(e);
            }
            match (&mut receiver).await {
                Ok(result) => result,
                Err(_) => Err(McpError::connection("request abandoned")),
            }
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => {
                if self.inner.pending.lock().remove(&id).is_none() {
                    // Completed between the deadline and this check.
                    if let Ok(result) = receiver.try_recv() {
                        return result;
                    }
                }
                tracing::warn!(
                    server = %self.inner.server_id,
                    method,
                    request_id = %id,
                    timeout_ms = duration_millis(timeout),
                    "request timed out"
                );
                Err(McpError::timeout(timeout))
            }
        }
    }

    /// Send a notification. No reply is expected.
    pub async fn send_notification(&self, method: &str, params: Option<Value>) -> Result<()> {
        if self.is_disposed() {
            return Err(McpError::connection("handler disposed"));
        }
        let json = serde_json::to_string(&JsonRpcNotification::new(method, params))?;
        tracing::debug!(server = %self.inner.server_id, method, "sending notification");
        self.inner.transport.send(json).await
    }

    /// Fail every outstanding request and stop dispatching. Idempotent.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.fail_all("handler disposed");
        if let Some(task) = self.dispatch.lock().take() {
            task.abort();
        }
        tracing::debug!(server = %self.inner.server_id, "protocol handler disposed");
    }
}

impl Drop for ProtocolHandler {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// The name the server will report back in a not-found error.
fn wire_context(server_id: &str, method: &str, params: Option<&Value>) -> WireContext {
    let ctx = WireContext::new(server_id);
    let key = match method {
        methods::TOOLS_CALL | methods::PROMPTS_GET => "name",
        methods::RESOURCES_READ => "uri",
        _ => return ctx,
    };
    match params.and_then(|p| p.get(key)).and_then(Value::as_str) {
        Some(target) => ctx.with_target(target),
        None => ctx,
    }
}

impl HandlerInner {
    fn fail_all(&self, reason: &str) {
        let drained: Vec<_> = self.pending.lock().drain().collect();
        if !drained.is_empty() {
            tracing::debug!(
                server = %self.server_id,
                count = drained.len(),
                reason,
                "failing outstanding requests"
            );
        }
        for (_, pending) in drained {
            let _ = pending.sender.send(Err(McpError::connection(reason)));
        }
    }

    fn publish(&self, event: ProtocolEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn handle_message(&self, text: &str) {
        let message = match JsonRpcMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(server = %self.server_id, error = %e, "dropping malformed message");
                self.publish(ProtocolEvent::ProtocolError(e.to_string()));
                return;
            }
        };

        match message {
            JsonRpcMessage::Response(response) => self.complete(response),
            JsonRpcMessage::Notification(notification) => {
                tracing::debug!(
                    server = %self.server_id,
                    method = %notification.method,
                    "received notification"
                );
                self.publish(ProtocolEvent::Notification {
                    method: notification.method,
                    params: notification.params,
                });
            }
            JsonRpcMessage::Request(request) => self.answer(request),
        }
    }

    fn complete(&self, response: JsonRpcResponse) {
        let Some(pending) = self.pending.lock().remove(&response.id) else {
            tracing::debug!(
                server = %self.server_id,
                request_id = %response.id,
                "dropping reply with no pending request"
            );
            return;
        };

        tracing::debug!(
            server = %self.server_id,
            method = %pending.method,
            request_id = %response.id,
            elapsed_ms = duration_millis(pending.started.elapsed()),
            error = response.is_error(),
            "received response"
        );

        let result = response
            .into_result()
            .map_err(|e| McpError::from_wire(e, &pending.context));
        let _ = pending.sender.send(result);
    }

    /// Reply to a request initiated by the server.
    fn answer(&self, request: JsonRpcRequest) {
        let response = if request.method == methods::PING {
            JsonRpcResponse::success(request.id, json!({}))
        } else {
            tracing::debug!(
                server = %self.server_id,
                method = %request.method,
                "rejecting unsupported server request"
            );
            JsonRpcResponse::failure(
                request.id,
                JsonRpcError::new(
                    ErrorCode::MethodNotFound,
                    format!("method not found: {}", request.method),
                ),
            )
        };

        let json = match serde_json::to_string(&response) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(server = %self.server_id, error = %e, "failed to encode reply");
                return;
            }
        };
        let transport = Arc::clone(&self.transport);
        let server_id = self.server_id.clone();
        tokio::spawn(async move {
            if let Err(e) = transport.send(json).await {
                tracing::debug!(server = %server_id, error = %e, "failed to answer server request");
            }
        });
    }
}

async fn dispatch(inner: Arc<HandlerInner>, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Message(text) => inner.handle_message(&text),
            TransportEvent::Error(error) => {
                tracing::warn!(server = %inner.server_id, error = %error, "transport error");
                inner.publish(ProtocolEvent::TransportError(error));
            }
            TransportEvent::Closed => {
                inner.fail_all("connection closed");
                inner.publish(ProtocolEvent::TransportClosed);
                return;
            }
        }
    }
    inner.fail_all("connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportKind;
    use crate::testing::{RemotePeer, channel_pair};

    async fn connected_handler() -> (ProtocolHandler, RemotePeer) {
        let (transport, peer) = channel_pair(TransportKind::WebSocket);
        transport.connect().await.unwrap();
        let handler = ProtocolHandler::new("srv", Arc::new(transport), HandlerConfig::default());
        (handler, peer)
    }

    async fn next_request(peer: &mut RemotePeer) -> JsonRpcRequest {
        match peer.recv().await {
            Some(JsonRpcMessage::Request(r)) => r,
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_request_resolves_with_result() {
        let (handler, mut peer) = connected_handler().await;
        let call = handler.send_request(methods::TOOLS_LIST, None, RequestOptions::default());
        let serve = async {
            let req = next_request(&mut peer).await;
            assert_eq!(req.method, methods::TOOLS_LIST);
            assert_eq!(req.id, RequestId::Number(1));
            peer.respond(req.id, json!({"tools": []}));
        };
        let (result, ()) = tokio::join!(call, serve);
        assert_eq!(result.unwrap(), json!({"tools": []}));
        assert_eq!(handler.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_ids_increase_per_handler() {
        let (handler, mut peer) = connected_handler().await;
        let serve = async {
            for expected in 1..=3 {
                let req = next_request(&mut peer).await;
                assert_eq!(req.id, RequestId::Number(expected));
                peer.respond(req.id, json!(expected));
            }
        };
        let calls = async {
            for expected in 1..=3 {
                let v = handler
                    .send_request("x", None, RequestOptions::default())
                    .await
                    .unwrap();
                assert_eq!(v, json!(expected));
            }
        };
        tokio::join!(calls, serve);
    }

    #[tokio::test]
    async fn test_replies_in_reverse_order_resolve_correct_requests() {
        let (handler, mut peer) = connected_handler().await;
        let a = handler.send_request("a", None, RequestOptions::default());
        let b = handler.send_request("b", None, RequestOptions::default());
        let c = handler.send_request("c", None, RequestOptions::default());
        let serve = async {
            let mut reqs = Vec::new();
            for _ in 0..3 {
                reqs.push(next_request(&mut peer).await);
            }
            for req in reqs.into_iter().rev() {
                peer.respond(req.id, json!(req.method));
            }
        };
        let (ra, rb, rc, ()) = tokio::join!(a, b, c, serve);
        assert_eq!(ra.unwrap(), json!("a"));
        assert_eq!(rb.unwrap(), json!("b"));
        assert_eq!(rc.unwrap(), json!("c"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fails_alone_and_late_reply_is_dropped() {
        let (handler, mut peer) = connected_handler().await;

        let slow = handler
            .send_request("slow", None, RequestOptions::with_timeout(Duration::from_millis(50)))
            .await;
        assert!(matches!(slow, Err(McpError::Timeout { timeout }) if timeout == Duration::from_millis(50)));
        assert_eq!(handler.pending_count(), 0);

        let slow_req = next_request(&mut peer).await;
        peer.respond(slow_req.id, json!("late"));

        let call = handler.send_request("fast", None, RequestOptions::default());
        let serve = async {
            let req = next_request(&mut peer).await;
            assert_eq!(req.method, "fast");
            peer.respond(req.id, json!("ok"));
        };
        let (fast, ()) = tokio::join!(call, serve);
        assert_eq!(fast.unwrap(), json!("ok"));
    }

    #[tokio::test]
    async fn test_wire_error_maps_to_tool_not_found() {
        let (handler, mut peer) = connected_handler().await;
        let call = handler.send_request(
            methods::TOOLS_CALL,
            Some(json!({"name": "nonexistent", "arguments": {}})),
            RequestOptions::default(),
        );
        let serve = async {
            let req = next_request(&mut peer).await;
            peer.respond_error(req.id, JsonRpcError::new(ErrorCode::ToolNotFound, "no such tool"));
        };
        let (result, ()) = tokio::join!(call, serve);
        match result {
            Err(McpError::ToolNotFound { name, server_id }) => {
                assert_eq!(name, "nonexistent");
                assert_eq!(server_id, "srv");
            }
            other => panic!("expected ToolNotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_abandoned_requests_leave_no_pending_entries() {
        let (handler, mut peer) = connected_handler().await;
        for _ in 0..100 {
            let call = handler.send_request("x", None, RequestOptions::default());
            let _ = tokio::time::timeout(Duration::from_millis(1), call).await;
        }
        // The requests really went out; nobody answered them.
        assert_eq!(next_request(&mut peer).await.method, "x");
        assert_eq!(handler.pending_count(), 0);

        // A reply for an abandoned id is dropped without disturbing anything.
        peer.respond(RequestId::Number(1), json!({}));
        let call = handler.send_request("tools/list", None, RequestOptions::default());
        let serve = async {
            loop {
                let req = next_request(&mut peer).await;
                if req.method == "tools/list" {
                    peer.respond(req.id, json!({"tools": []}));
                    break;
                }
            }
        };
        let (result, ()) = tokio::join!(call, serve);
        assert_eq!(result.unwrap(), json!({"tools": []}));
        assert_eq!(handler.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_send_failure_removes_pending() {
        let (transport, _peer) = channel_pair(TransportKind::Stdio);
        let handler = ProtocolHandler::new("srv", Arc::new(transport), HandlerConfig::default());
        let err = handler
            .send_request("x", None, RequestOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Connection(_)));
        assert_eq!(handler.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_notifications_and_garbage_become_events() {
        let (handler, peer) = connected_handler().await;
        let mut events = handler.subscribe();

        peer.notify("notifications/tools/list_changed", None);
        peer.send_raw("this is not json");
        peer.send_raw(r#"{"jsonrpc":"2.0","id":99,"result":{}}"#);
        peer.notify("notifications/progress", Some(json!({"progress": 1})));

        assert_eq!(
            events.recv().await.unwrap(),
            ProtocolEvent::Notification {
                method: "notifications/tools/list_changed".into(),
                params: None
            }
        );
        assert!(matches!(events.recv().await.unwrap(), ProtocolEvent::ProtocolError(_)));
        assert_eq!(
            events.recv().await.unwrap(),
            ProtocolEvent::Notification {
                method: "notifications/progress".into(),
                params: Some(json!({"progress": 1}))
            }
        );
    }

    #[tokio::test]
    async fn test_server_ping_is_answered() {
        let (_handler, mut peer) = connected_handler().await;
        peer.send_raw(r#"{"jsonrpc":"2.0","id":"srv-1","method":"ping"}"#);
        peer.send_raw(r#"{"jsonrpc":"2.0","id":7,"method":"sampling/createMessage"}"#);

        let mut replies = Vec::new();
        for _ in 0..2 {
            match peer.recv().await {
                Some(JsonRpcMessage::Response(r)) => replies.push(r),
                other => panic!("expected response, got {other:?}"),
            }
        }
        replies.sort_by_key(|r| r.is_error());
        assert_eq!(replies[0].id, RequestId::from("srv-1"));
        assert_eq!(replies[0].result, Some(json!({})));
        assert_eq!(replies[1].id, RequestId::Number(7));
        assert_eq!(
            replies[1].error.as_ref().map(|e| e.code),
            Some(JsonRpcError::METHOD_NOT_FOUND)
        );
    }

    #[tokio::test]
    async fn test_close_fails_outstanding_requests() {
        let (handler, mut peer) = connected_handler().await;
        let mut events = handler.subscribe();
        let call = handler.send_request("x", None, RequestOptions::default());
        let close = async {
            next_request(&mut peer).await;
            peer.close();
        };
        let (result, ()) = tokio::join!(call, close);
        assert!(matches!(result, Err(McpError::Connection(_))));
        assert_eq!(events.recv().await.unwrap(), ProtocolEvent::TransportClosed);
    }

    #[tokio::test]
    async fn test_transport_error_is_published() {
        let (handler, peer) = connected_handler().await;
        let mut events = handler.subscribe();
        peer.fail("broken pipe");
        assert_eq!(
            events.recv().await.unwrap(),
            ProtocolEvent::TransportError("broken pipe".into())
        );
    }

    #[tokio::test]
    async fn test_dispose_fails_pending_and_rejects_new_requests() {
        let (handler, mut peer) = connected_handler().await;
        let call = handler.send_request("x", None, RequestOptions::default());
        let dispose = async {
            next_request(&mut peer).await;
            handler.dispose();
            handler.dispose();
        };
        let (result, ()) = tokio::join!(call, dispose);
        assert!(matches!(result, Err(McpError::Connection(ref m)) if m.contains("disposed")));
        assert!(handler.is_disposed());
        assert!(matches!(
            handler.send_request("y", None, RequestOptions::default()).await,
            Err(McpError::Connection(_))
        ));
        assert!(handler.send_notification("n", None).await.is_err());
    }

    #[tokio::test]
    async fn test_notification_has_no_id() {
        let (handler, mut peer) = connected_handler().await;
        handler
            .send_notification(methods::INITIALIZED, None)
            .await
            .unwrap();
        match peer.recv().await {
            Some(JsonRpcMessage::Notification(n)) => assert_eq!(n.method, methods::INITIALIZED),
            other => panic!("expected notification, got {other:?}"),
        }
    }

    #[test]
    fn test_wire_context_targets() {
        let ctx = wire_context("s", methods::RESOURCES_READ, Some(&json!({"uri": "file:///x"})));
        assert_eq!(ctx.target.as_deref(), Some("file:///x"));
        let ctx = wire_context("s", methods::PROMPTS_GET, Some(&json!({"name": "p"})));
        assert_eq!(ctx.target.as_deref(), Some("p"));
        let ctx = wire_context("s", methods::TOOLS_LIST, None);
        assert_eq!(ctx.target, None);
    }
}
