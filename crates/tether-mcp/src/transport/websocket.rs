//! Persistent WebSocket transport.

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use super::{EventSink, EventSlot, Transport, TransportEvent};
use crate::config::{TransportKind, WebSocketTransportConfig};
use crate::error::{McpError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;

/// Parse and check a WebSocket endpoint URL.
pub(crate) fn parse_ws_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw)?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(McpError::configuration(format!(
            "unsupported scheme '{}' for WebSocket transport (expected ws or wss)",
            other
        ))),
    }
}

/// Keeps one socket open and exchanges one JSON message per text frame.
pub struct WebSocketTransport {
    server_id: String,
    config: WebSocketTransportConfig,
    sink: EventSink,
    events: EventSlot,
    connected: Arc<AtomicBool>,
    started: AtomicBool,
    writer: Mutex<Option<WsWriter>>,
    reader: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl WebSocketTransport {
    /// Create an unconnected transport.
    pub fn new(server_id: impl Into<String>, config: WebSocketTransportConfig) -> Self {
        let (sink, rx) = EventSink::channel();
        Self {
            server_id: server_id.into(),
            config,
            sink,
            events: EventSlot::new(rx),
            connected: Arc::new(AtomicBool::new(false)),
            started: AtomicBool::new(false),
            writer: Mutex::new(None),
            reader: parking_lot::Mutex::new(None),
        }
    }

    fn spawn_reader(&self, mut stream: futures::stream::SplitStream<WsStream>) -> JoinHandle<()> {
        let sink = self.sink.clone();
        let connected = Arc::clone(&self.connected);
        let server_id = self.server_id.clone();
        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        tracing::trace!(server = %server_id, json = %text.as_str(), "received MCP frame");
                        sink.message(text.as_str().to_string());
                    }
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => sink.message(text),
                        Err(_) => {
                            tracing::warn!(server = %server_id, len = bytes.len(), "dropping non UTF-8 binary frame");
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        tracing::debug!(server = %server_id, frame = ?frame, "server closed WebSocket");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(server = %server_id, error = %e, "WebSocket read failed");
                        sink.error(format!("WebSocket error: {}", e));
                        break;
                    }
                }
            }
            connected.store(false, Ordering::SeqCst);
            sink.closed();
        })
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }

    async fn connect(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(McpError::connection("WebSocket transport already started"));
        }

        let url = parse_ws_url(&self.config.url)?;
        let mut request = url.as_str().into_client_request()?;
        for (key, value) in &self.config.headers {
            let name = HeaderName::from_str(key)
                .map_err(|e| McpError::configuration(format!("invalid header name '{}': {}", key, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| McpError::configuration(format!("invalid header value for '{}': {}", key, e)))?;
            request.headers_mut().insert(name, value);
        }

        let (socket, _response) = connect_async(request).await?;
        let (writer, stream) = socket.split();

        *self.writer.lock().await = Some(writer);
        *self.reader.lock() = Some(self.spawn_reader(stream));
        self.connected.store(true, Ordering::SeqCst);

        tracing::debug!(server = %self.server_id, url = %url, "WebSocket connected");
        Ok(())
    }

    async fn send(&self, message: String) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let writer = match guard.as_mut() {
            Some(writer) if self.connected.load(Ordering::SeqCst) => writer,
            _ => return Err(McpError::connection("WebSocket transport is not connected")),
        };

        tracing::trace!(server = %self.server_id, json = %message, "sending MCP frame");
        if let Err(e) = writer.send(Message::Text(message.into())).await {
            self.connected.store(false, Ordering::SeqCst);
            self.sink.error(format!("WebSocket send failed: {}", e));
            return Err(e.into());
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.close().await {
                tracing::debug!(server = %self.server_id, error = %e, "WebSocket close handshake failed");
            }
        }
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        self.sink.closed();
        Ok(())
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events.take()
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.get_mut().take() {
            reader.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::time::timeout;
    use tokio_tungstenite::accept_async;

    fn config(url: String) -> WebSocketTransportConfig {
        WebSocketTransportConfig {
            url,
            headers: Default::default(),
        }
    }

    /// Accept one client, echo `echo_count` frames back, then close.
    async fn echo_server(echo_count: usize) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            for _ in 0..echo_count {
                match ws.next().await {
                    Some(Ok(Message::Text(text))) => ws.send(Message::Text(text)).await.unwrap(),
                    _ => return,
                }
            }
            let _ = ws.close(None).await;
        });
        format!("ws://{}", addr)
    }

    #[test]
    fn test_parse_ws_url() {
        assert!(parse_ws_url("wss://mcp.example.com/socket").is_ok());
        assert!(parse_ws_url("http://localhost").unwrap_err().is_fatal());
    }

    #[tokio::test]
    async fn test_frames_round_trip_then_server_close() {
        let url = echo_server(1).await;
        let transport = WebSocketTransport::new("ws", config(url));
        let mut events = transport.take_events().unwrap();
        transport.connect().await.unwrap();
        assert!(transport.is_connected());

        transport.send(r#"{"jsonrpc":"2.0","method":"ping","id":1}"#.into()).await.unwrap();
        let echoed = timeout(Duration::from_secs(5), events.recv()).await.unwrap();
        assert_eq!(
            echoed,
            Some(TransportEvent::Message(r#"{"jsonrpc":"2.0","method":"ping","id":1}"#.into()))
        );

        let closed = timeout(Duration::from_secs(5), events.recv()).await.unwrap();
        assert_eq!(closed, Some(TransportEvent::Closed));
        assert!(!transport.is_connected());
        assert!(transport.send("{}".into()).await.is_err());
    }

    #[tokio::test]
    async fn test_connect_refused_is_connection_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = WebSocketTransport::new("ws", config(format!("ws://{}", addr)));
        assert!(matches!(
            transport.connect().await,
            Err(McpError::Connection(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_header_is_configuration_error() {
        let mut cfg = config("ws://127.0.0.1:9".into());
        cfg.headers.insert("bad header".into(), "v".into());
        let transport = WebSocketTransport::new("ws", cfg);
        assert!(transport.connect().await.unwrap_err().is_fatal());
    }

    #[tokio::test]
    async fn test_local_close_emits_single_closed() {
        let url = echo_server(10).await;
        let transport = WebSocketTransport::new("ws", config(url));
        let mut events = transport.take_events().unwrap();
        transport.connect().await.unwrap();
        transport.close().await.unwrap();
        transport.close().await.unwrap();

        assert_eq!(events.recv().await, Some(TransportEvent::Closed));
        assert!(events.try_recv().is_err());
    }
}
