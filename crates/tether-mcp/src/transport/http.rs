//! One-shot HTTP transport.
//!
//! Every outbound message is a POST. A non-empty 2xx body is the single
//! inbound message for that send, as is a JSON-RPC response carried on an
//! error status. The server has no way to push messages,
//! so notifications from HTTP servers are never observed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tokio::sync::mpsc;
use url::Url;

use super::{EventSink, EventSlot, Transport, TransportEvent};
use crate::config::{HttpTransportConfig, TransportKind};
use crate::error::{McpError, Result};
use crate::protocol::JsonRpcMessage;

/// Pause between retries of a failed POST.
const RETRY_DELAY: Duration = Duration::from_millis(100);

/// Parse and check an HTTP endpoint URL.
pub(crate) fn parse_http_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw)?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(McpError::configuration(format!(
            "unsupported scheme '{}' for HTTP transport (expected http or https)",
            other
        ))),
    }
}

/// POSTs each message to a fixed endpoint.
pub struct HttpTransport {
    server_id: String,
    config: HttpTransportConfig,
    sink: EventSink,
    events: EventSlot,
    connected: AtomicBool,
    endpoint: parking_lot::Mutex<Option<(reqwest::Client, Url)>>,
}

impl HttpTransport {
    /// Create an unconnected transport.
    pub fn new(server_id: impl Into<String>, config: HttpTransportConfig) -> Self {
        let (sink, rx) = EventSink::channel();
        Self {
            server_id: server_id.into(),
            config,
            sink,
            events: EventSlot::new(rx),
            connected: AtomicBool::new(false),
            endpoint: parking_lot::Mutex::new(None),
        }
    }

    fn endpoint(&self) -> Result<(reqwest::Client, Url)> {
        match self.endpoint.lock().as_ref() {
            Some((client, url)) if self.connected.load(Ordering::SeqCst) => {
                Ok((client.clone(), url.clone()))
            }
            _ => Err(McpError::connection("HTTP transport is not connected")),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    async fn connect(&self) -> Result<()> {
        let url = parse_http_url(&self.config.url)?;
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(5)
            .tcp_keepalive(Duration::from_secs(30))
            .build()
            .map_err(|e| McpError::configuration(format!("failed to build HTTP client: {}", e)))?;

        tracing::debug!(server = %self.server_id, url = %url, "created HTTP transport");

        *self.endpoint.lock() = Some((client, url));
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, message: String) -> Result<()> {
        let (client, url) = self.endpoint()?;

        tracing::trace!(server = %self.server_id, json = %message, "sending MCP HTTP request");

        let mut retries = self.config.retries;
        loop {
            let mut req = client
                .post(url.clone())
                .header(CONTENT_TYPE, "application/json")
                .body(message.clone());
            for (key, value) in &self.config.headers {
                req = req.header(key.as_str(), value.as_str());
            }

            match req.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.map_err(|e| {
                        McpError::connection(format!("failed to read response body: {}", e))
                    })?;
                    if !status.is_success() {
                        // A JSON-RPC reply still answers the request, whatever the status.
                        if let Ok(JsonRpcMessage::Response(_)) = JsonRpcMessage::parse(body.trim()) {
                            tracing::debug!(server = %self.server_id, %status, "JSON-RPC reply on HTTP error status");
                            self.sink.message(body.trim().to_string());
                            return Ok(());
                        }
                        return Err(McpError::connection(format!(
                            "HTTP error {}: {}",
                            status, body
                        )));
                    }

                    let body = body.trim();
                    if !body.is_empty() {
                        tracing::trace!(server = %self.server_id, json = %body, "received MCP HTTP response");
                        self.sink.message(body.to_string());
                    }
                    return Ok(());
                }
                Err(e) if e.is_builder() || retries == 0 => return Err(e.into()),
                Err(e) => {
                    retries -= 1;
                    tracing::warn!(
                        server = %self.server_id,
                        error = %e,
                        retries_remaining = retries,
                        "HTTP request failed, retrying"
                    );
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.endpoint.lock().take();
        self.sink.closed();
        Ok(())
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events.take()
    }
}
