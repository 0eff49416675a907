//! Maps a [`TransportConfig`] to a concrete transport.

use std::sync::Arc;

use super::http::parse_http_url;
use super::websocket::parse_ws_url;
use super::{HttpTransport, StdioTransport, Transport, WebSocketTransport};
use crate::config::TransportConfig;
use crate::error::{McpError, Result};

/// Builds transports for the connection manager.
///
/// Construction performs no I/O; obvious configuration mistakes are reported
/// as [`McpError::Configuration`] so the manager never retries them.
pub trait TransportFactory: Send + Sync {
    /// Build an unconnected transport for `server_id`.
    fn create(&self, server_id: &str, config: &TransportConfig) -> Result<Arc<dyn Transport>>;
}

/// Factory for the three built-in transports.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTransportFactory;

impl TransportFactory for DefaultTransportFactory {
    fn create(&self, server_id: &str, config: &TransportConfig) -> Result<Arc<dyn Transport>> {
        match config {
            TransportConfig::Stdio(c) => {
                if c.command.trim().is_empty() {
                    return Err(McpError::configuration(format!(
                        "server '{}' has an empty command",
                        server_id
                    )));
                }
                Ok(Arc::new(StdioTransport::new(server_id, c.clone())))
            }
            TransportConfig::Http(c) => {
                parse_http_url(&c.url)?;
                Ok(Arc::new(HttpTransport::new(server_id, c.clone())))
            }
            TransportConfig::WebSocket(c) => {
                parse_ws_url(&c.url)?;
                Ok(Arc::new(WebSocketTransport::new(server_id, c.clone())))
            }
        }
    }
}
