//! Multi-server MCP (Model Context Protocol) connection core.
//!
//! This crate keeps connections to any number of MCP servers, each reached
//! over its own transport, and exposes them through one
//! [`ConnectionManager`]. It correlates JSON-RPC requests and responses,
//! enforces per-request timeouts, and reconnects with exponential backoff
//! when a server goes away.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  ConnectionManager                                          │
//! │  - One record per server id, status + reconnect policy      │
//! │  - Handshake (initialize / notifications/initialized)       │
//! │  - Broadcasts ConnectionEvents                              │
//! └─────────────────────────────────────────────────────────────┘
//!                           │ one per live connection
//!                           ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  ProtocolHandler                                            │
//! │  - Request ids, pending table, timeouts                     │
//! │  - Notifications and server requests                        │
//! └─────────────────────────────────────────────────────────────┘
//!                           │
//!                           ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Transport (built by a TransportFactory)                    │
//! │  - stdio: subprocess, newline-delimited JSON                │
//! │  - http: one POST per message                               │
//! │  - websocket: persistent socket, one frame per message      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use tether_mcp::{ConnectionManager, ManagerConfig, ServerConfig};
//! use serde_json::json;
//!
//! let manager = ConnectionManager::new(ManagerConfig::default());
//! manager.add_connection(ServerConfig::websocket("search", "ws://localhost:9000/mcp"))?;
//! manager.connect("search").await?;
//!
//! let result = manager
//!     .call_tool("search", "query", Some(json!({"q": "rust"})))
//!     .await?;
//! println!("{:?}", result.text());
//! ```
//!
//! Configuration files are not read here; callers build [`ServerConfig`]
//! values however they like (all config types implement `serde`).

pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod manager;
pub mod protocol;
pub mod transport;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::{
    HttpTransportConfig, ManagerConfig, ServerConfig, StdioTransportConfig, TransportConfig,
    TransportKind, WebSocketTransportConfig,
};
pub use connection::{ConnectionEvent, ConnectionSnapshot, ConnectionStatus};
pub use error::{McpError, Result, WireContext};
pub use handler::{HandlerConfig, ProtocolEvent, ProtocolHandler, RequestOptions};
pub use manager::{ConnectionManager, backoff_delay};
pub use protocol::{
    CallToolResult, ClientInfo, ErrorCode, GetPromptResult, InitializeResult, JsonRpcError,
    JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, PromptInfo,
    ReadResourceResult, RequestId, ResourceInfo, ServerCapabilities, ServerInfo, ToolContent,
    ToolInfo,
};
pub use transport::{
    DefaultTransportFactory, HttpTransport, StdioTransport, Transport, TransportEvent,
    TransportFactory, WebSocketTransport,
};
