//! Error types for MCP operations.
//!
//! Every failure that leaves this crate is one of the [`McpError`] variants.
//! Callers match on the variant rather than on message text. Wire-level
//! errors returned by a server are folded into the same set through
//! [`McpError::from_wire`].

use std::time::Duration;

use thiserror::Error;

use crate::protocol::{ErrorCode, JsonRpcError};

/// Result type for MCP operations.
pub type Result<T> = std::result::Result<T, McpError>;

/// Error type for MCP operations.
#[derive(Debug, Clone, Error)]
pub enum McpError {
    /// The connection could not be established, was lost, or is not usable.
    #[error("connection error: {0}")]
    Connection(String),

    /// A server or transport configuration is invalid. Never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The peer violated the JSON-RPC / MCP protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// No reply arrived before the timeout elapsed.
    #[error("timed out after {}ms", .timeout.as_millis())]
    Timeout {
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// The server does not know the requested tool.
    #[error("tool '{name}' not found on server '{server_id}'")]
    ToolNotFound { name: String, server_id: String },

    /// The server does not know the requested resource.
    #[error("resource '{uri}' not found on server '{server_id}'")]
    ResourceNotFound { uri: String, server_id: String },

    /// The server does not know the requested prompt.
    #[error("prompt '{name}' not found on server '{server_id}'")]
    PromptNotFound { name: String, server_id: String },

    /// Server returned an error response that has no more specific kind.
    #[error("server error {code}: {message}")]
    Server {
        /// Error code from the server.
        code: i64,
        /// Error message from the server.
        message: String,
        /// Optional additional data.
        data: Option<serde_json::Value>,
    },

    /// Anything else. Keeps the original message for diagnostics.
    #[error("unknown error: {message}")]
    Unknown { message: String },
}

/// What a request was about, used to attach names to wire errors.
#[derive(Debug, Clone, Default)]
pub struct WireContext {
    /// Server the request was sent to.
    pub server_id: String,
    /// Tool or prompt name, or resource URI, when the request targeted one.
    pub target: Option<String>,
}

impl WireContext {
    /// Create a context for a request to `server_id`.
    pub fn new(server_id: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            target: None,
        }
    }

    /// Attach the requested tool/prompt name or resource URI.
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    fn target_or(&self, fallback: &str) -> String {
        self.target.clone().unwrap_or_else(|| fallback.to_string())
    }
}

impl McpError {
    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a configuration error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a timeout error.
    pub fn timeout(timeout: Duration) -> Self {
        Self::Timeout { timeout }
    }

    /// Create a server error from an error response.
    pub fn server_error(
        code: i64,
        message: impl Into<String>,
        data: Option<serde_json::Value>,
    ) -> Self {
        Self::Server {
            code,
            message: message.into(),
            data,
        }
    }

    /// Fallback for failures that fit no other kind.
    pub fn unknown(msg: impl std::fmt::Display) -> Self {
        Self::Unknown {
            message: msg.to_string(),
        }
    }

    /// Map a wire-level error object into a client-side kind.
    ///
    /// The not-found codes become the typed not-found variants carrying the
    /// requested name and the server id. Malformed-message codes become
    /// [`McpError::Protocol`]. Everything else is kept as
    /// [`McpError::Server`] with its code and data intact.
    pub fn from_wire(error: JsonRpcError, ctx: &WireContext) -> Self {
        match ErrorCode::from_code(error.code) {
            Some(ErrorCode::ToolNotFound) => Self::ToolNotFound {
                name: ctx.target_or(&error.message),
                server_id: ctx.server_id.clone(),
            },
            Some(ErrorCode::ResourceNotFound) => Self::ResourceNotFound {
                uri: ctx.target_or(&error.message),
                server_id: ctx.server_id.clone(),
            },
            Some(ErrorCode::PromptNotFound) => Self::PromptNotFound {
                name: ctx.target_or(&error.message),
                server_id: ctx.server_id.clone(),
            },
            Some(ErrorCode::ParseError | ErrorCode::InvalidRequest) => Self::Protocol(format!(
                "server rejected message ({}): {}",
                error.code, error.message
            )),
            _ => Self::Server {
                code: error.code,
                message: error.message,
                data: error.data,
            },
        }
    }

    /// Whether the error needs caller correction rather than a retry.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Whether the error is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<std::io::Error> for McpError {
    fn from(err: std::io::Error) -> Self {
        Self::Connection(format!("I/O error: {}", err))
    }
}

impl From<serde_json::Error> for McpError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(format!("JSON error: {}", err))
    }
}

impl From<reqwest::Error> for McpError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Connection(format!("HTTP request timed out: {}", err))
        } else if err.is_builder() {
            Self::Configuration(format!("invalid HTTP request: {}", err))
        } else {
            Self::Connection(format!("HTTP request failed: {}", err))
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for McpError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::Url(e) => Self::Configuration(format!("invalid WebSocket URL: {}", e)),
            WsError::ConnectionClosed | WsError::AlreadyClosed => {
                Self::Connection("WebSocket closed".to_string())
            }
            other => Self::Connection(format!("WebSocket error: {}", other)),
        }
    }
}

impl From<url::ParseError> for McpError {
    fn from(err: url::ParseError) -> Self {
        Self::Configuration(format!("invalid URL: {}", err))
    }
}
