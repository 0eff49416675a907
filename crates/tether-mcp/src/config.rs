//! Server and manager configuration.
//!
//! [`ServerConfig`] values are produced by whatever loads configuration
//! (a TOML file in the `tether` CLI) and handed to
//! [`ConnectionManager::add_connection`](crate::ConnectionManager::add_connection).
//! This crate never reads configuration files itself.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{McpError, Result};
use crate::protocol::ClientInfo;

/// Default per-server timeout (transport connect, handshake, requests).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of reconnect attempts before giving up.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Default delay before the first reconnect attempt.
pub const DEFAULT_RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default number of retries for HTTP sends that fail before a reply.
pub const DEFAULT_HTTP_RETRIES: u32 = 3;

/// Default buffer size for event broadcast channels.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

fn default_enabled() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT.as_millis() as u64
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub(crate) fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn default_retries() -> u32 {
    DEFAULT_HTTP_RETRIES
}

// ─────────────────────────────────────────────────────────────────────────────
// Transport configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Which transport a configuration selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Subprocess speaking newline-delimited JSON over stdin/stdout.
    Stdio,
    /// One HTTP POST per message.
    Http,
    /// Persistent WebSocket.
    WebSocket,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdio => write!(f, "stdio"),
            Self::Http => write!(f, "http"),
            Self::WebSocket => write!(f, "websocket"),
        }
    }
}

/// Subprocess transport settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StdioTransportConfig {
    /// Command to spawn.
    pub command: String,
    /// Arguments to pass to the command.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Working directory for the child process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    /// Environment overrides.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

/// One-shot HTTP transport settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpTransportConfig {
    /// Endpoint URL (http or https).
    pub url: String,
    /// Static headers sent with every request.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// Retries for sends that fail before any reply arrives.
    #[serde(default = "default_retries")]
    pub retries: u32,
}

/// Persistent WebSocket transport settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebSocketTransportConfig {
    /// Endpoint URL (ws or wss).
    pub url: String,
    /// Static headers sent on the upgrade request.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

/// Tagged transport configuration.
///
/// ```toml
/// [servers.transport]
/// type = "stdio"
/// command = "mcp-server-sqlite"
/// args = ["--db", "/path/to/db.sqlite"]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    /// Spawn a subprocess.
    Stdio(StdioTransportConfig),
    /// POST each message to a URL.
    Http(HttpTransportConfig),
    /// Keep a WebSocket open.
    WebSocket(WebSocketTransportConfig),
}

impl TransportConfig {
    /// Subprocess transport for `command`.
    pub fn stdio(command: impl Into<String>) -> Self {
        Self::Stdio(StdioTransportConfig {
            command: command.into(),
            args: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
        })
    }

    /// One-shot HTTP transport for `url`.
    pub fn http(url: impl Into<String>) -> Self {
        Self::Http(HttpTransportConfig {
            url: url.into(),
            headers: BTreeMap::new(),
            retries: DEFAULT_HTTP_RETRIES,
        })
    }

    /// Persistent WebSocket transport for `url`.
    pub fn websocket(url: impl Into<String>) -> Self {
        Self::WebSocket(WebSocketTransportConfig {
            url: url.into(),
            headers: BTreeMap::new(),
        })
    }

    /// Decode from an arbitrary JSON value.
    ///
    /// An unrecognized `type` tag, like any other shape problem, is a
    /// configuration error.
    pub fn from_value(value: Value) -> Result<Self> {
        match value.get("type").and_then(Value::as_str) {
            Some("stdio" | "http" | "websocket") => {}
            Some(other) => {
                return Err(McpError::configuration(format!(
                    "unknown transport type '{}'",
                    other
                )));
            }
            None => return Err(McpError::configuration("transport type is missing")),
        }
        serde_json::from_value(value)
            .map_err(|e| McpError::configuration(format!("invalid transport config: {}", e)))
    }

    /// The transport kind this configuration selects.
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Stdio(_) => TransportKind::Stdio,
            Self::Http(_) => TransportKind::Http,
            Self::WebSocket(_) => TransportKind::WebSocket,
        }
    }

    /// Command line or URL, for display.
    pub fn target(&self) -> String {
        match self {
            Self::Stdio(c) if c.args.is_empty() => c.command.clone(),
            Self::Stdio(c) => format!("{} {}", c.command, c.args.join(" ")),
            Self::Http(c) => c.url.clone(),
            Self::WebSocket(c) => c.url.clone(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Server configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration for one server connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Unique, stable identifier.
    pub id: String,
    /// Human-readable name. Falls back to the id when empty.
    #[serde(default)]
    pub name: String,
    /// How to reach the server.
    pub transport: TransportConfig,
    /// Whether bulk operations such as `connect_all` include this server.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Reconnect automatically after failures. `None` uses the manager default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_reconnect: Option<bool>,
    /// Timeout for transport connect, handshake and each request, in ms.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Free-form tags.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl ServerConfig {
    /// Create a config with the given transport.
    pub fn new(id: impl Into<String>, transport: TransportConfig) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            transport,
            enabled: true,
            auto_reconnect: None,
            timeout_ms: default_timeout_ms(),
            tags: Vec::new(),
        }
    }

    /// Create a config for a subprocess server.
    pub fn stdio(id: impl Into<String>, command: impl Into<String>) -> Self {
        Self::new(id, TransportConfig::stdio(command))
    }

    /// Create a config for a one-shot HTTP server.
    pub fn http(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(id, TransportConfig::http(url))
    }

    /// Create a config for a WebSocket server.
    pub fn websocket(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(id, TransportConfig::websocket(url))
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Add an argument (stdio only).
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        if let TransportConfig::Stdio(c) = &mut self.transport {
            c.args.push(arg.into());
        }
        self
    }

    /// Replace the argument list (stdio only).
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        if let TransportConfig::Stdio(c) = &mut self.transport {
            c.args = args;
        }
        self
    }

    /// Set the working directory (stdio only).
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        if let TransportConfig::Stdio(c) = &mut self.transport {
            c.cwd = Some(cwd.into());
        }
        self
    }

    /// Add an environment variable (stdio only).
    pub fn with_env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let TransportConfig::Stdio(c) = &mut self.transport {
            c.env.insert(key.into(), value.into());
        }
        self
    }

    /// Add a static header (http and websocket only).
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        match &mut self.transport {
            TransportConfig::Http(c) => {
                c.headers.insert(key.into(), value.into());
            }
            TransportConfig::WebSocket(c) => {
                c.headers.insert(key.into(), value.into());
            }
            TransportConfig::Stdio(_) => {}
        }
        self
    }

    /// Set the number of HTTP retries (http only).
    pub fn with_retries(mut self, retries: u32) -> Self {
        if let TransportConfig::Http(c) = &mut self.transport {
            c.retries = retries;
        }
        self
    }

    /// Set the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = duration_millis(timeout);
        self
    }

    /// Override the manager's auto-reconnect default.
    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = Some(enabled);
        self
    }

    /// Set enabled state.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Add a tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Name for display, falling back to the id.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    /// Check the parts of the config that do not depend on the transport.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(McpError::configuration("server id must not be empty"));
        }
        if self.timeout_ms == 0 {
            return Err(McpError::configuration(format!(
                "server '{}' has a zero timeout",
                self.id
            )));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Manager configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Manager-wide settings.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Reconnect attempts allowed before a connection stays in `Error`.
    pub max_reconnect_attempts: u32,

    /// Delay before the first reconnect; doubles with every attempt.
    pub reconnect_base_delay: Duration,

    /// Auto-reconnect default for servers that do not set it.
    pub auto_reconnect: bool,

    /// Buffer size of the event channel.
    /// Slow subscribers that fall further behind miss events.
    pub event_capacity: usize,

    /// Identity sent in the handshake.
    pub client_info: ClientInfo,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_base_delay: DEFAULT_RECONNECT_BASE_DELAY,
            auto_reconnect: true,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            client_info: ClientInfo::default(),
        }
    }
}

impl ManagerConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of reconnect attempts.
    pub fn with_max_reconnect_attempts(mut self, max: u32) -> Self {
        self.max_reconnect_attempts = max;
        self
    }

    /// Set the base reconnect delay.
    pub fn with_reconnect_base_delay(mut self, delay: Duration) -> Self {
        self.reconnect_base_delay = delay;
        self
    }

    /// Set the auto-reconnect default.
    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    /// Set the event channel capacity.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Set the client identity sent during the handshake.
    pub fn with_client_info(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.client_info = ClientInfo {
            name: name.into(),
            version: version.into(),
        };
        self
    }
}
