//! Connection lifecycle states and the events the manager publishes.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::config::{TransportKind, duration_millis};
use crate::error::McpError;
use crate::protocol::ServerInfo;

/// Lifecycle state of one server connection.
///
/// ```text
///   Disconnected ──▶ Connecting ──▶ Connected
///        ▲              │              │
///        │              ▼              │
///        └──────────── Error ◀─────────┘
///   (Error and Disconnected both go back to Connecting;
///    Connected can also drop straight to Disconnected)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// Not connected and not trying.
    Disconnected,
    /// A connect attempt is in progress.
    Connecting,
    /// Handshake completed; requests may be sent.
    Connected,
    /// The last attempt or the live connection failed.
    Error,
}

impl ConnectionStatus {
    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: ConnectionStatus) -> bool {
        use ConnectionStatus::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Error, Connecting)
                | (Connecting, Connected)
                | (Connecting, Error)
                | (Connected, Error)
                | (Connected, Disconnected)
        )
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Read-only view of a connection.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSnapshot {
    pub server_id: String,
    pub name: String,
    pub transport: TransportKind,
    pub enabled: bool,
    pub status: ConnectionStatus,
    pub reconnect_attempts: u32,
    pub is_reconnecting: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_info: Option<ServerInfo>,
}

/// Something that happened to a managed connection.
///
/// Every variant names the server it concerns.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ConnectionEvent {
    /// A server was registered.
    Added { server_id: String },
    /// A server was unregistered.
    Removed { server_id: String },
    /// The lifecycle state changed.
    StatusChanged {
        server_id: String,
        old: ConnectionStatus,
        new: ConnectionStatus,
    },
    /// A connect attempt or a live connection failed.
    Error {
        server_id: String,
        #[serde(serialize_with = "serialize_display")]
        error: McpError,
    },
    /// A live connection was closed by the other side.
    Closed { server_id: String },
    /// A reconnect attempt will run after `delay`.
    ReconnectScheduled {
        server_id: String,
        attempt: u32,
        #[serde(rename = "delay_ms", serialize_with = "serialize_millis")]
        delay: Duration,
    },
    /// The server sent a notification.
    Notification {
        server_id: String,
        method: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        params: Option<Value>,
    },
}

impl ConnectionEvent {
    /// Server the event concerns.
    pub fn server_id(&self) -> &str {
        match self {
            Self::Added { server_id }
            | Self::Removed { server_id }
            | Self::StatusChanged { server_id, .. }
            | Self::Error { server_id, .. }
            | Self::Closed { server_id }
            | Self::ReconnectScheduled { server_id, .. }
            | Self::Notification { server_id, .. } => server_id,
        }
    }
}

fn serialize_display<S: Serializer>(value: &McpError, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

fn serialize_millis<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration_millis(*value))
}
