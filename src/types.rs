use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// --- Identifiers ---

/// Opaque chat room identifier.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for RoomId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<u64> for RoomId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

/// One-time credential required to open the chat socket for a room.
///
/// The `Debug` output is redacted so tickets never end up in logs.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(transparent)]
pub struct Ticket(String);

impl Ticket {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ticket(<{} chars>)", self.0.len())
    }
}

// --- Enums ---

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChatType {
    Talk,
    Ping,
    Pong,
}

/// A decoded wire frame. Only `Talk` ever reaches subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    Talk(String),
    Ping,
    Pong,
}

impl WireFrame {
    pub fn chat_type(&self) -> ChatType {
        match self {
            WireFrame::Talk(_) => ChatType::Talk,
            WireFrame::Ping => ChatType::Ping,
            WireFrame::Pong => ChatType::Pong,
        }
    }
}

/// Connection state of a supervisor, as observed from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    AwaitingRetry,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::AwaitingRetry => "awaiting-retry",
        };
        f.write_str(name)
    }
}

// --- Events ---

/// A chat message received on a room's socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub room_id: RoomId,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

/// Connectivity transition reported by a [`NetworkAwareness`](crate::network::NetworkAwareness) source.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkEvent {
    pub online: bool,
}

// --- Response Structs ---

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct IssueTicketResponse {
    pub chat_ticket: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ErrorResponse {
    #[serde(default)]
    pub message: Option<String>,
}
