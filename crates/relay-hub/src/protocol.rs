use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque identifier for one WebSocket session on the relay.
///
/// Generated by the relay when the session is accepted and stamped onto
/// every command packet the session issues.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Allocate a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ConnectionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ConnectionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Command envelope as delivered to every member of an application channel.
///
/// `sender_id` is always filled in by the relay from the issuing session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandPacket {
    pub sender_id: ConnectionId,
    pub application: String,
    pub command: serde_json::Value,
}

/// Name of the field a response packet must carry to be routed back.
pub const SENDER_ID_FIELD: &str = "senderId";

/// Extract the destination of a response packet, if it has one.
pub fn response_target(packet: &serde_json::Value) -> Option<ConnectionId> {
    packet
        .get(SENDER_ID_FIELD)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(ConnectionId::from)
}

/// Events a participant sends to the relay.
///
/// Frames are JSON objects of the form `{"event": "...", "data": {...}}`.
/// Unknown fields inside `data` are ignored, which is how a caller-supplied
/// `senderId` on a `command_packet` is discarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Join the channel for `application`.
    Register { application: String },

    /// Broadcast `command` to every session registered for `application`.
    CommandPacket {
        application: String,
        #[serde(default)]
        command: serde_json::Value,
    },

    /// Reply to a previously received command. `packet.senderId` names the
    /// session that should receive it.
    CommandPacketResponse { packet: serde_json::Value },
}

/// Registration outcome reported back to the registering session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
    Success,
    Error,
}

/// Events the relay sends to a participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    RegistrationResponse {
        status: RegistrationStatus,
        message: String,
    },

    CommandPacket(CommandPacket),

    /// A response packet, forwarded unchanged.
    PacketResponse(serde_json::Value),
}

impl ServerEvent {
    pub fn registration(status: RegistrationStatus, message: impl Into<String>) -> Self {
        Self::RegistrationResponse {
            status,
            message: message.into(),
        }
    }
}
