//! Protocol message definitions
//!
//! Defines the JSON messages exchanged between peers and the relay. Every
//! message is tagged by its `type` field. Negotiation payloads (offers,
//! answers, ICE candidates) are opaque to the relay and forwarded verbatim.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

/// Current protocol version, reported in the welcome message
pub const PROTOCOL_VERSION: u32 = 1;

// ============================================================================
// Error Types
// ============================================================================

/// Protocol-related errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("JSON serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("{0} message is missing a room")]
    MissingRoom(SignalKind),
}

/// Result type for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;

// ============================================================================
// Payloads
// ============================================================================

/// The three negotiation message kinds relayed between peers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
            SignalKind::IceCandidate => "ice_candidate",
        }
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Join request body
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JoinRequest {
    /// Display name, defaults to "User"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Room key, defaults to "default"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
}

/// Opaque negotiation payload addressed to a room
///
/// Only `room` is interpreted. Everything else (`sdp`, `candidate`, ...) is
/// kept in `body` and forwarded unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SignalPayload {
    /// Target room
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    /// Remaining fields of the message
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl SignalPayload {
    /// The target room, treating an empty key as absent
    pub fn room(&self) -> Option<&str> {
        self.room.as_deref().filter(|r| !r.is_empty())
    }
}

// ============================================================================
// Client Messages
// ============================================================================

/// Messages sent from a peer to the relay
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Connection keepalive ping
    Ping {
        /// Sequence number echoed in the pong
        seq: u64,
    },

    /// Join a room, leaving any previous one
    Join(JoinRequest),

    /// Leave the current room without disconnecting
    Leave,

    /// Session description offer for the other peers in a room
    Offer(SignalPayload),

    /// Session description answer for the other peers in a room
    Answer(SignalPayload),

    /// Network path candidate for the other peers in a room
    IceCandidate(SignalPayload),
}

impl ClientMessage {
    /// Parse a client message from JSON
    ///
    /// Only the shape is checked here. Whether a negotiation message has a
    /// usable room is decided by the router, which may fall back to the
    /// sender's current room.
    pub fn from_json(json: &str) -> ProtocolResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

// ============================================================================
// Server Messages
// ============================================================================

/// Messages sent from the relay to a peer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once on connection
    Welcome {
        /// Server protocol version
        version: u32,
        /// Identifier assigned to this connection
        client_id: Uuid,
    },

    /// Response to Ping
    Pong {
        /// Echo back the sequence number
        seq: u64,
    },

    /// A peer joined the room (sent to the joiner too)
    UserJoined {
        /// Display name of the joining peer
        username: String,
    },

    /// Forwarded offer
    Offer(SignalPayload),

    /// Forwarded answer
    Answer(SignalPayload),

    /// Forwarded ICE candidate
    IceCandidate(SignalPayload),

    /// Error response, only sent when error replies are enabled
    Error {
        /// Error message
        message: String,
        /// Error code for programmatic handling
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<ErrorCode>,
    },
}

/// Error codes for programmatic error handling
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Malformed JSON or unknown message type
    InvalidMessage,
    /// Negotiation message without a room
    MissingRoom,
    /// Sender is not registered
    UnknownClient,
}

impl ServerMessage {
    /// Create a Welcome message
    pub fn welcome(client_id: Uuid) -> Self {
        ServerMessage::Welcome {
            version: PROTOCOL_VERSION,
            client_id,
        }
    }

    /// Create a Pong message
    pub fn pong(seq: u64) -> Self {
        ServerMessage::Pong { seq }
    }

    /// Create a UserJoined message
    pub fn user_joined(username: impl Into<String>) -> Self {
        ServerMessage::UserJoined {
            username: username.into(),
        }
    }

    /// Forward a negotiation payload under its original kind
    pub fn forward(kind: SignalKind, payload: SignalPayload) -> Self {
        match kind {
            SignalKind::Offer => ServerMessage::Offer(payload),
            SignalKind::Answer => ServerMessage::Answer(payload),
            SignalKind::IceCandidate => ServerMessage::IceCandidate(payload),
        }
    }

    /// Create an Error message with a code
    pub fn error_with_code(message: impl Into<String>, code: ErrorCode) -> Self {
        ServerMessage::Error {
            message: message.into(),
            code: Some(code),
        }
    }

    /// Serialize the message to JSON
    pub fn to_json(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
impl SignalPayload {
    /// Create a payload addressed to a room
    pub fn new(room: impl Into<String>) -> Self {
        Self {
            room: Some(room.into()),
            body: Map::new(),
        }
    }

    /// Add an opaque field
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.body.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
impl ClientMessage {
    pub fn ping(seq: u64) -> Self {
        ClientMessage::Ping { seq }
    }

    pub fn join(username: Option<&str>, room: Option<&str>) -> Self {
        ClientMessage::Join(JoinRequest {
            username: username.map(str::to_string),
            room: room.map(str::to_string),
        })
    }

    pub fn to_json(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
impl ServerMessage {
    pub fn from_json(json: &str) -> ProtocolResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
