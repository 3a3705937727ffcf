//! Wire types for the lobby connection and the matchmaking frontend.
//!
//! Lobby traffic is JSON text wrapped in an [`Envelope`] that carries the
//! reserved message-type code next to the tagged payload, e.g.
//!
//! ```json
//! {"msg_type":49,"payload":{"type":"OpenMatchAck","data":{"connection_id":7}}}
//! ```
//!
//! Frontend traffic uses [`FrontendRequest`] / [`FrontendResponse`] without an
//! envelope.

use std::fmt;

use serde::{Deserialize, Serialize};

// ── Type aliases ────────────────────────────────────────────────────

/// Identifier the game server assigns to a client connection.
pub type ConnectionId = u32;

// ── Message type codes ──────────────────────────────────────────────

/// Reserved message-type codes for lobby traffic.
///
/// Codes below 48 belong to the transport layer and are never used here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
#[repr(u16)]
pub enum MessageType {
    Hello = 48,
    /// Client is ready to leave for matchmaking.
    OpenMatchAck = 49,
    Ping = 50,
    Welcome = 51,
    PlayerCount = 52,
    OpenMatchPrompt = 53,
    OpenMatchAckBack = 54,
    Error = 55,
}

impl MessageType {
    /// Returns the numeric wire code.
    pub fn code(self) -> u16 {
        self as u16
    }
}

impl From<MessageType> for u16 {
    fn from(value: MessageType) -> Self {
        value.code()
    }
}

impl TryFrom<u16> for MessageType {
    type Error = String;

    fn try_from(code: u16) -> std::result::Result<Self, String> {
        Ok(match code {
            48 => Self::Hello,
            49 => Self::OpenMatchAck,
            50 => Self::Ping,
            51 => Self::Welcome,
            52 => Self::PlayerCount,
            53 => Self::OpenMatchPrompt,
            54 => Self::OpenMatchAckBack,
            55 => Self::Error,
            other => return Err(format!("unknown message type code {other}")),
        })
    }
}

// ── Endpoints and filters ───────────────────────────────────────────

/// Port value meaning "not resolved yet".
pub const UNRESOLVED_PORT: u16 = 0;

/// A joinable network address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub address: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }

    /// Returns `true` once the port is no longer the unresolved sentinel.
    pub fn is_resolved(&self) -> bool {
        self.port != UNRESOLVED_PORT
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Opaque criteria document a match is filtered on.
///
/// The frontend only builds a match from tickets whose filter it has a
/// server-side rule for, so the default must stay in sync with that rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatchFilter(pub serde_json::Value);

impl MatchFilter {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// Filter for the battle-royale game mode.
    pub fn battle_royale() -> Self {
        Self(serde_json::json!({ "mode": { "battleroyale": 1 } }))
    }
}

impl Default for MatchFilter {
    fn default() -> Self {
        Self::battle_royale()
    }
}

// ── Lobby messages ──────────────────────────────────────────────────

/// Message types sent from client to the game server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientMessage {
    /// First message on every connection.
    Hello {
        #[serde(skip_serializing_if = "Option::is_none")]
        sdk_version: Option<String>,
    },
    /// Tells the server this client is leaving for matchmaking, so it can
    /// stop prompting. Carries the client's own connection id.
    OpenMatchAck { connection_id: ConnectionId },
    /// Heartbeat.
    Ping,
}

impl ClientMessage {
    pub fn msg_type(&self) -> MessageType {
        match self {
            Self::Hello { .. } => MessageType::Hello,
            Self::OpenMatchAck { .. } => MessageType::OpenMatchAck,
            Self::Ping => MessageType::Ping,
        }
    }
}

/// Message types sent from the game server to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerMessage {
    /// Reply to `Hello` with the id assigned to this connection.
    Welcome {
        connection_id: ConnectionId,
        num_players: u32,
    },
    /// Number of fully established player sessions changed.
    PlayerCount { num_players: u32 },
    /// Server asks the client to go to matchmaking. Repeated until acknowledged.
    OpenMatchPrompt,
    /// Server received the client's `OpenMatchAck`.
    OpenMatchAckBack { connection_id: ConnectionId },
    /// Error message.
    Error { message: String },
}

impl ServerMessage {
    pub fn msg_type(&self) -> MessageType {
        match self {
            Self::Welcome { .. } => MessageType::Welcome,
            Self::PlayerCount { .. } => MessageType::PlayerCount,
            Self::OpenMatchPrompt => MessageType::OpenMatchPrompt,
            Self::OpenMatchAckBack { .. } => MessageType::OpenMatchAckBack,
            Self::Error { .. } => MessageType::Error,
        }
    }
}

/// A lobby message tagged with its message-type code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub msg_type: MessageType,
    pub payload: T,
}

impl Envelope<ClientMessage> {
    pub fn client(payload: ClientMessage) -> Self {
        Self {
            msg_type: payload.msg_type(),
            payload,
        }
    }
}

impl Envelope<ServerMessage> {
    pub fn server(payload: ServerMessage) -> Self {
        Self {
            msg_type: payload.msg_type(),
            payload,
        }
    }

    /// Returns `true` when the code matches the payload variant.
    pub fn is_consistent(&self) -> bool {
        self.msg_type == self.payload.msg_type()
    }
}

// ── Matchmaking frontend messages ───────────────────────────────────

/// A player ticket submitted to the matchmaking frontend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerTicket {
    pub id: String,
    pub properties: MatchFilter,
}

/// Requests sent to the matchmaking frontend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum FrontendRequest {
    CreatePlayer { player: PlayerTicket },
    DeletePlayer { id: String },
}

/// Responses and updates from the matchmaking frontend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum FrontendResponse {
    PlayerCreated { success: bool },
    /// The ticket was matched into a session reachable at `endpoint`.
    Assignment { id: String, endpoint: Endpoint },
    PlayerDeleted { success: bool },
    Error { message: String },
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn ack_envelope_carries_reserved_code() {
        let json = serde_json::to_value(Envelope::client(ClientMessage::OpenMatchAck {
            connection_id: 7,
        }))
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "msg_type": 49,
                "payload": { "type": "OpenMatchAck", "data": { "connection_id": 7 } }
            })
        );
    }

    #[test]
    fn message_codes_convert_both_ways() {
        assert_eq!(MessageType::try_from(55), Ok(MessageType::Error));
        assert_eq!(u16::from(MessageType::Error), 55);
        assert_eq!(MessageType::try_from(48), Ok(MessageType::Hello));
        assert!(MessageType::try_from(56).is_err());
    }

    #[test]
    fn unknown_message_code_is_rejected() {
        let raw = r#"{"msg_type":12,"payload":{"type":"OpenMatchPrompt"}}"#;
        assert!(serde_json::from_str::<Envelope<ServerMessage>>(raw).is_err());
    }

    #[test]
    fn mismatched_code_is_detected() {
        let raw = r#"{"msg_type":52,"payload":{"type":"OpenMatchPrompt"}}"#;
        let envelope: Envelope<ServerMessage> = serde_json::from_str(raw).unwrap();
        assert!(!envelope.is_consistent());
    }

    #[test]
    fn default_filter_is_battle_royale() {
        let json = serde_json::to_string(&MatchFilter::default()).unwrap();
        assert_eq!(json, r#"{"mode":{"battleroyale":1}}"#);
    }

    #[test]
    fn endpoint_display_and_resolution() {
        let endpoint = Endpoint::new("10.0.0.3", 7777);
        assert_eq!(endpoint.to_string(), "10.0.0.3:7777");
        assert!(endpoint.is_resolved());
        assert!(!Endpoint::new("10.0.0.3", UNRESOLVED_PORT).is_resolved());
    }
}
