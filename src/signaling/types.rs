use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_tungstenite::tungstenite::Utf8Bytes;

use crate::engine::{Direction, EngineError};

/// Signaling errors
#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("unknown endpoint: {0}")]
    UnknownEndpoint(EndpointId),

    #[error("unknown session: {0}")]
    UnknownSession(SessionId),

    #[error("session already joined: {0}")]
    AlreadyJoined(SessionId),

    #[error("endpoint {endpoint} is not owned by session {session}")]
    NotOwner {
        endpoint: EndpointId,
        session: SessionId,
    },

    #[error("endpoint {0} is not a talker")]
    NotTalker(EndpointId),

    #[error("endpoint {endpoint} cannot handle {trigger} in state {state}")]
    InvalidState {
        endpoint: EndpointId,
        state: NegotiationState,
        trigger: &'static str,
    },

    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl SignalingError {
    /// Protocol errors are logged and ignored; everything else is reported
    /// back to the connection as an `ERROR` envelope.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            SignalingError::UnknownEndpoint(_)
                | SignalingError::UnknownSession(_)
                | SignalingError::AlreadyJoined(_)
                | SignalingError::NotOwner { .. }
                | SignalingError::NotTalker(_)
                | SignalingError::InvalidState { .. }
        )
    }
}

const SESSION_ID_PREFIX: &str = "sess_";
const HEX_CHARS: &[u8] = b"0123456789abcdef";

/// Connection identifier, stable for the lifetime of one WebSocket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// "sess_" + 8 hex
    pub fn generate() -> Self {
        let value: u32 = rand::rng().random();
        let mut id = String::with_capacity(SESSION_ID_PREFIX.len() + 8);
        id.push_str(SESSION_ID_PREFIX);
        for i in 0..8 {
            let nibble = ((value >> (28 - i * 4)) & 0xF) as usize;
            id.push(HEX_CHARS[nibble] as char);
        }
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Endpoint identifier assigned by the media engine. This is the only
/// endpoint reference that crosses the wire (`webRtcEpId`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointId(String);

impl EndpointId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EndpointId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EndpointId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Receives the owner's audio into the room.
    Talker,
    /// Sends one other participant's audio to the owner.
    Listener,
}

impl Role {
    pub fn direction(self) -> Direction {
        match self {
            Role::Talker => Direction::RecvOnly,
            Role::Listener => Direction::SendOnly,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Role::Talker => "talker",
            Role::Listener => "listener",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-endpoint negotiation state. Variants are ordered by progress so
/// `state >= NegotiationState::Gathering` reads as "gathering or later".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NegotiationState {
    Created,
    OfferSent,
    Gathering,
    AnswerApplied,
    Connected,
    Closed,
}

impl NegotiationState {
    pub fn is_closed(self) -> bool {
        self == NegotiationState::Closed
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NegotiationState::Created => "Created",
            NegotiationState::OfferSent => "OfferSent",
            NegotiationState::Gathering => "Gathering",
            NegotiationState::AnswerApplied => "AnswerApplied",
            NegotiationState::Connected => "Connected",
            NegotiationState::Closed => "Closed",
        };
        f.write_str(s)
    }
}

/// ICE candidate as exchanged with the browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mid: String,
    pub sdp_m_line_index: u16,
}

/// Wrapper for outbound WebSocket messages using tungstenite's Utf8Bytes.
#[derive(Debug, Clone)]
pub struct OutboundMessage(Utf8Bytes);

impl OutboundMessage {
    pub fn new(s: impl Into<Utf8Bytes>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Get the inner Utf8Bytes for tungstenite Message::Text
    pub fn into_inner(self) -> Utf8Bytes {
        self.0
    }
}

impl From<String> for OutboundMessage {
    fn from(s: String) -> Self {
        Self(Utf8Bytes::from(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_generate_has_correct_format() {
        let id = SessionId::generate();
        assert!(id.as_str().starts_with("sess_"));
        assert_eq!(id.as_str().len(), 13);
        assert!(id.as_str()[5..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn session_id_display() {
        let id = SessionId::from("a");
        assert_eq!(format!("{}", id), "a");
    }

    #[test]
    fn endpoint_id_serializes_as_plain_string() {
        let id = EndpointId::from("ep-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"ep-1\"");
        let back: EndpointId = serde_json::from_str("\"ep-2\"").unwrap();
        assert_eq!(back.as_str(), "ep-2");
    }

    #[test]
    fn role_direction_is_fixed() {
        assert_eq!(Role::Talker.direction(), Direction::RecvOnly);
        assert_eq!(Role::Listener.direction(), Direction::SendOnly);
    }

    #[test]
    fn negotiation_states_are_ordered() {
        assert!(NegotiationState::Created < NegotiationState::OfferSent);
        assert!(NegotiationState::OfferSent < NegotiationState::Gathering);
        assert!(NegotiationState::Gathering < NegotiationState::AnswerApplied);
        assert!(NegotiationState::AnswerApplied < NegotiationState::Connected);
        assert!(NegotiationState::Closed.is_closed());
    }

    #[test]
    fn ice_candidate_uses_browser_field_names() {
        let json = r#"{"candidate":"candidate:1 1 UDP 1 10.0.0.1 5000 typ host","sdpMid":"0","sdpMLineIndex":0}"#;
        let candidate: IceCandidate = serde_json::from_str(json).unwrap();
        assert_eq!(candidate.sdp_mid, "0");
        assert_eq!(candidate.sdp_m_line_index, 0);
        assert_eq!(serde_json::to_string(&candidate).unwrap(), json);
    }

    #[test]
    fn protocol_errors_are_classified() {
        assert!(SignalingError::UnknownEndpoint(EndpointId::from("x")).is_protocol());
        assert!(
            SignalingError::InvalidState {
                endpoint: EndpointId::from("x"),
                state: NegotiationState::Created,
                trigger: "answer",
            }
            .is_protocol()
        );
        assert!(SignalingError::NotTalker(EndpointId::from("x")).is_protocol());
        assert!(!SignalingError::Internal("boom".to_string()).is_protocol());
        assert!(!SignalingError::Engine(EngineError::Failed("boom".to_string())).is_protocol());
    }
}
