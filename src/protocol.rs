//! Binary wire protocol for room synchronization.
//!
//! Every WebSocket binary frame is one bincode-encoded [`SyncMessage`].
//! The room identifier is *not* part of the envelope: it travels out-of-band
//! in the WebSocket request path, so a connection is bound to exactly one
//! room for its lifetime.
//!
//! Payload contents by message type:
//! - `SyncStep1` — an encoded [`crate::crdt::StateVector`] (what do I have)
//! - `SyncStep2` — an encoded [`crate::crdt::Update`] (what you were missing)
//! - `Update`    — an encoded incremental [`crate::crdt::Update`]
//! - `Awareness` — an encoded [`crate::awareness::AwarenessUpdate`]
//! - `PeerJoined` — an encoded [`PeerInfo`]
//! - `PeerLeft`, `Ping`, `Pong` — empty

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Message types for the sync protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// State vector request (resync handshake)
    SyncStep1 = 1,
    /// State diff response
    SyncStep2 = 2,
    /// Incremental document delta
    Update = 3,
    /// Presence update
    Awareness = 4,
    /// Peer joined notification (also the session's hello)
    PeerJoined = 5,
    /// Peer left notification
    PeerLeft = 6,
    /// Heartbeat ping
    Ping = 7,
    /// Heartbeat pong
    Pong = 8,
}

/// Peer identity with display metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeerInfo {
    pub client_id: Uuid,
    pub name: String,
    /// RGBA color for cursor/selection rendering
    pub color: [f32; 4],
}

impl PeerInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4(), name)
    }

    /// Create with an explicit client id. The color is a stable function of
    /// the id so every participant renders the same cursor colors.
    pub fn with_id(client_id: Uuid, name: impl Into<String>) -> Self {
        let hash = client_id.as_u128();
        let r = (hash & 0xFF) as f32 / 255.0;
        let g = ((hash >> 8) & 0xFF) as f32 / 255.0;
        let b = ((hash >> 16) & 0xFF) as f32 / 255.0;
        Self {
            client_id,
            name: name.into(),
            color: [r, g, b, 1.0],
        }
    }
}

/// Top-level protocol message.
///
/// Serialized with bincode for minimal overhead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncMessage {
    pub msg_type: MessageType,
    /// Emitting client (the server relays with the emitter's id intact).
    pub client_id: Uuid,
    /// Message payload (varies by msg_type)
    pub payload: Vec<u8>,
}

impl SyncMessage {
    /// Create a document update message.
    pub fn update(client_id: Uuid, update: Vec<u8>) -> Self {
        Self {
            msg_type: MessageType::Update,
            client_id,
            payload: update,
        }
    }

    /// Create a sync step 1 (state vector request).
    pub fn sync_step1(client_id: Uuid, state_vector: Vec<u8>) -> Self {
        Self {
            msg_type: MessageType::SyncStep1,
            client_id,
            payload: state_vector,
        }
    }

    /// Create a sync step 2 (state diff response).
    pub fn sync_step2(client_id: Uuid, state_diff: Vec<u8>) -> Self {
        Self {
            msg_type: MessageType::SyncStep2,
            client_id,
            payload: state_diff,
        }
    }

    /// Create an awareness message from pre-encoded payload bytes.
    pub fn awareness(client_id: Uuid, payload: Vec<u8>) -> Self {
        Self {
            msg_type: MessageType::Awareness,
            client_id,
            payload,
        }
    }

    /// Create a peer joined notification.
    pub fn peer_joined(info: &PeerInfo) -> Result<Self, ProtocolError> {
        let payload = bincode::serde::encode_to_vec(info, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))?;
        Ok(Self {
            msg_type: MessageType::PeerJoined,
            client_id: info.client_id,
            payload,
        })
    }

    /// Create a peer left notification.
    pub fn peer_left(client_id: Uuid) -> Self {
        Self {
            msg_type: MessageType::PeerLeft,
            client_id,
            payload: Vec::new(),
        }
    }

    /// Create a ping message.
    pub fn ping(client_id: Uuid) -> Self {
        Self {
            msg_type: MessageType::Ping,
            client_id,
            payload: Vec::new(),
        }
    }

    /// Create a pong message.
    pub fn pong(client_id: Uuid) -> Self {
        Self {
            msg_type: MessageType::Pong,
            client_id,
            payload: Vec::new(),
        }
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(msg)
    }

    /// Parse peer info payload.
    pub fn peer_info(&self) -> Result<PeerInfo, ProtocolError> {
        if self.msg_type != MessageType::PeerJoined {
            return Err(ProtocolError::InvalidMessageType);
        }
        let (info, _) =
            bincode::serde::decode_from_slice(&self.payload, bincode::config::standard())
                .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(info)
    }
}

/// Protocol errors.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    InvalidMessageType,
    ConnectionClosed,
    Timeout,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::InvalidMessageType => write!(f, "Invalid message type"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::Timeout => write!(f, "Connection timeout"),
        }
    }
}

impl std::error::Error for ProtocolError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::{StateVector, TextCrdt};

    #[test]
    fn test_update_message_roundtrip() {
        let client = Uuid::new_v4();
        let payload = vec![1, 2, 3, 4, 5];

        let msg = SyncMessage::update(client, payload.clone());
        let decoded = SyncMessage::decode(&msg.encode().unwrap()).unwrap();

        assert_eq!(decoded.msg_type, MessageType::Update);
        assert_eq!(decoded.client_id, client);
        assert_eq!(decoded.payload, payload);
    }

    #[test]
    fn test_sync_step_roundtrips() {
        let client = Uuid::new_v4();
        let sv = StateVector::new().encode().unwrap();

        let step1 = SyncMessage::sync_step1(client, sv.clone());
        let decoded = SyncMessage::decode(&step1.encode().unwrap()).unwrap();
        assert_eq!(decoded.msg_type, MessageType::SyncStep1);
        assert_eq!(decoded.payload, sv);

        let mut doc = TextCrdt::new(client);
        doc.insert(0, "state");
        let diff = doc.snapshot().encode().unwrap();
        let step2 = SyncMessage::sync_step2(client, diff.clone());
        let decoded = SyncMessage::decode(&step2.encode().unwrap()).unwrap();
        assert_eq!(decoded.msg_type, MessageType::SyncStep2);
        assert_eq!(decoded.payload, diff);
    }

    #[test]
    fn test_peer_joined_roundtrip() {
        let info = PeerInfo::new("Alice");
        let msg = SyncMessage::peer_joined(&info).unwrap();
        let decoded = SyncMessage::decode(&msg.encode().unwrap()).unwrap();

        assert_eq!(decoded.msg_type, MessageType::PeerJoined);
        let parsed = decoded.peer_info().unwrap();
        assert_eq!(parsed.name, "Alice");
        assert_eq!(parsed.client_id, info.client_id);
    }

    #[test]
    fn test_peer_left_and_heartbeat() {
        let client = Uuid::new_v4();
        for msg in [
            SyncMessage::peer_left(client),
            SyncMessage::ping(client),
            SyncMessage::pong(client),
        ] {
            let decoded = SyncMessage::decode(&msg.encode().unwrap()).unwrap();
            assert_eq!(decoded.msg_type, msg.msg_type);
            assert_eq!(decoded.client_id, client);
            assert!(decoded.payload.is_empty());
        }
    }

    #[test]
    fn test_peer_info_stable_color() {
        let id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        let info1 = PeerInfo::with_id(id, "Test");
        let info2 = PeerInfo::with_id(id, "Test");
        assert_eq!(info1.color, info2.color);
    }

    #[test]
    fn test_invalid_message_type_error() {
        let msg = SyncMessage::ping(Uuid::new_v4());
        assert!(msg.peer_info().is_err());
    }

    #[test]
    fn test_decode_invalid_bytes() {
        let garbage = vec![0xFF, 0xFE, 0xFD];
        assert!(SyncMessage::decode(&garbage).is_err());
    }

    #[test]
    fn test_small_update_stays_small() {
        let client = Uuid::new_v4();
        let msg = SyncMessage::update(client, vec![0u8; 32]);
        let encoded = msg.encode().unwrap();
        assert!(
            encoded.len() < 100,
            "encoded size {} too large for a 32-byte update",
            encoded.len()
        );
    }
}
