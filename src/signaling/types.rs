use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_tungstenite::tungstenite::Utf8Bytes;
use tracing::{debug, warn};

use super::messages::ServerMessage;

/// Signaling router errors
#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("peer {0} already joined room {1}")]
    AlreadyJoined(PeerId, RoomId),

    #[error("internal error: {0}")]
    Internal(String),
}

const PEER_ID_PREFIX: &[u8] = b"peer_";
const PEER_ID_HEX_LEN: usize = 24;
const PEER_ID_LEN: usize = 29;
const HEX_CHARS: &[u8] = b"0123456789abcdef";

static NEXT_PEER_SEQ: AtomicU64 = AtomicU64::new(1);

/// Peer ID: 29-byte fixed array ("peer_" + 24 hex).
///
/// The first 16 hex digits are a 64-bit process-wide sequence number, so
/// identities are never reused within a process lifetime; the last 8 are
/// random.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId {
    bytes: [u8; PEER_ID_LEN],
}

impl PeerId {
    pub fn generate() -> Self {
        let seq = NEXT_PEER_SEQ.fetch_add(1, Ordering::Relaxed);
        let salt: u32 = rand::rng().random();
        Self::from_u128(((seq as u128) << 32) | salt as u128)
    }

    fn from_u128(value: u128) -> Self {
        let mut bytes = [0u8; PEER_ID_LEN];
        bytes[..PEER_ID_PREFIX.len()].copy_from_slice(PEER_ID_PREFIX);

        for i in 0..PEER_ID_HEX_LEN {
            let nibble = ((value >> ((PEER_ID_HEX_LEN - 1 - i) * 4)) & 0xF) as usize;
            bytes[PEER_ID_PREFIX.len() + i] = HEX_CHARS[nibble];
        }
        Self { bytes }
    }

    /// Parse a peer ID previously handed out by the relay.
    pub fn parse(s: &str) -> Option<Self> {
        let hex = s.strip_prefix("peer_")?;
        if hex.len() != PEER_ID_HEX_LEN || !hex.bytes().all(|b| HEX_CHARS.contains(&b)) {
            return None;
        }
        let mut bytes = [0u8; PEER_ID_LEN];
        bytes.copy_from_slice(s.as_bytes());
        Some(Self { bytes })
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.bytes).unwrap_or("")
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for PeerId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PeerId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        PeerId::parse(&s).ok_or_else(|| de::Error::custom(format!("invalid peer id: {s:?}")))
    }
}

/// Caller-chosen room key, matched by exact string equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomId(String);

impl RoomId {
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
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Serialize for RoomId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for RoomId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        if s.is_empty() {
            return Err(de::Error::custom("room id must not be empty"));
        }
        Ok(RoomId(s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Sender,
    Listener,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Sender => f.write_str("sender"),
            Role::Listener => f.write_str("listener"),
        }
    }
}

/// Wrapper for outbound WebSocket messages using tungstenite's Utf8Bytes.
#[derive(Debug, Clone)]
pub struct OutboundMessage(Utf8Bytes);

impl OutboundMessage {
    pub fn encode(msg: &ServerMessage) -> Result<Self, serde_json::Error> {
        Ok(Self::from(serde_json::to_string(msg)?))
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

/// Send side of a peer's bounded outbound queue.
pub type PeerSender = mpsc::Sender<OutboundMessage>;

/// A room occupant: identity plus the queue feeding its socket.
#[derive(Debug, Clone)]
pub(crate) struct Member {
    pub id: PeerId,
    pub tx: PeerSender,
}

impl Member {
    /// Queue `msg` for this peer without waiting. A full or closed queue
    /// drops the message.
    pub fn deliver(&self, msg: OutboundMessage) -> bool {
        match self.tx.try_send(msg) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Outbound queue full for {}, dropping message", self.id);
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Outbound queue closed for {}", self.id);
                false
            }
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct Room {
    pub sender: Option<Member>,
    pub listeners: HashMap<PeerId, Member>,
}

impl Room {
    pub fn is_empty(&self) -> bool {
        self.sender.is_none() && self.listeners.is_empty()
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        let mut listeners: Vec<PeerId> = self.listeners.keys().copied().collect();
        listeners.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        RoomSnapshot {
            sender: self.sender.as_ref().map(|m| m.id),
            listeners,
        }
    }
}

/// Point-in-time view of a room's occupants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSnapshot {
    pub sender: Option<PeerId>,
    pub listeners: Vec<PeerId>,
}
