use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::types::{PeerId, RoomId, Role};

/// Messages sent from client to server
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Attach this connection to a room in the given role
    Join { room_id: RoomId, role: Role },

    /// Session description offer
    Offer {
        #[serde(default)]
        listener_id: Option<PeerId>,
        offer: Value,
        /// Any other top-level fields; relayed untouched
        #[serde(flatten)]
        extra: Map<String, Value>,
    },

    /// Session description answer
    Answer {
        #[serde(default)]
        listener_id: Option<PeerId>,
        answer: Value,
        /// Any other top-level fields; relayed untouched
        #[serde(flatten)]
        extra: Map<String, Value>,
    },

    /// ICE candidate
    Candidate {
        #[serde(default)]
        listener_id: Option<PeerId>,
        candidate: Value,
        /// Any other top-level fields; relayed untouched
        #[serde(flatten)]
        extra: Map<String, Value>,
    },

    /// Sender ends the broadcast and disposes of the room
    BroadcastEnd { room_id: RoomId },

    /// Client-side keep-alive, ignored
    Ping,

    #[serde(other)]
    Unknown,
}

/// Which handshake step a relayed payload belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Offer,
    Answer,
    Candidate,
}

/// A handshake payload on its way through the router
#[derive(Debug, Clone)]
pub struct Signal {
    pub kind: SignalKind,
    /// Target listener when sent by the sender; ignored when sent by a listener.
    pub listener_id: Option<PeerId>,
    pub payload: Value,
    /// Remaining top-level fields of the original message
    pub extra: Map<String, Value>,
}

impl ClientMessage {
    /// Split out the relayable handshake payload, if this is one.
    pub fn into_signal(self) -> Result<Signal, Self> {
        match self {
            ClientMessage::Offer {
                listener_id,
                offer,
                extra,
            } => Ok(Signal {
                kind: SignalKind::Offer,
                listener_id,
                payload: offer,
                extra,
            }),
            ClientMessage::Answer {
                listener_id,
                answer,
                extra,
            } => Ok(Signal {
                kind: SignalKind::Answer,
                listener_id,
                payload: answer,
                extra,
            }),
            ClientMessage::Candidate {
                listener_id,
                candidate,
                extra,
            } => Ok(Signal {
                kind: SignalKind::Candidate,
                listener_id,
                payload: candidate,
                extra,
            }),
            other => Err(other),
        }
    }
}

/// Messages sent from server to client
#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// A listener entered the sender's room
    ListenerJoined { listener_id: PeerId },

    /// A listener left the sender's room
    ListenerLeft { listener_id: PeerId },

    Offer {
        offer: Value,
        listener_id: PeerId,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },

    Answer {
        answer: Value,
        listener_id: PeerId,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },

    Candidate {
        candidate: Value,
        listener_id: PeerId,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },

    /// The sender is gone; the room no longer exists
    BroadcastEnd,

    /// Keep-alive nudge
    Ping,
}

impl ServerMessage {
    /// Outbound form of a relayed signal: the sender's fields as they came
    /// in, with `listenerId` set to the listener it concerns.
    pub fn relay(signal: Signal, listener_id: PeerId) -> Self {
        let Signal {
            kind,
            payload,
            extra,
            ..
        } = signal;
        match kind {
            SignalKind::Offer => ServerMessage::Offer {
                offer: payload,
                listener_id,
                extra,
            },
            SignalKind::Answer => ServerMessage::Answer {
                answer: payload,
                listener_id,
                extra,
            },
            SignalKind::Candidate => ServerMessage::Candidate {
                candidate: payload,
                listener_id,
                extra,
            },
        }
    }
}
