//! WebSocket signaling relay: sender/listener rooms and handshake routing

mod actor;
mod messages;
mod registry;
mod server;
mod types;

pub use actor::{RouterHandle, RouterStats};
pub use messages::{ClientMessage, ServerMessage, Signal, SignalKind};
pub use server::{HEALTH_PATH, SignalingServer};
pub use types::{OutboundMessage, PeerId, PeerSender, Role, RoomId, RoomSnapshot, SignalingError};
