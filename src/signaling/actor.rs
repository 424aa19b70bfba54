use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use super::messages::{ServerMessage, Signal};
use super::registry::RoomRegistry;
use super::types::{
    Member, OutboundMessage, PeerId, PeerSender, Role, RoomId, RoomSnapshot, SignalingError,
};

const COMMAND_QUEUE: usize = 1024;

/// Commands sent to the router actor
pub(crate) enum RoomCommand {
    Join {
        peer_id: PeerId,
        room_id: RoomId,
        role: Role,
        peer_tx: PeerSender,
        reply: oneshot::Sender<Result<(), SignalingError>>,
    },
    Relay {
        peer_id: PeerId,
        signal: Signal,
    },
    BroadcastEnd {
        peer_id: PeerId,
        room_id: RoomId,
    },
    Leave {
        peer_id: PeerId,
    },
    Snapshot {
        room_id: RoomId,
        reply: oneshot::Sender<Option<RoomSnapshot>>,
    },
    Stats {
        reply: oneshot::Sender<RouterStats>,
    },
    Shutdown,
}

/// Counts of live rooms and joined peers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterStats {
    pub rooms: usize,
    pub members: usize,
}

#[derive(Debug)]
struct Membership {
    room_id: RoomId,
    role: Role,
}

/// Routing state. Only ever touched from the actor task, so every
/// read-then-act sequence below runs without interleaving.
struct Router {
    registry: RoomRegistry,
    members: HashMap<PeerId, Membership>,
}

fn encode(msg: &ServerMessage) -> Option<OutboundMessage> {
    match OutboundMessage::encode(msg) {
        Ok(out) => Some(out),
        Err(e) => {
            error!("Failed to encode {:?}: {}", msg, e);
            None
        }
    }
}

impl Router {
    fn new() -> Self {
        Self {
            registry: RoomRegistry::new(),
            members: HashMap::new(),
        }
    }

    fn join(
        &mut self,
        peer_id: PeerId,
        room_id: RoomId,
        role: Role,
        peer_tx: PeerSender,
    ) -> Result<(), SignalingError> {
        if let Some(existing) = self.members.get(&peer_id) {
            return Err(SignalingError::AlreadyJoined(
                peer_id,
                existing.room_id.clone(),
            ));
        }

        let member = Member {
            id: peer_id,
            tx: peer_tx,
        };
        let room = self.registry.get_or_create(&room_id);

        match role {
            Role::Sender => {
                if let Some(displaced) = room.sender.replace(member) {
                    // The displaced sender keeps its socket but no longer
                    // owns the room.
                    self.members.remove(&displaced.id);
                    info!(
                        "Sender {} replaced by {} in room {}",
                        displaced.id, peer_id, room_id
                    );
                }
            }
            Role::Listener => {
                room.listeners.insert(peer_id, member);
                if let Some(sender) = &room.sender {
                    let notice = ServerMessage::ListenerJoined {
                        listener_id: peer_id,
                    };
                    if let Some(msg) = encode(&notice) {
                        sender.deliver(msg);
                    }
                }
            }
        }

        info!("Peer {} joined room {} as {}", peer_id, room_id, role);
        self.members.insert(peer_id, Membership { room_id, role });
        Ok(())
    }

    fn relay(&mut self, from: PeerId, signal: Signal) {
        let Some(membership) = self.members.get(&from) else {
            debug!("Dropping {:?} from unjoined peer {}", signal.kind, from);
            return;
        };
        let Some(room) = self.registry.get(&membership.room_id) else {
            return;
        };

        match membership.role {
            Role::Sender => {
                let Some(target) = signal.listener_id else {
                    debug!("Dropping {:?} from sender {}: no listenerId", signal.kind, from);
                    return;
                };
                match room.listeners.get(&target) {
                    Some(listener) => {
                        let out = ServerMessage::relay(signal, target);
                        if let Some(msg) = encode(&out) {
                            listener.deliver(msg);
                        }
                    }
                    None => debug!(
                        "Listener {} not in room {}, dropping {:?}",
                        target, membership.room_id, signal.kind
                    ),
                }
            }
            Role::Listener => match &room.sender {
                Some(sender) => {
                    let out = ServerMessage::relay(signal, from);
                    if let Some(msg) = encode(&out) {
                        sender.deliver(msg);
                    }
                }
                None => debug!(
                    "No sender in room {}, dropping {:?} from {}",
                    membership.room_id, signal.kind, from
                ),
            },
        }
    }

    fn broadcast_end(&mut self, peer_id: PeerId, room_id: RoomId) {
        match self.members.get(&peer_id) {
            Some(m) if m.role == Role::Sender && m.room_id == room_id => {
                self.close_room(&room_id);
            }
            _ => debug!(
                "Ignoring broadcast_end for room {} from {}",
                room_id, peer_id
            ),
        }
    }

    /// Tell every listener the broadcast is over and forget the room.
    fn close_room(&mut self, room_id: &RoomId) {
        let Some(room) = self.registry.remove(room_id) else {
            return;
        };

        if !room.listeners.is_empty() {
            if let Some(msg) = encode(&ServerMessage::BroadcastEnd) {
                for listener in room.listeners.values() {
                    listener.deliver(msg.clone());
                }
            }
        }

        for id in room.listeners.keys() {
            self.members.remove(id);
        }
        if let Some(sender) = &room.sender {
            self.members.remove(&sender.id);
        }
    }

    fn leave(&mut self, peer_id: PeerId) {
        let Some(Membership { room_id, role }) = self.members.remove(&peer_id) else {
            return;
        };

        info!("Peer {} ({}) left room {}", peer_id, role, room_id);

        match role {
            Role::Sender => self.close_room(&room_id),
            Role::Listener => {
                let Some(room) = self.registry.get_mut(&room_id) else {
                    return;
                };
                room.listeners.remove(&peer_id);

                if let Some(sender) = &room.sender {
                    let notice = ServerMessage::ListenerLeft {
                        listener_id: peer_id,
                    };
                    if let Some(msg) = encode(&notice) {
                        sender.deliver(msg);
                    }
                }

                if room.is_empty() {
                    self.registry.remove(&room_id);
                }
            }
        }
    }

    fn stats(&self) -> RouterStats {
        RouterStats {
            rooms: self.registry.len(),
            members: self.members.len(),
        }
    }
}

pub(crate) async fn router_actor(mut rx: mpsc::Receiver<RoomCommand>) {
    let mut router = Router::new();

    while let Some(cmd) = rx.recv().await {
        match cmd {
            RoomCommand::Join {
                peer_id,
                room_id,
                role,
                peer_tx,
                reply,
            } => {
                let result = router.join(peer_id, room_id, role, peer_tx);
                let _ = reply.send(result);
            }

            RoomCommand::Relay { peer_id, signal } => router.relay(peer_id, signal),

            RoomCommand::BroadcastEnd { peer_id, room_id } => {
                router.broadcast_end(peer_id, room_id)
            }

            RoomCommand::Leave { peer_id } => router.leave(peer_id),

            RoomCommand::Snapshot { room_id, reply } => {
                let _ = reply.send(router.registry.get(&room_id).map(|r| r.snapshot()));
            }

            RoomCommand::Stats { reply } => {
                let _ = reply.send(router.stats());
            }

            RoomCommand::Shutdown => break,
        }
    }

    let stats = router.stats();
    router.registry.clear();
    router.members.clear();
    info!(
        "Router stopped ({} rooms, {} peers dropped)",
        stats.rooms, stats.members
    );
}

/// Handle to communicate with the router actor
#[derive(Clone)]
pub struct RouterHandle {
    pub(crate) tx: mpsc::Sender<RoomCommand>,
}

impl RouterHandle {
    /// Start a router task with an empty room registry.
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel::<RoomCommand>(COMMAND_QUEUE);
        tokio::spawn(router_actor(rx));
        Self { tx }
    }

    /// Attach a peer to a room
    pub async fn join(
        &self,
        peer_id: PeerId,
        room_id: RoomId,
        role: Role,
        peer_tx: PeerSender,
    ) -> Result<(), SignalingError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self
            .tx
            .send(RoomCommand::Join {
                peer_id,
                room_id,
                role,
                peer_tx,
                reply: reply_tx,
            })
            .await;
        reply_rx
            .await
            .map_err(|_| SignalingError::Internal("router channel closed".to_string()))?
    }

    /// Forward an offer, answer or candidate from `peer_id`
    pub async fn relay(&self, peer_id: PeerId, signal: Signal) {
        let _ = self.tx.send(RoomCommand::Relay { peer_id, signal }).await;
    }

    /// End the broadcast in `room_id` (sender only)
    pub async fn broadcast_end(&self, peer_id: PeerId, room_id: RoomId) {
        let _ = self
            .tx
            .send(RoomCommand::BroadcastEnd { peer_id, room_id })
            .await;
    }

    /// Run departure cleanup for a peer. Safe to call more than once.
    pub async fn leave(&self, peer_id: PeerId) {
        let _ = self.tx.send(RoomCommand::Leave { peer_id }).await;
    }

    pub async fn room_snapshot(&self, room_id: &RoomId) -> Result<Option<RoomSnapshot>, SignalingError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self
            .tx
            .send(RoomCommand::Snapshot {
                room_id: room_id.clone(),
                reply: reply_tx,
            })
            .await;
        reply_rx
            .await
            .map_err(|_| SignalingError::Internal("router channel closed".to_string()))
    }

    pub async fn stats(&self) -> Result<RouterStats, SignalingError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self.tx.send(RoomCommand::Stats { reply: reply_tx }).await;
        reply_rx
            .await
            .map_err(|_| SignalingError::Internal("router channel closed".to_string()))
    }

    /// Stop the router and drop every room.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(RoomCommand::Shutdown).await;
    }
}
