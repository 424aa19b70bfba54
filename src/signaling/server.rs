use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{Instant, interval_at};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::{Bytes, Message};
use tracing::{debug, error, info, warn};

use super::actor::RouterHandle;
use super::messages::{ClientMessage, ServerMessage};
use super::types::{OutboundMessage, PeerId, PeerSender, Role, RoomId};
use crate::config::RelayConfig;

/// Plain `GET` on this path answers `200 ok` instead of upgrading
pub const HEALTH_PATH: &str = "/";
const HEALTH_RESPONSE: &[u8] =
    b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok";
const MAX_REQUEST_HEAD: usize = 4096;
const PEEK_ATTEMPTS: usize = 50;

pub struct SignalingServer {
    listener: TcpListener,
    router: RouterHandle,
    config: Arc<RelayConfig>,
}

impl SignalingServer {
    /// Bind the listening socket and start the router.
    pub async fn bind(config: RelayConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind(config.bind_addr()).await?;
        info!(
            "Signaling server listening on {} (path {})",
            listener.local_addr()?,
            config.ws_path
        );

        Ok(Self {
            listener,
            router: RouterHandle::spawn(),
            config: Arc::new(config),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn router(&self) -> RouterHandle {
        self.router.clone()
    }

    pub async fn run(self) -> std::io::Result<()> {
        loop {
            let (stream, addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Accept failed: {}", e);
                    continue;
                }
            };
            let router = self.router.clone();
            let config = self.config.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, router, config).await {
                    error!("Connection error from {}: {}", addr, e);
                }
            });
        }
    }
}

/// Per-connection state: the relay-assigned identity and, once joined,
/// the room and role.
struct Session {
    peer_id: PeerId,
    joined: Option<(RoomId, Role)>,
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    router: RouterHandle,
    config: Arc<RelayConfig>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if config.ws_path != HEALTH_PATH
        && request_path(&stream).await?.as_deref() == Some(HEALTH_PATH)
    {
        debug!("Health check from {}", addr);
        serve_health(stream).await?;
        return Ok(());
    }

    let ws_path = config.ws_path.clone();
    let ws_stream = tokio_tungstenite::accept_hdr_async(
        stream,
        move |req: &Request, resp: Response| {
            if req.uri().path() == ws_path {
                Ok(resp)
            } else {
                let mut err = ErrorResponse::new(Some("not found".to_string()));
                *err.status_mut() = StatusCode::NOT_FOUND;
                Err(err)
            }
        },
    )
    .await?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let mut session = Session {
        peer_id: PeerId::generate(),
        joined: None,
    };
    info!("WebSocket connection from {} as {}", addr, session.peer_id);

    let (tx, mut rx) = mpsc::channel::<OutboundMessage>(config.outbound_queue);
    let (ctrl_tx, mut ctrl_rx) = mpsc::unbounded_channel::<Message>();

    let keepalive = if config.app_keepalive {
        OutboundMessage::encode(&ServerMessage::Ping).ok()
    } else {
        None
    };
    let mut ping_interval = interval_at(Instant::now() + config.ping_interval, config.ping_interval);
    let mut waiting_for_pong = false;
    let mut pong_deadline: Option<Instant> = None;

    let send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(msg) = rx.recv() => {
                    let ws_msg = Message::Text(msg.into_inner());
                    if ws_tx.send(ws_msg).await.is_err() {
                        break;
                    }
                }
                Some(ctrl_msg) = ctrl_rx.recv() => {
                    if ws_tx.send(ctrl_msg).await.is_err() {
                        break;
                    }
                }
                else => break,
            }
        }
    });

    loop {
        let pong_timeout = async move {
            match pong_deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = ping_interval.tick() => {
                if waiting_for_pong {
                    warn!("No Pong received, disconnecting {}", addr);
                    break;
                }
                if ctrl_tx.send(Message::Ping(Bytes::new())).is_err() {
                    break;
                }
                if let Some(msg) = &keepalive {
                    let _ = tx.try_send(msg.clone());
                }
                waiting_for_pong = true;
                pong_deadline = Some(Instant::now() + config.pong_timeout);
                debug!("Ping sent to {}", addr);
            }

            _ = pong_timeout => {
                warn!("Pong timeout, disconnecting {}", addr);
                break;
            }

            msg = ws_rx.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        warn!("WebSocket error from {}: {}", addr, e);
                        break;
                    }
                    None => break,
                };

                match msg {
                    Message::Text(text) => {
                        handle_text_message(text.as_str(), &mut session, &tx, &router).await;
                    }
                    Message::Pong(_) => {
                        waiting_for_pong = false;
                        pong_deadline = None;
                        debug!("Pong received from {}", addr);
                    }
                    Message::Close(_) => {
                        info!("Close received from {}", addr);
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    if session.joined.is_some() {
        router.leave(session.peer_id).await;
    }

    send_task.abort();
    info!("WebSocket disconnected: {} ({})", addr, session.peer_id);

    Ok(())
}

/// Path of a `GET` request line, read without consuming the stream.
async fn request_path(stream: &TcpStream) -> std::io::Result<Option<String>> {
    let mut buf = [0u8; 1024];
    for _ in 0..PEEK_ATTEMPTS {
        let n = stream.peek(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        if let Some(end) = buf[..n].windows(2).position(|w| w == b"\r\n") {
            let line = String::from_utf8_lossy(&buf[..end]);
            let mut parts = line.split_whitespace();
            return Ok(match (parts.next(), parts.next()) {
                (Some("GET"), Some(path)) => Some(path.to_string()),
                _ => None,
            });
        }
        if n == buf.len() {
            return Ok(None);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(None)
}

async fn serve_health(mut stream: TcpStream) -> std::io::Result<()> {
    let mut head = Vec::new();
    let mut buf = [0u8; 512];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") && head.len() < MAX_REQUEST_HEAD {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        head.extend_from_slice(&buf[..n]);
    }
    stream.write_all(HEALTH_RESPONSE).await?;
    stream.shutdown().await
}

async fn handle_text_message(
    text: &str,
    session: &mut Session,
    tx: &PeerSender,
    router: &RouterHandle,
) {
    let client_msg: ClientMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            debug!("Dropping malformed message from {}: {}", session.peer_id, e);
            return;
        }
    };

    match client_msg {
        ClientMessage::Join { room_id, role } => {
            if let Some((current, _)) = &session.joined {
                debug!(
                    "Peer {} already in room {}, ignoring join for {}",
                    session.peer_id, current, room_id
                );
                return;
            }
            match router
                .join(session.peer_id, room_id.clone(), role, tx.clone())
                .await
            {
                Ok(()) => session.joined = Some((room_id, role)),
                Err(e) => warn!("Join failed for {}: {}", session.peer_id, e),
            }
        }

        ClientMessage::BroadcastEnd { room_id } => {
            if session.joined.is_some() {
                router.broadcast_end(session.peer_id, room_id).await;
            }
        }

        ClientMessage::Ping => {}

        ClientMessage::Unknown => {
            debug!("Ignoring message of unknown type from {}", session.peer_id);
        }

        other => {
            if session.joined.is_none() {
                debug!("Dropping signal from unjoined peer {}", session.peer_id);
                return;
            }
            if let Ok(signal) = other.into_signal() {
                router.relay(session.peer_id, signal).await;
            }
        }
    }
}
