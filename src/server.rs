//! WebSocket relay server with room-based routing.
//!
//! Architecture:
//! ```text
//! Client A ──┐
//!             ├── Room (name from URL path) ── TextCrdt ── BroadcastGroup
//! Client B ──┘            │
//!                         └── AwarenessTable (expiry-swept)
//! ```
//!
//! One tokio task per connection, in three phases:
//!
//! - connecting: transport handshake done, waiting for the client's
//!   `PeerJoined` hello. The room name comes from the request path.
//! - synced: entered after the server has sent the full document snapshot
//!   and awareness snapshot — the only full-state transfer. From here on,
//!   inbound frames are applied to the room under its lock and, when they
//!   actually changed state, rebroadcast verbatim to the other synced
//!   sessions.
//! - closed: the session deregisters, its awareness entry departs, and
//!   the room is evicted if it is now empty. This cleanup runs however the
//!   synced phase ended — clean close, transport error, or a failed send —
//!   so a registered session can never outlive its socket.
//!
//! Room state is locked for mutation only, never across socket I/O, so a
//! slow peer cannot stall the other sessions of its room.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use uuid::Uuid;

use crate::awareness::AwarenessUpdate;
use crate::broadcast::FrameKind;
use crate::crdt::{StateVector, Update};
use crate::protocol::{MessageType, PeerInfo, SyncMessage};
use crate::room::{Room, RoomRegistry};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Maximum peers per room
    pub max_peers_per_room: usize,
    /// Outbound queue depth per session (backpressure bound)
    pub outbound_queue_capacity: usize,
    /// Awareness entries without a refresh inside this window are expired
    pub awareness_timeout_secs: u64,
    /// How often the expiry sweeper runs
    pub awareness_sweep_secs: u64,
    /// Undecodable frames tolerated per session before it is closed
    pub malformed_frame_tolerance: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            max_peers_per_room: 100,
            outbound_queue_capacity: 256,
            awareness_timeout_secs: 30,
            awareness_sweep_secs: 10,
            malformed_frame_tolerance: 8,
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub malformed_frames: u64,
    pub active_rooms: usize,
}

type WsSender = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsReceiver = SplitStream<WebSocketStream<TcpStream>>;

/// The sync relay server.
pub struct SyncServer {
    config: ServerConfig,
    registry: Arc<RoomRegistry>,
    stats: Arc<RwLock<ServerStats>>,
}

impl SyncServer {
    /// Create a new server with the given configuration.
    pub fn new(config: ServerConfig) -> Self {
        let registry = Arc::new(RoomRegistry::new(config.outbound_queue_capacity));
        Self {
            config,
            registry,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Start listening for WebSocket connections.
    ///
    /// This runs the server event loop. Call from an async runtime.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_awareness_sweeper();

        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("sync server listening on {}", self.config.bind_addr);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("new TCP connection from {addr}");

            let registry = self.registry.clone();
            let stats = self.stats.clone();
            let config = self.config.clone();

            tokio::spawn(async move {
                if let Err(e) =
                    Self::handle_connection(stream, addr, registry, stats, config).await
                {
                    log::error!("connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Periodic task expiring idle awareness entries in every room,
    /// independent of transport-level close detection.
    fn spawn_awareness_sweeper(&self) {
        let registry = self.registry.clone();
        let timeout = Duration::from_secs(self.config.awareness_timeout_secs);
        let sweep = Duration::from_secs(self.config.awareness_sweep_secs.max(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep);
            loop {
                ticker.tick().await;
                let Some(deadline) = Instant::now().checked_sub(timeout) else {
                    continue;
                };
                for room in registry.active_rooms().await {
                    let departures = {
                        let mut state = room.state().await;
                        state.awareness.expire_older_than(deadline)
                    };
                    for dep in departures {
                        log::info!(
                            "awareness entry for {} timed out in room '{}'",
                            dep.client_id,
                            room.name()
                        );
                        broadcast_awareness(&room, None, &dep).await;
                    }
                }
            }
        });
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        registry: Arc<RoomRegistry>,
        stats: Arc<RwLock<ServerStats>>,
        config: ServerConfig,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        // The room name is out-of-band: it is the request path.
        let mut path = String::new();
        let ws_stream = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp| {
            path = req.uri().path().to_string();
            Ok::<Response, tokio_tungstenite::tungstenite::handshake::server::ErrorResponse>(resp)
        })
        .await?;
        let room_name = match path.trim_start_matches('/') {
            "" => "default".to_string(),
            name => name.to_string(),
        };

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        log::debug!("session from {addr} for room '{room_name}' awaiting hello");

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let mut malformed: u32 = 0;

        // Connecting: wait for the client's hello (PeerJoined with identity).
        let info = loop {
            match ws_receiver.next().await {
                Some(Ok(Message::Binary(data))) => match SyncMessage::decode(&data) {
                    Ok(msg) if msg.msg_type == MessageType::PeerJoined => {
                        break msg
                            .peer_info()
                            .unwrap_or_else(|_| PeerInfo::with_id(msg.client_id, "Anonymous"));
                    }
                    Ok(msg) => {
                        log::debug!("ignoring {:?} before hello from {addr}", msg.msg_type);
                    }
                    Err(e) => {
                        log::warn!("failed to decode hello from {addr}: {e}");
                        malformed += 1;
                        if malformed > config.malformed_frame_tolerance {
                            Self::finish(&stats, None).await;
                            return Ok(());
                        }
                    }
                },
                Some(Ok(Message::Ping(data))) => {
                    ws_sender.send(Message::Pong(data)).await?;
                }
                Some(Ok(Message::Close(_))) | None => {
                    Self::finish(&stats, None).await;
                    return Ok(());
                }
                Some(Err(e)) => {
                    log::warn!("websocket error from {addr} before hello: {e}");
                    Self::finish(&stats, None).await;
                    return Ok(());
                }
                _ => {}
            }
        };
        let client_id = info.client_id;

        let room = registry.join(&room_name, client_id).await;
        if room.broadcast().peer_count().await >= config.max_peers_per_room {
            log::warn!("room '{room_name}' full, rejecting {client_id}");
            registry.release(&room_name, &client_id).await;
            let _ = ws_sender.close().await;
            Self::finish(&stats, None).await;
            return Ok(());
        }

        let mut outbound = room.broadcast().add_peer(info.clone()).await;

        // The session is registered from here on. Transport faults inside
        // the synced phase are observed, not propagated, so the deregister
        // sequence below runs no matter how the session ends.
        if let Err(e) = Self::run_session(
            &room,
            &mut ws_sender,
            &mut ws_receiver,
            &mut outbound,
            &info,
            &config,
            &stats,
            &mut malformed,
        )
        .await
        {
            log::debug!("session {client_id} ended with transport error: {e}");
        }

        // Closed: deregister, depart, maybe evict the room.
        log::info!("session {client_id} in room '{room_name}' closed");

        room.broadcast().remove_peer(&client_id).await;
        let departure_clock = {
            let mut state = room.state().await;
            state.awareness.remove(&client_id)
        };
        if let Some(clock) = departure_clock {
            let dep = AwarenessUpdate::departure(client_id, clock);
            broadcast_awareness(&room, Some(client_id), &dep).await;
        }
        if let Ok(left_frame) = SyncMessage::peer_left(client_id).encode() {
            room.broadcast()
                .broadcast_from(Some(client_id), FrameKind::Control, Arc::new(left_frame))
                .await;
        }
        registry.release(&room_name, &client_id).await;

        Self::finish(&stats, Some(registry.room_count().await)).await;
        Ok(())
    }

    /// The registered part of a session: initial snapshot, join announce,
    /// then the relay loop. A returned error means the transport failed;
    /// the caller owns the deregister sequence either way.
    #[allow(clippy::too_many_arguments)]
    async fn run_session(
        room: &Arc<Room>,
        ws_sender: &mut WsSender,
        ws_receiver: &mut WsReceiver,
        outbound: &mut tokio::sync::mpsc::Receiver<Arc<Vec<u8>>>,
        info: &PeerInfo,
        config: &ServerConfig,
        stats: &Arc<RwLock<ServerStats>>,
        malformed: &mut u32,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let client_id = info.client_id;

        // Entering the synced phase: the one and only full-state transfer.
        let (doc_snapshot, awareness_snapshot) = {
            let state = room.state().await;
            (state.doc.snapshot(), state.awareness.snapshot())
        };
        let snap = SyncMessage::sync_step2(Uuid::nil(), doc_snapshot.encode()?);
        ws_sender.send(Message::Binary(snap.encode()?.into())).await?;
        for entry in awareness_snapshot {
            let msg = SyncMessage::awareness(entry.client_id, entry.encode()?);
            ws_sender.send(Message::Binary(msg.encode()?.into())).await?;
        }

        // Announce the join to the rest of the room.
        let join_frame = SyncMessage::peer_joined(info)?.encode()?;
        room.broadcast()
            .broadcast_from(Some(client_id), FrameKind::Control, Arc::new(join_frame))
            .await;
        log::info!("peer {} ({client_id}) joined room '{}'", info.name, room.name());

        // Relay loop.
        loop {
            tokio::select! {
                inbound = ws_receiver.next() => {
                    match inbound {
                        Some(Ok(Message::Binary(data))) => {
                            let bytes: Vec<u8> = data.into();
                            {
                                let mut s = stats.write().await;
                                s.total_messages += 1;
                                s.total_bytes += bytes.len() as u64;
                            }
                            match SyncMessage::decode(&bytes) {
                                Ok(msg) => {
                                    let keep_going = Self::handle_frame(
                                        room, ws_sender, client_id, msg, bytes,
                                        malformed,
                                    )
                                    .await?;
                                    if !keep_going {
                                        return Ok(());
                                    }
                                }
                                Err(e) => {
                                    log::warn!("undecodable frame from {client_id}: {e}");
                                    *malformed += 1;
                                    stats.write().await.malformed_frames += 1;
                                }
                            }
                            if *malformed > config.malformed_frame_tolerance {
                                log::warn!(
                                    "closing session {client_id}: malformed frame tolerance exceeded"
                                );
                                return Ok(());
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) | None => return Ok(()),
                        Some(Err(e)) => {
                            log::debug!("websocket error from {client_id}: {e}");
                            return Ok(());
                        }
                        _ => {}
                    }
                }

                frame = outbound.recv() => {
                    match frame {
                        Some(bytes) => {
                            ws_sender.send(Message::Binary(bytes.to_vec().into())).await?;
                        }
                        // Evicted as a slow consumer: the queue is gone.
                        None => {
                            log::warn!("session {client_id} evicted as slow consumer");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    /// Apply one decoded frame to the room. Returns `false` when the
    /// session should close.
    async fn handle_frame(
        room: &Arc<Room>,
        ws_sender: &mut WsSender,
        client_id: Uuid,
        msg: SyncMessage,
        raw: Vec<u8>,
        malformed: &mut u32,
    ) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
        match msg.msg_type {
            MessageType::Update => match Update::decode(&msg.payload) {
                Ok(update) => {
                    // Broadcast while still holding the room lock (queueing
                    // only, no socket I/O), so fan-out order matches apply
                    // order within the room.
                    let mut state = room.state().await;
                    if state.doc.apply(&update) {
                        room.broadcast()
                            .broadcast_from(Some(client_id), FrameKind::Document, Arc::new(raw))
                            .await;
                    } else {
                        // Duplicate redeliveries are not rebroadcast.
                        log::trace!("duplicate update from {client_id} ignored");
                    }
                }
                Err(e) => {
                    log::warn!("malformed update payload from {client_id}: {e}");
                    *malformed += 1;
                }
            },

            MessageType::SyncStep1 => match StateVector::decode(&msg.payload) {
                Ok(sv) => {
                    let diff = {
                        let state = room.state().await;
                        state.doc.diff_since(&sv)
                    };
                    let reply = SyncMessage::sync_step2(Uuid::nil(), diff.encode()?);
                    ws_sender.send(Message::Binary(reply.encode()?.into())).await?;
                }
                Err(e) => {
                    log::warn!("malformed state vector from {client_id}: {e}");
                    *malformed += 1;
                }
            },

            MessageType::Awareness => match AwarenessUpdate::decode(&msg.payload) {
                Ok(update) => {
                    // Stale presence (older clock) is dropped, not relayed.
                    let mut state = room.state().await;
                    if state.awareness.apply(&update) {
                        room.broadcast()
                            .broadcast_from(Some(client_id), FrameKind::Awareness, Arc::new(raw))
                            .await;
                    }
                }
                Err(e) => {
                    // Presence is best-effort: drop, log, keep the session.
                    log::warn!("malformed awareness payload from {client_id}: {e}");
                    *malformed += 1;
                }
            },

            MessageType::Ping => {
                let pong = SyncMessage::pong(client_id);
                ws_sender.send(Message::Binary(pong.encode()?.into())).await?;
            }

            // A client-announced leave closes the session cleanly.
            MessageType::PeerLeft => return Ok(false),

            MessageType::PeerJoined | MessageType::SyncStep2 | MessageType::Pong => {
                log::debug!("ignoring {:?} from {client_id}", msg.msg_type);
            }
        }
        Ok(true)
    }

    async fn finish(stats: &Arc<RwLock<ServerStats>>, room_count: Option<usize>) {
        let mut s = stats.write().await;
        s.active_connections = s.active_connections.saturating_sub(1);
        if let Some(count) = room_count {
            s.active_rooms = count;
        }
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        let mut stats = self.stats.read().await.clone();
        stats.active_rooms = self.registry.room_count().await;
        stats
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    /// Get the room registry.
    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }
}

/// Encode and fan out one awareness update.
async fn broadcast_awareness(room: &Arc<Room>, sender: Option<Uuid>, update: &AwarenessUpdate) {
    let Ok(payload) = update.encode() else {
        return;
    };
    let msg = SyncMessage::awareness(update.client_id, payload);
    if let Ok(bytes) = msg.encode() {
        room.broadcast()
            .broadcast_from(sender, FrameKind::Awareness, Arc::new(bytes))
            .await;
    }
}
