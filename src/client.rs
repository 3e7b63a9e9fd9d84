//! WebSocket sync client holding a local document replica.
//!
//! Provides:
//! - Connection lifecycle (connect, resync, disconnect, reconnect)
//! - Local edits applied immediately, broadcast as incremental updates
//! - Awareness (cursor/selection) updates with a logical clock
//! - Offline queue for edits made while disconnected
//!
//! Local edits never block on the network: they mutate the replica first,
//! and the encoded update either goes out or is queued for replay. The
//! resync handshake on (re)connect exchanges state vectors, so only the
//! runs each side is missing cross the wire.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex, RwLock};
use uuid::Uuid;

use crate::awareness::AwarenessUpdate;
use crate::crdt::{TextCrdt, Update};
use crate::protocol::{MessageType, PeerInfo, ProtocolError, SyncMessage};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    /// Transport is up, state-vector handshake in flight.
    Resyncing,
    Connected,
}

/// Events emitted by the sync client.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// Connection established (resync still pending)
    Connected,
    /// Connection lost
    Disconnected,
    /// Resync handshake complete; the replica is caught up
    Resynced,
    /// A remote update was applied to the local replica
    RemoteUpdate { client_id: Uuid },
    /// Received awareness update from a remote peer
    RemoteAwareness(AwarenessUpdate),
    /// A peer joined the room
    PeerJoined(PeerInfo),
    /// A peer left the room
    PeerLeft(Uuid),
    /// The room was evicted while we were away; the server restarted it
    /// from empty and our replica carries the only copy of the content.
    RoomReset,
}

/// Offline queue for edits made while disconnected.
///
/// Queued updates are replayed after the resync handshake.
pub struct OfflineQueue {
    queue: VecDeque<Vec<u8>>,
    max_size: usize,
}

impl OfflineQueue {
    /// Create a new offline queue with max capacity.
    pub fn new(max_size: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(max_size.min(1024)),
            max_size,
        }
    }

    /// Queue an encoded update for later replay.
    pub fn enqueue(&mut self, payload: Vec<u8>) -> bool {
        if self.queue.len() >= self.max_size {
            return false; // Queue full
        }
        self.queue.push_back(payload);
        true
    }

    /// Drain all queued updates for replay.
    pub fn drain(&mut self) -> Vec<Vec<u8>> {
        self.queue.drain(..).collect()
    }

    /// Number of queued updates.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Clear all queued updates.
    pub fn clear(&mut self) {
        self.queue.clear();
    }

    /// Total bytes queued.
    pub fn total_bytes(&self) -> usize {
        self.queue.iter().map(|p| p.len()).sum()
    }
}

/// The sync client.
///
/// Manages a WebSocket connection to one room on the relay server, a local
/// [`TextCrdt`] replica, awareness updates, and offline queueing.
pub struct SyncClient {
    /// Our identity
    info: PeerInfo,

    /// Room we are editing (becomes the request path)
    room: String,

    /// Local replica; every edit lands here first
    doc: Arc<Mutex<TextCrdt>>,

    /// Connection state
    state: Arc<RwLock<ConnectionState>>,

    /// Logical clock for awareness updates
    awareness_clock: Arc<RwLock<u64>>,

    /// Offline queue for disconnected edits
    offline_queue: Arc<Mutex<OfflineQueue>>,

    /// Channel to send frames to the WebSocket writer task
    outgoing_tx: Option<mpsc::Sender<Vec<u8>>>,

    /// Event receiver for the application
    event_rx: Option<mpsc::Receiver<SyncEvent>>,

    /// Event sender (held by connection tasks)
    event_tx: mpsc::Sender<SyncEvent>,

    /// Whether a resync has ever completed (for room-reset detection)
    synced_once: Arc<AtomicBool>,

    /// Server URL
    server_url: String,
}

impl SyncClient {
    /// Create a new sync client for one room.
    pub fn new(info: PeerInfo, room: impl Into<String>, server_url: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        let client_id = info.client_id;
        Self {
            info,
            room: room.into(),
            doc: Arc::new(Mutex::new(TextCrdt::new(client_id))),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            awareness_clock: Arc::new(RwLock::new(0)),
            offline_queue: Arc::new(Mutex::new(OfflineQueue::new(10_000))),
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx,
            synced_once: Arc::new(AtomicBool::new(false)),
            server_url: server_url.into(),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<SyncEvent>> {
        self.event_rx.take()
    }

    /// Connect to the server and start the resync handshake.
    ///
    /// Spawns background tasks for reading/writing WebSocket messages. The
    /// caller learns about handshake completion via [`SyncEvent::Resynced`].
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        *self.state.write().await = ConnectionState::Connecting;

        let url = format!("{}/{}", self.server_url, self.room);
        let ws_result = tokio_tungstenite::connect_async(&url).await;

        let (ws_stream, _) = match ws_result {
            Ok(ok) => ok,
            Err(e) => {
                log::warn!("connect to {url} failed: {e}");
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ProtocolError::ConnectionClosed);
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // Outgoing frame channel; the writer task owns the sink.
        let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(256);
        self.outgoing_tx = Some(out_tx.clone());
        tokio::spawn(async move {
            while let Some(data) = out_rx.recv().await {
                if ws_writer
                    .send(tokio_tungstenite::tungstenite::Message::Binary(data.into()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });

        // Hello, then kick off the resync handshake with our state vector.
        let join_msg = SyncMessage::peer_joined(&self.info)?;
        out_tx
            .send(join_msg.encode()?)
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)?;

        let sv = {
            let doc = self.doc.lock().await;
            doc.state_vector()
                .encode()
                .map_err(|e| ProtocolError::SerializationError(e.to_string()))?
        };
        out_tx
            .send(SyncMessage::sync_step1(self.info.client_id, sv).encode()?)
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)?;

        *self.state.write().await = ConnectionState::Resyncing;
        let _ = self.event_tx.send(SyncEvent::Connected).await;

        // Reader task: process incoming frames against the local replica.
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        let doc = self.doc.clone();
        let offline_queue = self.offline_queue.clone();
        let synced_once = self.synced_once.clone();
        let client_id = self.info.client_id;
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(tokio_tungstenite::tungstenite::Message::Binary(data)) => {
                        let bytes: Vec<u8> = data.into();
                        let Ok(sync_msg) = SyncMessage::decode(&bytes) else {
                            log::warn!("dropping undecodable frame from server");
                            continue;
                        };
                        // The server never echoes, but guard anyway.
                        if sync_msg.client_id == client_id {
                            continue;
                        }
                        handle_server_frame(
                            sync_msg,
                            &doc,
                            &state,
                            &offline_queue,
                            &synced_once,
                            &out_tx,
                            &event_tx,
                            client_id,
                        )
                        .await;
                    }
                    Ok(tokio_tungstenite::tungstenite::Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }

            // Connection lost; edits from here on queue for the next resync.
            *state.write().await = ConnectionState::Disconnected;
            let _ = event_tx.send(SyncEvent::Disconnected).await;
        });

        Ok(())
    }

    /// Disconnect cleanly, announcing the leave.
    pub async fn disconnect(&mut self) {
        if let Some(tx) = self.outgoing_tx.take() {
            if let Ok(encoded) = SyncMessage::peer_left(self.info.client_id).encode() {
                let _ = tx.send(encoded).await;
            }
            // Dropping tx ends the writer task, which closes the socket.
        }
        *self.state.write().await = ConnectionState::Disconnected;
    }

    /// Insert text at a character position in the local replica and
    /// broadcast the resulting update (or queue it while offline).
    pub async fn insert(&self, pos: u64, text: &str) -> Result<(), ProtocolError> {
        let update = {
            let mut doc = self.doc.lock().await;
            doc.insert(pos, text)
        };
        self.send_update(update).await
    }

    /// Delete a character range from the local replica and broadcast the
    /// resulting update (or queue it while offline).
    pub async fn delete(&self, pos: u64, len: u64) -> Result<(), ProtocolError> {
        let update = {
            let mut doc = self.doc.lock().await;
            doc.delete(pos, len)
        };
        self.send_update(update).await
    }

    async fn send_update(&self, update: Update) -> Result<(), ProtocolError> {
        if update.is_empty() {
            return Ok(());
        }
        let payload = update
            .encode()
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))?;
        let encoded = SyncMessage::update(self.info.client_id, payload).encode()?;

        let state = *self.state.read().await;
        if state != ConnectionState::Connected {
            // Queue for replay after the next resync. Full queue means the
            // edit survives only locally; surface that instead of dropping.
            let mut queue = self.offline_queue.lock().await;
            if !queue.enqueue(encoded) {
                return Err(ProtocolError::ConnectionClosed);
            }
            return Ok(());
        }

        if let Some(ref tx) = self.outgoing_tx {
            tx.send(encoded)
                .await
                .map_err(|_| ProtocolError::ConnectionClosed)?;
        }
        Ok(())
    }

    /// Send an awareness update (cursor position, selection). The payload
    /// shape is the editor's business; this just stamps the clock.
    ///
    /// Silently dropped while offline — stale presence is worse than none.
    pub async fn send_awareness(&self, payload: Vec<u8>) -> Result<(), ProtocolError> {
        let clock = {
            let mut clock = self.awareness_clock.write().await;
            *clock += 1;
            *clock
        };

        if *self.state.read().await != ConnectionState::Connected {
            return Ok(());
        }

        let update = AwarenessUpdate::new(self.info.client_id, clock, payload);
        let encoded = update
            .encode()
            .map_err(ProtocolError::SerializationError)?;
        let msg = SyncMessage::awareness(self.info.client_id, encoded).encode()?;

        if let Some(ref tx) = self.outgoing_tx {
            tx.send(msg).await.map_err(|_| ProtocolError::ConnectionClosed)?;
        }
        Ok(())
    }

    /// Send a ping to the server.
    pub async fn send_ping(&self) -> Result<(), ProtocolError> {
        let msg = SyncMessage::ping(self.info.client_id);
        let encoded = msg.encode()?;

        if let Some(ref tx) = self.outgoing_tx {
            tx.send(encoded)
                .await
                .map_err(|_| ProtocolError::ConnectionClosed)?;
        }
        Ok(())
    }

    /// Current visible text of the local replica.
    pub async fn text(&self) -> String {
        self.doc.lock().await.text()
    }

    /// Visible length of the local replica in characters.
    pub async fn len(&self) -> u64 {
        self.doc.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.doc.lock().await.is_empty()
    }

    /// Get the current connection state.
    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Get our peer info.
    pub fn info(&self) -> &PeerInfo {
        &self.info
    }

    /// Get the room name.
    pub fn room(&self) -> &str {
        &self.room
    }

    /// Get the server URL.
    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// Get offline queue length.
    pub async fn offline_queue_len(&self) -> usize {
        self.offline_queue.lock().await.len()
    }
}

/// Apply one server frame to the replica and surface the right event.
#[allow(clippy::too_many_arguments)]
async fn handle_server_frame(
    msg: SyncMessage,
    doc: &Arc<Mutex<TextCrdt>>,
    state: &Arc<RwLock<ConnectionState>>,
    offline_queue: &Arc<Mutex<OfflineQueue>>,
    synced_once: &Arc<AtomicBool>,
    out_tx: &mpsc::Sender<Vec<u8>>,
    event_tx: &mpsc::Sender<SyncEvent>,
    client_id: Uuid,
) {
    match msg.msg_type {
        MessageType::SyncStep2 => {
            let Ok(diff) = Update::decode(&msg.payload) else {
                log::warn!("undecodable sync diff from server");
                return;
            };

            // A fresh room after we had already synced content means the
            // room was evicted: our replica is the only surviving copy.
            let reset = synced_once.load(Ordering::Relaxed)
                && diff.state.is_empty()
                && !doc.lock().await.is_empty();
            if reset {
                let _ = event_tx.send(SyncEvent::RoomReset).await;
            }

            // Apply what the server has, then push what it is missing.
            let reply = {
                let mut doc = doc.lock().await;
                doc.apply(&diff);
                doc.diff_since(&diff.state)
            };
            if !reply.is_empty() {
                if let Ok(payload) = reply.encode() {
                    if let Ok(encoded) = SyncMessage::update(client_id, payload).encode() {
                        let _ = out_tx.send(encoded).await;
                    }
                }
            }

            // Replay edits queued while offline.
            let queued = offline_queue.lock().await.drain();
            if !queued.is_empty() {
                log::info!("replaying {} queued updates", queued.len());
                for frame in queued {
                    let _ = out_tx.send(frame).await;
                }
            }

            *state.write().await = ConnectionState::Connected;
            synced_once.store(true, Ordering::Relaxed);
            let _ = event_tx.send(SyncEvent::Resynced).await;
        }

        MessageType::Update => {
            let Ok(update) = Update::decode(&msg.payload) else {
                log::warn!("undecodable update from {}", msg.client_id);
                return;
            };
            let applied = {
                let mut doc = doc.lock().await;
                doc.apply(&update)
            };
            if applied {
                let _ = event_tx
                    .send(SyncEvent::RemoteUpdate {
                        client_id: msg.client_id,
                    })
                    .await;
            }
        }

        MessageType::Awareness => {
            if let Ok(update) = AwarenessUpdate::decode(&msg.payload) {
                let _ = event_tx.send(SyncEvent::RemoteAwareness(update)).await;
            }
        }

        MessageType::PeerJoined => {
            if let Ok(info) = msg.peer_info() {
                let _ = event_tx.send(SyncEvent::PeerJoined(info)).await;
            }
        }

        MessageType::PeerLeft => {
            let _ = event_tx.send(SyncEvent::PeerLeft(msg.client_id)).await;
        }

        MessageType::Pong => {}

        MessageType::SyncStep1 | MessageType::Ping => {
            log::debug!("ignoring {:?} from server", msg.msg_type);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let info = PeerInfo::new("TestUser");
        let client = SyncClient::new(info.clone(), "pad-1", "ws://localhost:9090");

        assert_eq!(client.info().name, "TestUser");
        assert_eq!(client.room(), "pad-1");
        assert_eq!(client.server_url(), "ws://localhost:9090");
    }

    #[tokio::test]
    async fn test_client_initial_state() {
        let info = PeerInfo::new("TestUser");
        let client = SyncClient::new(info, "pad-1", "ws://localhost:9090");

        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
        assert!(client.is_empty().await);
        assert_eq!(client.offline_queue_len().await, 0);
    }

    #[tokio::test]
    async fn test_offline_edits_apply_locally_and_queue() {
        let info = PeerInfo::new("TestUser");
        let client = SyncClient::new(info, "pad-1", "ws://localhost:9090");

        client.insert(0, "hello").await.unwrap();
        client.insert(5, " world").await.unwrap();
        assert_eq!(client.text().await, "hello world");
        assert_eq!(client.offline_queue_len().await, 2);

        client.delete(0, 6).await.unwrap();
        assert_eq!(client.text().await, "world");
        assert_eq!(client.offline_queue_len().await, 3);
    }

    #[tokio::test]
    async fn test_empty_edit_sends_nothing() {
        let info = PeerInfo::new("TestUser");
        let client = SyncClient::new(info, "pad-1", "ws://localhost:9090");

        client.insert(0, "").await.unwrap();
        client.delete(0, 5).await.unwrap(); // nothing to delete
        assert_eq!(client.offline_queue_len().await, 0);
    }

    #[tokio::test]
    async fn test_send_awareness_offline_noop() {
        let info = PeerInfo::new("TestUser");
        let client = SyncClient::new(info, "pad-1", "ws://localhost:9090");

        // Should not error (or queue) when offline
        client.send_awareness(vec![1, 2, 3]).await.unwrap();
        assert_eq!(client.offline_queue_len().await, 0);
    }

    #[test]
    fn test_offline_queue() {
        let mut queue = OfflineQueue::new(100);
        assert!(queue.is_empty());
        assert_eq!(queue.len(), 0);

        queue.enqueue(vec![1, 2, 3]);
        queue.enqueue(vec![4, 5, 6, 7]);

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.total_bytes(), 7);

        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0], vec![1, 2, 3]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_offline_queue_capacity() {
        let mut queue = OfflineQueue::new(3);

        assert!(queue.enqueue(vec![1]));
        assert!(queue.enqueue(vec![2]));
        assert!(queue.enqueue(vec![3]));
        assert!(!queue.enqueue(vec![4])); // Full

        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn test_offline_queue_clear() {
        let mut queue = OfflineQueue::new(100);
        queue.enqueue(vec![1]);
        queue.enqueue(vec![2]);
        queue.clear();
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_take_event_rx() {
        let info = PeerInfo::new("TestUser");
        let mut client = SyncClient::new(info, "pad-1", "ws://localhost:9090");

        // First take should succeed
        assert!(client.take_event_rx().is_some());
        // Second take should return None
        assert!(client.take_event_rx().is_none());
    }
}
