//! Fan-out to the other sessions of a room, with backpressure.
//!
//! Every session owns a bounded queue of pre-encoded frames. Fan-out is a
//! `try_send` per receiver, so a slow peer can never stall the room. On a
//! full queue the policy is graded by frame kind: awareness frames are
//! dropped first (presence is best-effort), while an undeliverable document
//! frame force-closes the lagging session — losing a document frame would
//! silently fork its replica, so disconnecting and letting it resync is the
//! only safe outcome.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::protocol::PeerInfo;

/// Classifies an outbound frame for the overflow policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Document updates and sync steps: must not be dropped.
    Document,
    /// Presence: droppable under pressure.
    Awareness,
    /// Join/leave notifications: must not be dropped.
    Control,
}

/// Counters for monitoring broadcast health.
#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    pub frames_sent: u64,
    pub awareness_dropped: u64,
    pub slow_sessions_closed: u64,
    pub active_peers: usize,
}

struct PeerHandle {
    info: PeerInfo,
    tx: mpsc::Sender<Arc<Vec<u8>>>,
}

/// Fan-out group for one room.
pub struct BroadcastGroup {
    peers: RwLock<HashMap<Uuid, PeerHandle>>,
    /// Outbound queue depth per session.
    capacity: usize,
    frames_sent: AtomicU64,
    awareness_dropped: AtomicU64,
    slow_sessions_closed: AtomicU64,
}

impl BroadcastGroup {
    /// Create a group whose sessions buffer up to `capacity` frames each.
    pub fn new(capacity: usize) -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            capacity,
            frames_sent: AtomicU64::new(0),
            awareness_dropped: AtomicU64::new(0),
            slow_sessions_closed: AtomicU64::new(0),
        }
    }

    /// Register a session. The returned receiver yields the frames to write
    /// to that session's socket; when it returns `None` the session has been
    /// evicted as a slow consumer and must close.
    pub async fn add_peer(&self, info: PeerInfo) -> mpsc::Receiver<Arc<Vec<u8>>> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let client_id = info.client_id;
        self.peers.write().await.insert(client_id, PeerHandle { info, tx });
        rx
    }

    /// Deregister a session.
    pub async fn remove_peer(&self, client_id: &Uuid) -> Option<PeerInfo> {
        self.peers.write().await.remove(client_id).map(|h| h.info)
    }

    /// Queue a frame for every session except `sender`. Returns the number
    /// of sessions it was queued for.
    pub async fn broadcast_from(
        &self,
        sender: Option<Uuid>,
        kind: FrameKind,
        frame: Arc<Vec<u8>>,
    ) -> usize {
        let mut peers = self.peers.write().await;
        let mut delivered = 0usize;
        let mut evict: Vec<Uuid> = Vec::new();

        for (client_id, handle) in peers.iter() {
            if Some(*client_id) == sender {
                continue;
            }
            match handle.tx.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    if kind == FrameKind::Awareness {
                        self.awareness_dropped.fetch_add(1, Ordering::Relaxed);
                        log::debug!("dropping awareness frame for lagging peer {client_id}");
                    } else {
                        // Slow consumer: a lost document frame would fork its
                        // replica, so cut it loose instead.
                        evict.push(*client_id);
                    }
                }
                Err(mpsc::error::TrySendError::Closed(_)) => evict.push(*client_id),
            }
        }

        for client_id in evict {
            // Dropping the sender ends the session's receiver stream.
            peers.remove(&client_id);
            self.slow_sessions_closed.fetch_add(1, Ordering::Relaxed);
            log::warn!("force-closing slow session {client_id}");
        }

        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        delivered
    }

    /// Current peer count.
    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    /// All registered peer identities.
    pub async fn peers(&self) -> Vec<PeerInfo> {
        self.peers.read().await.values().map(|h| h.info.clone()).collect()
    }

    pub async fn has_peer(&self, client_id: &Uuid) -> bool {
        self.peers.read().await.contains_key(client_id)
    }

    /// Lock-free counter snapshot (peer count aside).
    pub async fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            awareness_dropped: self.awareness_dropped.load(Ordering::Relaxed),
            slow_sessions_closed: self.slow_sessions_closed.load(Ordering::Relaxed),
            active_peers: self.peers.read().await.len(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
