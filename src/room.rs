//! Room registry: one replicated document per room name.
//!
//! Rooms are ephemeral scratch spaces. They come into existence the first
//! time a connection references their name, and the registry evicts them —
//! document, awareness table and all — the moment the last session leaves.
//! Eviction is the system's only garbage collection; a later connection to
//! the same name starts from an empty document.
//!
//! Two different name strings are two disjoint rooms; the registry imposes
//! no format on names.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard, RwLock};
use uuid::Uuid;

use crate::awareness::AwarenessTable;
use crate::broadcast::BroadcastGroup;
use crate::crdt::TextCrdt;

/// The mutable per-room structures, guarded by a single lock.
///
/// Every document or awareness mutation for a room goes through this lock,
/// which is the per-room exclusion boundary: acquire, mutate, release —
/// never held across socket I/O.
pub struct RoomState {
    pub doc: TextCrdt,
    pub awareness: AwarenessTable,
}

/// One collaboration namespace: a document, its awareness table, a fan-out
/// group and the set of live sessions.
pub struct Room {
    name: String,
    state: Mutex<RoomState>,
    broadcast: BroadcastGroup,
    sessions: RwLock<HashSet<Uuid>>,
}

impl Room {
    fn new(name: String, broadcast_capacity: usize) -> Self {
        Self {
            name,
            state: Mutex::new(RoomState {
                // The relay replica never edits locally; it still needs an
                // identity for its state vector bookkeeping.
                doc: TextCrdt::new(Uuid::new_v4()),
                awareness: AwarenessTable::new(),
            }),
            broadcast: BroadcastGroup::new(broadcast_capacity),
            sessions: RwLock::new(HashSet::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Acquire the room's exclusion boundary.
    pub async fn state(&self) -> MutexGuard<'_, RoomState> {
        self.state.lock().await
    }

    pub fn broadcast(&self) -> &BroadcastGroup {
        &self.broadcast
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn has_session(&self, client_id: &Uuid) -> bool {
        self.sessions.read().await.contains(client_id)
    }
}

/// Process-wide map of live rooms.
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Arc<Room>>>,
    broadcast_capacity: usize,
}

impl RoomRegistry {
    pub fn new(broadcast_capacity: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            broadcast_capacity,
        }
    }

    /// Register a session with a room, creating the room on first
    /// reference. Registration is atomic with creation so a concurrent
    /// eviction can never drop a room that just gained a session.
    pub async fn join(&self, name: &str, client_id: Uuid) -> Arc<Room> {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .entry(name.to_string())
            .or_insert_with(|| {
                log::info!("creating room '{name}'");
                Arc::new(Room::new(name.to_string(), self.broadcast_capacity))
            })
            .clone();
        room.sessions.write().await.insert(client_id);
        room
    }

    /// Remove a session from a room; evicts the room when its session set
    /// becomes empty. Returns `true` when the room was evicted.
    pub async fn release(&self, name: &str, client_id: &Uuid) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get(name) else {
            return false;
        };
        let empty = {
            let mut sessions = room.sessions.write().await;
            sessions.remove(client_id);
            sessions.is_empty()
        };
        if empty {
            rooms.remove(name);
            log::info!("evicting empty room '{name}'");
        }
        empty
    }

    /// Look up a live room without creating it.
    pub async fn get(&self, name: &str) -> Option<Arc<Room>> {
        self.rooms.read().await.get(name).cloned()
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Names of all live rooms.
    pub async fn active_rooms(&self) -> Vec<Arc<Room>> {
        self.rooms.read().await.values().cloned().collect()
    }
}
