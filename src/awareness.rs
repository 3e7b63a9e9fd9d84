//! Ephemeral presence ("awareness") state.
//!
//! Awareness is per-client metadata — cursor position, display profile —
//! that rides alongside the document but is never part of it. Entries are
//! last-write-wins by an explicit per-client logical clock, so out-of-order
//! delivery can never resurrect a stale cursor, and they expire when a
//! client stops refreshing (silent or hung connections).
//!
//! The payload is opaque to this table: the editing widget owns its shape.
//! Malformed payloads are a drop-and-log concern at the session layer;
//! presence is best-effort and never correctness-critical.

use std::collections::HashMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One presence delta on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AwarenessUpdate {
    pub client_id: Uuid,
    /// Per-client logical clock; higher wins.
    pub clock: u64,
    /// Opaque presence payload. `None` announces departure.
    pub state: Option<Vec<u8>>,
}

impl AwarenessUpdate {
    pub fn new(client_id: Uuid, clock: u64, state: Vec<u8>) -> Self {
        Self {
            client_id,
            clock,
            state: Some(state),
        }
    }

    /// A departure marker for `client_id`.
    pub fn departure(client_id: Uuid, clock: u64) -> Self {
        Self {
            client_id,
            clock,
            state: None,
        }
    }

    /// Encode to binary (bincode).
    pub fn encode(&self) -> Result<Vec<u8>, String> {
        bincode::serde::encode_to_vec(self, bincode::config::standard()).map_err(|e| e.to_string())
    }

    /// Decode from binary.
    pub fn decode(bytes: &[u8]) -> Result<Self, String> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| e.to_string())?;
        Ok(msg)
    }
}

#[derive(Debug, Clone)]
struct Entry {
    payload: Vec<u8>,
    clock: u64,
    refreshed_at: Instant,
}

/// Per-room presence table.
#[derive(Debug, Default)]
pub struct AwarenessTable {
    entries: HashMap<Uuid, Entry>,
    /// Clocks of departed clients with the departure time, kept so a late
    /// stale update from before the departure cannot resurrect the entry.
    /// Pruned on the expiry sweep once past the horizon, so visitor churn
    /// cannot grow the map without bound.
    departed: HashMap<Uuid, (u64, Instant)>,
}

impl AwarenessTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a presence delta. Returns `true` when the table changed (the
    /// update was not stale); stale updates are a no-op.
    pub fn apply(&mut self, update: &AwarenessUpdate) -> bool {
        match &update.state {
            Some(payload) => {
                if let Some(&(gone, _)) = self.departed.get(&update.client_id) {
                    if update.clock <= gone {
                        return false;
                    }
                    self.departed.remove(&update.client_id);
                }
                match self.entries.get_mut(&update.client_id) {
                    Some(entry) if update.clock <= entry.clock => false,
                    Some(entry) => {
                        entry.payload = payload.clone();
                        entry.clock = update.clock;
                        entry.refreshed_at = Instant::now();
                        true
                    }
                    None => {
                        self.entries.insert(
                            update.client_id,
                            Entry {
                                payload: payload.clone(),
                                clock: update.clock,
                                refreshed_at: Instant::now(),
                            },
                        );
                        true
                    }
                }
            }
            None => {
                let stored = self.entries.get(&update.client_id).map(|e| e.clock);
                match stored {
                    Some(clock) if update.clock >= clock => {
                        self.entries.remove(&update.client_id);
                        self.departed
                            .insert(update.client_id, (update.clock, Instant::now()));
                        true
                    }
                    Some(_) => false,
                    None => false,
                }
            }
        }
    }

    /// Drop a client's entry unconditionally (transport-level close).
    /// Returns the departure clock to broadcast, if an entry existed.
    pub fn remove(&mut self, client_id: &Uuid) -> Option<u64> {
        let entry = self.entries.remove(client_id)?;
        let clock = entry.clock + 1;
        self.departed.insert(*client_id, (clock, Instant::now()));
        Some(clock)
    }

    /// All live entries as updates, for the initial sync of a new session.
    pub fn snapshot(&self) -> Vec<AwarenessUpdate> {
        self.entries
            .iter()
            .map(|(client_id, entry)| AwarenessUpdate::new(*client_id, entry.clock, entry.payload.clone()))
            .collect()
    }

    /// Remove entries not refreshed since `deadline`. Returns the departure
    /// updates to broadcast so peers see the timeouts immediately.
    ///
    /// Departed-clock records older than the same deadline are pruned here
    /// too: past that horizon a straggler update is no longer in flight.
    pub fn expire_older_than(&mut self, deadline: Instant) -> Vec<AwarenessUpdate> {
        self.departed.retain(|_, &mut (_, at)| at >= deadline);

        let expired: Vec<Uuid> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.refreshed_at < deadline)
            .map(|(client_id, _)| *client_id)
            .collect();
        expired
            .into_iter()
            .filter_map(|client_id| {
                let clock = self.remove(&client_id)?;
                Some(AwarenessUpdate::departure(client_id, clock))
            })
            .collect()
    }

    pub fn contains(&self, client_id: &Uuid) -> bool {
        self.entries.contains_key(client_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
