//! Identifiers, state vectors and the serialized update format.
//!
//! An [`Update`] is the unit of replication: a batch of inserted runs and/or
//! tombstoned ranges plus the emitter's [`StateVector`] at emission time.
//! Updates are immutable once built and safe to redeliver — identifiers are
//! never reused, so applying the same update twice is a no-op.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies one replica (one editing participant).
pub type ClientId = Uuid;

/// Globally unique identifier of a single character.
///
/// `counter` values are assigned per-client, monotonically and contiguously:
/// a client's n-th inserted character carries counter n-1. A run of `len`
/// characters starting at `(client, c)` covers counters `c .. c + len`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemId {
    pub client: ClientId,
    pub counter: u64,
}

impl ItemId {
    pub fn new(client: ClientId, counter: u64) -> Self {
        Self { client, counter }
    }

    /// The id `offset` characters further into the same run.
    pub fn advance(&self, offset: u64) -> Self {
        Self {
            client: self.client,
            counter: self.counter + offset,
        }
    }
}

impl std::fmt::Debug for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", &self.client.to_string()[..8], self.counter)
    }
}

/// Per-client "next expected counter" map.
///
/// `get(client)` is the lowest counter this replica has *not* seen from that
/// client; every counter below it has been incorporated. Used to express
/// "what am I missing" during resync.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StateVector(HashMap<ClientId, u64>);

impl StateVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next expected counter for a client (0 if never seen).
    pub fn get(&self, client: &ClientId) -> u64 {
        self.0.get(client).copied().unwrap_or(0)
    }

    /// Record that all counters below `next` have been seen.
    pub fn set(&mut self, client: ClientId, next: u64) {
        let entry = self.0.entry(client).or_insert(0);
        if next > *entry {
            *entry = next;
        }
    }

    /// Whether the character with this id has been incorporated.
    pub fn contains(&self, id: &ItemId) -> bool {
        id.counter < self.get(&id.client)
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(|&n| n == 0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ClientId, &u64)> {
        self.0.iter()
    }

    /// Serialize to the binary wire form.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| CodecError::Encode(e.to_string()))
    }

    /// Deserialize from the binary wire form.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let (sv, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| CodecError::Decode(e.to_string()))?;
        Ok(sv)
    }
}

/// One inserted run: `text` was inserted immediately after the character
/// `origin` (`None` = at the beginning of the document).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunInsert {
    pub id: ItemId,
    pub origin: Option<ItemId>,
    /// Lamport timestamp of the inserting operation: strictly greater than
    /// every timestamp the inserting replica had seen. Orders concurrent
    /// siblings; `id.counter` stays purely a state-vector coordinate.
    pub clock: u64,
    pub text: String,
}

impl RunInsert {
    /// Character count of the run.
    pub fn len(&self) -> u64 {
        self.text.chars().count() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Drop the first `offset` characters, keeping the remainder as a valid
    /// run (used to clip portions the receiver already has).
    pub fn clip_front(&self, offset: u64) -> RunInsert {
        debug_assert!(offset > 0 && offset < self.len());
        RunInsert {
            id: self.id.advance(offset),
            origin: Some(self.id.advance(offset - 1)),
            clock: self.clock,
            text: self.text.chars().skip(offset as usize).collect(),
        }
    }
}

/// A contiguous range of tombstoned characters from one client.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeleteRange {
    pub start: ItemId,
    pub len: u64,
}

impl DeleteRange {
    pub fn new(start: ItemId, len: u64) -> Self {
        Self { start, len }
    }

    /// Id one past the end of the range.
    pub fn end(&self) -> u64 {
        self.start.counter + self.len
    }
}

/// A causally-ordered document delta.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Update {
    /// Newly inserted runs, in document order (origins precede their runs).
    pub inserts: Vec<RunInsert>,
    /// Tombstoned ranges. Idempotent — full delete sets are re-sent in diffs.
    pub deletes: Vec<DeleteRange>,
    /// The emitter's state vector at emission time.
    pub state: StateVector,
}

impl Update {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.deletes.is_empty()
    }

    /// Serialize to the binary wire form.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| CodecError::Encode(e.to_string()))
    }

    /// Deserialize from the binary wire form.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let (update, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| CodecError::Decode(e.to_string()))?;
        Ok(update)
    }
}

/// Errors from the update codec.
#[derive(Debug, Clone)]
pub enum CodecError {
    Encode(String),
    Decode(String),
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Encode(e) => write!(f, "update encode error: {e}"),
            Self::Decode(e) => write!(f, "update decode error: {e}"),
        }
    }
}

impl std::error::Error for CodecError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(client: ClientId, counter: u64) -> ItemId {
        ItemId::new(client, counter)
    }

    #[test]
    fn test_state_vector_defaults_to_zero() {
        let sv = StateVector::new();
        assert_eq!(sv.get(&Uuid::new_v4()), 0);
        assert!(sv.is_empty());
    }

    #[test]
    fn test_state_vector_set_is_monotonic() {
        let client = Uuid::new_v4();
        let mut sv = StateVector::new();
        sv.set(client, 5);
        sv.set(client, 3); // stale, ignored
        assert_eq!(sv.get(&client), 5);
        assert!(sv.contains(&id(client, 4)));
        assert!(!sv.contains(&id(client, 5)));
    }

    #[test]
    fn test_state_vector_roundtrip() {
        let mut sv = StateVector::new();
        sv.set(Uuid::new_v4(), 7);
        sv.set(Uuid::new_v4(), 42);
        let bytes = sv.encode().unwrap();
        assert_eq!(StateVector::decode(&bytes).unwrap(), sv);
    }

    #[test]
    fn test_update_roundtrip() {
        let client = Uuid::new_v4();
        let mut state = StateVector::new();
        state.set(client, 5);
        let update = Update {
            inserts: vec![RunInsert {
                id: id(client, 0),
                origin: None,
                clock: 1,
                text: "hello".into(),
            }],
            deletes: vec![DeleteRange::new(id(client, 2), 2)],
            state,
        };
        let bytes = update.encode().unwrap();
        assert_eq!(Update::decode(&bytes).unwrap(), update);
    }

    #[test]
    fn test_update_decode_garbage_fails() {
        assert!(Update::decode(&[0xFF, 0xFE, 0xFD]).is_err());
        assert!(StateVector::decode(&[0xFF]).is_err());
    }

    #[test]
    fn test_run_insert_clip_front() {
        let client = Uuid::new_v4();
        let run = RunInsert {
            id: id(client, 10),
            origin: None,
            clock: 7,
            text: "abcde".into(),
        };
        let clipped = run.clip_front(2);
        assert_eq!(clipped.id, id(client, 12));
        assert_eq!(clipped.origin, Some(id(client, 11)));
        assert_eq!(clipped.clock, 7);
        assert_eq!(clipped.text, "cde");
    }

    #[test]
    fn test_empty_update() {
        let update = Update::default();
        assert!(update.is_empty());
        let bytes = update.encode().unwrap();
        assert!(Update::decode(&bytes).unwrap().is_empty());
    }
}
