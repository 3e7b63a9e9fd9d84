//! From-scratch sequence CRDT for collaborative plain text.
//!
//! The document is an RGA-style tree of character runs: every run remembers
//! the identifier of the character that was immediately to its left when it
//! was inserted (its *origin*). Document order is the depth-first traversal
//! of that tree with siblings ordered by their insertion timestamps, newest
//! first, client id as the deterministic tiebreak — so replicas that have
//! seen the same set of runs render byte-identical text regardless of
//! delivery order.
//!
//! Deletions tombstone runs instead of removing them, which is what lets an
//! insert that raced with a delete at the same spot survive the merge.
//!
//! - [`update`] — identifiers, state vectors and the wire-level [`Update`]
//! - [`text`] — the mutable replica itself ([`TextCrdt`])

pub mod text;
pub mod update;

pub use text::TextCrdt;
pub use update::{
    ClientId, CodecError, DeleteRange, ItemId, RunInsert, StateVector, Update,
};
