//! # padsync — room-scoped CRDT synchronization engine
//!
//! Multiplayer plain-text editing over WebSockets: one replicated document
//! per room, incremental delta propagation, presence (awareness), and
//! state-vector resynchronization after disconnects.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket      ┌─────────────┐
//! │ SyncClient  │ ◄─────────────────► │ SyncServer  │
//! │ (per user)  │     Binary Proto    │ (relay)     │
//! └──────┬──────┘                     └──────┬──────┘
//!        │                                   │
//!        ▼                                   ▼
//! ┌─────────────┐                     ┌─────────────┐
//! │ TextCrdt    │                     │ Room        │
//! │ (local)     │                     │  TextCrdt   │
//! └─────────────┘                     │  Awareness  │
//!                                     │  Broadcast  │
//!                                     └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`crdt`] — from-scratch RGA-style sequence CRDT (runs, tombstones,
//!   state vectors, diffs)
//! - [`protocol`] — binary wire protocol (bincode-encoded [`SyncMessage`])
//! - [`awareness`] — last-write-wins presence table with expiry
//! - [`broadcast`] — room fan-out with bounded per-session queues
//! - [`room`] — room registry with lazy creation and empty-room eviction
//! - [`server`] — WebSocket relay server
//! - [`client`] — WebSocket client with offline queue and resync
//! - [`exec`] — interface types for the external code-execution service

pub mod awareness;
pub mod broadcast;
pub mod client;
pub mod crdt;
pub mod exec;
pub mod protocol;
pub mod room;
pub mod server;

// Re-exports for convenience
pub use awareness::{AwarenessTable, AwarenessUpdate};
pub use broadcast::{BroadcastGroup, BroadcastStats, FrameKind};
pub use client::{ConnectionState, OfflineQueue, SyncClient, SyncEvent};
pub use crdt::{ClientId, ItemId, StateVector, TextCrdt, Update};
pub use exec::{ExecError, ExecOutput, ExecRequest, ExecService};
pub use protocol::{MessageType, PeerInfo, ProtocolError, SyncMessage};
pub use room::{Room, RoomRegistry};
pub use server::{ServerConfig, ServerStats, SyncServer};
