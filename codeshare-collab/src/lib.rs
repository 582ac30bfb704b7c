//! # codeshare-collab — Real-time collaboration layer for Codeshare
//!
//! Keeps a shared file tree, per-file text and session metadata converged
//! across peers with a Yrs CRDT, and tracks who is present.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐   Transport (memory / ws)   ┌─────────────┐
//! │ CollabSession │ ◄──────────────────────────► │ RelayServer │
//! │  (per user)   │       Binary Proto           │  (central)  │
//! └──┬─────────┬──┘                              └──────┬──────┘
//!    │         │                                        │
//!    ▼         ▼                                        ▼
//! ┌──────────┐ ┌──────────────┐                  ┌─────────────┐
//! │ TreeSync │ │ PresenceRoom │                  │ Yrs Doc     │
//! └────┬─────┘ └──────────────┘                  │ (replica)   │
//!      ▼                                         └──────┬──────┘
//! ┌──────────┐                                          │
//! │SharedDoc │                                  ┌───────┴───────┐
//! │ (Yrs)    │                                  │ BroadcastGroup│
//! └──────────┘                                  └───────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — Binary wire protocol (bincode-encoded SyncMessage)
//! - [`broadcast`] — Room-based fan-out with backpressure
//! - [`transport`] — In-process and WebSocket peer links
//! - [`doc`] — Shared document layout: files, texts, session meta
//! - [`tree_sync`] — Policy-checked mutations mirrored into the local store
//! - [`binding`] — Editor buffer to shared text handshake
//! - [`presence`] — Collaborator awareness
//! - [`session`] — Host/guest session lifecycle
//! - [`server`] — WebSocket relay
//! - [`storage`] — RocksDB snapshots, session descriptor, UI state

pub mod binding;
pub mod broadcast;
pub mod doc;
pub mod presence;
pub mod protocol;
pub mod server;
pub mod session;
pub mod storage;
pub mod transport;
pub mod tree_sync;

// Re-exports for convenience
pub use binding::{bind_content, TextBinding};
pub use broadcast::{BroadcastGroup, BroadcastStats, RoomManager};
pub use doc::{ChangeScope, DocChange, DocError, Origin, SessionStatus, SharedDoc};
pub use presence::{
    AwarenessMessage, Cursor, CursorColor, PresencePatch, PresenceRecord, PresenceRoom,
};
pub use protocol::{MessageType, PeerInfo, ProtocolError, SyncMessage};
pub use server::{RelayServer, ServerConfig, ServerStats};
pub use session::{
    probe_session, CollabSession, SessionConfig, SessionContext, SessionDescriptor,
    SessionError, SessionState,
};
pub use storage::{LocalStore, SnapshotMetadata, StoreConfig, StoreError, UiSnapshotWriter};
pub use transport::{MemoryHub, Transport, TransportLink, WsTransport};
pub use tree_sync::{LocalProject, RebuildReport, SharedProject, SyncError, TreeSync};
