//! Local durable state.
//!
//! ```text
//! ┌──────────────┐  snapshot on empty room  ┌──────────────────────────────┐
//! │ RelayServer  │ ───────────────────────► │ LocalStore (RocksDB)         │
//! └──────────────┘                          │ CF "documents" LZ4 snapshots │
//! ┌──────────────┐  snapshot, descriptor    │ CF "metadata"  per room      │
//! │ CollabSession│ ───────────────────────► │ CF "settings"  JSON values   │
//! └──────────────┘                          └──────────────────────────────┘
//! ┌──────────────┐  debounced per project          ▲
//! │ UiSnapshot   │ ────────────────────────────────┘
//! │ Writer       │
//! └──────────────┘
//! ```

pub mod rocks;
pub mod ui;

pub use rocks::{LocalStore, SnapshotMetadata, StoreConfig, StoreError};
pub use ui::UiSnapshotWriter;
