//! # codeshare-core — project model and rule layer
//!
//! Everything here is synchronous and free of I/O except the debouncer,
//! which only needs a tokio runtime for its timers.
//!
//! ```text
//! ┌───────────┐  replace_all   ┌─────────────┐   path_of    ┌───────────┐
//! │ ItemStore │ ◄───────────── │ collab sync │ ───────────► │ ItemTree  │
//! │ (local)   │                └──────┬──────┘              │ (arena)   │
//! └─────┬─────┘                       │ set_lock            └─────┬─────┘
//!       │                             ▼                           │
//!       │                      ┌─────────────┐   evict_tabs       │
//!       └────────────────────► │ lock policy │ ◄──────────────────┘
//!                              └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`model`] — file records, items, project descriptors, roles
//! - [`store`] — local authoritative item list with validated edits
//! - [`tree`] — id-indexed arena with memoised path resolution
//! - [`lock`] — lock policy engine (coupling, permission checks, tab eviction)
//! - [`tabs`] — open-tab state and the per-project UI snapshot
//! - [`language`] — extension → language tag
//! - [`debounce`] — keyed tokio debouncer

pub mod debounce;
pub mod language;
pub mod lock;
pub mod model;
pub mod store;
pub mod tabs;
pub mod tree;

pub use debounce::Debouncer;
pub use lock::{LockField, LockOutcome, PolicyError};
pub use model::{
    now_millis, FileRecord, Item, ItemId, ItemKind, ProjectDescriptor, SessionRole,
};
pub use store::{ItemStore, StoreError};
pub use tabs::{TabState, UiSnapshot};
pub use tree::ItemTree;
