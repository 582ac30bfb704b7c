//! # codeshare-vfs — durable project storage
//!
//! Keeps a path-addressed store an exact mirror of a project's item list and
//! loads it back with stable ids.
//!
//! ```text
//! /
//! ├── .codeshare/projects.json      project registry
//! └── <project-id>/
//!     ├── .codeshare/ids.json       path → id index
//!     ├── .git/                     embedded history (never touched by sync)
//!     └── src/a.move ...            user files
//! ```
//!
//! ## Modules
//!
//! - [`fs`] — `FileSystem` trait, `MemoryFs`, `DiskFs`
//! - [`path_index`] — persisted path ↔ id table
//! - [`reconciler`] — `load` / `sync` / conflict-tolerant `write_file`
//! - [`registry`], [`project`] — project registry and structural operations
//! - [`templates`] — starter content
//! - [`flush`] — debounced per-project flushing

pub mod flush;
pub mod fs;
pub mod path_index;
pub mod project;
pub mod reconciler;
pub mod registry;
pub mod templates;

/// Internal metadata directory (registry at the root, index per project).
pub const META_DIR: &str = ".codeshare";
/// Embedded version-control directory at a project's top level.
pub const VCS_DIR: &str = ".git";

pub use flush::{FlushConfig, FlushScheduler};
pub use fs::{DiskFs, FileSystem, FsError, MemoryFs, NodeKind};
pub use path_index::PathIndex;
pub use project::ProjectManager;
pub use reconciler::{LoadOptions, Reconciler, SyncReport, VfsError};
pub use registry::{ProjectRegistry, RegistryError};
