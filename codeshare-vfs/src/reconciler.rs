//! Virtual filesystem reconciler.
//!
//! ```text
//!   items[] ──sync──► /<project>/...     (create, update-if-changed, delete orphans)
//!   items[] ◄─load─── /<project>/...     (ids reused via .codeshare/ids.json)
//! ```
//!
//! Reserved top-level entries (`.codeshare`, `.git`) are never written or
//! deleted by `sync` and are hidden from `load` unless asked for.

use std::collections::HashSet;

use codeshare_core::{FileRecord, Item, ItemKind, ItemTree};
use thiserror::Error;

use crate::fs::{join, parent, FileSystem, FsError, NodeKind};
use crate::path_index::PathIndex;
use crate::{META_DIR, VCS_DIR};

#[derive(Debug, Error)]
pub enum VfsError {
    #[error("Filesystem error: {0}")]
    Fs(#[from] FsError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Invalid project key: {0:?}")]
    InvalidProject(String),
}

/// Options for [`Reconciler::load`].
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Surface the embedded `.git` directory as locked, read-only items.
    pub include_vcs: bool,
}

/// What one `sync` pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub dirs_created: usize,
    pub files_written: usize,
    pub files_unchanged: usize,
    pub removed: usize,
    /// Items left out: unresolvable or reserved path, a path already
    /// taken by another item, or a write that failed.
    pub skipped: usize,
}

impl SyncReport {
    /// Mutations made to the store (index writes excluded).
    pub fn writes(&self) -> usize {
        self.dirs_created + self.files_written + self.removed
    }
}

/// Root directory of a project, e.g. `/3f2c…`.
pub fn project_root(project: &str) -> Result<String, VfsError> {
    if project.is_empty()
        || project.contains('/')
        || project == "."
        || project == ".."
        || project == META_DIR
    {
        return Err(VfsError::InvalidProject(project.to_string()));
    }
    Ok(format!("/{project}"))
}

/// Top-level names under a project that `sync` leaves alone.
pub fn is_reserved(rel_path: &str) -> bool {
    let top = rel_path.split('/').next().unwrap_or_default();
    top == META_DIR || top == VCS_DIR
}

fn is_vcs_object(rel_path: &str) -> bool {
    rel_path.starts_with(&format!("{VCS_DIR}/objects/"))
}

fn depth(rel_path: &str) -> usize {
    rel_path.matches('/').count()
}

enum FileOutcome {
    Written,
    Unchanged,
    /// Binary item with nothing on disk to keep.
    Missing,
}

pub struct Reconciler<F> {
    fs: F,
    options: LoadOptions,
}

impl<F: FileSystem> Reconciler<F> {
    pub fn new(fs: F) -> Self {
        Self::with_options(fs, LoadOptions::default())
    }

    pub fn with_options(fs: F, options: LoadOptions) -> Self {
        Self { fs, options }
    }

    pub fn fs(&self) -> &F {
        &self.fs
    }

    /// Read a project back into an item list (pre-order, siblings by name).
    pub async fn load(&self, project: &str) -> Result<Vec<Item>, VfsError> {
        let root = project_root(project)?;
        match self.fs.kind(&root).await? {
            Some(NodeKind::Dir) => {}
            Some(NodeKind::File) => return Err(FsError::NotADirectory(root).into()),
            None => {
                self.fs.mkdir(&root).await?;
                log::info!("Created empty project root {root}");
                return Ok(Vec::new());
            }
        }

        let mut index = PathIndex::load(&self.fs, &root).await?;
        let mut items = Vec::new();

        // (relative path, kind, parent id)
        let mut stack: Vec<(String, NodeKind, Option<uuid::Uuid>)> = Vec::new();
        self.push_children(&root, "", None, &mut stack).await?;

        while let Some((rel, kind, parent_id)) = stack.pop() {
            let id = index.id_for(&rel);
            let name = rel.rsplit('/').next().unwrap_or_default().to_string();
            let abs = join(&root, &rel);
            let in_vcs = is_reserved(&rel);

            let item_kind = match kind {
                NodeKind::Dir => ItemKind::Folder,
                NodeKind::File => ItemKind::File,
            };
            let mut record = FileRecord::with_id(id, parent_id, item_kind, name);
            if in_vcs {
                record.is_locked = true;
                record.is_read_only = true;
            }

            let content = match kind {
                NodeKind::File if is_vcs_object(&rel) => String::new(),
                NodeKind::File => match String::from_utf8(self.fs.read_file(&abs).await?) {
                    Ok(text) => text,
                    Err(_) => {
                        log::debug!("Loading {abs} as binary");
                        record.is_binary = true;
                        String::new()
                    }
                },
                NodeKind::Dir => {
                    self.push_children(&abs, &rel, Some(id), &mut stack).await?;
                    String::new()
                }
            };
            items.push(Item::new(record, content));
        }

        index.save(&self.fs, &root).await?;
        log::debug!("Loaded {} items from {root}", items.len());
        Ok(items)
    }

    async fn push_children(
        &self,
        abs: &str,
        rel: &str,
        parent_id: Option<uuid::Uuid>,
        stack: &mut Vec<(String, NodeKind, Option<uuid::Uuid>)>,
    ) -> Result<(), VfsError> {
        let entries = self.fs.read_dir(abs).await?;
        for entry in entries.into_iter().rev() {
            if rel.is_empty() {
                if entry.name == META_DIR {
                    continue;
                }
                if entry.name == VCS_DIR && !self.options.include_vcs {
                    continue;
                }
            }
            let child = if rel.is_empty() {
                entry.name
            } else {
                format!("{rel}/{}", entry.name)
            };
            stack.push((child, entry.kind, parent_id));
        }
        Ok(())
    }

    /// Make the project store an exact mirror of `items`.
    pub async fn sync(&self, project: &str, items: &[Item]) -> Result<SyncReport, VfsError> {
        let root = project_root(project)?;
        let mut report = SyncReport::default();
        if self.ensure_dir(&root).await? {
            report.dirs_created += 1;
        }

        let mut tree = ItemTree::new(items);
        let mut resolved: Vec<(String, &Item)> = Vec::new();
        let unique: Vec<&Item> = tree.iter().collect();
        for item in unique {
            let Some(rel) = tree.path_of(&item.id()) else {
                log::warn!("Skipping {} ({}): unresolvable path", item.name(), item.id());
                report.skipped += 1;
                continue;
            };
            if is_reserved(&rel) {
                report.skipped += 1;
                continue;
            }
            resolved.push((rel, item));
        }

        // One entry per path; a folder wins over a file of the same name.
        let folder_paths: HashSet<&str> = resolved
            .iter()
            .filter(|(_, item)| item.is_folder())
            .map(|(rel, _)| rel.as_str())
            .collect();
        let mut claimed: HashSet<&str> = HashSet::new();
        let mut folders: Vec<(&str, &Item)> = Vec::new();
        let mut files: Vec<(&str, &Item)> = Vec::new();
        for (rel, item) in &resolved {
            let loses_to_folder = !item.is_folder() && folder_paths.contains(rel.as_str());
            if loses_to_folder || !claimed.insert(rel.as_str()) {
                log::warn!(
                    "Skipping {} ({}): {rel} is already taken",
                    item.name(),
                    item.id()
                );
                report.skipped += 1;
                continue;
            }
            if item.is_folder() {
                folders.push((rel.as_str(), *item));
            } else {
                files.push((rel.as_str(), *item));
            }
        }

        // Parents before children.
        folders.sort_by(|a, b| depth(a.0).cmp(&depth(b.0)).then_with(|| a.0.cmp(b.0)));

        let mut expected: HashSet<String> = HashSet::new();
        for (rel, _) in folders.iter().chain(files.iter()) {
            let mut path = *rel;
            expected.insert(path.to_string());
            while let Some((up, _)) = path.rsplit_once('/') {
                expected.insert(up.to_string());
                path = up;
            }
        }

        let mut failed: HashSet<&str> = HashSet::new();
        for (rel, item) in &folders {
            match self.ensure_dir(&join(&root, rel)).await {
                Ok(true) => report.dirs_created += 1,
                Ok(false) => {}
                Err(e) => {
                    log::warn!("Skipping folder {rel} ({}): {e}", item.id());
                    report.skipped += 1;
                    failed.insert(*rel);
                }
            }
        }

        let mut index = PathIndex::load(&self.fs, &root).await?;
        for (rel, item) in &files {
            let abs = join(&root, rel);
            let previous = index
                .path_of(&item.id())
                .filter(|prev| !claimed.contains(prev))
                .map(|prev| join(&root, prev));
            match self.sync_file(&abs, item, previous.as_deref()).await {
                Ok(FileOutcome::Written) => report.files_written += 1,
                Ok(FileOutcome::Unchanged) => report.files_unchanged += 1,
                Ok(FileOutcome::Missing) => {
                    log::warn!("Skipping binary {abs}: no bytes to restore it from");
                    report.skipped += 1;
                    failed.insert(*rel);
                }
                Err(e) => {
                    log::warn!("Skipping {abs} ({}): {e}", item.id());
                    report.skipped += 1;
                    failed.insert(*rel);
                }
            }
        }

        report.removed = self.remove_orphans(&root, &expected).await?;

        for (rel, item) in folders.iter().chain(files.iter()) {
            if !failed.contains(rel) {
                index.insert(rel, item.id());
            }
        }
        index.retain(|path| expected.contains(path) || is_reserved(path));
        index.save(&self.fs, &root).await?;

        log::debug!(
            "Synced {root}: {} dirs created, {} written, {} unchanged, {} removed, {} skipped",
            report.dirs_created,
            report.files_written,
            report.files_unchanged,
            report.removed,
            report.skipped
        );
        Ok(report)
    }

    /// Bring one file in line with `item`.
    ///
    /// Opaque items have no content to write: their bytes stay where they
    /// are, or are carried over from `previous` after a rename or move.
    async fn sync_file(
        &self,
        abs: &str,
        item: &Item,
        previous: Option<&str>,
    ) -> Result<FileOutcome, VfsError> {
        if item.is_opaque() {
            if self.fs.kind(abs).await? == Some(NodeKind::File) {
                return Ok(FileOutcome::Unchanged);
            }
            let Some(previous) = previous.filter(|prev| *prev != abs) else {
                return Ok(FileOutcome::Missing);
            };
            let bytes = match self.fs.read_file(previous).await {
                Ok(bytes) => bytes,
                Err(FsError::NotFound(_)) => return Ok(FileOutcome::Missing),
                Err(e) if e.is_kind_conflict() => return Ok(FileOutcome::Missing),
                Err(e) => return Err(e.into()),
            };
            self.write_file(abs, &bytes).await?;
            log::debug!("Carried binary {previous} over to {abs}");
            return Ok(FileOutcome::Written);
        }
        let content = item.content.as_bytes();
        let unchanged = match self.fs.read_file(abs).await {
            Ok(existing) => existing == content,
            Err(FsError::NotFound(_)) => false,
            Err(e) if e.is_kind_conflict() => false,
            Err(e) => return Err(e.into()),
        };
        if unchanged {
            return Ok(FileOutcome::Unchanged);
        }
        self.write_file(abs, content).await?;
        Ok(FileOutcome::Written)
    }

    /// Delete every entry under `root` not in `expected`. Returns the count.
    async fn remove_orphans(
        &self,
        root: &str,
        expected: &HashSet<String>,
    ) -> Result<usize, VfsError> {
        let mut removed = 0;
        let mut pending = vec![String::new()];
        while let Some(rel) = pending.pop() {
            let abs = join(root, &rel);
            for entry in self.fs.read_dir(&abs).await? {
                let child = if rel.is_empty() {
                    entry.name
                } else {
                    format!("{rel}/{}", entry.name)
                };
                if rel.is_empty() && is_reserved(&child) {
                    continue;
                }
                if !expected.contains(&child) {
                    self.fs.remove(&join(root, &child)).await?;
                    log::info!("Removed orphan {}", join(root, &child));
                    removed += 1;
                } else if entry.kind == NodeKind::Dir {
                    pending.push(child);
                }
            }
        }
        Ok(removed)
    }

    /// Make sure `path` is a directory. Returns true if anything was created.
    ///
    /// A file standing where the directory belongs is replaced.
    pub async fn ensure_dir(&self, path: &str) -> Result<bool, VfsError> {
        match self.fs.kind(path).await? {
            Some(NodeKind::Dir) => Ok(false),
            Some(NodeKind::File) => {
                log::warn!("Replacing file {path} with a directory");
                self.fs.remove(path).await?;
                self.fs.mkdir(path).await?;
                Ok(true)
            }
            None => {
                self.fs.mkdir(path).await?;
                Ok(true)
            }
        }
    }

    /// Write a file, repairing a kind conflict at `path` once.
    pub async fn write_file(&self, path: &str, content: &[u8]) -> Result<(), VfsError> {
        if let Some(dir) = parent(path) {
            if self.fs.kind(dir).await?.is_none() {
                self.fs.mkdir(dir).await?;
            }
        }
        let err = match self.fs.write_file(path, content).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        if self.fs.kind(path).await? != Some(NodeKind::Dir) {
            return Err(err.into());
        }

        log::warn!("Write to {path} hit a directory ({err}), replacing it");
        self.fs.remove(path).await?;
        self.fs.write_file(path, content).await?;
        Ok(())
    }

    /// Delete the whole project store, metadata included.
    pub async fn remove_project(&self, project: &str) -> Result<(), VfsError> {
        let root = project_root(project)?;
        match self.fs.remove(&root).await {
            Ok(()) | Err(FsError::NotFound(_)) => {
                log::info!("Removed project store {root}");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemoryFs;

    #[test]
    fn test_project_root_validation() {
        assert_eq!(project_root("abc").unwrap(), "/abc");
        assert!(project_root("").is_err());
        assert!(project_root("a/b").is_err());
        assert!(project_root(".codeshare").is_err());
    }

    #[test]
    fn test_reserved_paths() {
        assert!(is_reserved(".git"));
        assert!(is_reserved(".git/HEAD"));
        assert!(is_reserved(".codeshare/ids.json"));
        assert!(!is_reserved("src/.git"));
        assert!(is_vcs_object(".git/objects/ab/cdef"));
        assert!(!is_vcs_object(".git/HEAD"));
    }

    #[tokio::test]
    async fn test_load_missing_project_creates_root() {
        let reconciler = Reconciler::new(MemoryFs::new());
        let items = reconciler.load("p").await.unwrap();
        assert!(items.is_empty());
        assert_eq!(
            reconciler.fs().kind("/p").await.unwrap(),
            Some(NodeKind::Dir)
        );
    }

    #[tokio::test]
    async fn test_write_file_replaces_stale_directory() {
        let reconciler = Reconciler::new(MemoryFs::new());
        reconciler.fs().mkdir("/p/a.move/inner").await.unwrap();

        reconciler.write_file("/p/a.move", b"module").await.unwrap();
        assert_eq!(reconciler.fs().read_file("/p/a.move").await.unwrap(), b"module");
    }

    #[tokio::test]
    async fn test_opaque_item_without_bytes_is_skipped() {
        let reconciler = Reconciler::new(MemoryFs::new());
        let mut logo = Item::file(None, "logo.png", "");
        logo.record.is_binary = true;

        let report = reconciler.sync("p", &[logo]).await.unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.files_written, 0);
        assert!(!reconciler.fs().exists("/p/logo.png").await.unwrap());
    }

    #[tokio::test]
    async fn test_ensure_dir_replaces_stale_file() {
        let reconciler = Reconciler::new(MemoryFs::new());
        reconciler.fs().mkdir("/p").await.unwrap();
        reconciler.fs().write_file("/p/src", b"stale").await.unwrap();

        assert!(reconciler.ensure_dir("/p/src").await.unwrap());
        assert!(!reconciler.ensure_dir("/p/src").await.unwrap());
        assert_eq!(
            reconciler.fs().kind("/p/src").await.unwrap(),
            Some(NodeKind::Dir)
        );
    }
}
