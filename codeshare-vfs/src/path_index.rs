//! Persisted `path → id` table for one project.
//!
//! Lives at `/<project>/.codeshare/ids.json`. It is the only place identity
//! and location are decoupled: a file renamed through `sync` keeps its id on
//! the next `load`.

use std::collections::BTreeMap;

use codeshare_core::ItemId;
use uuid::Uuid;

use crate::fs::{join, FileSystem, FsError, NodeKind};
use crate::reconciler::VfsError;
use crate::META_DIR;

const INDEX_FILE: &str = "ids.json";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathIndex {
    entries: BTreeMap<String, ItemId>,
    dirty: bool,
}

pub fn index_path(project_root: &str) -> String {
    join(&join(project_root, META_DIR), INDEX_FILE)
}

impl PathIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the index for `project_root`. A missing index is empty; an
    /// unreadable one is logged and replaced by an empty, dirty index so the
    /// next save repairs it.
    pub async fn load<F: FileSystem>(fs: &F, project_root: &str) -> Result<Self, FsError> {
        let path = index_path(project_root);
        let bytes = match fs.read_file(&path).await {
            Ok(bytes) => bytes,
            Err(FsError::NotFound(_)) => return Ok(Self::new()),
            Err(e) if e.is_kind_conflict() => {
                log::warn!("Path index {path} is not a file, rebuilding: {e}");
                return Ok(Self::corrupt());
            }
            Err(e) => return Err(e),
        };

        match serde_json::from_slice::<BTreeMap<String, ItemId>>(&bytes) {
            Ok(entries) => Ok(Self {
                entries,
                dirty: false,
            }),
            Err(e) => {
                log::warn!("Path index {path} is corrupt, rebuilding: {e}");
                Ok(Self::corrupt())
            }
        }
    }

    fn corrupt() -> Self {
        Self {
            entries: BTreeMap::new(),
            dirty: true,
        }
    }

    /// Persist if anything changed since load. Returns whether it wrote.
    pub async fn save<F: FileSystem>(
        &mut self,
        fs: &F,
        project_root: &str,
    ) -> Result<bool, VfsError> {
        if !self.dirty {
            return Ok(false);
        }
        let meta_dir = join(project_root, META_DIR);
        if fs.kind(&meta_dir).await? == Some(NodeKind::File) {
            fs.remove(&meta_dir).await?;
        }
        fs.mkdir(&meta_dir).await?;

        let path = index_path(project_root);
        if fs.kind(&path).await? == Some(NodeKind::Dir) {
            fs.remove(&path).await?;
        }
        let json = serde_json::to_vec_pretty(&self.entries)?;
        fs.write_file(&path, &json).await?;
        self.dirty = false;
        Ok(true)
    }

    pub fn get(&self, path: &str) -> Option<ItemId> {
        self.entries.get(path).copied()
    }

    /// Path last recorded for `id`.
    pub fn path_of(&self, id: &ItemId) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, entry)| *entry == id)
            .map(|(path, _)| path.as_str())
    }

    /// Id recorded for `path`, allocating a fresh one for unseen paths.
    pub fn id_for(&mut self, path: &str) -> ItemId {
        if let Some(id) = self.entries.get(path) {
            return *id;
        }
        let id = Uuid::new_v4();
        self.entries.insert(path.to_string(), id);
        self.dirty = true;
        id
    }

    /// Record `path → id`. Marks the index dirty only on change.
    pub fn insert(&mut self, path: &str, id: ItemId) {
        if self.entries.get(path) != Some(&id) {
            self.entries.insert(path.to_string(), id);
            self.dirty = true;
        }
    }

    /// Drop entries whose path fails `keep`.
    pub fn retain<P>(&mut self, mut keep: P)
    where
        P: FnMut(&str) -> bool,
    {
        let before = self.entries.len();
        self.entries.retain(|path, _| keep(path));
        if self.entries.len() != before {
            self.dirty = true;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemoryFs;

    #[tokio::test]
    async fn test_missing_index_is_empty_and_clean() {
        let fs = MemoryFs::new();
        let index = PathIndex::load(&fs, "/p").await.unwrap();
        assert!(index.is_empty());
        assert!(!index.is_dirty());
    }

    #[tokio::test]
    async fn test_save_only_when_changed() {
        let fs = MemoryFs::new();
        fs.mkdir("/p").await.unwrap();

        let mut index = PathIndex::new();
        let id = index.id_for("src/a.move");
        assert_eq!(index.id_for("src/a.move"), id);
        assert!(index.save(&fs, "/p").await.unwrap());
        assert!(!index.save(&fs, "/p").await.unwrap());

        index.insert("src/a.move", id);
        assert!(!index.is_dirty());

        let loaded = PathIndex::load(&fs, "/p").await.unwrap();
        assert_eq!(loaded.get("src/a.move"), Some(id));
    }

    #[tokio::test]
    async fn test_corrupt_index_self_repairs() {
        let fs = MemoryFs::new();
        fs.mkdir("/p/.codeshare").await.unwrap();
        fs.write_file("/p/.codeshare/ids.json", b"{not json").await.unwrap();

        let mut index = PathIndex::load(&fs, "/p").await.unwrap();
        assert!(index.is_empty());
        assert!(index.is_dirty());
        assert!(index.save(&fs, "/p").await.unwrap());

        let repaired = PathIndex::load(&fs, "/p").await.unwrap();
        assert!(!repaired.is_dirty());
    }

    #[tokio::test]
    async fn test_retain_prunes() {
        let mut index = PathIndex::new();
        index.id_for("a");
        index.id_for("b");
        index.save(&MemoryFs::new(), "/").await.unwrap();

        index.retain(|p| p == "a");
        assert_eq!(index.len(), 1);
        assert!(index.is_dirty());
    }
}
