//! Project registry: the ordered list of projects that exist.
//!
//! Persisted at `/.codeshare/projects.json`, independent of any collaboration
//! state.

use codeshare_core::ProjectDescriptor;
use thiserror::Error;
use uuid::Uuid;

use crate::fs::{join, FileSystem, FsError, NodeKind};
use crate::reconciler::VfsError;
use crate::META_DIR;

const REGISTRY_FILE: &str = "projects.json";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Project not found: {0}")]
    NotFound(Uuid),

    #[error("Invalid project name: {0:?}")]
    InvalidName(String),

    #[error("Unknown template: {0}")]
    UnknownTemplate(String),

    #[error("Registry is corrupt: {0}")]
    Corrupt(serde_json::Error),

    #[error(transparent)]
    Vfs(#[from] VfsError),
}

impl From<FsError> for RegistryError {
    fn from(e: FsError) -> Self {
        RegistryError::Vfs(VfsError::Fs(e))
    }
}

pub fn registry_path() -> String {
    join(&join("/", META_DIR), REGISTRY_FILE)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectRegistry {
    projects: Vec<ProjectDescriptor>,
}

impl ProjectRegistry {
    pub async fn load<F: FileSystem>(fs: &F) -> Result<Self, RegistryError> {
        let bytes = match fs.read_file(&registry_path()).await {
            Ok(bytes) => bytes,
            Err(FsError::NotFound(_)) => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        let projects = serde_json::from_slice(&bytes).map_err(RegistryError::Corrupt)?;
        Ok(Self { projects })
    }

    pub async fn save<F: FileSystem>(&self, fs: &F) -> Result<(), RegistryError> {
        let dir = join("/", META_DIR);
        if fs.kind(&dir).await? != Some(NodeKind::Dir) {
            fs.mkdir(&dir).await?;
        }
        let json = serde_json::to_vec_pretty(&self.projects).map_err(VfsError::from)?;
        fs.write_file(&registry_path(), &json).await?;
        Ok(())
    }

    pub fn list(&self) -> &[ProjectDescriptor] {
        &self.projects
    }

    pub fn get(&self, id: &Uuid) -> Option<&ProjectDescriptor> {
        self.projects.iter().find(|p| p.id == *id)
    }

    pub fn get_mut(&mut self, id: &Uuid) -> Option<&mut ProjectDescriptor> {
        self.projects.iter_mut().find(|p| p.id == *id)
    }

    /// Append, or replace an entry with the same id in place.
    pub fn upsert(&mut self, descriptor: ProjectDescriptor) {
        match self.get_mut(&descriptor.id) {
            Some(existing) => *existing = descriptor,
            None => self.projects.push(descriptor),
        }
    }

    pub fn remove(&mut self, id: &Uuid) -> Option<ProjectDescriptor> {
        let pos = self.projects.iter().position(|p| p.id == *id)?;
        Some(self.projects.remove(pos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemoryFs;

    #[tokio::test]
    async fn test_round_trip_keeps_order() {
        let fs = MemoryFs::new();
        let mut registry = ProjectRegistry::load(&fs).await.unwrap();
        assert!(registry.list().is_empty());

        let a = ProjectDescriptor::new("a", "empty");
        let b = ProjectDescriptor::new("b", "move-package");
        registry.upsert(a.clone());
        registry.upsert(b.clone());
        registry.save(&fs).await.unwrap();

        let loaded = ProjectRegistry::load(&fs).await.unwrap();
        let names: Vec<_> = loaded.list().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(loaded.get(&b.id), Some(&b));
    }

    #[tokio::test]
    async fn test_corrupt_registry_is_an_error() {
        let fs = MemoryFs::new();
        fs.mkdir("/.codeshare").await.unwrap();
        fs.write_file("/.codeshare/projects.json", b"[{").await.unwrap();

        assert!(matches!(
            ProjectRegistry::load(&fs).await,
            Err(RegistryError::Corrupt(_))
        ));
    }

    #[test]
    fn test_upsert_and_remove() {
        let mut registry = ProjectRegistry::default();
        let mut a = ProjectDescriptor::new("a", "empty");
        registry.upsert(a.clone());
        a.name = "renamed".into();
        registry.upsert(a.clone());

        assert_eq!(registry.list().len(), 1);
        assert_eq!(registry.get(&a.id).unwrap().name, "renamed");
        assert!(registry.remove(&a.id).is_some());
        assert!(registry.remove(&a.id).is_none());
    }
}
