//! Structural project operations keeping registry and stores consistent.
//!
//! Ordering rules:
//! - create / import: write the store first, then the registry entry;
//! - delete: remove the store first, then the registry entry;
//! - rename / save: bump `lastModified` in the registry.

use codeshare_core::{Item, ProjectDescriptor};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::fs::FileSystem;
use crate::reconciler::{LoadOptions, Reconciler, SyncReport};
use crate::registry::{ProjectRegistry, RegistryError};
use crate::templates;

/// Template label recorded for imported projects.
pub const IMPORTED: &str = "imported";

pub struct ProjectManager<F> {
    reconciler: Reconciler<F>,
    // Serialises registry read-modify-write cycles.
    registry_lock: Mutex<()>,
}

fn validate_name(name: &str) -> Result<String, RegistryError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(RegistryError::InvalidName(name.to_string()));
    }
    Ok(trimmed.to_string())
}

impl<F: FileSystem> ProjectManager<F> {
    pub fn new(fs: F) -> Self {
        Self::with_options(fs, LoadOptions::default())
    }

    pub fn with_options(fs: F, options: LoadOptions) -> Self {
        Self {
            reconciler: Reconciler::with_options(fs, options),
            registry_lock: Mutex::new(()),
        }
    }

    pub fn reconciler(&self) -> &Reconciler<F> {
        &self.reconciler
    }

    pub async fn list(&self) -> Result<Vec<ProjectDescriptor>, RegistryError> {
        Ok(ProjectRegistry::load(self.reconciler.fs()).await?.list().to_vec())
    }

    pub async fn get(&self, id: &Uuid) -> Result<Option<ProjectDescriptor>, RegistryError> {
        Ok(ProjectRegistry::load(self.reconciler.fs())
            .await?
            .get(id)
            .cloned())
    }

    /// Create a project from a template.
    pub async fn create(
        &self,
        name: &str,
        template: &str,
    ) -> Result<ProjectDescriptor, RegistryError> {
        let name = validate_name(name)?;
        let items = templates::items(template, &name)
            .ok_or_else(|| RegistryError::UnknownTemplate(template.to_string()))?;
        self.add(ProjectDescriptor::new(name, template), &items).await
    }

    /// Create a project from an existing item list.
    pub async fn import(
        &self,
        name: &str,
        items: &[Item],
    ) -> Result<ProjectDescriptor, RegistryError> {
        let name = validate_name(name)?;
        self.add(ProjectDescriptor::new(name, IMPORTED), items).await
    }

    async fn add(
        &self,
        descriptor: ProjectDescriptor,
        items: &[Item],
    ) -> Result<ProjectDescriptor, RegistryError> {
        let _guard = self.registry_lock.lock().await;
        let key = descriptor.id.to_string();
        self.reconciler.sync(&key, items).await?;

        let fs = self.reconciler.fs();
        let mut registry = match ProjectRegistry::load(fs).await {
            Ok(registry) => registry,
            Err(e) => {
                // Do not leave a store behind that no registry entry names.
                if let Err(cleanup) = self.reconciler.remove_project(&key).await {
                    log::error!("Failed to roll back store for {key}: {cleanup}");
                }
                return Err(e);
            }
        };
        registry.upsert(descriptor.clone());
        registry.save(fs).await?;

        log::info!(
            "Created project {} ({}) from {}",
            descriptor.name,
            descriptor.id,
            descriptor.template
        );
        Ok(descriptor)
    }

    pub async fn rename(&self, id: &Uuid, name: &str) -> Result<ProjectDescriptor, RegistryError> {
        let name = validate_name(name)?;
        let _guard = self.registry_lock.lock().await;
        let fs = self.reconciler.fs();
        let mut registry = ProjectRegistry::load(fs).await?;
        let descriptor = registry.get_mut(id).ok_or(RegistryError::NotFound(*id))?;
        descriptor.name = name;
        descriptor.touch();
        let updated = descriptor.clone();
        registry.save(fs).await?;
        Ok(updated)
    }

    pub async fn delete(&self, id: &Uuid) -> Result<(), RegistryError> {
        let _guard = self.registry_lock.lock().await;
        let fs = self.reconciler.fs();
        let mut registry = ProjectRegistry::load(fs).await?;
        if registry.get(id).is_none() {
            return Err(RegistryError::NotFound(*id));
        }

        self.reconciler.remove_project(&id.to_string()).await?;
        registry.remove(id);
        registry.save(fs).await?;
        log::info!("Deleted project {id}");
        Ok(())
    }

    /// Load a registered project's items.
    pub async fn open(&self, id: &Uuid) -> Result<Vec<Item>, RegistryError> {
        if self.get(id).await?.is_none() {
            return Err(RegistryError::NotFound(*id));
        }
        Ok(self.reconciler.load(&id.to_string()).await?)
    }

    /// Reconcile a registered project's store with `items`.
    pub async fn save(&self, id: &Uuid, items: &[Item]) -> Result<SyncReport, RegistryError> {
        let _guard = self.registry_lock.lock().await;
        let fs = self.reconciler.fs();
        let mut registry = ProjectRegistry::load(fs).await?;
        if registry.get(id).is_none() {
            return Err(RegistryError::NotFound(*id));
        }

        let report = self.reconciler.sync(&id.to_string(), items).await?;
        if let Some(descriptor) = registry.get_mut(id) {
            descriptor.touch();
        }
        registry.save(fs).await?;
        Ok(report)
    }
}
