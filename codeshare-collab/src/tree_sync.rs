//! File Tree Synchronizer.
//!
//! Local structural edits are checked against the lock policy, applied to the
//! local [`ItemStore`] and then written to the [`SharedDoc`] in one
//! transaction. A failed document write rolls the local change back. The document tags them [`Origin::Local`](crate::doc::Origin),
//! so the session's observer never feeds them back into the local store.
//!
//! Remote changes to the file list go through [`TreeSync::rebuild`], which
//! replaces the local list wholesale from the document and then runs tab
//! eviction for folders that became expand-locked.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use codeshare_core::{
    lock, FileRecord, Item, ItemId, ItemKind, ItemStore, ItemTree, LockField, LockOutcome,
    PolicyError, ProjectDescriptor, SessionRole, StoreError as ItemStoreError, TabState,
};
use thiserror::Error;

use crate::doc::{DocError, SharedDoc};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Items(#[from] ItemStoreError),

    #[error(transparent)]
    Doc(#[from] DocError),
}

/// The local side of a project: descriptor, authoritative item list and the
/// participant's open tabs.
#[derive(Debug, Clone, Default)]
pub struct LocalProject {
    pub descriptor: Option<ProjectDescriptor>,
    pub store: ItemStore,
    pub tabs: TabState,
}

impl LocalProject {
    pub fn new(descriptor: Option<ProjectDescriptor>, items: Vec<Item>) -> Self {
        Self {
            descriptor,
            store: ItemStore::from_items(items),
            tabs: TabState::new(),
        }
    }

    pub fn into_shared(self) -> SharedProject {
        Arc::new(Mutex::new(self))
    }
}

pub type SharedProject = Arc<Mutex<LocalProject>>;

/// Outcome of a remote rebuild.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebuildReport {
    pub items: usize,
    /// Tabs closed because their item vanished or became expand-locked.
    pub closed_tabs: Vec<ItemId>,
}

#[derive(Clone)]
pub struct TreeSync {
    doc: Arc<SharedDoc>,
    project: SharedProject,
    role: SessionRole,
}

impl TreeSync {
    pub fn new(doc: Arc<SharedDoc>, project: SharedProject, role: SessionRole) -> Self {
        Self { doc, project, role }
    }

    pub fn doc(&self) -> &Arc<SharedDoc> {
        &self.doc
    }

    pub fn role(&self) -> SessionRole {
        self.role
    }

    fn project(&self) -> MutexGuard<'_, LocalProject> {
        self.project.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Snapshot of the local item list.
    pub fn items(&self) -> Vec<Item> {
        self.project().store.items().to_vec()
    }

    pub fn item(&self, id: &ItemId) -> Option<Item> {
        self.project().store.get(id).cloned()
    }

    pub fn tabs(&self) -> TabState {
        self.project().tabs.clone()
    }

    pub fn descriptor(&self) -> Option<ProjectDescriptor> {
        self.project().descriptor.clone()
    }

    fn check(&self, target: Option<&FileRecord>) -> Result<(), PolicyError> {
        lock::check_mutation(self.role, self.doc.project_locked(), target).inspect_err(|e| {
            log::warn!("Rejected structural change: {e}");
        })
    }

    fn record_of(&self, id: &ItemId) -> Result<FileRecord, PolicyError> {
        self.project()
            .store
            .get(id)
            .map(|i| i.record.clone())
            .ok_or(PolicyError::NotFound(*id))
    }

    fn parent_record(&self, parent: Option<ItemId>) -> Result<Option<FileRecord>, PolicyError> {
        parent.map(|pid| self.record_of(&pid)).transpose()
    }

    /// Apply `local` to the project, then `shared` to the document. The
    /// project stays locked throughout and is restored if `shared` fails.
    fn commit<T, R>(
        &self,
        local: impl FnOnce(&mut LocalProject) -> Result<T, SyncError>,
        shared: impl FnOnce(&SharedDoc, &T) -> Result<R, DocError>,
    ) -> Result<T, SyncError> {
        let mut project = self.project();
        let saved = (project.store.clone(), project.tabs.clone());
        let value = local(&mut *project)?;
        if let Err(e) = shared(&*self.doc, &value) {
            log::warn!("Document write failed, local change reverted: {e}");
            let (store, tabs) = saved;
            project.store = store;
            project.tabs = tabs;
            return Err(e.into());
        }
        Ok(value)
    }

    // ─── Structural operations ────────────────────────────────────────

    /// Add a fully formed item (record plus initial content).
    pub fn add_item(&self, item: Item) -> Result<ItemId, SyncError> {
        let parent = self.parent_record(item.parent_id())?;
        self.check(parent.as_ref())?;

        let id = self.commit(
            |project| Ok(project.store.insert(item.clone())?),
            |doc, _| doc.insert_item(&item),
        )?;
        log::debug!("Added {} {}", item.record.kind.as_str(), item.name());
        Ok(id)
    }

    /// Allocate a new empty file or folder under `parent`.
    pub fn create_item(
        &self,
        parent: Option<ItemId>,
        kind: ItemKind,
        name: &str,
    ) -> Result<ItemId, SyncError> {
        self.add_item(Item::new(FileRecord::new(parent, kind, name), ""))
    }

    /// Remove an item and its whole subtree. Returns the removed ids.
    pub fn remove_item(&self, id: &ItemId) -> Result<Vec<ItemId>, SyncError> {
        let record = self.record_of(id)?;
        self.check(Some(&record))?;

        let removed = self.commit(
            |project| {
                let removed = project.store.delete_item(id)?;
                let gone: HashSet<&ItemId> = removed.iter().collect();
                project.tabs.retain(|tab| !gone.contains(tab));
                Ok(removed)
            },
            |doc, removed| doc.remove_items(removed),
        )?;
        log::debug!("Removed {} item(s) under {id}", removed.len());
        Ok(removed)
    }

    pub fn rename_item(&self, id: &ItemId, new_name: &str) -> Result<(), SyncError> {
        let record = self.record_of(id)?;
        self.check(Some(&record))?;

        self.commit(
            |project| Ok(project.store.rename_item(id, new_name)?.record.clone()),
            |doc, updated| doc.update_record(updated),
        )?;
        Ok(())
    }

    /// Reparent `id` under `new_parent` (`None` = root). Both the item and
    /// its destination must be unlocked for a guest.
    pub fn move_item(&self, id: &ItemId, new_parent: Option<ItemId>) -> Result<(), SyncError> {
        let record = self.record_of(id)?;
        self.check(Some(&record))?;
        let destination = self.parent_record(new_parent)?;
        self.check(destination.as_ref())?;

        self.commit(
            |project| Ok(project.store.move_item(id, new_parent)?.record.clone()),
            |doc, updated| doc.update_record(updated),
        )?;
        Ok(())
    }

    // ─── Content ──────────────────────────────────────────────────────

    fn check_edit(&self, id: &ItemId) -> Result<(), PolicyError> {
        let record = self.record_of(id)?;
        lock::check_edit(self.role, self.doc.project_locked(), &record).inspect_err(|e| {
            log::warn!("Rejected edit of {id}: {e}");
        })
    }

    pub fn set_content(&self, id: &ItemId, content: &str) -> Result<(), SyncError> {
        self.check_edit(id)?;
        self.commit(
            |project| Ok(project.store.set_content(id, content)?),
            |doc, _| doc.set_content(id, content),
        )?;
        Ok(())
    }

    /// Splice the shared text at a char offset and mirror the result locally.
    pub fn edit_content(
        &self,
        id: &ItemId,
        index: usize,
        delete: usize,
        insert: &str,
    ) -> Result<(), SyncError> {
        self.check_edit(id)?;
        self.doc.edit_content(id, index, delete, insert)?;
        self.refresh_content(id);
        Ok(())
    }

    /// Copy a file's shared text into the local store.
    pub fn refresh_content(&self, id: &ItemId) {
        let Some(content) = self.doc.content(id) else {
            return;
        };
        let mut project = self.project();
        if let Some(item) = project.store.get_mut(id) {
            if !item.is_folder() && item.content != content {
                item.content = content;
            }
        }
    }

    // ─── Locks ────────────────────────────────────────────────────────

    /// Set one lock field. On a fresh expand-lock, this participant's tabs
    /// under the folder are closed (never the host's).
    pub fn set_lock(
        &self,
        id: &ItemId,
        field: LockField,
        value: bool,
    ) -> Result<LockOutcome, SyncError> {
        let project_locked = self.doc.project_locked();
        self.commit(
            |project| {
                let outcome = lock::set_lock(
                    project.store.items_mut(),
                    self.role,
                    project_locked,
                    id,
                    field,
                    value,
                )?;
                if outcome.newly_expand_locked {
                    let LocalProject { store, tabs, .. } = project;
                    let tree = ItemTree::new(store.items());
                    lock::evict_tabs(&tree, id, tabs, self.role);
                }
                Ok(outcome)
            },
            |doc, outcome| doc.update_record(&outcome.record),
        )
    }

    /// Project-wide lock. Host only.
    pub fn set_project_lock(&self, locked: bool) -> Result<(), SyncError> {
        if !self.role.is_host() {
            log::warn!("Rejected project lock change: not the host");
            return Err(PolicyError::HostOnly.into());
        }
        self.doc.set_project_locked(locked)?;
        log::info!("Project lock {}", if locked { "set" } else { "cleared" });
        Ok(())
    }

    // ─── Tabs ─────────────────────────────────────────────────────────

    /// Open a tab for a file. A guest cannot open files under an
    /// expand-locked folder.
    pub fn open_tab(&self, id: &ItemId) -> Result<(), SyncError> {
        let mut project = self.project();
        let item = project.store.get(id).ok_or(PolicyError::NotFound(*id))?;
        if item.is_folder() {
            return Err(ItemStoreError::NotAFile(*id).into());
        }
        if !self.role.is_host() {
            let tree = ItemTree::new(project.store.items());
            let blocked = tree
                .iter()
                .filter(|i| i.is_folder() && i.record.is_expand_locked)
                .find(|folder| tree.is_descendant(id, &folder.id()));
            if let Some(folder) = blocked {
                let folder = folder.id();
                log::warn!("Rejected opening {id}: folder {folder} is expand-locked");
                return Err(PolicyError::ItemLocked(folder).into());
            }
        }
        project.tabs.open(*id);
        Ok(())
    }

    pub fn close_tab(&self, id: &ItemId) -> bool {
        self.project().tabs.close(id)
    }

    // ─── Remote side ──────────────────────────────────────────────────

    /// Replace the local item list from the document.
    ///
    /// Idempotent: rebuilding twice from the same document state leaves the
    /// same list and the same tabs.
    pub fn rebuild(&self) -> RebuildReport {
        let items = self.doc.items();
        let mut project = self.project();
        let before = project.store.items().to_vec();
        project.store.replace_all(items);

        let LocalProject { store, tabs, .. } = &mut *project;
        let tree = ItemTree::new(store.items());
        let mut closed = tabs.retain(|tab| tree.get(tab).is_some_and(|i| !i.is_folder()));
        for folder in lock::newly_expand_locked(&before, store.items()) {
            closed.extend(lock::evict_tabs(&tree, &folder, tabs, self.role));
        }

        log::debug!(
            "Rebuilt local tree: {} item(s), {} tab(s) closed",
            store.len(),
            closed.len()
        );
        RebuildReport {
            items: store.len(),
            closed_tabs: closed,
        }
    }

    /// Copy the shared project descriptor into the local project.
    pub fn mirror_project(&self) -> bool {
        let Some(shared) = self.doc.project() else {
            return false;
        };
        let mut project = self.project();
        if project.descriptor.as_ref() == Some(&shared) {
            return false;
        }
        log::info!("Mirroring shared project {} ({})", shared.name, shared.id);
        project.descriptor = Some(shared);
        true
    }
}
