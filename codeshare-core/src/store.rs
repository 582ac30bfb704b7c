//! Local authoritative item list for one project.
//!
//! Structural edits made by the local user land here first; the collaboration
//! layer mirrors them into the replicated document and, for remote changes,
//! replaces the whole list via [`ItemStore::replace_all`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{FileRecord, Item, ItemId, ItemKind};
use crate::tree::ItemTree;
use crate::language;

/// Errors from structural edits on the local item list.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Item not found: {0}")]
    NotFound(ItemId),

    #[error("Invalid name: {0:?}")]
    InvalidName(String),

    #[error("Parent is not a folder: {0}")]
    NotAFolder(ItemId),

    #[error("Name already taken in target folder: {0}")]
    NameTaken(String),

    #[error("Cannot move {0} into its own subtree")]
    Cycle(ItemId),

    #[error("Content can only be set on files: {0}")]
    NotAFile(ItemId),
}

/// Check that `name` is a single path segment.
pub fn validate_name(name: &str) -> Result<(), StoreError> {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed != name || name == "." || name == ".." || name.contains('/')
    {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Ordered, id-unique list of items.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStore {
    items: Vec<Item>,
}

impl ItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from an existing list, dropping duplicate ids (last wins).
    pub fn from_items(items: Vec<Item>) -> Self {
        let mut store = Self::new();
        store.replace_all(items);
        store
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    /// In-place access for field edits such as lock toggles. The slice
    /// cannot add or remove items.
    pub fn items_mut(&mut self) -> &mut [Item] {
        &mut self.items
    }

    pub fn into_items(self) -> Vec<Item> {
        self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: &ItemId) -> Option<&Item> {
        self.items.iter().find(|i| i.id() == *id)
    }

    pub fn get_mut(&mut self, id: &ItemId) -> Option<&mut Item> {
        self.items.iter_mut().find(|i| i.id() == *id)
    }

    /// Direct children of `parent` (`None` = root).
    pub fn children(&self, parent: Option<ItemId>) -> Vec<&Item> {
        self.items
            .iter()
            .filter(|i| i.parent_id() == parent)
            .collect()
    }

    /// Create a file or folder under `parent` and return its new id.
    pub fn create_item(
        &mut self,
        parent: Option<ItemId>,
        kind: ItemKind,
        name: &str,
    ) -> Result<ItemId, StoreError> {
        let item = Item::new(FileRecord::new(parent, kind, name), "");
        self.insert(item)
    }

    /// Insert a fully-formed item after validating its placement.
    pub fn insert(&mut self, item: Item) -> Result<ItemId, StoreError> {
        validate_name(item.name())?;
        self.check_parent(item.parent_id())?;
        self.check_sibling_free(item.parent_id(), item.name(), None)?;

        let id = item.id();
        self.items.push(item);
        Ok(id)
    }

    /// Rename in place; the language tag follows the new extension.
    pub fn rename_item(&mut self, id: &ItemId, new_name: &str) -> Result<&Item, StoreError> {
        validate_name(new_name)?;
        let parent = self.get(id).ok_or(StoreError::NotFound(*id))?.parent_id();
        self.check_sibling_free(parent, new_name, Some(*id))?;

        let item = self.get_mut(id).ok_or(StoreError::NotFound(*id))?;
        item.record.name = new_name.to_string();
        if item.record.is_file() {
            item.record.language = language::language_for(new_name).to_string();
        }
        Ok(item)
    }

    /// Reparent `id` under `new_parent` (`None` = root).
    pub fn move_item(
        &mut self,
        id: &ItemId,
        new_parent: Option<ItemId>,
    ) -> Result<&Item, StoreError> {
        let name = self
            .get(id)
            .ok_or(StoreError::NotFound(*id))?
            .name()
            .to_string();
        self.check_parent(new_parent)?;
        if let Some(target) = new_parent {
            let tree = ItemTree::new(&self.items);
            if target == *id || tree.is_descendant(&target, id) {
                return Err(StoreError::Cycle(*id));
            }
        }
        self.check_sibling_free(new_parent, &name, Some(*id))?;

        let item = self.get_mut(id).ok_or(StoreError::NotFound(*id))?;
        item.record.parent_id = new_parent;
        Ok(item)
    }

    /// Remove `id` and its whole subtree. Returns every removed id.
    pub fn delete_item(&mut self, id: &ItemId) -> Result<Vec<ItemId>, StoreError> {
        if self.get(id).is_none() {
            return Err(StoreError::NotFound(*id));
        }
        let mut removed = {
            let tree = ItemTree::new(&self.items);
            tree.descendants(id)
        };
        removed.push(*id);
        self.items.retain(|i| !removed.contains(&i.id()));
        Ok(removed)
    }

    pub fn set_content(&mut self, id: &ItemId, content: &str) -> Result<(), StoreError> {
        let item = self.get_mut(id).ok_or(StoreError::NotFound(*id))?;
        if item.is_folder() {
            return Err(StoreError::NotAFile(*id));
        }
        item.content = content.to_string();
        item.record.is_binary = false;
        Ok(())
    }

    /// Replace the whole list (remote rebuild). Duplicate ids: last wins.
    pub fn replace_all(&mut self, items: Vec<Item>) {
        let mut seen = std::collections::HashSet::with_capacity(items.len());
        let mut unique: Vec<Item> = Vec::with_capacity(items.len());
        for item in items.into_iter().rev() {
            if seen.insert(item.id()) {
                unique.push(item);
            }
        }
        unique.reverse();
        self.items = unique;
    }

    fn check_parent(&self, parent: Option<ItemId>) -> Result<(), StoreError> {
        if let Some(pid) = parent {
            let parent = self.get(&pid).ok_or(StoreError::NotFound(pid))?;
            if !parent.is_folder() {
                return Err(StoreError::NotAFolder(pid));
            }
        }
        Ok(())
    }

    fn check_sibling_free(
        &self,
        parent: Option<ItemId>,
        name: &str,
        except: Option<ItemId>,
    ) -> Result<(), StoreError> {
        let taken = self
            .items
            .iter()
            .any(|i| i.parent_id() == parent && i.name() == name && Some(i.id()) != except);
        if taken {
            return Err(StoreError::NameTaken(name.to_string()));
        }
        Ok(())
    }
}
