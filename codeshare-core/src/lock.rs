//! Lock policy engine.
//!
//! Pure rules over the advisory lock fields of a record. Every mutation path
//! (local toggles, structural edits, remote rebuilds) goes through this module
//! so the coupling rules and tab eviction exist exactly once:
//!
//! ```text
//!   isExpandLocked = true   ⇒  isLocked = true
//!   isLocked       = false  ⇒  isExpandLocked = false
//! ```
//!
//! A project-wide lock lives on the shared metadata. While it is set, a guest
//! may not mutate anything; the host is never restricted.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{FileRecord, Item, ItemId, SessionRole};
use crate::tabs::TabState;
use crate::tree::ItemTree;

/// A rejected mutation. Rejections are warnings, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("Project is locked by the host")]
    ProjectLocked,

    #[error("Item {0} is locked")]
    ItemLocked(ItemId),

    #[error("Item {0} is read-only")]
    ReadOnly(ItemId),

    #[error("Item not found: {0}")]
    NotFound(ItemId),

    #[error("Only the host may do this")]
    HostOnly,
}

/// The three per-item advisory flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LockField {
    IsLocked,
    IsReadOnly,
    IsExpandLocked,
}

/// Result of a successful [`set_lock`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockOutcome {
    /// The record after the field and coupling were applied.
    pub record: FileRecord,
    /// Whether a folder went from not expand-locked to expand-locked.
    pub newly_expand_locked: bool,
}

/// Gate for any structural or lock mutation on `target`.
///
/// `target` is `None` for operations that create something at the root.
pub fn check_mutation(
    role: SessionRole,
    project_locked: bool,
    target: Option<&FileRecord>,
) -> Result<(), PolicyError> {
    if role.is_host() {
        return Ok(());
    }
    if project_locked {
        return Err(PolicyError::ProjectLocked);
    }
    match target {
        Some(record) if record.is_locked => Err(PolicyError::ItemLocked(record.id)),
        _ => Ok(()),
    }
}

/// Gate for content edits: as [`check_mutation`], plus the read-only flag.
pub fn check_edit(
    role: SessionRole,
    project_locked: bool,
    target: &FileRecord,
) -> Result<(), PolicyError> {
    check_mutation(role, project_locked, Some(target))?;
    if !role.is_host() && target.is_read_only {
        return Err(PolicyError::ReadOnly(target.id));
    }
    Ok(())
}

/// Set one field and apply coupling. Returns true if the folder became
/// expand-locked.
pub fn apply_field(record: &mut FileRecord, field: LockField, value: bool) -> bool {
    let was_expand_locked = record.is_expand_locked;
    match field {
        LockField::IsLocked => record.is_locked = value,
        LockField::IsReadOnly => record.is_read_only = value,
        LockField::IsExpandLocked => record.is_expand_locked = value,
    }
    // Coupling follows the field that was written.
    if field == LockField::IsLocked && !value {
        record.is_expand_locked = false;
    }
    normalize(record);
    record.is_folder() && !was_expand_locked && record.is_expand_locked
}

/// Re-apply coupling to a record that may violate it (e.g. from a peer).
/// Returns true if anything changed.
pub fn normalize(record: &mut FileRecord) -> bool {
    if record.is_expand_locked && !record.is_locked {
        record.is_locked = true;
        return true;
    }
    false
}

/// The one authoritative lock mutation.
pub fn set_lock(
    items: &mut [Item],
    role: SessionRole,
    project_locked: bool,
    id: &ItemId,
    field: LockField,
    value: bool,
) -> Result<LockOutcome, PolicyError> {
    let item = items
        .iter_mut()
        .rev()
        .find(|i| i.id() == *id)
        .ok_or(PolicyError::NotFound(*id))?;

    if let Err(e) = check_mutation(role, project_locked, Some(&item.record)) {
        log::warn!("Rejected lock change {field:?}={value} on {id}: {e}");
        return Err(e);
    }

    let newly_expand_locked = apply_field(&mut item.record, field, value);
    Ok(LockOutcome {
        record: item.record.clone(),
        newly_expand_locked,
    })
}

/// Close tabs for files under `folder`. Host tabs are never evicted.
///
/// If the active tab is closed, a neighbouring remaining tab becomes active,
/// or none when no tabs remain. Returns the evicted ids.
pub fn evict_tabs(
    tree: &ItemTree<'_>,
    folder: &ItemId,
    tabs: &mut TabState,
    role: SessionRole,
) -> Vec<ItemId> {
    if role.is_host() {
        return Vec::new();
    }
    let evicted = tabs.retain(|tab| !tree.is_descendant(tab, folder));
    if !evicted.is_empty() {
        log::info!(
            "Closed {} tab(s) under expand-locked folder {folder}",
            evicted.len()
        );
    }
    evicted
}

/// Folders expand-locked in `after` that were not expand-locked in `before`
/// (including folders that did not exist before).
pub fn newly_expand_locked(before: &[Item], after: &[Item]) -> Vec<ItemId> {
    let previously: HashSet<ItemId> = ItemTree::new(before)
        .iter()
        .filter(|i| i.record.is_expand_locked)
        .map(|i| i.id())
        .collect();

    let mut seen = HashSet::new();
    ItemTree::new(after)
        .iter()
        .filter(|i| i.is_folder() && i.record.is_expand_locked)
        .map(|i| i.id())
        .filter(|id| !previously.contains(id) && seen.insert(*id))
        .collect()
}
