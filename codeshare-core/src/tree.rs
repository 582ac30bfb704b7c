//! Arena index over a flat item list.
//!
//! Items reference their parent by id. [`ItemTree`] indexes a slice once so
//! parent lookups are O(1), and memoises each item's relative path the first
//! time it is resolved, so a full pass over N items costs O(N) path work
//! instead of O(N · depth).
//!
//! Resolution rules:
//! - an item whose parent id is unknown resolves at the project root;
//! - an item whose chain cycles, or passes through a file, is unresolvable.

use std::collections::{HashMap, HashSet};

use crate::model::{Item, ItemId};

/// Id-indexed view over a slice of items with memoised path resolution.
pub struct ItemTree<'a> {
    items: &'a [Item],
    index: HashMap<ItemId, usize>,
    paths: HashMap<ItemId, Option<String>>,
}

impl<'a> ItemTree<'a> {
    /// Index `items`. When an id appears more than once the last entry wins.
    pub fn new(items: &'a [Item]) -> Self {
        let mut index = HashMap::with_capacity(items.len());
        for (pos, item) in items.iter().enumerate() {
            index.insert(item.id(), pos);
        }
        Self {
            items,
            index,
            paths: HashMap::with_capacity(items.len()),
        }
    }

    #[inline]
    pub fn get(&self, id: &ItemId) -> Option<&'a Item> {
        self.index.get(id).map(|&pos| &self.items[pos])
    }

    #[inline]
    pub fn contains(&self, id: &ItemId) -> bool {
        self.index.contains_key(id)
    }

    /// Number of distinct ids.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Unique items (last entry per id), in list order.
    pub fn iter(&self) -> impl Iterator<Item = &'a Item> + '_ {
        self.unique_items()
    }

    /// Parent item, if the parent id is set and known.
    pub fn parent(&self, id: &ItemId) -> Option<&'a Item> {
        self.get(id)
            .and_then(|item| item.parent_id())
            .and_then(|pid| self.get(&pid))
    }

    /// Direct children of `parent` (`None` = project root), in list order.
    pub fn children(&self, parent: Option<ItemId>) -> Vec<&'a Item> {
        self.unique_items()
            .filter(|item| self.effective_parent(item) == parent)
            .collect()
    }

    /// Whether `ancestor` appears on `id`'s parent chain.
    pub fn is_descendant(&self, id: &ItemId, ancestor: &ItemId) -> bool {
        let mut current = self.get(id).and_then(|i| i.parent_id());
        // Bounded walk: a chain longer than the item count must cycle.
        for _ in 0..=self.items.len() {
            match current {
                Some(pid) if pid == *ancestor => return true,
                Some(pid) => current = self.get(&pid).and_then(|i| i.parent_id()),
                None => return false,
            }
        }
        false
    }

    /// All ids below `folder`, excluding the folder itself.
    pub fn descendants(&self, folder: &ItemId) -> Vec<ItemId> {
        self.unique_items()
            .filter(|item| self.is_descendant(&item.id(), folder))
            .map(|item| item.id())
            .collect()
    }

    /// Relative `/`-joined path of `id`, e.g. `src/a.move`.
    ///
    /// Returns `None` for unknown ids and unresolvable chains. The result is
    /// memoised for every item on the walked chain.
    pub fn path_of(&mut self, id: &ItemId) -> Option<String> {
        if let Some(cached) = self.paths.get(id) {
            return cached.clone();
        }
        if !self.contains(id) {
            return None;
        }

        // Walk up until the root, a memoised ancestor, or a repeat.
        let mut chain: Vec<ItemId> = Vec::new();
        let mut seen: HashSet<ItemId> = HashSet::new();
        let mut cursor = Some(*id);
        let mut base: Option<String> = None;
        let mut broken = false;

        while let Some(current) = cursor {
            if let Some(cached) = self.paths.get(&current) {
                match cached {
                    Some(p) => base = Some(p.clone()),
                    None => broken = true,
                }
                break;
            }
            if !seen.insert(current) {
                log::warn!("Parent chain of {id} cycles through {current}");
                broken = true;
                break;
            }
            let item = match self.get(&current) {
                Some(item) => item,
                None => break,
            };
            chain.push(current);
            cursor = match item.parent_id() {
                Some(pid) => match self.get(&pid) {
                    Some(parent) if !parent.is_folder() => {
                        log::warn!("Item {current} has a file as parent ({pid})");
                        broken = true;
                        break;
                    }
                    Some(_) => Some(pid),
                    // Unknown parent: resolve at the root.
                    None => None,
                },
                None => None,
            };
        }

        if broken {
            for link in chain {
                self.paths.insert(link, None);
            }
            return None;
        }

        // Build paths top-down so every link is memoised.
        let mut prefix = base;
        for link in chain.iter().rev() {
            let name = self.get(link).map(|i| i.name()).unwrap_or_default();
            let path = match &prefix {
                Some(p) if !p.is_empty() => format!("{p}/{name}"),
                _ => name.to_string(),
            };
            self.paths.insert(*link, Some(path.clone()));
            prefix = Some(path);
        }

        self.paths.get(id).cloned().flatten()
    }

    /// Depth below the root (root-level items are depth 0).
    pub fn depth(&mut self, id: &ItemId) -> Option<usize> {
        self.path_of(id).map(|p| p.matches('/').count())
    }

    /// Iterate unique items (last entry per id), in list order.
    fn unique_items(&self) -> impl Iterator<Item = &'a Item> + '_ {
        self.items
            .iter()
            .enumerate()
            .filter(move |(pos, item)| self.index.get(&item.id()) == Some(pos))
            .map(|(_, item)| item)
    }

    /// Parent id as resolved by this tree (unknown parents collapse to root).
    fn effective_parent(&self, item: &Item) -> Option<ItemId> {
        item.parent_id().filter(|pid| self.contains(pid))
    }
}
