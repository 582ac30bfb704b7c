//! Open editor tabs and the persisted per-project UI snapshot.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::ItemId;

/// Open tabs in display order plus the focused one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabState {
    pub open: Vec<ItemId>,
    pub active: Option<ItemId>,
}

impl TabState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open (if needed) and focus `id`.
    pub fn open(&mut self, id: ItemId) {
        if !self.open.contains(&id) {
            self.open.push(id);
        }
        self.active = Some(id);
    }

    pub fn is_open(&self, id: &ItemId) -> bool {
        self.open.contains(id)
    }

    /// Close one tab. Returns false if it was not open.
    pub fn close(&mut self, id: &ItemId) -> bool {
        !self.retain(|tab| tab != id).is_empty()
    }

    /// Keep only tabs matching `keep`; returns the closed ids.
    ///
    /// When the active tab is closed, focus moves to the remaining tab that
    /// followed it, else the one before it, else nothing.
    pub fn retain<F>(&mut self, mut keep: F) -> Vec<ItemId>
    where
        F: FnMut(&ItemId) -> bool,
    {
        let active_pos = self
            .active
            .and_then(|a| self.open.iter().position(|t| *t == a));

        let mut closed = Vec::new();
        let mut kept_before_active = 0;
        let mut remaining = Vec::with_capacity(self.open.len());
        for (pos, tab) in self.open.iter().enumerate() {
            if keep(tab) {
                if active_pos.is_some_and(|a| pos < a) {
                    kept_before_active += 1;
                }
                remaining.push(*tab);
            } else {
                closed.push(*tab);
            }
        }
        self.open = remaining;

        if let Some(active) = self.active {
            if closed.contains(&active) || active_pos.is_none() {
                self.active = if self.open.is_empty() {
                    None
                } else {
                    Some(self.open[kept_before_active.min(self.open.len() - 1)])
                };
            }
        }
        closed
    }
}

/// Per-project UI state restored once when a project loads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiSnapshot {
    pub open_tabs: Vec<ItemId>,
    pub active_tab: Option<ItemId>,
    /// Path → version-control status label, as last reported.
    #[serde(default)]
    pub vcs_status: BTreeMap<String, String>,
}

impl UiSnapshot {
    pub fn from_tabs(tabs: &TabState, vcs_status: BTreeMap<String, String>) -> Self {
        Self {
            open_tabs: tabs.open.clone(),
            active_tab: tabs.active,
            vcs_status,
        }
    }

    /// Restore tab state, dropping an active tab that is no longer open.
    pub fn tabs(&self) -> TabState {
        let active = self.active_tab.filter(|a| self.open_tabs.contains(a));
        TabState {
            open: self.open_tabs.clone(),
            active,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn ids(n: usize) -> Vec<ItemId> {
        (0..n).map(|_| Uuid::new_v4()).collect()
    }

    #[test]
    fn test_open_focuses_without_duplicates() {
        let t = ids(2);
        let mut tabs = TabState::new();
        tabs.open(t[0]);
        tabs.open(t[1]);
        tabs.open(t[0]);

        assert_eq!(tabs.open, vec![t[0], t[1]]);
        assert_eq!(tabs.active, Some(t[0]));
    }

    #[test]
    fn test_closing_active_moves_to_next() {
        let t = ids(3);
        let mut tabs = TabState::new();
        for id in &t {
            tabs.open(*id);
        }
        tabs.active = Some(t[1]);

        assert!(tabs.close(&t[1]));
        assert_eq!(tabs.active, Some(t[2]));
    }

    #[test]
    fn test_closing_last_active_moves_back() {
        let t = ids(3);
        let mut tabs = TabState::new();
        for id in &t {
            tabs.open(*id);
        }

        tabs.close(&t[2]);
        assert_eq!(tabs.active, Some(t[1]));
        tabs.retain(|_| false);
        assert!(tabs.open.is_empty());
        assert_eq!(tabs.active, None);
    }

    #[test]
    fn test_closing_other_keeps_active() {
        let t = ids(3);
        let mut tabs = TabState::new();
        for id in &t {
            tabs.open(*id);
        }
        tabs.active = Some(t[0]);

        let closed = tabs.retain(|id| *id != t[2]);
        assert_eq!(closed, vec![t[2]]);
        assert_eq!(tabs.active, Some(t[0]));
        assert!(!tabs.close(&Uuid::new_v4()));
    }

    #[test]
    fn test_snapshot_json_and_restore() {
        let t = ids(2);
        let mut tabs = TabState::new();
        tabs.open(t[0]);
        tabs.open(t[1]);

        let mut vcs = BTreeMap::new();
        vcs.insert("src/a.move".to_string(), "modified".to_string());
        let snap = UiSnapshot::from_tabs(&tabs, vcs);
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["activeTab"], t[1].to_string());
        assert_eq!(json["vcsStatus"]["src/a.move"], "modified");

        let restored: UiSnapshot = serde_json::from_value(json).unwrap();
        assert_eq!(restored.tabs(), tabs);
    }
}
