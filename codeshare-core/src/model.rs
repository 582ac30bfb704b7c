//! Shared data model for projects, files and folders.
//!
//! A [`FileRecord`] is the unit peers exchange: it travels through the
//! replicated document as camelCase JSON and never carries file content.
//! Content lives in a separate collaborative text container keyed by the
//! record id. Locally, a record and its content are held together as an
//! [`Item`].
//!
//! ```text
//! ┌──────────────┐    record (JSON)    ┌────────────────┐
//! │ Item         │ ──────────────────► │ files array    │
//! │  record      │                     ├────────────────┤
//! │  content     │ ──────────────────► │ text "file:id" │
//! └──────────────┘    content (text)   └────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use uuid::Uuid;

use crate::language;

/// Stable identity of a file or folder. Immutable for the record's lifetime.
pub type ItemId = Uuid;

/// Whether a record is a file or a folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    File,
    Folder,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::File => "file",
            ItemKind::Folder => "folder",
        }
    }
}

/// Replicated file/folder record: the wire contract between peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: ItemId,
    pub parent_id: Option<ItemId>,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ItemKind,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub is_locked: bool,
    #[serde(default)]
    pub is_read_only: bool,
    #[serde(default)]
    pub is_expand_locked: bool,
    /// Loaded from non-UTF-8 bytes. Content stays empty and the stored
    /// bytes are left alone until the file is edited.
    #[serde(default)]
    pub is_binary: bool,
}

impl FileRecord {
    /// Create an unlocked record with a fresh id and inferred language.
    pub fn new(parent_id: Option<ItemId>, kind: ItemKind, name: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4(), parent_id, kind, name)
    }

    /// Create with explicit id (for loading and testing).
    pub fn with_id(
        id: ItemId,
        parent_id: Option<ItemId>,
        kind: ItemKind,
        name: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let language = match kind {
            ItemKind::File => language::language_for(&name).to_string(),
            ItemKind::Folder => String::new(),
        };
        Self {
            id,
            parent_id,
            name,
            kind,
            language,
            is_locked: false,
            is_read_only: false,
            is_expand_locked: false,
            is_binary: false,
        }
    }

    #[inline]
    pub fn is_folder(&self) -> bool {
        self.kind == ItemKind::Folder
    }

    #[inline]
    pub fn is_file(&self) -> bool {
        self.kind == ItemKind::File
    }
}

/// Local authoritative item: the shared record plus its current content.
///
/// Folders always carry empty content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub record: FileRecord,
    #[serde(default)]
    pub content: String,
}

impl Item {
    pub fn new(record: FileRecord, content: impl Into<String>) -> Self {
        let content = if record.is_folder() {
            String::new()
        } else {
            content.into()
        };
        Self { record, content }
    }

    pub fn folder(parent_id: Option<ItemId>, name: impl Into<String>) -> Self {
        Self::new(FileRecord::new(parent_id, ItemKind::Folder, name), "")
    }

    pub fn file(
        parent_id: Option<ItemId>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self::new(FileRecord::new(parent_id, ItemKind::File, name), content)
    }

    #[inline]
    pub fn id(&self) -> ItemId {
        self.record.id
    }

    #[inline]
    pub fn parent_id(&self) -> Option<ItemId> {
        self.record.parent_id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.record.name
    }

    #[inline]
    pub fn is_folder(&self) -> bool {
        self.record.is_folder()
    }

    /// Binary file whose content was never replaced.
    #[inline]
    pub fn is_opaque(&self) -> bool {
        self.record.is_binary && self.content.is_empty()
    }
}

/// Host or guest. The host seeds shared state and may override locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionRole {
    Host,
    Guest,
}

impl SessionRole {
    #[inline]
    pub fn is_host(&self) -> bool {
        matches!(self, SessionRole::Host)
    }
}

/// Registry entry describing one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDescriptor {
    pub id: Uuid,
    pub name: String,
    pub template: String,
    /// Milliseconds since the Unix epoch.
    pub created_at: u64,
    /// Milliseconds since the Unix epoch.
    pub last_modified: u64,
}

impl ProjectDescriptor {
    pub fn new(name: impl Into<String>, template: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            template: template.into(),
            created_at: now,
            last_modified: now,
        }
    }

    /// Bump `last_modified` to the current time.
    pub fn touch(&mut self) {
        self.last_modified = now_millis().max(self.last_modified);
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_json_is_camel_case() {
        let parent = Uuid::new_v4();
        let record = FileRecord::new(Some(parent), ItemKind::File, "a.move");
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["type"], "file");
        assert_eq!(json["parentId"], parent.to_string());
        assert_eq!(json["language"], "move");
        assert_eq!(json["isLocked"], false);
        assert_eq!(json["isExpandLocked"], false);
    }

    #[test]
    fn test_record_missing_flags_default_false() {
        let id = Uuid::new_v4();
        let json = format!(r#"{{"id":"{id}","parentId":null,"name":"src","type":"folder"}}"#);
        let record: FileRecord = serde_json::from_str(&json).unwrap();

        assert!(record.is_folder());
        assert!(!record.is_locked);
        assert!(!record.is_read_only);
        assert!(!record.is_binary);
        assert!(record.parent_id.is_none());
    }

    #[test]
    fn test_folder_item_drops_content() {
        let record = FileRecord::new(None, ItemKind::Folder, "src");
        let item = Item::new(record, "ignored");
        assert!(item.content.is_empty());
        assert!(item.record.language.is_empty());
    }

    #[test]
    fn test_descriptor_touch_is_monotonic() {
        let mut desc = ProjectDescriptor::new("demo", "empty");
        let before = desc.last_modified;
        desc.touch();
        assert!(desc.last_modified >= before);
        assert_eq!(desc.created_at, before);
    }
}
