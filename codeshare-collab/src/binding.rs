//! Content binding handshake between a local editor buffer and a file's
//! shared text.
//!
//! The host seeds the shared text from its buffer if the text is still empty.
//! A guest waits for the first sync (or a bounded fallback) before binding,
//! so its empty buffer never overwrites host content while connecting.

use std::time::Duration;

use codeshare_core::ItemId;
use tokio::sync::watch;

use crate::doc::{ChangeScope, DocChange, DocError};
use crate::tree_sync::{SyncError, TreeSync};

/// Live link between an editor widget and one file's shared text.
#[derive(Clone)]
pub struct TextBinding {
    tree: TreeSync,
    file: ItemId,
}

impl TextBinding {
    pub fn file_id(&self) -> ItemId {
        self.file
    }

    /// Current shared text.
    pub fn content(&self) -> String {
        self.tree.doc().content(&self.file).unwrap_or_default()
    }

    /// Replace the whole text.
    pub fn replace(&self, content: &str) -> Result<(), SyncError> {
        self.tree.set_content(&self.file, content)
    }

    /// Delete `delete` chars at char `index`, then insert `insert` there.
    pub fn edit(&self, index: usize, delete: usize, insert: &str) -> Result<(), SyncError> {
        self.tree.edit_content(&self.file, index, delete, insert)
    }

    /// Whether a document change concerns this binding.
    pub fn concerns(&self, change: &DocChange) -> bool {
        change.scope == ChangeScope::Content(self.file)
    }
}

/// Bind `file` to an editor whose buffer currently holds `local_buffer`.
pub async fn bind_content(
    tree: &TreeSync,
    file: ItemId,
    local_buffer: &str,
    mut synced: watch::Receiver<bool>,
    fallback: Duration,
) -> Result<TextBinding, SyncError> {
    // A guest may not have the record yet; it arrives with the first sync.
    if !tree.role().is_host() {
        let was_synced = tokio::time::timeout(fallback, async {
            synced.wait_for(|s| *s).await.is_ok()
        })
        .await
        .unwrap_or(false);
        if !was_synced {
            log::debug!(
                "Binding {file} without sync after {}ms",
                fallback.as_millis()
            );
        }
    }

    let record = tree.doc().record(&file).ok_or(DocError::NotFound(file))?;
    if !record.is_file() {
        return Err(DocError::NotAFile(file).into());
    }
    if tree.role().is_host() && tree.doc().seed_content(&file, local_buffer)? {
        log::debug!("Seeded shared text of {} from local buffer", record.name);
    }

    tree.refresh_content(&file);
    Ok(TextBinding {
        tree: tree.clone(),
        file,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc::{Origin, SharedDoc};
    use crate::tree_sync::LocalProject;
    use codeshare_core::{Item, SessionRole};
    use std::sync::Arc;

    fn tree(role: SessionRole) -> TreeSync {
        TreeSync::new(
            Arc::new(SharedDoc::new()),
            LocalProject::default().into_shared(),
            role,
        )
    }

    #[tokio::test]
    async fn test_host_seeds_empty_text() {
        let host = tree(SessionRole::Host);
        let file = host.add_item(Item::file(None, "a.move", "")).unwrap();
        let (_tx, rx) = watch::channel(false);

        let binding = bind_content(&host, file, "local", rx.clone(), Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(binding.content(), "local");

        // Second bind never overwrites.
        let again = bind_content(&host, file, "other", rx, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(again.content(), "local");
    }

    #[tokio::test(start_paused = true)]
    async fn test_guest_waits_for_sync() {
        let guest = tree(SessionRole::Guest);
        let item = Item::file(None, "a.move", "");
        guest.doc().insert_item(&item).unwrap();
        guest.rebuild();
        let (tx, rx) = watch::channel(false);

        let handle = {
            let guest = guest.clone();
            tokio::spawn(async move {
                bind_content(&guest, item.id(), "", rx, Duration::from_secs(2)).await
            })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!handle.is_finished());

        tx.send_replace(true);
        let binding = handle.await.unwrap().unwrap();
        assert_eq!(binding.content(), "");
    }

    #[tokio::test(start_paused = true)]
    async fn test_guest_binds_file_that_arrives_with_sync() {
        let guest = tree(SessionRole::Guest);
        let host_doc = SharedDoc::new();
        let item = Item::file(None, "a.move", "");
        host_doc.insert_item(&item).unwrap();
        host_doc.set_content(&item.id(), "from host").unwrap();
        let (tx, rx) = watch::channel(false);

        let handle = {
            let guest = guest.clone();
            let id = item.id();
            tokio::spawn(async move {
                bind_content(&guest, id, "", rx, Duration::from_secs(2)).await
            })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(guest.doc().record(&item.id()).is_none());

        guest.doc().apply_remote(&host_doc.full_state()).unwrap();
        tx.send_replace(true);
        let binding = handle.await.unwrap().unwrap();
        assert_eq!(binding.content(), "from host");
    }

    #[tokio::test(start_paused = true)]
    async fn test_guest_missing_file_fails_after_fallback() {
        let guest = tree(SessionRole::Guest);
        let (_tx, rx) = watch::channel(false);
        let missing = uuid::Uuid::new_v4();

        let started = tokio::time::Instant::now();
        assert!(matches!(
            bind_content(&guest, missing, "", rx, Duration::from_secs(2)).await,
            Err(SyncError::Doc(DocError::NotFound(id))) if id == missing
        ));
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_guest_falls_back_after_timeout() {
        let guest = tree(SessionRole::Guest);
        let item = Item::file(None, "a.move", "");
        guest.doc().insert_item(&item).unwrap();
        guest.rebuild();
        let (_tx, rx) = watch::channel(false);

        let started = tokio::time::Instant::now();
        let binding = bind_content(&guest, item.id(), "", rx, Duration::from_secs(2))
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_secs(2));

        binding.edit(0, 0, "hi").unwrap();
        assert_eq!(binding.content(), "hi");
        assert!(binding.concerns(&DocChange {
            origin: Origin::Local,
            scope: ChangeScope::Content(item.id()),
        }));
    }

    #[tokio::test]
    async fn test_folder_cannot_bind() {
        let host = tree(SessionRole::Host);
        let dir = host.add_item(Item::folder(None, "src")).unwrap();
        let (_tx, rx) = watch::channel(true);
        assert!(matches!(
            bind_content(&host, dir, "", rx, Duration::ZERO).await,
            Err(SyncError::Doc(DocError::NotAFile(_)))
        ));
    }
}
