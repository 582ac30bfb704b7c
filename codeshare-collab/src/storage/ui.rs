//! Debounced persistence of per-project UI snapshots.

use std::sync::Arc;
use std::time::Duration;

use codeshare_core::{Debouncer, UiSnapshot};
use uuid::Uuid;

use super::LocalStore;

/// Writes a project's open tabs and VCS status after the UI settles.
///
/// Every `schedule` restarts that project's timer, so only the latest
/// snapshot inside the window reaches the store.
pub struct UiSnapshotWriter {
    store: Arc<LocalStore>,
    debouncer: Debouncer<Uuid>,
}

impl UiSnapshotWriter {
    pub fn new(store: Arc<LocalStore>, delay: Duration) -> Self {
        Self {
            store,
            debouncer: Debouncer::new(delay),
        }
    }

    pub fn schedule(&self, project_id: Uuid, snapshot: UiSnapshot) {
        let store = Arc::clone(&self.store);
        self.debouncer.schedule(project_id, move || async move {
            match store.save_ui_snapshot(&project_id, &snapshot) {
                Ok(()) => log::trace!("UI snapshot saved for project {project_id}"),
                Err(e) => log::warn!("Failed to save UI snapshot for {project_id}: {e}"),
            }
        });
    }

    /// Read once at project load.
    pub fn load(&self, project_id: &Uuid) -> Option<UiSnapshot> {
        match self.store.load_ui_snapshot(project_id) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                log::warn!("Failed to read UI snapshot for {project_id}: {e}");
                None
            }
        }
    }

    /// Drop a pending write, e.g. when the project is closed or deleted.
    pub fn cancel(&self, project_id: &Uuid) -> bool {
        self.debouncer.cancel(project_id)
    }

    pub fn is_pending(&self, project_id: &Uuid) -> bool {
        self.debouncer.is_pending(project_id)
    }
}
