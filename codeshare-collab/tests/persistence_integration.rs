//! Persistence integration tests.
//!
//! Verifies:
//! - A host that leaves and comes back resumes from its local snapshot
//! - The session descriptor survives a crash and `restore` rejoins with it
//! - Leaving, ending and a failed join all clear the descriptor
//! - UI snapshots are written once the UI settles, latest wins

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use codeshare_collab::session::{CollabSession, SessionContext, SessionState};
use codeshare_collab::storage::{LocalStore, StoreConfig, UiSnapshotWriter};
use codeshare_collab::transport::MemoryHub;
use codeshare_collab::tree_sync::LocalProject;
use codeshare_core::{Item, SessionRole, TabState, UiSnapshot};
use tempfile::tempdir;
use uuid::Uuid;

fn open_store(dir: &std::path::Path) -> Arc<LocalStore> {
    Arc::new(LocalStore::open(StoreConfig::for_testing(dir)).unwrap())
}

fn ctx_with(store: &Arc<LocalStore>, items: Vec<Item>) -> SessionContext {
    SessionContext::new(LocalProject::new(None, items).into_shared()).with_store(Arc::clone(store))
}

#[tokio::test(start_paused = true)]
async fn test_host_resumes_from_local_snapshot() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path());
    let hub = MemoryHub::new();

    let file = Item::file(None, "main.move", "v1");
    let file_id = file.id();
    let host = CollabSession::start(&hub, ctx_with(&store, vec![file]), "room-1", "Alice", None)
        .await
        .unwrap();
    host.tree().set_content(&file_id, "v2").unwrap();
    host.leave().await;

    assert!(store.load_snapshot("room-1").unwrap().is_some());
    assert!(store.load_session().unwrap().is_none());

    // Come back with an empty local project: the snapshot wins over seeding.
    let host = CollabSession::start(&hub, ctx_with(&store, Vec::new()), "room-1", "Alice", None)
        .await
        .unwrap();
    let items = host.tree().items();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].content, "v2");
    assert_eq!(host.doc().host_name().as_deref(), Some("Alice"));
}

#[tokio::test(start_paused = true)]
async fn test_restore_after_crash() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path());
    let hub = MemoryHub::new();

    let host = CollabSession::start(
        &hub,
        ctx_with(&store, vec![Item::file(None, "a.move", "")]),
        "room-1",
        "Alice",
        Some("u-alice"),
    )
    .await
    .unwrap();
    // A crash: no leave, the descriptor stays behind.
    drop(host);

    let saved = store.load_session().unwrap().unwrap();
    assert_eq!(saved.session_id, "room-1");
    assert_eq!(saved.user_id, "u-alice");
    assert_eq!(saved.role, SessionRole::Host);

    let restored = CollabSession::restore(&hub, ctx_with(&store, Vec::new()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(restored.state(), SessionState::Active(SessionRole::Host));
    assert_eq!(restored.descriptor(), saved);
}

#[tokio::test(start_paused = true)]
async fn test_restore_without_descriptor() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path());
    let hub = MemoryHub::new();

    assert!(CollabSession::restore(&hub, ctx_with(&store, Vec::new()))
        .await
        .unwrap()
        .is_none());
    // No store at all.
    let bare = SessionContext::new(LocalProject::default().into_shared());
    assert!(CollabSession::restore(&hub, bare).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_failed_join_clears_descriptor() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path());
    let hub = MemoryHub::new();

    let guest = CollabSession::join(&hub, ctx_with(&store, Vec::new()), "ghost", "Bob", None)
        .await
        .unwrap();
    assert!(store.load_session().unwrap().is_some());

    assert!(guest.wait_active().await.is_err());
    assert!(store.load_session().unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_end_clears_descriptor() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path());
    let hub = MemoryHub::new();

    let host = CollabSession::start(&hub, ctx_with(&store, Vec::new()), "room-1", "Alice", None)
        .await
        .unwrap();
    host.end().await.unwrap();
    assert!(store.load_session().unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_ui_snapshot_keeps_latest() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path());
    let writer = UiSnapshotWriter::new(Arc::clone(&store), Duration::from_millis(500));
    let project = Uuid::new_v4();

    let file = Item::file(None, "a.move", "");
    let mut tabs = TabState::new();
    tabs.open(file.id());
    let vcs = BTreeMap::from([("a.move".to_string(), "modified".to_string())]);

    writer.schedule(project, UiSnapshot::from_tabs(&TabState::new(), BTreeMap::new()));
    tokio::time::sleep(Duration::from_millis(300)).await;
    // A later snapshot inside the window replaces the earlier one.
    writer.schedule(project, UiSnapshot::from_tabs(&tabs, vcs.clone()));
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(writer.is_pending(&project));
    assert!(writer.load(&project).is_none());

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!writer.is_pending(&project));
    let restored = writer.load(&project).unwrap();
    assert_eq!(restored.tabs(), tabs);
    assert_eq!(restored.vcs_status, vcs);
}
