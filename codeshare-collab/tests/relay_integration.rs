//! Integration tests for end-to-end WebSocket collaboration.
//!
//! These tests start a real relay and connect real sessions,
//! verifying the full sync pipeline.

use std::sync::Arc;

use codeshare_collab::protocol::PeerInfo;
use codeshare_collab::server::{RelayServer, ServerConfig};
use codeshare_collab::session::{probe_session, CollabSession, SessionConfig, SessionContext};
use codeshare_collab::storage::{LocalStore, StoreConfig};
use codeshare_collab::transport::{Transport, WsTransport};
use codeshare_collab::tree_sync::LocalProject;
use codeshare_core::{Item, SessionRole};
use tokio::net::TcpListener;
use tokio::time::{timeout, Duration};

fn test_config() -> ServerConfig {
    ServerConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        max_peers_per_room: 10,
        broadcast_capacity: 64,
        heartbeat_interval_secs: 30,
        storage_path: None,
    }
}

/// Serve `server` on a free port and return its WebSocket URL.
async fn spawn_relay(server: RelayServer) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });
    format!("ws://{addr}")
}

fn project(items: Vec<Item>) -> SessionContext {
    SessionContext::new(LocalProject::new(None, items).into_shared())
}

async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .is_ok()
}

#[tokio::test]
async fn test_relay_accepts_connections() {
    let url = spawn_relay(RelayServer::new(test_config()).unwrap()).await;
    let result = tokio_tungstenite::connect_async(&url).await;
    assert!(result.is_ok(), "Should connect to relay");
}

#[tokio::test]
async fn test_sessions_sync_through_relay() {
    let server = RelayServer::new(test_config()).unwrap();
    let url = spawn_relay(server.clone()).await;
    let transport = WsTransport::new(&url);

    let file = Item::file(None, "main.move", "module 0x1::m {}");
    let file_id = file.id();
    let host = CollabSession::start(&transport, project(vec![file]), "room-ws", "Alice", None)
        .await
        .unwrap();
    let guest = CollabSession::join(&transport, project(Vec::new()), "room-ws", "Bob", None)
        .await
        .unwrap();
    let role = timeout(Duration::from_secs(5), guest.wait_active())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(role, SessionRole::Guest);

    let g = guest.tree().clone();
    assert!(wait_until(|| g.item(&file_id).is_some()).await);
    assert_eq!(g.item(&file_id).unwrap().content, "module 0x1::m {}");

    guest.tree().edit_content(&file_id, 0, 0, "// bob\n").unwrap();
    let h = host.tree().clone();
    assert!(
        wait_until(|| {
            h.item(&file_id)
                .is_some_and(|i| i.content.starts_with("// bob\n"))
        })
        .await
    );

    let updates = host.subscribe_collaborators();
    assert!(wait_until(|| updates.borrow().len() == 2).await);

    assert_eq!(server.room_names().await, vec!["room-ws".to_string()]);
    let stats = server.stats().await;
    assert_eq!(stats.active_connections, 2);
    assert!(stats.total_messages > 0);
}

#[tokio::test]
async fn test_probe_through_relay() {
    let url = spawn_relay(RelayServer::new(test_config()).unwrap()).await;
    let transport = WsTransport::new(&url);
    let config = SessionConfig {
        probe_timeout: Duration::from_millis(500),
        ..SessionConfig::default()
    };

    assert!(!probe_session(&transport, "room-probe", &config).await);

    let _host = CollabSession::start(&transport, project(Vec::new()), "room-probe", "Alice", None)
        .await
        .unwrap();
    assert!(probe_session(&transport, "room-probe", &config).await);
}

#[tokio::test]
async fn test_full_room_rejects_peer() {
    let config = ServerConfig {
        max_peers_per_room: 1,
        ..test_config()
    };
    let url = spawn_relay(RelayServer::new(config).unwrap()).await;
    let transport = WsTransport::new(&url);

    let mut first = transport
        .connect("room-full", PeerInfo::new("u-1", "One"))
        .await
        .unwrap();
    // The first peer gets the room state.
    assert!(timeout(Duration::from_secs(5), first.recv())
        .await
        .unwrap()
        .is_some());

    let mut second = transport
        .connect("room-full", PeerInfo::new("u-2", "Two"))
        .await
        .unwrap();
    let closed = timeout(Duration::from_secs(5), second.recv()).await.unwrap();
    assert!(closed.is_none());
}

#[tokio::test]
async fn test_relay_serves_room_from_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(LocalStore::open(StoreConfig::for_testing(dir.path())).unwrap());
    let server = RelayServer::with_store(test_config(), Some(Arc::clone(&store)));
    let url = spawn_relay(server.clone()).await;
    let transport = WsTransport::new(&url);

    let file = Item::file(None, "notes.md", "kept by the relay");
    let file_id = file.id();
    let host = CollabSession::start(&transport, project(vec![file]), "room-keep", "Alice", None)
        .await
        .unwrap();
    host.leave().await;

    // Last peer gone: the relay snapshots and drops the room.
    assert!(
        wait_until(|| store.load_snapshot("room-keep").ok().flatten().is_some()).await
    );
    assert!(timeout(Duration::from_secs(5), async {
        while !server.room_names().await.is_empty() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .is_ok());

    // A guest arriving later still finds the host's state.
    let guest = CollabSession::join(&transport, project(Vec::new()), "room-keep", "Bob", None)
        .await
        .unwrap();
    timeout(Duration::from_secs(5), guest.wait_active())
        .await
        .unwrap()
        .unwrap();
    let g = guest.tree().clone();
    assert!(wait_until(|| g.item(&file_id).is_some()).await);
    assert_eq!(g.item(&file_id).unwrap().content, "kept by the relay");
    assert_eq!(server.stats().await.persisted_snapshots, 1);
}
