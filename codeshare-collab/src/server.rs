//! WebSocket relay with room-based document routing.
//!
//! Architecture:
//! ```text
//! Client A ──┐
//!             ├── Room (session id) ── Yrs Doc ── BroadcastGroup
//! Client B ──┘                            │
//!                                         └── LocalStore (RocksDB)
//!                                               snapshot when the room empties
//! ```
//!
//! Each room keeps an authoritative replica so a peer joining an empty room
//! still receives the last known state. The first frame of a connection must
//! be `PeerJoined`; it names the room.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{ReadTxn, StateVector, Transact, Update};

use crate::broadcast::BroadcastGroup;
use crate::presence::AwarenessMessage;
use crate::protocol::{MessageType, PeerInfo, SyncMessage};
use crate::storage::{LocalStore, StoreConfig, StoreError};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Maximum peers per room
    pub max_peers_per_room: usize,
    /// Broadcast channel capacity per room
    pub broadcast_capacity: usize,
    /// Heartbeat interval in seconds
    pub heartbeat_interval_secs: u64,
    /// Snapshot storage path (None = in-memory only)
    pub storage_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            max_peers_per_room: 100,
            broadcast_capacity: 256,
            heartbeat_interval_secs: 30,
            storage_path: None,
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `CODESHARE_BIND` and `CODESHARE_STORAGE`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(bind) = std::env::var("CODESHARE_BIND") {
            config.bind_addr = bind;
        }
        if let Ok(path) = std::env::var("CODESHARE_STORAGE") {
            if !path.is_empty() {
                config.storage_path = Some(PathBuf::from(path));
            }
        }
        config
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub active_rooms: usize,
    pub persisted_snapshots: u64,
    pub rejected_peers: u64,
}

struct Room {
    doc: yrs::Doc,
    broadcast: Arc<BroadcastGroup>,
}

impl Room {
    fn new(broadcast_capacity: usize) -> Self {
        Self {
            doc: yrs::Doc::new(),
            broadcast: Arc::new(BroadcastGroup::new(broadcast_capacity)),
        }
    }

    fn apply(&self, payload: &[u8]) -> bool {
        match Update::decode_v1(payload) {
            Ok(update) => {
                let mut txn = self.doc.transact_mut();
                match txn.apply_update(update) {
                    Ok(()) => true,
                    Err(e) => {
                        log::warn!("Dropping update that failed to integrate: {e}");
                        false
                    }
                }
            }
            Err(e) => {
                log::warn!("Dropping malformed update: {e}");
                false
            }
        }
    }

    fn full_state(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }

    fn state_vector(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.state_vector().encode_v1()
    }

    fn diff(&self, remote_sv: &[u8]) -> Option<Vec<u8>> {
        let sv = StateVector::decode_v1(remote_sv).ok()?;
        let txn = self.doc.transact();
        Some(txn.encode_diff_v1(&sv))
    }
}

struct RelayState {
    config: ServerConfig,
    server_id: Uuid,
    rooms: RwLock<HashMap<String, Room>>,
    stats: RwLock<ServerStats>,
    store: Option<Arc<LocalStore>>,
}

/// The relay server. Cheap to clone; clones share rooms and statistics.
#[derive(Clone)]
pub struct RelayServer {
    state: Arc<RelayState>,
}

impl RelayServer {
    /// Create a relay, opening snapshot storage if configured.
    pub fn new(config: ServerConfig) -> Result<Self, StoreError> {
        let store = match &config.storage_path {
            Some(path) => Some(Arc::new(LocalStore::open(StoreConfig {
                path: path.clone(),
                ..StoreConfig::default()
            })?)),
            None => None,
        };
        Ok(Self::with_store(config, store))
    }

    /// In-memory relay with default configuration.
    pub fn with_defaults() -> Self {
        Self::with_store(ServerConfig::default(), None)
    }

    pub fn with_store(config: ServerConfig, store: Option<Arc<LocalStore>>) -> Self {
        Self {
            state: Arc::new(RelayState {
                config,
                server_id: Uuid::new_v4(),
                rooms: RwLock::new(HashMap::new()),
                stats: RwLock::new(ServerStats::default()),
                store,
            }),
        }
    }

    /// Load every stored room snapshot so reconnecting peers find their
    /// state immediately.
    pub async fn recover(&self) -> Result<usize, StoreError> {
        let Some(store) = &self.state.store else {
            return Ok(0);
        };
        let names = store.list_rooms()?;
        let mut rooms = self.state.rooms.write().await;
        let mut recovered = 0;
        for name in names {
            let Some(snapshot) = store.load_snapshot(&name)? else {
                continue;
            };
            let room = Room::new(self.state.config.broadcast_capacity);
            if room.apply(&snapshot) {
                rooms.insert(name.clone(), room);
                recovered += 1;
                log::debug!("Recovered room {name}");
            }
        }
        self.state.stats.write().await.active_rooms = rooms.len();
        log::info!("Recovery complete: {recovered} room(s) restored");
        Ok(recovered)
    }

    /// Recover, bind and serve until the listener fails.
    pub async fn run(&self) -> Result<(), BoxError> {
        self.recover().await?;
        let listener = TcpListener::bind(&self.state.config.bind_addr).await?;
        log::info!("Relay listening on {}", self.state.config.bind_addr);
        self.serve(listener).await?;
        Ok(())
    }

    /// Accept connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");
            let state = Arc::clone(&self.state);
            tokio::spawn(async move {
                if let Err(e) = handle_connection(state, stream, addr).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    pub async fn stats(&self) -> ServerStats {
        self.state.stats.read().await.clone()
    }

    pub async fn room_names(&self) -> Vec<String> {
        self.state.rooms.read().await.keys().cloned().collect()
    }

    pub fn bind_addr(&self) -> &str {
        &self.state.config.bind_addr
    }

    pub fn store(&self) -> Option<&Arc<LocalStore>> {
        self.state.store.as_ref()
    }
}

struct Joined {
    peer: PeerInfo,
    room: String,
    broadcast: Arc<BroadcastGroup>,
    rx: tokio::sync::broadcast::Receiver<Arc<Vec<u8>>>,
}

/// Register a peer in its room. `None` if the room is full.
async fn join_room(state: &RelayState, msg: &SyncMessage) -> Option<(Joined, Vec<u8>, Vec<u8>)> {
    let peer = msg
        .peer_info()
        .unwrap_or_else(|_| PeerInfo::with_id(msg.peer_id, msg.peer_id.to_string(), "Anonymous"));

    let mut rooms = state.rooms.write().await;
    let is_new = !rooms.contains_key(&msg.room);
    let room = rooms
        .entry(msg.room.clone())
        .or_insert_with(|| Room::new(state.config.broadcast_capacity));

    if is_new {
        if let Some(store) = &state.store {
            match store.load_snapshot(&msg.room) {
                Ok(Some(snapshot)) => {
                    room.apply(&snapshot);
                    log::info!("Loaded stored snapshot for room {}", msg.room);
                }
                Ok(None) => {}
                Err(e) => log::warn!("Failed to load snapshot for room {}: {e}", msg.room),
            }
        }
    }

    if room.broadcast.peer_count() >= state.config.max_peers_per_room {
        log::warn!("Room {} is full; rejecting {}", msg.room, peer.name);
        if room.broadcast.peer_count() == 0 {
            rooms.remove(&msg.room);
        }
        return None;
    }

    let rx = room.broadcast.add_peer(peer.clone());
    let full_state = room.full_state();
    let sv = room.state_vector();
    let broadcast = Arc::clone(&room.broadcast);
    let room_count = rooms.len();
    drop(rooms);

    state.stats.write().await.active_rooms = room_count;
    let joined = Joined {
        peer,
        room: msg.room.clone(),
        broadcast,
        rx,
    };
    Some((joined, full_state, sv))
}

/// Remove a departed peer; snapshot and drop the room once empty.
async fn leave_room(state: &RelayState, joined: &Joined) {
    let mut rooms = state.rooms.write().await;
    let Some(room) = rooms.get(&joined.room) else {
        return;
    };
    room.broadcast.remove_peer(&joined.peer.peer_id);
    let _ = room
        .broadcast
        .broadcast(&SyncMessage::peer_left(joined.peer.peer_id, &joined.room));

    if room.broadcast.peer_count() == 0 {
        let mut persisted = false;
        if let Some(store) = &state.store {
            match store.save_snapshot(&joined.room, &room.full_state()) {
                Ok(_) => {
                    persisted = true;
                    log::info!("Persisted snapshot for room {} (room closing)", joined.room);
                }
                Err(e) => log::error!("Failed to persist room {}: {e}", joined.room),
            }
        }
        rooms.remove(&joined.room);
        log::info!("Room {} removed (empty)", joined.room);

        let mut stats = state.stats.write().await;
        stats.active_rooms = rooms.len();
        if persisted {
            stats.persisted_snapshots += 1;
        }
    }
}

async fn handle_connection(
    state: Arc<RelayState>,
    stream: TcpStream,
    addr: SocketAddr,
) -> Result<(), BoxError> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    log::info!("WebSocket connection established from {addr}");

    {
        let mut s = state.stats.write().await;
        s.total_connections += 1;
        s.active_connections += 1;
    }

    let server_id = state.server_id;
    let mut joined: Option<Joined> = None;
    let mut heartbeat =
        tokio::time::interval(Duration::from_secs(state.config.heartbeat_interval_secs.max(1)));
    heartbeat.tick().await;

    let result: Result<(), BoxError> = async {
        loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    let data = match msg {
                        Some(Ok(Message::Binary(data))) => data,
                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                            continue;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("Connection closed from {addr}");
                            return Ok(());
                        }
                        Some(Err(e)) => {
                            log::warn!("WebSocket error from {addr}: {e}");
                            return Ok(());
                        }
                        Some(Ok(_)) => continue,
                    };

                    let sync_msg = match SyncMessage::decode(&data) {
                        Ok(m) => m,
                        Err(e) => {
                            log::warn!("Failed to decode message from {addr}: {e}");
                            continue;
                        }
                    };
                    {
                        let mut s = state.stats.write().await;
                        s.total_messages += 1;
                        s.total_bytes += data.len() as u64;
                    }

                    if sync_msg.msg_type == MessageType::PeerJoined {
                        if joined.is_some() {
                            log::debug!("Ignoring repeated join from {addr}");
                            continue;
                        }
                        let Some((room, full_state, sv)) = join_room(&state, &sync_msg).await else {
                            state.stats.write().await.rejected_peers += 1;
                            ws_sender.send(Message::Close(None)).await?;
                            return Ok(());
                        };
                        let step2 = SyncMessage::sync_step2(server_id, &room.room, full_state);
                        ws_sender.send(Message::Binary(step2.encode()?.into())).await?;
                        let step1 = SyncMessage::sync_step1(server_id, &room.room, sv);
                        ws_sender.send(Message::Binary(step1.encode()?.into())).await?;
                        room.broadcast.broadcast(&sync_msg)?;
                        log::info!(
                            "Peer {} ({}) joined room {}",
                            room.peer.name,
                            room.peer.peer_id,
                            room.room
                        );
                        joined = Some(room);
                        continue;
                    }

                    let Some(room) = joined.as_ref() else {
                        log::warn!("{:?} from {addr} before join", sync_msg.msg_type);
                        continue;
                    };

                    match sync_msg.msg_type {
                        MessageType::SyncStep1 => {
                            let diff = {
                                let rooms = state.rooms.read().await;
                                rooms.get(&room.room).and_then(|r| r.diff(&sync_msg.payload))
                            };
                            if let Some(diff) = diff {
                                let reply = SyncMessage::sync_step2(server_id, &room.room, diff);
                                ws_sender.send(Message::Binary(reply.encode()?.into())).await?;
                            }
                        }
                        MessageType::SyncStep2 | MessageType::Delta => {
                            let applied = {
                                let rooms = state.rooms.read().await;
                                rooms.get(&room.room).is_some_and(|r| r.apply(&sync_msg.payload))
                            };
                            if applied {
                                let forward = SyncMessage::delta(
                                    sync_msg.peer_id,
                                    &room.room,
                                    sync_msg.clock,
                                    sync_msg.payload,
                                );
                                room.broadcast.broadcast(&forward)?;
                            }
                        }
                        MessageType::Awareness => {
                            if let Ok(AwarenessMessage::Leave { user_id }) =
                                AwarenessMessage::decode(&sync_msg.payload)
                            {
                                log::info!("Presence: {user_id} left room {}", room.room);
                            }
                            room.broadcast.broadcast(&sync_msg)?;
                        }
                        MessageType::Ping => {
                            let pong = SyncMessage::pong(server_id);
                            ws_sender.send(Message::Binary(pong.encode()?.into())).await?;
                        }
                        MessageType::Pong => {
                            log::trace!("Pong from {}", room.peer.peer_id);
                        }
                        other => {
                            log::debug!("Unhandled message type from {addr}: {other:?}");
                        }
                    }
                }

                frame = async {
                    match joined.as_mut() {
                        Some(room) => room.rx.recv().await,
                        None => std::future::pending().await,
                    }
                } => {
                    match frame {
                        Ok(data) => {
                            let own = joined.as_ref().map(|j| j.peer.peer_id);
                            if let Ok(msg) = SyncMessage::decode(&data) {
                                if Some(msg.peer_id) == own {
                                    continue;
                                }
                            }
                            ws_sender.send(Message::Binary(data.to_vec().into())).await?;
                        }
                        Err(RecvError::Lagged(n)) => {
                            log::warn!("Peer at {addr} lagged by {n} messages");
                            if let Some(room) = joined.as_ref() {
                                room.broadcast.record_dropped(n);
                            }
                        }
                        Err(RecvError::Closed) => return Ok(()),
                    }
                }

                _ = heartbeat.tick() => {
                    let ping = SyncMessage::ping(server_id);
                    ws_sender.send(Message::Binary(ping.encode()?.into())).await?;
                }
            }
        }
    }
    .await;

    if let Some(room) = joined.as_ref() {
        leave_room(&state, room).await;
        log::info!("Peer {} left room {}", room.peer.name, room.room);
    }
    state.stats.write().await.active_connections -= 1;
    result
}
