//! In-process transport: every room is a [`BroadcastGroup`].
//!
//! There is no relay replica here. Peers answer each other's `SyncStep1`
//! directly, which is enough for any number of sessions in one process.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::{decode_foreign, LinkSink, Transport, TransportLink};
use crate::broadcast::{BroadcastGroup, RoomManager};
use crate::protocol::{PeerInfo, ProtocolError, SyncMessage};

const DEFAULT_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct MemoryHub {
    rooms: Arc<RoomManager>,
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            rooms: Arc::new(RoomManager::new(capacity)),
        }
    }

    pub fn room_count(&self) -> usize {
        self.rooms.room_count()
    }

    /// Connections currently in `room`.
    pub fn peers(&self, room: &str) -> Vec<PeerInfo> {
        self.rooms.get(room).map(|g| g.peers()).unwrap_or_default()
    }
}

struct RoomSink {
    rooms: Arc<RoomManager>,
    group: Arc<BroadcastGroup>,
    room: String,
    peer_id: Uuid,
}

impl LinkSink for RoomSink {
    fn send_frame(&self, frame: Vec<u8>) -> Result<(), ProtocolError> {
        self.group.broadcast_raw(Arc::new(frame));
        Ok(())
    }

    fn close(&self) {
        if self.group.remove_peer(&self.peer_id).is_none() {
            return;
        }
        if let Err(e) = self
            .group
            .broadcast(&SyncMessage::peer_left(self.peer_id, &self.room))
        {
            log::warn!("Failed to announce departure of {}: {e}", self.peer_id);
        }
        if self.rooms.remove_if_empty(&self.room) {
            log::debug!("Room {} removed (empty)", self.room);
        }
    }
}

impl Transport for MemoryHub {
    async fn connect(&self, room: &str, peer: PeerInfo) -> Result<TransportLink, ProtocolError> {
        let group = self.rooms.get_or_create(room);
        let joined = SyncMessage::peer_joined(room, &peer)?;
        let mut rx = group.add_peer(peer.clone());
        group.broadcast(&joined)?;

        let (tx, incoming) = mpsc::unbounded_channel();
        let own = peer.peer_id;
        let reader_group = Arc::clone(&group);
        let reader = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(frame) => {
                        if let Some(msg) = decode_foreign(own, &frame) {
                            if tx.send(msg).is_err() {
                                break;
                            }
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        log::warn!("Peer {own} lagged by {n} messages");
                        reader_group.record_dropped(n);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        log::debug!("Peer {} ({}) joined room {room}", peer.name, peer.peer_id);
        let sink = RoomSink {
            rooms: Arc::clone(&self.rooms),
            group,
            room: room.to_string(),
            peer_id: own,
        };
        Ok(TransportLink::new(peer, room, Box::new(sink), incoming, reader))
    }
}
