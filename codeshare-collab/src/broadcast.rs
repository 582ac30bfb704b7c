//! Fan-out broadcast to every peer of a room.
//!
//! Uses tokio broadcast channels for O(1) send to all subscribers.
//! Each peer gets an independent receiver that buffers up to `capacity`
//! messages; receivers skip frames sent under their own connection id.
//!
//! The peer table sits behind a std lock so that a link can leave its room
//! from `Drop` without an executor.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::protocol::{PeerInfo, ProtocolError, SyncMessage};

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub active_peers: usize,
}

/// Lock-free counters, read via [`BroadcastGroup::stats`].
struct AtomicBroadcastStats {
    messages_sent: AtomicU64,
    messages_dropped: AtomicU64,
}

impl AtomicBroadcastStats {
    fn new() -> Self {
        Self {
            messages_sent: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
        }
    }
}

/// A broadcast group for a single room.
pub struct BroadcastGroup {
    sender: broadcast::Sender<Arc<Vec<u8>>>,
    peers: RwLock<HashMap<Uuid, PeerInfo>>,
    capacity: usize,
    atomic_stats: AtomicBroadcastStats,
}

impl BroadcastGroup {
    /// `capacity` is how many frames a receiver may fall behind before it
    /// starts losing them.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            peers: RwLock::new(HashMap::new()),
            capacity,
            atomic_stats: AtomicBroadcastStats::new(),
        }
    }

    /// Register a peer and return its receiver.
    pub fn add_peer(&self, info: PeerInfo) -> broadcast::Receiver<Arc<Vec<u8>>> {
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        peers.insert(info.peer_id, info);
        self.sender.subscribe()
    }

    pub fn remove_peer(&self, peer_id: &Uuid) -> Option<PeerInfo> {
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        peers.remove(peer_id)
    }

    /// Encode and broadcast a message. Returns the number of receivers.
    pub fn broadcast(&self, msg: &SyncMessage) -> Result<usize, ProtocolError> {
        let encoded = msg.encode()?;
        Ok(self.broadcast_raw(Arc::new(encoded)))
    }

    /// Broadcast pre-encoded bytes.
    pub fn broadcast_raw(&self, encoded: Arc<Vec<u8>>) -> usize {
        let count = self.sender.send(encoded).unwrap_or(0);
        self.atomic_stats.messages_sent.fetch_add(1, Ordering::Relaxed);
        count
    }

    /// Account for frames a lagging receiver skipped.
    pub fn record_dropped(&self, count: u64) {
        self.atomic_stats
            .messages_dropped
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn peer_count(&self) -> usize {
        self.peers.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn peers(&self) -> Vec<PeerInfo> {
        self.peers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    pub fn has_peer(&self, peer_id: &Uuid) -> bool {
        self.peers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(peer_id)
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            messages_sent: self.atomic_stats.messages_sent.load(Ordering::Relaxed),
            messages_dropped: self.atomic_stats.messages_dropped.load(Ordering::Relaxed),
            active_peers: self.peer_count(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Maps room names to broadcast groups.
pub struct RoomManager {
    rooms: RwLock<HashMap<String, Arc<BroadcastGroup>>>,
    default_capacity: usize,
}

impl RoomManager {
    pub fn new(default_capacity: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            default_capacity,
        }
    }

    /// Get or create the group for `room`.
    pub fn get_or_create(&self, room: &str) -> Arc<BroadcastGroup> {
        {
            let rooms = self.rooms.read().unwrap_or_else(|e| e.into_inner());
            if let Some(group) = rooms.get(room) {
                return Arc::clone(group);
            }
        }

        let mut rooms = self.rooms.write().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            rooms
                .entry(room.to_string())
                .or_insert_with(|| Arc::new(BroadcastGroup::new(self.default_capacity))),
        )
    }

    pub fn get(&self, room: &str) -> Option<Arc<BroadcastGroup>> {
        self.rooms
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(room)
            .cloned()
    }

    /// Remove `room` if nobody is left in it.
    pub fn remove_if_empty(&self, room: &str) -> bool {
        let mut rooms = self.rooms.write().unwrap_or_else(|e| e.into_inner());
        if rooms.get(room).is_some_and(|g| g.peer_count() == 0) {
            rooms.remove(room);
            return true;
        }
        false
    }

    pub fn room_count(&self) -> usize {
        self.rooms.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn active_rooms(&self) -> Vec<String> {
        self.rooms
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_group_add_remove() {
        let group = BroadcastGroup::new(16);
        let peer = PeerInfo::new("u-alice", "Alice");
        let peer_id = peer.peer_id;

        let _rx = group.add_peer(peer);
        assert_eq!(group.peer_count(), 1);
        assert!(group.has_peer(&peer_id));

        assert!(group.remove_peer(&peer_id).is_some());
        assert_eq!(group.peer_count(), 0);
    }

    #[tokio::test]
    async fn test_broadcast_fan_out() {
        let group = BroadcastGroup::new(16);
        let alice = PeerInfo::new("u-alice", "Alice");
        let mut rx1 = group.add_peer(alice.clone());
        let mut rx2 = group.add_peer(PeerInfo::new("u-bob", "Bob"));

        let msg = SyncMessage::delta(alice.peer_id, "room", 1, vec![1, 2, 3]);
        // The sender's own receiver gets it too; filtering is the caller's job.
        assert_eq!(group.broadcast(&msg).unwrap(), 2);

        let frame = rx1.recv().await.unwrap();
        assert_eq!(SyncMessage::decode(&frame).unwrap().payload, vec![1, 2, 3]);
        assert!(rx2.recv().await.is_ok());
    }

    #[tokio::test]
    async fn test_broadcast_stats() {
        let group = BroadcastGroup::new(16);
        let peer = PeerInfo::new("u", "Alice");
        let _rx = group.add_peer(peer.clone());

        group.broadcast(&SyncMessage::ping(peer.peer_id)).unwrap();
        group.broadcast_raw(Arc::new(vec![0]));
        group.record_dropped(3);

        assert_eq!(
            group.stats(),
            BroadcastStats {
                messages_sent: 2,
                messages_dropped: 3,
                active_peers: 1,
            }
        );
    }

    #[test]
    fn test_room_manager_get_or_create() {
        let manager = RoomManager::new(16);
        let a = manager.get_or_create("room-1");
        let b = manager.get_or_create("room-1");
        manager.get_or_create("room-2");

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(manager.room_count(), 2);
        assert!(manager.active_rooms().contains(&"room-2".to_string()));
    }

    #[test]
    fn test_room_manager_cleanup() {
        let manager = RoomManager::new(16);
        let room = manager.get_or_create("room-1");
        let peer = PeerInfo::new("u", "Alice");
        let peer_id = peer.peer_id;
        let _rx = room.add_peer(peer);

        assert!(!manager.remove_if_empty("room-1"));
        room.remove_peer(&peer_id);
        assert!(manager.remove_if_empty("room-1"));
        assert!(manager.get("room-1").is_none());
    }
}
