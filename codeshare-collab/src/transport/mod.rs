//! Pluggable peer transports.
//!
//! A [`Transport`] opens a [`TransportLink`] into a named room. The link is
//! the only handle on the connection: dropping it stops the reader task and
//! leaves the room, so the remaining peers see `PeerLeft`.
//!
//! ```text
//!  CollabSession ── send(SyncMessage) ──► LinkSink ──► room / socket
//!        ▲
//!        └──────── recv() ◄── reader task ◄── room / socket
//! ```

mod memory;
mod ws;

use std::future::Future;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::protocol::{PeerInfo, ProtocolError, SyncMessage};

pub use memory::MemoryHub;
pub use ws::WsTransport;

pub trait Transport: Send + Sync {
    /// Join `room` as `peer`. The transport announces the peer to the room.
    fn connect(
        &self,
        room: &str,
        peer: PeerInfo,
    ) -> impl Future<Output = Result<TransportLink, ProtocolError>> + Send;
}

/// Outbound half of a link.
pub(crate) trait LinkSink: Send + Sync {
    fn send_frame(&self, frame: Vec<u8>) -> Result<(), ProtocolError>;

    /// Leave the room. Called once, from `TransportLink::drop`.
    fn close(&self);
}

pub struct TransportLink {
    peer: PeerInfo,
    room: String,
    sink: Box<dyn LinkSink>,
    incoming: mpsc::UnboundedReceiver<SyncMessage>,
    reader: JoinHandle<()>,
    clock: u64,
}

impl TransportLink {
    pub(crate) fn new(
        peer: PeerInfo,
        room: &str,
        sink: Box<dyn LinkSink>,
        incoming: mpsc::UnboundedReceiver<SyncMessage>,
        reader: JoinHandle<()>,
    ) -> Self {
        Self {
            peer,
            room: room.to_string(),
            sink,
            incoming,
            reader,
            clock: 0,
        }
    }

    pub fn connection_id(&self) -> Uuid {
        self.peer.peer_id
    }

    pub fn peer(&self) -> &PeerInfo {
        &self.peer
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    /// Next clock value for an outgoing message.
    pub fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    pub fn send(&self, msg: &SyncMessage) -> Result<(), ProtocolError> {
        self.sink.send_frame(msg.encode()?)
    }

    /// Next message from another peer. `None` once the connection is gone.
    pub async fn recv(&mut self) -> Option<SyncMessage> {
        self.incoming.recv().await
    }
}

impl Drop for TransportLink {
    fn drop(&mut self) {
        self.reader.abort();
        self.sink.close();
        log::debug!("Link {} left room {}", self.peer.peer_id, self.room);
    }
}

/// Decode a room frame, skipping the link's own frames.
pub(crate) fn decode_foreign(own: Uuid, frame: &[u8]) -> Option<SyncMessage> {
    match SyncMessage::decode(frame) {
        Ok(msg) if msg.peer_id == own => None,
        Ok(msg) => Some(msg),
        Err(e) => {
            log::warn!("Dropping undecodable frame: {e}");
            None
        }
    }
}
