//! WebSocket transport to a relay server.
//!
//! One writer task drains the outbound channel into the socket and closes
//! it once the link is dropped; one reader task decodes binary frames.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use super::{decode_foreign, LinkSink, Transport, TransportLink};
use crate::protocol::{PeerInfo, ProtocolError, SyncMessage};

#[derive(Debug, Clone)]
pub struct WsTransport {
    server_url: String,
}

impl WsTransport {
    /// `server_url` like `ws://127.0.0.1:9090`; the room is appended as a path.
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
        }
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}

struct ChannelSink {
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
}

impl LinkSink for ChannelSink {
    fn send_frame(&self, frame: Vec<u8>) -> Result<(), ProtocolError> {
        self.outgoing
            .send(frame)
            .map_err(|_| ProtocolError::ConnectionClosed)
    }

    // The writer closes the socket once this sink's sender is dropped.
    fn close(&self) {}
}

impl Transport for WsTransport {
    async fn connect(&self, room: &str, peer: PeerInfo) -> Result<TransportLink, ProtocolError> {
        let url = format!("{}/{}", self.server_url, room);
        let (ws_stream, _) = tokio_tungstenite::connect_async(&url).await.map_err(|e| {
            log::warn!("Failed to connect to {url}: {e}");
            ProtocolError::ConnectionClosed
        })?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        out_tx
            .send(SyncMessage::peer_joined(room, &peer)?.encode()?)
            .map_err(|_| ProtocolError::ConnectionClosed)?;

        tokio::spawn(async move {
            while let Some(data) = out_rx.recv().await {
                if ws_writer.send(Message::Binary(data.into())).await.is_err() {
                    return;
                }
            }
            let _ = ws_writer.send(Message::Close(None)).await;
        });

        let (in_tx, incoming) = mpsc::unbounded_channel();
        let own = peer.peer_id;
        let reader = tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Binary(data)) => {
                        if let Some(msg) = decode_foreign(own, &data) {
                            if in_tx.send(msg).is_err() {
                                break;
                            }
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
            log::debug!("Connection {own} closed by relay");
        });

        log::info!("Connected to {url} as {} ({})", peer.name, peer.peer_id);
        let sink = ChannelSink { outgoing: out_tx };
        Ok(TransportLink::new(peer, room, Box::new(sink), incoming, reader))
    }
}
