//! Codeshare relay — WebSocket room server for collaborative sessions.
//!
//! Configuration comes from the environment:
//!
//! - `CODESHARE_BIND` — listen address (default `127.0.0.1:9090`)
//! - `CODESHARE_STORAGE` — snapshot directory; unset keeps rooms in memory
//! - `RUST_LOG` — log filter, e.g. `info` or `codeshare_collab=debug`

use codeshare_collab::server::{RelayServer, ServerConfig};
use log::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ServerConfig::from_env();
    match &config.storage_path {
        Some(path) => info!("Persisting room snapshots under {}", path.display()),
        None => info!("No CODESHARE_STORAGE set; rooms live in memory only"),
    }

    let server = RelayServer::new(config)?;
    server.run().await
}
