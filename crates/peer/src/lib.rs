//! Peer plane (spec.md §4.9, C9): UDP broadcast discovery between gateway
//! nodes on the same subnet, plus resumable HTTP(S) pull of model
//! artifacts from a chosen peer. The teacher has no distributed-systems
//! code to ground this on; the map/sweep shape still follows its
//! `SessionManager`, and the transfer itself is plain `tokio::net`/`reqwest`
//! rather than borrowing a heavier P2P stack (libp2p-style daemons in the
//! wider example pack pull in a protobuf-generated RPC surface this spec
//! doesn't need).

pub mod announce;
pub mod error;
pub mod listen;
pub mod table;
pub mod transfer;

pub use announce::Announcer;
pub use error::PeerError;
pub use listen::Listener;
pub use table::PeerTable;
pub use transfer::pull_artifact;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// Generates a node id stable for the process lifetime. Spec.md §6 allows
/// an operator-supplied id; this is the fallback when none is configured.
pub fn generate_node_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Aggregates the announcer, listener, and peer table behind one set of
/// shutdown handles, mirroring how `gateway-cache`'s `ModelCache` and
/// `gateway-respcache`'s sweep task each expose a single start/stop seam.
pub struct PeerPlane {
    pub table: Arc<PeerTable>,
    announce_shutdown: Option<watch::Sender<bool>>,
    listen_shutdown: Option<watch::Sender<bool>>,
    sweep_shutdown: Option<watch::Sender<bool>>,
}

impl PeerPlane {
    pub async fn start(
        node_id: String,
        http_addr: String,
        broadcast_port: u16,
        announce_interval: Duration,
        ttl: Duration,
        models: Arc<dyn Fn() -> Vec<String> + Send + Sync>,
    ) -> std::io::Result<Self> {
        let table = Arc::new(PeerTable::new(ttl));

        let announcer = Arc::new(Announcer::new(node_id.clone(), http_addr, broadcast_port, models));
        let announce_socket = announce::bind_broadcast_socket().await?;
        let announce_shutdown = announcer.start(announce_socket, announce_interval);

        let listener = Arc::new(Listener::new(node_id, Arc::clone(&table)));
        let listen_socket = listen::bind_listen_socket(broadcast_port).await?;
        let listen_shutdown = listener.start(listen_socket);

        let sweep_shutdown = table.start_sweep_task(ttl / 2);

        Ok(PeerPlane {
            table,
            announce_shutdown: Some(announce_shutdown),
            listen_shutdown: Some(listen_shutdown),
            sweep_shutdown: Some(sweep_shutdown),
        })
    }

    pub fn shutdown(&mut self) {
        for tx in [self.announce_shutdown.take(), self.listen_shutdown.take(), self.sweep_shutdown.take()].into_iter().flatten() {
            let _ = tx.send(true);
        }
    }
}

impl Drop for PeerPlane {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_node_id_produces_distinct_ids() {
        assert_ne!(generate_node_id(), generate_node_id());
    }
}
