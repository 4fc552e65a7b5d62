//! UDP announcement listener (spec.md §4.9): updates the peer table from
//! announcements overheard on the broadcast port, ignoring this node's own
//! announcements by node id.

use std::sync::Arc;

use gateway_core::{Announcement, Peer};
use tokio::net::UdpSocket;
use tokio::sync::watch;

use crate::table::PeerTable;

const RECV_BUF_SIZE: usize = gateway_core::MAX_ANNOUNCEMENT_BYTES + 1024;

pub struct Listener {
    self_node_id: String,
    table: Arc<PeerTable>,
}

impl Listener {
    pub fn new(self_node_id: String, table: Arc<PeerTable>) -> Self {
        Listener { self_node_id, table }
    }

    fn handle_datagram(&self, bytes: &[u8], from: std::net::SocketAddr) {
        let announcement: Announcement = match serde_json::from_slice(bytes) {
            Ok(a) => a,
            Err(e) => {
                tracing::debug!(error = %e, %from, "discarding malformed peer announcement");
                return;
            }
        };
        if announcement.node_id == self.self_node_id {
            return;
        }
        if announcement.truncated {
            tracing::debug!(node_id = %announcement.node_id, "peer announcement was truncated, model list may be incomplete");
        }
        self.table.upsert(Peer {
            id: announcement.node_id,
            address: announcement.http_addr,
            hostname: from.ip().to_string(),
            models: announcement.models,
            last_seen: chrono::Utc::now(),
        });
    }

    /// Spawns the receive loop on an already-bound socket (see
    /// `bind_listen_socket`).
    pub fn start(self: Arc<Self>, socket: UdpSocket) -> watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        tokio::spawn(async move {
            let mut buf = vec![0u8; RECV_BUF_SIZE];
            loop {
                tokio::select! {
                    result = socket.recv_from(&mut buf) => {
                        match result {
                            Ok((len, from)) => self.handle_datagram(&buf[..len], from),
                            Err(e) => tracing::warn!(error = %e, "error receiving peer announcement"),
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::info!("peer listener shutting down");
                            break;
                        }
                    }
                }
            }
        });

        shutdown_tx
    }
}

/// Binds a UDP socket on `broadcast_port` across all interfaces, ready to
/// receive announcements.
pub async fn bind_listen_socket(broadcast_port: u16) -> std::io::Result<UdpSocket> {
    UdpSocket::bind(("0.0.0.0", broadcast_port)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignores_self_announcements() {
        let table = Arc::new(PeerTable::new(std::time::Duration::from_secs(30)));
        let listener = Listener::new("self-node".into(), Arc::clone(&table));
        let announcement = Announcement { version: 1, node_id: "self-node".into(), http_addr: "10.0.0.1:8080".into(), models: vec![], truncated: false };
        let bytes = serde_json::to_vec(&announcement).unwrap();
        listener.handle_datagram(&bytes, "10.0.0.1:7331".parse().unwrap());
        assert_eq!(table.count(), 0);
    }

    #[test]
    fn records_peer_announcements_from_others() {
        let table = Arc::new(PeerTable::new(std::time::Duration::from_secs(30)));
        let listener = Listener::new("self-node".into(), Arc::clone(&table));
        let announcement = Announcement { version: 1, node_id: "other-node".into(), http_addr: "10.0.0.2:8080".into(), models: vec!["m1".into()], truncated: false };
        let bytes = serde_json::to_vec(&announcement).unwrap();
        listener.handle_datagram(&bytes, "10.0.0.2:7331".parse().unwrap());
        assert_eq!(table.count(), 1);
        assert_eq!(table.get("other-node").unwrap().address, "10.0.0.2:8080");
    }

    #[test]
    fn discards_malformed_datagrams_without_panicking() {
        let table = Arc::new(PeerTable::new(std::time::Duration::from_secs(30)));
        let listener = Listener::new("self-node".into(), Arc::clone(&table));
        listener.handle_datagram(b"not json", "10.0.0.2:7331".parse().unwrap());
        assert_eq!(table.count(), 0);
    }
}
