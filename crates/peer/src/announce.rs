//! UDP broadcast announcer (spec.md §4.9): periodically tells the local
//! subnet which models this node has and how to reach its HTTP front door.

use std::sync::Arc;
use std::time::Duration;

use gateway_core::{Announcement, MAX_ANNOUNCEMENT_BYTES};
use tokio::net::UdpSocket;
use tokio::sync::watch;

pub struct Announcer {
    node_id: String,
    http_addr: String,
    broadcast_port: u16,
    models: Arc<dyn Fn() -> Vec<String> + Send + Sync>,
}

impl Announcer {
    pub fn new(node_id: String, http_addr: String, broadcast_port: u16, models: Arc<dyn Fn() -> Vec<String> + Send + Sync>) -> Self {
        Announcer { node_id, http_addr, broadcast_port, models }
    }

    /// Encodes the current announcement, truncating the model list if
    /// needed to stay under the datagram cap rather than fragmenting it.
    fn build_payload(&self) -> Vec<u8> {
        let models = (self.models)();
        let mut announcement = Announcement {
            version: 1,
            node_id: self.node_id.clone(),
            http_addr: self.http_addr.clone(),
            models,
            truncated: false,
        };
        let mut encoded = serde_json::to_vec(&announcement).unwrap_or_default();
        while encoded.len() > MAX_ANNOUNCEMENT_BYTES && !announcement.models.is_empty() {
            announcement.models.pop();
            announcement.truncated = true;
            encoded = serde_json::to_vec(&announcement).unwrap_or_default();
        }
        encoded
    }

    async fn send_once(&self, socket: &UdpSocket) {
        let payload = self.build_payload();
        if let Err(e) = socket.send_to(&payload, ("255.255.255.255", self.broadcast_port)).await {
            tracing::warn!(error = %e, "failed to send peer announcement");
        }
    }

    /// Spawns the periodic announce loop. The socket is bound once and
    /// reused; `SO_BROADCAST` must be enabled by the caller's socket setup
    /// (see `bind_broadcast_socket`).
    pub fn start(self: Arc<Self>, socket: UdpSocket, interval: Duration) -> watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => self.send_once(&socket).await,
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::info!("peer announcer shutting down");
                            break;
                        }
                    }
                }
            }
        });

        shutdown_tx
    }
}

/// Binds a UDP socket suitable for broadcast announcements: bound to the
/// wildcard address on an ephemeral port, with `SO_BROADCAST` enabled so
/// `send_to` against `255.255.255.255` is permitted.
pub async fn bind_broadcast_socket() -> std::io::Result<UdpSocket> {
    let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
    socket.set_broadcast(true)?;
    Ok(socket)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_stays_under_the_datagram_cap_by_truncating_models() {
        let models: Vec<String> = (0..20_000).map(|i| format!("model-{i}-with-a-somewhat-long-name")).collect();
        let announcer = Announcer::new("n1".into(), "10.0.0.1:8080".into(), 7331, Arc::new(move || models.clone()));
        let payload = announcer.build_payload();
        assert!(payload.len() <= MAX_ANNOUNCEMENT_BYTES);
        let decoded: Announcement = serde_json::from_slice(&payload).unwrap();
        assert!(decoded.truncated);
    }

    #[test]
    fn small_model_list_is_not_truncated() {
        let announcer = Announcer::new("n1".into(), "10.0.0.1:8080".into(), 7331, Arc::new(|| vec!["m1".to_string()]));
        let payload = announcer.build_payload();
        let decoded: Announcement = serde_json::from_slice(&payload).unwrap();
        assert!(!decoded.truncated);
        assert_eq!(decoded.models, vec!["m1".to_string()]);
    }
}
