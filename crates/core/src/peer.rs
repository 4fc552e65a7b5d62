//! Peer-table entry shared between the peer plane and the server's control
//! endpoints (spec.md §3 `Peer`, §4.9).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Peer {
    pub id: String,
    pub address: String,
    pub hostname: String,
    pub models: Vec<String>,
    pub last_seen: chrono::DateTime<chrono::Utc>,
}

impl Peer {
    pub fn is_expired(&self, ttl: chrono::Duration) -> bool {
        chrono::Utc::now() - self.last_seen > ttl
    }
}

/// Wire shape of the UDP announcement payload (spec.md §4.9, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Announcement {
    pub version: u8,
    pub node_id: String,
    pub http_addr: String,
    pub models: Vec<String>,
    /// Set when `models` was truncated to fit the 64 KiB datagram cap.
    #[serde(default)]
    pub truncated: bool,
}

/// Maximum encoded announcement size (spec.md §4.9).
pub const MAX_ANNOUNCEMENT_BYTES: usize = 64 * 1024;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_expires_after_ttl() {
        let peer = Peer {
            id: "p1".into(),
            address: "10.0.0.1:8080".into(),
            hostname: "node-a".into(),
            models: vec!["m1".into()],
            last_seen: chrono::Utc::now() - chrono::Duration::seconds(31),
        };
        assert!(peer.is_expired(chrono::Duration::seconds(30)));
        assert!(!peer.is_expired(chrono::Duration::seconds(60)));
    }
}
