//! Peer table (spec.md §4.9): the set of peers seen announcing recently,
//! keyed by node id. Entries expire after `ttl_multiplier` announce
//! intervals without a fresh announcement, the same idle-TTL shape as the
//! rate limiter's buckets.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use gateway_core::Peer;
use parking_lot::RwLock;
use tokio::sync::watch;

pub struct PeerTable {
    peers: RwLock<HashMap<String, Peer>>,
    ttl: chrono::Duration,
}

impl PeerTable {
    pub fn new(ttl: Duration) -> Self {
        PeerTable { peers: RwLock::new(HashMap::new()), ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero()) }
    }

    pub fn upsert(&self, peer: Peer) {
        self.peers.write().insert(peer.id.clone(), peer);
    }

    pub fn list(&self) -> Vec<Peer> {
        self.peers.read().values().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<Peer> {
        self.peers.read().get(id).cloned()
    }

    pub fn remove(&self, id: &str) {
        self.peers.write().remove(id);
    }

    pub fn count(&self) -> usize {
        self.peers.read().len()
    }

    /// Drops peers whose `last_seen` is older than the configured TTL.
    pub fn sweep_expired(&self) {
        let ttl = self.ttl;
        let mut peers = self.peers.write();
        let before = peers.len();
        peers.retain(|_, p| !p.is_expired(ttl));
        let removed = before - peers.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = peers.len(), "peer table swept expired peers");
        }
    }

    pub fn start_sweep_task(self: &Arc<Self>, interval: Duration) -> watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let table = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => table.sweep_expired(),
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::info!("peer table sweep task shutting down");
                            break;
                        }
                    }
                }
            }
        });

        shutdown_tx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(id: &str, last_seen: chrono::DateTime<chrono::Utc>) -> Peer {
        Peer { id: id.into(), address: "10.0.0.1:8080".into(), hostname: "node".into(), models: vec![], last_seen }
    }

    #[test]
    fn upsert_then_get_roundtrips() {
        let table = PeerTable::new(Duration::from_secs(30));
        table.upsert(peer("p1", chrono::Utc::now()));
        assert!(table.get("p1").is_some());
    }

    #[test]
    fn sweep_expired_removes_stale_peers() {
        let table = PeerTable::new(Duration::from_secs(30));
        table.upsert(peer("p1", chrono::Utc::now() - chrono::Duration::seconds(60)));
        table.sweep_expired();
        assert_eq!(table.count(), 0);
    }

    #[test]
    fn sweep_expired_keeps_fresh_peers() {
        let table = PeerTable::new(Duration::from_secs(30));
        table.upsert(peer("p1", chrono::Utc::now()));
        table.sweep_expired();
        assert_eq!(table.count(), 1);
    }

    #[test]
    fn upsert_overwrites_same_node_id() {
        let table = PeerTable::new(Duration::from_secs(30));
        table.upsert(peer("p1", chrono::Utc::now()));
        table.upsert(Peer { models: vec!["m1".into()], ..peer("p1", chrono::Utc::now()) });
        assert_eq!(table.count(), 1);
        assert_eq!(table.get("p1").unwrap().models, vec!["m1".to_string()]);
    }
}
