//! Response cache (spec.md §4.6, C6): keys a deterministic chat completion
//! by its `RequestFingerprint` and serves it back within a TTL, sparing a
//! repeat of the same deterministic prompt an extra trip through the child
//! process.
//!
//! Grounded on the teacher's `SessionManager` bounded-map-with-background-
//! cleanup shape (`crates/server/src/session.rs`): a `parking_lot::RwLock`
//! map, a capacity check on insert, and a periodic sweep task shut down via
//! `watch::channel`. Eviction on overflow here is oldest-by-`expires_at`
//! rather than session-expiry, since that's the cheapest proxy for "least
//! likely to still be useful" without tracking per-entry access order.

pub mod stats;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use gateway_core::chat::ChatCompletionResponse;
use gateway_core::RequestFingerprint;
use parking_lot::RwLock;
use stats::{Counters, ResponseCacheStats};
use tokio::sync::watch;

struct Entry {
    response: ChatCompletionResponse,
    expires_at: DateTime<Utc>,
}

pub struct ResponseCache {
    entries: RwLock<HashMap<RequestFingerprint, Entry>>,
    max_entries: usize,
    ttl: chrono::Duration,
    counters: Counters,
}

impl ResponseCache {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        ResponseCache {
            entries: RwLock::new(HashMap::new()),
            max_entries,
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero()),
            counters: Counters::default(),
        }
    }

    /// Returns the cached response if present and unexpired. An expired hit
    /// is removed and counted as a miss, matching the teacher's
    /// remove-on-access-if-expired pattern in `Session::is_expired`.
    pub fn get(&self, key: RequestFingerprint) -> Option<ChatCompletionResponse> {
        {
            let entries = self.entries.read();
            if let Some(entry) = entries.get(&key) {
                if entry.expires_at > Utc::now() {
                    self.counters.record_hit();
                    return Some(entry.response.clone());
                }
            } else {
                self.counters.record_miss();
                return None;
            }
        }
        // Expired: drop it under the write lock, then report a miss.
        self.entries.write().remove(&key);
        self.counters.record_miss();
        None
    }

    /// Inserts a response, evicting the oldest-by-expiry entry first if the
    /// cache is at capacity.
    pub fn put(&self, key: RequestFingerprint, response: ChatCompletionResponse) {
        let mut entries = self.entries.write();
        if entries.len() >= self.max_entries && !entries.contains_key(&key) {
            if let Some(oldest) = entries.iter().min_by_key(|(_, e)| e.expires_at).map(|(k, _)| *k) {
                entries.remove(&oldest);
                self.counters.record_eviction();
            }
        }
        entries.insert(key, Entry { response, expires_at: Utc::now() + self.ttl });
    }

    pub fn record_bypass(&self) {
        self.counters.record_bypass();
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn stats(&self) -> ResponseCacheStats {
        let (hit_count, miss_count, bypass_count, eviction_count) = self.counters.snapshot();
        ResponseCacheStats { entry_count: self.entries.read().len(), hit_count, miss_count, bypass_count, eviction_count }
    }

    /// Removes entries whose TTL has elapsed, independent of access.
    pub fn sweep_expired(&self) {
        let now = Utc::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        let removed = before - entries.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = entries.len(), "response cache swept expired entries");
        }
    }

    pub fn start_sweep_task(self: &Arc<Self>, interval: Duration) -> watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let cache = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => cache.sweep_expired(),
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::info!("response cache sweep task shutting down");
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
    use gateway_core::chat::{Choice, Message, Role, Usage};

    fn response() -> ChatCompletionResponse {
        ChatCompletionResponse {
            id: "c1".into(),
            object: "chat.completion".into(),
            created: 0,
            model: "m1".into(),
            choices: vec![Choice { index: 0, message: Message { role: Role::Assistant, content: "hi".into() }, finish_reason: Some("stop".into()) }],
            usage: Usage { prompt_tokens: 1, completion_tokens: 1, total_tokens: 2 },
        }
    }

    #[test]
    fn miss_on_empty_cache() {
        let cache = ResponseCache::new(10, Duration::from_secs(60));
        assert!(cache.get(RequestFingerprint(1)).is_none());
        assert_eq!(cache.stats().miss_count, 1);
    }

    #[test]
    fn put_then_get_hits() {
        let cache = ResponseCache::new(10, Duration::from_secs(60));
        cache.put(RequestFingerprint(1), response());
        assert!(cache.get(RequestFingerprint(1)).is_some());
        assert_eq!(cache.stats().hit_count, 1);
    }

    #[test]
    fn expired_entry_is_a_miss_and_is_removed() {
        let cache = ResponseCache::new(10, Duration::from_millis(1));
        cache.put(RequestFingerprint(1), response());
        std::thread::sleep(Duration::from_millis(10));
        assert!(cache.get(RequestFingerprint(1)).is_none());
        assert_eq!(cache.stats().entry_count, 0);
    }

    #[test]
    fn overflow_evicts_oldest_by_expiry() {
        let cache = ResponseCache::new(2, Duration::from_secs(60));
        cache.put(RequestFingerprint(1), response());
        std::thread::sleep(Duration::from_millis(5));
        cache.put(RequestFingerprint(2), response());
        std::thread::sleep(Duration::from_millis(5));
        cache.put(RequestFingerprint(3), response());
        assert_eq!(cache.stats().entry_count, 2);
        assert!(cache.get(RequestFingerprint(1)).is_none());
        assert!(cache.get(RequestFingerprint(3)).is_some());
    }

    #[test]
    fn clear_empties_the_cache() {
        let cache = ResponseCache::new(10, Duration::from_secs(60));
        cache.put(RequestFingerprint(1), response());
        cache.clear();
        assert_eq!(cache.stats().entry_count, 0);
    }

    #[test]
    fn sweep_expired_removes_only_stale_entries() {
        let cache = ResponseCache::new(10, Duration::from_millis(1));
        cache.put(RequestFingerprint(1), response());
        std::thread::sleep(Duration::from_millis(10));
        cache.put(RequestFingerprint(2), ChatCompletionResponse { id: "c2".into(), ..response() });
        cache.sweep_expired();
        assert_eq!(cache.stats().entry_count, 1);
    }

    #[tokio::test]
    async fn sweep_task_runs_and_shuts_down_cleanly() {
        let cache = Arc::new(ResponseCache::new(10, Duration::from_millis(1)));
        cache.put(RequestFingerprint(1), response());
        let shutdown = cache.start_sweep_task(Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(20)).await;
        let _ = shutdown.send(true);
        assert_eq!(cache.stats().entry_count, 0);
    }
}
