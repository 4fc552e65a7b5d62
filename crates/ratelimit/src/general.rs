//! General token-bucket rate limiter (spec.md §4.7), keyed by `"ip:path"`.
//!
//! Grounded on the teacher's bounded-map-with-cleanup shape
//! (`SessionManager`): a capacity check on insert with oldest-entry
//! eviction, plus a periodic idle sweep shut down via `watch::channel`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::watch;

struct Bucket {
    tokens: f64,
    last_refill: DateTime<Utc>,
}

impl Bucket {
    fn new(capacity: f64) -> Self {
        Bucket { tokens: capacity, last_refill: Utc::now() }
    }

    fn try_take(&mut self, capacity: f64, refill_per_sec: f64) -> bool {
        let now = Utc::now();
        let elapsed_secs = (now - self.last_refill).num_milliseconds() as f64 / 1000.0;
        self.tokens = (self.tokens + elapsed_secs.max(0.0) * refill_per_sec).min(capacity);
        self.last_refill = now;
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

pub struct GeneralRateLimiter {
    buckets: RwLock<HashMap<String, Bucket>>,
    capacity: f64,
    refill_per_sec: f64,
    max_buckets: usize,
    idle_ttl: chrono::Duration,
}

impl GeneralRateLimiter {
    pub fn new(requests_per_interval: u32, interval_secs: u64, burst: u32, max_buckets: usize, idle_ttl: Duration) -> Self {
        let interval_secs = interval_secs.max(1) as f64;
        GeneralRateLimiter {
            buckets: RwLock::new(HashMap::new()),
            capacity: burst.max(1) as f64,
            refill_per_sec: requests_per_interval as f64 / interval_secs,
            max_buckets,
            idle_ttl: chrono::Duration::from_std(idle_ttl).unwrap_or(chrono::Duration::zero()),
        }
    }

    /// Returns whether the request identified by `key` (conventionally
    /// `"{ip}:{path}"`) is allowed under the bucket's current balance.
    pub fn check(&self, key: &str) -> bool {
        let mut buckets = self.buckets.write();
        if let Some(bucket) = buckets.get_mut(key) {
            return bucket.try_take(self.capacity, self.refill_per_sec);
        }

        if buckets.len() >= self.max_buckets {
            if let Some(oldest) = buckets.iter().min_by_key(|(_, b)| b.last_refill).map(|(k, _)| k.clone()) {
                buckets.remove(&oldest);
            }
        }

        let mut bucket = Bucket::new(self.capacity);
        let allowed = bucket.try_take(self.capacity, self.refill_per_sec);
        buckets.insert(key.to_string(), bucket);
        allowed
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.read().len()
    }

    /// Removes buckets that haven't been touched within the idle TTL.
    pub fn sweep_idle(&self) {
        let now = Utc::now();
        let mut buckets = self.buckets.write();
        let before = buckets.len();
        buckets.retain(|_, b| now - b.last_refill <= self.idle_ttl);
        let removed = before - buckets.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = buckets.len(), "rate limiter swept idle buckets");
        }
    }

    pub fn start_sweep_task(self: &Arc<Self>, interval: Duration) -> watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let limiter = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => limiter.sweep_idle(),
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::info!("rate limiter sweep task shutting down");
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

    #[test]
    fn allows_requests_up_to_burst() {
        let limiter = GeneralRateLimiter::new(60, 60, 3, 100, Duration::from_secs(600));
        assert!(limiter.check("1.1.1.1:/v1/chat"));
        assert!(limiter.check("1.1.1.1:/v1/chat"));
        assert!(limiter.check("1.1.1.1:/v1/chat"));
        assert!(!limiter.check("1.1.1.1:/v1/chat"));
    }

    #[test]
    fn different_keys_have_independent_buckets() {
        let limiter = GeneralRateLimiter::new(60, 60, 1, 100, Duration::from_secs(600));
        assert!(limiter.check("a"));
        assert!(limiter.check("b"));
    }

    #[test]
    fn overflow_evicts_oldest_bucket() {
        let limiter = GeneralRateLimiter::new(60, 60, 1, 2, Duration::from_secs(600));
        limiter.check("a");
        std::thread::sleep(Duration::from_millis(5));
        limiter.check("b");
        std::thread::sleep(Duration::from_millis(5));
        limiter.check("c");
        assert_eq!(limiter.bucket_count(), 2);
    }

    #[test]
    fn sweep_idle_removes_stale_buckets() {
        let limiter = GeneralRateLimiter::new(60, 60, 1, 100, Duration::from_millis(1));
        limiter.check("a");
        std::thread::sleep(Duration::from_millis(10));
        limiter.sweep_idle();
        assert_eq!(limiter.bucket_count(), 0);
    }
}
