//! Inference concurrency limiter (spec.md §4.7): a global cap and a per-ip
//! cap, both of which must hold for an acquire to succeed. Modeled as a
//! single `parking_lot::Mutex`-guarded counter pair rather than two
//! independent atomics, because "increment global, then check per-ip, then
//! maybe roll back global" has to happen as one step or a racing release
//! can observe a torn state.

use std::collections::HashMap;
use std::sync::Arc;

use gateway_core::Error;
use parking_lot::Mutex;

struct State {
    global: usize,
    per_ip: HashMap<String, usize>,
}

pub struct InferenceLimiter {
    state: Mutex<State>,
    global_cap: usize,
    per_ip_cap: usize,
}

/// Releases both the global and per-ip slot on drop. Holding this across an
/// inference call is the caller's responsibility; it intentionally carries
/// no reference to the request itself.
pub struct InferenceGuard {
    limiter: Arc<InferenceLimiter>,
    ip: String,
}

impl Drop for InferenceGuard {
    fn drop(&mut self) {
        self.limiter.release(&self.ip);
    }
}

impl InferenceLimiter {
    pub fn new(global_cap: usize, per_ip_cap: usize) -> Arc<Self> {
        Arc::new(InferenceLimiter {
            state: Mutex::new(State { global: 0, per_ip: HashMap::new() }),
            global_cap,
            per_ip_cap,
        })
    }

    /// Acquires a slot for `ip`, succeeding only if both caps have room.
    /// Spec.md §9: "`Acquire(ip)` must succeed on both or release the
    /// global slot before failing."
    pub fn acquire(self: &Arc<Self>, ip: &str) -> Result<InferenceGuard, Error> {
        let mut state = self.state.lock();
        if state.global >= self.global_cap {
            return Err(Error::TooManyConcurrent);
        }
        state.global += 1;

        let count = state.per_ip.entry(ip.to_string()).or_insert(0);
        if *count >= self.per_ip_cap {
            state.global -= 1;
            return Err(Error::TooManyConcurrent);
        }
        *count += 1;

        Ok(InferenceGuard { limiter: Arc::clone(self), ip: ip.to_string() })
    }

    fn release(&self, ip: &str) {
        let mut state = self.state.lock();
        state.global = state.global.saturating_sub(1);
        if let Some(count) = state.per_ip.get_mut(ip) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                state.per_ip.remove(ip);
            }
        }
    }

    pub fn global_in_flight(&self) -> usize {
        self.state.lock().global
    }

    pub fn per_ip_in_flight(&self, ip: &str) -> usize {
        self.state.lock().per_ip.get(ip).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquires_up_to_global_cap_across_distinct_ips() {
        let limiter = InferenceLimiter::new(2, 2);
        let _a = limiter.acquire("1.1.1.1").unwrap();
        let _b = limiter.acquire("2.2.2.2").unwrap();
        assert!(matches!(limiter.acquire("3.3.3.3"), Err(Error::TooManyConcurrent)));
    }

    #[test]
    fn per_ip_cap_rejects_before_global_cap_is_hit() {
        let limiter = InferenceLimiter::new(5, 1);
        let _a = limiter.acquire("1.1.1.1").unwrap();
        assert!(matches!(limiter.acquire("1.1.1.1"), Err(Error::TooManyConcurrent)));
        assert_eq!(limiter.global_in_flight(), 1);
    }

    #[test]
    fn per_ip_rejection_releases_the_global_slot() {
        let limiter = InferenceLimiter::new(5, 1);
        let _a = limiter.acquire("1.1.1.1").unwrap();
        let _ = limiter.acquire("1.1.1.1");
        assert_eq!(limiter.global_in_flight(), 1);
    }

    #[test]
    fn dropping_the_guard_releases_both_slots() {
        let limiter = InferenceLimiter::new(2, 1);
        {
            let _guard = limiter.acquire("1.1.1.1").unwrap();
            assert_eq!(limiter.global_in_flight(), 1);
        }
        assert_eq!(limiter.global_in_flight(), 0);
        assert_eq!(limiter.per_ip_in_flight("1.1.1.1"), 0);
    }

    #[test]
    fn same_ip_can_reacquire_after_release() {
        let limiter = InferenceLimiter::new(2, 1);
        drop(limiter.acquire("1.1.1.1").unwrap());
        assert!(limiter.acquire("1.1.1.1").is_ok());
    }
}
