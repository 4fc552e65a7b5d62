//! Model cache (spec.md §4.3, C3) — the hardest subsystem: owns a bounded
//! pool of child inference processes keyed by model id, picks a free port
//! per instance, enforces LRU eviction, liveness-checks, and unloads
//! everything on shutdown.
//!
//! Grounded on the teacher's `SessionManager`: a single lock serializing
//! mutations, a bounded map with LRU-style capacity enforcement, and a
//! background cleanup task driven by `tokio::select!` + `watch`.

pub mod error;
pub mod port;
pub mod spawn;
pub mod stats;

pub use error::CacheError;
pub use stats::{CacheStats, InstanceStats};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gateway_core::model::{ModelDescriptor, ModelInstance};
use parking_lot::Mutex;
use tokio::process::Child;
use tracing::{info, warn};

use error::Result;
use spawn::{spawn_child, stop_child, wait_for_health, SpawnSpec};
use stats::Counters;

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub binary: PathBuf,
    pub max_instances: usize,
    pub load_timeout: Duration,
    pub health_poll_initial_backoff: Duration,
    pub health_poll_max_backoff: Duration,
    pub port_range_start: u16,
    pub port_range_end: u16,
    pub port_select_retries: u32,
    pub eviction_drain_timeout: Duration,
    pub shutdown_grace: Duration,
    pub host: String,
    pub context_size: u32,
    pub num_threads: u32,
    pub num_gpu_layers: u32,
}

struct Entry {
    instance: ModelInstance,
    size_bytes: u64,
    child: Arc<tokio::sync::Mutex<Child>>,
    active_ops: Arc<AtomicUsize>,
}

/// RAII guard held by a caller (typically the dispatcher, for the duration
/// of one inference or stream) so the cache knows an instance has an
/// outstanding reader before deciding to hard-kill it on eviction.
pub struct OperationGuard {
    active_ops: Arc<AtomicUsize>,
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.active_ops.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct ModelCache {
    settings: CacheSettings,
    http: reqwest::Client,
    entries: Mutex<HashMap<String, Entry>>,
    load_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    counters: Counters,
    shutting_down: AtomicBool,
}

impl ModelCache {
    pub fn new(settings: CacheSettings) -> Self {
        let http = reqwest::Client::builder()
            .build()
            .expect("reqwest client build is infallible with default options");
        ModelCache {
            settings,
            http,
            entries: Mutex::new(HashMap::new()),
            load_locks: Mutex::new(HashMap::new()),
            counters: Counters::default(),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Guarantees: after a successful return, a child process is accepting
    /// HTTP on the returned instance's port, has the requested model
    /// resident, and is the only process bound to that port.
    pub async fn get_or_load(&self, descriptor: &ModelDescriptor) -> Result<ModelInstance> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(CacheError::Shutdown);
        }

        if let Some(instance) = self.try_fast_path(&descriptor.id).await {
            return Ok(instance);
        }

        // Per-model single-flight: concurrent misses for the same model
        // queue behind one `tokio::sync::Mutex`, so exactly one load runs.
        let load_lock = self.load_lock_for(&descriptor.id);
        let _guard = load_lock.lock().await;

        if let Some(instance) = self.try_fast_path(&descriptor.id).await {
            return Ok(instance);
        }

        self.evict_if_at_capacity(&descriptor.id);

        let port = port::select_port(
            self.settings.port_range_start,
            self.settings.port_range_end,
            self.settings.port_select_retries,
        )?;

        let spec = SpawnSpec {
            binary: self.settings.binary.clone(),
            model_path: descriptor.path.clone(),
            projector_path: descriptor.projector_path.clone(),
            host: self.settings.host.clone(),
            port,
            context_size: self.settings.context_size,
            num_threads: self.settings.num_threads,
            num_gpu_layers: self.settings.num_gpu_layers,
        };

        let spawned = spawn_child(&spec)?;
        let mut child = spawned.child;

        if let Err(e) = wait_for_health(
            &self.http,
            port,
            self.settings.health_poll_initial_backoff,
            self.settings.health_poll_max_backoff,
            self.settings.load_timeout,
        )
        .await
        {
            warn!(model_id = %descriptor.id, port, "child failed to become healthy, killing");
            stop_child(&mut child, spawned.pid, self.settings.shutdown_grace).await;
            return Err(e);
        }

        let now = chrono::Utc::now();
        let instance = ModelInstance {
            model_id: descriptor.id.clone(),
            pid: spawned.pid,
            port,
            loaded_at: now,
            last_used_at: now,
        };

        self.entries.lock().insert(
            descriptor.id.clone(),
            Entry {
                instance: instance.clone(),
                size_bytes: descriptor.size_bytes,
                child: Arc::new(tokio::sync::Mutex::new(child)),
                active_ops: Arc::new(AtomicUsize::new(0)),
            },
        );
        self.counters.record_miss();
        self.counters.record_load();
        info!(model_id = %descriptor.id, port, pid = spawned.pid, "loaded model");
        Ok(instance)
    }

    /// Returns a loaded instance if present and healthy, touching its
    /// `last_used_at`. Reads of a loaded instance never take the mutation
    /// lock for longer than a single map lookup.
    async fn try_fast_path(&self, model_id: &str) -> Option<ModelInstance> {
        let port = {
            let entries = self.entries.lock();
            entries.get(model_id).map(|e| e.instance.port)?
        };
        if self.probe_health(port).await {
            let mut entries = self.entries.lock();
            if let Some(entry) = entries.get_mut(model_id) {
                entry.instance.touch();
                self.counters.record_hit();
                return Some(entry.instance.clone());
            }
            None
        } else {
            // Stale entry: liveness failed, drop it and fall through to a
            // cold load.
            let removed = self.entries.lock().remove(model_id);
            if let Some(entry) = removed {
                warn!(model_id, "liveness probe failed, evicting stale instance");
                self.spawn_stop_task(entry, Duration::from_secs(0));
            }
            None
        }
    }

    async fn probe_health(&self, port: u16) -> bool {
        let url = format!("http://127.0.0.1:{port}/health");
        matches!(
            self.http.get(&url).timeout(Duration::from_secs(2)).send().await,
            Ok(resp) if resp.status().is_success()
        )
    }

    fn load_lock_for(&self, model_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.load_locks
            .lock()
            .entry(model_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Picks the least-recently-used instance whose `model_id` differs from
    /// the one being loaded and removes it from the map immediately so new
    /// callers never observe it again; the actual process stop is deferred
    /// until outstanding operations finish or the drain timeout elapses.
    fn evict_if_at_capacity(&self, requested_model_id: &str) {
        let victim = {
            let entries = self.entries.lock();
            if entries.len() < self.settings.max_instances {
                return;
            }
            entries
                .iter()
                .filter(|(id, _)| id.as_str() != requested_model_id)
                .min_by_key(|(_, e)| e.instance.last_used_at)
                .map(|(id, _)| id.clone())
        };
        let Some(victim_id) = victim else { return };
        let removed = self.entries.lock().remove(&victim_id);
        if let Some(entry) = removed {
            self.counters.record_eviction();
            info!(model_id = %victim_id, "evicting least-recently-used instance");
            self.spawn_stop_task(entry, self.settings.eviction_drain_timeout);
        }
    }

    /// Stops that model's child with bounded delay (spec.md §4.3 `Unload`).
    pub async fn unload(&self, model_id: &str) -> Result<()> {
        let removed = self.entries.lock().remove(model_id);
        match removed {
            Some(entry) => {
                self.spawn_stop_task(entry, self.settings.eviction_drain_timeout);
                Ok(())
            }
            None => Err(CacheError::NotFound(model_id.to_string())),
        }
    }

    /// Stops every child during shutdown. Refuses new loads from the moment
    /// it's called.
    pub async fn unload_all(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        let entries: Vec<Entry> = self.entries.lock().drain().map(|(_, e)| e).collect();
        let grace = self.settings.shutdown_grace;
        let mut handles = Vec::new();
        for entry in entries {
            let child = entry.child.clone();
            let pid = entry.instance.pid;
            handles.push(tokio::spawn(async move {
                let mut guard = child.lock().await;
                stop_child(&mut guard, pid, grace).await;
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Waits (up to `drain_timeout`) for outstanding operations on the
    /// victim to finish, then stops the process. Never blocks the caller —
    /// runs on a detached task so eviction itself is non-blocking.
    fn spawn_stop_task(&self, entry: Entry, drain_timeout: Duration) {
        let shutdown_grace = self.settings.shutdown_grace;
        tokio::spawn(async move {
            let deadline = tokio::time::Instant::now() + drain_timeout;
            while entry.active_ops.load(Ordering::SeqCst) > 0 && tokio::time::Instant::now() < deadline {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            let mut child = entry.child.lock().await;
            stop_child(&mut child, entry.instance.pid, shutdown_grace).await;
        });
    }

    /// Registers that the caller is about to perform one operation (chat
    /// completion or stream) against this instance; the returned guard must
    /// be held for the duration of that operation.
    pub fn begin_operation(&self, model_id: &str) -> Option<OperationGuard> {
        let entries = self.entries.lock();
        let entry = entries.get(model_id)?;
        entry.active_ops.fetch_add(1, Ordering::SeqCst);
        Some(OperationGuard { active_ops: entry.active_ops.clone() })
    }

    pub fn get_stats(&self) -> CacheStats {
        let entries = self.entries.lock();
        let now = chrono::Utc::now();
        let instances = entries
            .values()
            .map(|e| InstanceStats {
                model_id: e.instance.model_id.clone(),
                port: e.instance.port,
                loaded_at: e.instance.loaded_at,
                last_used_at: e.instance.last_used_at,
                uptime_secs: (now - e.instance.loaded_at).num_seconds(),
                size_bytes: e.size_bytes,
            })
            .collect();
        let (hits, misses, loads, evictions) = self.counters.snapshot();
        CacheStats { instances, hit_count: hits, miss_count: misses, load_count: loads, eviction_count: evictions }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> CacheSettings {
        CacheSettings {
            binary: PathBuf::from("/bin/false"),
            max_instances: 2,
            load_timeout: Duration::from_millis(50),
            health_poll_initial_backoff: Duration::from_millis(5),
            health_poll_max_backoff: Duration::from_millis(20),
            port_range_start: 49152,
            port_range_end: 65535,
            port_select_retries: 5,
            eviction_drain_timeout: Duration::from_millis(100),
            shutdown_grace: Duration::from_millis(100),
            host: "127.0.0.1".into(),
            context_size: 4096,
            num_threads: 4,
            num_gpu_layers: 0,
        }
    }

    #[tokio::test]
    async fn get_or_load_fails_fast_when_binary_cannot_serve_health() {
        // `/bin/false` exits immediately, so the health poll always times
        // out; this exercises the load-timeout path without needing a real
        // inference binary in the test environment.
        let cache = ModelCache::new(settings());
        let descriptor = ModelDescriptor {
            id: "m1".into(),
            path: "/models/m1.gguf".into(),
            size_bytes: 10,
            quantization: "Q4_K_M".into(),
            projector_path: None,
            is_loaded: false,
        };
        let result = cache.get_or_load(&descriptor).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn unload_missing_model_is_not_found() {
        let cache = ModelCache::new(settings());
        let result = cache.unload("missing").await;
        assert!(matches!(result, Err(CacheError::NotFound(_))));
    }

    #[tokio::test]
    async fn stats_start_empty() {
        let cache = ModelCache::new(settings());
        let stats = cache.get_stats();
        assert_eq!(stats.instances.len(), 0);
        assert_eq!(stats.hit_count, 0);
    }

    #[tokio::test]
    async fn shutdown_rejects_new_loads() {
        let cache = ModelCache::new(settings());
        cache.unload_all().await;
        let descriptor = ModelDescriptor {
            id: "m1".into(),
            path: "/models/m1.gguf".into(),
            size_bytes: 10,
            quantization: String::new(),
            projector_path: None,
            is_loaded: false,
        };
        let result = cache.get_or_load(&descriptor).await;
        assert!(matches!(result, Err(CacheError::Shutdown)));
    }
}
