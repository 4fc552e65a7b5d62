//! Application state (spec.md §9: components are carried as fields of a
//! server value, not globals). Grounded on the teacher's `AppState`
//! (`crates/server/src/state.rs`): one `Arc`-wrapped field per subsystem,
//! cheap to `Clone` for axum's `State` extractor, with config behind a
//! `parking_lot::RwLock` so `reload_config` can swap it without a restart.

use std::path::PathBuf;
use std::sync::Arc;

use gateway_cache::ModelCache;
use gateway_config::Settings;
use gateway_dispatcher::Dispatcher;
use gateway_engine::EngineClient;
use gateway_peer::PeerTable;
use gateway_progress::ProgressRegistry;
use gateway_ratelimit::{GeneralRateLimiter, InferenceLimiter};
use gateway_registry::ModelRegistry;
use gateway_respcache::ResponseCache;
use metrics_exporter_prometheus::PrometheusHandle;
use parking_lot::RwLock;

use crate::auth::UserStore;

#[derive(Clone)]
pub struct AppState {
    pub metrics_handle: PrometheusHandle,
    pub config: Arc<RwLock<Settings>>,
    pub dispatcher: Arc<Dispatcher>,
    pub registry: Arc<ModelRegistry>,
    pub cache: Arc<ModelCache>,
    pub response_cache: Arc<ResponseCache>,
    pub general_limiter: Arc<GeneralRateLimiter>,
    pub inference_limiter: Arc<InferenceLimiter>,
    pub progress: Arc<ProgressRegistry>,
    pub peer_table: Option<Arc<PeerTable>>,
    pub http_client: reqwest::Client,
    pub models_dir: PathBuf,
    pub user_store: Arc<dyn UserStore>,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    /// Wires every component from a loaded `Settings` plus an already
    /// constructed engine client, registry, and cache (the caller decides
    /// the engine — real child process or `MockEngine` per
    /// `models.use_mock_engine`, spec.md §9).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: Settings,
        engine: Arc<dyn EngineClient>,
        registry: Arc<ModelRegistry>,
        cache: Arc<ModelCache>,
        peer_table: Option<Arc<PeerTable>>,
        user_store: Arc<dyn UserStore>,
        metrics_handle: PrometheusHandle,
    ) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&registry), Arc::clone(&cache), engine));

        let response_cache = Arc::new(ResponseCache::new(
            settings.response_cache.max_entries,
            std::time::Duration::from_secs(settings.response_cache.ttl_secs),
        ));

        let general_limiter = Arc::new(GeneralRateLimiter::new(
            settings.rate_limit.general.requests_per_interval,
            settings.rate_limit.general.interval_secs,
            settings.rate_limit.general.burst,
            settings.rate_limit.general.max_buckets,
            std::time::Duration::from_secs(settings.rate_limit.general.idle_ttl_secs),
        ));

        let inference_limiter = InferenceLimiter::new(settings.rate_limit.inference.global_cap, settings.rate_limit.inference.per_ip_cap);

        let progress = Arc::new(ProgressRegistry::new(std::time::Duration::from_secs(300)));

        let models_dir = PathBuf::from(settings.models.directory.clone());

        AppState {
            metrics_handle,
            config: Arc::new(RwLock::new(settings)),
            dispatcher,
            registry,
            cache,
            response_cache,
            general_limiter,
            inference_limiter,
            progress,
            peer_table,
            http_client: reqwest::Client::new(),
            models_dir,
            user_store,
            started_at: chrono::Utc::now(),
        }
    }

    /// Snapshot of current settings without holding the lock across an
    /// await; callers that need a single field should prefer reading it
    /// directly under a short-lived `config.read()` instead.
    pub fn get_config(&self) -> Settings {
        self.config.read().clone()
    }

    /// Reloads configuration from disk, matching the teacher's
    /// `reload_config`. Settings that affect already-constructed
    /// subsystems (cache size, rate-limit caps) take effect only on the
    /// next process start; this only swaps the snapshot other readers see.
    pub fn reload_config(&self, env: Option<&str>) -> Result<(), String> {
        let settings = gateway_config::load_settings(env).map_err(|e| e.to_string())?;
        *self.config.write() = settings;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::GuestOnlyStore;
    use gateway_engine::MockEngine;

    fn test_state() -> (AppState, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let registry = Arc::new(ModelRegistry::new(vec![tmp.path().to_path_buf()]));
        let cache_settings = gateway_cache::CacheSettings {
            binary: PathBuf::from("/bin/true"),
            max_instances: 2,
            load_timeout: std::time::Duration::from_millis(50),
            health_poll_initial_backoff: std::time::Duration::from_millis(5),
            health_poll_max_backoff: std::time::Duration::from_millis(10),
            port_range_start: 49152,
            port_range_end: 65535,
            port_select_retries: 5,
            eviction_drain_timeout: std::time::Duration::from_millis(50),
            shutdown_grace: std::time::Duration::from_millis(50),
            host: "127.0.0.1".into(),
            context_size: 2048,
            num_threads: 2,
            num_gpu_layers: 0,
        };
        let cache = Arc::new(ModelCache::new(cache_settings));
        let engine: Arc<dyn EngineClient> = Arc::new(MockEngine::new(0));
        let state = AppState::new(
            Settings::default(),
            engine,
            registry,
            cache,
            None,
            Arc::new(GuestOnlyStore),
            crate::metrics::handle_for_tests(),
        );
        (state, tmp)
    }

    #[test]
    fn new_wires_every_subsystem() {
        let (state, _tmp) = test_state();
        assert_eq!(state.response_cache.stats().entry_count, 0);
        assert_eq!(state.inference_limiter.global_in_flight(), 0);
    }

    #[test]
    fn get_config_snapshots_current_settings() {
        let (state, _tmp) = test_state();
        assert_eq!(state.get_config().server.port, 8080);
    }
}
