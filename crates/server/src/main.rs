//! Gateway entry point. Grounded on the teacher's `main.rs`
//! (`crates/server/src/main.rs`): env-driven config load with a
//! defaults fallback, tracing init before the first log line, metrics
//! init, router construction, then `axum::serve(...).with_graceful_shutdown`
//! keyed off the same ctrl_c/SIGTERM `tokio::select!`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use gateway_cache::{CacheSettings, ModelCache};
use gateway_config::{load_settings, Settings};
use gateway_engine::{EngineClient, MockEngine, RealChildClient};
use gateway_peer::PeerPlane;
use gateway_registry::ModelRegistry;
use gateway_server::auth::GuestOnlyStore;
use gateway_server::{create_router, AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env = std::env::var("GATEWAY_ENV").ok();
    let config = match load_settings(env.as_deref()) {
        Ok(settings) => {
            eprintln!("Loaded configuration from files (env: {})", env.as_deref().unwrap_or("default"));
            settings
        }
        Err(e) => {
            eprintln!("Warning: failed to load config: {e}. Using defaults.");
            Settings::default()
        }
    };

    init_tracing(&config);
    tracing::info!("Starting gateway v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(environment = ?config.environment, "Configuration loaded");

    let metrics_handle = gateway_server::metrics::init_metrics();
    tracing::info!("Initialized Prometheus metrics at /metrics");

    let registry = Arc::new(ModelRegistry::new(vec![std::path::PathBuf::from(&config.models.directory)]));
    if let Err(e) = registry.scan_models() {
        tracing::warn!(error = %e, "initial model scan failed");
    }
    tracing::info!(count = registry.list_models().len(), "Scanned models directory");

    let cache_settings = CacheSettings {
        binary: std::path::PathBuf::from("llama-server"),
        max_instances: config.cache.max_instances,
        load_timeout: Duration::from_secs(config.cache.load_timeout_secs),
        health_poll_initial_backoff: Duration::from_millis(config.cache.health_poll_initial_backoff_ms),
        health_poll_max_backoff: Duration::from_millis(config.cache.health_poll_max_backoff_ms),
        port_range_start: config.cache.port_range_start,
        port_range_end: config.cache.port_range_end,
        port_select_retries: config.cache.port_select_retries,
        eviction_drain_timeout: Duration::from_secs(config.cache.eviction_drain_timeout_secs),
        shutdown_grace: Duration::from_secs(config.cache.shutdown_grace_secs),
        host: config.server.host.clone(),
        context_size: config.models.max_context,
        num_threads: config.models.num_threads,
        num_gpu_layers: config.models.num_gpu_layers,
    };
    let cache = Arc::new(ModelCache::new(cache_settings));

    let engine: Arc<dyn EngineClient> = if config.models.use_mock_engine {
        tracing::warn!("models.use_mock_engine is set; serving synthetic completions");
        Arc::new(MockEngine::new(config.cache.port_range_start))
    } else {
        Arc::new(RealChildClient::new(config.cache.port_range_start, Duration::from_secs(config.cache.load_timeout_secs)))
    };

    // Kept alive for the process lifetime: dropping `PeerPlane` sends shutdown
    // to its announce/listen/sweep tasks, so it must outlive the server loop.
    let mut peer_plane: Option<PeerPlane> = None;
    let peer_table = if config.peer.enabled {
        let node_id = config.peer.node_id.clone().unwrap_or_else(gateway_peer::generate_node_id);
        let http_addr = format!("{}:{}", config.server.host, config.server.port);
        let ttl = Duration::from_secs(config.peer.announce_interval_secs * config.peer.ttl_multiplier as u64);
        let registry_for_models = Arc::clone(&registry);
        let models_fn: Arc<dyn Fn() -> Vec<String> + Send + Sync> =
            Arc::new(move || registry_for_models.list_models().into_iter().map(|m| m.id).collect());

        match PeerPlane::start(node_id, http_addr, config.peer.broadcast_port, Duration::from_secs(config.peer.announce_interval_secs), ttl, models_fn).await {
            Ok(plane) => {
                tracing::info!("Peer discovery started on broadcast port {}", config.peer.broadcast_port);
                let table = Arc::clone(&plane.table);
                peer_plane = Some(plane);
                Some(table)
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to start peer plane; continuing without it");
                None
            }
        }
    } else {
        None
    };

    let state = AppState::new(config.clone(), engine, registry, cache, peer_table, Arc::new(GuestOnlyStore), metrics_handle);

    let response_cache_shutdown = state.response_cache.start_sweep_task(Duration::from_secs(config.response_cache.sweep_interval_secs));
    let general_limiter_shutdown = state.general_limiter.start_sweep_task(Duration::from_secs(config.rate_limit.general.idle_sweep_interval_secs));
    let progress_shutdown = state.progress.start_gc_task(Duration::from_secs(60));

    let app = create_router(state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!(%addr, "Listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    tracing::info!("Shutting down background tasks");
    for tx in [response_cache_shutdown, general_limiter_shutdown, progress_shutdown] {
        let _ = tx.send(true);
    }
    drop(peer_plane);
    state.cache.unload_all().await;
    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => tracing::info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}

/// No OpenTelemetry variant: this spec has no distributed-tracing
/// non-goal to honor either way, but nothing in the corpus outside the
/// teacher's own `#[cfg(feature = "telemetry")]` branch justifies pulling
/// in the OTLP stack here, so only the console branch is carried.
fn init_tracing(config: &Settings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("gateway={},tower_http=debug", config.observability.log_level).into());

    let subscriber = tracing_subscriber::registry().with(env_filter);
    let fmt_layer =
        if config.observability.log_json { tracing_subscriber::fmt::layer().json().boxed() } else { tracing_subscriber::fmt::layer().boxed() };
    subscriber.with(fmt_layer).init();
}
