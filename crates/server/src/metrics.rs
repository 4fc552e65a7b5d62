//! Prometheus metrics (spec.md §4.10 "emits metrics"). Grounded on the
//! teacher's `metrics`/`metrics-exporter-prometheus` pairing (referenced by
//! its server crate's public `init_metrics`/`record_*` functions) even
//! though that module's source wasn't in the retrieved pack — the same
//! install-a-global-recorder-then-render-on-scrape shape applies here.

use std::time::Duration;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::state::AppState;

pub fn init_metrics() -> PrometheusHandle {
    PrometheusBuilder::new().install_recorder().expect("failed to install prometheus recorder")
}

/// A handle not wired to the global recorder, for tests that construct an
/// `AppState` without caring whether metrics are actually collected.
/// `install_recorder` panics if called more than once per process, which
/// would make every test touching `AppState::new` fight over one recorder.
pub fn handle_for_tests() -> PrometheusHandle {
    PrometheusBuilder::new().build_recorder().handle()
}

pub async fn metrics_handler(axum::extract::State(state): axum::extract::State<AppState>) -> String {
    state.metrics_handle.render()
}

pub fn record_request(method: &str, path: &str, status: u16, latency: Duration) {
    metrics::counter!("gateway_http_requests_total", "method" => method.to_string(), "path" => path.to_string(), "status" => status.to_string()).increment(1);
    metrics::histogram!("gateway_http_request_duration_seconds", "method" => method.to_string(), "path" => path.to_string())
        .record(latency.as_secs_f64());
}

pub fn record_cache_result(hit: bool) {
    let outcome = if hit { "hit" } else { "miss" };
    metrics::counter!("gateway_response_cache_total", "outcome" => outcome).increment(1);
}

pub fn record_rate_limit_rejection(kind: &str) {
    metrics::counter!("gateway_rate_limit_rejections_total", "kind" => kind.to_string()).increment(1);
}

pub fn record_active_inferences(count: usize) {
    metrics::gauge!("gateway_active_inferences").set(count as f64);
}

pub fn record_model_load(model_id: &str) {
    metrics::counter!("gateway_model_loads_total", "model_id" => model_id.to_string()).increment(1);
}

pub fn record_model_eviction(model_id: &str) {
    metrics::counter!("gateway_model_evictions_total", "model_id" => model_id.to_string()).increment(1);
}
