//! HTTP routes and handlers (spec.md §4.10, C10). Grounded on the teacher's
//! `create_router`/`build_cors_layer` (`crates/server/src/http.rs`): same
//! middleware layering order (state → auth → trace → compression → cors,
//! applied as `.layer()` calls which wrap outside-in) and the same
//! fail-safe CORS construction (disabled → permissive with a warning,
//! empty origins → localhost default, unparsable origin → logged and
//! skipped).

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use gateway_core::chat::{ChatCompletionRequest, CompletionRequest, EmbeddingsRequest};
use gateway_core::{Error, RequestFingerprint};
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::auth_middleware;
use crate::error::ApiError;
use crate::metrics;
use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    let cors_layer = {
        let config = state.config.read();
        build_cors_layer(&config.server.cors_origins, config.server.cors_enabled)
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/livez", get(livez))
        .route("/readyz", get(readiness_check))
        .route("/metrics", get(metrics::metrics_handler))
        .route("/v1/models", get(list_models))
        .route("/v1/models/:id", axum::routing::delete(delete_model))
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/completions", post(completions))
        .route("/v1/embeddings", post(embeddings))
        .route("/v1/peers", get(list_peers))
        .route("/v1/peers/pull", post(pull_from_peer))
        .route("/v1/downloads/:id", get(get_download_progress))
        .route("/v1/exports", post(start_export))
        .route("/v1/exports/:id", get(get_export_progress))
        .route("/v1/cache/stats", get(cache_stats))
        .route("/v1/cache/clear", post(cache_clear))
        .route("/internal/artifacts/:filename", get(serve_artifact))
        .route_layer(axum::middleware::from_fn_with_state(state.clone(), request_metrics_middleware))
        .route_layer(axum::middleware::from_fn_with_state(state.clone(), auth_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors_layer)
        .with_state(state)
}

fn build_cors_layer(origins: &[String], enabled: bool) -> CorsLayer {
    if !enabled {
        tracing::warn!("CORS is disabled, allowing all origins (not for production)");
        return CorsLayer::permissive();
    }

    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
            .allow_headers(Any);
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| {
            o.parse::<HeaderValue>().ok().or_else(|| {
                tracing::warn!(origin = %o, "invalid CORS origin, skipping");
                None
            })
        })
        .collect();

    if parsed.is_empty() {
        tracing::error!("all configured CORS origins are invalid, falling back to permissive");
        return CorsLayer::permissive();
    }

    CorsLayer::new()
        .allow_origin(parsed)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any)
        .allow_credentials(true)
}

/// Records method/path/status/latency for every request, the "request
/// logger... increments metrics" stage of spec.md §4.10's middleware chain.
async fn request_metrics_middleware(request: axum::extract::Request, next: axum::middleware::Next) -> axum::response::Response {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();
    let response = next.run(request).await;
    metrics::record_request(&method, &path, response.status().as_u16(), start.elapsed());
    response
}

fn client_key(headers: &HeaderMap, path: &str) -> (String, String) {
    let ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    (ip.clone(), format!("{ip}:{path}"))
}

/// Spec.md §4.6: "requests that explicitly opt out via header bypass" the
/// response cache. `Cache-Control: no-store`/`no-cache` is the standard
/// HTTP opt-out signal, so it's honored here rather than a bespoke header.
fn cache_opt_out(headers: &HeaderMap) -> bool {
    headers
        .get(axum::http::header::CACHE_CONTROL)
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            let lower = v.to_lowercase();
            lower.contains("no-store") || lower.contains("no-cache")
        })
        .unwrap_or(false)
}

async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let model_count = state.registry.list_models().len();
    let cache_stats = state.cache.get_stats();
    let uptime_secs = (chrono::Utc::now() - state.started_at).num_seconds();

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
            "uptime_secs": uptime_secs,
            "model_count": model_count,
            "loaded_instances": cache_stats.instances.len(),
        })),
    )
}

async fn livez() -> StatusCode {
    StatusCode::OK
}

/// Spec.md §4.10: "`/ready` returns 503 when no models available."
async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let model_count = state.registry.list_models().len();
    let ready = model_count > 0;
    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (
        status_code,
        Json(serde_json::json!({
            "status": if ready { "ready" } else { "not_ready" },
            "model_count": model_count,
        })),
    )
}

async fn list_models(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "data": state.registry.list_models() }))
}

async fn delete_model(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode, ApiError> {
    struct CacheChecker<'a>(&'a gateway_cache::ModelCache);
    impl gateway_registry::LiveInstanceChecker for CacheChecker<'_> {
        fn is_loaded(&self, model_id: &str) -> bool {
            self.0.get_stats().instances.iter().any(|i| i.model_id == model_id)
        }
    }
    state.registry.delete_model(&id, &CacheChecker(&state.cache)).map_err(Error::from)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn chat_completions(State(state): State<AppState>, headers: HeaderMap, Json(req): Json<ChatCompletionRequest>) -> axum::response::Response {
    let (ip, key) = client_key(&headers, "/v1/chat/completions");
    if !state.general_limiter.check(&key) {
        metrics::record_rate_limit_rejection("general");
        return ApiError(Error::RateLimited).into_response();
    }

    let cacheable = RequestFingerprint::is_cacheable(&req, cache_opt_out(&headers));
    if cacheable {
        let fingerprint = RequestFingerprint::for_chat(&req);
        if let Some(cached) = state.response_cache.get(fingerprint) {
            metrics::record_cache_result(true);
            return Json(cached).into_response();
        }
        metrics::record_cache_result(false);
    }

    let guard = match state.inference_limiter.acquire(&ip) {
        Ok(g) => g,
        Err(e) => {
            metrics::record_rate_limit_rejection("inference");
            return ApiError(e).into_response();
        }
    };
    metrics::record_active_inferences(state.inference_limiter.global_in_flight());

    if req.stream {
        let dispatcher = Arc::clone(&state.dispatcher);
        let body = Body::from_stream(async_stream::stream! {
            let _guard = guard;
            let model_id = req.model.clone();
            let mut inner = Box::pin(gateway_dispatcher::stream_chat_completion(&dispatcher, &model_id, &req));
            while let Some(frame) = inner.next().await {
                yield Ok::<_, std::convert::Infallible>(axum::body::Bytes::from(frame));
            }
        });
        return axum::response::Response::builder()
            .status(StatusCode::OK)
            .header(axum::http::header::CONTENT_TYPE, "text/event-stream")
            .header(axum::http::header::CACHE_CONTROL, "no-cache")
            .body(body)
            .expect("static response parts always build");
    }

    let model_id = req.model.clone();
    let result = state.dispatcher.chat_completion(&model_id, &req).await;
    drop(guard);
    metrics::record_active_inferences(state.inference_limiter.global_in_flight());

    match result {
        Ok(response) => {
            if cacheable {
                state.response_cache.put(RequestFingerprint::for_chat(&req), response.clone());
            } else {
                state.response_cache.record_bypass();
            }
            Json(response).into_response()
        }
        Err(e) => ApiError(e).into_response(),
    }
}

async fn completions(State(state): State<AppState>, headers: HeaderMap, Json(req): Json<CompletionRequest>) -> axum::response::Response {
    let (ip, key) = client_key(&headers, "/v1/completions");
    if !state.general_limiter.check(&key) {
        return ApiError(Error::RateLimited).into_response();
    }
    let guard = match state.inference_limiter.acquire(&ip) {
        Ok(g) => g,
        Err(e) => return ApiError(e).into_response(),
    };
    let result = state.dispatcher.completion(&req.model, &req).await;
    drop(guard);
    match result {
        Ok(response) => Json(response).into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

async fn embeddings(State(state): State<AppState>, headers: HeaderMap, Json(req): Json<EmbeddingsRequest>) -> axum::response::Response {
    let (ip, key) = client_key(&headers, "/v1/embeddings");
    if !state.general_limiter.check(&key) {
        return ApiError(Error::RateLimited).into_response();
    }
    let guard = match state.inference_limiter.acquire(&ip) {
        Ok(g) => g,
        Err(e) => return ApiError(e).into_response(),
    };
    let result = state.dispatcher.embeddings(&req.model, &req).await;
    drop(guard);
    match result {
        Ok(response) => Json(response).into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

async fn list_peers(State(state): State<AppState>) -> Json<serde_json::Value> {
    let peers = state.peer_table.as_ref().map(|t| t.list()).unwrap_or_default();
    Json(serde_json::json!({ "data": peers }))
}

#[derive(Debug, Deserialize)]
struct PullRequest {
    peer_id: String,
    filename: String,
    #[serde(default)]
    sha256: Option<String>,
}

#[derive(Debug, Serialize)]
struct OperationAccepted {
    operation_id: String,
}

/// Spec.md §7: "Downloads and exports report failure via the progress
/// registry, not by failing the initiating call, which returns 202
/// Accepted."
async fn pull_from_peer(State(state): State<AppState>, Json(req): Json<PullRequest>) -> Result<impl IntoResponse, ApiError> {
    let table = state.peer_table.as_ref().ok_or_else(|| Error::InvalidRequest("peer plane is disabled".into()))?;
    let peer = table.get(&req.peer_id).ok_or_else(|| Error::InvalidRequest(format!("unknown peer: {}", req.peer_id)))?;

    let operation_id = format!("dl-{}", uuid::Uuid::new_v4());
    state.progress.register(&operation_id, 0);

    let client = state.http_client.clone();
    let dest_dir = state.models_dir.clone();
    let progress = Arc::clone(&state.progress);
    let registry = Arc::clone(&state.registry);
    let op_id = operation_id.clone();
    let filename = req.filename.clone();
    let sha256 = req.sha256.clone();

    tokio::spawn(async move {
        let result = gateway_peer::pull_artifact(&client, &peer.address, &filename, &dest_dir, sha256.as_deref(), &progress, &op_id).await;
        match result {
            Ok(_) => {
                if let Err(e) = registry.scan_models() {
                    tracing::warn!(error = %e, "failed to rescan models after peer pull");
                }
            }
            Err(e) => tracing::warn!(operation_id = %op_id, error = %e, "peer pull failed"),
        }
    });

    Ok((StatusCode::ACCEPTED, Json(OperationAccepted { operation_id })))
}

async fn get_download_progress(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<gateway_core::TransferProgress>, StatusCode> {
    state.progress.get(&id).map(Json).ok_or(StatusCode::NOT_FOUND)
}

#[derive(Debug, Deserialize)]
struct ExportRequest {
    model_id: String,
    dest_path: String,
}

async fn start_export(State(state): State<AppState>, Json(req): Json<ExportRequest>) -> Result<impl IntoResponse, ApiError> {
    let descriptor = state.registry.get_model(&req.model_id).map_err(Error::from)?;
    let operation_id = format!("exp-{}", uuid::Uuid::new_v4());
    state.progress.register(&operation_id, descriptor.size_bytes);

    let progress = Arc::clone(&state.progress);
    let op_id = operation_id.clone();
    let src = std::path::PathBuf::from(descriptor.path);
    let dest = std::path::PathBuf::from(req.dest_path);

    tokio::spawn(async move {
        match tokio::fs::copy(&src, &dest).await {
            Ok(bytes) => {
                progress.advance(&op_id, bytes);
                progress.complete(&op_id);
            }
            Err(e) => progress.fail(&op_id, e.to_string()),
        }
    });

    Ok((StatusCode::ACCEPTED, Json(OperationAccepted { operation_id })))
}

async fn get_export_progress(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<gateway_core::TransferProgress>, StatusCode> {
    state.progress.get(&id).map(Json).ok_or(StatusCode::NOT_FOUND)
}

async fn cache_stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "model_cache": state.cache.get_stats(),
        "response_cache": state.response_cache.stats(),
    }))
}

async fn cache_clear(State(state): State<AppState>) -> StatusCode {
    state.response_cache.clear();
    StatusCode::NO_CONTENT
}

/// Serves a model file to a peer pulling it (spec.md §4.9 "the peer serves
/// the artifact supporting ranged requests for resume"). A hand-rolled
/// single-range parser rather than the full HTTP Range grammar: this
/// workspace's only client is `gateway-peer::pull_artifact`, which only
/// ever sends an open-ended `bytes={n}-` range.
async fn serve_artifact(State(state): State<AppState>, Path(filename): Path<String>, headers: HeaderMap) -> axum::response::Response {
    if filename.contains('/') || filename.contains('\\') || filename == ".." {
        return StatusCode::BAD_REQUEST.into_response();
    }
    let path = state.models_dir.join(&filename);
    let bytes = match tokio::fs::read(&path).await {
        Ok(b) => b,
        Err(_) => return StatusCode::NOT_FOUND.into_response(),
    };

    let total = bytes.len() as u64;
    let start = headers
        .get(axum::http::header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("bytes="))
        .and_then(|v| v.strip_suffix('-'))
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);

    if start >= total && total > 0 {
        return StatusCode::RANGE_NOT_SATISFIABLE.into_response();
    }

    let slice = bytes[start as usize..].to_vec();
    let mut response = axum::response::Response::builder()
        .header(axum::http::header::CONTENT_LENGTH, slice.len())
        .header(axum::http::header::ACCEPT_RANGES, "bytes");

    if start > 0 {
        response = response
            .status(StatusCode::PARTIAL_CONTENT)
            .header(axum::http::header::CONTENT_RANGE, format!("bytes {start}-{}/{total}", total.saturating_sub(1)));
    } else {
        response = response.status(StatusCode::OK);
    }

    response.body(Body::from(slice)).expect("static response parts always build")
}
