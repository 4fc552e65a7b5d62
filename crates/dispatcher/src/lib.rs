//! Dispatcher / switcher (spec.md §4.4, C4) and streaming proxy (§4.5, C5).
//!
//! Two mutexes, not one: the switch mutex guards `(current_port,
//! current_model_id)` and is held only long enough to point the shared
//! engine client at the right child; the inference mutex serializes actual
//! calls into that client, because the client represents one in-flight
//! request at a time even across callers that share a model.

pub mod stream;

pub use stream::{stream_chat_completion, StreamError};

use std::sync::Arc;

use gateway_core::chat::{ChatCompletionRequest, ChatCompletionResponse, CompletionRequest, CompletionResponse, EmbeddingsRequest, EmbeddingsResponse};
use gateway_core::Error;
use gateway_engine::EngineClient;
use gateway_registry::ModelRegistry;
use tokio::sync::Mutex;
use tracing::debug;

/// The addressed model and the port the shared engine client currently
/// targets (spec.md §3 `DispatcherState`). Crate-local: nothing outside the
/// dispatcher needs to observe it directly.
#[derive(Debug, Clone, Default)]
struct DispatcherState {
    current_model_id: Option<String>,
}

pub struct Dispatcher {
    registry: Arc<ModelRegistry>,
    cache: Arc<gateway_cache::ModelCache>,
    engine: Arc<dyn EngineClient>,
    switch_mutex: Mutex<DispatcherState>,
    inference_mutex: Mutex<()>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ModelRegistry>, cache: Arc<gateway_cache::ModelCache>, engine: Arc<dyn EngineClient>) -> Self {
        Dispatcher {
            registry,
            cache,
            engine,
            switch_mutex: Mutex::new(DispatcherState::default()),
            inference_mutex: Mutex::new(()),
        }
    }

    /// Steps 1–5 of spec.md §4.4: ensure the cache has a live instance for
    /// `model_id` and repoint the shared engine client at it. Returns the
    /// cache's operation guard for the instance so the caller can hold it
    /// across the inference call that follows.
    pub(crate) async fn switch(&self, model_id: &str) -> Result<gateway_cache::OperationGuard, Error> {
        let mut state = self.switch_mutex.lock().await;

        let descriptor = self.registry.get_model(model_id).map_err(Error::from)?;
        let instance = self.cache.get_or_load(&descriptor).await.map_err(Error::from)?;
        self.engine.set_port(instance.port);
        state.current_model_id = Some(model_id.to_string());
        debug!(model_id, port = instance.port, "dispatcher switched target");

        self.cache
            .begin_operation(model_id)
            .ok_or_else(|| Error::ChildUnreachable("instance evicted before dispatch".into()))
    }

    pub async fn chat_completion(&self, model_id: &str, req: &ChatCompletionRequest) -> Result<ChatCompletionResponse, Error> {
        let _guard = self.switch(model_id).await?;
        let _inference = self.inference_mutex.lock().await;
        self.engine.chat_completion(req).await.map_err(Error::from)
    }

    pub async fn completion(&self, model_id: &str, req: &CompletionRequest) -> Result<CompletionResponse, Error> {
        let _guard = self.switch(model_id).await?;
        let _inference = self.inference_mutex.lock().await;
        self.engine.completion(req).await.map_err(Error::from)
    }

    pub async fn embeddings(&self, model_id: &str, req: &EmbeddingsRequest) -> Result<EmbeddingsResponse, Error> {
        let _guard = self.switch(model_id).await?;
        let _inference = self.inference_mutex.lock().await;
        self.engine.embeddings(req).await.map_err(Error::from)
    }

    pub fn engine(&self) -> &Arc<dyn EngineClient> {
        &self.engine
    }

    pub fn cache(&self) -> &Arc<gateway_cache::ModelCache> {
        &self.cache
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// Exposed for the streaming proxy, which holds the inference mutex for
    /// the whole SSE pump (including any retry) rather than re-acquiring it
    /// per attempt — `tokio::sync::Mutex` isn't reentrant.
    pub(crate) async fn lock_inference(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.inference_mutex.lock().await
    }

    /// Forcibly drops the cached instance; the caller's subsequent
    /// `switch()` call reloads it fresh.
    pub(crate) async fn force_reload(&self, model_id: &str) {
        let _ = self.cache.unload(model_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::chat::{Message, Role};
    use gateway_engine::MockEngine;
    use gateway_registry::ModelRegistry;
    use std::path::PathBuf;
    use std::time::Duration;

    fn test_dispatcher() -> (Dispatcher, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("m1.gguf"), vec![0u8; 16]).unwrap();
        let registry = Arc::new(ModelRegistry::new(vec![tmp.path().to_path_buf()]));
        registry.scan_models().unwrap();

        let cache_settings = gateway_cache::CacheSettings {
            binary: PathBuf::from("/bin/true"),
            max_instances: 2,
            load_timeout: Duration::from_millis(50),
            health_poll_initial_backoff: Duration::from_millis(5),
            health_poll_max_backoff: Duration::from_millis(10),
            port_range_start: 49152,
            port_range_end: 65535,
            port_select_retries: 5,
            eviction_drain_timeout: Duration::from_millis(50),
            shutdown_grace: Duration::from_millis(50),
            host: "127.0.0.1".into(),
            context_size: 2048,
            num_threads: 2,
            num_gpu_layers: 0,
        };
        let cache = Arc::new(gateway_cache::ModelCache::new(cache_settings));
        let engine: Arc<dyn EngineClient> = Arc::new(MockEngine::new(0));
        (Dispatcher::new(registry, cache, engine), tmp)
    }

    #[tokio::test]
    async fn chat_completion_fails_when_model_missing() {
        let (dispatcher, _tmp) = test_dispatcher();
        let req = ChatCompletionRequest {
            model: "missing".into(),
            messages: vec![Message { role: Role::User, content: "hi".into() }],
            stream: false,
            temperature: None,
            top_p: None,
            max_tokens: None,
            stop: None,
            seed: None,
        };
        let result = dispatcher.chat_completion("missing", &req).await;
        assert!(matches!(result, Err(Error::ModelNotFound(_))));
    }
}
