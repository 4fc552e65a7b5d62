//! Real HTTP + SSE client for a single child inference process.
//!
//! The retry loop and SSE line-splitting follow the same shape as the
//! teacher's `OllamaBackend`/`OpenAIBackend`: exponential backoff on
//! transient network failure, `data: ` prefix stripped per SSE line, a
//! `[DONE]` sentinel closing the stream.

use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use gateway_core::chat::{
    ChatCompletionRequest, ChatCompletionResponse, CompletionRequest, CompletionResponse,
    EmbeddingsRequest, EmbeddingsResponse, StreamChunk,
};
use reqwest::Client;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{EngineError, Result};
use crate::{EngineClient, TokenEvent};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig { max_retries: 2, initial_backoff: Duration::from_millis(200) }
    }
}

/// Speaks HTTP to one child process at `127.0.0.1:<port>`. `port` is
/// updated atomically by [`EngineClient::set_port`] so a client held across
/// a dispatcher switch never races a concurrent `SetPort` call.
pub struct RealChildClient {
    http: Client,
    port: AtomicU16,
    retry: RetryConfig,
}

impl RealChildClient {
    pub fn new(initial_port: u16, request_timeout: Duration) -> Self {
        let http = Client::builder()
            .timeout(request_timeout)
            .build()
            .expect("reqwest client build is infallible with these options");
        RealChildClient { http, port: AtomicU16::new(initial_port), retry: RetryConfig::default() }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port.load(Ordering::SeqCst))
    }

    /// Cheap readiness probe used by the cache's liveness checks
    /// (spec.md §4.3).
    pub async fn health(&self) -> bool {
        let url = format!("{}/health", self.base_url());
        matches!(
            self.http.get(&url).timeout(Duration::from_secs(2)).send().await,
            Ok(resp) if resp.status().is_success()
        )
    }

    async fn execute_with_retry<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut backoff = self.retry.initial_backoff;
        let mut last_err = None;
        for attempt in 0..=self.retry.max_retries {
            if attempt > 0 {
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if matches!(e, EngineError::ChildUnreachable(_)) && attempt < self.retry.max_retries => {
                    warn!(attempt, error = %e, "transient engine error, retrying");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.expect("loop always runs at least once"))
    }
}

#[async_trait]
impl EngineClient for RealChildClient {
    async fn chat_completion(&self, req: &ChatCompletionRequest) -> Result<ChatCompletionResponse> {
        self.execute_with_retry(|| async {
            let url = format!("{}/v1/chat/completions", self.base_url());
            let resp = self.http.post(&url).json(req).send().await?;
            if !resp.status().is_success() {
                return Err(classify_status(resp.status()));
            }
            resp.json().await.map_err(EngineError::from)
        })
        .await
    }

    async fn completion(&self, req: &CompletionRequest) -> Result<CompletionResponse> {
        self.execute_with_retry(|| async {
            let url = format!("{}/v1/completions", self.base_url());
            let resp = self.http.post(&url).json(req).send().await?;
            if !resp.status().is_success() {
                return Err(classify_status(resp.status()));
            }
            resp.json().await.map_err(EngineError::from)
        })
        .await
    }

    async fn chat_completion_stream(
        &self,
        req: &ChatCompletionRequest,
        tx: mpsc::Sender<TokenEvent>,
    ) -> Result<()> {
        let url = format!("{}/v1/chat/completions", self.base_url());
        let mut streaming_req = req.clone();
        streaming_req.stream = true;

        let resp = self.http.post(&url).json(&streaming_req).send().await?;
        if !resp.status().is_success() {
            return Err(classify_status(resp.status()));
        }

        let mut stream = resp.bytes_stream();
        let mut buf = String::new();
        while let Some(chunk) = stream.next().await {
            let bytes = chunk?;
            buf.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(pos) = buf.find("\n\n") {
                let line = buf[..pos].to_string();
                buf.drain(..pos + 2);
                let line = line.trim();
                let Some(payload) = line.strip_prefix("data:") else { continue };
                let payload = payload.trim();
                if payload == "[DONE]" {
                    return Ok(());
                }
                let parsed: StreamChunk = match serde_json::from_str(payload) {
                    Ok(p) => p,
                    Err(e) => {
                        debug!(error = %e, "skipping malformed stream chunk");
                        continue;
                    }
                };
                for choice in parsed.choices {
                    if let Some(content) = choice.delta.content {
                        if tx.send(TokenEvent::Delta(content)).await.is_err() {
                            // Receiver dropped (client disconnected); stop reading.
                            return Ok(());
                        }
                    }
                    if let Some(reason) = choice.finish_reason {
                        let _ = tx.send(TokenEvent::Done { finish_reason: reason }).await;
                    }
                }
            }
        }
        Ok(())
    }

    async fn embeddings(&self, req: &EmbeddingsRequest) -> Result<EmbeddingsResponse> {
        self.execute_with_retry(|| async {
            let url = format!("{}/v1/embeddings", self.base_url());
            let resp = self.http.post(&url).json(req).send().await?;
            if !resp.status().is_success() {
                return Err(classify_status(resp.status()));
            }
            resp.json().await.map_err(EngineError::from)
        })
        .await
    }

    fn set_port(&self, port: u16) {
        self.port.store(port, Ordering::SeqCst);
    }

    fn current_port(&self) -> u16 {
        self.port.load(Ordering::SeqCst)
    }
}

fn classify_status(status: reqwest::StatusCode) -> EngineError {
    match status.as_u16() {
        404 => EngineError::ModelNotLoaded,
        413 | 422 => EngineError::ContextOverflow,
        502 | 503 | 504 => EngineError::ChildUnreachable(format!("status {status}")),
        _ => EngineError::InvalidResponse(format!("unexpected status {status}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_port_updates_base_url() {
        let client = RealChildClient::new(50000, Duration::from_secs(1));
        assert_eq!(client.current_port(), 50000);
        client.set_port(50500);
        assert_eq!(client.current_port(), 50500);
        assert_eq!(client.base_url(), "http://127.0.0.1:50500");
    }

    #[test]
    fn classifies_service_unavailable_as_unreachable() {
        let err = classify_status(reqwest::StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.code(), "child_unreachable");
    }

    #[test]
    fn classifies_not_found_as_model_not_loaded() {
        let err = classify_status(reqwest::StatusCode::NOT_FOUND);
        assert_eq!(err.code(), "model_not_loaded");
    }
}
