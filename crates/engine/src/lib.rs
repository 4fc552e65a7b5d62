//! Child engine client (spec.md §4.1, C1): speaks HTTP + SSE to exactly one
//! child inference process and carries a mutable target port.
//!
//! The source presents both a real engine and a deterministic mock behind
//! the same shape (spec.md §9); [`EngineClient`] is that shape, implemented
//! by [`RealChildClient`] and [`MockEngine`].

pub mod client;
pub mod error;
pub mod mock;

pub use client::RealChildClient;
pub use error::{EngineError, Result};
pub use mock::MockEngine;

use async_trait::async_trait;
use gateway_core::chat::{
    ChatCompletionRequest, ChatCompletionResponse, CompletionRequest, CompletionResponse,
    EmbeddingsRequest, EmbeddingsResponse,
};
use tokio::sync::mpsc;

/// One token-delta emitted while streaming a chat completion.
#[derive(Debug, Clone)]
pub enum TokenEvent {
    Delta(String),
    Done { finish_reason: String },
}

#[async_trait]
pub trait EngineClient: Send + Sync {
    async fn chat_completion(&self, req: &ChatCompletionRequest) -> Result<ChatCompletionResponse>;

    async fn completion(&self, req: &CompletionRequest) -> Result<CompletionResponse>;

    /// Reads the child's SSE stream and publishes each content delta on
    /// `tx`. Returns only after the terminal chunk or an error; the caller
    /// drains `tx` until the channel closes.
    async fn chat_completion_stream(
        &self,
        req: &ChatCompletionRequest,
        tx: mpsc::Sender<TokenEvent>,
    ) -> Result<()>;

    async fn embeddings(&self, req: &EmbeddingsRequest) -> Result<EmbeddingsResponse>;

    /// Atomically repoints the client at a different child process.
    fn set_port(&self, port: u16);

    fn current_port(&self) -> u16;
}
