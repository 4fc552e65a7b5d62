//! Deterministic mock substituting the real child process (spec.md §9,
//! §6 `use mock engine`). Used in tests and when no inference accelerator
//! is available; never spawns a process or opens a socket.

use std::sync::atomic::{AtomicU16, Ordering};

use async_trait::async_trait;
use gateway_core::chat::{
    ChatCompletionRequest, ChatCompletionResponse, Choice, CompletionChoice, CompletionRequest,
    CompletionResponse, EmbeddingsRequest, EmbeddingsResponse, Embedding, Message, Role, Usage,
};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::{EngineClient, TokenEvent};

pub struct MockEngine {
    port: AtomicU16,
}

impl MockEngine {
    pub fn new(port: u16) -> Self {
        MockEngine { port: AtomicU16::new(port) }
    }

    fn echo(&self, messages: &[Message]) -> String {
        let last_user = messages.iter().rev().find(|m| m.role == Role::User);
        match last_user {
            Some(m) => format!("mock response to: {}", m.content),
            None => "mock response".to_string(),
        }
    }
}

#[async_trait]
impl EngineClient for MockEngine {
    async fn chat_completion(&self, req: &ChatCompletionRequest) -> Result<ChatCompletionResponse> {
        let text = self.echo(&req.messages);
        Ok(ChatCompletionResponse {
            id: "mock-chatcmpl".to_string(),
            object: "chat.completion".to_string(),
            created: 0,
            model: req.model.clone(),
            choices: vec![Choice {
                index: 0,
                message: Message { role: Role::Assistant, content: text.clone() },
                finish_reason: Some("stop".to_string()),
            }],
            usage: Usage {
                prompt_tokens: req.messages.iter().map(|m| m.content.len() as u32).sum(),
                completion_tokens: text.len() as u32,
                total_tokens: 0,
            },
        })
    }

    async fn completion(&self, req: &CompletionRequest) -> Result<CompletionResponse> {
        let text = format!("mock completion for: {}", req.prompt);
        Ok(CompletionResponse {
            id: "mock-cmpl".to_string(),
            object: "text_completion".to_string(),
            created: 0,
            model: req.model.clone(),
            choices: vec![CompletionChoice { index: 0, text: text.clone(), finish_reason: Some("stop".to_string()) }],
            usage: Usage {
                prompt_tokens: req.prompt.len() as u32,
                completion_tokens: text.len() as u32,
                total_tokens: 0,
            },
        })
    }

    async fn chat_completion_stream(
        &self,
        req: &ChatCompletionRequest,
        tx: mpsc::Sender<TokenEvent>,
    ) -> Result<()> {
        let text = self.echo(&req.messages);
        for word in text.split(' ') {
            if tx.send(TokenEvent::Delta(format!("{word} "))).await.is_err() {
                return Ok(());
            }
        }
        let _ = tx.send(TokenEvent::Done { finish_reason: "stop".to_string() }).await;
        Ok(())
    }

    async fn embeddings(&self, req: &EmbeddingsRequest) -> Result<EmbeddingsResponse> {
        let data = req
            .input
            .iter()
            .enumerate()
            .map(|(i, text)| Embedding { index: i as u32, embedding: vec![text.len() as f32; 8] })
            .collect();
        Ok(EmbeddingsResponse {
            object: "list".to_string(),
            model: req.model.clone(),
            data,
            usage: Usage { prompt_tokens: 0, completion_tokens: 0, total_tokens: 0 },
        })
    }

    fn set_port(&self, port: u16) {
        self.port.store(port, Ordering::SeqCst);
    }

    fn current_port(&self) -> u16 {
        self.port.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(content: &str) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: "mock".into(),
            messages: vec![Message { role: Role::User, content: content.into() }],
            stream: false,
            temperature: None,
            top_p: None,
            max_tokens: None,
            stop: None,
            seed: None,
        }
    }

    #[tokio::test]
    async fn chat_completion_echoes_last_user_message() {
        let engine = MockEngine::new(50000);
        let resp = engine.chat_completion(&req("hello there")).await.unwrap();
        assert!(resp.choices[0].message.content.contains("hello there"));
    }

    #[tokio::test]
    async fn stream_emits_deltas_then_done() {
        let engine = MockEngine::new(50000);
        let (tx, mut rx) = mpsc::channel(16);
        engine.chat_completion_stream(&req("a b c"), tx).await.unwrap();
        let mut saw_done = false;
        let mut combined = String::new();
        while let Some(event) = rx.recv().await {
            match event {
                TokenEvent::Delta(s) => combined.push_str(&s),
                TokenEvent::Done { finish_reason } => {
                    assert_eq!(finish_reason, "stop");
                    saw_done = true;
                }
            }
        }
        assert!(saw_done);
        assert!(combined.contains("mock response to: a b c"));
    }
}
