//! Ollama chat backend.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{Backend, GenerationRequest, TextGenerationClient};
use crate::errors::BackendError;
use crate::memory::{ConversationMemory, Role};

/// Output cap per call; keeps a runaway model from generating forever.
pub const DEFAULT_NUM_PREDICT: u32 = 4096;

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Deserialize)]
struct ChatReplyMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    message: ChatReplyMessage,
}

/// Client for a local or remote Ollama server.
pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
    temperature: f32,
    num_predict: u32,
    timeout_secs: Option<u64>,
    memory: ConversationMemory,
}

impl OllamaClient {
    pub fn new(
        base_url: &str,
        temperature: f32,
        timeout_secs: Option<u64>,
        memory: ConversationMemory,
    ) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let http = builder.build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            temperature,
            num_predict: DEFAULT_NUM_PREDICT,
            timeout_secs,
            memory,
        })
    }

    pub fn with_num_predict(mut self, num_predict: u32) -> Self {
        self.num_predict = num_predict;
        self
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }
}

#[async_trait]
impl TextGenerationClient for OllamaClient {
    async fn invoke(&self, backend: &Backend, request: &GenerationRequest) -> Result<String> {
        let history = request
            .thread
            .as_deref()
            .map(|t| self.memory.history(t))
            .unwrap_or_default();

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage {
            role: "system",
            content: &request.system,
        });
        for turn in &history {
            let role = match turn.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            messages.push(ChatMessage {
                role,
                content: &turn.content,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.user,
        });

        let payload = ChatRequest {
            model: &backend.model_ref,
            messages,
            stream: false,
            options: ChatOptions {
                temperature: self.temperature,
                num_predict: self.num_predict,
            },
        };

        tracing::debug!(
            backend = %backend.identity,
            model = %backend.model_ref,
            thread = ?request.thread,
            prior_turns = history.len(),
            "Invoking backend"
        );

        let response = self
            .http
            .post(self.chat_url())
            .json(&payload)
            .send()
            .await
            .map_err(|e| self.request_error(backend, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                backend: backend.identity.clone(),
                status: status.as_u16(),
                body: truncate(&body, 320),
            }
            .into());
        }

        let reply: ChatReply = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse {
                backend: backend.identity.clone(),
                message: e.to_string(),
            })?;
        let content = reply.message.content.trim().to_string();

        if let Some(thread) = request.thread.as_deref() {
            self.memory.record(thread, &request.user, &content);
        }

        Ok(content)
    }
}

impl OllamaClient {
    fn request_error(&self, backend: &Backend, err: reqwest::Error) -> BackendError {
        match self.timeout_secs {
            Some(secs) if err.is_timeout() => BackendError::Timeout {
                backend: backend.identity.clone(),
                secs,
            },
            _ => BackendError::Request {
                backend: backend.identity.clone(),
                source: err,
            },
        }
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{}...", cut)
    }
}
