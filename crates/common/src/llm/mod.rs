//! Generation backend abstraction
//!
//! Provides a unified chat-completion interface over OpenAI-compatible
//! APIs, plus a scripted mock for tests. The client is constructed
//! explicitly and injected into whoever needs it; there is no module-level
//! singleton.

use crate::config::LlmConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// One chat message sent to the generation backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Stream of incremental answer fragments
pub type TokenStream = futures::stream::BoxStream<'static, Result<String>>;

/// Trait for chat-completion generation.
///
/// Failures are reported as errors; an empty completion is returned as an
/// empty string, never as an error.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Generate a full completion for the given messages
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String>;

    /// Generate a completion as a token stream
    async fn generate_stream(&self, messages: &[ChatMessage]) -> Result<TokenStream>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// OpenAI-compatible chat client
pub struct OpenAiChatModel {
    client: reqwest::Client,
    config: LlmConfig,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageBody,
}

#[derive(Deserialize)]
struct ChatMessageBody {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiChatModel {
    /// Create a new chat client from configuration
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self { client, config })
    }

    fn api_key(&self) -> Result<&str> {
        self.config
            .api_key
            .as_deref()
            .ok_or_else(|| AppError::Configuration {
                message: "LLM API key is not configured".to_string(),
            })
    }

    async fn post_chat(&self, messages: &[ChatMessage], stream: bool) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.config.api_base);
        let request = ChatRequest {
            model: &self.config.model,
            messages,
            temperature: self.config.temperature,
            stream,
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key()?))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::GenerationTimeout {
                        timeout_ms: self.config.timeout_secs * 1000,
                    }
                } else {
                    AppError::GenerationError {
                        message: format!("Request failed: {}", e),
                    }
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::GenerationError {
                message: format!("API error {}: {}", status, body),
            });
        }

        Ok(response)
    }

    /// Parse one SSE line from the streaming body; None for keep-alives
    /// and the `[DONE]` terminator.
    fn parse_stream_line(line: &str) -> Option<String> {
        let payload = line.strip_prefix("data: ")?.trim();
        if payload.is_empty() || payload == "[DONE]" {
            return None;
        }
        let chunk: StreamChunk = serde_json::from_str(payload).ok()?;
        chunk.choices.into_iter().next()?.delta.content
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String> {
        let response = self.post_chat(messages, false).await?;

        let body: ChatResponse =
            response
                .json()
                .await
                .map_err(|e| AppError::GenerationError {
                    message: format!("Failed to parse response: {}", e),
                })?;

        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AppError::GenerationError {
                message: "Malformed response: no choices".to_string(),
            })?;

        // Empty content is a valid (degenerate) completion, not a failure
        Ok(choice.message.content.unwrap_or_default())
    }

    async fn generate_stream(&self, messages: &[ChatMessage]) -> Result<TokenStream> {
        let response = self.post_chat(messages, true).await?;
        let (mut tx, rx) = mpsc::channel::<Result<String>>(32);

        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = tx
                            .send(Err(AppError::GenerationError {
                                message: format!("Stream read failed: {}", e),
                            }))
                            .await;
                        return;
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim_end().to_string();
                    buffer.drain(..=pos);

                    if let Some(delta) = Self::parse_stream_line(&line) {
                        // Receiver dropped: caller went away, stop reading
                        if tx.send(Ok(delta)).await.is_err() {
                            return;
                        }
                    }
                }
            }
        });

        Ok(rx.boxed())
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

/// Scripted mock chat model for tests.
///
/// Replies are returned in order; an exhausted script or an explicitly
/// failing mock surfaces a generation error, which is what the answer loop
/// must recover from.
pub struct MockChatModel {
    replies: Mutex<VecDeque<String>>,
    always_fail: bool,
    calls: AtomicUsize,
}

impl MockChatModel {
    /// Mock that replies with the given completions, in order
    pub fn scripted(replies: Vec<&str>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(String::from).collect()),
            always_fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    /// Mock whose every call fails with a generation error
    pub fn failing() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            always_fail: true,
            calls: AtomicUsize::new(0),
        }
    }

    /// Completions requested so far, successful or not
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    fn next_reply(&self) -> Result<String> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if self.always_fail {
            return Err(AppError::GenerationError {
                message: "mock backend failure".to_string(),
            });
        }
        self.replies
            .lock()
            .expect("mock lock poisoned")
            .pop_front()
            .ok_or_else(|| AppError::GenerationError {
                message: "mock script exhausted".to_string(),
            })
    }
}

#[async_trait]
impl ChatModel for MockChatModel {
    async fn generate(&self, _messages: &[ChatMessage]) -> Result<String> {
        self.next_reply()
    }

    async fn generate_stream(&self, _messages: &[ChatMessage]) -> Result<TokenStream> {
        let reply = self.next_reply()?;
        let parts: Vec<Result<String>> = reply
            .split_inclusive(' ')
            .map(|s| Ok(s.to_string()))
            .collect();
        Ok(futures::stream::iter(parts).boxed())
    }

    fn model_name(&self) -> &str {
        "mock-chat"
    }
}
