//! OpenAI-compatible chat completions adapter
//!
//! Works against any endpoint speaking the `/chat/completions` protocol
//! (OpenAI, Groq, Ollama). The per-call deadline is enforced locally with
//! `tokio::time::timeout` in addition to the HTTP client timeout.

use crate::config::LlmConfig;
use crate::llm::{ChatError, ChatModel, ChatOptions};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// HTTP chat client for OpenAI-compatible providers
pub struct OpenAiChatModel {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
}

impl OpenAiChatModel {
    /// Build a client from the LLM config section, reading the API key from
    /// the environment variable it names.
    pub fn from_config(config: &LlmConfig) -> Result<Self, ChatError> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| ChatError::MissingApiKey {
            var: config.api_key_env.clone(),
        })?;

        let client = reqwest::Client::builder()
            .timeout(DEFAULT_CALL_TIMEOUT)
            .build()
            .map_err(|e| ChatError::Fatal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }

    async fn send(&self, prompt: &str, options: &ChatOptions) -> Result<String, ChatError> {
        let model = options.model.as_deref().unwrap_or(&self.model);
        let request = ChatRequest {
            model,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
            temperature: options.temperature.unwrap_or(self.temperature),
            max_tokens: options.max_tokens.unwrap_or(512),
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    ChatError::Transient(e.to_string())
                } else {
                    ChatError::Fatal(e.to_string())
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(ChatError::Transient(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Fatal(format!("HTTP {}: {}", status, body)));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ChatError::Unparseable(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ChatError::Unparseable("Response contained no choices".to_string()))
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    async fn chat(&self, prompt: &str, options: &ChatOptions) -> Result<String, ChatError> {
        if options.expired() {
            return Err(ChatError::DeadlineExceeded);
        }

        match options.remaining() {
            Some(remaining) => tokio::time::timeout(remaining, self.send(prompt, options))
                .await
                .map_err(|_| ChatError::DeadlineExceeded)?,
            None => self.send(prompt, options).await,
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
