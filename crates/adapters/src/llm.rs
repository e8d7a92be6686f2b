//! LLM client
//!
//! Wraps an external completion provider behind the [`LlmClient`] trait.
//! Two providers are supported: an OpenAI-style chat-completions endpoint
//! and an Anthropic-style messages endpoint. Retry and circuit-breaking
//! live above this layer; the adapter only performs one attempt and maps
//! provider failures onto the error taxonomy.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use helpdesk_rag_core::{LlmConfig, LlmError};

/// Role of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

/// One message of the prompt
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Per-call completion parameters
#[derive(Debug, Clone)]
pub struct CompletionParams {
    pub temperature: f32,
    pub max_tokens: u32,
    /// Timeout for a single attempt
    pub timeout: Duration,
}

impl Default for CompletionParams {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: 1024,
            timeout: Duration::from_secs(20),
        }
    }
}

/// A completion with the provider-reported token accounting
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl Completion {
    pub fn total_tokens(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Completion provider
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        params: &CompletionParams,
    ) -> Result<Completion, LlmError>;

    fn model(&self) -> &str;

    /// Cheap reachability check used by readiness probes
    async fn ping(&self) -> Result<(), LlmError>;
}

fn map_send_error(e: reqwest::Error, timeout: Duration) -> LlmError {
    if e.is_timeout() {
        LlmError::Timeout(timeout.as_millis() as u64)
    } else {
        LlmError::Network(e.to_string())
    }
}

async fn map_error_status(response: reqwest::Response) -> LlmError {
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    match status {
        429 => LlmError::RateLimited,
        401 | 403 => LlmError::AuthenticationFailed(message),
        _ => LlmError::Api { status, message },
    }
}

/// OpenAI-style chat completions provider
pub struct OpenAiChat {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

impl OpenAiChat {
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            client: crate::client::pooled_client(),
            base_url: config
                .provider_url
                .clone()
                .unwrap_or_else(|| OPENAI_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiChat {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        params: &CompletionParams,
    ) -> Result<Completion, LlmError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages.iter().map(|m| serde_json::json!({
                "role": m.role.as_str(),
                "content": m.content,
            })).collect::<Vec<_>>(),
            "temperature": params.temperature,
            "max_tokens": params.max_tokens,
        });

        debug!(model = %self.model, messages = messages.len(), "openai completion request");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .timeout(params.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_send_error(e, params.timeout))?;

        if !response.status().is_success() {
            return Err(map_error_status(response).await);
        }

        let api_response: OpenAiResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("no choices in response".into()))?;

        Ok(Completion {
            text: choice.message.content.unwrap_or_default(),
            prompt_tokens: api_response.usage.prompt_tokens,
            completion_tokens: api_response.usage.completion_tokens,
        })
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn ping(&self) -> Result<(), LlmError> {
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| map_send_error(e, Duration::from_secs(5)))?;

        if !response.status().is_success() {
            return Err(map_error_status(response).await);
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    usage: OpenAiUsage,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

/// Anthropic-style messages provider
pub struct AnthropicChat {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

impl AnthropicChat {
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            client: crate::client::pooled_client(),
            base_url: config
                .provider_url
                .clone()
                .unwrap_or_else(|| ANTHROPIC_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        }
    }
}

#[async_trait]
impl LlmClient for AnthropicChat {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        params: &CompletionParams,
    ) -> Result<Completion, LlmError> {
        // The messages API takes the system prompt as a top-level field
        let system = messages
            .iter()
            .filter(|m| m.role == ChatRole::System)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let chat: Vec<_> = messages
            .iter()
            .filter(|m| m.role != ChatRole::System)
            .map(|m| {
                serde_json::json!({
                    "role": m.role.as_str(),
                    "content": m.content,
                })
            })
            .collect();

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": chat,
            "temperature": params.temperature,
            "max_tokens": params.max_tokens,
        });
        if !system.is_empty() {
            body["system"] = serde_json::json!(system);
        }

        debug!(model = %self.model, messages = chat.len(), "anthropic completion request");

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .timeout(params.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_send_error(e, params.timeout))?;

        if !response.status().is_success() {
            return Err(map_error_status(response).await);
        }

        let api_response: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let text = api_response
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");

        Ok(Completion {
            text,
            prompt_tokens: api_response.usage.input_tokens,
            completion_tokens: api_response.usage.output_tokens,
        })
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn ping(&self) -> Result<(), LlmError> {
        // A minimal completion is the cheapest liveness signal the
        // messages API offers
        let params = CompletionParams {
            max_tokens: 1,
            timeout: Duration::from_secs(5),
            ..Default::default()
        };
        self.complete(&[ChatMessage::user("ping")], &params)
            .await
            .map(|_| ())
    }
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicBlock>,
    usage: AnthropicUsage,
}

#[derive(Deserialize)]
struct AnthropicBlock {
    text: Option<String>,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}
