//! OpenAI-compatible chat-completions client.
//!
//! Works against any endpoint implementing the `/chat/completions` protocol
//! (OpenAI, OpenRouter, LiteLLM proxies, local inference servers).

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ModelError;
use crate::model::{ModelClient, SamplingParams};

/// Environment variable holding the API base URL.
pub const API_BASE_ENV: &str = "EVAL_FORGE_API_BASE";
/// Environment variable holding the API key.
pub const API_KEY_ENV: &str = "EVAL_FORGE_API_KEY";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// A message in a chat-completions conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    /// Creates a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

/// Client for OpenAI-compatible chat-completions endpoints.
pub struct OpenAiClient {
    api_base: String,
    api_key: Option<String>,
    model: String,
    http_client: Client,
}

impl OpenAiClient {
    /// Creates a client with explicit configuration.
    pub fn new(
        api_base: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            http_client: Client::builder()
                .timeout(DEFAULT_TIMEOUT)
                .build()
                .expect("failed to build HTTP client"),
        }
    }

    /// Creates a client from `EVAL_FORGE_API_BASE` / `EVAL_FORGE_API_KEY`.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::MissingApiBase` if the base URL variable is not
    /// set.
    pub fn from_env(model: impl Into<String>) -> Result<Self, ModelError> {
        let api_base = env::var(API_BASE_ENV).map_err(|_| ModelError::MissingApiBase(API_BASE_ENV))?;
        let api_key = env::var(API_KEY_ENV).ok();
        Ok(Self::new(api_base, api_key, model))
    }

    /// The configured API base URL.
    pub fn api_base(&self) -> &str {
        &self.api_base
    }
}

#[async_trait]
impl ModelClient for OpenAiClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str, params: &SamplingParams) -> Result<String, ModelError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![Message::user(prompt)],
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            top_p: params.top_p,
        };

        let url = format!("{}/chat/completions", self.api_base);
        let mut builder = self.http_client.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ModelError::Api {
                code: status.as_u16(),
                message,
            });
        }

        let parsed: ChatResponse = response.json().await?;
        if let Some(usage) = &parsed.usage {
            debug!(
                model = %self.model,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "chat completion finished"
            );
        }
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or(ModelError::EmptyResponse)
    }
}
